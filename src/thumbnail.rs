//! Asynchronous thumbnail cache for timeline preview markers.
//!
//! Independent of the frame cache: a single persistent worker thread drains
//! a two-level priority queue (`High` = on-demand, `Low` = strategic
//! prefetch), decodes and downsizes frames CPU-side, and places pixel
//! results on a pending-uploads queue.
//! [`process_pending_uploads`](ThumbnailCache::process_pending_uploads)
//! (main thread only) creates the GPU textures and evicts by lowest access
//! count when the cache exceeds capacity.
//!
//! [`get_thumbnail`](ThumbnailCache::get_thumbnail) is fully non-blocking: a
//! miss silently enqueues generation and can optionally serve the nearest
//! cached neighbour as a stand-in.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use image::{Rgba32FImage, RgbaImage, imageops, imageops::FilterType};
use parking_lot::{Condvar, Mutex};

use crate::metadata::frame_number_to_timestamp;
use crate::source::{DecoderFactory, PixelData};
use crate::texture::{GpuContext, TextureDescriptor, TextureFormat, TextureId};

/// Request urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailPriority {
    /// Strategic prefetch.
    Low,
    /// On-demand (a visible marker is waiting).
    High,
}

/// Thumbnail cache options.
#[derive(Debug, Clone)]
#[must_use]
pub struct ThumbnailConfig {
    /// Longest edge of generated thumbnails, in pixels.
    pub max_dimension: u32,
    /// Maximum number of resident thumbnails before eviction.
    pub capacity: usize,
    /// Serve the nearest cached neighbour on a miss instead of nothing.
    pub nearest_fallback: bool,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailConfig {
    /// Create options with defaults (160 px, 256 thumbnails, fallback on).
    pub fn new() -> Self {
        Self {
            max_dimension: 160,
            capacity: 256,
            nearest_fallback: true,
        }
    }

    /// Set the longest-edge size of generated thumbnails.
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(16);
        self
    }

    /// Set the resident-thumbnail capacity. Clamped to a minimum of 1.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Enable or disable the nearest-cached-frame fallback.
    pub fn with_nearest_fallback(mut self, enabled: bool) -> Self {
        self.nearest_fallback = enabled;
        self
    }
}

/// A generated thumbnail waiting for its GPU upload.
struct PendingThumbnail {
    frame_index: i64,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Two-level request queue with pending-set deduplication.
struct ThumbQueue {
    high: VecDeque<i64>,
    low: VecDeque<i64>,
    pending: HashSet<i64>,
}

impl ThumbQueue {
    fn push(&mut self, frame_index: i64, priority: ThumbnailPriority) -> bool {
        if !self.pending.insert(frame_index) {
            return false;
        }
        match priority {
            ThumbnailPriority::High => self.high.push_back(frame_index),
            ThumbnailPriority::Low => self.low.push_back(frame_index),
        }
        true
    }

    fn pop(&mut self) -> Option<i64> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}

struct ThumbShared {
    queue: Mutex<ThumbQueue>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

/// A served thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailView {
    /// GPU texture holding the thumbnail.
    pub texture: TextureId,
    /// Thumbnail width in pixels.
    pub width: u32,
    /// Thumbnail height in pixels.
    pub height: u32,
    /// Index of the frame actually served (differs from the request when
    /// the nearest-neighbour fallback kicked in).
    pub frame_index: i64,
}

struct ThumbEntry {
    texture: TextureId,
    width: u32,
    height: u32,
    access_count: u64,
}

/// Independent async thumbnail cache, keyed by sequence frame index.
pub struct ThumbnailCache {
    config: ThumbnailConfig,
    shared: Arc<ThumbShared>,
    uploads_rx: Receiver<PendingThumbnail>,
    worker: Option<JoinHandle<()>>,
    /// Main-thread-only texture map.
    entries: HashMap<i64, ThumbEntry>,
}

impl ThumbnailCache {
    /// Create the cache and spawn its worker thread.
    ///
    /// The worker opens its own decode context through `factory`.
    pub fn new(factory: Arc<dyn DecoderFactory>, config: ThumbnailConfig) -> Self {
        let shared = Arc::new(ThumbShared {
            queue: Mutex::new(ThumbQueue {
                high: VecDeque::new(),
                low: VecDeque::new(),
                pending: HashSet::new(),
            }),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let (uploads_tx, uploads_rx) = unbounded();

        let worker = {
            let shared = Arc::clone(&shared);
            let max_dimension = config.max_dimension;
            std::thread::Builder::new()
                .name("thumbnail-worker".to_string())
                .spawn(move || thumbnail_worker(shared, uploads_tx, factory, max_dimension))
                .expect("Failed to spawn thumbnail worker")
        };

        Self {
            config,
            shared,
            uploads_rx,
            worker: Some(worker),
            entries: HashMap::new(),
        }
    }

    /// Non-blocking thumbnail lookup.
    ///
    /// On a hit, bumps the access count and returns the texture. On a miss,
    /// silently enqueues high-priority generation and — when the fallback is
    /// enabled — serves the nearest cached neighbour in the meantime.
    pub fn get_thumbnail(&mut self, frame_index: i64) -> Option<ThumbnailView> {
        if let Some(entry) = self.entries.get_mut(&frame_index) {
            entry.access_count += 1;
            return Some(ThumbnailView {
                texture: entry.texture,
                width: entry.width,
                height: entry.height,
                frame_index,
            });
        }

        self.enqueue(frame_index, ThumbnailPriority::High);

        if !self.config.nearest_fallback {
            return None;
        }
        let nearest = self
            .entries
            .keys()
            .copied()
            .min_by_key(|&index| (index - frame_index).abs())?;
        let entry = self.entries.get_mut(&nearest)?;
        entry.access_count += 1;
        Some(ThumbnailView {
            texture: entry.texture,
            width: entry.width,
            height: entry.height,
            frame_index: nearest,
        })
    }

    /// Queue strategic low-priority prefetch for a set of frame indices.
    pub fn request_prefetch(&self, frame_indices: &[i64]) {
        let mut queued = false;
        {
            let mut queue = self.shared.queue.lock();
            for &frame_index in frame_indices {
                if !self.entries.contains_key(&frame_index) {
                    queued |= queue.push(frame_index, ThumbnailPriority::Low);
                }
            }
        }
        if queued {
            self.shared.work_ready.notify_one();
        }
    }

    fn enqueue(&self, frame_index: i64, priority: ThumbnailPriority) {
        let queued = self.shared.queue.lock().push(frame_index, priority);
        if queued {
            self.shared.work_ready.notify_one();
        }
    }

    /// Upload every generated thumbnail currently pending and evict down to
    /// capacity. Main thread only. Returns the number uploaded.
    pub fn process_pending_uploads(&mut self, gpu: &mut GpuContext) -> usize {
        let mut uploaded = 0;

        for pending in self.uploads_rx.try_iter() {
            let descriptor = TextureDescriptor {
                width: pending.width,
                height: pending.height,
                format: TextureFormat::Rgba8,
            };
            let texture = gpu.create_texture(&descriptor, &pending.pixels);
            // Insertion counts as one access so a brand-new thumbnail is
            // never the immediate eviction victim.
            let replaced = self.entries.insert(
                pending.frame_index,
                ThumbEntry {
                    texture,
                    width: pending.width,
                    height: pending.height,
                    access_count: 1,
                },
            );
            if let Some(old) = replaced {
                gpu.delete_texture(old.texture);
            }
            uploaded += 1;
        }

        // LRU by lowest access count once over capacity.
        while self.entries.len() > self.config.capacity {
            let Some(&coldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.access_count)
                .map(|(index, _)| index)
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&coldest) {
                gpu.delete_texture(entry.texture);
            }
        }

        uploaded
    }

    /// Number of resident thumbnails.
    pub fn resident_thumbnails(&self) -> usize {
        self.entries.len()
    }

    /// Number of generation requests waiting for the worker.
    pub fn pending_requests(&self) -> usize {
        let queue = self.shared.queue.lock();
        queue.high.len() + queue.low.len()
    }

    /// Destroy every resident thumbnail texture. Main thread only.
    pub fn clear(&mut self, gpu: &mut GpuContext) {
        for (_, entry) in self.entries.drain() {
            gpu.delete_texture(entry.texture);
        }
    }
}

impl Drop for ThumbnailCache {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Serialize with the worker between its gate check and its wait, so
        // the notify cannot fall into that window.
        drop(self.shared.queue.lock());
        self.shared.work_ready.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker: decode requested frames and downsize them CPU-side.
fn thumbnail_worker(
    shared: Arc<ThumbShared>,
    uploads_tx: Sender<PendingThumbnail>,
    factory: Arc<dyn DecoderFactory>,
    max_dimension: u32,
) {
    let mut decoder = match factory.open() {
        Ok(decoder) => decoder,
        Err(error) => {
            log::error!("Thumbnail worker could not open a decode context: {error}");
            return;
        }
    };

    let frames_per_second = decoder.stream_info().frames_per_second;

    loop {
        let frame_index = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if !queue.is_empty() {
                    if let Some(frame_index) = queue.pop() {
                        break frame_index;
                    }
                }
                shared.work_ready.wait(&mut queue);
            }
        };

        let timestamp = frame_number_to_timestamp(frame_index, frames_per_second);
        let generated = decoder
            .decode_at(timestamp, false)
            .map(|pixels| downsize(&pixels.data, pixels.width, pixels.height, max_dimension));

        shared.queue.lock().pending.remove(&frame_index);

        match generated {
            Ok(Some((pixels, width, height))) => {
                let pending = PendingThumbnail {
                    frame_index,
                    width,
                    height,
                    pixels,
                };
                if uploads_tx.send(pending).is_err() {
                    return;
                }
            }
            Ok(None) => {
                log::debug!("Thumbnail {frame_index}: unsupported pixel layout");
            }
            Err(error) => {
                log::debug!("Thumbnail {frame_index} failed: {error}");
            }
        }
    }
}

/// Downsize decoded pixels to RGBA8, fitting `max_dimension` on the longest
/// edge.
///
/// Wide and HDR sources resize in float precision before quantizing, so the
/// downscale does not band their dynamic range.
fn downsize(
    data: &PixelData,
    width: u32,
    height: u32,
    max_dimension: u32,
) -> Option<(Vec<u8>, u32, u32)> {
    let (thumb_width, thumb_height) = fit_dimensions(width, height, max_dimension);
    let pixel_count = width as usize * height as usize;

    match data {
        PixelData::Bytes(bytes) if bytes.len() == pixel_count * 4 => {
            let image = RgbaImage::from_raw(width, height, bytes.clone())?;
            let resized = imageops::resize(&image, thumb_width, thumb_height, FilterType::Triangle);
            Some((resized.into_raw(), thumb_width, thumb_height))
        }
        PixelData::Bytes(bytes) if bytes.len() == pixel_count * 8 => {
            // RGBA16: widen to float, resize, then quantize.
            let floats: Vec<f32> = bytes
                .chunks_exact(2)
                .map(|sample| {
                    u16::from_le_bytes([sample[0], sample[1]]) as f32 / u16::MAX as f32
                })
                .collect();
            resize_float(floats, width, height, thumb_width, thumb_height)
        }
        PixelData::Floats(floats) if floats.len() == pixel_count * 4 => {
            resize_float(floats.clone(), width, height, thumb_width, thumb_height)
        }
        _ => None,
    }
}

fn resize_float(
    floats: Vec<f32>,
    width: u32,
    height: u32,
    thumb_width: u32,
    thumb_height: u32,
) -> Option<(Vec<u8>, u32, u32)> {
    let image = Rgba32FImage::from_raw(width, height, floats)?;
    let resized = imageops::resize(&image, thumb_width, thumb_height, FilterType::Triangle);
    let quantized: Vec<u8> = resized
        .into_raw()
        .into_iter()
        .map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    Some((quantized, thumb_width, thumb_height))
}

/// Compute dimensions that fit within `max_dimension` preserving aspect
/// ratio.
fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_dimension, max_dimension);
    }
    let scale = max_dimension as f64 / width.max(height) as f64;
    let new_width = ((width as f64) * scale).round() as u32;
    let new_height = ((height as f64) * scale).round() as u32;
    (new_width.max(1), new_height.max(1))
}
