//! The per-media frame cache coordinator.
//!
//! [`FrameCache`] owns the background extractor, the map of cached frames,
//! the scrub-position and eviction logic, and the read path the renderer
//! calls every frame. Retention is a sliding window around the playhead
//! rather than classic LRU — scrubbing has locality around the cursor, and
//! recency-based eviction fits that access pattern poorly.
//!
//! Thread shape: workers decode off-thread and publish raw pixels; the main
//! thread drains them, creates GPU textures through the pool, and inserts.
//! [`get_cached_frame`](FrameCache::get_cached_frame) is a bounded
//! lock-plus-lookup that is safe against the concurrent
//! [`is_frame_cached`](FrameCache::is_frame_cached) queries coming from the
//! extractor threads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::conversion::ConversionStrategy;
use crate::error::CacheError;
use crate::extractor::{BackgroundExtractor, CachedFrameSink};
use crate::metadata::{ColorMetadata, StreamInfo, timestamp_to_frame_number};
use crate::source::{DecoderFactory, PixelData};
use crate::stats::{CacheSegment, CacheStats};
use crate::texture::{GpuContext, PoolTexture, TextureDescriptor, TextureId, TexturePool};

/// Timestamps within this of the window edge count as inside it; keeps the
/// boundary inclusive under `n / fps` rounding.
const WINDOW_EPSILON: f64 = 1e-6;

/// A resident cached frame.
///
/// Move-only: it exclusively owns its pool texture until eviction releases
/// it.
#[derive(Debug)]
pub struct CachedFrame {
    texture: PoolTexture,
    width: u32,
    height: u32,
    timestamp: f64,
    memory_bytes: usize,
    /// Bumped on every read-path hit (kept for diagnostics).
    #[allow(dead_code)]
    last_accessed: Instant,
    is_valid: bool,
}

/// A read-path cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView {
    /// GPU texture holding the frame.
    pub texture: TextureId,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// `CachedFrameSink` over the shared frame map; handed to the extractor so
/// it can skip already-resident frames without coupling to the cache type.
struct FrameMapSink(Arc<Mutex<HashMap<i64, CachedFrame>>>);

impl CachedFrameSink for FrameMapSink {
    fn contains(&self, frame_number: i64) -> bool {
        self.0
            .lock()
            .get(&frame_number)
            .is_some_and(|frame| frame.is_valid)
    }
}

/// Per-media frame cache: admission control, retention, and read path.
pub struct FrameCache {
    config: CacheConfig,
    info: StreamInfo,
    extractor: BackgroundExtractor,
    frames: Arc<Mutex<HashMap<i64, CachedFrame>>>,
    playhead: Mutex<f64>,
    pool: TexturePool,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_frames_cached: AtomicU64,
    failed_extractions: AtomicU64,
}

impl FrameCache {
    /// Create the cache for one media source and start its extractor.
    ///
    /// Pre-allocates the texture pool, which is why construction needs the
    /// GPU context — and therefore happens on the main thread.
    pub fn new(factory: Arc<dyn DecoderFactory>, config: CacheConfig, gpu: &mut GpuContext) -> Self {
        let info = factory.stream_info();
        let frames: Arc<Mutex<HashMap<i64, CachedFrame>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink: Arc<dyn CachedFrameSink> = Arc::new(FrameMapSink(Arc::clone(&frames)));
        let extractor = BackgroundExtractor::new(factory, sink, config.clone());

        let (width, height) = config.resolve_dimensions(info.width, info.height);
        let descriptor = TextureDescriptor {
            width,
            height,
            format: config.pipeline_mode.texture_format(),
        };
        let mut pool = TexturePool::new(descriptor, config.texture_pool_size);
        pool.preallocate(gpu);

        extractor.start();

        Self {
            config,
            info,
            extractor,
            frames,
            playhead: Mutex::new(0.0),
            pool,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            total_frames_cached: AtomicU64::new(0),
            failed_extractions: AtomicU64::new(0),
        }
    }

    /// Stream metadata for the cached media.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// The owned extractor, for state/decode-path queries.
    pub fn extractor(&self) -> &BackgroundExtractor {
        &self.extractor
    }

    /// Record a new playhead position and request the window around it.
    ///
    /// Called every UI frame during scrubbing; this only records the
    /// position and enqueues requests — no decoding, no GPU work, no
    /// blocking beyond two short-held mutexes.
    pub fn update_scrub_position(&self, timestamp: f64) {
        *self.playhead.lock() = timestamp;
        self.extractor.request_window_around_playhead(timestamp);
    }

    /// The most recently recorded playhead position.
    pub fn playhead(&self) -> f64 {
        *self.playhead.lock()
    }

    /// Drain the extractor's results, upload them, and insert.
    ///
    /// Main thread only (enforced by the `GpuContext` parameter). Returns
    /// the number of frames added.
    pub fn process_extraction_results(&mut self, gpu: &mut GpuContext) -> usize {
        let results = self.extractor.drain_results();
        if results.is_empty() {
            return 0;
        }

        let center = self.playhead();
        let window = self.config.max_cache_seconds;
        let mut added = 0;

        for result in results {
            if !result.success {
                self.failed_extractions.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "Extraction of frame {} failed: {}",
                    result.frame_number,
                    result.error_message.as_deref().unwrap_or("unknown")
                );
                continue;
            }

            // A result that already fell out of the window would be evicted
            // by the very next sweep; skip the texture upload entirely.
            if (result.timestamp - center).abs() > window / 2.0 + WINDOW_EPSILON {
                continue;
            }

            self.add_extracted_frame(
                gpu,
                result.frame_number,
                result.timestamp,
                &result.pixel_data,
                result.width,
                result.height,
            );
            added += 1;
        }

        added
    }

    /// Upload one extracted frame and insert it into the map.
    ///
    /// Evicts frames that have fallen outside the window around the current
    /// playhead first, then inserts. An existing entry for the same frame
    /// number is replaced (a frame number appears at most once).
    pub fn add_extracted_frame(
        &mut self,
        gpu: &mut GpuContext,
        frame_number: i64,
        timestamp: f64,
        pixel_data: &PixelData,
        width: u32,
        height: u32,
    ) {
        let center = self.playhead();
        self.evict_frames_beyond_seconds(gpu, center, self.config.max_cache_seconds);

        let descriptor = TextureDescriptor {
            width,
            height,
            format: self.config.pipeline_mode.texture_format(),
        };
        let texture = self.pool.acquire(gpu, &descriptor, pixel_data.as_bytes());

        let frame = CachedFrame {
            texture,
            width,
            height,
            timestamp,
            memory_bytes: pixel_data.byte_len(),
            last_accessed: Instant::now(),
            is_valid: true,
        };

        let replaced = self.frames.lock().insert(frame_number, frame);
        if let Some(old) = replaced {
            self.pool.release(gpu, old.texture);
        }
        self.total_frames_cached.fetch_add(1, Ordering::Relaxed);
    }

    /// Evict every frame whose timestamp lies outside
    /// `[center − window/2, center + window/2]`. The boundary is inclusive.
    pub fn evict_frames_beyond_seconds(
        &mut self,
        gpu: &mut GpuContext,
        center: f64,
        window_seconds: f64,
    ) {
        let half = window_seconds / 2.0 + WINDOW_EPSILON;
        let mut frames = self.frames.lock();
        let expired: Vec<i64> = frames
            .iter()
            .filter(|(_, frame)| (frame.timestamp - center).abs() > half)
            .map(|(&frame_number, _)| frame_number)
            .collect();

        if expired.is_empty() {
            return;
        }

        log::trace!(
            "Evicting {} frames outside [{:.3}, {:.3}]",
            expired.len(),
            center - window_seconds / 2.0,
            center + window_seconds / 2.0
        );
        for frame_number in expired {
            if let Some(frame) = frames.remove(&frame_number) {
                self.pool.release(gpu, frame.texture);
            }
        }
    }

    /// Look up the frame nearest `timestamp`.
    ///
    /// A bounded lock-plus-lookup, called every render frame. A miss means
    /// the renderer falls back to its live-decode path; the cache never
    /// surfaces errors upward.
    pub fn get_cached_frame(&self, timestamp: f64) -> Option<FrameView> {
        let frame_number = timestamp_to_frame_number(timestamp, self.info.frames_per_second);
        let mut frames = self.frames.lock();
        match frames.get_mut(&frame_number) {
            Some(frame) if frame.is_valid => {
                frame.last_accessed = Instant::now();
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(FrameView {
                    texture: frame.texture.id,
                    width: frame.width,
                    height: frame.height,
                })
            }
            _ => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a frame number is resident and valid.
    pub fn is_frame_cached(&self, frame_number: i64) -> bool {
        self.frames
            .lock()
            .get(&frame_number)
            .is_some_and(|frame| frame.is_valid)
    }

    /// Number of resident frames.
    pub fn resident_frames(&self) -> usize {
        self.frames.lock().len()
    }

    /// Inform the cache of a discontinuous timeline seek.
    ///
    /// Pauses extraction and drops requests queued around the old position;
    /// the next [`update_scrub_position`](FrameCache::update_scrub_position)
    /// resumes extraction around the new one.
    pub fn begin_reposition(&self) {
        self.extractor.begin_reposition();
    }

    /// Forward the playback state to the extractor.
    ///
    /// During playback the extraction pool yields the real-time decode
    /// budget to the playback transport; requests keep accumulating so the
    /// window is warm when playback stops.
    pub fn notify_playback_state(&self, is_playing: bool) {
        self.extractor.notify_playback(is_playing);
    }

    /// Enable or disable caching. A pure flag — worker threads idle on
    /// their condition variable and are never stopped or restarted here.
    pub fn set_caching_enabled(&self, enabled: bool) {
        self.extractor.set_enabled(enabled);
    }

    /// Whether caching is enabled.
    pub fn is_caching_enabled(&self) -> bool {
        self.extractor.is_enabled()
    }

    /// Derive and install the conversion strategy from color metadata.
    ///
    /// Sources whose pixel format needs this metadata have their extraction
    /// deferred until now; the call wakes those workers.
    pub fn set_color_metadata(&self, metadata: &ColorMetadata) {
        let strategy = ConversionStrategy::from_metadata(metadata, self.config.pipeline_mode);
        log::debug!(
            "Conversion strategy for {}: {:?} / {:?}",
            metadata.pixel_format_name,
            strategy.matrix_mode,
            strategy.algorithm
        );
        self.extractor.set_conversion_strategy(strategy);
    }

    /// Mark every resident frame invalid so reads miss until the window
    /// refills. Does not touch GPU state, so it is callable from any thread
    /// that holds the cache.
    pub fn invalidate_all(&self) {
        for frame in self.frames.lock().values_mut() {
            frame.is_valid = false;
        }
    }

    /// Remove every resident frame, releasing textures to the pool.
    pub fn clear(&mut self, gpu: &mut GpuContext) {
        let mut frames = self.frames.lock();
        for (_, frame) in frames.drain() {
            self.pool.release(gpu, frame.texture);
        }
    }

    /// Release all frames and destroy the texture pool. Called by the
    /// manager right before the cache is dropped.
    pub fn teardown(&mut self, gpu: &mut GpuContext) {
        self.clear(gpu);
        self.pool.destroy(gpu);
    }

    /// Aggregated counters.
    pub fn stats(&self) -> CacheStats {
        let frames = self.frames.lock();
        let resident_bytes = frames.values().map(|frame| frame.memory_bytes as u64).sum();
        CacheStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_frames_cached: self.total_frames_cached.load(Ordering::Relaxed),
            failed_extractions: self.failed_extractions.load(Ordering::Relaxed),
            resident_frames: frames.len(),
            resident_bytes,
        }
    }

    /// Project resident frames into contiguous time segments for timeline
    /// visualization. Reporting only; nothing internal consumes this.
    pub fn cache_segments(&self) -> Vec<CacheSegment> {
        let fps = self.info.frames_per_second;
        let mut timestamps: Vec<f64> = self
            .frames
            .lock()
            .values()
            .filter(|frame| frame.is_valid)
            .map(|frame| frame.timestamp)
            .collect();
        if timestamps.is_empty() {
            return Vec::new();
        }
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let merge_gap = if fps > 0.0 { 1.5 / fps } else { f64::MAX };
        let mut segments = Vec::new();
        let mut start = timestamps[0];
        let mut end = timestamps[0];
        let mut count = 1usize;

        for &timestamp in &timestamps[1..] {
            if timestamp - end <= merge_gap {
                end = timestamp;
                count += 1;
            } else {
                segments.push(make_segment(start, end, count, fps));
                start = timestamp;
                end = timestamp;
                count = 1;
            }
        }
        segments.push(make_segment(start, end, count, fps));
        segments
    }

    /// Check that the codec is safe for frame-accurate caching.
    ///
    /// Returns an error naming the codec when it belongs to a family known
    /// to corrupt frame-accurate seeking.
    pub fn verify_codec_safety(&self) -> Result<(), CacheError> {
        if crate::manager::codec_blocks_caching(&self.info.codec) {
            return Err(CacheError::DecodeError(format!(
                "Codec {} is unsafe for frame-accurate caching",
                self.info.codec
            )));
        }
        Ok(())
    }
}

fn make_segment(start: f64, end: f64, count: usize, fps: f64) -> CacheSegment {
    let expected = if fps > 0.0 {
        ((end - start) * fps).round() as usize + 1
    } else {
        count
    };
    CacheSegment {
        start_time: start,
        end_time: end,
        density: count as f64 / expected.max(count) as f64,
    }
}
