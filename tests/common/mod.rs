//! Shared test doubles: a synthetic decoder factory and a recording GPU
//! uploader. These drive the cache machinery deterministically, without
//! media fixtures or a graphics context.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use scrubcache::{
    CacheError, DecodePath, DecodedPixels, DecoderFactory, FrameDecoder, GpuContext, PixelData,
    StreamInfo, TextureDescriptor, TextureId, TextureUploader, timestamp_to_frame_number,
};

/// Stream metadata for a synthetic source.
pub fn synthetic_stream_info(frames_per_second: f64, duration_seconds: f64) -> StreamInfo {
    StreamInfo {
        width: 8,
        height: 8,
        frames_per_second,
        frame_count: (duration_seconds * frames_per_second) as i64,
        duration_seconds,
        codec: "h264".to_string(),
        pixel_format_name: "yuv420p".to_string(),
    }
}

/// Deterministic decoder factory.
///
/// Decoding a timestamp yields an 8x8 RGBA8 buffer filled with the frame
/// number (mod 256). Individual frames can be made to fail.
pub struct SyntheticFactory {
    pub info: StreamInfo,
    pub decode_path: DecodePath,
    pub requires_metadata: bool,
    pub failing_frames: Arc<Mutex<HashSet<i64>>>,
    pub opens: AtomicUsize,
}

impl SyntheticFactory {
    pub fn new(frames_per_second: f64, duration_seconds: f64) -> Self {
        Self {
            info: synthetic_stream_info(frames_per_second, duration_seconds),
            decode_path: DecodePath::Software,
            requires_metadata: false,
            failing_frames: Arc::new(Mutex::new(HashSet::new())),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        self.info.codec = codec.to_string();
        self
    }

    pub fn with_requires_metadata(mut self, requires: bool) -> Self {
        self.requires_metadata = requires;
        self
    }

    /// Make decoding of `frame_number` fail with a simulated seek error.
    pub fn fail_frame(&self, frame_number: i64) {
        self.failing_frames.lock().insert(frame_number);
    }
}

impl DecoderFactory for SyntheticFactory {
    fn open(&self) -> Result<Box<dyn FrameDecoder>, CacheError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticDecoder {
            info: self.info.clone(),
            failing_frames: Arc::clone(&self.failing_frames),
        }))
    }

    fn stream_info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn decode_path(&self) -> DecodePath {
        self.decode_path
    }

    fn requires_color_metadata(&self) -> bool {
        self.requires_metadata
    }
}

struct SyntheticDecoder {
    info: StreamInfo,
    failing_frames: Arc<Mutex<HashSet<i64>>>,
}

impl FrameDecoder for SyntheticDecoder {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn set_conversion(&mut self, _strategy: Option<scrubcache::ConversionStrategy>) {}

    fn decode_at(
        &mut self,
        timestamp: f64,
        _sequential_hint: bool,
    ) -> Result<DecodedPixels, CacheError> {
        let frame_number = timestamp_to_frame_number(timestamp, self.info.frames_per_second);
        if self.failing_frames.lock().contains(&frame_number) {
            return Err(CacheError::SeekError {
                timestamp,
                reason: "simulated seek failure".to_string(),
            });
        }
        let pixel_count = (self.info.width * self.info.height) as usize;
        Ok(DecodedPixels {
            frame_number,
            timestamp,
            width: self.info.width,
            height: self.info.height,
            data: PixelData::Bytes(vec![(frame_number % 256) as u8; pixel_count * 4]),
        })
    }
}

/// Counters shared out of a [`RecordingUploader`].
#[derive(Default)]
pub struct UploadCounters {
    pub created: AtomicUsize,
    pub updated: AtomicUsize,
    pub deleted: AtomicUsize,
}

impl UploadCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }
}

/// Uploader that hands out sequential ids and records every call.
pub struct RecordingUploader {
    next_id: u64,
    counters: Arc<UploadCounters>,
}

impl TextureUploader for RecordingUploader {
    fn create_texture(&mut self, _descriptor: &TextureDescriptor, _pixels: &[u8]) -> TextureId {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.next_id += 1;
        TextureId(self.next_id)
    }

    fn update_texture(&mut self, _id: TextureId, _descriptor: &TextureDescriptor, _pixels: &[u8]) {
        self.counters.updated.fetch_add(1, Ordering::SeqCst);
    }

    fn delete_texture(&mut self, _id: TextureId) {
        self.counters.deleted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a recording GPU context plus a handle to its counters.
pub fn recording_gpu() -> (GpuContext, Arc<UploadCounters>) {
    let counters = Arc::new(UploadCounters::default());
    let uploader = RecordingUploader {
        next_id: 0,
        counters: Arc::clone(&counters),
    };
    (GpuContext::new(Box::new(uploader)), counters)
}

/// Poll `condition` until it returns `true` or the timeout elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
