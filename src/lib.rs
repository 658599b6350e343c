//! # scrubcache
//!
//! Background frame caching for scrubbable playback of high-resolution
//! video.
//!
//! Given a media source and a moving playhead, `scrubcache` keeps a bounded,
//! time-windowed set of fully-decoded, GPU-ready frames resident in memory
//! so that timeline scrubbing and fast seeking feel instantaneous. Decode
//! work — hardware decoders, seeking, pixel-format and color conversion —
//! happens on a persistent pool of background threads; GPU texture creation
//! happens only on the main thread, fed by a results queue of raw pixel
//! buffers. Decoding is powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scrubcache::{CacheConfig, GpuContext, MediaSourceFactory, VideoCache};
//! # use scrubcache::{TextureDescriptor, TextureId, TextureUploader};
//! # struct MyUploader;
//! # impl TextureUploader for MyUploader {
//! #     fn create_texture(&mut self, _: &TextureDescriptor, _: &[u8]) -> TextureId { TextureId(1) }
//! #     fn update_texture(&mut self, _: TextureId, _: &TextureDescriptor, _: &[u8]) {}
//! #     fn delete_texture(&mut self, _: TextureId) {}
//! # }
//!
//! // On the main/render thread:
//! let mut gpu = GpuContext::new(Box::new(MyUploader));
//! let mut manager = VideoCache::new();
//!
//! let config = CacheConfig::new().with_max_cache_seconds(20.0);
//! let factory = Arc::new(MediaSourceFactory::new("input.mp4", config.clone()).unwrap());
//! manager.set_current_video("input.mp4", factory, config, &mut gpu);
//!
//! // Every UI frame while the user scrubs:
//! if let Some(cache) = manager.cache() {
//!     cache.update_scrub_position(12.5);
//! }
//! if let Some(cache) = manager.cache_mut() {
//!     cache.process_extraction_results(&mut gpu);
//!     if let Some(frame) = cache.get_cached_frame(12.5) {
//!         // draw frame.texture
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`VideoCache`] — multi-source manager; at most one media's frames are
//!   resident at a time, and switching media destroys the previous cache.
//! - [`FrameCache`] — per-media coordinator: the window-around-playhead
//!   retention policy, the frame map, and the render-thread read path.
//! - [`BackgroundExtractor`] — persistent worker pool pulling prioritized
//!   requests, decoding near the playhead, and publishing raw pixels.
//! - [`ConversionStrategy`] — per-media decision of how deeply to correct
//!   the color matrix during pixel conversion, derived from source metadata.
//! - [`TexturePool`] — arena of reusable GPU textures, main-thread-owned.
//! - [`ThumbnailCache`] — independent async cache of timeline thumbnails.
//!
//! The decoder and the GPU are collaborators behind traits
//! ([`DecoderFactory`]/[`FrameDecoder`], [`TextureUploader`]): any
//! conforming implementation works, and tests drive the machinery with
//! synthetic ones.
//!
//! ## Failure model
//!
//! Hardware-decoder setup failures fall back along a fixed chain ending at
//! software. A frame that fails to decode is skipped — it never aborts its
//! batch, its worker, or the cache. A full request queue drops new requests
//! silently (backpressure). At render time a cache miss is just a miss; the
//! caller falls back to its live-decode path.

pub mod cache;
pub mod config;
pub mod conversion;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod hardware;
pub mod manager;
pub mod metadata;
pub mod request;
pub mod source;
pub mod stats;
pub mod texture;
pub mod thumbnail;

pub use cache::{CachedFrame, FrameCache, FrameView};
pub use config::{CacheConfig, HardwarePreference, PipelineMode};
pub use conversion::{
    ConversionStrategy, MatrixMode, PixelFamily, ScaleAlgorithm, requires_color_metadata,
};
pub use error::CacheError;
pub use extractor::{BackgroundExtractor, CachedFrameSink, ExtractorState};
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use hardware::{DecodePath, HardwareDeviceType, available_hardware_devices};
pub use manager::{VideoCache, codec_blocks_caching};
pub use metadata::{
    ColorMetadata, SourceColorspace, SourceRange, StreamInfo, frame_number_to_timestamp,
    timestamp_to_frame_number,
};
pub use request::{Enqueue, ExtractionBatch, ExtractionResult, FrameRequest, RequestQueue};
pub use source::{
    DecodedPixels, DecoderFactory, FrameDecoder, MATCH_TOLERANCE_FRAMES, MediaSource,
    MediaSourceFactory, PixelData,
};
pub use stats::{CacheSegment, CacheStats};
pub use texture::{
    GpuContext, PoolTexture, TextureDescriptor, TextureFormat, TextureId, TexturePool,
    TextureUploader,
};
pub use thumbnail::{ThumbnailCache, ThumbnailConfig, ThumbnailPriority, ThumbnailView};
