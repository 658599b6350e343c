//! Cache configuration.
//!
//! [`CacheConfig`] is a builder that threads retention, batching, resolution,
//! and decode-path settings through every component at construction time —
//! the cache carries no ambient global state.
//!
//! # Example
//!
//! ```
//! use scrubcache::{CacheConfig, HardwarePreference, PipelineMode};
//!
//! let config = CacheConfig::new()
//!     .with_max_cache_seconds(30.0)
//!     .with_cache_resolution(1280, 720)
//!     .with_pipeline_mode(PipelineMode::SixteenBit)
//!     .with_hardware_preference(HardwarePreference::Software);
//! ```

use ffmpeg_next::format::Pixel;

use crate::hardware::HardwareDeviceType;
use crate::texture::TextureFormat;

/// Hardware decode preference.
///
/// Controls which accelerator the fallback chain tries first. Regardless of
/// the preference, hardware setup failures are recovered by falling back to
/// the next accelerator and ultimately to software decoding — initialization
/// never fails because of hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwarePreference {
    /// Try the platform's accelerators in their default order.
    #[default]
    Auto,
    /// Skip hardware entirely and decode in software.
    Software,
    /// Try a specific accelerator first, then the rest of the chain.
    Prefer(HardwareDeviceType),
}

/// Output bit depth / format class for cached frames.
///
/// Selects the pixel layout workers produce and the texture format hint the
/// GPU collaborator receives. Wide modes decode through a 16-bit scaler
/// target; the float modes additionally widen to `f32` on the CPU so that
/// HDR sources keep their dynamic range through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// 8 bits per channel RGBA. This is the default.
    #[default]
    EightBit,
    /// 16 bits per channel RGBA.
    SixteenBit,
    /// Half-float RGBA texture class (CPU buffers are `f32`).
    SixteenBitFloat,
    /// Full-float RGBA for HDR pipelines.
    HdrFloat,
}

impl PipelineMode {
    /// The pixel format the software scaler converts into.
    ///
    /// Float modes scale into 16-bit integer RGBA first and widen afterwards,
    /// so only two scaler targets exist.
    pub(crate) fn scaler_pixel(self) -> Pixel {
        match self {
            PipelineMode::EightBit => Pixel::RGBA,
            PipelineMode::SixteenBit | PipelineMode::SixteenBitFloat | PipelineMode::HdrFloat => {
                Pixel::RGBA64LE
            }
        }
    }

    /// Bytes per pixel of the buffer handed to the GPU collaborator.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PipelineMode::EightBit => 4,
            PipelineMode::SixteenBit => 8,
            PipelineMode::SixteenBitFloat | PipelineMode::HdrFloat => 16,
        }
    }

    /// Whether decoded pixels are widened to `f32` after scaling.
    pub(crate) fn widens_to_float(self) -> bool {
        matches!(self, PipelineMode::SixteenBitFloat | PipelineMode::HdrFloat)
    }

    /// The texture format hint for this pipeline class.
    pub fn texture_format(self) -> TextureFormat {
        match self {
            PipelineMode::EightBit => TextureFormat::Rgba8,
            PipelineMode::SixteenBit => TextureFormat::Rgba16,
            PipelineMode::SixteenBitFloat => TextureFormat::Rgba16Float,
            PipelineMode::HdrFloat => TextureFormat::Rgba32Float,
        }
    }
}

/// Configuration for a frame cache and its background extractor.
///
/// All fields have defaults matched to scrubbing full-HD footage; a
/// default-constructed config is usable as-is.
#[derive(Debug, Clone)]
#[must_use]
pub struct CacheConfig {
    /// Size of the retention window around the playhead, in seconds.
    pub max_cache_seconds: f64,
    /// When `true` (the default) the request window is centered on the
    /// playhead. When `false` it is biased ahead of the playhead (25%
    /// behind, 75% ahead), favouring the playback direction.
    pub use_centered_caching: bool,
    /// Output frame width in pixels. `0` keeps the source width.
    pub cache_width: u32,
    /// Output frame height in pixels. `0` keeps the source height.
    pub cache_height: u32,
    /// Maximum number of requests a worker pulls in one batch.
    pub max_batch_size: usize,
    /// Upper bound on batches in flight; also bounds the worker pool.
    pub max_concurrent_batches: usize,
    /// Number of worker threads. `0` selects
    /// `min(max_concurrent_batches, available parallelism)`.
    pub worker_threads: usize,
    /// Hardware decode preference for the fallback chain.
    pub hardware_preference: HardwarePreference,
    /// Output bit depth / format class.
    pub pipeline_mode: PipelineMode,
    /// Safety capacity of the request queue. Requests beyond this are
    /// silently dropped (backpressure).
    pub request_queue_capacity: usize,
    /// Number of GPU textures pre-allocated in the texture pool.
    pub texture_pool_size: usize,
    /// Memory budget used to scale the adaptive request window.
    pub memory_budget_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            max_cache_seconds: 20.0,
            use_centered_caching: true,
            cache_width: 0,
            cache_height: 0,
            max_batch_size: 8,
            max_concurrent_batches: 8,
            worker_threads: 0,
            hardware_preference: HardwarePreference::Auto,
            pipeline_mode: PipelineMode::EightBit,
            request_queue_capacity: 256,
            texture_pool_size: 64,
            memory_budget_bytes: 2 * 1024 * 1024 * 1024,
        }
    }

    /// Set the retention window size in seconds. Clamped to a minimum of 1.
    pub fn with_max_cache_seconds(mut self, seconds: f64) -> Self {
        self.max_cache_seconds = seconds.max(1.0);
        self
    }

    /// Center the request window on the playhead (`true`, default) or bias
    /// it toward the playback direction (`false`).
    pub fn with_centered_caching(mut self, centered: bool) -> Self {
        self.use_centered_caching = centered;
        self
    }

    /// Set the cached frame resolution. Pass `0` for either dimension to
    /// keep the source value.
    pub fn with_cache_resolution(mut self, width: u32, height: u32) -> Self {
        self.cache_width = width;
        self.cache_height = height;
        self
    }

    /// Set the maximum batch size. Clamped to a minimum of 1.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Set the maximum number of concurrent batches. Clamped to a minimum
    /// of 1.
    pub fn with_max_concurrent_batches(mut self, batches: usize) -> Self {
        self.max_concurrent_batches = batches.max(1);
        self
    }

    /// Set an explicit worker thread count. `0` (the default) derives the
    /// count from `max_concurrent_batches` and the machine's parallelism.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the hardware decode preference.
    pub fn with_hardware_preference(mut self, preference: HardwarePreference) -> Self {
        self.hardware_preference = preference;
        self
    }

    /// Set the output bit depth / format class.
    pub fn with_pipeline_mode(mut self, mode: PipelineMode) -> Self {
        self.pipeline_mode = mode;
        self
    }

    /// Set the request queue safety capacity. Clamped to a minimum of 8.
    pub fn with_request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity.max(8);
        self
    }

    /// Set the number of pre-allocated textures in the pool.
    pub fn with_texture_pool_size(mut self, size: usize) -> Self {
        self.texture_pool_size = size;
        self
    }

    /// Set the memory budget that scales the adaptive request window.
    pub fn with_memory_budget_bytes(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    /// Resolve the effective worker thread count.
    pub(crate) fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        let parallelism = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);
        self.max_concurrent_batches.min(parallelism).max(1)
    }

    /// Resolve the output dimensions given the source size.
    pub(crate) fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let width = if self.cache_width > 0 {
            self.cache_width
        } else {
            source_width
        };
        let height = if self.cache_height > 0 {
            self.cache_height
        } else {
            source_height
        };
        (width.max(1), height.max(1))
    }
}
