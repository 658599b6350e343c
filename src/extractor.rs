//! Background frame extraction.
//!
//! [`BackgroundExtractor`] owns a persistent pool of worker threads plus one
//! open decode context per worker. Workers pull prioritized requests from a
//! shared queue, decode and convert pixels, and publish results to a
//! thread-safe results queue that the main thread drains. The extractor
//! knows nothing about GPU state or the UI.
//!
//! The pool is a long-lived resource: threads are created once at
//! construction and run until the extractor is dropped. Pausing, disabling,
//! and media-switch churn are all flags — threads idle on a condition
//! variable, never spinning and never being re-created.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::CacheConfig;
use crate::conversion::ConversionStrategy;
use crate::hardware::DecodePath;
use crate::metadata::{StreamInfo, frame_number_to_timestamp, timestamp_to_frame_number};
use crate::request::{Enqueue, ExtractionBatch, ExtractionResult, FrameRequest, RequestQueue};
use crate::source::DecoderFactory;

/// Extraction scheduling state.
///
/// `Stopped` is both initial and terminal. Every paused state blocks
/// extraction while keeping the worker threads alive, blocked on the
/// condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    /// Not yet started, or shutting down.
    Stopped,
    /// Workers may pull batches.
    Extracting,
    /// Paused because playback is running (the live-decode path owns the
    /// CPU/GPU budget; requests still accumulate).
    PausedPlayback,
    /// Paused during a timeline seek; cleared by the next window request.
    PausedReposition,
    /// Paused explicitly via the API.
    PausedManual,
}

/// The narrow cache-facing seam the extractor consumes.
///
/// Implemented over the frame map by [`FrameCache`](crate::FrameCache);
/// keeps the extractor free of any concrete cache coupling.
pub trait CachedFrameSink: Send + Sync {
    /// Whether a frame number is already resident.
    fn contains(&self, frame_number: i64) -> bool;
}

/// Scheduling state guarded by one mutex: the request queue plus the
/// extraction state the workers gate on.
struct Scheduler {
    queue: RequestQueue,
    state: ExtractorState,
}

struct ExtractorShared {
    scheduler: Mutex<Scheduler>,
    work_ready: Condvar,
    enabled: AtomicBool,
    shutdown: AtomicBool,
    strategy: RwLock<Option<ConversionStrategy>>,
    strategy_generation: AtomicU64,
    requires_metadata: bool,
    sink: Arc<dyn CachedFrameSink>,
    info: StreamInfo,
    config: CacheConfig,
}

impl ExtractorShared {
    /// Whether workers may extract right now. Callers hold the scheduler
    /// lock.
    fn should_extract(&self, scheduler: &Scheduler) -> bool {
        !self.shutdown.load(Ordering::Acquire)
            && self.enabled.load(Ordering::Acquire)
            && scheduler.state == ExtractorState::Extracting
            && !self.awaiting_metadata()
            && !scheduler.queue.is_empty()
    }

    /// Color-matrix handling for this source needs metadata that has not
    /// arrived yet; decoding now would produce visibly wrong frames, so the
    /// frames are deferred instead.
    fn awaiting_metadata(&self) -> bool {
        self.requires_metadata && self.strategy_generation.load(Ordering::Acquire) == 0
    }
}

/// Persistent background extraction pool for one media source.
pub struct BackgroundExtractor {
    shared: Arc<ExtractorShared>,
    results_rx: Receiver<ExtractionResult>,
    workers: Vec<JoinHandle<()>>,
    decode_path: DecodePath,
}

impl BackgroundExtractor {
    /// Create the extractor and spawn its worker pool.
    ///
    /// Each worker opens its own decode context through `factory` on its own
    /// thread. The extractor starts in [`ExtractorState::Stopped`]; call
    /// [`start`](BackgroundExtractor::start) to begin extraction.
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        sink: Arc<dyn CachedFrameSink>,
        config: CacheConfig,
    ) -> Self {
        let info = factory.stream_info();
        let decode_path = factory.decode_path();

        let shared = Arc::new(ExtractorShared {
            scheduler: Mutex::new(Scheduler {
                queue: RequestQueue::new(config.request_queue_capacity),
                state: ExtractorState::Stopped,
            }),
            work_ready: Condvar::new(),
            enabled: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            strategy: RwLock::new(None),
            strategy_generation: AtomicU64::new(0),
            requires_metadata: factory.requires_color_metadata(),
            sink,
            info,
            config: config.clone(),
        });

        let (results_tx, results_rx) = unbounded();

        let worker_count = config.effective_worker_threads();
        let mut workers = Vec::with_capacity(worker_count);
        for worker_index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let results_tx = results_tx.clone();
            let factory = Arc::clone(&factory);
            let handle = std::thread::Builder::new()
                .name(format!("frame-extractor-{worker_index}"))
                .spawn(move || worker_loop(shared, results_tx, factory, worker_index))
                .expect("Failed to spawn extraction worker");
            workers.push(handle);
        }

        log::debug!(
            "Background extractor started with {worker_count} workers ({decode_path})"
        );

        Self {
            shared,
            results_rx,
            workers,
            decode_path,
        }
    }

    /// Stream metadata for the source being extracted.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.shared.info
    }

    /// Which decode path (hardware/software) initialization ended up on.
    pub fn decode_path(&self) -> DecodePath {
        self.decode_path
    }

    /// Current scheduling state.
    pub fn state(&self) -> ExtractorState {
        self.shared.scheduler.lock().state
    }

    /// Transition `Stopped → Extracting`. No-op in any other state.
    pub fn start(&self) {
        self.transition(|state| {
            if state == ExtractorState::Stopped {
                Some(ExtractorState::Extracting)
            } else {
                None
            }
        });
    }

    /// Inform the extractor that playback started or stopped.
    ///
    /// During playback extraction pauses (the live-decode path owns the
    /// real-time budget) but requests keep accumulating, so the window is
    /// warm the moment playback stops.
    pub fn notify_playback(&self, is_playing: bool) {
        self.transition(|state| match (state, is_playing) {
            (ExtractorState::Extracting | ExtractorState::PausedReposition, true) => {
                Some(ExtractorState::PausedPlayback)
            }
            (ExtractorState::PausedPlayback, false) => Some(ExtractorState::Extracting),
            _ => None,
        });
    }

    /// Pause extraction for a timeline reposition and drop stale requests.
    ///
    /// The next [`request_window_around_playhead`](Self::request_window_around_playhead)
    /// resumes extraction around the new position.
    pub fn begin_reposition(&self) {
        let mut scheduler = self.shared.scheduler.lock();
        if !matches!(
            scheduler.state,
            ExtractorState::Stopped | ExtractorState::PausedManual
        ) {
            scheduler.state = ExtractorState::PausedReposition;
            scheduler.queue.clear();
        }
    }

    /// Pause extraction explicitly.
    pub fn pause_manual(&self) {
        self.transition(|state| {
            if state != ExtractorState::Stopped {
                Some(ExtractorState::PausedManual)
            } else {
                None
            }
        });
    }

    /// Resume extraction from any paused state.
    pub fn resume(&self) {
        self.transition(|state| match state {
            ExtractorState::PausedPlayback
            | ExtractorState::PausedReposition
            | ExtractorState::PausedManual => Some(ExtractorState::Extracting),
            _ => None,
        });
    }

    fn transition(&self, next: impl Fn(ExtractorState) -> Option<ExtractorState>) {
        let mut scheduler = self.shared.scheduler.lock();
        if let Some(state) = next(scheduler.state) {
            scheduler.state = state;
            drop(scheduler);
            self.shared.work_ready.notify_all();
        }
    }

    /// Enable or disable extraction.
    ///
    /// A pure flag: worker threads stay alive and idle on the condition
    /// variable while disabled. Thread teardown only happens when the
    /// extractor itself is dropped.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        if enabled {
            // Serialize with workers between their gate check and their
            // wait, so the notify cannot fall into that window.
            drop(self.shared.scheduler.lock());
            self.shared.work_ready.notify_all();
        }
    }

    /// Whether extraction is enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Install the conversion strategy once color metadata arrives.
    ///
    /// Wakes workers that were deferring metadata-dependent sources.
    pub fn set_conversion_strategy(&self, strategy: ConversionStrategy) {
        *self.shared.strategy.write() = Some(strategy);
        self.shared
            .strategy_generation
            .fetch_add(1, Ordering::AcqRel);
        drop(self.shared.scheduler.lock());
        self.shared.work_ready.notify_all();
    }

    /// Request extraction of a single frame.
    ///
    /// Rejections (out-of-bounds, already cached, duplicate, queue full) are
    /// silent by design; the returned [`Enqueue`] is for observability only.
    pub fn request_frame(&self, frame_number: i64, timestamp: f64, priority: i32) -> Enqueue {
        let outcome = {
            let mut scheduler = self.shared.scheduler.lock();
            self.push_request(&mut scheduler, frame_number, timestamp, priority)
        };
        if outcome == Enqueue::Queued {
            self.shared.work_ready.notify_one();
        }
        outcome
    }

    fn push_request(
        &self,
        scheduler: &mut Scheduler,
        frame_number: i64,
        timestamp: f64,
        priority: i32,
    ) -> Enqueue {
        let total_frames = self.shared.info.frame_count;
        if frame_number < 0 || (total_frames > 0 && frame_number >= total_frames) {
            return Enqueue::OutOfBounds;
        }
        if self.shared.sink.contains(frame_number) {
            return Enqueue::AlreadyCached;
        }
        scheduler
            .queue
            .push(FrameRequest::new(frame_number, timestamp, priority))
    }

    /// Enqueue requests for every frame in the adaptive window around
    /// `center_timestamp`, prioritized by proximity to it.
    ///
    /// This is the only request-generation path; window placement is always
    /// relative to the playhead. Also resumes extraction after a
    /// reposition pause.
    pub fn request_window_around_playhead(&self, center_timestamp: f64) {
        let fps = self.shared.info.frames_per_second;
        if fps <= 0.0 {
            return;
        }

        let window = self.window_seconds();
        let (behind, ahead) = if self.shared.config.use_centered_caching {
            (window / 2.0, window / 2.0)
        } else {
            (window * 0.25, window * 0.75)
        };

        let duration = self.shared.info.duration_seconds;
        let start = (center_timestamp - behind).max(0.0);
        let end = if duration > 0.0 {
            (center_timestamp + ahead).min(duration)
        } else {
            center_timestamp + ahead
        };

        let start_frame = (start * fps).floor() as i64;
        let mut end_frame = (end * fps).ceil() as i64;
        if self.shared.info.frame_count > 0 {
            end_frame = end_frame.min(self.shared.info.frame_count - 1);
        }
        let center_frame = timestamp_to_frame_number(center_timestamp, fps);
        let span = (end_frame - start_frame).max(1);

        {
            let mut scheduler = self.shared.scheduler.lock();
            if scheduler.state == ExtractorState::PausedReposition {
                scheduler.state = ExtractorState::Extracting;
            }
            for frame_number in start_frame..=end_frame {
                let distance = (frame_number - center_frame).abs();
                let priority = (span - distance) as i32;
                let timestamp = frame_number_to_timestamp(frame_number, fps);
                self.push_request(&mut scheduler, frame_number, timestamp, priority);
            }
        }
        self.shared.work_ready.notify_all();
    }

    /// The adaptive request window in seconds.
    ///
    /// Wider when the configured memory budget affords more resident frames,
    /// clamped to `[2.0, max_cache_seconds]`.
    pub fn window_seconds(&self) -> f64 {
        let info = &self.shared.info;
        let config = &self.shared.config;
        let (width, height) = config.resolve_dimensions(info.width, info.height);
        let frame_bytes =
            (width as u64) * (height as u64) * config.pipeline_mode.bytes_per_pixel() as u64;
        let fps = info.frames_per_second;
        if frame_bytes == 0 || fps <= 0.0 {
            return config.max_cache_seconds;
        }
        let affordable = config.memory_budget_bytes as f64 / (frame_bytes as f64 * fps);
        affordable.clamp(2.0, config.max_cache_seconds)
    }

    /// Drain every completed result currently pending.
    ///
    /// Called from the main thread only; the cache turns successful results
    /// into GPU textures.
    pub fn drain_results(&self) -> Vec<ExtractionResult> {
        self.results_rx.try_iter().collect()
    }

    /// Drop every pending request. Results already produced are unaffected.
    pub fn clear_pending_requests(&self) {
        self.shared.scheduler.lock().queue.clear();
    }

    /// Number of requests currently pending.
    pub fn pending_requests(&self) -> usize {
        self.shared.scheduler.lock().queue.len()
    }
}

impl Drop for BackgroundExtractor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let mut scheduler = self.shared.scheduler.lock();
            scheduler.state = ExtractorState::Stopped;
            // Results are no longer wanted; drop the backlog instead of
            // draining it.
            scheduler.queue.clear();
        }
        self.shared.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::debug!("Background extractor shut down");
    }
}

/// One worker: open a decode context, then serve batches until shutdown.
fn worker_loop(
    shared: Arc<ExtractorShared>,
    results_tx: Sender<ExtractionResult>,
    factory: Arc<dyn DecoderFactory>,
    worker_index: usize,
) {
    let mut decoder = match factory.open() {
        Ok(decoder) => decoder,
        Err(error) => {
            log::error!("Worker {worker_index} could not open a decode context: {error}");
            return;
        }
    };

    let mut strategy_generation_seen = 0u64;

    loop {
        let batch = {
            let mut scheduler = shared.scheduler.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if shared.should_extract(&scheduler) {
                    let sink = Arc::clone(&shared.sink);
                    let requests = scheduler
                        .queue
                        .take_batch(shared.config.max_batch_size, |frame| sink.contains(frame));
                    if !requests.is_empty() {
                        break ExtractionBatch::from_requests(
                            requests,
                            shared.info.frames_per_second,
                        );
                    }
                }
                shared.work_ready.wait(&mut scheduler);
            }
        };

        let generation = shared.strategy_generation.load(Ordering::Acquire);
        if generation != strategy_generation_seen {
            strategy_generation_seen = generation;
            decoder.set_conversion(*shared.strategy.read());
        }

        for (index, request) in batch.requests.iter().enumerate() {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }

            // Within a sorted sequential batch only the first request pays
            // for a seek.
            let sequential_hint = batch.is_sequential && index > 0;
            let result = match decoder.decode_at(request.timestamp, sequential_hint) {
                Ok(pixels) => ExtractionResult {
                    success: true,
                    frame_number: request.frame_number,
                    timestamp: request.timestamp,
                    width: pixels.width,
                    height: pixels.height,
                    memory_bytes: pixels.data.byte_len(),
                    pixel_data: pixels.data,
                    error_message: None,
                },
                Err(error) => {
                    // A bad frame never aborts the batch or the worker.
                    log::debug!(
                        "Worker {worker_index}: frame {} failed: {error}",
                        request.frame_number
                    );
                    ExtractionResult::failure(
                        request.frame_number,
                        request.timestamp,
                        error.to_string(),
                    )
                }
            };

            if results_tx.send(result).is_err() {
                return;
            }
        }
    }
}
