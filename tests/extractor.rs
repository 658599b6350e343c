//! Background extractor tests: request admission, the window request path,
//! batch failure isolation, metadata deferral, and the pause state machine.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{SyntheticFactory, wait_until};
use scrubcache::{
    BackgroundExtractor, CacheConfig, CachedFrameSink, ConversionStrategy, Enqueue,
    ExtractionResult, ExtractorState,
};

const FPS: f64 = 24.0;

/// A sink with a fixed set of "already cached" frames.
struct FixedSink(HashSet<i64>);

impl CachedFrameSink for FixedSink {
    fn contains(&self, frame_number: i64) -> bool {
        self.0.contains(&frame_number)
    }
}

fn empty_sink() -> Arc<dyn CachedFrameSink> {
    Arc::new(FixedSink(HashSet::new()))
}

fn test_config() -> CacheConfig {
    CacheConfig::new()
        .with_max_cache_seconds(20.0)
        .with_worker_threads(2)
        .with_request_queue_capacity(2048)
}

fn collect_results(
    extractor: &BackgroundExtractor,
    minimum: usize,
    timeout: Duration,
) -> Vec<ExtractionResult> {
    let mut results = Vec::new();
    wait_until(timeout, || {
        results.extend(extractor.drain_results());
        results.len() >= minimum
    });
    results
}

#[test]
fn duplicate_requests_enqueue_once() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    // Not started: requests stay queued for inspection.

    assert_eq!(extractor.request_frame(100, 100.0 / FPS, 5), Enqueue::Queued);
    assert_eq!(
        extractor.request_frame(100, 100.0 / FPS, 5),
        Enqueue::Duplicate
    );
    assert_eq!(extractor.pending_requests(), 1);
}

#[test]
fn cached_frames_are_not_re_requested() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let sink: Arc<dyn CachedFrameSink> = Arc::new(FixedSink(HashSet::from([100])));
    let extractor = BackgroundExtractor::new(factory, sink, test_config());

    assert_eq!(
        extractor.request_frame(100, 100.0 / FPS, 5),
        Enqueue::AlreadyCached
    );
    assert_eq!(extractor.pending_requests(), 0);
}

#[test]
fn out_of_bounds_frames_are_rejected() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());

    // 120 s at 24 fps = 2880 frames.
    assert_eq!(extractor.request_frame(2880, 120.0, 5), Enqueue::OutOfBounds);
    assert_eq!(extractor.request_frame(-1, -0.04, 5), Enqueue::OutOfBounds);
    assert_eq!(extractor.pending_requests(), 0);
}

#[test]
fn queue_overflow_drops_silently() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let config = test_config().with_request_queue_capacity(8);
    let extractor = BackgroundExtractor::new(factory, empty_sink(), config);

    for frame in 0..8 {
        assert_eq!(
            extractor.request_frame(frame, frame as f64 / FPS, 1),
            Enqueue::Queued
        );
    }
    assert_eq!(extractor.request_frame(8, 8.0 / FPS, 1), Enqueue::QueueFull);
    assert_eq!(extractor.pending_requests(), 8);
}

#[test]
fn window_request_covers_expected_range() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    extractor.start();

    // fps=24, window=20 s, playhead=50 s → requested range ≈ [40 s, 60 s].
    extractor.request_window_around_playhead(50.0);

    let results = collect_results(&extractor, 400, Duration::from_secs(10));
    assert!(results.len() >= 400, "got {} results", results.len());

    let mut covered = HashSet::new();
    for result in &results {
        assert!(result.success);
        assert!(
            result.timestamp >= 40.0 - 1e-6 && result.timestamp <= 60.0 + 1e-6,
            "timestamp {} outside window",
            result.timestamp
        );
        covered.insert(result.frame_number);
    }
    // The playhead frame itself is always requested.
    assert!(covered.contains(&1200));
}

#[test]
fn failed_frame_does_not_abort_its_batch() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    factory.fail_frame(1000);
    let config = test_config().with_worker_threads(1).with_max_batch_size(8);
    let extractor = BackgroundExtractor::new(factory, empty_sink(), config);

    for frame in 997..1005 {
        extractor.request_frame(frame, frame as f64 / FPS, 1);
    }
    extractor.start();

    let results = collect_results(&extractor, 8, Duration::from_secs(10));
    assert_eq!(results.len(), 8);

    let failures: Vec<&ExtractionResult> =
        results.iter().filter(|result| !result.success).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].frame_number, 1000);
    assert!(failures[0].error_message.is_some());
    assert!(
        results
            .iter()
            .filter(|result| result.success)
            .all(|result| result.memory_bytes > 0)
    );
}

#[test]
fn metadata_dependent_sources_defer_until_strategy_arrives() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0).with_requires_metadata(true));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    extractor.start();
    extractor.request_frame(10, 10.0 / FPS, 1);

    std::thread::sleep(Duration::from_millis(100));
    assert!(
        extractor.drain_results().is_empty(),
        "no frames may be decoded before color metadata arrives"
    );

    extractor.set_conversion_strategy(ConversionStrategy::passthrough());
    let results = collect_results(&extractor, 1, Duration::from_secs(5));
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
}

#[test]
fn playback_pauses_extraction_without_stopping_threads() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    extractor.start();

    extractor.notify_playback(true);
    assert_eq!(extractor.state(), ExtractorState::PausedPlayback);

    extractor.request_frame(10, 10.0 / FPS, 1);
    std::thread::sleep(Duration::from_millis(100));
    assert!(extractor.drain_results().is_empty());
    // The request accumulated; it was not dropped.
    assert_eq!(extractor.pending_requests(), 1);

    extractor.notify_playback(false);
    assert_eq!(extractor.state(), ExtractorState::Extracting);
    let results = collect_results(&extractor, 1, Duration::from_secs(5));
    assert_eq!(results.len(), 1);
}

#[test]
fn disabling_is_a_flag_not_a_thread_stop() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    extractor.start();

    extractor.set_enabled(false);
    extractor.request_frame(10, 10.0 / FPS, 1);
    std::thread::sleep(Duration::from_millis(100));
    assert!(extractor.drain_results().is_empty());

    // Re-enabling drains the queued request on the same threads.
    extractor.set_enabled(true);
    let results = collect_results(&extractor, 1, Duration::from_secs(5));
    assert_eq!(results.len(), 1);
}

#[test]
fn reposition_clears_stale_requests() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let extractor = BackgroundExtractor::new(factory, empty_sink(), test_config());
    // Stopped: requests accumulate without being served.
    for frame in 0..16 {
        extractor.request_frame(frame, frame as f64 / FPS, 1);
    }
    assert_eq!(extractor.pending_requests(), 16);

    extractor.start();
    extractor.notify_playback(true);
    extractor.begin_reposition();
    assert_eq!(extractor.pending_requests(), 0);
}

#[test]
fn adaptive_window_respects_memory_budget() {
    // 8x8 RGBA8 frames at 24 fps: a tiny budget shrinks the window,
    // a large one is clamped at max_cache_seconds.
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let small = BackgroundExtractor::new(
        Arc::clone(&factory) as Arc<dyn scrubcache::DecoderFactory>,
        empty_sink(),
        test_config().with_memory_budget_bytes(8 * 8 * 4 * 24 * 3),
    );
    assert!((small.window_seconds() - 3.0).abs() < 1e-6);

    let large = BackgroundExtractor::new(
        factory,
        empty_sink(),
        test_config().with_memory_budget_bytes(u64::MAX / 2),
    );
    assert!((large.window_seconds() - 20.0).abs() < 1e-6);
}
