//! FFmpeg-backed media source integration tests.
//!
//! These need a real media file; generate one with
//! `ffmpeg -f lavfi -i testsrc=duration=4:rate=24 tests/fixtures/sample_video.mp4`.
//! Tests skip silently when the fixture is absent (CI images do not all
//! carry media fixtures).

mod common;

use std::path::Path;
use std::sync::Arc;

use common::recording_gpu;
use scrubcache::{
    CacheConfig, DecoderFactory, FrameCache, FrameDecoder, HardwarePreference, MediaSource,
    MediaSourceFactory,
};

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

fn skip_unless(path: &str) -> bool {
    if !Path::new(path).exists() {
        eprintln!("Skipping: fixture {path} not found");
        return true;
    }
    false
}

#[test]
fn open_probes_stream_metadata() {
    if skip_unless(SAMPLE_VIDEO) {
        return;
    }

    let source = MediaSource::open(SAMPLE_VIDEO, &CacheConfig::new()).expect("open fixture");
    let info = source.stream_info();
    assert!(info.width > 0);
    assert!(info.height > 0);
    assert!(info.frames_per_second > 0.0);
    assert!(info.frame_count > 0);
    assert!(!info.codec.is_empty());
}

#[test]
fn decode_at_returns_converted_pixels() {
    if skip_unless(SAMPLE_VIDEO) {
        return;
    }

    let config = CacheConfig::new().with_hardware_preference(HardwarePreference::Software);
    let mut source = MediaSource::open(SAMPLE_VIDEO, &config).expect("open fixture");
    let info = source.stream_info().clone();

    let decoded = source.decode_at(0.5, false).expect("decode near 0.5s");
    assert_eq!(decoded.width, info.width);
    assert_eq!(decoded.height, info.height);
    assert_eq!(
        decoded.data.byte_len(),
        info.width as usize * info.height as usize * 4
    );
    // Nearest at-or-after match within one frame duration.
    assert!(decoded.timestamp >= 0.5 - 1.0 / info.frames_per_second);
}

#[test]
fn sequential_decodes_walk_forward() {
    if skip_unless(SAMPLE_VIDEO) {
        return;
    }

    let config = CacheConfig::new().with_hardware_preference(HardwarePreference::Software);
    let mut source = MediaSource::open(SAMPLE_VIDEO, &config).expect("open fixture");
    let fps = source.stream_info().frames_per_second;

    let first = source.decode_at(1.0, false).expect("first frame");
    let second = source
        .decode_at(1.0 + 1.0 / fps, true)
        .expect("next frame without a seek");
    assert!(second.timestamp >= first.timestamp);
}

#[test]
fn software_preference_reports_software_path() {
    if skip_unless(SAMPLE_VIDEO) {
        return;
    }

    let config = CacheConfig::new().with_hardware_preference(HardwarePreference::Software);
    let factory = MediaSourceFactory::new(SAMPLE_VIDEO, config).expect("factory");
    assert_eq!(factory.decode_path(), scrubcache::DecodePath::Software);
}

#[test]
fn end_to_end_scrub_fills_the_window() {
    if skip_unless(SAMPLE_VIDEO) {
        return;
    }

    let config = CacheConfig::new()
        .with_hardware_preference(HardwarePreference::Software)
        .with_max_cache_seconds(2.0)
        .with_worker_threads(2)
        .with_texture_pool_size(16)
        .with_cache_resolution(64, 36);
    let factory = Arc::new(MediaSourceFactory::new(SAMPLE_VIDEO, config.clone()).expect("factory"));

    let (mut gpu, _) = recording_gpu();
    let mut cache = FrameCache::new(factory, config, &mut gpu);
    cache.update_scrub_position(1.0);

    let mut added = 0;
    for _ in 0..400 {
        added += cache.process_extraction_results(&mut gpu);
        if cache.get_cached_frame(1.0).is_some() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    assert!(added > 0, "background extraction produced frames");
    assert!(cache.get_cached_frame(1.0).is_some());
}
