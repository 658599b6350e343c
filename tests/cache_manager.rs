//! Multi-source cache manager tests: the single-live-cache policy, explicit
//! eviction, and the codec-safety override.

mod common;

use std::sync::Arc;

use common::{SyntheticFactory, recording_gpu};
use scrubcache::{CacheConfig, PixelData, VideoCache, codec_blocks_caching};

const FPS: f64 = 24.0;

fn config() -> CacheConfig {
    CacheConfig::new()
        .with_worker_threads(1)
        .with_texture_pool_size(4)
}

fn insert_frame(manager: &mut VideoCache, gpu: &mut scrubcache::GpuContext, timestamp: f64) {
    let cache = manager.cache_mut().expect("active cache");
    cache.set_caching_enabled(false);
    cache.update_scrub_position(timestamp);
    let frame_number = scrubcache::timestamp_to_frame_number(timestamp, FPS);
    let pixels = PixelData::Bytes(vec![0u8; 8 * 8 * 4]);
    cache.add_extracted_frame(gpu, frame_number, timestamp, &pixels, 8, 8);
}

#[test]
fn at_most_one_cache_is_live() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    assert!(manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    ));
    assert_eq!(manager.current_video().unwrap().to_str(), Some("a.mp4"));

    assert!(manager.set_current_video(
        "b.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    ));
    assert_eq!(manager.current_video().unwrap().to_str(), Some("b.mp4"));
    assert!(manager.cache_for_video("a.mp4").is_none());
}

#[test]
fn switching_back_yields_a_fresh_empty_cache() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    insert_frame(&mut manager, &mut gpu, 10.0);
    assert_eq!(manager.stats().resident_frames, 1);

    // A → B → A: no stale frames survive the intermediate switch.
    manager.set_current_video(
        "b.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );

    let cache = manager.cache().expect("active cache");
    assert_eq!(cache.resident_frames(), 0);
    assert!(cache.get_cached_frame(10.0).is_none());
}

#[test]
fn setting_the_same_video_twice_keeps_the_cache() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    insert_frame(&mut manager, &mut gpu, 10.0);

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    assert_eq!(manager.stats().resident_frames, 1);
}

#[test]
fn remove_cache_for_video_destroys_it() {
    let (mut gpu, counters) = recording_gpu();
    let mut manager = VideoCache::new();

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    assert!(manager.remove_cache_for_video("a.mp4", &mut gpu));
    assert!(manager.cache().is_none());
    // All four arena textures were destroyed on teardown.
    assert_eq!(counters.deleted(), 4);

    assert!(!manager.remove_cache_for_video("a.mp4", &mut gpu));
}

#[test]
fn clear_all_caches_leaves_nothing_resident() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    insert_frame(&mut manager, &mut gpu, 10.0);

    manager.clear_all_caches(&mut gpu);
    assert!(manager.cache().is_none());
    assert_eq!(manager.stats().resident_frames, 0);
}

#[test]
fn seek_unsafe_codecs_block_caching_entirely() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    manager.set_current_video(
        "a.mp4",
        Arc::new(SyntheticFactory::new(FPS, 120.0)),
        config(),
        &mut gpu,
    );
    insert_frame(&mut manager, &mut gpu, 10.0);

    // A wrong cached frame is worse than no cached frame: the unsafe media
    // gets no cache, and resident caches are cleared.
    let created = manager.set_current_video(
        "old.mpg",
        Arc::new(SyntheticFactory::new(FPS, 120.0).with_codec("mpeg2video")),
        config(),
        &mut gpu,
    );
    assert!(!created);
    assert!(manager.cache().is_none());
    assert_eq!(manager.stats().resident_frames, 0);
}

#[test]
fn codec_blocklist_matches_known_families() {
    assert!(codec_blocks_caching("mpeg2video"));
    assert!(codec_blocks_caching("MPEG1VIDEO"));
    assert!(codec_blocks_caching("vc1"));
    assert!(!codec_blocks_caching("h264"));
    assert!(!codec_blocks_caching("prores"));
}

#[test]
fn access_order_tracks_switches() {
    let (mut gpu, _) = recording_gpu();
    let mut manager = VideoCache::new();

    for path in ["a.mp4", "b.mp4", "a.mp4"] {
        manager.set_current_video(
            path,
            Arc::new(SyntheticFactory::new(FPS, 120.0)),
            config(),
            &mut gpu,
        );
    }

    let order: Vec<&str> = manager
        .access_order()
        .iter()
        .filter_map(|path| path.to_str())
        .collect();
    assert_eq!(order, vec!["b.mp4", "a.mp4"]);
}
