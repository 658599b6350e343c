//! Thumbnail cache tests: non-blocking lookups, single-flight generation,
//! the nearest-neighbour fallback, and access-count eviction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SyntheticFactory, recording_gpu, wait_until};
use scrubcache::{GpuContext, ThumbnailCache, ThumbnailConfig};

const FPS: f64 = 24.0;

fn upload_until_resident(
    cache: &mut ThumbnailCache,
    gpu: &mut GpuContext,
    minimum: usize,
) -> bool {
    let mut done = false;
    // Polling stands in for the per-frame upload tick of a real UI loop.
    for _ in 0..200 {
        cache.process_pending_uploads(gpu);
        if cache.resident_thumbnails() >= minimum {
            done = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done
}

#[test]
fn miss_is_non_blocking_and_enqueues_once() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new().with_nearest_fallback(false),
    );

    assert!(cache.get_thumbnail(10).is_none());
    assert!(cache.get_thumbnail(10).is_none());

    // The pending set deduplicates: at most one generation request exists,
    // and it may already have been picked up by the worker.
    assert!(cache.pending_requests() <= 1);
}

#[test]
fn generated_thumbnails_become_hits_after_upload() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let (mut gpu, _) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new()
            .with_nearest_fallback(false)
            .with_max_dimension(4),
    );

    assert!(cache.get_thumbnail(10).is_none());
    assert!(upload_until_resident(&mut cache, &mut gpu, 1));

    let view = cache.get_thumbnail(10).expect("thumbnail resident");
    assert_eq!(view.frame_index, 10);
    assert!(view.width > 0 && view.height > 0);
}

#[test]
fn nearest_fallback_serves_a_neighbour_while_generating() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let (mut gpu, _) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new().with_max_dimension(4),
    );

    cache.get_thumbnail(10);
    assert!(upload_until_resident(&mut cache, &mut gpu, 1));

    // Frame 12 is not resident yet; the neighbour at 10 stands in.
    let view = cache.get_thumbnail(12).expect("fallback view");
    assert_eq!(view.frame_index, 10);

    // The real frame still gets generated.
    assert!(upload_until_resident(&mut cache, &mut gpu, 2));
    let view = cache.get_thumbnail(12).expect("exact view");
    assert_eq!(view.frame_index, 12);
}

#[test]
fn prefetch_fills_the_cache_in_the_background() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let (mut gpu, _) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new()
            .with_nearest_fallback(false)
            .with_max_dimension(4),
    );

    cache.request_prefetch(&[0, 24, 48, 72]);
    assert!(upload_until_resident(&mut cache, &mut gpu, 4));
    for frame in [0, 24, 48, 72] {
        assert!(cache.get_thumbnail(frame).is_some());
    }
}

#[test]
fn eviction_removes_the_least_accessed_thumbnail() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let (mut gpu, counters) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new()
            .with_nearest_fallback(false)
            .with_max_dimension(4)
            .with_capacity(2),
    );

    cache.get_thumbnail(0);
    cache.get_thumbnail(24);
    assert!(upload_until_resident(&mut cache, &mut gpu, 2));

    // Make frame 0 hot; the eviction victim is then one of the two
    // cold entries (frame 24 or the incoming 48), never the hot one.
    cache.get_thumbnail(0);
    cache.get_thumbnail(0);

    cache.get_thumbnail(48);
    assert!(wait_until(Duration::from_secs(5), || {
        cache.process_pending_uploads(&mut gpu);
        cache.resident_thumbnails() == 2
    }));
    assert!(counters.deleted() >= 1, "a cold thumbnail was destroyed");
    assert!(cache.get_thumbnail(0).is_some(), "the hot entry survived");
}

#[test]
fn decode_failures_do_not_kill_the_worker() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    factory.fail_frame(10);
    let (mut gpu, _) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        Arc::clone(&factory) as Arc<dyn scrubcache::DecoderFactory>,
        ThumbnailConfig::new()
            .with_nearest_fallback(false)
            .with_max_dimension(4),
    );

    cache.get_thumbnail(10);
    cache.get_thumbnail(20);
    assert!(upload_until_resident(&mut cache, &mut gpu, 1));
    assert!(cache.get_thumbnail(20).is_some());
    assert!(cache.get_thumbnail(10).is_none());
}

#[test]
fn clear_destroys_resident_textures() {
    let factory = Arc::new(SyntheticFactory::new(FPS, 120.0));
    let (mut gpu, counters) = recording_gpu();
    let mut cache = ThumbnailCache::new(
        factory,
        ThumbnailConfig::new()
            .with_nearest_fallback(false)
            .with_max_dimension(4),
    );

    cache.get_thumbnail(0);
    assert!(upload_until_resident(&mut cache, &mut gpu, 1));

    cache.clear(&mut gpu);
    assert_eq!(cache.resident_thumbnails(), 0);
    assert_eq!(counters.deleted(), 1);
}
