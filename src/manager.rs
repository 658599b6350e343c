//! Multi-source cache management.
//!
//! [`VideoCache`] owns zero-or-one [`FrameCache`] per active media path.
//! Frame buffers are large relative to available RAM, so the policy is
//! deliberately memory-bound rather than multi-entry LRU: when the active
//! media changes, the previous cache is destroyed immediately — its worker
//! threads stopped and joined as part of teardown — before the new one is
//! created. An access-order list is kept for reporting only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::FrameCache;
use crate::config::CacheConfig;
use crate::source::DecoderFactory;
use crate::stats::CacheStats;
use crate::texture::GpuContext;

/// Codec families where container-level frame-accurate seeking is known to
/// be unreliable (field-coded / B-frame-heavy). A wrong cached frame is
/// worse than no cached frame, so caching is refused for these outright.
const SEEK_UNSAFE_CODECS: &[&str] = &["mpeg1video", "mpeg2video", "vc1", "wmv3"];

/// Whether a codec belongs to a family that blocks caching.
pub fn codec_blocks_caching(codec: &str) -> bool {
    let codec = codec.to_ascii_lowercase();
    SEEK_UNSAFE_CODECS.iter().any(|name| codec == *name)
}

/// Cache manager holding at most one live [`FrameCache`].
pub struct VideoCache {
    active: Option<(PathBuf, FrameCache)>,
    access_order: Vec<PathBuf>,
}

impl Default for VideoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoCache {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            active: None,
            access_order: Vec::new(),
        }
    }

    /// Make `path` the active media, creating its cache.
    ///
    /// The previously active cache (if any, and if for a different path) is
    /// torn down first: its textures destroyed and its worker threads
    /// joined. Returns `false` when the media's codec blocks caching — in
    /// that case all resident caches are cleared and no new cache is
    /// created.
    pub fn set_current_video(
        &mut self,
        path: impl AsRef<Path>,
        factory: Arc<dyn DecoderFactory>,
        config: CacheConfig,
        gpu: &mut GpuContext,
    ) -> bool {
        let path = path.as_ref().to_path_buf();

        if self
            .active
            .as_ref()
            .is_some_and(|(active_path, _)| *active_path == path)
        {
            return true;
        }

        // One media's frames at a time: the old cache goes before the new
        // one exists.
        if let Some((old_path, mut old_cache)) = self.active.take() {
            log::debug!("Destroying cache for {}", old_path.display());
            old_cache.teardown(gpu);
        }

        let info = factory.stream_info();
        if codec_blocks_caching(&info.codec) {
            log::warn!(
                "Codec {} is unsafe for frame-accurate seeking; caching disabled for {}",
                info.codec,
                path.display()
            );
            self.clear_all_caches(gpu);
            return false;
        }

        self.touch_access_order(&path);
        self.active = Some((path, FrameCache::new(factory, config, gpu)));
        true
    }

    fn touch_access_order(&mut self, path: &Path) {
        self.access_order.retain(|entry| entry != path);
        self.access_order.push(path.to_path_buf());
    }

    /// The path of the active media, if a cache exists.
    pub fn current_video(&self) -> Option<&Path> {
        self.active.as_ref().map(|(path, _)| path.as_path())
    }

    /// The active cache.
    pub fn cache(&self) -> Option<&FrameCache> {
        self.active.as_ref().map(|(_, cache)| cache)
    }

    /// The active cache, mutably (needed for the main-thread upload path).
    pub fn cache_mut(&mut self) -> Option<&mut FrameCache> {
        self.active.as_mut().map(|(_, cache)| cache)
    }

    /// The cache for a specific path, when it is the active one.
    pub fn cache_for_video(&self, path: impl AsRef<Path>) -> Option<&FrameCache> {
        self.active
            .as_ref()
            .filter(|(active_path, _)| *active_path == path.as_ref())
            .map(|(_, cache)| cache)
    }

    /// Explicitly destroy the cache for `path`. Returns whether one existed.
    pub fn remove_cache_for_video(&mut self, path: impl AsRef<Path>, gpu: &mut GpuContext) -> bool {
        if self
            .active
            .as_ref()
            .is_some_and(|(active_path, _)| *active_path == path.as_ref())
        {
            if let Some((_, mut cache)) = self.active.take() {
                cache.teardown(gpu);
            }
            true
        } else {
            false
        }
    }

    /// Destroy every resident cache.
    ///
    /// Used by the codec-safety override and by shutdown paths.
    pub fn clear_all_caches(&mut self, gpu: &mut GpuContext) {
        if let Some((path, mut cache)) = self.active.take() {
            log::debug!("Clearing cache for {}", path.display());
            cache.teardown(gpu);
        }
    }

    /// Paths in access order (oldest first). Reporting only.
    pub fn access_order(&self) -> &[PathBuf] {
        &self.access_order
    }

    /// Counters aggregated across live caches.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        if let Some((_, cache)) = &self.active {
            stats.merge(&cache.stats());
        }
        stats
    }
}
