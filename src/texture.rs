//! GPU texture handles, the uploader boundary, and the texture pool.
//!
//! The cache never talks to a graphics API directly. Callers implement
//! [`TextureUploader`] over their GPU context and wrap it in a
//! [`GpuContext`], which is deliberately `!Send`: every API that creates or
//! destroys textures takes `&mut GpuContext`, so GPU calls can only happen
//! on the thread that constructed it — the main/render thread. Worker
//! threads only ever produce raw bytes.
//!
//! [`TexturePool`] is an arena of pre-allocated texture slots with a
//! free-list of available indices, reused frame-to-frame to avoid per-frame
//! allocation churn. When the arena is exhausted it falls back to on-demand
//! creation; such textures are destroyed on release instead of returned.

use std::collections::VecDeque;
use std::marker::PhantomData;

/// Opaque GPU texture handle, issued by the caller's [`TextureUploader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Texture format class — the `(internal_format, format, type)` tuple the
/// uploader should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8 bits per channel RGBA.
    Rgba8,
    /// 16 bits per channel RGBA (integer).
    Rgba16,
    /// Half-float RGBA internal format; source buffer is `f32`.
    Rgba16Float,
    /// Full-float RGBA.
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per pixel of the source buffer for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16 => 8,
            TextureFormat::Rgba16Float | TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Dimensions and format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Format class.
    pub format: TextureFormat,
}

impl TextureDescriptor {
    /// Expected source buffer size in bytes.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// The GPU texture collaborator.
///
/// Implementations create, update, and destroy 2D textures from byte
/// buffers. `pixels` may be empty in `create_texture`, which allocates the
/// texture without uploading initial data (used for pool pre-allocation).
///
/// Implementations are only ever invoked through a [`GpuContext`], which
/// pins all calls to the thread that constructed it.
pub trait TextureUploader {
    /// Create a texture, optionally uploading initial pixel data.
    fn create_texture(&mut self, descriptor: &TextureDescriptor, pixels: &[u8]) -> TextureId;

    /// Replace the contents of an existing texture.
    fn update_texture(&mut self, id: TextureId, descriptor: &TextureDescriptor, pixels: &[u8]);

    /// Destroy a texture.
    fn delete_texture(&mut self, id: TextureId);
}

/// Main-thread-tagged GPU access.
///
/// `GpuContext` is `!Send`; constructing it on the render thread and passing
/// `&mut GpuContext` into upload paths makes "GPU calls only from the main
/// thread" a compile-visible invariant rather than a convention.
pub struct GpuContext {
    uploader: Box<dyn TextureUploader>,
    _not_send: PhantomData<*const ()>,
}

impl GpuContext {
    /// Wrap an uploader. Call this once, on the render thread.
    pub fn new(uploader: Box<dyn TextureUploader>) -> Self {
        Self {
            uploader,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        pixels: &[u8],
    ) -> TextureId {
        self.uploader.create_texture(descriptor, pixels)
    }

    pub(crate) fn update_texture(
        &mut self,
        id: TextureId,
        descriptor: &TextureDescriptor,
        pixels: &[u8],
    ) {
        self.uploader.update_texture(id, descriptor, pixels);
    }

    pub(crate) fn delete_texture(&mut self, id: TextureId) {
        self.uploader.delete_texture(id);
    }
}

/// A texture checked out of the pool.
///
/// Holds the handle plus its arena slot, if it came from the arena.
/// Move-only: the holder has exclusive ownership of the handle until it is
/// released back to the pool.
#[derive(Debug)]
pub struct PoolTexture {
    /// The GPU handle.
    pub id: TextureId,
    slot: Option<usize>,
}

/// Fixed-size arena of reusable GPU textures.
pub struct TexturePool {
    slots: Vec<TextureId>,
    free: VecDeque<usize>,
    descriptor: TextureDescriptor,
    capacity: usize,
    preallocated: bool,
}

impl TexturePool {
    /// Create an empty pool; textures are allocated on the first
    /// [`preallocate`](TexturePool::preallocate) (or lazily by the first
    /// [`acquire`](TexturePool::acquire)).
    pub fn new(descriptor: TextureDescriptor, capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            descriptor,
            capacity,
            preallocated: false,
        }
    }

    /// Allocate the arena textures. Idempotent.
    pub fn preallocate(&mut self, gpu: &mut GpuContext) {
        if self.preallocated {
            return;
        }
        self.preallocated = true;
        self.slots.reserve(self.capacity);
        for index in 0..self.capacity {
            let id = gpu.create_texture(&self.descriptor, &[]);
            self.slots.push(id);
            self.free.push_back(index);
        }
        log::debug!(
            "Texture pool allocated {} slots ({}x{})",
            self.capacity,
            self.descriptor.width,
            self.descriptor.height
        );
    }

    /// Check a texture out of the pool and fill it with `pixels`.
    ///
    /// Falls back to on-demand creation when the arena is exhausted or the
    /// descriptor doesn't match the arena's — that is backpressure handling,
    /// not an error.
    pub fn acquire(
        &mut self,
        gpu: &mut GpuContext,
        descriptor: &TextureDescriptor,
        pixels: &[u8],
    ) -> PoolTexture {
        self.preallocate(gpu);

        if *descriptor == self.descriptor {
            if let Some(slot) = self.free.pop_front() {
                let id = self.slots[slot];
                gpu.update_texture(id, descriptor, pixels);
                return PoolTexture {
                    id,
                    slot: Some(slot),
                };
            }
            log::trace!("Texture pool exhausted; creating on-demand texture");
        }

        PoolTexture {
            id: gpu.create_texture(descriptor, pixels),
            slot: None,
        }
    }

    /// Return a texture to the pool.
    ///
    /// Arena textures go back on the free-list; on-demand textures are
    /// destroyed.
    pub fn release(&mut self, gpu: &mut GpuContext, texture: PoolTexture) {
        match texture.slot {
            Some(slot) => self.free.push_back(slot),
            None => gpu.delete_texture(texture.id),
        }
    }

    /// Destroy every arena texture. The pool is unusable afterwards unless
    /// re-preallocated.
    pub fn destroy(&mut self, gpu: &mut GpuContext) {
        for id in self.slots.drain(..) {
            gpu.delete_texture(id);
        }
        self.free.clear();
        self.preallocated = false;
    }

    /// Number of free arena slots.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}
