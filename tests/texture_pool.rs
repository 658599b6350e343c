//! Texture pool tests: arena reuse, on-demand overflow, and release
//! semantics.

mod common;

use common::recording_gpu;
use scrubcache::{TextureDescriptor, TextureFormat, TexturePool};

fn descriptor() -> TextureDescriptor {
    TextureDescriptor {
        width: 8,
        height: 8,
        format: TextureFormat::Rgba8,
    }
}

fn pixels() -> Vec<u8> {
    vec![0u8; descriptor().byte_len()]
}

#[test]
fn preallocation_creates_the_arena_once() {
    let (mut gpu, counters) = recording_gpu();
    let mut pool = TexturePool::new(descriptor(), 4);

    pool.preallocate(&mut gpu);
    assert_eq!(counters.created(), 4);
    assert_eq!(pool.available(), 4);

    pool.preallocate(&mut gpu);
    assert_eq!(counters.created(), 4, "preallocation is idempotent");
}

#[test]
fn acquire_reuses_arena_slots() {
    let (mut gpu, counters) = recording_gpu();
    let mut pool = TexturePool::new(descriptor(), 4);
    pool.preallocate(&mut gpu);

    let texture = pool.acquire(&mut gpu, &descriptor(), &pixels());
    assert_eq!(counters.created(), 4, "no new texture was created");
    assert_eq!(counters.updated(), 1, "the slot was updated in place");
    assert_eq!(pool.available(), 3);

    pool.release(&mut gpu, texture);
    assert_eq!(pool.available(), 4);
    assert_eq!(counters.deleted(), 0);
}

#[test]
fn exhaustion_falls_back_to_on_demand_creation() {
    let (mut gpu, counters) = recording_gpu();
    let mut pool = TexturePool::new(descriptor(), 2);
    pool.preallocate(&mut gpu);

    let first = pool.acquire(&mut gpu, &descriptor(), &pixels());
    let second = pool.acquire(&mut gpu, &descriptor(), &pixels());
    assert_eq!(pool.available(), 0);

    // Third acquire exceeds the arena: created on demand, not an error.
    let third = pool.acquire(&mut gpu, &descriptor(), &pixels());
    assert_eq!(counters.created(), 3);

    // On-demand textures are destroyed on release; arena ones are not.
    pool.release(&mut gpu, third);
    assert_eq!(counters.deleted(), 1);
    pool.release(&mut gpu, first);
    pool.release(&mut gpu, second);
    assert_eq!(counters.deleted(), 1);
    assert_eq!(pool.available(), 2);
}

#[test]
fn mismatched_descriptor_bypasses_the_arena() {
    let (mut gpu, counters) = recording_gpu();
    let mut pool = TexturePool::new(descriptor(), 2);
    pool.preallocate(&mut gpu);

    let other = TextureDescriptor {
        width: 16,
        height: 16,
        format: TextureFormat::Rgba8,
    };
    let texture = pool.acquire(&mut gpu, &other, &vec![0u8; other.byte_len()]);
    assert_eq!(counters.created(), 3);
    assert_eq!(pool.available(), 2, "arena slots untouched");

    pool.release(&mut gpu, texture);
    assert_eq!(counters.deleted(), 1);
}

#[test]
fn destroy_deletes_every_arena_texture() {
    let (mut gpu, counters) = recording_gpu();
    let mut pool = TexturePool::new(descriptor(), 4);
    pool.preallocate(&mut gpu);

    pool.destroy(&mut gpu);
    assert_eq!(counters.deleted(), 4);
    assert_eq!(pool.available(), 0);
}
