//! Request queue benchmarks.
//!
//! The queue sits on the `update_scrub_position` hot path (one push per
//! window frame, every UI frame), so admission and batch-taking need to stay
//! cheap.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use scrubcache::{FrameRequest, RequestQueue};

fn bench_window_admission(c: &mut Criterion) {
    c.bench_function("push_480_frame_window", |b| {
        b.iter(|| {
            let mut queue = RequestQueue::new(512);
            for frame in 0..480i64 {
                let priority = 480 - (frame - 240).abs() as i32;
                queue.push(black_box(FrameRequest::new(
                    frame,
                    frame as f64 / 24.0,
                    priority,
                )));
            }
            queue
        })
    });
}

fn bench_take_batches(c: &mut Criterion) {
    c.bench_function("drain_480_frames_in_batches_of_8", |b| {
        b.iter_with_setup(
            || {
                let mut queue = RequestQueue::new(512);
                for frame in 0..480i64 {
                    let priority = 480 - (frame - 240).abs() as i32;
                    queue.push(FrameRequest::new(frame, frame as f64 / 24.0, priority));
                }
                queue
            },
            |mut queue| {
                while !queue.is_empty() {
                    black_box(queue.take_batch(8, |_| false));
                }
            },
        )
    });
}

criterion_group!(benches, bench_window_admission, bench_take_batches);
criterion_main!(benches);
