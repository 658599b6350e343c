//! Frame extraction requests, the prioritized request queue, batches, and
//! results.
//!
//! Requests are ordered by priority (higher first — priority derives from
//! proximity to the playhead) and deduplicated by frame number while
//! pending. The queue is bounded: pushes beyond the safety capacity are
//! dropped silently, which is deliberate backpressure rather than an error.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use crate::source::PixelData;

/// A single frame extraction request.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    /// Frame number to extract.
    pub frame_number: i64,
    /// Timestamp of the frame, in seconds.
    pub timestamp: f64,
    /// Priority; higher values are served first.
    pub priority: i32,
    /// When the request was enqueued.
    pub requested_at: Instant,
}

impl FrameRequest {
    /// Create a request stamped with the current time.
    pub fn new(frame_number: i64, timestamp: f64, priority: i32) -> Self {
        Self {
            frame_number,
            timestamp,
            priority,
            requested_at: Instant::now(),
        }
    }
}

impl PartialEq for FrameRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.requested_at == other.requested_at
    }
}

impl Eq for FrameRequest {}

impl PartialOrd for FrameRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first; ties go to the older request.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.requested_at.cmp(&self.requested_at))
    }
}

/// Outcome of a request submission.
///
/// Everything except `Queued` is a silent rejection: callers may inspect the
/// outcome for observability, but none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The request was queued.
    Queued,
    /// A request for the same frame number is already pending.
    Duplicate,
    /// The queue is at its safety capacity; the request was dropped.
    QueueFull,
    /// The frame number lies outside the stream.
    OutOfBounds,
    /// The frame is already resident in the cache.
    AlreadyCached,
}

/// Bounded priority queue of pending extraction requests.
///
/// Deduplicates by frame number while a request is pending. Not
/// thread-safe by itself — the extractor guards it with its queue mutex.
pub struct RequestQueue {
    heap: BinaryHeap<FrameRequest>,
    pending: HashSet<i64>,
    capacity: usize,
}

impl RequestQueue {
    /// Create a queue with the given safety capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a request, deduplicating by frame number and enforcing the
    /// capacity bound.
    pub fn push(&mut self, request: FrameRequest) -> Enqueue {
        if self.pending.contains(&request.frame_number) {
            return Enqueue::Duplicate;
        }
        if self.heap.len() >= self.capacity {
            return Enqueue::QueueFull;
        }
        self.pending.insert(request.frame_number);
        self.heap.push(request);
        Enqueue::Queued
    }

    /// Pull up to `max` requests in priority order, dropping any for which
    /// `already_satisfied` returns `true` (they were cached by another path
    /// while queued).
    pub fn take_batch(
        &mut self,
        max: usize,
        already_satisfied: impl Fn(i64) -> bool,
    ) -> Vec<FrameRequest> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            let Some(request) = self.heap.pop() else {
                break;
            };
            self.pending.remove(&request.frame_number);
            if already_satisfied(request.frame_number) {
                continue;
            }
            batch.push(request);
        }
        batch
    }

    /// Whether a request for this frame number is pending.
    pub fn contains(&self, frame_number: i64) -> bool {
        self.pending.contains(&frame_number)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` when no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop all pending requests.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }
}

/// An ordered group of requests pulled from the queue in one pass.
///
/// Requests are sorted ascending by timestamp. `is_sequential` marks
/// batches whose consecutive timestamps are within twice the nominal frame
/// stride, enabling decode-path optimizations (workers skip redundant
/// seeks).
#[derive(Debug)]
pub struct ExtractionBatch {
    /// The requests, in ascending timestamp order.
    pub requests: Vec<FrameRequest>,
    /// Whether the batch advances at roughly frame stride.
    pub is_sequential: bool,
}

impl ExtractionBatch {
    /// Build a batch from raw requests, sorting and classifying it.
    pub fn from_requests(mut requests: Vec<FrameRequest>, frames_per_second: f64) -> Self {
        requests.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(Ordering::Equal)
        });

        let is_sequential = frames_per_second > 0.0
            && requests.len() > 1
            && requests.windows(2).all(|pair| {
                (pair[1].timestamp - pair[0].timestamp).abs() <= 2.0 / frames_per_second
            });

        Self {
            requests,
            is_sequential,
        }
    }

    /// Number of requests in the batch.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` when the batch has no requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// The outcome of one extraction request, produced by a worker.
///
/// Pixel data is raw, already format-converted bytes — GPU upload is
/// deferred to the main thread.
#[derive(Debug)]
pub struct ExtractionResult {
    /// Whether decoding succeeded.
    pub success: bool,
    /// The requested frame number.
    pub frame_number: i64,
    /// The requested timestamp, in seconds.
    pub timestamp: f64,
    /// Output width in pixels (0 on failure).
    pub width: u32,
    /// Output height in pixels (0 on failure).
    pub height: u32,
    /// Converted pixel buffer (empty on failure).
    pub pixel_data: PixelData,
    /// Size of the pixel buffer in bytes.
    pub memory_bytes: usize,
    /// Description of the failure, when `success` is `false`.
    pub error_message: Option<String>,
}

impl ExtractionResult {
    /// Build a failure result for a request.
    pub(crate) fn failure(frame_number: i64, timestamp: f64, message: String) -> Self {
        Self {
            success: false,
            frame_number,
            timestamp,
            width: 0,
            height: 0,
            pixel_data: PixelData::Bytes(Vec::new()),
            memory_bytes: 0,
            error_message: Some(message),
        }
    }
}
