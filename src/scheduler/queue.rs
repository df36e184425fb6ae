//! Priority queue of pending analysis requests.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::intake::AnalysisRequest;

/// Heap entry ordered by priority (higher first), then sequence (lower
/// first).
#[derive(Debug)]
struct QueuedRequest(Arc<AnalysisRequest>);

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}

impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded, thread-safe priority queue.
#[derive(Debug)]
pub struct AnalysisQueue {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    capacity: usize,
    next_sequence: AtomicU64,
}

impl AnalysisQueue {
    /// Create a queue holding at most `capacity` requests.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity: capacity.max(1),
            next_sequence: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueuedRequest>> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next sequence number. Strictly increasing for the queue's lifetime.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Maximum number of queued requests.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when another push would be rejected.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Add a request. Returns the queue depth after the push, or the
    /// request back if the queue is full.
    pub fn push(&self, request: AnalysisRequest) -> Result<usize, AnalysisRequest> {
        let mut heap = self.lock();
        if heap.len() >= self.capacity {
            return Err(request);
        }
        heap.push(QueuedRequest(Arc::new(request)));
        Ok(heap.len())
    }

    /// Remove the highest-priority request.
    pub fn pop(&self) -> Option<Arc<AnalysisRequest>> {
        self.lock().pop().map(|q| q.0)
    }

    /// Remove up to `max` requests in dispatch order.
    pub fn pop_batch(&self, max: usize) -> Vec<Arc<AnalysisRequest>> {
        let mut heap = self.lock();
        let mut batch = Vec::with_capacity(max.min(heap.len()));
        while batch.len() < max {
            match heap.pop() {
                Some(q) => batch.push(q.0),
                None => break,
            }
        }
        batch
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
