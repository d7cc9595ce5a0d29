//! Priority batching for background, best-effort work
//!
//! Lower priority numbers release first; equal priorities release in
//! insertion order. `drain_rounds` is the only timed code path in the
//! crate, and it only sleeps — no I/O.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

struct Slot<T> {
    priority: u32,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority min-queue of deferred jobs
pub struct BatchQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    seq: u64,
}

impl<T> Default for BatchQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }
}

impl<T> BatchQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job; lower priority numbers release first
    pub fn push(&mut self, priority: u32, payload: T) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Slot {
            priority,
            seq,
            payload,
        });
    }

    /// Release up to `max` jobs in priority order
    pub fn pop_batch(&mut self, max: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max.min(self.heap.len()));
        while batch.len() < max {
            let Some(slot) = self.heap.pop() else { break };
            batch.push(slot.payload);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Drain a queue in rounds of `batch_size`, pausing `delay` between rounds
///
/// Each round's jobs are handed to `handle` together so the caller can run
/// them in parallel. Returns once the queue is empty.
pub async fn drain_rounds<T, F>(
    queue: &Mutex<BatchQueue<T>>,
    batch_size: usize,
    delay: Duration,
    mut handle: F,
) where
    F: FnMut(Vec<T>),
{
    loop {
        let batch = {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.pop_batch(batch_size)
        };
        if batch.is_empty() {
            return;
        }
        handle(batch);
        tokio::time::sleep(delay).await;
    }
}
