//! Client-acknowledge consumer and non-destructive browser over a queue.

use std::sync::Arc;

use super::{Queue, QueueEntry, ReleaseOutcome};

/// Consumer that holds acquired entries until it acknowledges them.
///
/// `recover` gives every unacknowledged entry back counting a delivery
/// attempt; dropping the consumer gives them back without counting.
pub struct Consumer {
    queue: Arc<Queue>,
    /// Acquired, not yet acknowledged, in receipt order.
    unacked: Vec<u64>,
}

impl Consumer {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self {
            queue,
            unacked: Vec::new(),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Acquire the next entry, or `None` if nothing is available.
    pub fn receive(&mut self) -> Option<QueueEntry> {
        let entry = self.queue.acquire()?;
        self.unacked.push(entry.id);
        Some(entry)
    }

    /// Acknowledge one entry. False if it is not held by this consumer.
    pub fn acknowledge(&mut self, id: u64) -> bool {
        let Some(index) = self.unacked.iter().position(|&held| held == id) else {
            return false;
        };
        self.unacked.remove(index);
        self.queue.acknowledge(id)
    }

    /// Acknowledge everything received so far.
    pub fn acknowledge_all(&mut self) {
        for id in self.unacked.drain(..) {
            self.queue.acknowledge(id);
        }
    }

    /// Give back every unacknowledged entry for redelivery, counting an
    /// attempt on each. Entries return to their original positions.
    pub fn recover(&mut self) -> Vec<ReleaseOutcome> {
        let outcomes = self
            .unacked
            .drain(..)
            .filter_map(|id| self.queue.release(id, true))
            .collect();
        tracing::debug!(queue = %self.queue.name(), "consumer recovered");
        outcomes
    }

    pub fn unacked(&self) -> usize {
        self.unacked.len()
    }

    /// Give back unacknowledged entries without counting an attempt.
    pub fn close(mut self) {
        self.release_uncounted();
    }

    fn release_uncounted(&mut self) {
        for id in self.unacked.drain(..) {
            self.queue.release(id, false);
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.release_uncounted();
    }
}

/// Walks a queue's available entries in order without acquiring them.
#[derive(Debug)]
pub struct Browser {
    queue: Arc<Queue>,
    cursor: Option<u64>,
}

impl Browser {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self {
            queue,
            cursor: None,
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Next entry after the last one returned.
    pub fn next_entry(&mut self) -> Option<QueueEntry> {
        let entry = self.queue.browse_next(self.cursor)?;
        self.cursor = Some(entry.id);
        Some(entry)
    }

    /// True if an entry past the cursor is available.
    pub fn has_next(&self) -> bool {
        self.queue.browse_next(self.cursor).is_some()
    }

    /// Start again from the head of the queue.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }
}
