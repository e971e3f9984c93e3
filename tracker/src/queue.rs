//! Heartbeat queue shared between producers and the flusher.
//!
//! Any number of producer threads enqueue heartbeats; a single consumer
//! drains everything pending as one batch. The queue is unbounded by
//! default. With a capacity configured, the oldest heartbeats are evicted to
//! make room (FIFO eviction), trading completeness for bounded memory under
//! pathological load.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::types::Heartbeat;

/// Multi-producer, single-consumer buffer of pending heartbeats.
///
/// A single lock guards the buffer, so heartbeats from one producer keep
/// their relative order and a drain never loses or duplicates an entry
/// enqueued concurrently: it lands either in this drain or the next.
#[derive(Debug, Default)]
pub struct HeartbeatQueue {
    buffer: Mutex<VecDeque<Heartbeat>>,
    capacity: Option<usize>,
}

impl HeartbeatQueue {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Creates a queue holding at most `capacity` heartbeats (minimum 1).
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Creates a bounded queue when `capacity` is set, unbounded otherwise.
    #[must_use]
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Returns the configured capacity, `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Adds a heartbeat to the back of the queue.
    ///
    /// # Returns
    ///
    /// The number of heartbeats evicted to make room (0 if there was space).
    pub fn enqueue(&self, heartbeat: Heartbeat) -> usize {
        let mut evicted = 0;
        {
            let mut buffer = self.lock();

            if let Some(capacity) = self.capacity {
                while buffer.len() >= capacity {
                    buffer.pop_front();
                    evicted += 1;
                }
            }

            buffer.push_back(heartbeat);
        }

        if evicted > 0 {
            warn!(evicted_count = evicted, "Heartbeat queue full, oldest heartbeats evicted");
        }

        evicted
    }

    /// Removes and returns every pending heartbeat in queue order.
    ///
    /// Returns an empty vector when nothing is pending.
    pub fn drain_all(&self) -> Vec<Heartbeat> {
        let drained = std::mem::take(&mut *self.lock());
        Vec::from(drained)
    }

    /// Returns the number of pending heartbeats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no heartbeats are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Heartbeat>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn heartbeat(entity: &str, secs: u64) -> Heartbeat {
        Heartbeat {
            entity: entity.to_string(),
            timestamp: Timestamp::from_secs(secs),
            is_write: false,
            project: None,
            language: None,
        }
    }

    #[test]
    fn drain_twice_returns_events_then_nothing() {
        let queue = HeartbeatQueue::unbounded();
        queue.enqueue(heartbeat("/a.py", 0));
        queue.enqueue(heartbeat("/b.py", 1));

        let first = queue.drain_all();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].entity, "/a.py");
        assert_eq!(first[1].entity, "/b.py");

        assert!(queue.drain_all().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_on_new_queue_is_empty() {
        let queue = HeartbeatQueue::unbounded();
        assert!(queue.drain_all().is_empty());
        assert_eq!(queue.capacity(), None);
    }

    #[test]
    fn bounded_queue_evicts_oldest() {
        let queue = HeartbeatQueue::bounded(3);
        for secs in 0..3 {
            assert_eq!(queue.enqueue(heartbeat("/f.rs", secs)), 0);
        }

        assert_eq!(queue.enqueue(heartbeat("/f.rs", 3)), 1);
        assert_eq!(queue.len(), 3);

        let drained: Vec<_> = queue.drain_all().iter().map(|h| h.timestamp).collect();
        assert_eq!(
            drained,
            vec![
                Timestamp::from_secs(1),
                Timestamp::from_secs(2),
                Timestamp::from_secs(3)
            ]
        );
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = HeartbeatQueue::with_capacity(Some(0));
        assert_eq!(queue.capacity(), Some(1));
        queue.enqueue(heartbeat("/a", 0));
        assert_eq!(queue.enqueue(heartbeat("/b", 1)), 1);
        assert_eq!(queue.drain_all()[0].entity, "/b");
    }

    #[test]
    fn concurrent_enqueue_and_drain_loses_nothing() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 500;

        let queue = Arc::new(HeartbeatQueue::unbounded());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue(heartbeat(&format!("/p{p}"), i));
                    }
                })
            })
            .collect();

        let mut collected = Vec::new();
        while producers.iter().any(|h| !h.is_finished()) {
            collected.extend(queue.drain_all());
        }
        for producer in producers {
            producer.join().unwrap();
        }
        collected.extend(queue.drain_all());

        assert_eq!(collected.len() as u64, PRODUCERS * PER_PRODUCER);

        let unique: HashSet<_> = collected
            .iter()
            .map(|h| (h.entity.clone(), h.timestamp))
            .collect();
        assert_eq!(unique.len(), collected.len());

        // Per-producer FIFO order survives concurrent draining.
        for p in 0..PRODUCERS {
            let entity = format!("/p{p}");
            let own: Vec<_> = collected
                .iter()
                .filter(|h| h.entity == entity)
                .map(|h| h.timestamp)
                .collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
