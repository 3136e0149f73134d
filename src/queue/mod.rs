//! In-memory queue resource shared by every session of the broker.
//!
//! Entries keep the position they were enqueued at. An acquired entry
//! stays counted in the depth until it is acknowledged, and a released
//! entry goes back to its original position, so redelivery preserves the
//! original relative order.
//!
//! Each queue serializes its own operations behind a mutex. No lock is
//! held while touching another queue.

mod consumer;
mod redelivery;

pub use consumer::{Browser, Consumer};
pub use redelivery::{RedeliveryDecision, RedeliveryPolicy};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use bytes::Bytes;
use tokio::sync::watch;

use crate::config::QueueConfig;
use crate::error::{DecodeError, Result};
use crate::protocol::MessageSections;

/// An enqueued message: the bare message bytes as transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn sections(&self) -> std::result::Result<MessageSections, DecodeError> {
        MessageSections::parse(&self.payload)
    }
}

/// A message at a position in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Position in the queue, increasing in enqueue order.
    pub id: u64,
    pub message: Message,
    /// Failed delivery attempts so far.
    pub delivery_count: u32,
}

/// Result of giving an acquired entry back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Requeued,
    DeadLettered { destination: String },
    Discarded,
}

/// Signal raised whenever entries become available on any queue of a
/// registry, so that idle consumers elsewhere can resume delivery.
#[derive(Debug, Clone)]
pub struct Activity(Arc<watch::Sender<u64>>);

impl Activity {
    fn notify(&self) {
        self.0.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.0.subscribe()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self(Arc::new(watch::channel(0).0))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    available: BTreeMap<u64, QueueEntry>,
    acquired: HashMap<u64, QueueEntry>,
    next_id: u64,
}

type QueueMap = RwLock<HashMap<String, Arc<Queue>>>;

/// A named FIFO queue with acquire/acknowledge/release semantics.
#[derive(Debug)]
pub struct Queue {
    name: String,
    policy: RedeliveryPolicy,
    state: Mutex<QueueState>,
    /// Used to resolve the dead-letter destination.
    registry: Weak<QueueMap>,
    activity: Activity,
}

impl Queue {
    /// A queue that is not part of a registry. Dead-lettered entries are
    /// discarded since no destination can be resolved.
    pub fn new(name: impl Into<String>, policy: RedeliveryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(QueueState::default()),
            registry: Weak::new(),
            activity: Activity::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message. Returns its position.
    pub fn enqueue(&self, message: Message) -> u64 {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.available.insert(
            id,
            QueueEntry {
                id,
                message,
                delivery_count: 0,
            },
        );
        drop(state);
        tracing::trace!(queue = %self.name, id, "enqueued");
        self.activity.notify();
        id
    }

    /// Take the oldest available entry for delivery.
    pub fn acquire(&self) -> Option<QueueEntry> {
        let mut state = self.state();
        let (_, entry) = state.available.pop_first()?;
        state.acquired.insert(entry.id, entry.clone());
        Some(entry)
    }

    /// Remove an acquired entry for good. False if it was not acquired.
    pub fn acknowledge(&self, id: u64) -> bool {
        self.state().acquired.remove(&id).is_some()
    }

    /// Give an acquired entry back.
    ///
    /// With `count_attempt` the delivery count is bumped first, and an
    /// entry that has used up its attempts is dead-lettered instead of
    /// requeued. Returns `None` if `id` was not acquired.
    pub fn release(&self, id: u64, count_attempt: bool) -> Option<ReleaseOutcome> {
        let (entry, decision) = {
            let mut state = self.state();
            let mut entry = state.acquired.remove(&id)?;
            if count_attempt {
                entry.delivery_count += 1;
            }
            let decision = self.policy.decide(entry.delivery_count);
            if decision == RedeliveryDecision::Requeue {
                state.available.insert(entry.id, entry);
                drop(state);
                self.activity.notify();
                return Some(ReleaseOutcome::Requeued);
            }
            (entry, decision)
        };

        Some(self.dead_letter(entry, decision))
    }

    fn dead_letter(&self, entry: QueueEntry, decision: RedeliveryDecision) -> ReleaseOutcome {
        let RedeliveryDecision::DeadLetter(destination) = decision else {
            tracing::info!(
                queue = %self.name,
                id = entry.id,
                delivery_count = entry.delivery_count,
                "maximum delivery attempts reached, discarding message"
            );
            return ReleaseOutcome::Discarded;
        };

        let alternate = self
            .registry
            .upgrade()
            .and_then(|queues| lookup(&queues, &destination));
        match alternate {
            Some(alternate) => {
                alternate.enqueue(entry.message);
                tracing::info!(
                    queue = %self.name,
                    id = entry.id,
                    alternate = %destination,
                    "maximum delivery attempts reached, message moved to alternate"
                );
                ReleaseOutcome::DeadLettered { destination }
            }
            None => {
                tracing::warn!(
                    queue = %self.name,
                    alternate = %destination,
                    "alternate queue not found, discarding message"
                );
                ReleaseOutcome::Discarded
            }
        }
    }

    /// Snapshot of the available entries in order, without acquiring.
    pub fn browse(&self) -> Vec<QueueEntry> {
        self.state().available.values().cloned().collect()
    }

    /// The first available entry after position `after`, without acquiring.
    pub fn browse_next(&self, after: Option<u64>) -> Option<QueueEntry> {
        let state = self.state();
        match after {
            Some(after) => state
                .available
                .range(after + 1..)
                .next()
                .map(|(_, e)| e.clone()),
            None => state.available.values().next().cloned(),
        }
    }

    /// Entries held by the queue, acquired ones included.
    pub fn depth(&self) -> usize {
        let state = self.state();
        state.available.len() + state.acquired.len()
    }

    /// Entries ready to be acquired.
    pub fn available(&self) -> usize {
        self.state().available.len()
    }

    /// Current delivery count of an entry, acquired or not.
    pub fn delivery_count(&self, id: u64) -> Option<u32> {
        let state = self.state();
        state
            .available
            .get(&id)
            .or_else(|| state.acquired.get(&id))
            .map(|e| e.delivery_count)
    }
}

fn lookup(queues: &QueueMap, name: &str) -> Option<Arc<Queue>> {
    queues
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// The set of queues known to a broker, addressed by name.
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<QueueMap>,
    activity: Activity,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every queue in `configs`.
    pub fn from_config(configs: &[QueueConfig]) -> Result<Self> {
        let registry = Self::new();
        for config in configs {
            registry.create(&config.name, RedeliveryPolicy::from_config(config))?;
        }
        Ok(registry)
    }

    /// Create a queue. Fails if the name is taken.
    pub fn create(&self, name: &str, policy: RedeliveryPolicy) -> Result<Arc<Queue>> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(name) {
            return Err(crate::error::BrokerError::Config(format!(
                "queue '{name}' already exists"
            )));
        }
        let queue = Arc::new(Queue {
            name: name.to_string(),
            policy,
            state: Mutex::new(QueueState::default()),
            registry: Arc::downgrade(&self.queues),
            activity: self.activity.clone(),
        });
        queues.insert(name.to_string(), queue.clone());
        tracing::debug!(queue = name, "queue created");
        Ok(queue)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        lookup(&self.queues, name)
    }

    /// Changes whenever an entry becomes available on any of these queues.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.activity.subscribe()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &'static str) -> Message {
        Message::new(Bytes::from_static(text.as_bytes()))
    }

    #[test]
    fn test_fifo_acquire_and_depth() {
        let queue = Queue::new("q", RedeliveryPolicy::unlimited());
        queue.enqueue(message("a"));
        queue.enqueue(message("b"));

        let first = queue.acquire().unwrap();
        assert_eq!(first.message, message("a"));
        // Acquired entries still count
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.available(), 1);

        assert!(queue.acknowledge(first.id));
        assert!(!queue.acknowledge(first.id));
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_release_restores_original_position() {
        let queue = Queue::new("q", RedeliveryPolicy::unlimited());
        for text in ["a", "b", "c"] {
            queue.enqueue(message(text));
        }
        let a = queue.acquire().unwrap();
        let b = queue.acquire().unwrap();

        assert_eq!(queue.release(b.id, true), Some(ReleaseOutcome::Requeued));
        assert_eq!(queue.release(a.id, true), Some(ReleaseOutcome::Requeued));

        let order: Vec<_> = std::iter::from_fn(|| queue.acquire())
            .map(|e| e.message)
            .collect();
        assert_eq!(order, vec![message("a"), message("b"), message("c")]);
    }

    #[test]
    fn test_uncounted_release_keeps_delivery_count() {
        let queue = Queue::new("q", RedeliveryPolicy::new(1));
        let id = queue.enqueue(message("a"));
        queue.acquire();
        assert_eq!(queue.release(id, false), Some(ReleaseOutcome::Requeued));
        assert_eq!(queue.delivery_count(id), Some(0));
    }

    #[test]
    fn test_registry_signals_available_entries() {
        let registry = QueueRegistry::new();
        let queue = registry.create("q", RedeliveryPolicy::unlimited()).unwrap();
        let mut activity = registry.subscribe();
        assert!(!activity.has_changed().unwrap());

        let id = queue.enqueue(message("a"));
        assert!(activity.has_changed().unwrap());
        activity.borrow_and_update();

        queue.acquire();
        assert!(!activity.has_changed().unwrap());
        queue.release(id, false);
        assert!(activity.has_changed().unwrap());
    }

    #[test]
    fn test_release_unknown_id() {
        let queue = Queue::new("q", RedeliveryPolicy::unlimited());
        assert_eq!(queue.release(42, true), None);
    }

    #[test]
    fn test_dead_letter_to_alternate() {
        // Arrange
        let registry = QueueRegistry::new();
        let source = registry
            .create("source", RedeliveryPolicy::new(2).with_alternate("dlq"))
            .unwrap();
        let dlq = registry.create("dlq", RedeliveryPolicy::unlimited()).unwrap();
        let id = source.enqueue(message("payload"));

        // Act: two failed attempts
        source.acquire();
        assert_eq!(source.release(id, true), Some(ReleaseOutcome::Requeued));
        source.acquire();
        let outcome = source.release(id, true);

        // Assert
        assert_eq!(
            outcome,
            Some(ReleaseOutcome::DeadLettered {
                destination: "dlq".into()
            })
        );
        assert_eq!(source.depth(), 0);
        assert_eq!(dlq.depth(), 1);
        assert_eq!(dlq.acquire().unwrap().message, message("payload"));
    }

    #[test]
    fn test_exhausted_without_alternate_discards() {
        let queue = Queue::new("q", RedeliveryPolicy::new(1));
        let id = queue.enqueue(message("a"));
        queue.acquire();
        assert_eq!(queue.release(id, true), Some(ReleaseOutcome::Discarded));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_missing_alternate_discards() {
        let registry = QueueRegistry::new();
        let queue = registry
            .create("q", RedeliveryPolicy::new(1).with_alternate("nowhere"))
            .unwrap();
        let id = queue.enqueue(message("a"));
        queue.acquire();
        assert_eq!(queue.release(id, true), Some(ReleaseOutcome::Discarded));
    }

    #[test]
    fn test_browse_does_not_acquire_or_count() {
        let queue = Queue::new("q", RedeliveryPolicy::new(1));
        let id = queue.enqueue(message("a"));
        queue.enqueue(message("b"));

        for _ in 0..3 {
            assert_eq!(queue.browse().len(), 2);
        }
        let first = queue.browse_next(None).unwrap();
        let second = queue.browse_next(Some(first.id)).unwrap();
        assert!(queue.browse_next(Some(second.id)).is_none());

        assert_eq!(queue.delivery_count(id), Some(0));
        assert_eq!(queue.available(), 2);
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let registry = QueueRegistry::new();
        registry.create("q", RedeliveryPolicy::unlimited()).unwrap();
        assert!(registry.create("q", RedeliveryPolicy::unlimited()).is_err());
        assert_eq!(registry.names(), vec!["q".to_string()]);
        assert!(registry.get("other").is_none());
    }
}
