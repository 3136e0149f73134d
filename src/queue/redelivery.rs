//! Redelivery limit and dead-letter routing.
//!
//! A queue entry's delivery count is bumped whenever a consumer gives the
//! entry back after failing to process it (recover, rollback, reject).
//! Once the count reaches `maximum_delivery_attempts` the entry leaves the
//! queue: it moves to the alternate destination if one is bound, otherwise
//! it is discarded. Browsing never touches the count.

use crate::config::QueueConfig;

/// Per-queue redelivery policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// 0 means unlimited.
    pub maximum_delivery_attempts: u32,
    /// Dead-letter destination queue.
    pub alternate: Option<String>,
}

/// What to do with an entry given back by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Put it back in its original position.
    Requeue,
    /// Move it to the named queue.
    DeadLetter(String),
    /// Drop it.
    Discard,
}

impl RedeliveryPolicy {
    /// Redeliver forever.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn new(maximum_delivery_attempts: u32) -> Self {
        Self {
            maximum_delivery_attempts,
            alternate: None,
        }
    }

    pub fn with_alternate(mut self, destination: impl Into<String>) -> Self {
        self.alternate = Some(destination.into());
        self
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            maximum_delivery_attempts: config.maximum_delivery_attempts,
            alternate: config
                .alternate_binding
                .as_ref()
                .map(|binding| binding.destination.clone()),
        }
    }

    /// True once `delivery_count` has used up every attempt.
    pub fn is_exhausted(&self, delivery_count: u32) -> bool {
        self.maximum_delivery_attempts > 0 && delivery_count >= self.maximum_delivery_attempts
    }

    pub fn decide(&self, delivery_count: u32) -> RedeliveryDecision {
        if !self.is_exhausted(delivery_count) {
            return RedeliveryDecision::Requeue;
        }
        match &self.alternate {
            Some(destination) => RedeliveryDecision::DeadLetter(destination.clone()),
            None => RedeliveryDecision::Discard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlternateBinding;

    #[test]
    fn test_unlimited_never_exhausts() {
        let policy = RedeliveryPolicy::unlimited();
        assert!(!policy.is_exhausted(u32::MAX));
        assert_eq!(policy.decide(1_000), RedeliveryDecision::Requeue);
    }

    #[test]
    fn test_exhausted_at_maximum() {
        let policy = RedeliveryPolicy::new(2).with_alternate("dlq");
        assert_eq!(policy.decide(0), RedeliveryDecision::Requeue);
        assert_eq!(policy.decide(1), RedeliveryDecision::Requeue);
        assert_eq!(policy.decide(2), RedeliveryDecision::DeadLetter("dlq".into()));
    }

    #[test]
    fn test_discard_without_alternate() {
        let policy = RedeliveryPolicy::new(1);
        assert_eq!(policy.decide(1), RedeliveryDecision::Discard);
    }

    #[test]
    fn test_from_config() {
        let config = QueueConfig {
            name: "orders".into(),
            maximum_delivery_attempts: 3,
            alternate_binding: Some(AlternateBinding {
                destination: "orders.dlq".into(),
            }),
        };
        let policy = RedeliveryPolicy::from_config(&config);
        assert_eq!(policy.maximum_delivery_attempts, 3);
        assert_eq!(policy.alternate.as_deref(), Some("orders.dlq"));
    }
}
