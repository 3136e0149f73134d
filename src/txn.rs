//! Transaction registry.
//!
//! Each session owns one registry. Declare hands out a fresh id; work done
//! under that id is recorded here instead of being applied to the queues,
//! and Discharge applies it (commit) or undoes it (rollback). The entry is
//! the only owner of the work list. Links refer to a transaction by id
//! only, so a link may detach before its transaction is discharged.
//!
//! Ids are a big-endian counter and are never handed out twice; a
//! discharged id is gone and fails as unknown.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{AmqpError, ErrorCondition};
use crate::queue::{Message, Queue};

/// Work recorded under a transaction.
#[derive(Debug)]
pub enum TxnAction {
    /// A message transferred to a queue. Not visible until commit.
    Enqueue { queue: Arc<Queue>, message: Message },
    /// An acquired entry accepted by a consumer. Removed on commit,
    /// released on rollback.
    Dequeue { queue: Arc<Queue>, entry_id: u64 },
}

/// What a discharge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DischargeSummary {
    pub committed: bool,
    pub enqueues: usize,
    pub dequeues: usize,
}

#[derive(Debug, Default)]
pub struct TransactionRegistry {
    next_id: u32,
    active: HashMap<Bytes, Vec<TxnAction>>,
}

fn unknown_id(txn_id: &[u8]) -> AmqpError {
    AmqpError::new(
        ErrorCondition::UnknownId,
        format!("unknown transaction id {txn_id:02x?}"),
    )
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction and return its id.
    pub fn declare(&mut self) -> Bytes {
        self.next_id = self.next_id.wrapping_add(1);
        let id = Bytes::copy_from_slice(&self.next_id.to_be_bytes());
        self.active.insert(id.clone(), Vec::new());
        tracing::debug!(txn = ?id, "transaction declared");
        id
    }

    pub fn contains(&self, txn_id: &[u8]) -> bool {
        self.active.contains_key(txn_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Record work under `txn_id`.
    pub fn record(&mut self, txn_id: &[u8], action: TxnAction) -> Result<(), AmqpError> {
        let actions = self
            .active
            .get_mut(txn_id)
            .ok_or_else(|| unknown_id(txn_id))?;
        actions.push(action);
        Ok(())
    }

    pub fn enqueue(
        &mut self,
        txn_id: &[u8],
        queue: Arc<Queue>,
        message: Message,
    ) -> Result<(), AmqpError> {
        self.record(txn_id, TxnAction::Enqueue { queue, message })
    }

    pub fn dequeue(
        &mut self,
        txn_id: &[u8],
        queue: Arc<Queue>,
        entry_id: u64,
    ) -> Result<(), AmqpError> {
        self.record(txn_id, TxnAction::Dequeue { queue, entry_id })
    }

    /// Commit (`fail = false`) or roll back (`fail = true`) a transaction
    /// and retire its id.
    pub fn discharge(&mut self, txn_id: &[u8], fail: bool) -> Result<DischargeSummary, AmqpError> {
        let actions = self
            .active
            .remove(txn_id)
            .ok_or_else(|| unknown_id(txn_id))?;
        let summary = if fail {
            rollback(actions)
        } else {
            commit(actions)
        };
        tracing::debug!(
            txn = ?txn_id,
            committed = summary.committed,
            enqueues = summary.enqueues,
            dequeues = summary.dequeues,
            "transaction discharged"
        );
        Ok(summary)
    }

    /// Roll back everything still active. Used when the session ends.
    pub fn rollback_all(&mut self) {
        for (txn_id, actions) in self.active.drain() {
            let summary = rollback(actions);
            tracing::debug!(
                txn = ?txn_id,
                dequeues = summary.dequeues,
                "transaction rolled back at session end"
            );
        }
    }
}

fn commit(actions: Vec<TxnAction>) -> DischargeSummary {
    let mut summary = DischargeSummary {
        committed: true,
        ..DischargeSummary::default()
    };
    for action in actions {
        match action {
            TxnAction::Enqueue { queue, message } => {
                queue.enqueue(message);
                summary.enqueues += 1;
            }
            TxnAction::Dequeue { queue, entry_id } => {
                queue.acknowledge(entry_id);
                summary.dequeues += 1;
            }
        }
    }
    summary
}

fn rollback(actions: Vec<TxnAction>) -> DischargeSummary {
    let mut summary = DischargeSummary::default();
    for action in actions {
        match action {
            TxnAction::Enqueue { .. } => summary.enqueues += 1,
            TxnAction::Dequeue { queue, entry_id } => {
                queue.release(entry_id, true);
                summary.dequeues += 1;
            }
        }
    }
    summary
}
