//! Coalescing of outgoing dispositions.
//!
//! Settlements queued while a batch of frames is processed go out as as
//! few Disposition frames as possible: contiguous delivery-ids with the
//! same state and settled flag share one `first..last` range.

use crate::protocol::{DeliveryState, Disposition, Role};

#[derive(Debug)]
pub struct DispositionBatcher {
    role: Role,
    pending: Vec<(u32, bool, DeliveryState)>,
}

impl DispositionBatcher {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, delivery_id: u32, settled: bool, state: DeliveryState) {
        self.pending.push((delivery_id, settled, state));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Coalesced Dispositions for everything queued, in queue order.
    pub fn take(&mut self) -> Vec<Disposition> {
        coalesce(self.role, std::mem::take(&mut self.pending))
    }
}

/// Merge runs of consecutive ids that share a state and settled flag.
pub fn coalesce(role: Role, entries: Vec<(u32, bool, DeliveryState)>) -> Vec<Disposition> {
    let mut out: Vec<Disposition> = Vec::new();
    for (id, settled, state) in entries {
        if let Some(last) = out.last_mut() {
            let contiguous = last.last_id().wrapping_add(1) == id;
            if contiguous && last.settled == settled && last.state.as_ref() == Some(&state) {
                last.last = Some(id);
                continue;
            }
        }
        out.push(Disposition {
            role,
            first: id,
            last: None,
            settled,
            state: Some(state),
            batchable: false,
        });
    }
    out
}
