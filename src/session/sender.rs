//! Outbound deliveries: links where the broker sends to the peer.

use bytes::Bytes;

use super::{EndpointKind, OutgoingDelivery, Session};
use crate::error::{BrokerError, Result};
use crate::protocol::{
    performative_frame_size, DeliveryState, Disposition, Performative, Role, SenderSettleMode,
    Transfer,
};

impl Session {
    /// Send as many deliveries on `handle` as credit, the peer's window and
    /// the queue allow. A delivery is not split across window updates: once
    /// started, all of its frames go out.
    pub(super) fn pump(&mut self, handle: u32) -> Result<()> {
        loop {
            if self.remote_incoming_window == 0 {
                break;
            }
            let Some(endpoint) = self.endpoints.get_mut(&handle) else {
                break;
            };
            if !endpoint.link.is_attached() || !endpoint.link.credit().may_send() {
                break;
            }
            let presettled = endpoint.link.snd_settle_mode() == SenderSettleMode::Settled;
            let (entry, queue, browsing) = match &mut endpoint.kind {
                EndpointKind::Consuming { queue } => (queue.acquire(), queue.clone(), false),
                EndpointKind::Browsing { browser } => {
                    (browser.next_entry(), browser.queue().clone(), true)
                }
                _ => break,
            };
            let Some(entry) = entry else {
                break;
            };
            endpoint.link.credit_mut().consume(handle)?;

            let delivery_id = self.next_delivery_id;
            self.next_delivery_id = delivery_id.wrapping_add(1);
            let settled = presettled || browsing;
            if !settled {
                self.outgoing_unsettled.insert(
                    delivery_id,
                    OutgoingDelivery {
                        handle,
                        queue,
                        entry_id: entry.id,
                    },
                );
            } else if !browsing {
                // Pre-settled consumption: the message is gone once sent
                queue.acknowledge(entry.id);
            }

            tracing::trace!(
                handle,
                delivery_id,
                entry = entry.id,
                delivery_count = entry.delivery_count,
                settled,
                "sending delivery"
            );
            self.send_transfer(handle, delivery_id, settled, entry.message.payload().clone());
        }

        let drained = self
            .endpoints
            .get_mut(&handle)
            .is_some_and(|e| e.link.credit_mut().drain_remaining());
        if drained {
            if let Some(flow) = self.link_flow(handle) {
                self.emit(Performative::Flow(flow), None);
            }
        }
        Ok(())
    }

    /// Resume delivery on every sending link, e.g. after messages became
    /// available on a queue.
    pub fn pump_all(&mut self) -> Result<()> {
        let handles: Vec<u32> = self
            .endpoints
            .iter()
            .filter(|(_, e)| e.is_sending())
            .map(|(handle, _)| *handle)
            .collect();
        for handle in handles {
            self.pump(handle)?;
        }
        Ok(())
    }

    /// Emit one delivery, split into as many Transfer frames as the peer's
    /// max frame size requires. Payload slices are shared, not copied.
    fn send_transfer(&mut self, handle: u32, delivery_id: u32, settled: bool, payload: Bytes) {
        let mut transfer = Transfer {
            handle,
            delivery_id: Some(delivery_id),
            delivery_tag: Some(Bytes::copy_from_slice(&delivery_id.to_be_bytes())),
            message_format: Some(0),
            settled: Some(settled),
            more: true,
            ..Transfer::default()
        };
        let overhead = performative_frame_size(&Performative::Transfer(transfer.clone()));
        let chunk = (self.config.max_frame_size as usize)
            .saturating_sub(overhead)
            .max(1);

        let mut offset = 0;
        loop {
            let end = (offset + chunk).min(payload.len());
            transfer.more = end < payload.len();
            self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
            self.remote_incoming_window = self.remote_incoming_window.saturating_sub(1);
            self.emit(
                Performative::Transfer(transfer),
                Some(payload.slice(offset..end)),
            );
            if end >= payload.len() {
                break;
            }
            offset = end;
            transfer = Transfer {
                handle,
                more: true,
                ..Transfer::default()
            };
        }
    }

    pub(super) fn on_disposition(&mut self, disposition: Disposition) -> Result<()> {
        match disposition.role {
            Role::Receiver => self.on_receiver_disposition(disposition),
            Role::Sender => {
                self.on_sender_disposition(&disposition);
                Ok(())
            }
        }
    }

    /// The peer, as sender, settled deliveries we received in
    /// rcv-settle-mode second.
    fn on_sender_disposition(&mut self, disposition: &Disposition) {
        let last = disposition.last_id();
        if !disposition.settled || last < disposition.first {
            return;
        }
        let ids: Vec<u32> = self
            .incoming_unsettled
            .range(disposition.first..=last)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let Some(handle) = self.incoming_unsettled.remove(&id) else {
                continue;
            };
            if let Some(endpoint) = self.endpoints.get_mut(&handle) {
                endpoint.link.unsettled_mut().settle(id);
            }
        }
    }

    /// The peer, as receiver, reports outcomes for deliveries we sent.
    /// Non-terminal states are informational and change nothing.
    fn on_receiver_disposition(&mut self, disposition: Disposition) -> Result<()> {
        let last = disposition.last_id();
        if last < disposition.first {
            return Ok(());
        }
        let ids: Vec<u32> = self
            .outgoing_unsettled
            .range(disposition.first..=last)
            .map(|(id, _)| *id)
            .collect();

        let mut applied = false;
        for id in ids {
            let state = match &disposition.state {
                Some(state) if state.is_terminal() => state.clone(),
                Some(_) => continue,
                None if disposition.settled => self.default_outcome(id),
                None => continue,
            };
            let Some(delivery) = self.outgoing_unsettled.remove(&id) else {
                continue;
            };
            self.apply_outcome(delivery, state)?;
            applied = true;
        }

        if applied && !disposition.settled {
            // Receiver settles second: confirm our settlement
            self.emit(
                Performative::Disposition(Disposition {
                    role: Role::Sender,
                    first: disposition.first,
                    last: disposition.last,
                    settled: true,
                    state: disposition.state,
                    batchable: false,
                }),
                None,
            );
        }
        self.pump_all()
    }

    /// Outcome for a delivery settled without a state: the source's default
    /// outcome, accepted if there is none.
    fn default_outcome(&self, delivery_id: u32) -> DeliveryState {
        self.outgoing_unsettled
            .get(&delivery_id)
            .and_then(|d| self.endpoints.get(&d.handle))
            .and_then(|e| e.link.source())
            .and_then(|source| source.default_outcome.clone())
            .unwrap_or(DeliveryState::Accepted)
    }

    /// Settle one outgoing delivery on the queue. A transactional accept
    /// becomes a pending dequeue in that transaction.
    fn apply_outcome(&mut self, delivery: OutgoingDelivery, state: DeliveryState) -> Result<()> {
        let OutgoingDelivery {
            handle,
            queue,
            entry_id,
        } = delivery;
        match state {
            DeliveryState::Accepted => {
                queue.acknowledge(entry_id);
            }
            DeliveryState::Modified {
                delivery_failed, ..
            } => {
                queue.release(entry_id, delivery_failed);
            }
            DeliveryState::Rejected { .. } => {
                queue.release(entry_id, true);
            }
            DeliveryState::Transactional { txn_id, outcome } => match outcome.map(|o| *o) {
                None | Some(DeliveryState::Accepted) => {
                    if let Err(error) = self.txns.dequeue(&txn_id, queue.clone(), entry_id) {
                        queue.release(entry_id, false);
                        return Err(BrokerError::Link { handle, error });
                    }
                }
                Some(other) => {
                    return self.apply_outcome(
                        OutgoingDelivery {
                            handle,
                            queue,
                            entry_id,
                        },
                        other,
                    )
                }
            },
            // Released, and anything that is not a message outcome
            _ => {
                queue.release(entry_id, false);
            }
        }
        Ok(())
    }
}
