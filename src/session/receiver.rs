//! Inbound transfers: links where the peer sends and the broker receives.

use std::sync::Arc;

use bytes::Bytes;

use super::{DeliveryAssembly, EndpointKind, Session};
use crate::error::{AmqpError, BrokerError, DecodeError, ErrorCondition, Result};
use crate::link::Link;
use crate::protocol::{DeliveryState, MessageSections, Performative, ReceiverSettleMode, Transfer, TxnControl};
use crate::queue::{Message, Queue};

/// Where a completed delivery goes.
enum Destination {
    Queue(Arc<Queue>),
    Coordinator,
}

impl Session {
    pub(super) fn on_transfer(&mut self, transfer: Transfer, payload: Bytes) -> Result<()> {
        if self.incoming_window == 0 {
            return Err(BrokerError::session(
                ErrorCondition::WindowViolation,
                "transfer received with the incoming window closed",
            ));
        }
        self.incoming_window -= 1;
        self.next_incoming_id = self.next_incoming_id.wrapping_add(1);

        let result = self.receive_transfer(transfer, payload);
        self.replenish_window();
        result
    }

    fn receive_transfer(&mut self, transfer: Transfer, payload: Bytes) -> Result<()> {
        let handle = transfer.handle;
        let endpoint = self.endpoints.get_mut(&handle).ok_or_else(|| {
            BrokerError::session(
                ErrorCondition::UnattachedHandle,
                format!("transfer on unattached handle {handle}"),
            )
        })?;
        if endpoint.link.detach_sent() {
            // Already in flight when we detached
            return Ok(());
        }
        let destination = match &endpoint.kind {
            EndpointKind::Receiving { queue } => Destination::Queue(queue.clone()),
            EndpointKind::Coordinator => Destination::Coordinator,
            _ => {
                return Err(BrokerError::link(
                    handle,
                    ErrorCondition::IllegalState,
                    "transfer on a link where the broker is the sender",
                ))
            }
        };

        let mut assembly = match endpoint.assembly.take() {
            Some(mut assembly) => {
                if transfer.settled == Some(true) {
                    assembly.settled = true;
                }
                if transfer.state.is_some() {
                    assembly.state = transfer.state.clone();
                }
                assembly
            }
            None => start_delivery(&mut endpoint.link, &transfer)?,
        };

        if transfer.aborted {
            endpoint.link.unsettled_mut().settle(assembly.delivery_id);
            tracing::debug!(handle, delivery_id = assembly.delivery_id, "delivery aborted");
            return Ok(());
        }

        assembly.push(payload);
        let supports_rejected = endpoint.link.supports_rejected();
        let oversize = !assembly.is_discarding()
            && endpoint.link.exceeds_max_message_size(assembly.size());
        let limit = endpoint.link.max_message_size();

        if oversize {
            let error = AmqpError::new(
                ErrorCondition::MessageSizeExceeded,
                format!(
                    "delivery of at least {} bytes exceeds the link limit of {limit}",
                    assembly.size()
                ),
            );
            self.refuse(
                handle,
                assembly.delivery_id,
                assembly.settled,
                supports_rejected,
                error,
            )?;
            assembly.discard();
        }

        if transfer.more {
            if let Some(endpoint) = self.endpoints.get_mut(&handle) {
                endpoint.assembly = Some(assembly);
            }
            return Ok(());
        }

        if !assembly.is_discarding() {
            match destination {
                Destination::Queue(queue) => {
                    self.deliver(handle, queue, assembly, supports_rejected)?
                }
                Destination::Coordinator => self.control(handle, assembly, supports_rejected)?,
            }
        }
        self.replenish_credit(handle);
        Ok(())
    }

    /// Report a resource error for one delivery: a settled rejected
    /// outcome if the source declared it and the delivery is unsettled,
    /// otherwise the link is detached with the error.
    fn refuse(
        &mut self,
        handle: u32,
        delivery_id: u32,
        settled: bool,
        supports_rejected: bool,
        error: AmqpError,
    ) -> Result<()> {
        if !supports_rejected || settled {
            return Err(BrokerError::Link { handle, error });
        }
        tracing::debug!(handle, delivery_id, %error, "delivery rejected");
        if let Some(endpoint) = self.endpoints.get_mut(&handle) {
            endpoint.link.unsettled_mut().settle(delivery_id);
        }
        self.dispositions
            .push(delivery_id, true, DeliveryState::rejected(error));
        Ok(())
    }

    fn deliver(
        &mut self,
        handle: u32,
        queue: Arc<Queue>,
        assembly: DeliveryAssembly,
        supports_rejected: bool,
    ) -> Result<()> {
        let delivery_id = assembly.delivery_id;
        let settled = assembly.settled;
        let settle_mode = assembly.settle_mode;
        let state = assembly.state.clone();
        let message = Message::new(assembly.into_payload());

        let sections = message
            .sections()
            .map_err(|err| BrokerError::link(handle, ErrorCondition::DecodeError, err.to_string()))?;
        if sections.durable && !self.config.persistence {
            let error = AmqpError::new(
                ErrorCondition::PreconditionFailed,
                "durable messages cannot be accepted without persistence",
            );
            return self.refuse(handle, delivery_id, settled, supports_rejected, error);
        }

        let outcome = match state {
            Some(DeliveryState::Transactional { txn_id, .. }) => {
                if let Err(error) = self.txns.enqueue(&txn_id, queue, message) {
                    return self.refuse(handle, delivery_id, settled, supports_rejected, error);
                }
                DeliveryState::Transactional {
                    txn_id,
                    outcome: Some(Box::new(DeliveryState::Accepted)),
                }
            }
            _ => {
                queue.enqueue(message);
                DeliveryState::Accepted
            }
        };

        if settled {
            // The sender may settle on a later frame than the one that
            // registered the tag.
            if let Some(endpoint) = self.endpoints.get_mut(&handle) {
                endpoint.link.unsettled_mut().settle(delivery_id);
            }
            return Ok(());
        }
        match settle_mode {
            ReceiverSettleMode::First => {
                if let Some(endpoint) = self.endpoints.get_mut(&handle) {
                    endpoint.link.unsettled_mut().settle(delivery_id);
                }
                self.dispositions.push(delivery_id, true, outcome);
            }
            ReceiverSettleMode::Second => {
                self.incoming_unsettled.insert(delivery_id, handle);
                self.dispositions.push(delivery_id, false, outcome);
            }
        }
        Ok(())
    }

    /// Run a Declare or Discharge received on a coordinator link.
    fn control(
        &mut self,
        handle: u32,
        assembly: DeliveryAssembly,
        supports_rejected: bool,
    ) -> Result<()> {
        let delivery_id = assembly.delivery_id;
        let payload = assembly.into_payload();
        let control = MessageSections::parse(&payload)
            .and_then(|sections| {
                sections.amqp_value.ok_or_else(|| {
                    DecodeError::Malformed("coordinator message has no amqp-value body".to_string())
                })
            })
            .and_then(|value| self.controls.dispatch(value))
            .map_err(|err| BrokerError::link(handle, ErrorCondition::DecodeError, err.to_string()))?;

        let state = match control {
            TxnControl::Declare { .. } => DeliveryState::Declared {
                txn_id: self.txns.declare(),
            },
            TxnControl::Discharge { txn_id, fail } => match self.txns.discharge(&txn_id, fail) {
                Ok(_) => DeliveryState::Accepted,
                Err(error) if supports_rejected => DeliveryState::rejected(error),
                Err(error) => return Err(BrokerError::Link { handle, error }),
            },
        };

        if let Some(endpoint) = self.endpoints.get_mut(&handle) {
            endpoint.link.unsettled_mut().settle(delivery_id);
        }
        self.dispositions.push(delivery_id, true, state);
        Ok(())
    }

    /// Top credit back up once half of it is used.
    fn replenish_credit(&mut self, handle: u32) {
        let link_credit = self.config.link_credit;
        let Some(endpoint) = self.endpoints.get_mut(&handle) else {
            return;
        };
        if endpoint.link.detach_sent() || !endpoint.link.credit().needs_replenish() {
            return;
        }
        endpoint.link.credit_mut().grant(link_credit);
        if let Some(flow) = self.link_flow(handle) {
            self.emit(Performative::Flow(flow), None);
        }
    }

    /// Reopen the incoming window once half of it is used.
    fn replenish_window(&mut self) {
        if self.incoming_window > self.config.incoming_window / 2 {
            return;
        }
        self.incoming_window = self.config.incoming_window;
        let flow = self.session_flow();
        self.emit(Performative::Flow(flow), None);
    }
}

/// Checks for the first Transfer of a delivery.
fn start_delivery(link: &mut Link, transfer: &Transfer) -> Result<DeliveryAssembly> {
    let handle = link.handle();
    let (Some(delivery_id), Some(tag)) = (transfer.delivery_id, transfer.delivery_tag.clone())
    else {
        return Err(BrokerError::connection(
            ErrorCondition::DecodeError,
            "first transfer of a delivery must carry delivery-id and delivery-tag",
        ));
    };

    link.credit_mut().on_transfer(handle)?;
    let settle_mode = link
        .transfer_settle_mode(transfer.rcv_settle_mode)
        .map_err(|error| BrokerError::Link { handle, error })?;
    let settled = transfer.settled.unwrap_or(false);
    if !settled {
        link.unsettled_mut()
            .insert(tag.clone(), delivery_id)
            .map_err(|error| BrokerError::Link { handle, error })?;
    }

    Ok(DeliveryAssembly::new(
        delivery_id,
        tag,
        settled,
        settle_mode,
        transfer.state.clone(),
    ))
}
