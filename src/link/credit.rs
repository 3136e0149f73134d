//! Link credit accounting.
//!
//! The sender may transmit while it holds credit. Credit is not
//! cumulative: each Flow restates it relative to the sender's delivery
//! count, so
//!
//! ```text
//! credit = flow.delivery_count + flow.link_credit - sender.delivery_count
//! ```
//!
//! Delivery counts are serial numbers and use wrapping arithmetic.
//! `may_send` is a pure check; sending without credit is a caller bug and
//! is reported as [`BrokerError::NoCredit`].

use crate::error::{BrokerError, ErrorCondition, Result};

/// Credit state of one link endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCredit {
    /// Deliveries sent (sender) or received (receiver) so far.
    delivery_count: u32,
    /// Deliveries still allowed.
    credit: u32,
    /// Credit granted by the last `grant`, used for the replenish threshold.
    issued: u32,
    /// Peer asked us to use up or give back all credit.
    drain: bool,
}

impl LinkCredit {
    pub fn new(initial_delivery_count: u32) -> Self {
        Self {
            delivery_count: initial_delivery_count,
            credit: 0,
            issued: 0,
            drain: false,
        }
    }

    #[inline]
    pub fn credit(&self) -> u32 {
        self.credit
    }

    #[inline]
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    #[inline]
    pub fn drain(&self) -> bool {
        self.drain
    }

    /// True while at least one more delivery may be sent.
    #[inline]
    pub fn may_send(&self) -> bool {
        self.credit > 0
    }

    /// Sender side: apply a Flow from the receiver.
    ///
    /// A Flow without a delivery count refers to the initial delivery
    /// count, which for our sending links is 0.
    pub fn on_flow(&mut self, delivery_count: Option<u32>, link_credit: u32, drain: bool) {
        let reference = delivery_count.unwrap_or(0);
        self.credit = reference
            .wrapping_add(link_credit)
            .wrapping_sub(self.delivery_count);
        // Credit from a stale Flow that is already used up
        if self.credit > link_credit {
            self.credit = 0;
        }
        self.drain = drain;
    }

    /// Sender side: account for one new delivery.
    pub fn consume(&mut self, handle: u32) -> Result<()> {
        if self.credit == 0 {
            return Err(BrokerError::NoCredit { handle });
        }
        self.credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Ok(())
    }

    /// Sender side: with drain set and nothing left to send, give up the
    /// remaining credit by advancing the delivery count. Returns true if
    /// anything changed.
    pub fn drain_remaining(&mut self) -> bool {
        if !self.drain || self.credit == 0 {
            return false;
        }
        self.delivery_count = self.delivery_count.wrapping_add(self.credit);
        self.credit = 0;
        true
    }

    /// Receiver side: issue fresh credit.
    pub fn grant(&mut self, credit: u32) {
        self.credit = credit;
        self.issued = credit;
    }

    /// Receiver side: account for an incoming delivery.
    pub fn on_transfer(&mut self, handle: u32) -> Result<()> {
        if self.credit == 0 {
            return Err(BrokerError::link(
                handle,
                ErrorCondition::TransferLimitExceeded,
                "transfer received without link credit",
            ));
        }
        self.credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Ok(())
    }

    /// Receiver side: true once at most half the issued credit remains.
    pub fn needs_replenish(&self) -> bool {
        self.issued > 0 && self.credit <= self.issued / 2
    }
}
