//! Link state machine.
//!
//! ```text
//! Unattached -> Attaching -> Attached -> Detaching -> Detached
//! ```
//!
//! A link is Attaching once one side has sent its Attach and Attached once
//! both have. Likewise Detaching after the first Detach and Detached after
//! both. The state is derived from which performatives were sent and
//! received, so either side may go first.

mod credit;
mod delivery;

pub use credit::LinkCredit;
pub use delivery::UnsettledDeliveries;

use crate::error::{AmqpError, BrokerError, ErrorCondition, Result};
use crate::protocol::{
    Attach, Detach, ReceiverSettleMode, Role, SenderSettleMode, Source, TargetKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unattached,
    Attaching,
    Attached,
    Detaching,
    Detached,
}

/// One link endpoint, seen from the broker.
#[derive(Debug)]
pub struct Link {
    name: String,
    /// The broker answers with the peer's handle number.
    handle: u32,
    /// Our role. The peer's role is the opposite.
    role: Role,
    state: LinkState,
    attach_sent: bool,
    attach_received: bool,
    detach_sent: bool,
    detach_received: bool,
    snd_settle_mode: SenderSettleMode,
    rcv_settle_mode: ReceiverSettleMode,
    source: Option<Source>,
    target: Option<TargetKind>,
    /// Largest message we accept. 0 means unlimited.
    max_message_size: u64,
    /// Largest message the peer accepts. 0 means unlimited.
    remote_max_message_size: u64,
    credit: LinkCredit,
    unsettled: UnsettledDeliveries,
}

impl Link {
    pub fn new(name: impl Into<String>, handle: u32, role: Role) -> Self {
        Self {
            name: name.into(),
            handle,
            role,
            state: LinkState::Unattached,
            attach_sent: false,
            attach_received: false,
            detach_sent: false,
            detach_received: false,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            source: None,
            target: None,
            max_message_size: 0,
            remote_max_message_size: 0,
            credit: LinkCredit::new(0),
            unsettled: UnsettledDeliveries::new(),
        }
    }

    /// Build a link from the peer's Attach. Settle modes and termini are
    /// taken as proposed; every mode is supported here, so the proposal is
    /// also the intersection.
    pub fn from_remote_attach(attach: &Attach, max_message_size: u64) -> Self {
        let mut link = Self::new(attach.name.clone(), attach.handle, attach.role.opposite());
        link.snd_settle_mode = attach.snd_settle_mode;
        link.rcv_settle_mode = attach.rcv_settle_mode;
        link.source = attach.source.clone();
        link.target = attach.target.clone();
        link.max_message_size = max_message_size;
        link.remote_max_message_size = attach.max_message_size.unwrap_or(0);
        if let Some(initial) = attach.initial_delivery_count {
            link.credit = LinkCredit::new(initial);
        }
        link.attach_received = true;
        link.update_state();
        link
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn snd_settle_mode(&self) -> SenderSettleMode {
        self.snd_settle_mode
    }

    pub fn rcv_settle_mode(&self) -> ReceiverSettleMode {
        self.rcv_settle_mode
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&TargetKind> {
        self.target.as_ref()
    }

    pub fn credit(&self) -> &LinkCredit {
        &self.credit
    }

    pub fn credit_mut(&mut self) -> &mut LinkCredit {
        &mut self.credit
    }

    pub fn unsettled(&self) -> &UnsettledDeliveries {
        &self.unsettled
    }

    pub fn unsettled_mut(&mut self) -> &mut UnsettledDeliveries {
        &mut self.unsettled
    }

    pub fn max_message_size(&self) -> u64 {
        self.max_message_size
    }

    pub fn remote_max_message_size(&self) -> u64 {
        self.remote_max_message_size
    }

    /// True if a message of `size` bytes is over our limit.
    pub fn exceeds_max_message_size(&self, size: u64) -> bool {
        self.max_message_size > 0 && size > self.max_message_size
    }

    /// Whether the source declared the rejected outcome. Decides how
    /// resource errors are reported: a rejected disposition if so,
    /// otherwise a Detach. An absent outcomes list counts as no.
    pub fn supports_rejected(&self) -> bool {
        self.source.as_ref().is_some_and(Source::supports_rejected)
    }

    /// Browsing source: deliveries are copies, nothing is acquired.
    pub fn is_browser(&self) -> bool {
        self.source.as_ref().is_some_and(Source::is_browser)
    }

    /// True between both Attaches and the first Detach.
    pub fn is_attached(&self) -> bool {
        self.state == LinkState::Attached
    }

    pub fn is_detached(&self) -> bool {
        self.state == LinkState::Detached
    }

    pub fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            return Ok(());
        }
        Err(BrokerError::link(
            self.handle,
            ErrorCondition::IllegalState,
            format!("link '{}' is {:?}", self.name, self.state),
        ))
    }

    /// Settle mode for one transfer. A transfer may ask for `first` on a
    /// `second` link, never the other way round.
    pub fn transfer_settle_mode(
        &self,
        requested: Option<ReceiverSettleMode>,
    ) -> std::result::Result<ReceiverSettleMode, AmqpError> {
        match requested {
            None => Ok(self.rcv_settle_mode),
            Some(ReceiverSettleMode::Second) if self.rcv_settle_mode == ReceiverSettleMode::First => {
                Err(AmqpError::new(
                    ErrorCondition::InvalidField,
                    "transfer rcv-settle-mode second is not allowed on a link with rcv-settle-mode first",
                ))
            }
            Some(mode) => Ok(mode),
        }
    }

    /// Our Attach in reply to the peer's, marking it sent.
    pub fn local_attach(&mut self) -> Attach {
        let mut attach = Attach::new(self.name.clone(), self.handle, self.role);
        attach.snd_settle_mode = self.snd_settle_mode;
        attach.rcv_settle_mode = self.rcv_settle_mode;
        attach.source = self.source.clone();
        attach.target = self.target.clone();
        if self.role == Role::Sender {
            attach.initial_delivery_count = Some(self.credit.delivery_count());
        }
        if self.max_message_size > 0 {
            attach.max_message_size = Some(self.max_message_size);
        }
        self.attach_sent = true;
        self.update_state();
        attach
    }

    /// Drop the source from our reply, signalling that the node was not
    /// found. A Detach must follow.
    pub fn clear_source(&mut self) {
        self.source = None;
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    pub fn on_detach_received(&mut self, detach: &Detach) {
        if let Some(error) = &detach.error {
            tracing::debug!(link = %self.name, handle = self.handle, %error, "peer detached with error");
        }
        self.detach_received = true;
        self.update_state();
    }

    /// Our Detach, marking it sent. An error makes the detach closing.
    pub fn local_detach(&mut self, error: Option<AmqpError>) -> Detach {
        self.detach_sent = true;
        self.update_state();
        Detach {
            handle: self.handle,
            closed: true,
            error,
        }
    }

    pub fn detach_sent(&self) -> bool {
        self.detach_sent
    }

    fn update_state(&mut self) {
        self.state = match (
            self.attach_sent,
            self.attach_received,
            self.detach_sent,
            self.detach_received,
        ) {
            (_, _, true, true) => LinkState::Detached,
            (_, _, true, false) | (_, _, false, true) => LinkState::Detaching,
            (true, true, false, false) => LinkState::Attached,
            (false, false, false, false) => LinkState::Unattached,
            _ => LinkState::Attaching,
        };
    }
}
