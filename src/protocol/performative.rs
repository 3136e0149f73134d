//! Typed performatives, delivery states, termini and transaction controls.
//!
//! Every composite is a described list. `decode_fields` reads a composite
//! from its field list, `to_value` produces the described value.

use bytes::Bytes;

use crate::codec::{Descriptor, FieldReader, FieldWriter, Symbol, Value};
use crate::error::{AmqpError, DecodeError};

/// Descriptor codes of the described types the broker understands.
pub mod descriptor {
    pub const OPEN: u64 = 0x10;
    pub const BEGIN: u64 = 0x11;
    pub const ATTACH: u64 = 0x12;
    pub const FLOW: u64 = 0x13;
    pub const TRANSFER: u64 = 0x14;
    pub const DISPOSITION: u64 = 0x15;
    pub const DETACH: u64 = 0x16;
    pub const END: u64 = 0x17;
    pub const CLOSE: u64 = 0x18;
    pub const ERROR: u64 = 0x1d;

    pub const RECEIVED: u64 = 0x23;
    pub const ACCEPTED: u64 = 0x24;
    pub const REJECTED: u64 = 0x25;
    pub const RELEASED: u64 = 0x26;
    pub const MODIFIED: u64 = 0x27;
    pub const SOURCE: u64 = 0x28;
    pub const TARGET: u64 = 0x29;

    pub const COORDINATOR: u64 = 0x30;
    pub const DECLARE: u64 = 0x31;
    pub const DISCHARGE: u64 = 0x32;
    pub const DECLARED: u64 = 0x33;
    pub const TRANSACTIONAL_STATE: u64 = 0x34;
}

/// Outcome symbols advertised in a source's `outcomes` field.
pub mod outcome {
    pub const ACCEPTED: &str = "amqp:accepted:list";
    pub const REJECTED: &str = "amqp:rejected:list";
    pub const RELEASED: &str = "amqp:released:list";
    pub const MODIFIED: &str = "amqp:modified:list";
}

/// Distribution mode that browses instead of consuming.
pub const DISTRIBUTION_MODE_COPY: &str = "copy";

/// Numeric descriptor of a described value, if it has one.
pub fn descriptor_code(value: &Value) -> Option<u64> {
    match &value.as_described()?.descriptor {
        Descriptor::Code(code) => Some(*code),
        Descriptor::Symbol(_) => None,
    }
}

/// Split a described value into (code, body). Fails for anything else.
pub(crate) fn expect_described(value: Value, what: &str) -> Result<(u64, Value), DecodeError> {
    match value {
        Value::Described(described) => match described.descriptor {
            Descriptor::Code(code) => Ok((code, described.value)),
            Descriptor::Symbol(symbol) => {
                Err(DecodeError::UnknownDescriptor(symbol.to_string()))
            }
        },
        _ => Err(DecodeError::Malformed(format!("{what} is not a described type"))),
    }
}

/// Link role. On the wire `false` is sender, `true` is receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn from_bool(receiver: bool) -> Self {
        if receiver {
            Role::Receiver
        } else {
            Role::Sender
        }
    }

    pub fn as_bool(self) -> bool {
        self == Role::Receiver
    }

    pub fn opposite(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    #[default]
    Mixed,
}

impl SenderSettleMode {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unsettled),
            1 => Some(Self::Settled),
            2 => Some(Self::Mixed),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Unsettled => 0,
            Self::Settled => 1,
            Self::Mixed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReceiverSettleMode {
    #[default]
    First,
    Second,
}

impl ReceiverSettleMode {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

impl AmqpError {
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let (code, body) = expect_described(value, "error")?;
        if code != descriptor::ERROR {
            return Err(DecodeError::UnknownDescriptor(format!("0x{code:02x}")));
        }
        let mut f = FieldReader::new("error", body)?;
        Ok(Self {
            condition: f.required(0, "condition", |v| match v {
                Value::Symbol(s) => Some(s),
                _ => None,
            })?,
            description: f.string(1, "description")?,
        })
    }

    pub fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.condition.clone())
            .push_opt(self.description.clone())
            .into_described(descriptor::ERROR)
    }
}

fn optional_error(f: &mut FieldReader, index: usize) -> Result<Option<AmqpError>, DecodeError> {
    let value = f.take(index);
    if value.is_null() {
        return Ok(None);
    }
    AmqpError::from_value(value).map(Some)
}

/// Delivery states: outcomes plus the non-terminal and transactional
/// states.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Received {
        section_number: u32,
        section_offset: u64,
    },
    Accepted,
    Rejected {
        error: Option<AmqpError>,
    },
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
    },
    Declared {
        txn_id: Bytes,
    },
    Transactional {
        txn_id: Bytes,
        outcome: Option<Box<DeliveryState>>,
    },
}

impl DeliveryState {
    /// Received is the only state that does not settle anything.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Received { .. })
    }

    pub fn rejected(error: AmqpError) -> Self {
        DeliveryState::Rejected { error: Some(error) }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Received { .. } => "received",
            DeliveryState::Accepted => "accepted",
            DeliveryState::Rejected { .. } => "rejected",
            DeliveryState::Released => "released",
            DeliveryState::Modified { .. } => "modified",
            DeliveryState::Declared { .. } => "declared",
            DeliveryState::Transactional { .. } => "transactional-state",
        }
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let (code, body) = expect_described(value, "delivery-state")?;
        Self::from_described(code, body)
    }

    fn from_described(code: u64, body: Value) -> Result<Self, DecodeError> {
        Ok(match code {
            descriptor::RECEIVED => {
                let mut f = FieldReader::new("received", body)?;
                DeliveryState::Received {
                    section_number: f.required(0, "section-number", |v| v.as_uint())?,
                    section_offset: f.required(1, "section-offset", |v| v.as_ulong())?,
                }
            }
            descriptor::ACCEPTED => DeliveryState::Accepted,
            descriptor::REJECTED => {
                let mut f = FieldReader::new("rejected", body)?;
                DeliveryState::Rejected {
                    error: optional_error(&mut f, 0)?,
                }
            }
            descriptor::RELEASED => DeliveryState::Released,
            descriptor::MODIFIED => {
                let mut f = FieldReader::new("modified", body)?;
                DeliveryState::Modified {
                    delivery_failed: f.boolean(0, "delivery-failed")?.unwrap_or(false),
                    undeliverable_here: f.boolean(1, "undeliverable-here")?.unwrap_or(false),
                }
            }
            descriptor::DECLARED => {
                let mut f = FieldReader::new("declared", body)?;
                DeliveryState::Declared {
                    txn_id: f.required(0, "txn-id", |v| v.as_binary().cloned())?,
                }
            }
            descriptor::TRANSACTIONAL_STATE => {
                let mut f = FieldReader::new("transactional-state", body)?;
                let txn_id = f.required(0, "txn-id", |v| v.as_binary().cloned())?;
                let outcome = f.take(1);
                let outcome = if outcome.is_null() {
                    None
                } else {
                    Some(Box::new(DeliveryState::from_value(outcome)?))
                };
                DeliveryState::Transactional { txn_id, outcome }
            }
            other => return Err(DecodeError::UnknownDescriptor(format!("0x{other:02x}"))),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            DeliveryState::Received {
                section_number,
                section_offset,
            } => FieldWriter::new()
                .push(*section_number)
                .push(*section_offset)
                .into_described(descriptor::RECEIVED),
            DeliveryState::Accepted => FieldWriter::new().into_described(descriptor::ACCEPTED),
            DeliveryState::Rejected { error } => FieldWriter::new()
                .push_opt(error.as_ref().map(AmqpError::to_value))
                .into_described(descriptor::REJECTED),
            DeliveryState::Released => FieldWriter::new().into_described(descriptor::RELEASED),
            DeliveryState::Modified {
                delivery_failed,
                undeliverable_here,
            } => FieldWriter::new()
                .push(*delivery_failed)
                .push(*undeliverable_here)
                .into_described(descriptor::MODIFIED),
            DeliveryState::Declared { txn_id } => FieldWriter::new()
                .push(txn_id.clone())
                .into_described(descriptor::DECLARED),
            DeliveryState::Transactional { txn_id, outcome } => FieldWriter::new()
                .push(txn_id.clone())
                .push_opt(outcome.as_ref().map(|o| o.to_value()))
                .into_described(descriptor::TRANSACTIONAL_STATE),
        }
    }
}

fn optional_state(f: &mut FieldReader, index: usize) -> Result<Option<DeliveryState>, DecodeError> {
    let value = f.take(index);
    if value.is_null() {
        return Ok(None);
    }
    DeliveryState::from_value(value).map(Some)
}

/// Source terminus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    pub address: Option<String>,
    pub durable: Option<u32>,
    pub expiry_policy: Option<Symbol>,
    pub timeout: Option<u32>,
    pub dynamic: bool,
    pub distribution_mode: Option<Symbol>,
    pub filter: Value,
    pub default_outcome: Option<DeliveryState>,
    pub outcomes: Option<Vec<Symbol>>,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Source {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// True if `outcome` was declared in the `outcomes` field.
    pub fn supports_outcome(&self, outcome: &str) -> bool {
        self.outcomes
            .as_ref()
            .is_some_and(|outcomes| outcomes.iter().any(|o| o.as_str() == outcome))
    }

    pub fn supports_rejected(&self) -> bool {
        self.supports_outcome(outcome::REJECTED)
    }

    /// Browsing (non-destructive) source.
    pub fn is_browser(&self) -> bool {
        self.distribution_mode
            .as_ref()
            .is_some_and(|mode| mode.as_str() == DISTRIBUTION_MODE_COPY)
    }

    fn from_fields(mut f: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            address: f.string(0, "address")?,
            durable: f.uint(1, "durable")?,
            expiry_policy: f.symbol(2, "expiry-policy")?,
            timeout: f.uint(3, "timeout")?,
            dynamic: f.boolean(4, "dynamic")?.unwrap_or(false),
            // 5: dynamic-node-properties is not used
            distribution_mode: f.symbol(6, "distribution-mode")?,
            filter: f.take(7),
            default_outcome: optional_state(&mut f, 8)?,
            outcomes: f.symbols(9, "outcomes")?,
            capabilities: f.symbols(10, "capabilities")?,
        })
    }

    pub fn to_value(&self) -> Value {
        FieldWriter::new()
            .push_opt(self.address.clone())
            .push_opt(self.durable)
            .push_opt(self.expiry_policy.clone())
            .push_opt(self.timeout)
            .push_opt(self.dynamic.then_some(true))
            .push(Value::Null)
            .push_opt(self.distribution_mode.clone())
            .push(self.filter.clone())
            .push_opt(self.default_outcome.as_ref().map(DeliveryState::to_value))
            .push_opt(self.outcomes.clone().map(symbol_array))
            .push_opt(self.capabilities.clone().map(symbol_array))
            .into_described(descriptor::SOURCE)
    }
}

fn symbol_array(symbols: Vec<Symbol>) -> Value {
    Value::Array(symbols.into_iter().map(Value::Symbol).collect())
}

/// Target terminus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub address: Option<String>,
    pub durable: Option<u32>,
    pub expiry_policy: Option<Symbol>,
    pub timeout: Option<u32>,
    pub dynamic: bool,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Target {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    fn from_fields(mut f: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            address: f.string(0, "address")?,
            durable: f.uint(1, "durable")?,
            expiry_policy: f.symbol(2, "expiry-policy")?,
            timeout: f.uint(3, "timeout")?,
            dynamic: f.boolean(4, "dynamic")?.unwrap_or(false),
            capabilities: f.symbols(6, "capabilities")?,
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push_opt(self.address.clone())
            .push_opt(self.durable)
            .push_opt(self.expiry_policy.clone())
            .push_opt(self.timeout)
            .push_opt(self.dynamic.then_some(true))
            .push(Value::Null)
            .push_opt(self.capabilities.clone().map(symbol_array))
            .into_described(descriptor::TARGET)
    }
}

/// Transaction coordinator target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coordinator {
    pub capabilities: Option<Vec<Symbol>>,
}

/// What an attach targets: a node, or the transaction coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
    Node(Target),
    Coordinator(Coordinator),
}

impl TargetKind {
    pub fn address(&self) -> Option<&str> {
        match self {
            TargetKind::Node(target) => target.address.as_deref(),
            TargetKind::Coordinator(_) => None,
        }
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        let (code, body) = expect_described(value, "target")?;
        match code {
            descriptor::TARGET => Ok(TargetKind::Node(Target::from_fields(FieldReader::new(
                "target", body,
            )?)?)),
            descriptor::COORDINATOR => {
                let mut f = FieldReader::new("coordinator", body)?;
                Ok(TargetKind::Coordinator(Coordinator {
                    capabilities: f.symbols(0, "capabilities")?,
                }))
            }
            other => Err(DecodeError::UnknownDescriptor(format!("0x{other:02x}"))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            TargetKind::Node(target) => target.to_value(),
            TargetKind::Coordinator(coordinator) => FieldWriter::new()
                .push_opt(coordinator.capabilities.clone().map(symbol_array))
                .into_described(descriptor::COORDINATOR),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: Option<u32>,
    pub channel_max: Option<u16>,
    pub idle_time_out: Option<u32>,
}

impl Open {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            hostname: None,
            max_frame_size: None,
            channel_max: None,
            idle_time_out: None,
        }
    }

    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            container_id: f.required(0, "container-id", |v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })?,
            hostname: f.string(1, "hostname")?,
            max_frame_size: f.uint(2, "max-frame-size")?,
            channel_max: f.ushort(3, "channel-max")?,
            idle_time_out: f.uint(4, "idle-time-out")?,
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.container_id.as_str())
            .push_opt(self.hostname.clone())
            .push_opt(self.max_frame_size)
            .push_opt(self.channel_max)
            .push_opt(self.idle_time_out)
            .into_described(descriptor::OPEN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: Option<u32>,
}

impl Begin {
    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            remote_channel: f.ushort(0, "remote-channel")?,
            next_outgoing_id: f.required(1, "next-outgoing-id", |v| v.as_uint())?,
            incoming_window: f.required(2, "incoming-window", |v| v.as_uint())?,
            outgoing_window: f.required(3, "outgoing-window", |v| v.as_uint())?,
            handle_max: f.uint(4, "handle-max")?,
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push_opt(self.remote_channel)
            .push(self.next_outgoing_id)
            .push(self.incoming_window)
            .push(self.outgoing_window)
            .push_opt(self.handle_max)
            .into_described(descriptor::BEGIN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    pub source: Option<Source>,
    pub target: Option<TargetKind>,
    pub initial_delivery_count: Option<u32>,
    pub max_message_size: Option<u64>,
}

impl Attach {
    pub fn new(name: impl Into<String>, handle: u32, role: Role) -> Self {
        Self {
            name: name.into(),
            handle,
            role,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            source: None,
            target: None,
            initial_delivery_count: None,
            max_message_size: None,
        }
    }

    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        let name = f.required(0, "name", |v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })?;
        let handle = f.required(1, "handle", |v| v.as_uint())?;
        let role = Role::from_bool(f.required(2, "role", |v| v.as_bool())?);
        let snd_settle_mode = f
            .optional(3, "snd-settle-mode", |v| {
                v.as_ubyte().and_then(SenderSettleMode::from_code)
            })?
            .unwrap_or_default();
        let rcv_settle_mode = f
            .optional(4, "rcv-settle-mode", |v| {
                v.as_ubyte().and_then(ReceiverSettleMode::from_code)
            })?
            .unwrap_or_default();

        let source = match f.take(5) {
            Value::Null => None,
            value => {
                let (code, body) = expect_described(value, "source")?;
                if code != descriptor::SOURCE {
                    return Err(DecodeError::InvalidField {
                        composite: "attach",
                        field: "source",
                    });
                }
                Some(Source::from_fields(FieldReader::new("source", body)?)?)
            }
        };
        let target = match f.take(6) {
            Value::Null => None,
            value => Some(TargetKind::from_value(value)?),
        };

        Ok(Self {
            name,
            handle,
            role,
            snd_settle_mode,
            rcv_settle_mode,
            source,
            target,
            // 7: unsettled, 8: incomplete-unsettled are not resumed
            initial_delivery_count: f.uint(9, "initial-delivery-count")?,
            max_message_size: f.ulong(10, "max-message-size")?,
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.name.as_str())
            .push(self.handle)
            .push(self.role.as_bool())
            .push(self.snd_settle_mode.code())
            .push(self.rcv_settle_mode.code())
            .push_opt(self.source.as_ref().map(Source::to_value))
            .push_opt(self.target.as_ref().map(TargetKind::to_value))
            .push(Value::Null)
            .push(Value::Null)
            .push_opt(self.initial_delivery_count)
            .push_opt(self.max_message_size)
            .into_described(descriptor::ATTACH)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
    pub available: Option<u32>,
    pub drain: bool,
    pub echo: bool,
}

impl Flow {
    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            next_incoming_id: f.uint(0, "next-incoming-id")?,
            incoming_window: f.required(1, "incoming-window", |v| v.as_uint())?,
            next_outgoing_id: f.required(2, "next-outgoing-id", |v| v.as_uint())?,
            outgoing_window: f.required(3, "outgoing-window", |v| v.as_uint())?,
            handle: f.uint(4, "handle")?,
            delivery_count: f.uint(5, "delivery-count")?,
            link_credit: f.uint(6, "link-credit")?,
            available: f.uint(7, "available")?,
            drain: f.boolean(8, "drain")?.unwrap_or(false),
            echo: f.boolean(9, "echo")?.unwrap_or(false),
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push_opt(self.next_incoming_id)
            .push(self.incoming_window)
            .push(self.next_outgoing_id)
            .push(self.outgoing_window)
            .push_opt(self.handle)
            .push_opt(self.delivery_count)
            .push_opt(self.link_credit)
            .push_opt(self.available)
            .push_opt(self.drain.then_some(true))
            .push_opt(self.echo.then_some(true))
            .into_described(descriptor::FLOW)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: Option<bool>,
    pub more: bool,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub state: Option<DeliveryState>,
    pub resume: bool,
    pub aborted: bool,
    pub batchable: bool,
}

impl Transfer {
    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            handle: f.required(0, "handle", |v| v.as_uint())?,
            delivery_id: f.uint(1, "delivery-id")?,
            delivery_tag: f.binary(2, "delivery-tag")?,
            message_format: f.uint(3, "message-format")?,
            settled: f.boolean(4, "settled")?,
            more: f.boolean(5, "more")?.unwrap_or(false),
            rcv_settle_mode: f.optional(6, "rcv-settle-mode", |v| {
                v.as_ubyte().and_then(ReceiverSettleMode::from_code)
            })?,
            state: optional_state(f, 7)?,
            resume: f.boolean(8, "resume")?.unwrap_or(false),
            aborted: f.boolean(9, "aborted")?.unwrap_or(false),
            batchable: f.boolean(10, "batchable")?.unwrap_or(false),
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.handle)
            .push_opt(self.delivery_id)
            .push_opt(self.delivery_tag.clone())
            .push_opt(self.message_format)
            .push_opt(self.settled)
            .push_opt(self.more.then_some(true))
            .push_opt(self.rcv_settle_mode.map(ReceiverSettleMode::code))
            .push_opt(self.state.as_ref().map(DeliveryState::to_value))
            .push_opt(self.resume.then_some(true))
            .push_opt(self.aborted.then_some(true))
            .push_opt(self.batchable.then_some(true))
            .into_described(descriptor::TRANSFER)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
    pub batchable: bool,
}

impl Disposition {
    /// Last delivery-id covered (inclusive).
    pub fn last_id(&self) -> u32 {
        self.last.unwrap_or(self.first)
    }

    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            role: Role::from_bool(f.required(0, "role", |v| v.as_bool())?),
            first: f.required(1, "first", |v| v.as_uint())?,
            last: f.uint(2, "last")?,
            settled: f.boolean(3, "settled")?.unwrap_or(false),
            state: optional_state(f, 4)?,
            batchable: f.boolean(5, "batchable")?.unwrap_or(false),
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.role.as_bool())
            .push(self.first)
            .push_opt(self.last)
            .push_opt(self.settled.then_some(true))
            .push_opt(self.state.as_ref().map(DeliveryState::to_value))
            .push_opt(self.batchable.then_some(true))
            .into_described(descriptor::DISPOSITION)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<AmqpError>,
}

impl Detach {
    fn decode_fields(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            handle: f.required(0, "handle", |v| v.as_uint())?,
            closed: f.boolean(1, "closed")?.unwrap_or(false),
            error: optional_error(f, 2)?,
        })
    }

    fn to_value(&self) -> Value {
        FieldWriter::new()
            .push(self.handle)
            .push_opt(self.closed.then_some(true))
            .push_opt(self.error.as_ref().map(AmqpError::to_value))
            .into_described(descriptor::DETACH)
    }
}

/// Body shared by End and Close.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct End {
    pub error: Option<AmqpError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Close {
    pub error: Option<AmqpError>,
}

/// A transport performative.
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Attach),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
}

impl Performative {
    pub fn name(&self) -> &'static str {
        match self {
            Performative::Open(_) => "open",
            Performative::Begin(_) => "begin",
            Performative::Attach(_) => "attach",
            Performative::Flow(_) => "flow",
            Performative::Transfer(_) => "transfer",
            Performative::Disposition(_) => "disposition",
            Performative::Detach(_) => "detach",
            Performative::End(_) => "end",
            Performative::Close(_) => "close",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Performative::Open(p) => p.to_value(),
            Performative::Begin(p) => p.to_value(),
            Performative::Attach(p) => p.to_value(),
            Performative::Flow(p) => p.to_value(),
            Performative::Transfer(p) => p.to_value(),
            Performative::Disposition(p) => p.to_value(),
            Performative::Detach(p) => p.to_value(),
            Performative::End(p) => FieldWriter::new()
                .push_opt(p.error.as_ref().map(AmqpError::to_value))
                .into_described(descriptor::END),
            Performative::Close(p) => FieldWriter::new()
                .push_opt(p.error.as_ref().map(AmqpError::to_value))
                .into_described(descriptor::CLOSE),
        }
    }

    pub(crate) fn decode_open(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Open::decode_fields(f).map(Performative::Open)
    }

    pub(crate) fn decode_begin(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Begin::decode_fields(f).map(Performative::Begin)
    }

    pub(crate) fn decode_attach(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Attach::decode_fields(f).map(Performative::Attach)
    }

    pub(crate) fn decode_flow(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Flow::decode_fields(f).map(Performative::Flow)
    }

    pub(crate) fn decode_transfer(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Transfer::decode_fields(f).map(Performative::Transfer)
    }

    pub(crate) fn decode_disposition(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Disposition::decode_fields(f).map(Performative::Disposition)
    }

    pub(crate) fn decode_detach(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Detach::decode_fields(f).map(Performative::Detach)
    }

    pub(crate) fn decode_end(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Performative::End(End {
            error: optional_error(f, 0)?,
        }))
    }

    pub(crate) fn decode_close(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(Performative::Close(Close {
            error: optional_error(f, 0)?,
        }))
    }
}

/// Transaction control messages carried in an amqp-value section sent to
/// the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnControl {
    Declare { global_id: Option<Value> },
    Discharge { txn_id: Bytes, fail: bool },
}

impl TxnControl {
    pub fn name(&self) -> &'static str {
        match self {
            TxnControl::Declare { .. } => "declare",
            TxnControl::Discharge { .. } => "discharge",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TxnControl::Declare { global_id } => FieldWriter::new()
                .push_opt(global_id.clone())
                .into_described(descriptor::DECLARE),
            TxnControl::Discharge { txn_id, fail } => FieldWriter::new()
                .push(txn_id.clone())
                .push_opt(fail.then_some(true))
                .into_described(descriptor::DISCHARGE),
        }
    }

    pub(crate) fn decode_declare(f: &mut FieldReader) -> Result<Self, DecodeError> {
        let global_id = f.take(0);
        Ok(TxnControl::Declare {
            global_id: (!global_id.is_null()).then_some(global_id),
        })
    }

    pub(crate) fn decode_discharge(f: &mut FieldReader) -> Result<Self, DecodeError> {
        Ok(TxnControl::Discharge {
            txn_id: f.required(0, "txn-id", |v| v.as_binary().cloned())?,
            fail: f.boolean(1, "fail")?.unwrap_or(false),
        })
    }
}
