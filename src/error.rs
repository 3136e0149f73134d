//! Error types for the broker core.
//!
//! Three layers:
//! - [`DecodeError`] - malformed or truncated bytes. `InsufficientData` is a
//!   suspension signal, not a failure.
//! - [`AmqpError`] - the `error` type carried on the wire by Close, End,
//!   Detach and the rejected outcome.
//! - [`BrokerError`] - crate error, tagged with the scope it must be
//!   reported at (connection, session or link).

use std::fmt;

use thiserror::Error;

use crate::codec::Symbol;

/// Failure to decode bytes into a typed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer ended before the value was complete. Await more bytes.
    #[error("insufficient data: {needed} more byte(s) required")]
    InsufficientData { needed: usize },

    /// Described type whose descriptor has no registered codec.
    #[error("unknown performative: {0}")]
    UnknownPerformative(String),

    /// Described value inside a performative with an unexpected descriptor.
    #[error("unknown descriptor: {0}")]
    UnknownDescriptor(String),

    /// Constructor byte is not a supported format code.
    #[error("invalid format code 0x{0:02x}")]
    InvalidFormatCode(u8),

    /// A mandatory field of a composite type was absent or null.
    #[error("{composite}: mandatory field '{field}' is missing")]
    MissingField {
        composite: &'static str,
        field: &'static str,
    },

    /// A field was present but of the wrong type or out of range.
    #[error("{composite}: field '{field}' is invalid")]
    InvalidField {
        composite: &'static str,
        field: &'static str,
    },

    /// Short string declared or supplied with more than 255 octets.
    #[error("short string of {0} octets exceeds 255")]
    ShortStringTooLong(usize),

    /// Anything else that cannot be a valid encoding.
    #[error("malformed: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// True if the caller should wait for more bytes rather than abort.
    #[inline]
    pub fn is_insufficient(&self) -> bool {
        matches!(self, DecodeError::InsufficientData { .. })
    }
}

/// Symbolic error conditions used by this broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    DecodeError,
    InvalidField,
    IllegalState,
    NotFound,
    NotImplemented,
    PreconditionFailed,
    InternalError,
    ResourceLimitExceeded,
    FramingError,
    UnattachedHandle,
    HandleInUse,
    WindowViolation,
    MessageSizeExceeded,
    TransferLimitExceeded,
    DetachForced,
    UnknownId,
    TransactionRollback,
}

impl ErrorCondition {
    /// The wire symbol for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCondition::DecodeError => "amqp:decode-error",
            ErrorCondition::InvalidField => "amqp:invalid-field",
            ErrorCondition::IllegalState => "amqp:illegal-state",
            ErrorCondition::NotFound => "amqp:not-found",
            ErrorCondition::NotImplemented => "amqp:not-implemented",
            ErrorCondition::PreconditionFailed => "amqp:precondition-failed",
            ErrorCondition::InternalError => "amqp:internal-error",
            ErrorCondition::ResourceLimitExceeded => "amqp:resource-limit-exceeded",
            ErrorCondition::FramingError => "amqp:connection:framing-error",
            ErrorCondition::UnattachedHandle => "amqp:session:unattached-handle",
            ErrorCondition::HandleInUse => "amqp:session:handle-in-use",
            ErrorCondition::WindowViolation => "amqp:session:window-violation",
            ErrorCondition::MessageSizeExceeded => "amqp:link:message-size-exceeded",
            ErrorCondition::TransferLimitExceeded => "amqp:link:transfer-limit-exceeded",
            ErrorCondition::DetachForced => "amqp:link:detach-forced",
            ErrorCondition::UnknownId => "amqp:transaction:unknown-id",
            ErrorCondition::TransactionRollback => "amqp:transaction:rollback",
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::from(self.as_str())
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The AMQP `error` composite: a condition symbol plus optional description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpError {
    pub condition: Symbol,
    pub description: Option<String>,
}

impl AmqpError {
    pub fn new(condition: ErrorCondition, description: impl Into<String>) -> Self {
        Self {
            condition: condition.symbol(),
            description: Some(description.into()),
        }
    }

    /// Error with a condition only.
    pub fn bare(condition: ErrorCondition) -> Self {
        Self {
            condition: condition.symbol(),
            description: None,
        }
    }

    /// Check the condition symbol.
    #[inline]
    pub fn is(&self, condition: ErrorCondition) -> bool {
        self.condition.as_str() == condition.as_str()
    }
}

impl fmt::Display for AmqpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.condition, description),
            None => write!(f, "{}", self.condition),
        }
    }
}

/// Main error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed bytes. Reported to the peer as Close(`amqp:decode-error`).
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Fatal to the connection: reported with Close.
    #[error("connection error: {0}")]
    Connection(AmqpError),

    /// Fatal to the session: reported with End.
    #[error("session error: {0}")]
    Session(AmqpError),

    /// Fatal to one link: reported with Detach(closed = true).
    #[error("link {handle} error: {error}")]
    Link { handle: u32, error: AmqpError },

    /// Attempted to send on a link with no credit.
    #[error("link {handle} has no credit")]
    NoCredit { handle: u32 },

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl BrokerError {
    pub fn connection(condition: ErrorCondition, description: impl Into<String>) -> Self {
        BrokerError::Connection(AmqpError::new(condition, description))
    }

    pub fn session(condition: ErrorCondition, description: impl Into<String>) -> Self {
        BrokerError::Session(AmqpError::new(condition, description))
    }

    pub fn link(handle: u32, condition: ErrorCondition, description: impl Into<String>) -> Self {
        BrokerError::Link {
            handle,
            error: AmqpError::new(condition, description),
        }
    }
}

/// Result type alias using BrokerError.
pub type Result<T> = std::result::Result<T, BrokerError>;
