//! Broker configuration.
//!
//! Loaded from JSON (camelCase keys) or built in code through
//! [`BrokerBuilder`](crate::server::BrokerBuilder). Every field has a
//! default, so `{}` is a valid configuration.
//!
//! ```json
//! {
//!   "containerId": "broker",
//!   "maxFrameSize": 65536,
//!   "queues": [
//!     { "name": "orders", "maximumDeliveryAttempts": 2,
//!       "alternateBinding": { "destination": "orders.dlq" } },
//!     { "name": "orders.dlq" }
//!   ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, MIN_MAX_FRAME_SIZE};

/// Default session incoming window, in transfer frames.
pub const DEFAULT_SESSION_WINDOW: u32 = 2048;

/// Default link credit issued to senders.
pub const DEFAULT_LINK_CREDIT: u32 = 100;

/// Where exhausted messages of a queue go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateBinding {
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub name: String,
    /// 0 means unlimited.
    #[serde(default)]
    pub maximum_delivery_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_binding: Option<AlternateBinding>,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maximum_delivery_attempts: 0,
            alternate_binding: None,
        }
    }

    pub fn maximum_delivery_attempts(mut self, attempts: u32) -> Self {
        self.maximum_delivery_attempts = attempts;
        self
    }

    pub fn alternate(mut self, destination: impl Into<String>) -> Self {
        self.alternate_binding = Some(AlternateBinding {
            destination: destination.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Container id sent in our Open.
    pub container_id: String,
    /// Largest frame we accept, header included.
    pub max_frame_size: u32,
    /// Highest channel number a peer may use.
    pub channel_max: u16,
    /// Incoming window advertised in Begin, in transfer frames.
    pub session_incoming_window: u32,
    /// Credit issued on each receiving link, topped up at half.
    pub link_credit: u32,
    /// Largest message accepted on a link. 0 means unlimited.
    pub max_message_size: u64,
    /// Whether durable messages can be accepted.
    pub persistence: bool,
    pub queues: Vec<QueueConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            container_id: "amqp-broker".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: u16::MAX,
            session_incoming_window: DEFAULT_SESSION_WINDOW,
            link_credit: DEFAULT_LINK_CREDIT,
            max_message_size: 0,
            persistence: false,
            queues: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(BrokerError::Config(format!(
                "maxFrameSize {} is below the minimum {}",
                self.max_frame_size, MIN_MAX_FRAME_SIZE
            )));
        }
        if self.session_incoming_window == 0 {
            return Err(BrokerError::Config(
                "sessionIncomingWindow must be positive".to_string(),
            ));
        }
        if self.link_credit == 0 {
            return Err(BrokerError::Config("linkCredit must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for queue in &self.queues {
            if !names.insert(queue.name.as_str()) {
                return Err(BrokerError::Config(format!(
                    "queue '{}' is declared twice",
                    queue.name
                )));
            }
        }
        for queue in &self.queues {
            if let Some(binding) = &queue.alternate_binding {
                if !names.contains(binding.destination.as_str()) {
                    return Err(BrokerError::Config(format!(
                        "queue '{}' has unknown alternate '{}'",
                        queue.name, binding.destination
                    )));
                }
            }
        }
        Ok(())
    }
}
