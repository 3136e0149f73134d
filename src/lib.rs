//! # amqp-broker-core
//!
//! Protocol core of an AMQP 1.0 message broker: framing and the
//! described-type codec, link and session state machines, transactions
//! and the redelivery/dead-letter policy of the queues behind them.
//!
//! ## Architecture
//!
//! - **Codec**: AMQP 1.0 primitive values and the legacy short string
//! - **Protocol**: frame header, performatives, frame encode/decode
//! - **Connection / Session / Link**: sans-IO processing context; bytes in,
//!   encoded frames out
//! - **Queue / Txn**: in-memory transactional queues with redelivery limits
//! - **Server**: tokio driver with a dedicated writer task per connection
//!
//! ## Example
//!
//! ```no_run
//! use amqp_broker_core::{serve_connection, Broker, QueueConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::builder()
//!         .queue(QueueConfig::new("work"))
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5672").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let broker = broker.clone();
//!         tokio::spawn(async move { serve_connection(stream, &broker).await });
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod txn;
pub mod writer;

pub use config::{AlternateBinding, BrokerConfig, QueueConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{AmqpError, BrokerError, DecodeError, ErrorCondition};
pub use server::{serve_connection, Broker, BrokerBuilder};
