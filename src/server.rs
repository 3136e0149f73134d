//! Broker builder and connection driver.
//!
//! The [`BrokerBuilder`] provides a fluent API for configuring the broker
//! and its queues. A [`Broker`] serves each transport with
//! [`serve_connection`]:
//! 1. Split the stream and spawn the writer task
//! 2. Read bytes and feed them to the connection, or pump consumers when
//!    a queue signals new messages
//! 3. Send whatever the connection produced
//! 4. After Close (or EOF), flush queued frames and shut the transport down
//!
//! # Example
//!
//! ```no_run
//! use amqp_broker_core::config::QueueConfig;
//! use amqp_broker_core::server::Broker;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::builder()
//!         .container_id("example")
//!         .queue(QueueConfig::new("orders").maximum_delivery_attempts(3).alternate("orders.dlq"))
//!         .queue(QueueConfig::new("orders.dlq"))
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5672").await?;
//!     broker.listen(listener).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::{BrokerConfig, QueueConfig};
use crate::connection::Connection;
use crate::error::{BrokerError, Result};
use crate::queue::{Queue, QueueRegistry};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and creating a [`Broker`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    writer_config: WriterConfig,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self::from_config(BrokerConfig::default())
    }

    /// Start from a loaded configuration, e.g. [`BrokerConfig::from_json`].
    pub fn from_config(config: BrokerConfig) -> Self {
        Self {
            config,
            writer_config: WriterConfig::default(),
        }
    }

    pub fn container_id(mut self, container_id: impl Into<String>) -> Self {
        self.config.container_id = container_id.into();
        self
    }

    /// Largest frame accepted from peers. Outgoing frames use the smaller
    /// of this and the peer's limit.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.config.channel_max = channel_max;
        self
    }

    pub fn session_incoming_window(mut self, window: u32) -> Self {
        self.config.session_incoming_window = window;
        self
    }

    /// Credit granted to each link the peer sends on.
    pub fn link_credit(mut self, credit: u32) -> Self {
        self.config.link_credit = credit;
        self
    }

    /// Largest message accepted on incoming links. 0 means unlimited.
    pub fn max_message_size(mut self, size: u64) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Whether durable messages may be accepted.
    pub fn persistence(mut self, enabled: bool) -> Self {
        self.config.persistence = enabled;
        self
    }

    /// Declare a queue.
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queues.push(queue);
        self
    }

    /// Outbound frames buffered per connection before reads pause.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Validate the configuration and create the queues.
    pub fn build(self) -> Result<Broker> {
        self.config.validate()?;
        let queues = QueueRegistry::from_config(&self.config.queues)?;
        Ok(Broker {
            config: Arc::new(self.config),
            writer_config: self.writer_config,
            queues,
        })
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured broker. Cheap to clone; clones share the queues.
#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    writer_config: WriterConfig,
    queues: QueueRegistry,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name)
    }

    /// A fresh connection processing context sharing this broker's queues.
    pub fn connection(&self) -> Connection {
        Connection::new((*self.config).clone(), self.queues.clone())
    }

    /// Accept connections until the listener fails. Each connection runs
    /// on its own task.
    pub async fn listen(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");
            let broker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, &broker).await {
                    tracing::error!(%peer, "connection error: {}", e);
                }
            });
        }
    }
}

/// Serve one transport until either side closes it.
///
/// Frames are processed in arrival order by a single [`Connection`].
/// Frames already queued for the peer are written before the transport
/// is shut down.
pub async fn serve_connection<S>(stream: S, broker: &Broker) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, broker.writer_config.clone());
    let mut connection = broker.connection();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut activity = broker.queues.subscribe();

    let result = loop {
        if connection.is_closed() {
            break Ok(());
        }
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("peer disconnected");
                    break Ok(());
                }
                Ok(n) => connection.feed(&buf[..n]),
                Err(e) => break Err(BrokerError::Io(e)),
            },
            // Messages became available somewhere: idle consumers may resume.
            Ok(()) = activity.changed() => {
                activity.borrow_and_update();
                connection.pump();
            }
        }

        let output = connection.take_output();
        if output.is_empty() {
            continue;
        }
        if let Err(e) = writer.send(OutboundFrame::new(output)).await {
            break Err(e);
        }
    };

    connection.shutdown();
    drop(writer);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("writer error: {}", e),
        Err(e) => tracing::error!("writer task failed: {}", e),
    }
    result
}
