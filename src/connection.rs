//! Connection processing context.
//!
//! A [`Connection`] is sans-IO: the driver feeds it the bytes read from the
//! transport with [`Connection::feed`] and writes whatever
//! [`Connection::take_output`] returns. Frames are processed strictly in
//! arrival order.
//!
//! # Lifecycle
//!
//! ```text
//! AwaitingHeader ──header──► AwaitingOpen ──Open──► Opened ──Close──► Closed
//!        │                                             │
//!        └── unsupported header: reply header ─────────┴── error: Close(error)
//! ```
//!
//! Sessions are keyed by the peer's channel. Our reply channel is the
//! lowest free local channel.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::config::BrokerConfig;
use crate::error::{AmqpError, BrokerError, ErrorCondition, Result};
use crate::protocol::{
    encode_frame, Begin, Close, End, FrameBuffer, FrameDecoder, Open, Performative,
    MIN_MAX_FRAME_SIZE, PROTOCOL_HEADER,
};
use crate::queue::QueueRegistry;
use crate::session::{Session, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the 8-byte protocol header.
    AwaitingHeader,
    /// Header exchanged, waiting for the peer's Open.
    AwaitingOpen,
    Opened,
    /// Close sent; the transport should be shut down once output is written.
    Closed,
}

struct Channel {
    local: u16,
    session: Session,
}

pub struct Connection {
    config: BrokerConfig,
    queues: QueueRegistry,
    state: ConnectionState,
    header: Vec<u8>,
    frames: FrameBuffer,
    decoder: FrameDecoder,
    /// Largest frame the peer accepts.
    remote_max_frame_size: u32,
    channel_max: u16,
    remote_container_id: Option<String>,
    /// By remote channel.
    channels: BTreeMap<u16, Channel>,
    output: Vec<Bytes>,
}

impl Connection {
    pub fn new(config: BrokerConfig, queues: QueueRegistry) -> Self {
        Self {
            frames: FrameBuffer::with_max_frame_size(config.max_frame_size),
            remote_max_frame_size: config.max_frame_size,
            channel_max: config.channel_max,
            config,
            queues,
            state: ConnectionState::AwaitingHeader,
            header: Vec::with_capacity(PROTOCOL_HEADER.len()),
            decoder: FrameDecoder::new(),
            remote_container_id: None,
            channels: BTreeMap::new(),
            output: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once Close was sent or the header was refused.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn remote_container_id(&self) -> Option<&str> {
        self.remote_container_id.as_deref()
    }

    /// Negotiated outgoing frame size limit.
    pub fn max_frame_size(&self) -> u32 {
        self.remote_max_frame_size
    }

    pub fn session_count(&self) -> usize {
        self.channels.len()
    }

    /// The session the peer began on `channel`.
    pub fn session(&self, channel: u16) -> Option<&Session> {
        self.channels.get(&channel).map(|c| &c.session)
    }

    pub fn session_mut(&mut self, channel: u16) -> Option<&mut Session> {
        self.channels.get_mut(&channel).map(|c| &mut c.session)
    }

    /// Process bytes read from the transport.
    ///
    /// Protocol errors never escape: they are answered on the wire with
    /// End or Close. Input after Close is ignored.
    pub fn feed(&mut self, mut data: &[u8]) {
        if self.state == ConnectionState::AwaitingHeader {
            let want = PROTOCOL_HEADER.len() - self.header.len();
            let take = want.min(data.len());
            self.header.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.header.len() < PROTOCOL_HEADER.len() {
                return;
            }
            self.output.push(Bytes::from_static(&PROTOCOL_HEADER));
            if self.header != PROTOCOL_HEADER {
                tracing::warn!(header = ?self.header, "unsupported protocol header");
                self.state = ConnectionState::Closed;
                return;
            }
            self.state = ConnectionState::AwaitingOpen;
        }
        if self.is_closed() || data.is_empty() {
            return;
        }

        let frames = match self.frames.push(data) {
            Ok(frames) => frames,
            Err(err) => {
                self.fail(None, err);
                return;
            }
        };
        for frame in frames {
            if self.is_closed() {
                break;
            }
            if frame.is_heartbeat() {
                tracing::trace!("heartbeat");
                continue;
            }
            let channel = frame.channel();
            let result = self
                .decoder
                .decode_body(&frame.body)
                .map_err(BrokerError::from)
                .and_then(|(performative, payload)| {
                    tracing::trace!(channel, performative = performative.name(), "received");
                    self.process(channel, performative, payload)
                });
            if let Err(err) = result {
                self.fail(Some(channel), err);
            }
        }
        self.pump();
    }

    /// Send whatever queued messages link credit allows, on every session.
    /// Called after each batch of input, and by the driver when queue
    /// activity is signalled.
    pub fn pump(&mut self) {
        if self.state != ConnectionState::Opened {
            return;
        }
        let channels: Vec<u16> = self.channels.keys().copied().collect();
        for channel in channels {
            let result = match self.channels.get_mut(&channel) {
                Some(slot) => slot.session.pump_all(),
                None => continue,
            };
            if let Err(err) = result {
                self.fail(Some(channel), err);
            }
        }
        self.collect_session_output();
    }

    /// Encoded bytes to write, in order.
    pub fn take_output(&mut self) -> Vec<Bytes> {
        self.collect_session_output();
        std::mem::take(&mut self.output)
    }

    /// The transport went away: release everything the sessions hold.
    pub fn shutdown(&mut self) {
        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.session.end();
        }
        self.state = ConnectionState::Closed;
    }

    fn process(&mut self, channel: u16, performative: Performative, payload: Bytes) -> Result<()> {
        match (self.state, performative) {
            (ConnectionState::AwaitingOpen, Performative::Open(open)) => self.on_open(open),
            (ConnectionState::AwaitingOpen, other) => Err(BrokerError::connection(
                ErrorCondition::IllegalState,
                format!("expected open, received {}", other.name()),
            )),
            (_, Performative::Open(_)) => Err(BrokerError::connection(
                ErrorCondition::IllegalState,
                "connection is already open",
            )),
            (_, Performative::Close(close)) => {
                self.on_close(close);
                Ok(())
            }
            (_, Performative::Begin(begin)) => self.on_begin(channel, begin),
            (_, Performative::End(end)) => self.on_end(channel, end),
            (_, other) => {
                let slot = self.channels.get_mut(&channel).ok_or_else(|| {
                    BrokerError::connection(
                        ErrorCondition::IllegalState,
                        format!("{} on channel {channel} with no session", other.name()),
                    )
                })?;
                slot.session.handle(other, payload)
            }
        }
    }

    fn on_open(&mut self, open: Open) -> Result<()> {
        self.remote_max_frame_size = open
            .max_frame_size
            .unwrap_or(u32::MAX)
            .min(self.config.max_frame_size)
            .max(MIN_MAX_FRAME_SIZE);
        self.channel_max = open
            .channel_max
            .unwrap_or(u16::MAX)
            .min(self.config.channel_max);
        tracing::debug!(
            container_id = %open.container_id,
            max_frame_size = self.remote_max_frame_size,
            channel_max = self.channel_max,
            "connection opened"
        );
        self.remote_container_id = Some(open.container_id);

        let reply = Open {
            max_frame_size: Some(self.config.max_frame_size),
            channel_max: Some(self.channel_max),
            ..Open::new(self.config.container_id.clone())
        };
        self.send(0, &Performative::Open(reply), None);
        self.state = ConnectionState::Opened;
        Ok(())
    }

    fn on_close(&mut self, close: Close) {
        match &close.error {
            Some(error) => tracing::warn!(%error, "peer closed the connection with an error"),
            None => tracing::debug!("peer closed the connection"),
        }
        self.close(None);
    }

    fn on_begin(&mut self, channel: u16, begin: Begin) -> Result<()> {
        if self.channels.contains_key(&channel) {
            return Err(BrokerError::connection(
                ErrorCondition::IllegalState,
                format!("channel {channel} already has a session"),
            ));
        }
        if channel > self.channel_max {
            return Err(BrokerError::connection(
                ErrorCondition::FramingError,
                format!("channel {channel} exceeds channel-max {}", self.channel_max),
            ));
        }

        let local = self.free_channel();
        let config = SessionConfig {
            max_frame_size: self.remote_max_frame_size,
            ..SessionConfig::from_broker(&self.config)
        };
        let session = Session::new(&begin, config, self.queues.clone());
        let reply = session.local_begin(channel);
        self.send(local, &Performative::Begin(reply), None);
        self.channels.insert(channel, Channel { local, session });
        tracing::debug!(channel, local, "session begun");
        Ok(())
    }

    fn on_end(&mut self, channel: u16, end: End) -> Result<()> {
        let Some(mut slot) = self.channels.remove(&channel) else {
            return Err(BrokerError::connection(
                ErrorCondition::IllegalState,
                format!("end on channel {channel} with no session"),
            ));
        };
        if let Some(error) = &end.error {
            tracing::warn!(channel, %error, "peer ended the session with an error");
        }
        slot.session.end();
        self.flush_session(slot.local, &mut slot.session);
        self.send(slot.local, &Performative::End(End::default()), None);
        tracing::debug!(channel, "session ended");
        Ok(())
    }

    /// Report an error at the scope it belongs to.
    fn fail(&mut self, channel: Option<u16>, err: BrokerError) {
        match err {
            BrokerError::Session(error) => match channel {
                Some(channel) => self.end_session(channel, error),
                None => self.close(Some(error)),
            },
            BrokerError::Connection(error) => self.close(Some(error)),
            BrokerError::Decode(err) => {
                self.close(Some(AmqpError::new(ErrorCondition::DecodeError, err.to_string())))
            }
            other => self.close(Some(AmqpError::new(
                ErrorCondition::InternalError,
                other.to_string(),
            ))),
        }
    }

    fn end_session(&mut self, channel: u16, error: AmqpError) {
        let Some(mut slot) = self.channels.remove(&channel) else {
            self.close(Some(error));
            return;
        };
        tracing::warn!(channel, %error, "ending session");
        slot.session.end();
        self.flush_session(slot.local, &mut slot.session);
        self.send(slot.local, &Performative::End(End { error: Some(error) }), None);
    }

    /// End every session and send Close.
    fn close(&mut self, error: Option<AmqpError>) {
        if self.is_closed() {
            return;
        }
        if let Some(error) = &error {
            tracing::warn!(%error, "closing connection");
        }
        self.collect_session_output();
        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.session.end();
        }
        self.send(0, &Performative::Close(Close { error }), None);
        self.state = ConnectionState::Closed;
    }

    fn free_channel(&self) -> u16 {
        let mut used: Vec<u16> = self.channels.values().map(|c| c.local).collect();
        used.sort_unstable();
        let mut local = 0;
        for channel in used {
            if channel != local {
                break;
            }
            local += 1;
        }
        local
    }

    fn collect_session_output(&mut self) {
        let mut output = Vec::new();
        for channel in self.channels.values_mut() {
            for outgoing in channel.session.take_output() {
                output.extend(encode_frame(
                    channel.local,
                    &outgoing.performative,
                    outgoing.payload.as_ref(),
                ));
            }
        }
        self.output.extend(output);
    }

    fn flush_session(&mut self, local: u16, session: &mut Session) {
        for outgoing in session.take_output() {
            self.send(local, &outgoing.performative, outgoing.payload.as_ref());
        }
    }

    fn send(&mut self, channel: u16, performative: &Performative, payload: Option<&Bytes>) {
        tracing::trace!(channel, performative = performative.name(), "sending");
        self.output
            .extend(encode_frame(channel, performative, payload));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
