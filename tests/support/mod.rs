//! Scripted AMQP peer for integration tests.
//!
//! A [`Peer`] drives a broker [`Connection`] directly: it encodes
//! performatives the way a client would put them on the wire, feeds the
//! bytes in and decodes everything the broker answers. Frames are queued
//! and inspected one at a time with the `expect_*` helpers.

#![allow(dead_code)]

use std::collections::VecDeque;

use amqp_broker_core::codec::Symbol;
use amqp_broker_core::protocol::{
    encode_frame, outcome, Attach, Begin, Close, Coordinator, DeliveryState, Detach, Disposition,
    End, Flow, FrameDecoder, MessageBuilder, Open, Performative, ReceiverSettleMode, Role, Source,
    Target, TargetKind, Transfer, TxnControl, PROTOCOL_HEADER,
};
use amqp_broker_core::session::Session;
use amqp_broker_core::{Broker, Connection, ErrorCondition};
use bytes::{Bytes, BytesMut};

pub const CHANNEL: u16 = 0;

/// One frame sent by the broker.
#[derive(Debug, Clone)]
pub struct Received {
    pub channel: u16,
    pub performative: Performative,
    pub payload: Bytes,
}

pub struct Peer {
    connection: Connection,
    decoder: FrameDecoder,
    buffer: BytesMut,
    received: VecDeque<Received>,
    header_seen: bool,
}

impl Peer {
    /// Exchange protocol headers and Open.
    pub fn connect(broker: &Broker) -> Self {
        let mut peer = Self {
            connection: broker.connection(),
            decoder: FrameDecoder::new(),
            buffer: BytesMut::new(),
            received: VecDeque::new(),
            header_seen: false,
        };
        peer.feed(&PROTOCOL_HEADER);
        peer.send(0, Performative::Open(Open::new("test-peer")));
        match peer.next() {
            Performative::Open(_) => {}
            other => panic!("expected open, got {other:?}"),
        }
        peer
    }

    /// Connect and begin a session on [`CHANNEL`].
    pub fn session(broker: &Broker) -> Self {
        let mut peer = Self::connect(broker);
        peer.send(
            CHANNEL,
            Performative::Begin(Begin {
                remote_channel: None,
                next_outgoing_id: 0,
                incoming_window: 2048,
                outgoing_window: 2048,
                handle_max: None,
            }),
        );
        match peer.next() {
            Performative::Begin(_) => {}
            other => panic!("expected begin, got {other:?}"),
        }
        peer
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Run `f` against the broker session on [`CHANNEL`], then collect
    /// whatever it sent.
    pub fn with_session<R>(&mut self, f: impl FnOnce(&mut Session) -> R) -> R {
        let session = self
            .connection
            .session_mut(CHANNEL)
            .unwrap_or_else(|| panic!("no session on channel {CHANNEL}"));
        let result = f(session);
        self.collect();
        result
    }

    /// Feed raw bytes to the broker.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.connection.feed(bytes);
        self.collect();
    }

    pub fn send(&mut self, channel: u16, performative: Performative) {
        let wire = encode(channel, &performative, None);
        self.feed(&wire);
    }

    pub fn send_payload(&mut self, channel: u16, performative: Performative, payload: Bytes) {
        let wire = encode(channel, &performative, Some(&payload));
        self.feed(&wire);
    }

    /// Send a complete single-frame message.
    pub fn transfer(&mut self, transfer: Transfer, payload: Bytes) {
        self.send_payload(CHANNEL, Performative::Transfer(transfer), payload);
    }

    fn collect(&mut self) {
        for part in self.connection.take_output() {
            self.buffer.extend_from_slice(&part);
        }
        if !self.header_seen && self.buffer.len() >= PROTOCOL_HEADER.len() {
            assert_eq!(&self.buffer[..PROTOCOL_HEADER.len()], &PROTOCOL_HEADER);
            let _ = self.buffer.split_to(PROTOCOL_HEADER.len());
            self.header_seen = true;
        }
        loop {
            let bytes = self.buffer.clone().freeze();
            match self.decoder.decode(&bytes) {
                Ok(frame) => {
                    let _ = self.buffer.split_to(frame.consumed);
                    if let Some(performative) = frame.performative {
                        self.received.push_back(Received {
                            channel: frame.channel,
                            performative,
                            payload: frame.payload,
                        });
                    }
                }
                Err(err) if err.is_insufficient() => break,
                Err(err) => panic!("broker sent an undecodable frame: {err}"),
            }
        }
    }

    /// Next frame from the broker, with its payload.
    pub fn next_frame(&mut self) -> Received {
        self.received
            .pop_front()
            .unwrap_or_else(|| panic!("broker sent nothing more"))
    }

    pub fn next(&mut self) -> Performative {
        self.next_frame().performative
    }

    /// Frames not yet inspected.
    pub fn pending(&self) -> usize {
        self.received.len()
    }

    pub fn drain(&mut self) -> Vec<Performative> {
        self.received.drain(..).map(|r| r.performative).collect()
    }

    pub fn expect_attach(&mut self) -> Attach {
        match self.next() {
            Performative::Attach(attach) => attach,
            other => panic!("expected attach, got {other:?}"),
        }
    }

    pub fn expect_flow(&mut self) -> Flow {
        match self.next() {
            Performative::Flow(flow) => flow,
            other => panic!("expected flow, got {other:?}"),
        }
    }

    pub fn expect_transfer(&mut self) -> (Transfer, Bytes) {
        let frame = self.next_frame();
        match frame.performative {
            Performative::Transfer(transfer) => (transfer, frame.payload),
            other => panic!("expected transfer, got {other:?}"),
        }
    }

    pub fn expect_disposition(&mut self) -> Disposition {
        match self.next() {
            Performative::Disposition(disposition) => disposition,
            other => panic!("expected disposition, got {other:?}"),
        }
    }

    pub fn expect_detach(&mut self) -> Detach {
        match self.next() {
            Performative::Detach(detach) => detach,
            other => panic!("expected detach, got {other:?}"),
        }
    }

    pub fn expect_end(&mut self) -> End {
        match self.next() {
            Performative::End(end) => end,
            other => panic!("expected end, got {other:?}"),
        }
    }

    pub fn expect_close(&mut self) -> Close {
        match self.next() {
            Performative::Close(close) => close,
            other => panic!("expected close, got {other:?}"),
        }
    }

    /// Attach a link on which the peer sends to `address`. Consumes the
    /// broker's Attach and initial Flow; returns the granted credit.
    pub fn attach_sender(&mut self, handle: u32, address: &str, mode: ReceiverSettleMode) -> u32 {
        let mut attach = Attach::new(format!("sender-{handle}"), handle, Role::Sender);
        attach.rcv_settle_mode = mode;
        attach.source = Some(rejecting_source(None));
        attach.target = Some(TargetKind::Node(Target::with_address(address)));
        self.send(CHANNEL, Performative::Attach(attach));
        self.expect_attach();
        self.expect_flow().link_credit.unwrap_or(0)
    }

    /// Attach a link on which the broker sends from `source`. Consumes
    /// the broker's Attach.
    pub fn attach_receiver(&mut self, handle: u32, source: Source) -> Attach {
        let mut attach = Attach::new(format!("receiver-{handle}"), handle, Role::Receiver);
        attach.source = Some(source);
        attach.target = Some(TargetKind::Node(Target::default()));
        self.send(CHANNEL, Performative::Attach(attach));
        self.expect_attach()
    }

    /// Grant credit on a receiving link.
    pub fn flow(&mut self, handle: u32, delivery_count: u32, credit: u32) {
        self.send(
            CHANNEL,
            Performative::Flow(Flow {
                next_incoming_id: Some(0),
                incoming_window: 2048,
                next_outgoing_id: 0,
                outgoing_window: 2048,
                handle: Some(handle),
                delivery_count: Some(delivery_count),
                link_credit: Some(credit),
                ..Flow::default()
            }),
        );
    }

    /// Settle deliveries `first..=last` with `state`.
    pub fn dispose(&mut self, first: u32, last: u32, state: DeliveryState) {
        self.send(
            CHANNEL,
            Performative::Disposition(Disposition {
                role: Role::Receiver,
                first,
                last: Some(last),
                settled: true,
                state: Some(state),
                batchable: false,
            }),
        );
    }

    /// Attach a coordinator link. `rejected` controls whether the source
    /// declares the rejected outcome.
    pub fn attach_coordinator(&mut self, handle: u32, rejected: bool) {
        let mut attach = Attach::new("txn-ctrl", handle, Role::Sender);
        attach.source = Some(if rejected {
            rejecting_source(None)
        } else {
            Source::default()
        });
        attach.target = Some(TargetKind::Coordinator(Coordinator::default()));
        self.send(CHANNEL, Performative::Attach(attach));
        self.expect_attach();
        self.expect_flow();
    }

    /// Declare a transaction and return its id.
    pub fn declare(&mut self, handle: u32, delivery_id: u32) -> Bytes {
        let control = TxnControl::Declare { global_id: None };
        self.transfer(
            transfer(handle, delivery_id, false),
            MessageBuilder::new().value(control.to_value()).build(),
        );
        match self.expect_disposition().state {
            Some(DeliveryState::Declared { txn_id }) => txn_id,
            other => panic!("expected declared, got {other:?}"),
        }
    }

    /// Send a Discharge. The broker's answer is left queued.
    pub fn discharge(&mut self, handle: u32, delivery_id: u32, txn_id: Bytes, fail: bool) {
        let control = TxnControl::Discharge { txn_id, fail };
        self.transfer(
            transfer(handle, delivery_id, false),
            MessageBuilder::new().value(control.to_value()).build(),
        );
    }
}

pub fn encode(channel: u16, performative: &Performative, payload: Option<&Bytes>) -> Vec<u8> {
    encode_frame(channel, performative, payload)
        .iter()
        .flat_map(|part| part.iter().copied())
        .collect()
}

/// A source that declares the outcomes a Qpid-style client supports.
pub fn rejecting_source(address: Option<&str>) -> Source {
    Source {
        address: address.map(str::to_string),
        outcomes: Some(vec![
            Symbol::from(outcome::ACCEPTED),
            Symbol::from(outcome::REJECTED),
        ]),
        ..Source::default()
    }
}

pub fn transfer(handle: u32, delivery_id: u32, settled: bool) -> Transfer {
    Transfer {
        handle,
        delivery_id: Some(delivery_id),
        delivery_tag: Some(Bytes::copy_from_slice(&delivery_id.to_be_bytes())),
        message_format: Some(0),
        settled: Some(settled),
        ..Transfer::default()
    }
}

pub fn message(text: &str) -> Bytes {
    MessageBuilder::new().data(text.as_bytes().to_vec()).build()
}

pub fn assert_condition(error: Option<&amqp_broker_core::AmqpError>, condition: ErrorCondition) {
    match error {
        Some(error) => assert!(
            error.is(condition),
            "expected {condition}, got {error}"
        ),
        None => panic!("expected {condition}, got no error"),
    }
}

pub fn detach(handle: u32) -> Performative {
    Performative::Detach(Detach {
        handle,
        closed: true,
        error: None,
    })
}
