//! Session engine.
//!
//! A session owns its link endpoints, the transfer windows, the
//! transactions it declared and every delivery still unsettled on it.
//! The connection routes performatives for the session's channel into
//! [`Session::handle`] and collects the replies from
//! [`Session::take_output`].
//!
//! Errors are reported at the narrowest scope that covers them:
//! link errors detach the link here, session and connection errors are
//! returned to the connection, which answers with End or Close.
//!
//! Windows count Transfer frames. Delivery ids are assigned by the
//! sending side and are independent of the transfer ids.

mod assembler;
mod disposition;
mod receiver;
mod sender;

pub use assembler::DeliveryAssembly;
pub use disposition::{coalesce, DispositionBatcher};

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::BrokerConfig;
use crate::error::{AmqpError, BrokerError, ErrorCondition, Result};
use crate::link::Link;
use crate::protocol::{
    Attach, Begin, DescribedTypeRegistry, Detach, Flow, Performative, Role, Source, TargetKind,
    TxnControl,
};
use crate::queue::{Browser, Queue, QueueRegistry, ReleaseOutcome};
use crate::txn::TransactionRegistry;

/// Outgoing window we advertise. Outgoing transfers are bounded by the
/// peer's incoming window and link credit instead.
const OUTGOING_WINDOW: u32 = u32::MAX;

/// Per-session limits, derived from the broker configuration and the
/// negotiated frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub incoming_window: u32,
    pub link_credit: u32,
    /// 0 means unlimited.
    pub max_message_size: u64,
    pub persistence: bool,
    /// Largest frame the peer accepts. Outgoing deliveries are split to fit.
    pub max_frame_size: u32,
}

impl SessionConfig {
    pub fn from_broker(config: &BrokerConfig) -> Self {
        Self {
            incoming_window: config.session_incoming_window,
            link_credit: config.link_credit,
            max_message_size: config.max_message_size,
            persistence: config.persistence,
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_broker(&BrokerConfig::default())
    }
}

/// A performative to send on this session's channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub performative: Performative,
    pub payload: Option<Bytes>,
}

/// What a link endpoint is connected to.
#[derive(Debug)]
enum EndpointKind {
    /// Peer sends messages into a queue.
    Receiving { queue: Arc<Queue> },
    /// Peer sends transaction controls.
    Coordinator,
    /// Broker sends messages acquired from a queue.
    Consuming { queue: Arc<Queue> },
    /// Broker sends copies of a queue's messages.
    Browsing { browser: Browser },
    /// Attach refused; waiting for the peer's Detach.
    Refused,
}

#[derive(Debug)]
struct Endpoint {
    link: Link,
    kind: EndpointKind,
    /// Delivery whose last Transfer has not arrived yet.
    assembly: Option<DeliveryAssembly>,
}

impl Endpoint {
    fn is_sending(&self) -> bool {
        matches!(
            self.kind,
            EndpointKind::Consuming { .. } | EndpointKind::Browsing { .. }
        )
    }

    fn available(&self) -> Option<u32> {
        match &self.kind {
            EndpointKind::Consuming { queue } => {
                Some(u32::try_from(queue.available()).unwrap_or(u32::MAX))
            }
            EndpointKind::Browsing { browser } => Some(u32::from(browser.has_next())),
            _ => None,
        }
    }
}

/// A delivery sent by the broker that the peer has not settled.
#[derive(Debug)]
struct OutgoingDelivery {
    handle: u32,
    queue: Arc<Queue>,
    entry_id: u64,
}

pub struct Session {
    config: SessionConfig,
    queues: QueueRegistry,
    controls: DescribedTypeRegistry<TxnControl>,
    next_incoming_id: u32,
    incoming_window: u32,
    next_outgoing_id: u32,
    next_delivery_id: u32,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,
    endpoints: BTreeMap<u32, Endpoint>,
    txns: TransactionRegistry,
    /// By delivery id, so iteration follows send order. Outlives the link
    /// that sent the delivery until the session ends.
    outgoing_unsettled: BTreeMap<u32, OutgoingDelivery>,
    /// Received in rcv-settle-mode second, waiting for the sender to
    /// settle: delivery id to handle.
    incoming_unsettled: BTreeMap<u32, u32>,
    dispositions: DispositionBatcher,
    outbox: Vec<Outgoing>,
}

impl Session {
    /// A session for the peer's Begin.
    pub fn new(remote: &Begin, config: SessionConfig, queues: QueueRegistry) -> Self {
        Self {
            incoming_window: config.incoming_window,
            config,
            queues,
            controls: DescribedTypeRegistry::transaction_layer(),
            next_incoming_id: remote.next_outgoing_id,
            next_outgoing_id: 0,
            next_delivery_id: 0,
            remote_incoming_window: remote.incoming_window,
            remote_outgoing_window: remote.outgoing_window,
            endpoints: BTreeMap::new(),
            txns: TransactionRegistry::new(),
            outgoing_unsettled: BTreeMap::new(),
            incoming_unsettled: BTreeMap::new(),
            dispositions: DispositionBatcher::new(Role::Receiver),
            outbox: Vec::new(),
        }
    }

    /// Our Begin in reply.
    pub fn local_begin(&self, remote_channel: u16) -> Begin {
        Begin {
            remote_channel: Some(remote_channel),
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: OUTGOING_WINDOW,
            handle_max: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn link(&self, handle: u32) -> Option<&Link> {
        self.endpoints.get(&handle).map(|e| &e.link)
    }

    pub fn link_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn incoming_window(&self) -> u32 {
        self.incoming_window
    }

    pub fn remote_incoming_window(&self) -> u32 {
        self.remote_incoming_window
    }

    pub fn remote_outgoing_window(&self) -> u32 {
        self.remote_outgoing_window
    }

    pub fn transactions(&self) -> &TransactionRegistry {
        &self.txns
    }

    /// Deliveries sent by the broker that the peer has not settled.
    pub fn unsettled_outgoing(&self) -> usize {
        self.outgoing_unsettled.len()
    }

    /// Process one performative addressed to this session.
    pub fn handle(&mut self, performative: Performative, payload: Bytes) -> Result<()> {
        let result = match performative {
            Performative::Attach(attach) => self.on_attach(attach),
            Performative::Flow(flow) => self.on_flow(flow),
            Performative::Transfer(transfer) => self.on_transfer(transfer, payload),
            Performative::Disposition(disposition) => self.on_disposition(disposition),
            Performative::Detach(detach) => self.on_detach(detach),
            other => Err(BrokerError::connection(
                ErrorCondition::IllegalState,
                format!("unexpected {} routed to a session", other.name()),
            )),
        };
        match result {
            Err(BrokerError::Link { handle, error }) => self.detach_with_error(handle, error),
            other => other,
        }
    }

    /// Everything queued for sending, dispositions first.
    pub fn take_output(&mut self) -> Vec<Outgoing> {
        self.flush_dispositions();
        std::mem::take(&mut self.outbox)
    }

    /// Give every unsettled outgoing delivery back to its queue, counting
    /// a delivery attempt, then redeliver what credit allows. Messages come
    /// back in their original order.
    pub fn recover(&mut self) -> Result<Vec<ReleaseOutcome>> {
        let deliveries = std::mem::take(&mut self.outgoing_unsettled);
        let outcomes: Vec<ReleaseOutcome> = deliveries
            .into_values()
            .filter_map(|d| d.queue.release(d.entry_id, true))
            .collect();
        tracing::debug!(released = outcomes.len(), "session recovered");
        self.pump_all()?;
        Ok(outcomes)
    }

    /// Tear the session down: unsettled outgoing deliveries go back to
    /// their queues uncounted, open transactions roll back and every link
    /// is dropped. Partial incoming deliveries are discarded.
    pub fn end(&mut self) {
        let released = self.outgoing_unsettled.len();
        for delivery in std::mem::take(&mut self.outgoing_unsettled).into_values() {
            delivery.queue.release(delivery.entry_id, false);
        }
        self.txns.rollback_all();
        self.endpoints.clear();
        self.incoming_unsettled.clear();
        if released > 0 {
            tracing::debug!(released, "released unsettled deliveries at session end");
        }
    }

    fn emit(&mut self, performative: Performative, payload: Option<Bytes>) {
        self.flush_dispositions();
        self.outbox.push(Outgoing {
            performative,
            payload,
        });
    }

    fn flush_dispositions(&mut self) {
        if self.dispositions.is_empty() {
            return;
        }
        for disposition in self.dispositions.take() {
            self.outbox.push(Outgoing {
                performative: Performative::Disposition(disposition),
                payload: None,
            });
        }
    }

    fn session_flow(&self) -> Flow {
        Flow {
            next_incoming_id: Some(self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: OUTGOING_WINDOW,
            ..Flow::default()
        }
    }

    fn link_flow(&self, handle: u32) -> Option<Flow> {
        let endpoint = self.endpoints.get(&handle)?;
        let credit = endpoint.link.credit();
        Some(Flow {
            handle: Some(handle),
            delivery_count: Some(credit.delivery_count()),
            link_credit: Some(credit.credit()),
            available: endpoint.available(),
            drain: endpoint.is_sending() && credit.drain(),
            ..self.session_flow()
        })
    }

    fn lookup(&self, address: Option<&str>) -> std::result::Result<Arc<Queue>, AmqpError> {
        let address = address.ok_or_else(|| {
            AmqpError::new(ErrorCondition::NotFound, "attach names no node address")
        })?;
        self.queues.get(address).ok_or_else(|| {
            AmqpError::new(
                ErrorCondition::NotFound,
                format!("node '{address}' not found"),
            )
        })
    }

    fn resolve(&self, attach: &Attach) -> std::result::Result<EndpointKind, AmqpError> {
        match attach.role {
            Role::Sender => match &attach.target {
                Some(TargetKind::Coordinator(_)) => Ok(EndpointKind::Coordinator),
                Some(TargetKind::Node(target)) => self
                    .lookup(target.address.as_deref())
                    .map(|queue| EndpointKind::Receiving { queue }),
                None => Err(AmqpError::new(
                    ErrorCondition::NotFound,
                    "attach has no target",
                )),
            },
            Role::Receiver => {
                let source = attach.source.as_ref();
                let queue = self.lookup(source.and_then(|s| s.address.as_deref()))?;
                if source.is_some_and(Source::is_browser) {
                    Ok(EndpointKind::Browsing {
                        browser: Browser::new(queue),
                    })
                } else {
                    Ok(EndpointKind::Consuming { queue })
                }
            }
        }
    }

    fn on_attach(&mut self, attach: Attach) -> Result<()> {
        let handle = attach.handle;
        if self.endpoints.contains_key(&handle) {
            return Err(BrokerError::session(
                ErrorCondition::HandleInUse,
                format!("handle {handle} is already in use"),
            ));
        }

        let mut link = Link::from_remote_attach(&attach, self.config.max_message_size);
        let kind = match self.resolve(&attach) {
            Ok(kind) => kind,
            Err(error) => {
                // Reply with the terminus missing, then detach
                match attach.role {
                    Role::Sender => link.clear_target(),
                    Role::Receiver => link.clear_source(),
                }
                let reply = link.local_attach();
                self.emit(Performative::Attach(reply), None);
                self.endpoints.insert(
                    handle,
                    Endpoint {
                        link,
                        kind: EndpointKind::Refused,
                        assembly: None,
                    },
                );
                return self.detach_with_error(handle, error);
            }
        };

        let reply = link.local_attach();
        tracing::debug!(
            link = %attach.name,
            handle,
            role = ?link.role(),
            rcv_settle_mode = ?link.rcv_settle_mode(),
            "link attached"
        );
        self.emit(Performative::Attach(reply), None);

        let receiving = matches!(
            kind,
            EndpointKind::Receiving { .. } | EndpointKind::Coordinator
        );
        if receiving {
            link.credit_mut().grant(self.config.link_credit);
        }
        self.endpoints.insert(
            handle,
            Endpoint {
                link,
                kind,
                assembly: None,
            },
        );
        if receiving {
            if let Some(flow) = self.link_flow(handle) {
                self.emit(Performative::Flow(flow), None);
            }
        }
        Ok(())
    }

    fn on_flow(&mut self, flow: Flow) -> Result<()> {
        self.remote_outgoing_window = flow.outgoing_window;
        let reference = flow.next_incoming_id.unwrap_or(0);
        let window = reference
            .wrapping_add(flow.incoming_window)
            .wrapping_sub(self.next_outgoing_id);
        self.remote_incoming_window = if window > flow.incoming_window { 0 } else { window };

        let Some(handle) = flow.handle else {
            if flow.echo {
                let reply = self.session_flow();
                self.emit(Performative::Flow(reply), None);
            }
            return self.pump_all();
        };

        let endpoint = self.endpoints.get_mut(&handle).ok_or_else(|| {
            BrokerError::session(
                ErrorCondition::UnattachedHandle,
                format!("flow on unattached handle {handle}"),
            )
        })?;
        if endpoint.is_sending() {
            endpoint.link.credit_mut().on_flow(
                flow.delivery_count,
                flow.link_credit.unwrap_or(0),
                flow.drain,
            );
            self.pump(handle)?;
        }
        if flow.echo {
            if let Some(reply) = self.link_flow(handle) {
                self.emit(Performative::Flow(reply), None);
            }
        }
        Ok(())
    }

    fn on_detach(&mut self, detach: Detach) -> Result<()> {
        let handle = detach.handle;
        let mut endpoint = self.endpoints.remove(&handle).ok_or_else(|| {
            BrokerError::session(
                ErrorCondition::UnattachedHandle,
                format!("detach on unattached handle {handle}"),
            )
        })?;

        endpoint.link.on_detach_received(&detach);
        if let Some(assembly) = endpoint.assembly.take() {
            tracing::debug!(
                handle,
                delivery_id = assembly.delivery_id,
                "discarding partial delivery on detach"
            );
        }
        self.incoming_unsettled.retain(|_, h| *h != handle);

        if !endpoint.link.detach_sent() {
            let reply = endpoint.link.local_detach(None);
            self.emit(
                Performative::Detach(Detach {
                    closed: detach.closed,
                    ..reply
                }),
                None,
            );
        }
        tracing::debug!(link = %endpoint.link.name(), handle, "link detached");
        Ok(())
    }

    /// Detach one link with an error. The endpoint stays until the peer's
    /// Detach arrives so that transfers already in flight are ignored.
    fn detach_with_error(&mut self, handle: u32, error: AmqpError) -> Result<()> {
        let Some(endpoint) = self.endpoints.get_mut(&handle) else {
            return Err(BrokerError::Session(error));
        };
        if endpoint.link.detach_sent() {
            return Ok(());
        }
        tracing::warn!(link = %endpoint.link.name(), handle, %error, "detaching link");

        if let Some(assembly) = endpoint.assembly.take() {
            endpoint.link.unsettled_mut().settle(assembly.delivery_id);
        }
        let detach = endpoint.link.local_detach(Some(error));
        if endpoint.link.is_detached() {
            self.endpoints.remove(&handle);
        }
        self.emit(Performative::Detach(detach), None);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        DeliveryState, Disposition, MessageBuilder, ReceiverSettleMode, SenderSettleMode, Target,
        Transfer,
    };
    use crate::config::DEFAULT_LINK_CREDIT;
    use crate::queue::{Message, RedeliveryPolicy};

    fn begin() -> Begin {
        Begin {
            remote_channel: None,
            next_outgoing_id: 0,
            incoming_window: 100,
            outgoing_window: 100,
            handle_max: None,
        }
    }

    fn session_with(config: SessionConfig) -> (Session, Arc<Queue>) {
        let queues = QueueRegistry::new();
        let queue = queues.create("q", RedeliveryPolicy::unlimited()).unwrap();
        (Session::new(&begin(), config, queues), queue)
    }

    fn session() -> (Session, Arc<Queue>) {
        session_with(SessionConfig::default())
    }

    fn producer(handle: u32, mode: ReceiverSettleMode) -> Attach {
        let mut attach = Attach::new("producer", handle, Role::Sender);
        attach.rcv_settle_mode = mode;
        attach.target = Some(TargetKind::Node(Target::with_address("q")));
        attach
    }

    fn consumer(handle: u32) -> Attach {
        let mut attach = Attach::new("consumer", handle, Role::Receiver);
        attach.source = Some(Source::with_address("q"));
        attach
    }

    fn credit(handle: u32, delivery_count: u32, link_credit: u32) -> Flow {
        Flow {
            next_incoming_id: Some(0),
            incoming_window: 100,
            next_outgoing_id: 0,
            outgoing_window: 100,
            handle: Some(handle),
            delivery_count: Some(delivery_count),
            link_credit: Some(link_credit),
            ..Flow::default()
        }
    }

    fn transfer(handle: u32, id: u32, settled: bool) -> Transfer {
        Transfer {
            handle,
            delivery_id: Some(id),
            delivery_tag: Some(Bytes::copy_from_slice(&id.to_be_bytes())),
            message_format: Some(0),
            settled: Some(settled),
            ..Transfer::default()
        }
    }

    fn body(text: &str) -> Bytes {
        MessageBuilder::new().data(text.as_bytes().to_vec()).build()
    }

    fn accepted(first: u32, last: Option<u32>) -> Disposition {
        Disposition {
            role: Role::Receiver,
            first,
            last,
            settled: true,
            state: Some(DeliveryState::Accepted),
            batchable: false,
        }
    }

    fn transfers(output: &[Outgoing]) -> Vec<&Transfer> {
        output
            .iter()
            .filter_map(|o| match &o.performative {
                Performative::Transfer(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attach_producer_grants_credit() {
        // Arrange
        let (mut session, _queue) = session();

        // Act
        session
            .handle(Performative::Attach(producer(0, ReceiverSettleMode::First)), Bytes::new())
            .unwrap();
        let output = session.take_output();

        // Assert
        assert!(matches!(output[0].performative, Performative::Attach(ref a) if a.role == Role::Receiver));
        match &output[1].performative {
            Performative::Flow(flow) => {
                assert_eq!(flow.handle, Some(0));
                assert_eq!(flow.link_credit, Some(DEFAULT_LINK_CREDIT));
            }
            other => panic!("expected flow, got {other:?}"),
        }
    }

    #[test]
    fn test_attach_unknown_node_is_refused() {
        let (mut session, _queue) = session();
        let mut attach = consumer(3);
        attach.source = Some(Source::with_address("missing"));

        session
            .handle(Performative::Attach(attach), Bytes::new())
            .unwrap();
        let output = session.take_output();

        match (&output[0].performative, &output[1].performative) {
            (Performative::Attach(reply), Performative::Detach(detach)) => {
                assert!(reply.source.is_none());
                assert!(detach.closed);
                let error = detach.error.as_ref().unwrap();
                assert!(error.is(ErrorCondition::NotFound));
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_transfer_enqueues_and_settles() {
        let (mut session, queue) = session();
        session
            .handle(Performative::Attach(producer(0, ReceiverSettleMode::First)), Bytes::new())
            .unwrap();
        session.take_output();

        session
            .handle(Performative::Transfer(transfer(0, 0, false)), body("one"))
            .unwrap();
        let output = session.take_output();

        assert_eq!(queue.depth(), 1);
        match &output[0].performative {
            Performative::Disposition(d) => {
                assert!(d.settled);
                assert_eq!(d.state, Some(DeliveryState::Accepted));
            }
            other => panic!("expected disposition, got {other:?}"),
        }
        assert!(session.link(0).unwrap().unsettled().is_empty());
    }

    #[test]
    fn test_multi_frame_transfer_is_reassembled() {
        let (mut session, queue) = session();
        session
            .handle(Performative::Attach(producer(0, ReceiverSettleMode::First)), Bytes::new())
            .unwrap();
        let payload = body("split across frames");
        let (head, tail) = (payload.slice(..5), payload.slice(5..));

        let mut first = transfer(0, 0, true);
        first.more = true;
        session
            .handle(Performative::Transfer(first), head)
            .unwrap();
        let rest = Transfer {
            handle: 0,
            ..Transfer::default()
        };
        session.handle(Performative::Transfer(rest), tail).unwrap();

        let entry = queue.acquire().unwrap();
        assert_eq!(entry.message.payload(), &payload);
    }

    #[test]
    fn test_consumer_sends_within_credit() {
        // Arrange
        let (mut session, queue) = session();
        for text in ["a", "b", "c"] {
            queue.enqueue(Message::new(body(text)));
        }
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();

        // Act
        session
            .handle(Performative::Flow(credit(1, 0, 2)), Bytes::new())
            .unwrap();
        let output = session.take_output();

        // Assert
        let sent = transfers(&output);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].delivery_id, Some(0));
        assert_eq!(sent[1].delivery_id, Some(1));
        assert_eq!(session.unsettled_outgoing(), 2);
        assert_eq!(queue.available(), 1);
    }

    #[test]
    fn test_accepted_disposition_removes_messages() {
        let (mut session, queue) = session();
        for text in ["a", "b"] {
            queue.enqueue(Message::new(body(text)));
        }
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session
            .handle(Performative::Flow(credit(1, 0, 10)), Bytes::new())
            .unwrap();

        session
            .handle(Performative::Disposition(accepted(0, Some(1))), Bytes::new())
            .unwrap();

        assert_eq!(queue.depth(), 0);
        assert_eq!(session.unsettled_outgoing(), 0);
    }

    #[test]
    fn test_presettled_consumer_acknowledges_on_send() {
        let (mut session, queue) = session();
        queue.enqueue(Message::new(body("fire and forget")));
        let mut attach = consumer(1);
        attach.snd_settle_mode = SenderSettleMode::Settled;
        session
            .handle(Performative::Attach(attach), Bytes::new())
            .unwrap();

        session
            .handle(Performative::Flow(credit(1, 0, 1)), Bytes::new())
            .unwrap();

        let output = session.take_output();
        assert_eq!(transfers(&output)[0].settled, Some(true));
        assert_eq!(queue.depth(), 0);
        assert_eq!(session.unsettled_outgoing(), 0);
    }

    #[test]
    fn test_large_delivery_is_split_to_frame_size() {
        let config = SessionConfig {
            max_frame_size: 512,
            ..SessionConfig::default()
        };
        let (mut session, queue) = session_with(config);
        let payload = body(&"x".repeat(2000));
        queue.enqueue(Message::new(payload.clone()));
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();

        session
            .handle(Performative::Flow(credit(1, 0, 1)), Bytes::new())
            .unwrap();
        let output = session.take_output();

        let frames: Vec<&Outgoing> = output
            .iter()
            .filter(|o| matches!(o.performative, Performative::Transfer(_)))
            .collect();
        assert!(frames.len() > 1);
        let mut joined = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let Performative::Transfer(t) = &frame.performative else {
                unreachable!()
            };
            assert_eq!(t.more, i + 1 < frames.len());
            assert_eq!(t.delivery_id.is_some(), i == 0);
            let payload = frame.payload.as_ref().unwrap();
            assert!(performative_size(&frame.performative) + payload.len() <= 512);
            joined.extend_from_slice(payload);
        }
        assert_eq!(joined, payload.to_vec());
    }

    fn performative_size(performative: &Performative) -> usize {
        crate::protocol::performative_frame_size(performative)
    }

    #[test]
    fn test_stale_flow_grants_no_credit() {
        let (mut session, queue) = session();
        queue.enqueue(Message::new(body("a")));
        queue.enqueue(Message::new(body("b")));
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session
            .handle(Performative::Flow(credit(1, 0, 1)), Bytes::new())
            .unwrap();
        session.take_output();

        // Still refers to delivery count 0, whose credit was used
        session
            .handle(Performative::Flow(credit(1, 0, 0)), Bytes::new())
            .unwrap();

        assert!(transfers(&session.take_output()).is_empty());
        assert_eq!(session.link(1).unwrap().credit().credit(), 0);
    }

    #[test]
    fn test_recover_redelivers_in_order_with_count() {
        let (mut session, queue) = session();
        for text in ["a", "b", "c"] {
            queue.enqueue(Message::new(body(text)));
        }
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session
            .handle(Performative::Flow(credit(1, 0, 3)), Bytes::new())
            .unwrap();
        session.take_output();

        let outcomes = session.recover().unwrap();

        assert_eq!(outcomes, vec![ReleaseOutcome::Requeued; 3]);
        assert_eq!(queue.available(), 3);
        let entries = queue.browse();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(entries.iter().all(|e| e.delivery_count == 1));
    }

    #[test]
    fn test_end_releases_uncounted() {
        let (mut session, queue) = session();
        queue.enqueue(Message::new(body("a")));
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session
            .handle(Performative::Flow(credit(1, 0, 1)), Bytes::new())
            .unwrap();

        session.end();

        assert_eq!(queue.available(), 1);
        assert_eq!(queue.delivery_count(0), Some(0));
        assert_eq!(session.link_count(), 0);
    }

    #[test]
    fn test_transfer_on_unattached_handle_is_session_error() {
        let (mut session, _queue) = session();

        let result = session.handle(Performative::Transfer(transfer(7, 0, true)), body("x"));

        assert!(matches!(
            result,
            Err(BrokerError::Session(ref e)) if e.is(ErrorCondition::UnattachedHandle)
        ));
    }

    #[test]
    fn test_echoed_flow_reports_available_messages() {
        let (mut session, queue) = session();
        for _ in 0..3 {
            queue.enqueue(Message::new(Bytes::from_static(b"m")));
        }
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session.take_output();

        session
            .handle(
                Performative::Flow(Flow {
                    echo: true,
                    ..credit(1, 0, 0)
                }),
                Bytes::new(),
            )
            .unwrap();

        let output = session.take_output();
        match &output[..] {
            [Outgoing {
                performative: Performative::Flow(flow),
                ..
            }] => {
                assert_eq!(flow.handle, Some(1));
                assert_eq!(flow.link_credit, Some(0));
                assert_eq!(flow.available, Some(3));
            }
            other => panic!("expected a single flow, got {other:?}"),
        }
    }

    #[test]
    fn test_peer_detach_is_echoed() {
        let (mut session, _queue) = session();
        session
            .handle(Performative::Attach(consumer(1)), Bytes::new())
            .unwrap();
        session.take_output();

        session
            .handle(
                Performative::Detach(Detach {
                    handle: 1,
                    closed: true,
                    error: None,
                }),
                Bytes::new(),
            )
            .unwrap();

        let output = session.take_output();
        assert!(matches!(
            output[0].performative,
            Performative::Detach(Detach { handle: 1, closed: true, .. })
        ));
        assert_eq!(session.link_count(), 0);
    }
}
