//! Transaction coordination: declare, discharge, transactional transfers
//! and transactional acknowledgement.

mod support;

use amqp_broker_core::protocol::{DeliveryState, Performative, ReceiverSettleMode, Source, Transfer};
use amqp_broker_core::queue::Message;
use amqp_broker_core::{Broker, ErrorCondition, QueueConfig};
use bytes::Bytes;
use support::{assert_condition, detach, message, transfer, Peer, CHANNEL};

const COORDINATOR: u32 = 0;
const PRODUCER: u32 = 1;
const CONSUMER: u32 = 2;

fn broker() -> Broker {
    Broker::builder().queue(QueueConfig::new("q")).build().unwrap()
}

fn transactional(txn_id: &Bytes) -> DeliveryState {
    DeliveryState::Transactional {
        txn_id: txn_id.clone(),
        outcome: None,
    }
}

/// Send one message to "q" inside `txn_id`.
fn send_in_txn(peer: &mut Peer, delivery_id: u32, txn_id: &Bytes) {
    peer.transfer(
        Transfer {
            state: Some(transactional(txn_id)),
            ..transfer(PRODUCER, delivery_id, false)
        },
        message("transactional"),
    );
    match peer.expect_disposition().state {
        Some(DeliveryState::Transactional { txn_id: id, outcome }) => {
            assert_eq!(&id, txn_id);
            assert_eq!(outcome.as_deref(), Some(&DeliveryState::Accepted));
        }
        other => panic!("expected transactional state, got {other:?}"),
    }
}

#[test]
fn test_coordinator_attach_sends_attach_then_flow() {
    let broker = broker();
    let mut peer = Peer::session(&broker);

    peer.attach_coordinator(COORDINATOR, true);

    assert_eq!(peer.pending(), 0);
}

#[test]
fn test_declare_returns_fresh_ids() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);

    let first = peer.declare(COORDINATOR, 0);
    let second = peer.declare(COORDINATOR, 1);

    assert!(!first.is_empty());
    assert_ne!(first, second);
    let active = peer.with_session(|s| s.transactions().len());
    assert_eq!(active, 2);
}

#[test]
fn test_discharge_known_id_is_accepted() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    let txn_id = peer.declare(COORDINATOR, 0);

    peer.discharge(COORDINATOR, 1, txn_id, false);

    let disposition = peer.expect_disposition();
    assert!(disposition.settled);
    assert_eq!(disposition.state, Some(DeliveryState::Accepted));
}

#[test]
fn test_discharge_unknown_id_is_rejected_when_supported() {
    // Arrange
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);

    // Act
    peer.discharge(COORDINATOR, 0, Bytes::from_static(b"\xff\xff"), false);

    // Assert
    let disposition = peer.expect_disposition();
    assert!(disposition.settled);
    match disposition.state {
        Some(DeliveryState::Rejected { error }) => {
            assert_condition(error.as_ref(), ErrorCondition::UnknownId)
        }
        other => panic!("expected rejected, got {other:?}"),
    }
}

#[test]
fn test_discharge_unknown_id_detaches_without_rejected_outcome() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, false);

    peer.discharge(COORDINATOR, 0, Bytes::from_static(b"\xff\xff"), false);

    let detach = peer.expect_detach();
    assert_eq!(detach.handle, COORDINATOR);
    assert!(detach.closed);
    assert_condition(detach.error.as_ref(), ErrorCondition::UnknownId);
}

#[test]
fn test_discharged_id_cannot_be_discharged_again() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    let txn_id = peer.declare(COORDINATOR, 0);
    peer.discharge(COORDINATOR, 1, txn_id.clone(), false);
    peer.expect_disposition();

    peer.discharge(COORDINATOR, 2, txn_id, false);

    assert!(matches!(
        peer.expect_disposition().state,
        Some(DeliveryState::Rejected { .. })
    ));
}

#[test]
fn test_rollback_discards_transactional_enqueue() {
    // Arrange
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    peer.attach_sender(PRODUCER, "q", ReceiverSettleMode::First);
    let txn_id = peer.declare(COORDINATOR, 0);
    send_in_txn(&mut peer, 1, &txn_id);

    // Act
    peer.discharge(COORDINATOR, 2, txn_id, true);

    // Assert
    assert_eq!(
        peer.expect_disposition().state,
        Some(DeliveryState::Accepted)
    );
    assert_eq!(broker.queue("q").unwrap().depth(), 0);
}

#[test]
fn test_commit_publishes_transactional_enqueue() {
    let broker = broker();
    let queue = broker.queue("q").unwrap();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    peer.attach_sender(PRODUCER, "q", ReceiverSettleMode::First);
    let txn_id = peer.declare(COORDINATOR, 0);

    send_in_txn(&mut peer, 1, &txn_id);
    assert_eq!(queue.depth(), 0);
    peer.discharge(COORDINATOR, 2, txn_id, false);

    peer.expect_disposition();
    assert_eq!(queue.depth(), 1);
}

#[test]
fn test_transfer_with_unknown_txn_is_rejected() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_sender(PRODUCER, "q", ReceiverSettleMode::First);

    peer.transfer(
        Transfer {
            state: Some(transactional(&Bytes::from_static(b"\0\0\0\x09"))),
            ..transfer(PRODUCER, 0, false)
        },
        message("orphan"),
    );

    match peer.expect_disposition().state {
        Some(DeliveryState::Rejected { error }) => {
            assert_condition(error.as_ref(), ErrorCondition::UnknownId)
        }
        other => panic!("expected rejected, got {other:?}"),
    }
    assert_eq!(broker.queue("q").unwrap().depth(), 0);
}

fn consume_one(peer: &mut Peer) -> u32 {
    peer.attach_receiver(CONSUMER, Source::with_address("q"));
    peer.flow(CONSUMER, 0, 10);
    let (transfer, _) = peer.expect_transfer();
    transfer.delivery_id.unwrap()
}

#[test]
fn test_transactional_accept_is_undone_by_rollback() {
    // Arrange
    let broker = broker();
    let queue = broker.queue("q").unwrap();
    let entry_id = queue.enqueue(Message::new(message("work")));
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    let txn_id = peer.declare(COORDINATOR, 0);
    let delivery_id = consume_one(&mut peer);

    // Act
    peer.dispose(
        delivery_id,
        delivery_id,
        DeliveryState::Transactional {
            txn_id: txn_id.clone(),
            outcome: Some(Box::new(DeliveryState::Accepted)),
        },
    );
    assert_eq!(queue.depth(), 1);
    peer.discharge(COORDINATOR, 1, txn_id, true);

    // Assert
    peer.expect_disposition();
    assert_eq!(queue.depth(), 1);
    assert_eq!(queue.delivery_count(entry_id), Some(1));
    // Redelivered on the remaining credit
    let (redelivered, _) = peer.expect_transfer();
    assert_ne!(redelivered.delivery_id, Some(delivery_id));
}

#[test]
fn test_rollback_restores_dequeue_after_consumer_detached() {
    // Arrange
    let broker = broker();
    let queue = broker.queue("q").unwrap();
    let entry_id = queue.enqueue(Message::new(message("work")));
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    let txn_id = peer.declare(COORDINATOR, 0);
    let delivery_id = consume_one(&mut peer);
    peer.dispose(delivery_id, delivery_id, transactional(&txn_id));

    // Act
    peer.send(CHANNEL, detach(CONSUMER));
    assert_eq!(peer.expect_detach().handle, CONSUMER);
    peer.discharge(COORDINATOR, 1, txn_id, true);

    // Assert
    assert_eq!(
        peer.expect_disposition().state,
        Some(DeliveryState::Accepted)
    );
    assert_eq!(queue.available(), 1);
    assert_eq!(queue.delivery_count(entry_id), Some(1));
    assert_eq!(peer.pending(), 0);
}

#[test]
fn test_transactional_accept_is_applied_by_commit() {
    let broker = broker();
    let queue = broker.queue("q").unwrap();
    queue.enqueue(Message::new(message("work")));
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    let txn_id = peer.declare(COORDINATOR, 0);
    let delivery_id = consume_one(&mut peer);

    peer.dispose(delivery_id, delivery_id, transactional(&txn_id));
    peer.discharge(COORDINATOR, 1, txn_id, false);

    peer.expect_disposition();
    assert_eq!(queue.depth(), 0);
}

#[test]
fn test_end_rolls_back_open_transactions() {
    let broker = broker();
    let mut peer = Peer::session(&broker);
    peer.attach_coordinator(COORDINATOR, true);
    peer.attach_sender(PRODUCER, "q", ReceiverSettleMode::First);
    let txn_id = peer.declare(COORDINATOR, 0);
    send_in_txn(&mut peer, 1, &txn_id);

    peer.send(
        CHANNEL,
        Performative::End(amqp_broker_core::protocol::End::default()),
    );

    peer.expect_end();
    assert_eq!(broker.queue("q").unwrap().depth(), 0);
    assert_eq!(peer.connection().session_count(), 0);
}
