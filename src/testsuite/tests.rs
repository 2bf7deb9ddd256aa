//! End to end scenarios: ABCI events pushed into two Cosmos event sources,
//! tracked records asserted through the tracker's read contract.

use super::create::{
    channel_close_confirm, error_ack, message_sender, new_block, success_ack, transfer_data, tx,
    update_client, TestPacket,
};
use super::setup::{network_a, network_b, packet_id, TestHarness};
use crate::core::packets::types::{ConnectionId, PacketState, ReceiptState};

/// Send, receive, acknowledge and relay the acknowledgement back.
pub async fn ibc_transfer_acknowledged(harness: &TestHarness) {
    let packet = TestPacket::new(1, transfer_data("uatom", "100", ""));
    let id = packet_id(1);

    let sender = message_sender("cosmos1sender");
    harness.push_a(tx(10, "AA01", vec![sender, packet.send_packet()]));
    harness.push_b(tx(
        20,
        "BB01",
        vec![packet.recv_packet(), packet.write_acknowledgement(&success_ack())],
    ));
    harness.push_a(tx(12, "AA02", vec![packet.acknowledge_packet()]));

    let record = harness
        .wait_for(&id, "acknowledged and deleted", |record| {
            record.state == PacketState::AcknowledgedSuccess && record.src_commitment_deleted
        })
        .await;
    log::info!(target: "packet-tracker", "🙌 Packet {} acknowledged", id);

    assert!(record.send_observed);
    assert_eq!(record.dst_network, network_b());
    assert_eq!(record.dst_sequence, Some(1));
    assert_eq!(record.src_sent_height, Some(10));
    assert_eq!(record.sender.as_deref(), Some("cosmos1sender"));
    assert_eq!(record.dst_receipt_state, Some(ReceiptState::Success));
    assert_eq!(record.dst_ack_result, Some(vec![1]));
    assert_eq!(record.dst_ack_error, None);
    assert!(record.dst_ack_hash.is_some());
    assert_eq!(record.src_ack_sequence_id, Some(12));
    assert!(!record.src_timeout);

    let transfer = record.transfer.expect("transfer packet");
    assert_eq!(transfer.denom, "uatom");
    assert_eq!(transfer.dst_denom, "transfer/channel-1/uatom");
    assert!(transfer.ibc_denom().starts_with("ibc/"));
    assert_eq!(transfer.amount, "100");
    assert!(transfer.is_source);
    assert_eq!(transfer.memo, None);
    assert!(transfer.packet_forwarding.is_none());
}

/// An error acknowledgement ends the packet in `acknowledged_error`.
pub async fn ibc_transfer_acknowledged_with_error(harness: &TestHarness) {
    let packet = TestPacket::new(2, transfer_data("uatom", "5", ""));
    let id = packet_id(2);

    harness.push_a(tx(10, "AA03", vec![packet.send_packet()]));
    harness.push_b(tx(
        21,
        "BB02",
        vec![packet.recv_packet(), packet.write_acknowledgement(&error_ack("insufficient funds"))],
    ));

    let record = harness
        .wait_for(&id, "acknowledged with error", |record| {
            record.state == PacketState::AcknowledgedError && record.send_observed
        })
        .await;
    assert_eq!(record.dst_ack_error.as_deref(), Some("insufficient funds"));
    assert_eq!(record.dst_ack_result, None);
}

/// Chain B passes the timeout height without receiving the packet.
pub async fn ibc_packet_height_timeout(harness: &TestHarness) {
    let packet = TestPacket::new(3, transfer_data("uatom", "7", "")).with_timeout_height(50);
    let id = packet_id(3);

    harness.push_a(tx(10, "AA04", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;

    log::info!(target: "packet-tracker", "Waiting for packet timeout to elapse on counterparty");
    harness.push_b(new_block(49));
    harness.push_b(new_block(50));
    let record = harness
        .wait_for(&id, "timed out", |record| record.state == PacketState::TimedOut)
        .await;
    assert!(record.src_timeout);
    assert!(!record.src_commitment_deleted);

    harness.push_a(tx(60, "AA05", vec![packet.timeout_packet()]));
    let record = harness
        .wait_for(&id, "commitment deleted", |record| record.src_commitment_deleted)
        .await;
    assert_eq!(record.state, PacketState::TimedOut);
    assert_eq!(record.src_ack_sequence_id, None);
    log::info!(target: "packet-tracker", "🚀🚀 Timeout packet successfully processed for height timeout");
}

/// A client update on the source chain is enough to detect the timeout.
pub async fn ibc_packet_timeout_from_client_update(harness: &TestHarness) {
    let packet = TestPacket::new(4, transfer_data("uatom", "7", "")).with_timeout_height(80);
    let id = packet_id(4);

    harness.push_a(tx(10, "AA06", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;
    harness.push_a(tx(11, "AA07", vec![update_client("07-tendermint-0", 81)]));

    let record = harness
        .wait_for(&id, "timed out", |record| record.state == PacketState::TimedOut)
        .await;
    assert!(record.src_timeout);
}

/// Once any part of the acknowledgement is known, passing the timeout height
/// changes nothing. Here the source relays the acknowledgement back before
/// the destination stream catches up.
pub async fn ibc_timeout_suppressed_by_acknowledgement(harness: &TestHarness) {
    let packet = TestPacket::new(5, transfer_data("uatom", "7", "")).with_timeout_height(50);
    let id = packet_id(5);

    harness.push_a(tx(10, "AA08", vec![packet.send_packet(), packet.acknowledge_packet()]));
    harness
        .wait_for(&id, "deleted", |record| record.src_commitment_deleted)
        .await;

    harness.push_b(new_block(60));
    harness.push_b(tx(
        61,
        "BB03",
        vec![packet.recv_packet(), packet.write_acknowledgement(&success_ack())],
    ));
    let record = harness
        .wait_for(&id, "acknowledged", |record| record.state == PacketState::AcknowledgedSuccess)
        .await;
    assert!(!record.src_timeout);
}

/// A successful receipt suppresses timeout detection as well.
pub async fn ibc_timeout_suppressed_by_receipt(harness: &TestHarness) {
    let packet = TestPacket::new(10, transfer_data("uatom", "7", "")).with_timeout_height(50);
    let id = packet_id(10);

    harness.push_a(tx(10, "AA10", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;
    harness.push_b(tx(45, "BB05", vec![packet.recv_packet()]));
    harness.push_b(new_block(60));
    harness.push_b(tx(61, "BB06", vec![packet.write_acknowledgement(&success_ack())]));

    let record = harness
        .wait_for(&id, "acknowledged", |record| record.state == PacketState::AcknowledgedSuccess)
        .await;
    assert!(!record.src_timeout);
}

/// The destination observes the packet before the source stream delivers the send.
pub async fn ibc_receive_before_send(harness: &TestHarness) {
    let packet = TestPacket::new(6, transfer_data("uatom", "9", ""));
    let id = packet_id(6);

    harness.push_b(tx(30, "BB04", vec![packet.recv_packet()]));
    let placeholder = harness
        .wait_for(&id, "received", |record| record.state == PacketState::Received)
        .await;
    assert!(!placeholder.send_observed);
    assert_eq!(placeholder.src_sent_height, None);

    harness.push_a(tx(10, "AA09", vec![packet.send_packet()]));
    let record = harness
        .wait_for(&id, "merged with its send", |record| record.send_observed)
        .await;
    assert_eq!(record.state, PacketState::Received);
    assert_eq!(record.dst_sequence, Some(6));
    assert_eq!(record.src_sent_height, Some(10));
    assert_eq!(record.index_created_at, placeholder.index_created_at);
}

/// The counterparty closed its channel end, chain A times the packet out on close.
pub async fn ibc_timeout_on_close(harness: &TestHarness) {
    let packet = TestPacket::new(12, transfer_data("uatom", "3", ""));
    let id = packet_id(12);

    harness.push_a(tx(10, "AA10", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;
    harness.push_a(tx(14, "AA11", vec![packet.timeout_on_close_packet()]));

    let record = harness
        .wait_for(&id, "failed", |record| record.state == PacketState::Failed)
        .await;
    assert!(record.src_commitment_deleted);
    assert_eq!(record.failure_reason.as_deref(), Some("counterparty channel closed"));
    assert_eq!(record.src_ack_sequence_id, None);
    assert!(!harness.tracker.in_flight().contains(&id));
}

/// Closing the source channel fails its in-flight packets.
pub async fn ibc_channel_close(harness: &TestHarness) {
    let packet = TestPacket::new(7, transfer_data("uatom", "1", ""));
    let id = packet_id(7);

    harness.push_a(tx(10, "AA0A", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;
    harness.push_a(tx(11, "AA0B", vec![channel_close_confirm("transfer", "channel-0")]));

    let record = harness
        .wait_for(&id, "failed", |record| record.state == PacketState::Failed)
        .await;
    assert!(record.failure_reason.unwrap().contains("closed"));
}

/// A send over a connection the registry learns about later is retried.
pub async fn ibc_unknown_connection_retried(harness: &TestHarness) {
    let packet =
        TestPacket::new(8, transfer_data("uatom", "1", "")).over_connection("connection-5");
    let id = packet_id(8);

    harness.push_a(tx(10, "AA0C", vec![packet.send_packet()]));
    harness.push_a(new_block(11));
    let pending = async {
        while harness.correlator.pending() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    };
    super::create::timeout_future(pending, 10, "send was never deferred".to_string()).await;
    assert!(harness.tracker.get(&id).is_none());

    harness
        .correlator
        .registry()
        .register_connection(network_a(), ConnectionId::new(5), network_b());
    harness.push_a(new_block(12));
    let record = harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;
    assert_eq!(record.src_connection_id, Some(ConnectionId::new(5)));
}

/// Two different packets under one identity stop ingestion.
pub async fn ibc_identity_collision_halts(harness: TestHarness) {
    let packet = TestPacket::new(9, transfer_data("uatom", "1", ""));
    let id = packet_id(9);

    harness.push_a(tx(10, "AA0D", vec![packet.send_packet()]));
    harness.wait_for(&id, "sent", |record| record.state == PacketState::Sent).await;

    let impostor = TestPacket::new(9, transfer_data("uatom", "1000", ""));
    harness.push_a(tx(11, "AA0E", vec![impostor.send_packet()]));
    let tracker = harness.tracker.clone();
    let err = harness.halted().await.unwrap_err();
    assert!(err.to_string().contains("identity collision"), "{}", err);

    let record = tracker.get(&id).unwrap();
    assert_eq!(record.packet_data, packet.data);
    assert_eq!(record.src_sent_height, Some(10));
}
