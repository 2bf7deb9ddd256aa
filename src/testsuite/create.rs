//! Builders for the ABCI events two connected Cosmos chains emit over the
//! life of a packet.

use crate::core::packets::types::Height;
use crate::cosmos::events::{abci_event, CosmosUpdate};
use bytes::Bytes;
use std::{future::Future, time::Duration};
use tendermint_proto::{
    abci::{Event as AbciEvent, ResponseDeliverTx, TxResult},
    google::protobuf::Timestamp,
    types::Header,
};

pub async fn timeout_future<T: Future>(future: T, secs: u64, reason: String) -> T::Output {
    let duration = Duration::from_secs(secs);
    match tokio::time::timeout(duration, future).await {
        Ok(output) => output,
        Err(_) => panic!("Future didn't finish within {duration:?}, {reason}"),
    }
}

/// A packet sent from chain A (`transfer/channel-0`) to chain B
/// (`transfer/channel-1`), by default over `connection-0` on both ends.
#[derive(Debug, Clone)]
pub struct TestPacket {
    pub sequence: u64,
    pub src_port: String,
    pub src_channel: String,
    pub dst_port: String,
    pub dst_channel: String,
    pub data: Vec<u8>,
    pub timeout_height: Height,
    pub timeout_timestamp: u64,
    pub ordering: String,
    pub connection: String,
}

impl TestPacket {
    pub fn new(sequence: u64, data: Vec<u8>) -> Self {
        Self {
            sequence,
            src_port: "transfer".to_string(),
            src_channel: "channel-0".to_string(),
            dst_port: "transfer".to_string(),
            dst_channel: "channel-1".to_string(),
            data,
            timeout_height: Height {
                revision_number: 1,
                revision_height: 1000,
            },
            timeout_timestamp: 0,
            ordering: "ORDER_UNORDERED".to_string(),
            connection: "connection-0".to_string(),
        }
    }

    pub fn with_timeout_height(mut self, revision_height: u64) -> Self {
        self.timeout_height.revision_height = revision_height;
        self
    }

    pub fn over_connection(mut self, connection: &str) -> Self {
        self.connection = connection.to_string();
        self
    }

    fn attributes(&self) -> Vec<(String, String)> {
        vec![
            ("packet_data_hex".to_string(), hex::encode(&self.data)),
            (
                "packet_timeout_height".to_string(),
                format!(
                    "{}-{}",
                    self.timeout_height.revision_number, self.timeout_height.revision_height
                ),
            ),
            ("packet_timeout_timestamp".to_string(), self.timeout_timestamp.to_string()),
            ("packet_sequence".to_string(), self.sequence.to_string()),
            ("packet_src_port".to_string(), self.src_port.clone()),
            ("packet_src_channel".to_string(), self.src_channel.clone()),
            ("packet_dst_port".to_string(), self.dst_port.clone()),
            ("packet_dst_channel".to_string(), self.dst_channel.clone()),
            ("packet_channel_ordering".to_string(), self.ordering.clone()),
            ("packet_connection".to_string(), self.connection.clone()),
        ]
    }

    fn event(&self, kind: &str, extra: Vec<(String, String)>) -> AbciEvent {
        let mut attributes = self.attributes();
        attributes.extend(extra);
        let attributes: Vec<(&str, &str)> = attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        abci_event(kind, &attributes)
    }

    /// Source side events carry no packet data.
    fn source_event(&self, kind: &str) -> AbciEvent {
        let mut event = self.event(kind, vec![]);
        event.attributes.retain(|attribute| &attribute.key[..] != b"packet_data_hex");
        event
    }

    /// Emitted by chain A.
    pub fn send_packet(&self) -> AbciEvent {
        self.event("send_packet", vec![])
    }

    /// Emitted by chain B.
    pub fn recv_packet(&self) -> AbciEvent {
        self.event("recv_packet", vec![])
    }

    /// Emitted by chain B.
    pub fn write_acknowledgement(&self, ack: &[u8]) -> AbciEvent {
        self.event(
            "write_acknowledgement",
            vec![("packet_ack_hex".to_string(), hex::encode(ack))],
        )
    }

    /// Emitted by chain A.
    pub fn acknowledge_packet(&self) -> AbciEvent {
        self.source_event("acknowledge_packet")
    }

    /// Emitted by chain A.
    pub fn timeout_packet(&self) -> AbciEvent {
        self.source_event("timeout_packet")
    }

    /// Emitted by chain A.
    pub fn timeout_on_close_packet(&self) -> AbciEvent {
        self.source_event("timeout_on_close_packet")
    }
}

/// ICS-20 fungible token packet data.
pub fn transfer_data(denom: &str, amount: &str, memo: &str) -> Vec<u8> {
    serde_json::json!({
        "denom": denom,
        "amount": amount,
        "sender": "cosmos1sender",
        "receiver": "cosmos1receiver",
        "memo": memo,
    })
    .to_string()
    .into_bytes()
}

pub fn success_ack() -> Vec<u8> {
    br#"{"result":"AQ=="}"#.to_vec()
}

pub fn error_ack(error: &str) -> Vec<u8> {
    serde_json::json!({ "error": error }).to_string().into_bytes()
}

pub fn channel_close_confirm(port: &str, channel: &str) -> AbciEvent {
    abci_event("channel_close_confirm", &[("port_id", port), ("channel_id", channel)])
}

pub fn update_client(client_id: &str, revision_height: u64) -> AbciEvent {
    let height = format!("1-{}", revision_height);
    abci_event("update_client", &[("client_id", client_id), ("consensus_height", &height)])
}

pub fn message_sender(sender: &str) -> AbciEvent {
    abci_event("message", &[("sender", sender)])
}

/// A successful transaction whose raw bytes are `tx`, in a block at `height`.
pub fn tx(height: u64, tx: &str, events: Vec<AbciEvent>) -> CosmosUpdate {
    CosmosUpdate::Tx {
        result: TxResult {
            height: height as i64,
            index: 0,
            tx: Bytes::copy_from_slice(tx.as_bytes()),
            result: Some(ResponseDeliverTx {
                events,
                ..Default::default()
            }),
        },
        block_time: Some(height * 1_000_000_000),
    }
}

pub fn new_block(height: u64) -> CosmosUpdate {
    CosmosUpdate::NewBlock(Header {
        height: height as i64,
        time: Some(Timestamp {
            seconds: height as i64,
            nanos: 0,
        }),
        ..Default::default()
    })
}
