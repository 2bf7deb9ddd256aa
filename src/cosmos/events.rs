//! Cosmos SDK ABCI events to [`ChainEvent`]s.
//!
//! Attribute names follow ibc-go's channel and client modules. Hex encoded
//! payloads (`packet_data_hex`, `packet_ack_hex`) are preferred over their
//! deprecated string counterparts.

use crate::core::{
    error::Error,
    events::{ChainEvent, PacketEventKind, RawPacketEvent},
    packets::types::{Height, TxId},
};
use crate::primitives::funcs::{ibc_height, parse_height};
use bytes::Bytes;
use ibc::{
    core::{ics04_channel::packet::Sequence, ics24_host::identifier::ChainId},
    timestamp::Timestamp,
};
use sha2::{Digest, Sha256};
use tendermint_proto::{
    abci::{Event as AbciEvent, EventAttribute, TxResult},
    google::protobuf::Timestamp as BlockTime,
    types::Header,
};

/// What a Cosmos subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum CosmosUpdate {
    NewBlock(Header),
    Tx {
        result: TxResult,
        /// Time of the including block, nanoseconds
        block_time: Option<u64>,
    },
}

/// Builds an indexed ABCI event.
pub fn abci_event(kind: &str, attributes: &[(&str, &str)]) -> AbciEvent {
    AbciEvent {
        r#type: kind.to_string(),
        attributes: attributes
            .iter()
            .map(|(key, value)| EventAttribute {
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::copy_from_slice(value.as_bytes()),
                index: true,
            })
            .collect(),
    }
}

/// First attribute named `key`. Values that are not UTF-8 are skipped.
pub fn attribute<'a>(event: &'a AbciEvent, key: &str) -> Option<&'a str> {
    event
        .attributes
        .iter()
        .find(|attribute| &attribute.key[..] == key.as_bytes())
        .and_then(|attribute| std::str::from_utf8(&attribute.value).ok())
}

fn owned(event: &AbciEvent, key: &str) -> Option<String> {
    attribute(event, key).map(str::to_string)
}

fn malformed(event: &AbciEvent, key: &str, e: impl std::fmt::Display) -> Error {
    Error::MalformedEvent(format!("{} attribute {}: {}", event.r#type, key, e))
}

fn parse_sequence(event: &AbciEvent) -> Result<Option<u64>, Error> {
    attribute(event, "packet_sequence")
        .map(|value| {
            value
                .parse::<Sequence>()
                .map(u64::from)
                .map_err(|e| malformed(event, "packet_sequence", e))
        })
        .transpose()
}

fn parse_timeout_timestamp(event: &AbciEvent) -> Result<Option<u64>, Error> {
    attribute(event, "packet_timeout_timestamp")
        .map(|value| {
            value
                .parse::<Timestamp>()
                .map(|timestamp| timestamp.nanoseconds())
                .map_err(|e| malformed(event, "packet_timeout_timestamp", e))
        })
        .transpose()
}

/// `{key}_hex` when present, the raw string attribute otherwise.
fn parse_bytes(event: &AbciEvent, key: &str) -> Result<Option<Vec<u8>>, Error> {
    let hex_key = format!("{}_hex", key);
    if let Some(value) = attribute(event, &hex_key) {
        return hex::decode(value).map(Some).map_err(|e| malformed(event, &hex_key, e));
    }
    Ok(attribute(event, key).map(|value| value.as_bytes().to_vec()))
}

fn packet_kind(kind: &str) -> Option<PacketEventKind> {
    Some(match kind {
        "send_packet" => PacketEventKind::Send,
        "recv_packet" => PacketEventKind::Receive,
        "write_acknowledgement" => PacketEventKind::WriteAcknowledgement,
        "acknowledge_packet" => PacketEventKind::Acknowledge,
        "timeout_packet" => PacketEventKind::Timeout,
        "timeout_on_close_packet" => PacketEventKind::TimeoutOnClose,
        _ => return None,
    })
}

fn block_time_nanos(time: &BlockTime) -> Option<u64> {
    let seconds = u64::try_from(time.seconds).ok()?;
    let nanos = u64::try_from(time.nanos).ok()?;
    seconds.checked_mul(1_000_000_000)?.checked_add(nanos)
}

/// Converts one ABCI event. Events the tracker does not consume yield `None`.
pub fn chain_event_try_from_abci_event(
    event: &AbciEvent,
    height: u64,
    timestamp: Option<u64>,
    tx_id: Option<&TxId>,
) -> Result<Option<ChainEvent>, Error> {
    if let Some(kind) = packet_kind(&event.r#type) {
        let timeout_height = attribute(event, "packet_timeout_height")
            .map(parse_height)
            .transpose()?;
        let raw = RawPacketEvent {
            kind,
            height,
            timestamp,
            tx_id: tx_id.cloned(),
            sequence: parse_sequence(event)?,
            src_port: owned(event, "packet_src_port"),
            src_channel: owned(event, "packet_src_channel"),
            dst_port: owned(event, "packet_dst_port"),
            dst_channel: owned(event, "packet_dst_channel"),
            channel_ordering: owned(event, "packet_channel_ordering"),
            connection_id: owned(event, "packet_connection"),
            connection_hops: vec![],
            data: parse_bytes(event, "packet_data")?,
            timeout_height,
            timeout_timestamp: parse_timeout_timestamp(event)?,
            ack: parse_bytes(event, "packet_ack")?,
            signer: None,
        };
        return Ok(Some(ChainEvent::Packet(raw)));
    }

    match event.r#type.as_str() {
        "update_client" => {
            let client_id = owned(event, "client_id").ok_or_else(|| {
                Error::MalformedEvent("update_client event without client_id".to_string())
            })?;
            // ibc-go >= 7 emits a comma separated list, the highest entry counts
            let heights = attribute(event, "consensus_heights")
                .or_else(|| attribute(event, "consensus_height"))
                .ok_or_else(|| {
                    Error::MalformedEvent(
                        "update_client event without consensus height".to_string(),
                    )
                })?;
            let consensus_height = heights
                .split(',')
                .map(|height| parse_height(height.trim()))
                .collect::<Result<Vec<Height>, _>>()?
                .into_iter()
                .max_by_key(ibc_height)
                .ok_or_else(|| {
                    Error::MalformedEvent(
                        "update_client event with empty consensus heights".to_string(),
                    )
                })?;
            Ok(Some(ChainEvent::ClientUpdate {
                client_id,
                consensus_height,
                timestamp: None,
            }))
        }
        "channel_close_init" | "channel_close_confirm" => {
            match (owned(event, "port_id"), owned(event, "channel_id")) {
                (Some(port), Some(channel)) => {
                    Ok(Some(ChainEvent::ChannelClosed { port, channel }))
                }
                _ => Err(Error::MalformedEvent(format!(
                    "{} event without port_id/channel_id",
                    event.r#type
                ))),
            }
        }
        _ => Ok(None),
    }
}

/// All tracker events of one delivered transaction, in emission order. The
/// transaction signer (`message.sender`) is attached to the packets it sent.
/// Failed transactions emit nothing, malformed events are logged and skipped.
pub fn chain_events_from_tx(result: &TxResult, block_time: Option<u64>) -> Vec<ChainEvent> {
    let Ok(height) = u64::try_from(result.height) else {
        log::warn!(target: "packet-tracker", "Ignoring transaction with height {}", result.height);
        return vec![];
    };
    let Some(deliver) = result.result.as_ref() else {
        return vec![];
    };
    if deliver.code != 0 {
        log::debug!(target: "packet-tracker", "Skipping failed transaction at height {} (code {})", height, deliver.code);
        return vec![];
    }
    // tendermint transaction hashes are the SHA-256 of the raw transaction
    let tx_id = (!result.tx.is_empty()).then(|| TxId(Sha256::digest(&result.tx).to_vec()));
    let signer = deliver
        .events
        .iter()
        .filter(|event| event.r#type == "message")
        .find_map(|event| owned(event, "sender"));

    deliver
        .events
        .iter()
        .filter_map(|event| {
            match chain_event_try_from_abci_event(event, height, block_time, tx_id.as_ref()) {
                Ok(Some(ChainEvent::Packet(mut raw))) => {
                    if raw.kind == PacketEventKind::Send {
                        raw.signer = signer.clone();
                    }
                    Some(ChainEvent::Packet(raw))
                }
                Ok(other) => other,
                Err(e) => {
                    log::warn!(target: "packet-tracker", "Skipping {} at height {}: {}", event.r#type, height, e);
                    None
                }
            }
        })
        .collect()
}

/// Block and transaction updates of the chain `chain_id` as [`ChainEvent`]s.
pub fn chain_events_from_update(chain_id: &str, update: &CosmosUpdate) -> Vec<ChainEvent> {
    match update {
        CosmosUpdate::NewBlock(header) => {
            let Ok(revision_height) = u64::try_from(header.height) else {
                log::warn!(target: "packet-tracker", "Ignoring header of {} with height {}", chain_id, header.height);
                return vec![];
            };
            vec![ChainEvent::NewBlock {
                height: Height {
                    revision_number: ChainId::chain_version(chain_id),
                    revision_height,
                },
                timestamp: header.time.as_ref().and_then(block_time_nanos).unwrap_or_default(),
            }]
        }
        CosmosUpdate::Tx { result, block_time } => chain_events_from_tx(result, *block_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermint_proto::abci::ResponseDeliverTx;

    fn send_packet() -> AbciEvent {
        abci_event(
            "send_packet",
            &[
                ("packet_data_hex", "7b7d"),
                ("packet_timeout_height", "1-500"),
                ("packet_timeout_timestamp", "0"),
                ("packet_sequence", "5"),
                ("packet_src_port", "transfer"),
                ("packet_src_channel", "channel-0"),
                ("packet_dst_port", "transfer"),
                ("packet_dst_channel", "channel-1"),
                ("packet_channel_ordering", "ORDER_UNORDERED"),
                ("packet_connection", "connection-0"),
            ],
        )
    }

    fn delivered(tx: &str, code: u32, events: Vec<AbciEvent>) -> TxResult {
        TxResult {
            height: 9,
            index: 0,
            tx: Bytes::copy_from_slice(tx.as_bytes()),
            result: Some(ResponseDeliverTx {
                code,
                events,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn parses_send_packet() {
        let event = chain_event_try_from_abci_event(&send_packet(), 42, Some(7), None)
            .unwrap()
            .unwrap();
        let ChainEvent::Packet(raw) = event else {
            panic!("expected a packet event")
        };
        assert_eq!(raw.kind, PacketEventKind::Send);
        assert_eq!(raw.height, 42);
        assert_eq!(raw.sequence, Some(5));
        assert_eq!(raw.data.as_deref(), Some(&b"{}"[..]));
        assert_eq!(
            raw.timeout_height,
            Some(Height {
                revision_number: 1,
                revision_height: 500
            })
        );
        assert_eq!(raw.timeout_timestamp, Some(0));
        assert_eq!(raw.connection_id.as_deref(), Some("connection-0"));
    }

    #[test]
    fn falls_back_to_string_payloads() {
        let event = abci_event(
            "write_acknowledgement",
            &[("packet_ack", r#"{"result":"AQ=="}"#), ("packet_sequence", "1")],
        );
        let parsed = chain_event_try_from_abci_event(&event, 1, None, None).unwrap();
        let Some(ChainEvent::Packet(raw)) = parsed else {
            panic!("expected a packet event")
        };
        assert_eq!(raw.ack.as_deref(), Some(&br#"{"result":"AQ=="}"#[..]));
    }

    #[test]
    fn rejects_bad_hex_and_numbers() {
        let bad_hex = abci_event("send_packet", &[("packet_data_hex", "zz")]);
        assert!(chain_event_try_from_abci_event(&bad_hex, 1, None, None).is_err());
        let bad_sequence = abci_event("recv_packet", &[("packet_sequence", "five")]);
        assert!(chain_event_try_from_abci_event(&bad_sequence, 1, None, None).is_err());
        let bad_timestamp = abci_event("recv_packet", &[("packet_timeout_timestamp", "soon")]);
        assert!(chain_event_try_from_abci_event(&bad_timestamp, 1, None, None).is_err());
    }

    #[test]
    fn update_client_takes_highest_consensus_height() {
        let event = abci_event(
            "update_client",
            &[("client_id", "07-tendermint-0"), ("consensus_heights", "1-10,2-3,1-12")],
        );
        let update = chain_event_try_from_abci_event(&event, 3, None, None).unwrap();
        assert_eq!(
            update,
            Some(ChainEvent::ClientUpdate {
                client_id: "07-tendermint-0".to_string(),
                consensus_height: Height {
                    revision_number: 2,
                    revision_height: 3
                },
                timestamp: None,
            })
        );
    }

    #[test]
    fn ignores_unrelated_events() {
        let event = abci_event("transfer", &[("amount", "10uatom")]);
        assert_eq!(chain_event_try_from_abci_event(&event, 1, None, None).unwrap(), None);
    }

    #[test]
    fn tx_signer_is_attached_to_sends() {
        let tx = delivered(
            "raw tx",
            0,
            vec![
                abci_event("message", &[("sender", "cosmos1sender")]),
                send_packet(),
                abci_event("send_packet", &[("packet_data_hex", "xyz")]),
            ],
        );
        let events = chain_events_from_tx(&tx, None);
        assert_eq!(events.len(), 1);
        let ChainEvent::Packet(raw) = &events[0] else {
            panic!("expected a packet event")
        };
        assert_eq!(raw.height, 9);
        assert_eq!(raw.signer.as_deref(), Some("cosmos1sender"));
        assert_eq!(raw.tx_id, Some(TxId(Sha256::digest(b"raw tx").to_vec())));
    }

    #[test]
    fn failed_transactions_emit_nothing() {
        let tx = delivered("raw tx", 5, vec![send_packet()]);
        assert!(chain_events_from_tx(&tx, None).is_empty());
    }

    #[test]
    fn block_revision_comes_from_chain_id() {
        let header = Header {
            height: 30,
            time: Some(BlockTime {
                seconds: 2,
                nanos: 5,
            }),
            ..Default::default()
        };
        let events = chain_events_from_update("osmosis-1", &CosmosUpdate::NewBlock(header));
        assert_eq!(
            events,
            vec![ChainEvent::NewBlock {
                height: Height {
                    revision_number: 1,
                    revision_height: 30
                },
                timestamp: 2_000_000_005,
            }]
        );
        let header = Header {
            height: 30,
            ..Default::default()
        };
        let events = chain_events_from_update("localnet", &CosmosUpdate::NewBlock(header));
        let [ChainEvent::NewBlock { height, .. }] = events.as_slice() else {
            panic!("expected one block event")
        };
        assert_eq!(height.revision_number, 0);
    }
}
