use super::types::{Height, NetworkId, PacketTrackingId};
use crate::core::{error::Error, events::RawPacketEvent};
use sha2::{Digest, Sha256};

fn required<'a>(
    value: &'a Option<String>,
    what: &str,
    event: &RawPacketEvent,
) -> Result<&'a str, Error> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MalformedEvent(format!("{} event without {}", event.kind, what)))
}

/// Derives the canonical identity of the packet an event refers to.
///
/// Destination-side events carry the source port and channel verbatim, so given
/// the source network resolved for them they land on the same key as the send.
pub fn identity_of(
    event: &RawPacketEvent,
    source_network: Option<&NetworkId>,
) -> Result<PacketTrackingId, Error> {
    let sequence = match event.sequence {
        Some(0) | None => {
            return Err(Error::MalformedEvent(format!(
                "{} event without a packet sequence",
                event.kind
            )))
        }
        Some(sequence) => sequence,
    };
    let source_port = required(&event.src_port, "source port", event)?.parse()?;
    let source_channel = required(&event.src_channel, "source channel", event)?.parse()?;
    let source_network = source_network.cloned().ok_or_else(|| {
        Error::MalformedEvent(format!("{} event without a source network", event.kind))
    })?;
    Ok(PacketTrackingId {
        sequence,
        source_port,
        source_channel,
        source_network,
    })
}

/// ICS-04 packet commitment:
/// `sha256(timeout_timestamp || revision_number || revision_height || sha256(data))`.
pub fn packet_commitment(timeout_height: &Height, timeout_timestamp: u64, data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(timeout_timestamp.to_be_bytes());
    hasher.update(timeout_height.revision_number.to_be_bytes());
    hasher.update(timeout_height.revision_height.to_be_bytes());
    hasher.update(Sha256::digest(data));
    hasher.finalize().into()
}

pub fn ack_commitment(ack: &[u8]) -> [u8; 32] {
    Sha256::digest(ack).into()
}
