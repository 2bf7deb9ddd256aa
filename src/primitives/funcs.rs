use crate::core::{
    error::Error,
    packets::types::{Height, PacketTrackingRecord},
};
use ibc::core::ics02_client::height::Height as IbcHeight;
use std::time::{SystemTime, UNIX_EPOCH};

/// Parses a `{revision_number}-{revision_height}` height as found in event
/// attributes. `"0-0"` is the zero height, meaning no height bound.
pub fn parse_height(s: &str) -> Result<Height, Error> {
    if s == "0-0" {
        return Ok(Height::default());
    }
    let height: IbcHeight = s
        .parse()
        .map_err(|e| Error::MalformedEvent(format!("invalid height {:?}: {}", s, e)))?;
    Ok(Height {
        revision_number: height.revision_number(),
        revision_height: height.revision_height(),
    })
}

/// Ordered view of a height. `None` for the zero height.
pub fn ibc_height(height: &Height) -> Option<IbcHeight> {
    IbcHeight::new(height.revision_number, height.revision_height).ok()
}

/// Whether the counterparty at `current` can no longer receive the packet.
/// A zero bound never expires.
pub fn has_timed_out(
    record: &PacketTrackingRecord,
    current: &Height,
    timestamp: Option<u64>,
) -> bool {
    let height_expired = match (ibc_height(current), ibc_height(&record.timeout_height)) {
        (Some(current), Some(bound)) => current >= bound,
        _ => false,
    };
    let time_expired = record.timeout_timestamp != 0
        && timestamp.map_or(false, |now| now >= record.timeout_timestamp);
    height_expired || time_expired
}

/// Wall clock in nanoseconds since the unix epoch, used for audit fields only.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}
