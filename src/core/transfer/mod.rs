//! Correlation of ICS-20 fungible token transfers and their memo instructions.

pub mod memo;

use crate::core::packets::types::{ChannelId, PacketTrackingId, PacketTrackingRecord, PortId};
use memo::{decode_memo, ForwardMemo, MemoVariant, SwapMemo, WasmHookMemo, XcmForwardMemo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// ICS-20 `FungibleTokenPacketData` as carried in packet data.
#[derive(Debug, Clone, Deserialize)]
struct FungibleTokenPacketData {
    denom: String,
    amount: String,
    sender: String,
    receiver: String,
    #[serde(default)]
    memo: String,
}

/// Transfer view of a packet, keyed by the same identity as its packet record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPacketTrackingRecord {
    pub id: PacketTrackingId,
    /// Denom as sent, with its trace on the source chain
    pub denom: String,
    /// Denom trace the voucher gets on the receiving chain
    pub dst_denom: String,
    /// Unsigned integer in decimal
    pub amount: String,
    /// Whether the token is native to (not a voucher on) the sending chain
    pub is_source: bool,
    pub sender: String,
    pub receiver: String,
    pub memo: Option<String>,
    pub memo_json: Option<Value>,
    /// At most one of the four memo instructions below is set
    pub packet_forwarding: Option<ForwardMemo>,
    pub packet_swap: Option<SwapMemo>,
    pub packet_wasm_hook: Option<WasmHookMemo>,
    pub packet_forward_xcm: Option<XcmForwardMemo>,
}

impl TransferPacketTrackingRecord {
    /// Denom the receiving chain's bank module uses, `ibc/{SHA256(trace)}` for vouchers.
    pub fn ibc_denom(&self) -> String {
        if has_trace(&self.dst_denom) {
            format!("ibc/{}", hex::encode_upper(Sha256::digest(self.dst_denom.as_bytes())))
        } else {
            self.dst_denom.clone()
        }
    }
}

/// Whether `denom` starts with a `{port}/channel-{n}` hop. Base denoms may
/// contain slashes themselves (`gamm/pool/1`, `factory/{creator}/{subdenom}`).
fn has_trace(denom: &str) -> bool {
    let parts: Vec<&str> = denom.split('/').collect();
    parts.len() > 2
        && !parts[0].is_empty()
        && matches!(parts[1].parse::<ChannelId>(), Ok(ChannelId::Sequential(_)))
}

fn is_decimal(amount: &str) -> bool {
    !amount.is_empty() && amount.bytes().all(|b| b.is_ascii_digit())
}

/// Derives transfer records from packets sent to the transfer module port.
#[derive(Debug, Clone)]
pub struct MemoResolver {
    transfer_port: PortId,
}

impl Default for MemoResolver {
    fn default() -> Self {
        Self::new(PortId::transfer())
    }
}

impl MemoResolver {
    pub fn new(transfer_port: PortId) -> Self {
        Self { transfer_port }
    }

    /// Returns `None` for other ports and for payloads that are not ICS-20
    /// packet data. Never touches the packet's lifecycle.
    pub fn resolve(&self, record: &PacketTrackingRecord) -> Option<TransferPacketTrackingRecord> {
        if record.dst_port != self.transfer_port {
            return None;
        }
        let data: FungibleTokenPacketData = match serde_json::from_slice(&record.packet_data) {
            Ok(data) => data,
            Err(e) => {
                log::debug!(target: "packet-tracker", "Packet {} on transfer port is not ICS-20 data: {}", record.id, e);
                return None;
            }
        };
        if !is_decimal(&data.amount) {
            log::debug!(target: "packet-tracker", "Packet {} has a non decimal amount {:?}", record.id, data.amount);
            return None;
        }

        let source_prefix = format!("{}/{}/", record.id.source_port, record.id.source_channel);
        let (is_source, dst_denom) = match data.denom.strip_prefix(&source_prefix) {
            // voucher returning to its origin, unwind one hop of the trace
            Some(unwound) => (false, unwound.to_string()),
            None => (
                true,
                format!("{}/{}/{}", record.dst_port, record.dst_channel, data.denom),
            ),
        };

        let (memo, memo_json, variant) = if data.memo.is_empty() {
            (None, None, None)
        } else {
            let (json, variant) = decode_memo(&data.memo);
            (Some(data.memo), json, variant)
        };

        let mut transfer = TransferPacketTrackingRecord {
            id: record.id.clone(),
            denom: data.denom,
            dst_denom,
            amount: data.amount,
            is_source,
            sender: data.sender,
            receiver: data.receiver,
            memo,
            memo_json,
            packet_forwarding: None,
            packet_swap: None,
            packet_wasm_hook: None,
            packet_forward_xcm: None,
        };
        match variant {
            Some(MemoVariant::Forwarding(memo)) => transfer.packet_forwarding = Some(memo),
            Some(MemoVariant::Swap(memo)) => transfer.packet_swap = Some(memo),
            Some(MemoVariant::WasmHook(memo)) => transfer.packet_wasm_hook = Some(memo),
            Some(MemoVariant::ForwardXcm(memo)) => transfer.packet_forward_xcm = Some(memo),
            None => {}
        }
        Some(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(dst_denom: &str) -> TransferPacketTrackingRecord {
        TransferPacketTrackingRecord {
            id: PacketTrackingId {
                sequence: 1,
                source_port: PortId::transfer(),
                source_channel: ChannelId::new(0),
                source_network: crate::core::packets::types::NetworkId::chain("chainA"),
            },
            denom: "uatom".to_string(),
            dst_denom: dst_denom.to_string(),
            amount: "1".to_string(),
            is_source: true,
            sender: "cosmos1sender".to_string(),
            receiver: "osmo1receiver".to_string(),
            memo: None,
            memo_json: None,
            packet_forwarding: None,
            packet_swap: None,
            packet_wasm_hook: None,
            packet_forward_xcm: None,
        }
    }

    #[test]
    fn traced_denoms_hash_to_ibc_denoms() {
        // sha256("transfer/channel-0/uatom"), the ATOM voucher on Osmosis
        assert_eq!(
            voucher("transfer/channel-0/uatom").ibc_denom(),
            "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
        );
        assert!(voucher("transfer/channel-1/gamm/pool/1").ibc_denom().starts_with("ibc/"));
    }

    #[test]
    fn slashes_in_base_denoms_are_not_traces() {
        assert_eq!(voucher("uatom").ibc_denom(), "uatom");
        assert_eq!(voucher("gamm/pool/1").ibc_denom(), "gamm/pool/1");
        let factory = "factory/osmo1creatoraddress/ufoo";
        assert_eq!(voucher(factory).ibc_denom(), factory);
    }

    #[test]
    fn memo_fields_serialize_as_null() {
        let json = serde_json::to_value(voucher("uatom")).unwrap();
        for key in ["packet_forwarding", "packet_swap", "packet_wasm_hook", "packet_forward_xcm"] {
            assert_eq!(json[key], Value::Null, "{}", key);
        }
    }
}
