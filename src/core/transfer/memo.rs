//! Known instructions embedded in the memo of an ICS-20 transfer.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Packet forward middleware: `{"forward": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardMemo {
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Duration string (`"10m"`) or nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u8>,
    /// Memo for the next hop, either an object or a JSON string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Value>,
}

/// Swap on arrival: `{"swap": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapMemo {
    pub token_out: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Value>,
}

/// IBC hooks contract call: `{"wasm": {"contract": ..., "msg": ...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WasmHookMemo {
    pub contract: String,
    pub msg: Value,
}

/// Forward into a parachain over XCM: `{"xcm": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XcmForwardMemo {
    pub para_id: u32,
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// At most one variant is ever attached to a transfer record.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoVariant {
    Forwarding(ForwardMemo),
    Swap(SwapMemo),
    WasmHook(WasmHookMemo),
    ForwardXcm(XcmForwardMemo),
}

fn decode_variant<T: DeserializeOwned>(
    memo: &serde_json::Map<String, Value>,
    key: &str,
    wrap: fn(T) -> MemoVariant,
) -> Option<MemoVariant> {
    let inner = memo.get(key)?;
    serde_json::from_value(inner.clone()).ok().map(wrap)
}

/// Parses a raw memo. Returns the decoded JSON (if the memo is JSON at all) and
/// the first variant, in priority order, whose shape matches.
pub fn decode_memo(memo: &str) -> (Option<Value>, Option<MemoVariant>) {
    let Ok(json) = serde_json::from_str::<Value>(memo) else {
        return (None, None);
    };
    let variant = json.as_object().and_then(|object| {
        decode_variant(object, "forward", MemoVariant::Forwarding)
            .or_else(|| decode_variant(object, "swap", MemoVariant::Swap))
            .or_else(|| decode_variant(object, "wasm", MemoVariant::WasmHook))
            .or_else(|| decode_variant(object, "xcm", MemoVariant::ForwardXcm))
    });
    (Some(json), variant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_memo() {
        let (json, variant) = decode_memo(r#"{"forward":{"receiver":"chainC/addr"}}"#);
        assert!(json.is_some());
        match variant {
            Some(MemoVariant::Forwarding(forward)) => {
                assert_eq!(forward.receiver, "chainC/addr");
                assert_eq!(forward.channel, None);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn forwarding_has_priority_over_wasm() {
        let memo = r#"{"wasm":{"contract":"osmo1contract","msg":{}},"forward":{"receiver":"r","port":"transfer","channel":"channel-1"}}"#;
        assert!(matches!(decode_memo(memo).1, Some(MemoVariant::Forwarding(_))));
    }

    #[test]
    fn malformed_variant_falls_through() {
        // `forward` without a receiver is not a forwarding memo, the hook still matches
        let memo = r#"{"forward":{"port":"transfer"},"wasm":{"contract":"osmo1contract","msg":{"swap":{}}}}"#;
        assert!(matches!(decode_memo(memo).1, Some(MemoVariant::WasmHook(_))));
    }

    #[test]
    fn unknown_fields_do_not_match() {
        let (json, variant) = decode_memo(r#"{"xcm":{"para_id":2087,"receiver":"5F","fee":"1"}}"#);
        assert!(json.is_some());
        assert_eq!(variant, None);
    }

    #[test]
    fn swap_and_xcm() {
        let (_, swap) = decode_memo(r#"{"swap":{"token_out":"uosmo","min_amount_out":"10"}}"#);
        assert!(matches!(swap, Some(MemoVariant::Swap(_))));
        let (_, xcm) = decode_memo(r#"{"xcm":{"para_id":2087,"receiver":"5F"}}"#);
        assert!(matches!(xcm, Some(MemoVariant::ForwardXcm(XcmForwardMemo { para_id: 2087, .. }))));
    }

    #[test]
    fn plain_text_is_not_json() {
        assert_eq!(decode_memo("hello"), (None, None));
    }
}
