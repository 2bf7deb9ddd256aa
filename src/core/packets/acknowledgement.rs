//! Decoding of the success/error envelope carried by acknowledgements.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ibc_proto::ibc::core::channel::v1::{acknowledgement::Response, Acknowledgement};
use prost::Message;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckEnvelope {
    Result(Vec<u8>),
    Error(String),
}

impl AckEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, AckEnvelope::Result(_))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum JsonAck {
    Result(String),
    Error(String),
}

/// Decodes an acknowledgement, trying the ICS-04 JSON form first and the
/// protobuf form second. Anything else is an application specific success.
pub fn decode_ack(ack: &[u8]) -> AckEnvelope {
    if let Ok(json) = serde_json::from_slice::<JsonAck>(ack) {
        return match json {
            JsonAck::Result(result) => AckEnvelope::Result(
                STANDARD.decode(&result).unwrap_or_else(|_| result.into_bytes()),
            ),
            JsonAck::Error(error) => AckEnvelope::Error(error),
        };
    }
    if let Ok(Acknowledgement {
        response: Some(response),
    }) = Acknowledgement::decode(ack)
    {
        return match response {
            Response::Result(result) => AckEnvelope::Result(result),
            Response::Error(error) => AckEnvelope::Error(error),
        };
    }
    AckEnvelope::Result(ack.to_vec())
}
