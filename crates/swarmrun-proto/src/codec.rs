//! JSON wire codec.
//!
//! The envelope is a JSON object:
//! `{"type", "sender", "correlation_id", "payload", "timestamp", "version"}`.
//! `version` is checked before any other field is interpreted, so a message
//! from a newer peer is rejected instead of being half-understood.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use swarmrun_core::CorrelationId;

use crate::message::{Body, Message, MessageType, PROTOCOL_VERSION};
use crate::ProtocolError;

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    sender: String,
    correlation_id: CorrelationId,
    payload: Value,
    timestamp: i64,
    version: u16,
}

/// Encode a message to bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let envelope = Envelope {
        kind: message.kind(),
        sender: message.sender().to_string(),
        correlation_id: message.correlation_id().clone(),
        payload: message.body().to_payload()?,
        timestamp: message.timestamp_ms(),
        version: message.version(),
    };
    serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode bytes into a message.
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("envelope must be a JSON object".to_string()))?;

    let version = object
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Malformed("missing or invalid version".to_string()))?;
    if version == 0 || version > u64::from(PROTOCOL_VERSION) {
        return Err(ProtocolError::UnsupportedVersion {
            got: version,
            max: PROTOCOL_VERSION,
        });
    }

    // Reject unknown types with a precise error before the full parse.
    object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing type".to_string()))?
        .parse::<MessageType>()?;

    let envelope: Envelope = serde_json::from_value(value)?;
    let body = Body::from_payload(envelope.kind, envelope.payload)?;

    Ok(Message::from_parts(
        body,
        envelope.sender,
        envelope.correlation_id,
        envelope.timestamp,
        envelope.version,
    ))
}
