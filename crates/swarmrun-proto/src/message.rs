//! The message envelope.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use swarmrun_core::CorrelationId;

use crate::payload::{
    Ack, Cancel, ClaimGrant, ClaimRequest, Deregister, Heartbeat, RegisterWorker, TaskResult,
    TaskStarted,
};
use crate::ProtocolError;

/// Highest protocol version this build understands.
pub const PROTOCOL_VERSION: u16 = 1;

/// Enumerated message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    RegisterWorker,
    Heartbeat,
    ClaimRequest,
    ClaimGrant,
    TaskStarted,
    TaskResult,
    Cancel,
    Deregister,
    Ack,
}

impl MessageType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterWorker => "REGISTER_WORKER",
            Self::Heartbeat => "HEARTBEAT",
            Self::ClaimRequest => "CLAIM_REQUEST",
            Self::ClaimGrant => "CLAIM_GRANT",
            Self::TaskStarted => "TASK_STARTED",
            Self::TaskResult => "TASK_RESULT",
            Self::Cancel => "CANCEL",
            Self::Deregister => "DEREGISTER",
            Self::Ack => "ACK",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "REGISTER_WORKER" => Self::RegisterWorker,
            "HEARTBEAT" => Self::Heartbeat,
            "CLAIM_REQUEST" => Self::ClaimRequest,
            "CLAIM_GRANT" => Self::ClaimGrant,
            "TASK_STARTED" => Self::TaskStarted,
            "TASK_RESULT" => Self::TaskResult,
            "CANCEL" => Self::Cancel,
            "DEREGISTER" => Self::Deregister,
            "ACK" => Self::Ack,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };
        Ok(kind)
    }
}

/// Typed payload of a message. The variant determines the message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    RegisterWorker(RegisterWorker),
    Heartbeat(Heartbeat),
    ClaimRequest(ClaimRequest),
    ClaimGrant(ClaimGrant),
    TaskStarted(TaskStarted),
    TaskResult(TaskResult),
    Cancel(Cancel),
    Deregister(Deregister),
    Ack(Ack),
}

impl Body {
    /// Message type of this body.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::RegisterWorker(_) => MessageType::RegisterWorker,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::ClaimRequest(_) => MessageType::ClaimRequest,
            Self::ClaimGrant(_) => MessageType::ClaimGrant,
            Self::TaskStarted(_) => MessageType::TaskStarted,
            Self::TaskResult(_) => MessageType::TaskResult,
            Self::Cancel(_) => MessageType::Cancel,
            Self::Deregister(_) => MessageType::Deregister,
            Self::Ack(_) => MessageType::Ack,
        }
    }

    /// Serialize the payload alone.
    pub(crate) fn to_payload(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::RegisterWorker(p) => serde_json::to_value(p),
            Self::Heartbeat(p) => serde_json::to_value(p),
            Self::ClaimRequest(p) => serde_json::to_value(p),
            Self::ClaimGrant(p) => serde_json::to_value(p),
            Self::TaskStarted(p) => serde_json::to_value(p),
            Self::TaskResult(p) => serde_json::to_value(p),
            Self::Cancel(p) => serde_json::to_value(p),
            Self::Deregister(p) => serde_json::to_value(p),
            Self::Ack(p) => serde_json::to_value(p),
        };
        value.map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Interpret a payload according to its declared type.
    pub(crate) fn from_payload(kind: MessageType, payload: Value) -> Result<Self, ProtocolError> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: MessageType,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload)
                .map_err(|e| ProtocolError::Malformed(format!("{} payload: {}", kind, e)))
        }

        let body = match kind {
            MessageType::RegisterWorker => Self::RegisterWorker(parse(kind, payload)?),
            MessageType::Heartbeat => Self::Heartbeat(parse(kind, payload)?),
            MessageType::ClaimRequest => Self::ClaimRequest(parse(kind, payload)?),
            MessageType::ClaimGrant => Self::ClaimGrant(parse(kind, payload)?),
            MessageType::TaskStarted => Self::TaskStarted(parse(kind, payload)?),
            MessageType::TaskResult => Self::TaskResult(parse(kind, payload)?),
            MessageType::Cancel => Self::Cancel(parse(kind, payload)?),
            MessageType::Deregister => Self::Deregister(parse(kind, payload)?),
            MessageType::Ack => Self::Ack(parse(kind, payload)?),
        };
        Ok(body)
    }
}

/// Envelope exchanged between the queen and workers. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: Body,
    sender: String,
    correlation_id: CorrelationId,
    timestamp_ms: i64,
    version: u16,
}

impl Message {
    /// Build a new request with a fresh correlation id.
    pub fn request(sender: impl Into<String>, body: Body) -> Self {
        Self::with_correlation_id(sender, CorrelationId::generate(), body)
    }

    /// Build a message with an explicit correlation id (e.g. a redelivery).
    pub fn with_correlation_id(
        sender: impl Into<String>,
        correlation_id: CorrelationId,
        body: Body,
    ) -> Self {
        Self {
            body,
            sender: sender.into(),
            correlation_id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Build the reply to this message, keeping its correlation id.
    pub fn reply(&self, sender: impl Into<String>, body: Body) -> Self {
        Self::with_correlation_id(sender, self.correlation_id.clone(), body)
    }

    /// Reassemble a decoded message. Only the codec calls this.
    pub(crate) fn from_parts(
        body: Body,
        sender: String,
        correlation_id: CorrelationId,
        timestamp_ms: i64,
        version: u16,
    ) -> Self {
        Self {
            body,
            sender,
            correlation_id,
            timestamp_ms,
            version,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Unix timestamp (milliseconds) when the message was built.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn version(&self) -> u16 {
        self.version
    }
}
