//! JSON framing for the handx envelope.
//!
//! Decoding is staged: the generic envelope is parsed first, then the `type`
//! tag is validated against [`MessageType`], and only then is the payload
//! parsed against the schema that tag selects. Each stage maps to its own
//! wire [`ErrorCode`].

use crate::error::HandxResult;
use crate::messages::{Envelope, ErrorCode, MessageType, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Not a JSON object with a string `type`.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Envelope parsed but `type` names no known kind.
    #[error("unknown message type: {kind}")]
    UnknownType { id: String, kind: String },

    /// Known kind, but the payload does not match its schema.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        id: String,
        kind: MessageType,
        reason: String,
    },
}

impl DecodeError {
    /// The wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Malformed(_) => ErrorCode::InvalidMessage,
            DecodeError::UnknownType { .. } => ErrorCode::UnknownMessageType,
            DecodeError::InvalidPayload { .. } => ErrorCode::InternalError,
        }
    }

    /// The id of the offending message, when the envelope got far enough to
    /// have one.
    pub fn original_id(&self) -> Option<&str> {
        match self {
            DecodeError::Malformed(_) => None,
            DecodeError::UnknownType { id, .. } | DecodeError::InvalidPayload { id, .. } => {
                Some(id.as_str()).filter(|id| !id.is_empty())
            }
        }
    }

    /// Build the `error` envelope to send back for this failure.
    pub fn to_envelope(&self) -> Envelope {
        let message = match self {
            DecodeError::Malformed(_) => "Failed to parse message".to_string(),
            DecodeError::UnknownType { kind, .. } => format!("Unknown message type: {kind}"),
            DecodeError::InvalidPayload { kind, .. } => format!("Failed to parse {kind} payload"),
        };
        Envelope::error(self.code(), message, self.original_id())
    }
}

/// Stage one: the generic envelope, payload left unparsed.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    encrypted: bool,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: MessageType,
    payload: &'a Payload,
    timestamp: i64,
    #[serde(skip_serializing_if = "is_false")]
    encrypted: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Encode an envelope into a JSON text frame.
pub fn encode(envelope: &Envelope) -> HandxResult<String> {
    let wire = WireEnvelope {
        id: &envelope.id,
        kind: envelope.msg_type(),
        payload: &envelope.payload,
        timestamp: envelope.timestamp,
        encrypted: envelope.encrypted,
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode a JSON text frame into a typed envelope.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind: MessageType = raw.kind.parse().map_err(|_| DecodeError::UnknownType {
        id: raw.id.clone(),
        kind: raw.kind.clone(),
    })?;

    let payload = decode_payload(kind, raw.payload).map_err(|e| DecodeError::InvalidPayload {
        id: raw.id.clone(),
        kind,
        reason: e.to_string(),
    })?;

    Ok(Envelope {
        id: raw.id,
        payload,
        timestamp: raw.timestamp,
        encrypted: raw.encrypted,
    })
}

/// Parse `value` against the schema selected by `kind`. Total over
/// [`MessageType`].
fn decode_payload(kind: MessageType, value: Value) -> serde_json::Result<Payload> {
    Ok(match kind {
        MessageType::Connect => Payload::Connect(parse(value)?),
        MessageType::ConnectAck => Payload::ConnectAck(parse(value)?),
        MessageType::Disconnect => Payload::Disconnect(parse(value)?),
        MessageType::ListSessions => Payload::ListSessions(parse(value)?),
        MessageType::ListSessionsResponse => Payload::ListSessionsResponse(parse(value)?),
        MessageType::CreateSession => Payload::CreateSession(parse(value)?),
        MessageType::CreateSessionResponse => Payload::CreateSessionResponse(parse(value)?),
        MessageType::DeleteSession => Payload::DeleteSession(parse(value)?),
        MessageType::DeleteSessionResponse => Payload::DeleteSessionResponse(parse(value)?),
        MessageType::RenameSession => Payload::RenameSession(parse(value)?),
        MessageType::RenameSessionResponse => Payload::RenameSessionResponse(parse(value)?),
        MessageType::ListWindows => Payload::ListWindows(parse(value)?),
        MessageType::ListWindowsResponse => Payload::ListWindowsResponse(parse(value)?),
        MessageType::CreateWindow => Payload::CreateWindow(parse(value)?),
        MessageType::CreateWindowResponse => Payload::CreateWindowResponse(parse(value)?),
        MessageType::CloseWindow => Payload::CloseWindow(parse(value)?),
        MessageType::CloseWindowResponse => Payload::CloseWindowResponse(parse(value)?),
        MessageType::SwitchWindow => Payload::SwitchWindow(parse(value)?),
        MessageType::SwitchWindowResponse => Payload::SwitchWindowResponse(parse(value)?),
        MessageType::ExecuteCommand => Payload::ExecuteCommand(parse(value)?),
        MessageType::ExecuteCommandResponse => Payload::ExecuteCommandResponse(parse(value)?),
        MessageType::SendText => Payload::SendText(parse(value)?),
        MessageType::SendTextResponse => Payload::SendTextResponse(parse(value)?),
        MessageType::TerminalOutput => Payload::TerminalOutput(parse(value)?),
        MessageType::CaptureOutput => Payload::CaptureOutput(parse(value)?),
        MessageType::CaptureOutputResponse => Payload::CaptureOutputResponse(parse(value)?),
        MessageType::Error => Payload::Error(parse(value)?),
    })
}

/// A missing or `null` payload reads as `{}`.
fn parse<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    match value {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => serde_json::from_value(other),
    }
}
