//! handx protocol message kinds, payloads and data model.
//!
//! Every frame on the wire is a JSON [`Envelope`]:
//! `{"id", "type", "payload", "timestamp", "encrypted"}`. The payload shape is
//! determined solely by `type`; [`crate::codec::decode`] validates the tag
//! before the payload is parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Message kind tags. Serialized as their snake_case wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connect,
    ConnectAck,
    Disconnect,

    ListSessions,
    ListSessionsResponse,
    CreateSession,
    CreateSessionResponse,
    DeleteSession,
    DeleteSessionResponse,
    RenameSession,
    RenameSessionResponse,

    ListWindows,
    ListWindowsResponse,
    CreateWindow,
    CreateWindowResponse,
    CloseWindow,
    CloseWindowResponse,
    SwitchWindow,
    SwitchWindowResponse,

    ExecuteCommand,
    ExecuteCommandResponse,
    SendText,
    SendTextResponse,

    TerminalOutput,
    CaptureOutput,
    CaptureOutputResponse,

    Error,
}

impl MessageType {
    /// Every defined kind, in declaration order.
    pub const ALL: [MessageType; 27] = [
        Self::Connect,
        Self::ConnectAck,
        Self::Disconnect,
        Self::ListSessions,
        Self::ListSessionsResponse,
        Self::CreateSession,
        Self::CreateSessionResponse,
        Self::DeleteSession,
        Self::DeleteSessionResponse,
        Self::RenameSession,
        Self::RenameSessionResponse,
        Self::ListWindows,
        Self::ListWindowsResponse,
        Self::CreateWindow,
        Self::CreateWindowResponse,
        Self::CloseWindow,
        Self::CloseWindowResponse,
        Self::SwitchWindow,
        Self::SwitchWindowResponse,
        Self::ExecuteCommand,
        Self::ExecuteCommandResponse,
        Self::SendText,
        Self::SendTextResponse,
        Self::TerminalOutput,
        Self::CaptureOutput,
        Self::CaptureOutputResponse,
        Self::Error,
    ];

    /// The wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectAck => "connect_ack",
            Self::Disconnect => "disconnect",
            Self::ListSessions => "list_sessions",
            Self::ListSessionsResponse => "list_sessions_response",
            Self::CreateSession => "create_session",
            Self::CreateSessionResponse => "create_session_response",
            Self::DeleteSession => "delete_session",
            Self::DeleteSessionResponse => "delete_session_response",
            Self::RenameSession => "rename_session",
            Self::RenameSessionResponse => "rename_session_response",
            Self::ListWindows => "list_windows",
            Self::ListWindowsResponse => "list_windows_response",
            Self::CreateWindow => "create_window",
            Self::CreateWindowResponse => "create_window_response",
            Self::CloseWindow => "close_window",
            Self::CloseWindowResponse => "close_window_response",
            Self::SwitchWindow => "switch_window",
            Self::SwitchWindowResponse => "switch_window_response",
            Self::ExecuteCommand => "execute_command",
            Self::ExecuteCommandResponse => "execute_command_response",
            Self::SendText => "send_text",
            Self::SendTextResponse => "send_text_response",
            Self::TerminalOutput => "terminal_output",
            Self::CaptureOutput => "capture_output",
            Self::CaptureOutputResponse => "capture_output_response",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown message type: {s}"))
    }
}

/// Error codes carried in [`ErrorPayload::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidToken,
    SessionNotFound,
    SessionAlreadyExists,
    WindowNotFound,
    CommandFailed,
    TmuxError,
    InternalError,
    InvalidMessage,
    UnknownMessageType,
}

// ── Envelope ─────────────────────────────────────────────────────────

/// A decoded protocol message.
///
/// The kind is not stored separately: it is always [`Payload::msg_type`], so an
/// envelope can never carry a payload that disagrees with its tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Caller-supplied on requests; gateway-generated on responses.
    pub id: String,
    pub payload: Payload,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    pub encrypted: bool,
}

impl Envelope {
    /// Build an outbound envelope with a fresh id and the current timestamp.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: generate_message_id(),
            payload,
            timestamp: now_millis(),
            encrypted: false,
        }
    }

    /// Build an `error` envelope referencing `original_message_id` when known.
    pub fn error(
        code: ErrorCode,
        message: impl Into<String>,
        original_message_id: Option<&str>,
    ) -> Self {
        Self::new(Payload::Error(ErrorPayload {
            code,
            message: message.into(),
            original_message_id: original_message_id
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }))
    }

    pub fn msg_type(&self) -> MessageType {
        self.payload.msg_type()
    }
}

/// All message payloads, one variant per [`MessageType`].
///
/// Serialized untagged: the tag travels in the envelope's `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Connect(ConnectPayload),
    ConnectAck(ConnectAckPayload),
    Disconnect(EmptyPayload),

    ListSessions(EmptyPayload),
    ListSessionsResponse(ListSessionsResponse),
    CreateSession(CreateSessionPayload),
    CreateSessionResponse(CreateSessionResponse),
    DeleteSession(DeleteSessionPayload),
    DeleteSessionResponse(DeleteSessionResponse),
    RenameSession(RenameSessionPayload),
    RenameSessionResponse(RenameSessionResponse),

    ListWindows(ListWindowsPayload),
    ListWindowsResponse(ListWindowsResponse),
    CreateWindow(CreateWindowPayload),
    CreateWindowResponse(CreateWindowResponse),
    CloseWindow(WindowTargetPayload),
    CloseWindowResponse(CloseWindowResponse),
    SwitchWindow(WindowTargetPayload),
    SwitchWindowResponse(SwitchWindowResponse),

    ExecuteCommand(ExecuteCommandPayload),
    ExecuteCommandResponse(CommandResponse),
    SendText(SendTextPayload),
    SendTextResponse(CommandResponse),

    TerminalOutput(TerminalOutputPayload),
    CaptureOutput(CaptureOutputPayload),
    CaptureOutputResponse(CaptureOutputResponse),

    Error(ErrorPayload),
}

impl Payload {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Connect(_) => MessageType::Connect,
            Self::ConnectAck(_) => MessageType::ConnectAck,
            Self::Disconnect(_) => MessageType::Disconnect,
            Self::ListSessions(_) => MessageType::ListSessions,
            Self::ListSessionsResponse(_) => MessageType::ListSessionsResponse,
            Self::CreateSession(_) => MessageType::CreateSession,
            Self::CreateSessionResponse(_) => MessageType::CreateSessionResponse,
            Self::DeleteSession(_) => MessageType::DeleteSession,
            Self::DeleteSessionResponse(_) => MessageType::DeleteSessionResponse,
            Self::RenameSession(_) => MessageType::RenameSession,
            Self::RenameSessionResponse(_) => MessageType::RenameSessionResponse,
            Self::ListWindows(_) => MessageType::ListWindows,
            Self::ListWindowsResponse(_) => MessageType::ListWindowsResponse,
            Self::CreateWindow(_) => MessageType::CreateWindow,
            Self::CreateWindowResponse(_) => MessageType::CreateWindowResponse,
            Self::CloseWindow(_) => MessageType::CloseWindow,
            Self::CloseWindowResponse(_) => MessageType::CloseWindowResponse,
            Self::SwitchWindow(_) => MessageType::SwitchWindow,
            Self::SwitchWindowResponse(_) => MessageType::SwitchWindowResponse,
            Self::ExecuteCommand(_) => MessageType::ExecuteCommand,
            Self::ExecuteCommandResponse(_) => MessageType::ExecuteCommandResponse,
            Self::SendText(_) => MessageType::SendText,
            Self::SendTextResponse(_) => MessageType::SendTextResponse,
            Self::TerminalOutput(_) => MessageType::TerminalOutput,
            Self::CaptureOutput(_) => MessageType::CaptureOutput,
            Self::CaptureOutputResponse(_) => MessageType::CaptureOutputResponse,
            Self::Error(_) => MessageType::Error,
        }
    }
}

// ── Data model ───────────────────────────────────────────────────────

/// A multiplexer session. `name` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub windows: Vec<Window>,
    /// Unix time in milliseconds.
    pub created_at: i64,
    pub attached: bool,
}

/// A window inside a session. `index` is unique within the session but not
/// necessarily contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: String,
    pub name: String,
    pub index: u32,
    pub active: bool,
    pub pane_id: String,
}

// ── Individual payload structs ───────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub client_type: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAckPayload {
    pub success: bool,
    pub server_version: String,
    pub encryption_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSessionPayload {
    pub session_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub success: bool,
    pub session_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSessionPayload {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSessionResponse {
    pub success: bool,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWindowsPayload {
    pub session_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWindowsResponse {
    pub session_name: String,
    pub windows: Vec<Window>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWindowPayload {
    pub session_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWindowResponse {
    pub success: bool,
    pub session_name: String,
    pub window: Window,
}

/// Payload of `close_window` and `switch_window`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTargetPayload {
    pub session_name: String,
    pub window_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseWindowResponse {
    pub success: bool,
    pub session_name: String,
    pub window_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchWindowResponse {
    pub success: bool,
    pub session_name: String,
    pub window_index: u32,
    pub window_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteCommandPayload {
    pub session_name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTextPayload {
    pub session_name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_index: Option<u32>,
}

/// Payload of `execute_command_response` and `send_text_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub session_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutputPayload {
    pub session_name: String,
    pub output: String,
    pub sequence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutputPayload {
    pub session_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutputResponse {
    pub session_name: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<String>,
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Generate a random message id (`msg-` + 16 hex chars).
pub fn generate_message_id() -> String {
    format!("msg-{}", random_hex(8))
}

/// Hex-encode `len` random bytes.
pub fn random_hex(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
