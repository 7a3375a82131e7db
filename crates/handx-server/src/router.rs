//! Protocol router: decode, gate, dispatch to the multiplexer, encode.
//!
//! Every inbound text frame yields exactly one reply envelope, except
//! `disconnect`, which asks the pump to close the connection. Multiplexer
//! failures are classified into wire error codes here and never escape.

use crate::auth::TokenManager;
use crate::tmux::{BridgeError, Multiplexer};
use handx_core::messages::{
    CaptureOutputResponse, CloseWindowResponse, CommandResponse, ConnectAckPayload,
    CreateSessionResponse, CreateWindowResponse, DeleteSessionResponse, ListSessionsResponse,
    ListWindowsResponse, RenameSessionResponse, SwitchWindowResponse,
};
use handx_core::{decode, Envelope, ErrorCode, Payload};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-connection protocol state.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub client_id: String,
    pub authenticated: bool,
}

impl ConnectionState {
    pub fn new(client_id: impl Into<String>, authenticated: bool) -> Self {
        Self {
            client_id: client_id.into(),
            authenticated,
        }
    }
}

/// What the pump should do with a routed frame.
#[derive(Debug)]
pub enum Routed {
    Reply(Envelope),
    Close,
}

/// A request that could not be served.
#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    message: String,
}

impl Failure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Map a bridge error to a wire code. `fallback` covers everything that is
/// not an identity problem.
fn classify(err: BridgeError, fallback: ErrorCode) -> Failure {
    let code = match &err {
        BridgeError::SessionNotFound(_) => ErrorCode::SessionNotFound,
        BridgeError::WindowNotFound { .. } => ErrorCode::WindowNotFound,
        BridgeError::AlreadyExists(_) => ErrorCode::SessionAlreadyExists,
        _ => fallback,
    };
    Failure::new(code, err.to_string())
}

fn tmux(err: BridgeError) -> Failure {
    classify(err, ErrorCode::TmuxError)
}

fn command(err: BridgeError) -> Failure {
    classify(err, ErrorCode::CommandFailed)
}

type Handled = Result<Option<Payload>, Failure>;

/// Shared by every connection.
pub struct Router {
    multiplexer: Arc<dyn Multiplexer>,
    tokens: Arc<TokenManager>,
    require_token: bool,
}

impl Router {
    pub fn new(
        multiplexer: Arc<dyn Multiplexer>,
        tokens: Arc<TokenManager>,
        require_token: bool,
    ) -> Self {
        Self {
            multiplexer,
            tokens,
            require_token,
        }
    }

    /// Whether a connection starts out authenticated given its upgrade-time
    /// query token.
    pub async fn preauthenticate(&self, query_token: Option<&str>) -> bool {
        if !self.require_token {
            return true;
        }
        match query_token {
            Some(token) if self.tokens.validate(token).await => {
                self.tokens.mark_used(token).await;
                true
            }
            _ => false,
        }
    }

    /// Route one inbound text frame.
    pub async fn route(&self, state: &mut ConnectionState, text: &str) -> Routed {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(client_id = %state.client_id, code = ?err.code(), error = %err, "rejecting inbound frame");
                return Routed::Reply(err.to_envelope());
            }
        };

        let kind = envelope.msg_type();
        debug!(client_id = %state.client_id, id = %envelope.id, %kind, "routing message");

        let gated = !matches!(envelope.payload, Payload::Connect(_) | Payload::Disconnect(_));
        if self.require_token && !state.authenticated && gated {
            return Routed::Reply(Envelope::error(
                ErrorCode::InvalidToken,
                "Authentication required: send connect with a valid token",
                Some(&envelope.id),
            ));
        }

        match self.dispatch(state, envelope.payload).await {
            Ok(Some(payload)) => Routed::Reply(Envelope::new(payload)),
            Ok(None) => Routed::Close,
            Err(failure) => {
                match failure.code {
                    ErrorCode::TmuxError | ErrorCode::CommandFailed => {
                        warn!(client_id = %state.client_id, %kind, code = ?failure.code, error = %failure.message, "request failed")
                    }
                    _ => {
                        debug!(client_id = %state.client_id, %kind, code = ?failure.code, error = %failure.message, "request refused")
                    }
                }
                Routed::Reply(Envelope::error(
                    failure.code,
                    failure.message,
                    Some(&envelope.id),
                ))
            }
        }
    }

    async fn dispatch(&self, state: &mut ConnectionState, payload: Payload) -> Handled {
        let mux = &self.multiplexer;
        match payload {
            Payload::Connect(p) => {
                if self.require_token {
                    if !self.tokens.validate(&p.token).await {
                        return Err(Failure::new(ErrorCode::InvalidToken, "Invalid or expired token"));
                    }
                    self.tokens.mark_used(&p.token).await;
                }
                state.authenticated = true;
                info!(
                    client_id = %state.client_id,
                    client_type = %p.client_type,
                    version = %p.version,
                    "client authenticated"
                );
                Ok(Some(Payload::ConnectAck(ConnectAckPayload {
                    success: true,
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    encryption_enabled: false,
                })))
            }

            Payload::Disconnect(_) => {
                info!(client_id = %state.client_id, "client requested disconnect");
                Ok(None)
            }

            Payload::ListSessions(_) => {
                let sessions = mux.list_sessions().await.map_err(tmux)?;
                Ok(Some(Payload::ListSessionsResponse(ListSessionsResponse {
                    sessions,
                })))
            }

            Payload::CreateSession(p) => {
                let session = mux.create_session(&p.name).await.map_err(tmux)?;
                Ok(Some(Payload::CreateSessionResponse(CreateSessionResponse {
                    success: true,
                    session: Some(session),
                })))
            }

            Payload::DeleteSession(p) => {
                mux.kill_session(&p.session_name).await.map_err(tmux)?;
                Ok(Some(Payload::DeleteSessionResponse(DeleteSessionResponse {
                    success: true,
                    session_name: p.session_name,
                })))
            }

            Payload::RenameSession(p) => {
                mux.rename_session(&p.old_name, &p.new_name)
                    .await
                    .map_err(tmux)?;
                Ok(Some(Payload::RenameSessionResponse(RenameSessionResponse {
                    success: true,
                    old_name: p.old_name,
                    new_name: p.new_name,
                })))
            }

            Payload::ListWindows(p) => {
                let windows = mux.list_windows(&p.session_name).await.map_err(tmux)?;
                Ok(Some(Payload::ListWindowsResponse(ListWindowsResponse {
                    session_name: p.session_name,
                    windows,
                })))
            }

            Payload::CreateWindow(p) => {
                let window = mux
                    .create_window(&p.session_name, p.window_name.as_deref())
                    .await
                    .map_err(tmux)?;
                Ok(Some(Payload::CreateWindowResponse(CreateWindowResponse {
                    success: true,
                    session_name: p.session_name,
                    window,
                })))
            }

            Payload::CloseWindow(p) => {
                mux.close_window(&p.session_name, p.window_index)
                    .await
                    .map_err(tmux)?;
                Ok(Some(Payload::CloseWindowResponse(CloseWindowResponse {
                    success: true,
                    session_name: p.session_name,
                    window_index: p.window_index,
                })))
            }

            Payload::SwitchWindow(p) => {
                let window_name = mux
                    .switch_window(&p.session_name, p.window_index)
                    .await
                    .map_err(tmux)?;
                Ok(Some(Payload::SwitchWindowResponse(SwitchWindowResponse {
                    success: true,
                    session_name: p.session_name,
                    window_index: p.window_index,
                    window_name,
                })))
            }

            Payload::ExecuteCommand(p) => {
                mux.execute_command(&p.session_name, &p.command, p.window_index)
                    .await
                    .map_err(command)?;
                Ok(Some(Payload::ExecuteCommandResponse(CommandResponse {
                    success: true,
                    session_name: p.session_name,
                })))
            }

            Payload::SendText(p) => {
                mux.send_text(&p.session_name, &p.text, p.window_index)
                    .await
                    .map_err(command)?;
                Ok(Some(Payload::SendTextResponse(CommandResponse {
                    success: true,
                    session_name: p.session_name,
                })))
            }

            Payload::CaptureOutput(p) => {
                let output = mux
                    .capture_output(&p.session_name, p.window_index)
                    .await
                    .map_err(tmux)?;
                Ok(Some(Payload::CaptureOutputResponse(CaptureOutputResponse {
                    session_name: p.session_name,
                    output,
                })))
            }

            // Server-to-client kinds are not requests.
            other @ (Payload::ConnectAck(_)
            | Payload::ListSessionsResponse(_)
            | Payload::CreateSessionResponse(_)
            | Payload::DeleteSessionResponse(_)
            | Payload::RenameSessionResponse(_)
            | Payload::ListWindowsResponse(_)
            | Payload::CreateWindowResponse(_)
            | Payload::CloseWindowResponse(_)
            | Payload::SwitchWindowResponse(_)
            | Payload::ExecuteCommandResponse(_)
            | Payload::SendTextResponse(_)
            | Payload::TerminalOutput(_)
            | Payload::CaptureOutputResponse(_)
            | Payload::Error(_)) => Err(Failure::new(
                ErrorCode::UnknownMessageType,
                format!("Unexpected message type: {}", other.msg_type()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::fake::FakeTmux;
    use crate::tmux::Bridge;
    use handx_core::messages::ErrorPayload;
    use handx_core::MessageType;
    use std::time::Duration;

    struct Harness {
        bridge: Arc<Bridge<FakeTmux>>,
        tokens: Arc<TokenManager>,
        router: Router,
    }

    fn harness(require_token: bool) -> Harness {
        let bridge = Arc::new(Bridge::new(FakeTmux::default(), 0));
        let tokens = Arc::new(TokenManager::new());
        let router = Router::new(bridge.clone(), tokens.clone(), require_token);
        Harness {
            bridge,
            tokens,
            router,
        }
    }

    fn open_state() -> ConnectionState {
        ConnectionState::new("test-client", true)
    }

    async fn reply(router: &Router, state: &mut ConnectionState, text: &str) -> Envelope {
        match router.route(state, text).await {
            Routed::Reply(envelope) => envelope,
            Routed::Close => panic!("expected a reply"),
        }
    }

    fn error_of(envelope: &Envelope) -> &ErrorPayload {
        match &envelope.payload {
            Payload::Error(e) => e,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_session_returns_the_session() {
        let h = harness(false);
        let mut state = open_state();
        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"req-1","type":"create_session","payload":{"name":"build"},"timestamp":1}"#,
        )
        .await;

        assert_eq!(response.msg_type(), MessageType::CreateSessionResponse);
        assert_ne!(response.id, "req-1");
        let Payload::CreateSessionResponse(body) = &response.payload else {
            panic!("unexpected payload");
        };
        assert!(body.success);
        let session = body.session.as_ref().unwrap();
        assert_eq!(session.name, "build");
        assert!(!session.windows.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let h = harness(false);
        let mut state = open_state();
        let text = r#"{"id":"a","type":"create_session","payload":{"name":"x"}}"#;
        reply(&h.router, &mut state, text).await;
        let response = reply(&h.router, &mut state, text).await;
        assert_eq!(error_of(&response).code, ErrorCode::SessionAlreadyExists);
    }

    #[tokio::test]
    async fn execute_on_missing_session_references_request() {
        let h = harness(false);
        let mut state = open_state();
        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"req-9","type":"execute_command","payload":{"session_name":"build","command":"echo hi"}}"#,
        )
        .await;

        let error = error_of(&response);
        assert_eq!(error.code, ErrorCode::SessionNotFound);
        assert_eq!(error.original_message_id.as_deref(), Some("req-9"));
    }

    #[tokio::test]
    async fn execute_failure_is_command_failed() {
        let h = harness(false);
        let mut state = open_state();
        h.bridge.create_session("build").await.unwrap();
        h.bridge.client().fail_literal(true);

        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"e","type":"execute_command","payload":{"session_name":"build","command":"ls"}}"#,
        )
        .await;
        assert_eq!(error_of(&response).code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn send_text_and_capture() {
        let h = harness(false);
        let mut state = open_state();
        h.bridge.create_session("build").await.unwrap();
        h.bridge.client().set_content("build", 0, 0, "\u{1b}[32mok\u{1b}[0m");

        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"s","type":"send_text","payload":{"session_name":"build","text":"partial"}}"#,
        )
        .await;
        assert_eq!(response.msg_type(), MessageType::SendTextResponse);

        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"c","type":"capture_output","payload":{"session_name":"build"}}"#,
        )
        .await;
        let Payload::CaptureOutputResponse(body) = &response.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(body.output, "\u{1b}[32mok\u{1b}[0m");
    }

    #[tokio::test]
    async fn switch_window_missing_then_present() {
        let h = harness(false);
        let mut state = open_state();
        h.bridge.create_session("build").await.unwrap();

        let text = r#"{"id":"w","type":"switch_window","payload":{"session_name":"build","window_index":3}}"#;
        let response = reply(&h.router, &mut state, text).await;
        assert_eq!(error_of(&response).code, ErrorCode::WindowNotFound);

        for name in ["one", "two", "logs"] {
            h.bridge.create_window("build", Some(name)).await.unwrap();
        }
        let response = reply(&h.router, &mut state, text).await;
        let Payload::SwitchWindowResponse(body) = &response.payload else {
            panic!("unexpected payload: {response:?}");
        };
        assert_eq!(body.window_index, 3);
        assert_eq!(body.window_name, "logs");
    }

    #[tokio::test]
    async fn closing_last_window_is_tmux_error() {
        let h = harness(false);
        let mut state = open_state();
        h.bridge.create_session("build").await.unwrap();
        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"cw","type":"close_window","payload":{"session_name":"build","window_index":0}}"#,
        )
        .await;
        assert_eq!(error_of(&response).code, ErrorCode::TmuxError);
        assert_eq!(h.bridge.list_windows("build").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn protocol_errors_are_classified() {
        let h = harness(false);
        let mut state = open_state();

        let response = reply(&h.router, &mut state, "{not json").await;
        let error = error_of(&response);
        assert_eq!(error.code, ErrorCode::InvalidMessage);
        assert!(error.original_message_id.is_none());

        let response = reply(&h.router, &mut state, r#"{"id":"u","type":"teleport","payload":{}}"#).await;
        assert_eq!(error_of(&response).code, ErrorCode::UnknownMessageType);

        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"p","type":"create_session","payload":{"name":7}}"#,
        )
        .await;
        let error = error_of(&response);
        assert_eq!(error.code, ErrorCode::InternalError);
        assert_eq!(error.original_message_id.as_deref(), Some("p"));

        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"r","type":"connect_ack","payload":{"success":true,"server_version":"1","encryption_enabled":false}}"#,
        )
        .await;
        assert_eq!(error_of(&response).code, ErrorCode::UnknownMessageType);
    }

    #[tokio::test]
    async fn requests_are_gated_until_connect() {
        let h = harness(true);
        let mut state = ConnectionState::new("c", false);
        let list = r#"{"id":"l","type":"list_sessions","payload":{}}"#;

        let response = reply(&h.router, &mut state, list).await;
        let error = error_of(&response);
        assert_eq!(error.code, ErrorCode::InvalidToken);
        assert_eq!(error.original_message_id.as_deref(), Some("l"));

        let bad = r#"{"id":"c1","type":"connect","payload":{"token":"nope","client_type":"web","version":"1"}}"#;
        let response = reply(&h.router, &mut state, bad).await;
        assert_eq!(error_of(&response).code, ErrorCode::InvalidToken);
        assert!(!state.authenticated);

        let token = h.tokens.issue(Duration::from_secs(60)).await;
        let good = format!(
            r#"{{"id":"c2","type":"connect","payload":{{"token":"{token}","client_type":"web","version":"1"}}}}"#
        );
        let response = reply(&h.router, &mut state, &good).await;
        let Payload::ConnectAck(ack) = &response.payload else {
            panic!("unexpected payload: {response:?}");
        };
        assert!(ack.success);
        assert!(!ack.encryption_enabled);
        assert!(state.authenticated);
        assert!(h.tokens.is_used(&token).await);

        let response = reply(&h.router, &mut state, list).await;
        assert_eq!(response.msg_type(), MessageType::ListSessionsResponse);
    }

    #[tokio::test]
    async fn expired_token_is_refused() {
        let h = harness(true);
        let mut state = ConnectionState::new("c", false);
        let token = h.tokens.issue(Duration::ZERO).await;
        let text = format!(
            r#"{{"id":"c","type":"connect","payload":{{"token":"{token}"}}}}"#
        );
        let response = reply(&h.router, &mut state, &text).await;
        assert_eq!(error_of(&response).code, ErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn connect_is_unconditional_without_enforcement() {
        let h = harness(false);
        let mut state = ConnectionState::new("c", false);
        let response = reply(
            &h.router,
            &mut state,
            r#"{"id":"c","type":"connect","payload":{"token":"anything"}}"#,
        )
        .await;
        assert_eq!(response.msg_type(), MessageType::ConnectAck);
    }

    #[tokio::test]
    async fn query_token_preauthenticates() {
        let h = harness(true);
        let token = h.tokens.issue(Duration::from_secs(60)).await;
        assert!(h.router.preauthenticate(Some(&token)).await);
        assert!(!h.router.preauthenticate(Some("bogus")).await);
        assert!(!h.router.preauthenticate(None).await);
        assert!(harness(false).router.preauthenticate(None).await);
    }

    #[tokio::test]
    async fn disconnect_closes() {
        let h = harness(true);
        let mut state = ConnectionState::new("c", false);
        let routed = h
            .router
            .route(&mut state, r#"{"id":"d","type":"disconnect","payload":{}}"#)
            .await;
        assert!(matches!(routed, Routed::Close));
    }
}
