//! WebSocket listener using tokio-tungstenite.
//!
//! Every TCP connection goes through an upgrade policy during the HTTP
//! handshake: wrong path is refused with 404, a browser `Origin` outside the
//! allow-list with 403. A `token` query parameter is handed on to the server
//! so it can pre-authenticate the connection.

use handx_core::{HandxError, HandxResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    /// Value of the `token` query parameter on the upgrade request.
    pub query_token: Option<String>,
}

/// Which upgrade requests the listener accepts.
#[derive(Debug, Clone)]
pub struct UpgradePolicy {
    pub path: String,
    /// Exact origins, or `*` for any.
    pub allowed_origins: Vec<String>,
}

impl UpgradePolicy {
    /// Check an upgrade request. On success returns the query token, if any.
    pub fn check(
        &self,
        path: &str,
        query: Option<&str>,
        origin: Option<&str>,
    ) -> Result<Option<String>, StatusCode> {
        if path != self.path {
            return Err(StatusCode::NOT_FOUND);
        }
        if let Some(origin) = origin {
            if !self.origin_allowed(origin) {
                return Err(StatusCode::FORBIDDEN);
            }
        }
        Ok(query.and_then(query_token))
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.trim_end_matches('/') == origin)
    }
}

fn query_token(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(status.canonical_reason().map(str::to_string));
    *response.status_mut() = status;
    response
}

/// Bind and start accepting WebSocket connections.
///
/// Returns the bound address (useful with port 0) and a receiver that yields
/// upgraded connections.
pub async fn start_listener(
    bind_addr: &str,
    policy: UpgradePolicy,
) -> HandxResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HandxError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, path = %policy.path, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let policy = Arc::new(policy);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let policy = policy.clone();
                    tokio::spawn(async move {
                        let mut query_token = None;
                        let callback = |req: &Request, response: Response| {
                            let origin = req
                                .headers()
                                .get("origin")
                                .and_then(|value| value.to_str().ok());
                            match policy.check(req.uri().path(), req.uri().query(), origin) {
                                Ok(token) => {
                                    query_token = token;
                                    Ok(response)
                                }
                                Err(status) => {
                                    warn!(remote = %addr, path = %req.uri().path(), ?origin, %status, "upgrade refused");
                                    Err(reject(status))
                                }
                            }
                        };

                        match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    query_token,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                debug!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}
