//! Core server: accepts connections and hands each to its pump.
//!
//! Owns the hub, router and token manager for the process, plus the
//! background token sweep and (optionally) the output watcher.

use crate::auth::TokenManager;
use crate::config::ServerConfig;
use crate::hub::{ClientSession, Hub};
use crate::pump::{self, PumpConfig};
use crate::router::{ConnectionState, Router};
use crate::tmux::Multiplexer;
use crate::transport::websocket::{self, UpgradePolicy, WebSocketConnection};
use crate::watch::OutputWatcher;
use handx_core::messages::random_hex;
use handx_core::HandxResult;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// The handx gateway instance.
pub struct HandxServer {
    config: ServerConfig,
    multiplexer: Arc<dyn Multiplexer>,
    tokens: Arc<TokenManager>,
    hub: Arc<Hub>,
    router: Arc<Router>,
}

impl HandxServer {
    pub fn new(
        config: ServerConfig,
        multiplexer: Arc<dyn Multiplexer>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        let router = Arc::new(Router::new(
            multiplexer.clone(),
            tokens.clone(),
            config.require_token,
        ));
        Self {
            config,
            multiplexer,
            tokens,
            hub: Arc::new(Hub::new()),
            router,
        }
    }

    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }

    /// Bind the WebSocket listener.
    pub async fn bind(&self) -> HandxResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
        let policy = UpgradePolicy {
            path: self.config.path.clone(),
            allowed_origins: self.config.allowed_origins.clone(),
        };
        websocket::start_listener(&self.config.listen_addr(), policy).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, mut connections: mpsc::Receiver<WebSocketConnection>) -> HandxResult<()> {
        let sweep = self.spawn_token_sweep();
        let watcher = self.config.push_interval.map(|interval| {
            info!(interval_ms = interval.as_millis() as u64, "output push enabled");
            let watcher = OutputWatcher::new(self.multiplexer.clone(), self.hub.clone());
            tokio::spawn(watcher.run(interval))
        });

        let pump_config = PumpConfig {
            read_timeout: self.config.read_timeout,
            ping_interval: self.config.ping_interval,
            write_timeout: self.config.write_timeout,
            max_message_size: self.config.max_message_size,
        };

        while let Some(conn) = connections.recv().await {
            let hub = self.hub.clone();
            let router = self.router.clone();
            let queue = self.config.outbound_queue;
            tokio::spawn(async move {
                handle_connection(conn, hub, router, queue, pump_config).await;
            });
        }

        sweep.abort();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!("listener closed, server stopping");
        Ok(())
    }

    fn spawn_token_sweep(&self) -> tokio::task::JoinHandle<()> {
        let tokens = self.tokens.clone();
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let removed = tokens.sweep_expired().await;
                let remaining = tokens.len().await;
                debug!(removed, remaining, "token sweep");
            }
        })
    }
}

/// Register a new client, then pump it until it disconnects.
async fn handle_connection(
    conn: WebSocketConnection,
    hub: Arc<Hub>,
    router: Arc<Router>,
    queue: usize,
    pump_config: PumpConfig,
) {
    let client_id = format!("client-{}", random_hex(8));
    let authenticated = router.preauthenticate(conn.query_token.as_deref()).await;

    let (client, outbound) = ClientSession::new(client_id.clone(), queue);
    if !hub.register(client.clone()).await {
        warn!(client_id = %client_id, "client could not be registered");
        return;
    }
    info!(
        client_id = %client_id,
        remote = %conn.remote_addr,
        authenticated,
        "client connected"
    );

    let state = ConnectionState::new(client_id, authenticated);
    pump::run(conn.ws_stream, client, outbound, hub, router, state, pump_config).await;
}
