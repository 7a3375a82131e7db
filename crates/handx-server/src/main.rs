//! handx-server: realtime gateway between WebSocket clients and tmux.
//!
//! Accepts WebSocket connections, authenticates them with a pairing token,
//! and translates typed JSON requests into tmux session and window
//! operations.

mod auth;
mod config;
mod hub;
mod pairing;
mod pump;
mod router;
mod server;
mod tmux;
mod transport;
mod watch;

use auth::TokenManager;
use clap::Parser;
use config::ServerConfig;
use server::HandxServer;
use std::path::PathBuf;
use std::sync::Arc;
use tmux::{Bridge, TmuxCli};
use tracing::{error, info, warn};

/// handx-server: tmux gateway for remote terminal clients
#[derive(Parser, Debug)]
#[command(name = "handx-server", version, about = "tmux gateway for remote terminal clients")]
struct Cli {
    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.handx/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve every connection without a pairing token
    #[arg(long)]
    no_token_check: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting handx-server");

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(
        Some(&config_path),
        cli.host.as_deref(),
        cli.port,
        cli.no_token_check,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if !config.require_token {
        warn!("token check disabled, any client that can reach the port is served");
    }

    let tokens = Arc::new(TokenManager::new());
    let token = tokens.issue(config.token_lifetime).await;

    let tmux = TmuxCli::new(config.tmux_binary.clone(), config.command_timeout);
    let bridge = Arc::new(Bridge::new(tmux, config.history_lines));

    let host = pairing::display_host(&config.host);
    let path = config.path.clone();
    let lifetime = config.token_lifetime.as_secs();
    let server = HandxServer::new(config, bridge, tokens);

    let (addr, connections) = match server.bind().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "failed to start listener");
            std::process::exit(1);
        }
    };

    let url = pairing::connection_url(&host, addr.port(), &path, &token);
    info!(%url, "pairing URL");
    println!("{}", pairing::banner(&url, lifetime));

    tokio::select! {
        result = server.serve(connections) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("handx-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
