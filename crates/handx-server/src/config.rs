//! Gateway configuration: TOML file + CLI overrides.

use handx_core::{HandxError, HandxResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Upper bound for every configured duration: one year.
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub cors: CorsSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub tmux: TmuxSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            outbound_queue: default_outbound_queue(),
            read_timeout: default_read_timeout(),
            ping_interval: default_ping_interval(),
            write_timeout: default_write_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// `[cors]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSection {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// `[security]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySection {
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    #[serde(default = "default_true")]
    pub require_token: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            token_lifetime: default_token_lifetime(),
            sweep_interval: default_sweep_interval(),
            require_token: true,
        }
    }
}

/// `[tmux]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxSection {
    #[serde(default = "default_tmux_binary")]
    pub binary: String,
    #[serde(default = "default_history_lines")]
    pub history_lines: u32,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub push_interval_ms: u64,
}

impl Default for TmuxSection {
    fn default() -> Self {
        Self {
            binary: default_tmux_binary(),
            history_lines: default_history_lines(),
            command_timeout: default_command_timeout(),
            push_interval_ms: 0,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_outbound_queue() -> usize {
    256
}
fn default_read_timeout() -> u64 {
    60
}
fn default_ping_interval() -> u64 {
    54
}
fn default_write_timeout() -> u64 {
    10
}
fn default_max_message_size() -> usize {
    1024 * 1024
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_token_lifetime() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_tmux_binary() -> String {
    "tmux".to_string()
}
fn default_history_lines() -> u32 {
    10_000
}
fn default_command_timeout() -> u64 {
    10
}

/// Resolved gateway configuration (CLI overrides applied, durations typed).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub outbound_queue: usize,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub max_message_size: usize,
    pub allowed_origins: Vec<String>,
    pub token_lifetime: Duration,
    pub sweep_interval: Duration,
    pub require_token: bool,
    pub tmux_binary: String,
    pub history_lines: u32,
    pub command_timeout: Duration,
    /// `None` disables unsolicited output pushes.
    pub push_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_no_token_check: bool,
    ) -> HandxResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| HandxError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_file(file_config);
        if let Some(host) = cli_host {
            config.host = host.to_string();
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        if cli_no_token_check {
            config.require_token = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            path: file.server.path,
            outbound_queue: file.server.outbound_queue,
            read_timeout: Duration::from_secs(file.server.read_timeout),
            ping_interval: Duration::from_secs(file.server.ping_interval),
            write_timeout: Duration::from_secs(file.server.write_timeout),
            max_message_size: file.server.max_message_size,
            allowed_origins: file.cors.allowed_origins,
            token_lifetime: Duration::from_secs(file.security.token_lifetime),
            sweep_interval: Duration::from_secs(file.security.sweep_interval),
            require_token: file.security.require_token,
            tmux_binary: file.tmux.binary,
            history_lines: file.tmux.history_lines,
            command_timeout: Duration::from_secs(file.tmux.command_timeout),
            push_interval: (file.tmux.push_interval_ms > 0)
                .then(|| Duration::from_millis(file.tmux.push_interval_ms)),
        }
    }

    fn validate(&self) -> HandxResult<()> {
        if !self.path.starts_with('/') {
            return Err(HandxError::Config(format!(
                "server.path must start with '/': {}",
                self.path
            )));
        }
        if self.outbound_queue == 0 {
            return Err(HandxError::Config("server.outbound_queue must be > 0".into()));
        }
        for (name, value) in [
            ("server.read_timeout", self.read_timeout),
            ("server.ping_interval", self.ping_interval),
            ("server.write_timeout", self.write_timeout),
            ("security.sweep_interval", self.sweep_interval),
            ("tmux.command_timeout", self.command_timeout),
        ] {
            if value.is_zero() {
                return Err(HandxError::Config(format!("{name} must be > 0")));
            }
        }
        // These get added to `Instant::now()`, which panics on overflow.
        for (name, value) in [
            ("server.read_timeout", self.read_timeout),
            ("server.ping_interval", self.ping_interval),
            ("server.write_timeout", self.write_timeout),
            ("security.token_lifetime", self.token_lifetime),
            ("security.sweep_interval", self.sweep_interval),
            ("tmux.command_timeout", self.command_timeout),
        ] {
            if value > MAX_DURATION {
                return Err(HandxError::Config(format!(
                    "{name} must be at most {} seconds",
                    MAX_DURATION.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// `host:port` for binding the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
