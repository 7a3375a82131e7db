use std::time::Duration;
use thiserror::Error;

/// Failures from the multiplexer bridge, already classified.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("window index {index} not found in session '{session}'")]
    WindowNotFound { session: String, index: u32 },

    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("cannot close the last window in session '{0}'")]
    LastWindow(String),

    #[error("no panes found in session '{0}'")]
    NoPane(String),

    #[error("invalid session name: {0}")]
    InvalidName(String),

    /// tmux ran but exited non-zero.
    #[error("tmux {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// tmux could not be started at all.
    #[error("failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("tmux did not respond within {0:?}")]
    Timeout(Duration),

    #[error("unexpected tmux output: {0}")]
    Parse(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
