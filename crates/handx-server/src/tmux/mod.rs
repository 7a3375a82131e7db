//! Terminal multiplexer capability.
//!
//! [`Multiplexer`] is the contract the protocol router consumes. [`Bridge`]
//! implements it on top of a low-level [`TmuxClient`], adding existence
//! checks, pane/window resolution and error classification. [`TmuxCli`] is
//! the production client that shells out to the `tmux` binary.

pub mod bridge;
pub mod cli;
pub mod error;
#[cfg(test)]
pub mod fake;

pub use bridge::Bridge;
pub use cli::TmuxCli;
pub use error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use handx_core::{Session, Window};

/// Session and window operations the gateway needs from a multiplexer.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// All live sessions; empty (not an error) when there are none.
    async fn list_sessions(&self) -> BridgeResult<Vec<Session>>;

    /// Create a detached session. Fails with `AlreadyExists` on a name clash.
    async fn create_session(&self, name: &str) -> BridgeResult<Session>;

    async fn kill_session(&self, name: &str) -> BridgeResult<()>;

    async fn rename_session(&self, old_name: &str, new_name: &str) -> BridgeResult<()>;

    /// Type `command` into the target pane, then press enter as a second,
    /// separate send.
    async fn execute_command(
        &self,
        session: &str,
        command: &str,
        window: Option<u32>,
    ) -> BridgeResult<()>;

    /// Type `text` into the target pane without submitting it.
    async fn send_text(&self, session: &str, text: &str, window: Option<u32>) -> BridgeResult<()>;

    /// Buffered pane content with escape sequences preserved.
    async fn capture_output(&self, session: &str, window: Option<u32>) -> BridgeResult<String>;

    async fn list_windows(&self, session: &str) -> BridgeResult<Vec<Window>>;

    async fn create_window(&self, session: &str, name: Option<&str>) -> BridgeResult<Window>;

    async fn close_window(&self, session: &str, index: u32) -> BridgeResult<()>;

    /// Select a window; returns its display name.
    async fn switch_window(&self, session: &str, index: u32) -> BridgeResult<String>;
}

/// A session as tmux lists it, before windows are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    /// Unix time in seconds.
    pub created: i64,
    pub attached: bool,
}

/// A pane as tmux lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pane {
    pub id: String,
    pub active: bool,
}

/// Raw tmux primitives. One call per tmux invocation, no policy.
#[async_trait]
pub trait TmuxClient: Send + Sync {
    async fn list_sessions(&self) -> BridgeResult<Vec<SessionRecord>>;

    async fn list_windows(&self, session: &str) -> BridgeResult<Vec<Window>>;

    /// Panes across the whole session. `active` is set only for the active
    /// pane of the active window.
    async fn list_session_panes(&self, session: &str) -> BridgeResult<Vec<Pane>>;

    async fn list_window_panes(&self, session: &str, index: u32) -> BridgeResult<Vec<Pane>>;

    async fn new_session(&self, name: &str) -> BridgeResult<()>;

    async fn kill_session(&self, name: &str) -> BridgeResult<()>;

    async fn rename_session(&self, old_name: &str, new_name: &str) -> BridgeResult<()>;

    /// Returns the index tmux assigned to the new window.
    async fn new_window(&self, session: &str, name: Option<&str>) -> BridgeResult<u32>;

    async fn kill_window(&self, session: &str, index: u32) -> BridgeResult<()>;

    async fn select_window(&self, session: &str, index: u32) -> BridgeResult<()>;

    async fn send_literal(&self, pane_id: &str, text: &str) -> BridgeResult<()>;

    async fn send_submit(&self, pane_id: &str) -> BridgeResult<()>;

    /// Scrollback plus visible screen, up to `lines` of history.
    async fn capture_history(&self, pane_id: &str, lines: u32) -> BridgeResult<String>;

    /// Visible screen only.
    async fn capture_visible(&self, pane_id: &str) -> BridgeResult<String>;
}
