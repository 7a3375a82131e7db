//! Multiplexer bridge: identity resolution and error normalization over a
//! raw [`TmuxClient`].
//!
//! Every operation resolves the session by name first so that a missing
//! session is reported as `SessionNotFound` rather than whatever tmux prints.
//! Window and pane resolution is "active flag wins, else positional first".

use super::{BridgeError, BridgeResult, Multiplexer, Pane, SessionRecord, TmuxClient};
use async_trait::async_trait;
use handx_core::{Session, Window};
use tracing::{debug, info, warn};

/// Default scrollback depth for `capture_output`.
pub const DEFAULT_HISTORY_LINES: u32 = 10_000;

/// [`Multiplexer`] implementation over a raw tmux client.
pub struct Bridge<C> {
    client: C,
    history_lines: u32,
}

impl<C: TmuxClient> Bridge<C> {
    /// Create a bridge. A `history_lines` of zero selects the default.
    pub fn new(client: C, history_lines: u32) -> Self {
        let history_lines = if history_lines == 0 {
            DEFAULT_HISTORY_LINES
        } else {
            history_lines
        };
        Self {
            client,
            history_lines,
        }
    }

    /// Access the underlying client.
    #[cfg(test)]
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn find_session(&self, name: &str) -> BridgeResult<SessionRecord> {
        self.client
            .list_sessions()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| BridgeError::SessionNotFound(name.to_string()))
    }

    async fn session_exists(&self, name: &str) -> BridgeResult<bool> {
        Ok(self
            .client
            .list_sessions()
            .await?
            .iter()
            .any(|s| s.name == name))
    }

    /// Resolve a window by index, returning it with the session's window count.
    async fn find_window(&self, session: &str, index: u32) -> BridgeResult<(Window, usize)> {
        let windows = self.client.list_windows(session).await?;
        let count = windows.len();
        windows
            .into_iter()
            .find(|w| w.index == index)
            .map(|w| (w, count))
            .ok_or_else(|| BridgeError::WindowNotFound {
                session: session.to_string(),
                index,
            })
    }

    /// The pane keystrokes go to: within `window` if given, else the
    /// session's active pane.
    async fn resolve_pane(&self, session: &str, window: Option<u32>) -> BridgeResult<Pane> {
        self.find_session(session).await?;
        let panes = match window {
            Some(index) => {
                self.find_window(session, index).await?;
                self.client.list_window_panes(session, index).await?
            }
            None => self.client.list_session_panes(session).await?,
        };
        active_or_first(panes, |p| p.active)
            .ok_or_else(|| BridgeError::NoPane(session.to_string()))
    }

    async fn to_session(&self, record: SessionRecord) -> BridgeResult<Session> {
        let windows = self.client.list_windows(&record.name).await?;
        Ok(Session {
            id: record.id,
            name: record.name,
            windows,
            created_at: record.created.saturating_mul(1000),
            attached: record.attached,
        })
    }
}

#[async_trait]
impl<C: TmuxClient> Multiplexer for Bridge<C> {
    async fn list_sessions(&self) -> BridgeResult<Vec<Session>> {
        let records = self.client.list_sessions().await?;
        let mut sessions = Vec::with_capacity(records.len());
        for record in records {
            let name = record.name.clone();
            match self.to_session(record).await {
                Ok(session) => sessions.push(session),
                // Killed between the two listings.
                Err(e) => debug!(session = %name, error = %e, "skipping session"),
            }
        }
        Ok(sessions)
    }

    async fn create_session(&self, name: &str) -> BridgeResult<Session> {
        validate_session_name(name)?;
        if self.session_exists(name).await? {
            return Err(BridgeError::AlreadyExists(name.to_string()));
        }
        self.client.new_session(name).await?;
        info!(session = %name, "session created");

        let record = self.find_session(name).await?;
        self.to_session(record).await
    }

    async fn kill_session(&self, name: &str) -> BridgeResult<()> {
        self.find_session(name).await?;
        self.client.kill_session(name).await?;
        info!(session = %name, "session killed");
        Ok(())
    }

    async fn rename_session(&self, old_name: &str, new_name: &str) -> BridgeResult<()> {
        self.find_session(old_name).await?;
        validate_session_name(new_name)?;
        if self.session_exists(new_name).await? {
            return Err(BridgeError::AlreadyExists(new_name.to_string()));
        }
        self.client.rename_session(old_name, new_name).await?;
        info!(old = %old_name, new = %new_name, "session renamed");
        Ok(())
    }

    async fn execute_command(
        &self,
        session: &str,
        command: &str,
        window: Option<u32>,
    ) -> BridgeResult<()> {
        let pane = self.resolve_pane(session, window).await?;
        debug!(session, pane = %pane.id, "executing command");
        self.client.send_literal(&pane.id, command).await?;
        self.client.send_submit(&pane.id).await
    }

    async fn send_text(&self, session: &str, text: &str, window: Option<u32>) -> BridgeResult<()> {
        let pane = self.resolve_pane(session, window).await?;
        debug!(session, pane = %pane.id, "sending text");
        self.client.send_literal(&pane.id, text).await
    }

    async fn capture_output(&self, session: &str, window: Option<u32>) -> BridgeResult<String> {
        self.find_session(session).await?;
        let target = match window {
            Some(index) => self.find_window(session, index).await?.0,
            None => active_or_first(self.client.list_windows(session).await?, |w| w.active)
                .ok_or_else(|| BridgeError::NoPane(session.to_string()))?,
        };
        let panes = self.client.list_window_panes(session, target.index).await?;
        let pane = active_or_first(panes, |p| p.active)
            .ok_or_else(|| BridgeError::NoPane(session.to_string()))?;

        match self.client.capture_history(&pane.id, self.history_lines).await {
            Ok(content) => Ok(content),
            Err(e) => {
                warn!(session, pane = %pane.id, error = %e, "history capture failed, falling back to visible screen");
                self.client.capture_visible(&pane.id).await
            }
        }
    }

    async fn list_windows(&self, session: &str) -> BridgeResult<Vec<Window>> {
        self.find_session(session).await?;
        self.client.list_windows(session).await
    }

    async fn create_window(&self, session: &str, name: Option<&str>) -> BridgeResult<Window> {
        self.find_session(session).await?;
        let name = name.filter(|n| !n.is_empty());
        let index = self.client.new_window(session, name).await?;
        info!(session, index, "window created");
        self.find_window(session, index)
            .await
            .map(|(w, _)| w)
            .map_err(|_| BridgeError::Parse(format!("new window {index} not listed")))
    }

    async fn close_window(&self, session: &str, index: u32) -> BridgeResult<()> {
        self.find_session(session).await?;
        let (_, count) = self.find_window(session, index).await?;
        if count == 1 {
            return Err(BridgeError::LastWindow(session.to_string()));
        }
        self.client.kill_window(session, index).await?;
        info!(session, index, "window closed");
        Ok(())
    }

    async fn switch_window(&self, session: &str, index: u32) -> BridgeResult<String> {
        self.find_session(session).await?;
        let (window, _) = self.find_window(session, index).await?;
        self.client.select_window(session, index).await?;
        Ok(window.name)
    }
}

/// First item flagged active, else the first item.
fn active_or_first<T>(items: Vec<T>, is_active: impl Fn(&T) -> bool) -> Option<T> {
    let pos = items.iter().position(&is_active).unwrap_or(0);
    items.into_iter().nth(pos)
}

/// tmux rewrites `:` and `.` in session names, which would break lookup by name.
fn validate_session_name(name: &str) -> BridgeResult<()> {
    if name.trim().is_empty() {
        return Err(BridgeError::InvalidName("name is empty".into()));
    }
    if name.contains(':') || name.contains('.') {
        return Err(BridgeError::InvalidName(format!(
            "'{name}' contains ':' or '.'"
        )));
    }
    Ok(())
}
