//! `tmux` command-line client.
//!
//! Every primitive is one `tmux` invocation via `tokio::process::Command`,
//! bounded by a timeout. Sessions are always targeted with `=name` so tmux
//! does exact rather than prefix matching.

use super::{BridgeError, BridgeResult, Pane, SessionRecord, TmuxClient};
use async_trait::async_trait;
use handx_core::Window;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Names go last so that a tab inside a name survives `splitn`.
const SESSION_FORMAT: &str = "#{session_id}\t#{session_created}\t#{session_attached}\t#{session_name}";
const WINDOW_FORMAT: &str = "#{window_id}\t#{window_index}\t#{window_active}\t#{pane_id}\t#{window_name}";
const PANE_FORMAT: &str = "#{pane_id}\t#{pane_active}\t#{window_active}";

/// Production [`TmuxClient`] backed by the tmux binary.
#[derive(Debug, Clone)]
pub struct TmuxCli {
    binary: String,
    timeout: Duration,
}

impl TmuxCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run tmux with `args` and return its stdout.
    async fn run(&self, args: &[&str]) -> BridgeResult<String> {
        debug!(binary = %self.binary, ?args, "running tmux");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(BridgeError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TmuxClient for TmuxCli {
    async fn list_sessions(&self) -> BridgeResult<Vec<SessionRecord>> {
        match self.run(&["list-sessions", "-F", SESSION_FORMAT]).await {
            Ok(out) => parse_sessions(&out),
            Err(BridgeError::Command { stderr, .. }) if is_no_server(&stderr) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn list_windows(&self, session: &str) -> BridgeResult<Vec<Window>> {
        let target = session_target(session);
        let out = self
            .run(&["list-windows", "-t", &target, "-F", WINDOW_FORMAT])
            .await?;
        parse_windows(&out)
    }

    async fn list_session_panes(&self, session: &str) -> BridgeResult<Vec<Pane>> {
        let target = session_target(session);
        let out = self
            .run(&["list-panes", "-s", "-t", &target, "-F", PANE_FORMAT])
            .await?;
        parse_panes(&out, true)
    }

    async fn list_window_panes(&self, session: &str, index: u32) -> BridgeResult<Vec<Pane>> {
        let target = window_target(session, index);
        let out = self
            .run(&["list-panes", "-t", &target, "-F", PANE_FORMAT])
            .await?;
        parse_panes(&out, false)
    }

    async fn new_session(&self, name: &str) -> BridgeResult<()> {
        self.run(&["new-session", "-d", "-s", name]).await.map(drop)
    }

    async fn kill_session(&self, name: &str) -> BridgeResult<()> {
        let target = session_target(name);
        self.run(&["kill-session", "-t", &target]).await.map(drop)
    }

    async fn rename_session(&self, old_name: &str, new_name: &str) -> BridgeResult<()> {
        let target = session_target(old_name);
        self.run(&["rename-session", "-t", &target, new_name])
            .await
            .map(drop)
    }

    async fn new_window(&self, session: &str, name: Option<&str>) -> BridgeResult<u32> {
        let target = format!("{}:", session_target(session));
        let mut args = vec!["new-window", "-t", target.as_str(), "-P", "-F", "#{window_index}"];
        if let Some(name) = name {
            args.extend(["-n", name]);
        }
        let out = self.run(&args).await?;
        out.trim()
            .parse()
            .map_err(|_| BridgeError::Parse(format!("window index {:?}", out.trim())))
    }

    async fn kill_window(&self, session: &str, index: u32) -> BridgeResult<()> {
        let target = window_target(session, index);
        self.run(&["kill-window", "-t", &target]).await.map(drop)
    }

    async fn select_window(&self, session: &str, index: u32) -> BridgeResult<()> {
        let target = window_target(session, index);
        self.run(&["select-window", "-t", &target]).await.map(drop)
    }

    async fn send_literal(&self, pane_id: &str, text: &str) -> BridgeResult<()> {
        self.run(&["send-keys", "-t", pane_id, "-l", "--", text])
            .await
            .map(drop)
    }

    async fn send_submit(&self, pane_id: &str) -> BridgeResult<()> {
        self.run(&["send-keys", "-t", pane_id, "C-m"]).await.map(drop)
    }

    async fn capture_history(&self, pane_id: &str, lines: u32) -> BridgeResult<String> {
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-p", "-e", "-S", &start, "-t", pane_id])
            .await
    }

    async fn capture_visible(&self, pane_id: &str) -> BridgeResult<String> {
        self.run(&["capture-pane", "-p", "-e", "-t", pane_id]).await
    }
}

fn session_target(name: &str) -> String {
    format!("={name}")
}

fn window_target(session: &str, index: u32) -> String {
    format!("={session}:{index}")
}

/// stderr tmux prints when there is nothing to list.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting to")
}

fn flag(field: &str) -> bool {
    field.trim() == "1"
}

fn parse_sessions(out: &str) -> BridgeResult<Vec<SessionRecord>> {
    out.lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.splitn(4, '\t').collect();
            let [id, created, attached, name] = fields[..] else {
                return Err(BridgeError::Parse(format!("session line {line:?}")));
            };
            Ok(SessionRecord {
                id: id.to_string(),
                name: name.to_string(),
                created: created.trim().parse().unwrap_or_default(),
                attached: attached.trim().parse::<u32>().unwrap_or_default() > 0,
            })
        })
        .collect()
}

fn parse_windows(out: &str) -> BridgeResult<Vec<Window>> {
    out.lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.splitn(5, '\t').collect();
            let [id, index, active, pane_id, name] = fields[..] else {
                return Err(BridgeError::Parse(format!("window line {line:?}")));
            };
            Ok(Window {
                id: id.to_string(),
                name: name.to_string(),
                index: index
                    .trim()
                    .parse()
                    .map_err(|_| BridgeError::Parse(format!("window index {index:?}")))?,
                active: flag(active),
                pane_id: pane_id.to_string(),
            })
        })
        .collect()
}

/// With `session_wide`, a pane only counts as active when its window is too.
fn parse_panes(out: &str, session_wide: bool) -> BridgeResult<Vec<Pane>> {
    out.lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            let [id, pane_active, window_active] = fields[..] else {
                return Err(BridgeError::Parse(format!("pane line {line:?}")));
            };
            Ok(Pane {
                id: id.to_string(),
                active: flag(pane_active) && (!session_wide || flag(window_active)),
            })
        })
        .collect()
}
