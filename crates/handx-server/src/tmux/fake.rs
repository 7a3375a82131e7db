//! In-memory [`TmuxClient`] for tests.
//!
//! Mimics the tmux behaviours the bridge relies on: new sessions get one
//! window named `bash` with one pane, new windows take the lowest free index
//! and become active, and sends/captures are recorded for inspection.

use super::{BridgeError, BridgeResult, Pane, SessionRecord, TmuxClient};
use async_trait::async_trait;
use handx_core::Window;
use std::sync::Mutex;

/// A keystroke send recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Literal(String, String),
    Submit(String),
}

#[derive(Debug, Clone)]
struct FakePane {
    id: String,
    active: bool,
    content: String,
}

#[derive(Debug, Clone)]
struct FakeWindow {
    id: String,
    index: u32,
    name: String,
    active: bool,
    panes: Vec<FakePane>,
}

#[derive(Debug, Clone)]
struct FakeSession {
    id: String,
    name: String,
    windows: Vec<FakeWindow>,
}

#[derive(Debug, Default)]
struct State {
    sessions: Vec<FakeSession>,
    next_id: u32,
    sent: Vec<Sent>,
    fail_literal: bool,
    fail_history: bool,
    last_history: Option<u32>,
}

impl State {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn new_window(&mut self, name: &str, index: u32) -> FakeWindow {
        let wid = self.next();
        let pid = self.next();
        FakeWindow {
            id: format!("@{wid}"),
            index,
            name: name.to_string(),
            active: true,
            panes: vec![FakePane {
                id: format!("%{pid}"),
                active: true,
                content: String::new(),
            }],
        }
    }

    fn session(&mut self, name: &str) -> BridgeResult<&mut FakeSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| command_error(format!("can't find session: {name}")))
    }

    fn window(&mut self, session: &str, index: u32) -> BridgeResult<&mut FakeWindow> {
        self.session(session)?
            .windows
            .iter_mut()
            .find(|w| w.index == index)
            .ok_or_else(|| command_error(format!("can't find window: {index}")))
    }

    fn pane(&mut self, pane_id: &str) -> BridgeResult<&mut FakePane> {
        self.sessions
            .iter_mut()
            .flat_map(|s| s.windows.iter_mut())
            .flat_map(|w| w.panes.iter_mut())
            .find(|p| p.id == pane_id)
            .ok_or_else(|| command_error(format!("can't find pane: {pane_id}")))
    }
}

fn command_error(stderr: String) -> BridgeError {
    BridgeError::Command {
        command: "fake".into(),
        stderr,
    }
}

/// Scriptable in-memory tmux.
#[derive(Debug, Default)]
pub struct FakeTmux {
    state: Mutex<State>,
}

impl FakeTmux {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add an extra pane to a window.
    pub fn add_pane(&self, session: &str, index: u32, active: bool) {
        let mut st = self.state();
        let pid = st.next();
        let window = st.window(session, index).unwrap();
        window.panes.push(FakePane {
            id: format!("%{pid}"),
            active,
            content: String::new(),
        });
    }

    /// Make the pane at `pos` the only active pane of its window.
    pub fn set_active_pane(&self, session: &str, index: u32, pos: usize) {
        let mut st = self.state();
        let window = st.window(session, index).unwrap();
        for (i, pane) in window.panes.iter_mut().enumerate() {
            pane.active = i == pos;
        }
    }

    /// Clear every pane's active flag in a session.
    pub fn clear_active_panes(&self, session: &str) {
        let mut st = self.state();
        let s = st.session(session).unwrap();
        for pane in s.windows.iter_mut().flat_map(|w| w.panes.iter_mut()) {
            pane.active = false;
        }
    }

    pub fn pane_id(&self, session: &str, index: u32, pos: usize) -> String {
        let mut st = self.state();
        st.window(session, index).unwrap().panes[pos].id.clone()
    }

    pub fn set_content(&self, session: &str, index: u32, pos: usize, content: &str) {
        let mut st = self.state();
        st.window(session, index).unwrap().panes[pos].content = content.to_string();
    }

    pub fn fail_literal(&self, fail: bool) {
        self.state().fail_literal = fail;
    }

    pub fn fail_history(&self, fail: bool) {
        self.state().fail_history = fail;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state().sent.clone()
    }

    pub fn last_history_request(&self) -> Option<u32> {
        self.state().last_history
    }
}

#[async_trait]
impl TmuxClient for FakeTmux {
    async fn list_sessions(&self) -> BridgeResult<Vec<SessionRecord>> {
        Ok(self
            .state()
            .sessions
            .iter()
            .map(|s| SessionRecord {
                id: s.id.clone(),
                name: s.name.clone(),
                created: 1_700_000_000,
                attached: false,
            })
            .collect())
    }

    async fn list_windows(&self, session: &str) -> BridgeResult<Vec<Window>> {
        let mut st = self.state();
        let s = st.session(session)?;
        Ok(s.windows
            .iter()
            .map(|w| Window {
                id: w.id.clone(),
                name: w.name.clone(),
                index: w.index,
                active: w.active,
                pane_id: w
                    .panes
                    .iter()
                    .find(|p| p.active)
                    .or(w.panes.first())
                    .map(|p| p.id.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn list_session_panes(&self, session: &str) -> BridgeResult<Vec<Pane>> {
        let mut st = self.state();
        let s = st.session(session)?;
        Ok(s.windows
            .iter()
            .flat_map(|w| {
                w.panes.iter().map(move |p| Pane {
                    id: p.id.clone(),
                    active: p.active && w.active,
                })
            })
            .collect())
    }

    async fn list_window_panes(&self, session: &str, index: u32) -> BridgeResult<Vec<Pane>> {
        let mut st = self.state();
        let w = st.window(session, index)?;
        Ok(w.panes
            .iter()
            .map(|p| Pane {
                id: p.id.clone(),
                active: p.active,
            })
            .collect())
    }

    async fn new_session(&self, name: &str) -> BridgeResult<()> {
        let mut st = self.state();
        if st.sessions.iter().any(|s| s.name == name) {
            return Err(command_error(format!("duplicate session: {name}")));
        }
        let sid = st.next();
        let window = st.new_window("bash", 0);
        st.sessions.push(FakeSession {
            id: format!("${sid}"),
            name: name.to_string(),
            windows: vec![window],
        });
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> BridgeResult<()> {
        let mut st = self.state();
        st.session(name)?;
        st.sessions.retain(|s| s.name != name);
        Ok(())
    }

    async fn rename_session(&self, old_name: &str, new_name: &str) -> BridgeResult<()> {
        let mut st = self.state();
        st.session(old_name)?.name = new_name.to_string();
        Ok(())
    }

    async fn new_window(&self, session: &str, name: Option<&str>) -> BridgeResult<u32> {
        let mut st = self.state();
        let used: Vec<u32> = st.session(session)?.windows.iter().map(|w| w.index).collect();
        let index = (0..).find(|i| !used.contains(i)).unwrap_or(0);
        let window = st.new_window(name.unwrap_or("bash"), index);
        let s = st.session(session)?;
        for w in &mut s.windows {
            w.active = false;
        }
        s.windows.push(window);
        s.windows.sort_by_key(|w| w.index);
        Ok(index)
    }

    async fn kill_window(&self, session: &str, index: u32) -> BridgeResult<()> {
        let mut st = self.state();
        st.window(session, index)?;
        let s = st.session(session)?;
        s.windows.retain(|w| w.index != index);
        if s.windows.is_empty() {
            st.sessions.retain(|s| s.name != session);
        }
        Ok(())
    }

    async fn select_window(&self, session: &str, index: u32) -> BridgeResult<()> {
        let mut st = self.state();
        st.window(session, index)?;
        for w in &mut st.session(session)?.windows {
            w.active = w.index == index;
        }
        Ok(())
    }

    async fn send_literal(&self, pane_id: &str, text: &str) -> BridgeResult<()> {
        let mut st = self.state();
        if st.fail_literal {
            return Err(command_error("send-keys refused".into()));
        }
        st.pane(pane_id)?;
        st.sent.push(Sent::Literal(pane_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_submit(&self, pane_id: &str) -> BridgeResult<()> {
        let mut st = self.state();
        st.pane(pane_id)?;
        st.sent.push(Sent::Submit(pane_id.to_string()));
        Ok(())
    }

    async fn capture_history(&self, pane_id: &str, lines: u32) -> BridgeResult<String> {
        let mut st = self.state();
        st.last_history = Some(lines);
        if st.fail_history {
            return Err(command_error("capture-pane -S unsupported".into()));
        }
        Ok(st.pane(pane_id)?.content.clone())
    }

    async fn capture_visible(&self, pane_id: &str) -> BridgeResult<String> {
        Ok(self.state().pane(pane_id)?.content.clone())
    }
}
