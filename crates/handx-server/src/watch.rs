//! Unsolicited `terminal_output` pushes.
//!
//! Polls every session's capture while anyone is connected and broadcasts
//! the content of sessions that changed since the last poll.

use crate::hub::Hub;
use crate::tmux::Multiplexer;
use handx_core::messages::TerminalOutputPayload;
use handx_core::{Envelope, Payload};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

pub struct OutputWatcher {
    multiplexer: Arc<dyn Multiplexer>,
    hub: Arc<Hub>,
    /// Content hash per session at the last push.
    last: HashMap<String, u64>,
    sequence: i64,
}

impl OutputWatcher {
    pub fn new(multiplexer: Arc<dyn Multiplexer>, hub: Arc<Hub>) -> Self {
        Self {
            multiplexer,
            hub,
            last: HashMap::new(),
            sequence: 0,
        }
    }

    /// Poll forever at `interval`.
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One polling pass. Returns how many sessions were pushed.
    pub async fn poll_once(&mut self) -> usize {
        if self.hub.count().await == 0 {
            // Whoever connects next gets a full snapshot.
            self.last.clear();
            return 0;
        }

        let sessions = match self.multiplexer.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "output watcher could not list sessions");
                return 0;
            }
        };

        self.last
            .retain(|name, _| sessions.iter().any(|s| &s.name == name));

        let mut pushed = 0;
        for session in sessions {
            let output = match self.multiplexer.capture_output(&session.name, None).await {
                Ok(output) => output,
                Err(e) => {
                    debug!(session = %session.name, error = %e, "capture skipped");
                    continue;
                }
            };

            let digest = digest(&output);
            if self.last.get(&session.name) == Some(&digest) {
                continue;
            }
            self.last.insert(session.name.clone(), digest);

            self.sequence += 1;
            let envelope = Envelope::new(Payload::TerminalOutput(TerminalOutputPayload {
                session_name: session.name,
                output,
                sequence: self.sequence,
            }));
            match self.hub.broadcast(&envelope).await {
                Ok(_) => pushed += 1,
                Err(e) => warn!(error = %e, "failed to broadcast terminal output"),
            }
        }
        pushed
    }
}

fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
