//! Connection hub: the single authority over which clients are connected.
//!
//! Register, unregister and broadcast all take the same lock, so they are
//! linearizable with respect to each other. Broadcast never waits on a
//! client: a full queue evicts that client instead.

pub mod client;

pub use client::{ClientSession, EnqueueError};

use handx_core::{encode, Envelope, HandxResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct Hub {
    clients: Mutex<HashMap<String, Arc<ClientSession>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Returns `false` if it is already registered or has
    /// been closed.
    pub async fn register(&self, client: Arc<ClientSession>) -> bool {
        let mut clients = self.clients.lock().await;
        if !client.is_connected() || clients.contains_key(client.id()) {
            return false;
        }
        let id = client.id().to_string();
        clients.insert(id.clone(), client);
        info!(client_id = %id, total = clients.len(), "client registered");
        true
    }

    /// Remove and close a client. Safe to call any number of times from
    /// either pump loop; only the first call that finds the client returns
    /// `true`.
    pub async fn unregister(&self, client: &ClientSession) -> bool {
        let mut clients = self.clients.lock().await;
        let removed = clients.remove(client.id()).is_some();
        client.close();
        if removed {
            info!(client_id = %client.id(), total = clients.len(), "client unregistered");
        }
        removed
    }

    /// Encode once and queue the frame on every client. Clients whose
    /// queue is full are evicted. Returns how many clients accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> HandxResult<usize> {
        let frame = encode(envelope)?;
        let mut clients = self.clients.lock().await;

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, client) in clients.iter() {
            match client.enqueue(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    warn!(client_id = %id, "outbound queue full, evicting client");
                    dropped.push(id.clone());
                }
                Err(EnqueueError::Closed) => dropped.push(id.clone()),
            }
        }

        for id in dropped {
            if let Some(client) = clients.remove(&id) {
                client.close();
            }
        }

        debug!(kind = %envelope.msg_type(), delivered, "broadcast");
        Ok(delivered)
    }

    pub async fn count(&self) -> usize {
        self.clients.lock().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: &str) -> bool {
        self.clients.lock().await.contains_key(id)
    }
}
