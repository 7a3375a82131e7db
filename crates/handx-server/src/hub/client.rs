//! Per-connection bookkeeping shared by the hub and the pump.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The bounded outbound queue is at capacity; the frame was dropped.
    Full,
    /// The client has been closed or unregistered.
    Closed,
}

/// One connected client: its id and the sending half of its outbound queue.
///
/// The sender lives behind a lock so that closing and enqueueing are mutually
/// exclusive. Once [`close`](Self::close) returns, no enqueue can succeed.
#[derive(Debug)]
pub struct ClientSession {
    id: String,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    closed: Notify,
}

impl ClientSession {
    /// Create a session with an outbound queue of `capacity` frames.
    /// The receiver belongs to the write loop.
    pub fn new(id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: id.into(),
            tx: Mutex::new(Some(tx)),
            closed: Notify::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame without waiting. On overflow the new frame is dropped.
    pub fn enqueue(&self, frame: String) -> Result<(), EnqueueError> {
        match self.sender().as_ref() {
            None => Err(EnqueueError::Closed),
            Some(tx) => tx.try_send(frame).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender().is_some()
    }

    /// Drop the sender so the write loop drains what is queued and stops.
    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&self) -> bool {
        let was_open = self.sender().take().is_some();
        if was_open {
            debug!(client_id = %self.id, "client session closed");
            self.closed.notify_waiters();
        }
        was_open
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_connected() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueue_is_fifo() {
        let (client, mut rx) = ClientSession::new("c1", 4);
        client.enqueue("a".into()).unwrap();
        client.enqueue("b".into()).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn overflow_drops_newest() {
        let (client, mut rx) = ClientSession::new("c1", 1);
        client.enqueue("first".into()).unwrap();
        assert_eq!(client.enqueue("second".into()), Err(EnqueueError::Full));
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (client, mut rx) = ClientSession::new("c1", 4);
        client.enqueue("queued".into()).unwrap();

        assert!(client.close());
        assert!(!client.close());
        assert!(!client.is_connected());
        assert_eq!(client.enqueue("late".into()), Err(EnqueueError::Closed));

        // Already-queued frames still drain, then the channel ends.
        assert_eq!(rx.recv().await.as_deref(), Some("queued"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn closed_wakes_waiter() {
        let (client, _rx) = ClientSession::new("c1", 4);
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.closed().await })
        };
        tokio::task::yield_now().await;
        client.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already closed: returns immediately.
        client.closed().await;
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (client, rx) = ClientSession::new("c1", 4);
        drop(rx);
        assert_eq!(client.enqueue("x".into()), Err(EnqueueError::Closed));
    }
}
