//! Pairing tokens: issue, validate, mark used, sweep.
//!
//! Tokens are 16 random bytes, hex encoded. `used` is informational and
//! never affects validation; only expiry does.

use handx_core::messages::random_hex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Bytes of randomness per token.
const TOKEN_BYTES: usize = 16;

#[derive(Debug, Clone)]
struct TokenRecord {
    created_at: Instant,
    expires_at: Instant,
    used: bool,
}

/// Owns every issued token. One instance per process, shared by handle.
#[derive(Debug, Default)]
pub struct TokenManager {
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token valid for `lifetime`.
    pub async fn issue(&self, lifetime: Duration) -> String {
        let token = random_hex(TOKEN_BYTES);
        let now = Instant::now();
        self.tokens.write().await.insert(
            token.clone(),
            TokenRecord {
                created_at: now,
                expires_at: now + lifetime,
                used: false,
            },
        );
        debug!(lifetime_secs = lifetime.as_secs(), "issued pairing token");
        token
    }

    /// `true` if the token exists and has not expired.
    pub async fn validate(&self, token: &str) -> bool {
        self.tokens
            .read()
            .await
            .get(token)
            .is_some_and(|record| Instant::now() < record.expires_at)
    }

    /// Record that a token has been presented successfully.
    pub async fn mark_used(&self, token: &str) {
        if let Some(record) = self.tokens.write().await.get_mut(token) {
            record.used = true;
            debug!(age_secs = record.created_at.elapsed().as_secs(), "pairing token used");
        }
    }

    #[cfg(test)]
    pub async fn is_used(&self, token: &str) -> bool {
        self.tokens
            .read()
            .await
            .get(token)
            .is_some_and(|record| record.used)
    }

    /// Drop every expired token. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, record| now < record.expires_at);
        let removed = before - tokens.len();
        if removed > 0 {
            info!(removed, remaining = tokens.len(), "swept expired tokens");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}
