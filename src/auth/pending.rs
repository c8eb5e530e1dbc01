//! Ephemeral pending-authorization state
//!
//! Correlates a browser login round trip with the PKCE verifier it was
//! issued against, keyed by the opaque `state` parameter.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::Rng;
use tracing::debug;

use super::AuthError;

struct PendingAuth {
    verifier: String,
    expires_at: i64,
}

/// TTL-scoped map from the `state` token to its verifier.
///
/// Owned by the service and shared by reference; entries are independent of
/// each other, and a state is consumable at most once.
pub struct PendingAuthStore {
    entries: Mutex<HashMap<String, PendingAuth>>,
}

impl PendingAuthStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a verifier and return the new state token identifying it.
    ///
    /// Expired entries are swept here as a side effect to bound memory; the
    /// authoritative expiry check happens in [`consume`](Self::consume).
    pub fn create(&self, verifier: String, ttl: Duration) -> Result<String, AuthError> {
        let state = generate_state();
        let now = Utc::now().timestamp();

        let mut entries = self.lock_entries()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        if entries.len() < before {
            debug!(
                "swept {} expired pending authorization(s)",
                before - entries.len()
            );
        }

        entries.insert(
            state.clone(),
            PendingAuth {
                verifier,
                expires_at: now + ttl.as_secs() as i64,
            },
        );
        Ok(state)
    }

    /// Atomically remove and return the verifier for `state`.
    ///
    /// Fails `StateNotFound` for unknown or already consumed states and
    /// `StateExpired` for entries past their TTL. Both outcomes are
    /// terminal: the entry is gone either way.
    pub fn consume(&self, state: &str) -> Result<String, AuthError> {
        let mut entries = self.lock_entries()?;
        let entry = entries.remove(state).ok_or(AuthError::StateNotFound)?;
        if Utc::now().timestamp() >= entry.expires_at {
            return Err(AuthError::StateExpired);
        }
        Ok(entry.verifier)
    }

    fn lock_entries(&self) -> Result<MutexGuard<'_, HashMap<String, PendingAuth>>, AuthError> {
        self.entries
            .lock()
            .map_err(|e| AuthError::Storage(format!("pending store lock poisoned: {}", e)))
    }
}

/// Generate an unpredictable state token, from a randomness source
/// independent of the verifier.
fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
