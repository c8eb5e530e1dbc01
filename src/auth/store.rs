//! Durable token persistence
//!
//! The port the credential manager reads and writes through. The default
//! backing store is a JSON document in the user config directory; tests use
//! the in-memory implementation.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::AuthError;

/// The stored Spotify credential set. One per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent when the provider did not issue one; such a pair can be read
    /// but never refreshed.
    pub refresh_token: Option<String>,
    /// Unix timestamp in seconds.
    pub expires_at: i64,
}

impl TokenPair {
    /// True when the access token is within `margin_secs` of expiry, or
    /// already past it.
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        self.expires_at <= Utc::now().timestamp() + margin_secs
    }
}

/// Durable read/write of the current token pair.
///
/// Contract: `load()` immediately after `save(t)` returns a value equal to
/// `t`; `clear()` makes subsequent `load()` return `None`.
pub trait TokenStore: Send + Sync {
    fn save(&self, tokens: &TokenPair) -> Result<(), AuthError>;
    fn load(&self) -> Result<Option<TokenPair>, AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// File-backed token store under the platform config directory.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store at `{config_dir}/cadenza/tokens.json`.
    pub fn new() -> Result<Self, AuthError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AuthError::Storage("cannot determine config directory".to_string()))?;
        Ok(Self::at(config_dir.join("cadenza").join("tokens.json")))
    }

    /// Store at an explicit path.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, tokens: &TokenPair) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }

        let data = serde_json::to_string_pretty(tokens)
            .map_err(|e| AuthError::Storage(format!("failed to serialize tokens: {}", e)))?;

        // Write-then-rename so a concurrent load never sees a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(storage_err)?;

        // Tokens are secrets: user-only permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&tmp).map_err(storage_err)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&tmp, perms).map_err(storage_err)?;
        }

        fs::rename(&tmp, &self.path).map_err(storage_err)
    }

    fn load(&self) -> Result<Option<TokenPair>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read_to_string(&self.path).map_err(storage_err)?;
        let tokens = serde_json::from_str(&data)
            .map_err(|e| AuthError::Storage(format!("failed to parse token file: {}", e)))?;
        Ok(Some(tokens))
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }
}

fn storage_err(e: std::io::Error) -> AuthError {
    AuthError::Storage(e.to_string())
}

/// In-memory token store for tests.
#[cfg(test)]
pub struct MemoryTokenStore {
    tokens: std::sync::Mutex<Option<TokenPair>>,
}

#[cfg(test)]
impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: std::sync::Mutex::new(None),
        }
    }
}

#[cfg(test)]
impl TokenStore for MemoryTokenStore {
    fn save(&self, tokens: &TokenPair) -> Result<(), AuthError> {
        *self.tokens.lock().unwrap() = Some(tokens.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenPair>, AuthError> {
        Ok(self.tokens.lock().unwrap().clone())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.tokens.lock().unwrap() = None;
        Ok(())
    }
}
