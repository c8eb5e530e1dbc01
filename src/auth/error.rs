//! Error taxonomy for the credential lifecycle

use thiserror::Error;

/// Failures surfaced by the auth subsystem.
///
/// `Clone` is load-bearing: a single in-flight refresh fans its outcome out
/// to every caller attached to it, so the error type must be duplicable.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The identity provider returned an `error` parameter on the callback.
    #[error("Spotify returned an error: {0}")]
    ProviderDenied(String),

    #[error("Missing code or state parameter")]
    InvalidCallback,

    #[error("Invalid or already used state - please restart the login flow")]
    StateNotFound,

    #[error("Auth session expired - please restart the login flow")]
    StateExpired,

    #[error("Token exchange failed with status {status}: {body}")]
    ExchangeFailed { status: u16, body: String },

    #[error("Not authenticated - visit /auth/login")]
    NotAuthenticated,

    #[error("No refresh token stored - visit /auth/login")]
    RefreshUnavailable,

    #[error("Token refresh failed with status {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    /// Transport-level failure (connect error, timeout) talking to the
    /// token endpoint.
    #[error("Token endpoint request failed: {0}")]
    Network(String),

    #[error("Token storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// HTTP status the inbound adapter maps this failure to.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::ProviderDenied(_)
            | AuthError::InvalidCallback
            | AuthError::StateNotFound
            | AuthError::StateExpired
            | AuthError::ExchangeFailed { .. } => 400,
            AuthError::NotAuthenticated | AuthError::RefreshUnavailable => 401,
            AuthError::RefreshFailed { .. } | AuthError::Network(_) => 502,
            AuthError::Storage(_) => 500,
        }
    }
}
