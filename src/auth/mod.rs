//! OAuth2 PKCE credential lifecycle for the Spotify Web API

pub mod error;
pub mod manager;
pub mod oauth;
pub mod pending;
pub mod pkce;
pub mod store;

pub use error::AuthError;
pub use manager::{CallbackParams, CredentialManager};
pub use store::{FileTokenStore, TokenStore};
