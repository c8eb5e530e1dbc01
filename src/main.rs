//! cadenza - Spotify-connected backend service
//!
//! Hosts the OAuth2 PKCE credential lifecycle: the browser login round trip
//! and a concurrency-safe token refresh path. Domain tools obtain access
//! tokens through [`auth::CredentialManager::get_valid_token`].

mod auth;
mod config;
mod http;
mod server;

use std::sync::Arc;

use anyhow::Result;
use auth::{CredentialManager, FileTokenStore, TokenStore};
use clap::Parser;
use config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr) // Log to stderr to keep stdout clean
        .init();

    let config = Config::parse();
    let addr = format!("{}:{}", config.host, config.port);

    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new()?);
    let manager = Arc::new(CredentialManager::new(config, store));

    info!("starting cadenza");
    server::serve(&addr, manager).await
}
