//! Service configuration
//!
//! Everything the auth subsystem consumes: the Spotify application settings
//! from the environment, the HTTP bind address, and the provider endpoints
//! (overridable so tests can stand in a local token endpoint).

use std::time::Duration;

use clap::Parser;

/// Scopes requested during login, covering the playback, library and
/// playlist tools the service exposes.
const DEFAULT_SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-library-read",
    "user-library-modify",
    "playlist-read-private",
    "playlist-modify-public",
    "playlist-modify-private",
    "user-top-read",
    "user-read-recently-played",
];

/// cadenza service configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "cadenza")]
#[command(about = "Spotify-connected backend with PKCE credential management", long_about = None)]
#[command(version)]
pub struct Config {
    /// Spotify application client id (public client, no secret)
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub client_id: String,

    /// Redirect URI registered with the Spotify application
    #[arg(long, env = "SPOTIFY_REDIRECT_URI")]
    pub redirect_uri: String,

    /// Address to bind the HTTP listener on
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP listener on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Scopes requested during login (space separated)
    #[arg(
        long,
        env = "SPOTIFY_SCOPES",
        value_delimiter = ' ',
        default_values_t = DEFAULT_SCOPES.iter().map(|s| s.to_string())
    )]
    pub scopes: Vec<String>,

    /// Authorization endpoint
    #[arg(
        long,
        hide = true,
        default_value = "https://accounts.spotify.com/authorize"
    )]
    pub authorize_endpoint: String,

    /// Token endpoint
    #[arg(
        long,
        hide = true,
        default_value = "https://accounts.spotify.com/api/token"
    )]
    pub token_endpoint: String,

    /// Lifetime of a pending authorization in seconds
    #[arg(long, default_value_t = 600)]
    pub pending_ttl_secs: u64,
}

impl Config {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}
