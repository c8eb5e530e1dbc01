//! HTTP client utilities

use reqwest::Client;
use std::time::Duration;

/// Build a reqwest Client with the given timeout and a crate user agent.
///
/// All outbound token-endpoint calls go through a client built here, so
/// every network operation carries a bounded timeout.
pub fn client_with_timeout(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("cadenza/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to create HTTP client")
}
