//! Spotify token-endpoint client
//!
//! Implements the two grants of the public-client PKCE flow. Neither
//! request ever carries a client secret - that is the defining property of
//! the flow and must be preserved.

use std::time::Duration;

use serde::Deserialize;

use super::AuthError;
use crate::config::Config;

/// Client for the provider's token endpoint.
pub struct OAuthClient {
    client_id: String,
    redirect_uri: String,
    token_endpoint: String,
    http_client: reqwest::Client,
}

/// Token endpoint response body, shared by both grants.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Spotify may omit this on refresh responses.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_endpoint: config.token_endpoint.clone(),
            http_client: crate::http::client_with_timeout(Duration::from_secs(30)),
        }
    }

    /// Exchange an authorization code for the initial token pair.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("code_verifier", verifier),
        ];

        let resp = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("token request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| AuthError::Network(format!("failed to decode token response: {}", e)))
    }

    /// Redeem a refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
        ];

        let resp = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("refresh request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| AuthError::Network(format!("failed to decode refresh response: {}", e)))
    }
}
