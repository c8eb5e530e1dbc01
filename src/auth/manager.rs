//! Credential lifecycle manager
//!
//! Owns the pending-authorization store, the token persistence port and the
//! single-flight refresh guard. Everything else in the application obtains
//! access tokens exclusively through [`CredentialManager::get_valid_token`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::oauth::OAuthClient;
use super::pending::PendingAuthStore;
use super::pkce;
use super::store::{TokenPair, TokenStore};
use super::AuthError;
use crate::config::Config;

/// Refresh when the access token is within this many seconds of expiry.
///
/// Applied at every outbound token read, so a token never goes stale in the
/// middle of a request round trip.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// A refresh operation shared by every caller that arrives while it is in
/// flight. The outcome is cloned to all of them.
type SharedRefresh = Shared<BoxFuture<'static, Result<(), AuthError>>>;

/// Query parameters delivered by the provider redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub struct CredentialManager {
    config: Config,
    oauth: Arc<OAuthClient>,
    store: Arc<dyn TokenStore>,
    pending: PendingAuthStore,
    refresh_in_flight: Arc<Mutex<Option<SharedRefresh>>>,
}

impl CredentialManager {
    pub fn new(config: Config, store: Arc<dyn TokenStore>) -> Self {
        let oauth = Arc::new(OAuthClient::new(&config));
        Self {
            config,
            oauth,
            store,
            pending: PendingAuthStore::new(),
            refresh_in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a login attempt and return the authorization URL to redirect
    /// the browser to.
    pub fn begin_login(&self) -> Result<String, AuthError> {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::generate_challenge(&verifier);
        let state = self.pending.create(verifier, self.config.pending_ttl())?;

        let url = pkce::build_authorize_url(
            &self.config.authorize_endpoint,
            &self.config.client_id,
            &self.config.redirect_uri,
            &challenge,
            &state,
            &self.config.scopes,
        );

        info!("login flow initiated");
        Ok(url)
    }

    /// Finish one login attempt from the provider redirect.
    ///
    /// The pending state is consumed exactly once: success and failure are
    /// both terminal for it.
    pub async fn complete_login(&self, params: CallbackParams) -> Result<(), AuthError> {
        if let Some(error) = params.error {
            warn!("provider denied authorization: {}", error);
            return Err(AuthError::ProviderDenied(error));
        }

        let (code, state) = match (params.code, params.state) {
            (Some(code), Some(state)) => (code, state),
            _ => return Err(AuthError::InvalidCallback),
        };

        let verifier = self.pending.consume(&state)?;

        let token_resp = self.oauth.exchange_code(&code, &verifier).await?;
        self.store.save(&TokenPair {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            expires_at: Utc::now().timestamp() + token_resp.expires_in,
        })?;

        info!("authorization code exchanged, tokens stored");
        Ok(())
    }

    /// Obtain an access token valid for at least the refresh margin.
    ///
    /// Re-reads the store after a refresh so a concurrent renewal is never
    /// answered with a pre-refresh snapshot.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let tokens = self.store.load()?.ok_or(AuthError::NotAuthenticated)?;

        if tokens.expires_within(REFRESH_MARGIN_SECS) {
            self.ensure_fresh().await?;
        }

        let current = self.store.load()?.ok_or(AuthError::NotAuthenticated)?;
        Ok(current.access_token)
    }

    /// Refresh the stored token pair, deduplicating concurrent attempts.
    ///
    /// The first caller installs the refresh operation in the guard slot;
    /// every caller that arrives while it is in flight awaits the same
    /// shared future and observes the identical outcome. The slot is
    /// cleared inside the future on every completion path - a failed
    /// refresh must never wedge later callers.
    pub async fn ensure_fresh(&self) -> Result<(), AuthError> {
        let refresh = {
            let mut slot = lock_slot(&self.refresh_in_flight);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("refresh already in flight, attaching");
                    in_flight.clone()
                }
                None => {
                    let oauth = Arc::clone(&self.oauth);
                    let store = Arc::clone(&self.store);
                    let guard = Arc::clone(&self.refresh_in_flight);
                    let fut: SharedRefresh = async move {
                        let result = run_refresh(oauth, store).await;
                        *lock_slot(&guard) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        refresh.await
    }

    /// Drop the stored credential set.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()?;
        info!("stored tokens cleared");
        Ok(())
    }

    /// True when a credential set is currently stored.
    pub fn authenticated(&self) -> bool {
        matches!(self.store.load(), Ok(Some(_)))
    }
}

/// The refresh operation itself, run at most once per guard installation.
async fn run_refresh(
    oauth: Arc<OAuthClient>,
    store: Arc<dyn TokenStore>,
) -> Result<(), AuthError> {
    let tokens = store.load()?.ok_or(AuthError::RefreshUnavailable)?;
    let refresh_token = tokens
        .refresh_token
        .clone()
        .ok_or(AuthError::RefreshUnavailable)?;

    let resp = oauth.refresh_access_token(&refresh_token).await?;
    store.save(&TokenPair {
        access_token: resp.access_token,
        // Spotify may omit the rotated refresh token; keep the previous one
        // or future refreshes would break permanently
        refresh_token: resp.refresh_token.or(tokens.refresh_token),
        expires_at: Utc::now().timestamp() + resp.expires_in,
    })?;

    info!("access token refreshed");
    Ok(())
}

/// Lock the guard slot, recovering from poisoning.
///
/// The slot must stay operable no matter what: a permanently held guard
/// would block every future refresh. The `Option` inside is sound even
/// after a panic elsewhere, so recover it instead of propagating.
fn lock_slot(slot: &Mutex<Option<SharedRefresh>>) -> MutexGuard<'_, Option<SharedRefresh>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;
    use futures::future::join_all;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(token_endpoint: String) -> Config {
        Config {
            client_id: "cid".to_string(),
            redirect_uri: "http://localhost/cb".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            scopes: vec!["a".to_string(), "b".to_string()],
            authorize_endpoint: "https://accounts.spotify.com/authorize".to_string(),
            token_endpoint,
            pending_ttl_secs: 600,
        }
    }

    fn manager_with(token_endpoint: String, tokens: Option<TokenPair>) -> CredentialManager {
        let store = MemoryTokenStore::new();
        if let Some(pair) = &tokens {
            store.save(pair).unwrap();
        }
        CredentialManager::new(test_config(token_endpoint), Arc::new(store))
    }

    fn stored_pair(expires_in: i64, refresh_token: Option<&str>) -> TokenPair {
        TokenPair {
            access_token: "old-access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Utc::now().timestamp() + expires_in,
        }
    }

    fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
        match refresh {
            Some(r) => json!({ "access_token": access, "refresh_token": r, "expires_in": 3600 }),
            None => json!({ "access_token": access, "expires_in": 3600 }),
        }
    }

    #[tokio::test]
    async fn test_get_valid_token_without_tokens_fails() {
        let manager = manager_with("http://127.0.0.1:1/token".to_string(), None);

        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_issues_no_refresh_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_with(server.uri(), Some(stored_pair(300, Some("refresh-1"))));

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token, "old-access");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .and(body_string_contains("client_id=cid"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("new-access", Some("refresh-2"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_with(server.uri(), Some(stored_pair(30, Some("refresh-1"))));

        let results = join_all((0..6).map(|_| manager.get_valid_token())).await;
        for result in results {
            assert_eq!(result.unwrap(), "new-access");
        }

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_guard_for_next_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager_with(server.uri(), Some(stored_pair(30, Some("refresh-1"))));

        let first = manager.get_valid_token().await;
        assert!(matches!(
            first,
            Err(AuthError::RefreshFailed { status: 503, .. })
        ));

        // The guard was cleared on failure, so the next call issues exactly
        // one new request instead of hanging or short-circuiting.
        let second = manager.get_valid_token().await;
        assert!(matches!(
            second,
            Err(AuthError::RefreshFailed { status: 503, .. })
        ));

        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_with(server.uri(), Some(stored_pair(30, None)));

        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::RefreshUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new-access", None)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        store.save(&stored_pair(30, Some("refresh-1"))).unwrap();
        let manager = CredentialManager::new(test_config(server.uri()), store.clone());

        assert_eq!(manager.get_valid_token().await.unwrap(), "new-access");

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("new-access", Some("refresh-2"))),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        store.save(&stored_pair(30, Some("refresh-1"))).unwrap();
        let manager = CredentialManager::new(test_config(server.uri()), store.clone());

        manager.get_valid_token().await.unwrap();

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_begin_login_builds_authorize_url() {
        let manager = manager_with("http://127.0.0.1:1/token".to_string(), None);

        let url = manager.begin_login().unwrap();
        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("state="));
        assert!(url.contains("scope=a+b"));
    }

    fn state_from(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_complete_login_exchanges_code_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("code_verifier="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("access-1", Some("refresh-1"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let manager = CredentialManager::new(test_config(server.uri()), store.clone());

        let state = state_from(&manager.begin_login().unwrap());
        manager
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(state),
                error: None,
            })
            .await
            .unwrap();

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.access_token, "access-1");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
        let now = Utc::now().timestamp();
        assert!((persisted.expires_at - now - 3600).abs() <= 2);

        // A public client must never send its (nonexistent) secret
        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains("client_secret"));
    }

    #[tokio::test]
    async fn test_callback_error_param_fails_provider_denied() {
        let manager = manager_with("http://127.0.0.1:1/token".to_string(), None);

        let result = manager
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some("xyz".to_string()),
                error: Some("access_denied".to_string()),
            })
            .await;

        assert!(matches!(result, Err(AuthError::ProviderDenied(e)) if e == "access_denied"));
        assert!(!manager.authenticated());
    }

    #[tokio::test]
    async fn test_callback_missing_code_fails_invalid() {
        let manager = manager_with("http://127.0.0.1:1/token".to_string(), None);

        let result = manager
            .complete_login(CallbackParams {
                code: None,
                state: Some("xyz".to_string()),
                error: None,
            })
            .await;

        assert!(matches!(result, Err(AuthError::InvalidCallback)));
    }

    #[tokio::test]
    async fn test_callback_unknown_state_fails_not_found() {
        let manager = manager_with("http://127.0.0.1:1/token".to_string(), None);

        let result = manager
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some("never-issued".to_string()),
                error: None,
            })
            .await;

        assert!(matches!(result, Err(AuthError::StateNotFound)));
    }

    #[tokio::test]
    async fn test_failed_exchange_persists_nothing_and_consumes_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let manager = CredentialManager::new(test_config(server.uri()), store.clone());

        let state = state_from(&manager.begin_login().unwrap());
        let result = manager
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(state.clone()),
                error: None,
            })
            .await;

        assert!(matches!(
            result,
            Err(AuthError::ExchangeFailed { status: 400, .. })
        ));
        assert_eq!(store.load().unwrap(), None);

        // Failure consumed the state too; a retry must restart the flow
        let retry = manager
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(state),
                error: None,
            })
            .await;
        assert!(matches!(retry, Err(AuthError::StateNotFound)));
    }

    #[tokio::test]
    async fn test_logout_clears_stored_tokens() {
        let manager = manager_with(
            "http://127.0.0.1:1/token".to_string(),
            Some(stored_pair(3600, Some("refresh-1"))),
        );

        assert!(manager.authenticated());
        manager.logout().unwrap();
        assert!(!manager.authenticated());
        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }
}
