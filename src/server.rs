//! Inbound HTTP adapter
//!
//! Thin translation layer between HTTP and the credential manager: the auth
//! routes for the browser round trip plus a health probe. No credential
//! logic lives here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{AuthError, CallbackParams, CredentialManager};

pub fn router(manager: Arc<CredentialManager>) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", get(logout))
        .route("/health", get(health))
        .with_state(manager)
}

/// Bind and serve until shutdown.
pub async fn serve(addr: &str, manager: Arc<CredentialManager>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

async fn login(State(manager): State<Arc<CredentialManager>>) -> Response {
    match manager.begin_login() {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(err) => error_response(err),
    }
}

async fn callback(
    State(manager): State<Arc<CredentialManager>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match manager.complete_login(params).await {
        Ok(()) => Html(SUCCESS_PAGE).into_response(),
        Err(err) => error_response(err),
    }
}

async fn logout(State(manager): State<Arc<CredentialManager>>) -> Response {
    match manager.logout() {
        Ok(()) => "Logged out - stored tokens cleared".into_response(),
        Err(err) => error_response(err),
    }
}

async fn health(State(manager): State<Arc<CredentialManager>>) -> Response {
    Json(json!({
        "status": "ok",
        "authenticated": manager.authenticated(),
    }))
    .into_response()
}

fn error_response(err: AuthError) -> Response {
    warn!("auth request failed: {}", err);
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Spotify connected</title>
</head>
<body style="font-family:sans-serif;text-align:center;padding:48px">
    <h1>Spotify connected</h1>
    <p>Authentication complete. You can close this tab.</p>
</body>
</html>"#;
