//! Request/response shapes for the authorize and token endpoints
//! (RFC 6749, RFC 7636).
//!
//! Parameter structs keep every field optional: a missing `client_id` must
//! surface as an OAuth error body, not as an extractor rejection.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::PendingAuthorization;

/// Query parameters of `GET /authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl AuthorizeParams {
    /// Parse the space-separated scope parameter.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

impl From<&PendingAuthorization> for AuthorizeParams {
    fn from(pending: &PendingAuthorization) -> Self {
        Self {
            response_type: Some(pending.response_type.clone()),
            client_id: Some(pending.client_id.clone()),
            redirect_uri: Some(pending.redirect_uri.clone()),
            scope: if pending.scopes.is_empty() {
                None
            } else {
                Some(pending.scopes.join(" "))
            },
            state: pending.state.clone(),
            code_challenge: pending.code_challenge.clone(),
            code_challenge_method: pending.code_challenge_method.map(|m| m.to_string()),
        }
    }
}

/// Form body of `POST /token`, covering all four grant types.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

impl TokenRequest {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Successful token-endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl TokenResponse {
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: i64, scopes: &[String]) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token,
            scope: scopes.join(" "),
        }
    }
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        // RFC 6749 §5.1: token responses must not be cached.
        (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(self),
        )
            .into_response()
    }
}

/// Body of `GET /users/me`. `login` is serialized even when null, so callers
/// holding a client-credentials token see an explicit "no user".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub login: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<String>>,
    pub permissions: Option<Vec<String>>,
}
