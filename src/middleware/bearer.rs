//! Bearer-token protection for resource endpoints (RFC 6750).
//!
//! The middleware resolves the presented token through the stores on every
//! request, so disabling a client or user takes effect immediately, and
//! injects the resolved principal into request extensions.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::config::AppState;
use crate::error::{ErrorBody, OAuthError};
use crate::models::User;
use crate::services::OAuthService;

/// The principal a valid bearer token resolves to. `user` is `None` for
/// client-credentials tokens.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: Option<User>,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = BearerReject;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(BearerReject::MissingToken)
    }
}

/// Rejection raised by the bearer middleware.
#[derive(Debug)]
pub enum BearerReject {
    /// No usable `Authorization: Bearer` header (or query fallback).
    MissingToken,
    /// The token resolved to nothing valid: unknown, expired, or minted for
    /// a disabled client or user.
    InvalidToken(String),
    Internal(OAuthError),
}

impl IntoResponse for BearerReject {
    fn into_response(self) -> Response {
        match self {
            Self::MissingToken => {
                let body = ErrorBody {
                    error: "invalid_request".to_string(),
                    error_description: "bearer token is required".to_string(),
                };
                (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer".to_string())],
                    Json(body),
                )
                    .into_response()
            }
            Self::InvalidToken(description) => {
                let challenge = format!(
                    "Bearer error=\"invalid_token\", error_description=\"{}\"",
                    description
                );
                let body = ErrorBody {
                    error: "invalid_token".to_string(),
                    error_description: description,
                };
                (
                    StatusCode::BAD_REQUEST,
                    [(header::WWW_AUTHENTICATE, challenge)],
                    Json(body),
                )
                    .into_response()
            }
            Self::Internal(error) => error.into_response(),
        }
    }
}

/// Pull the bearer secret out of the Authorization header, falling back to
/// the `access_token` query parameter (RFC 6750 §2.3).
fn extract_bearer(request: &Request<Body>) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let token = header.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }
        return Some(token.to_string());
    }

    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "access_token")
        .map(|(_, value)| urlencoding::decode(value).map(|v| v.into_owned()))
        .and_then(Result::ok)
        .filter(|token| !token.is_empty())
}

/// Layer protecting resource routes. On success the resolved [`AuthContext`]
/// is attached and the request forwarded.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, BearerReject> {
    let secret = extract_bearer(&request).ok_or(BearerReject::MissingToken)?;

    let (token, user) = OAuthService::new(state)
        .validate_bearer(&secret)
        .await
        .map_err(|e| match e {
            OAuthError::InvalidToken(description) => BearerReject::InvalidToken(description),
            other => BearerReject::Internal(other),
        })?;

    request.extensions_mut().insert(AuthContext {
        user,
        client_id: token.client_id,
        scopes: token.scopes,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_membership_check() {
        let ctx = AuthContext {
            user: None,
            client_id: "client-1".to_string(),
            scopes: vec!["photo:read".to_string()],
        };
        assert!(ctx.has_scope("photo:read"));
        assert!(!ctx.has_scope("photo:write"));
    }

    #[test]
    fn extracts_from_header() {
        let request = Request::builder()
            .uri("/users/me")
            .header(header::AUTHORIZATION, "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), Some("abc123".to_string()));
    }

    #[test]
    fn falls_back_to_query_parameter() {
        let request = Request::builder()
            .uri("/users/me?access_token=tok-1&x=y")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), Some("tok-1".to_string()));
    }

    #[test]
    fn rejects_non_bearer_schemes_and_empty_tokens() {
        let basic = Request::builder()
            .uri("/users/me")
            .header(header::AUTHORIZATION, "Basic abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&basic), None);

        let empty = Request::builder()
            .uri("/users/me")
            .header(header::AUTHORIZATION, "Bearer ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&empty), None);

        let bare = Request::builder()
            .uri("/users/me")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&bare), None);
    }
}
