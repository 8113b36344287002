//! OAuth error values and their two renderings (RFC 6749 §4.1.2.1, §5.2):
//! a redirect back to the client with `error` query parameters, or a JSON
//! body. Which one applies is carried by the error value itself, so the
//! encoding is a pure function of the value and nothing else.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::StoreError;

/// Protocol error, tagged with its RFC 6749 §5.2 kind (plus the PKCE and
/// bearer additions).
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("client authentication failed")]
    InvalidClient,

    #[error("{0}")]
    InvalidGrant(String),

    /// Bad resource-owner credentials or a disabled user on the password
    /// grant. Same wire kind as `InvalidGrant` but answered with 401.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("client is not authorized to use this grant")]
    UnauthorizedClient,

    #[error("unsupported grant type \"{0}\"")]
    UnsupportedGrantType(String),

    #[error("unsupported response type \"{0}\"")]
    UnsupportedResponseType(String),

    #[error("{0}")]
    InvalidScope(String),

    #[error("the resource owner denied the request")]
    AccessDenied,

    #[error("{0}")]
    InvalidToken(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OAuthError {
    /// Wire-format error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant(_) | Self::InvalidCredentials(_) => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::InvalidToken(_) => "invalid_token",
            Self::Store(_) | Self::Internal(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Internal(_))
    }
}

/// JSON error body. `state` is deliberately absent from token-endpoint
/// errors (RFC 6749 §5.2).
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_description: String,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            // Details go to the log, never to the client.
            tracing::error!(error = %self, "internal error");
            let body = ErrorBody {
                error: "server_error".to_string(),
                error_description: "internal server error".to_string(),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }

        let body = ErrorBody {
            error: self.kind().to_string(),
            error_description: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Authorize-endpoint failure. Checks that pass the redirect-uri validation
/// redirect back to the client; earlier ones answer JSON directly.
#[derive(Debug)]
pub struct AuthorizeError {
    pub error: OAuthError,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

impl AuthorizeError {
    /// Failure before a trustworthy redirect_uri exists; rendered as JSON.
    pub fn direct(error: OAuthError) -> Self {
        Self {
            error,
            redirect_uri: None,
            state: None,
        }
    }

    /// Failure after redirect_uri validation; rendered as a 302 back to the
    /// client with the state echoed verbatim.
    pub fn redirect(error: OAuthError, redirect_uri: &str, state: Option<&str>) -> Self {
        Self {
            error,
            redirect_uri: Some(redirect_uri.to_string()),
            state: state.map(str::to_string),
        }
    }
}

impl From<StoreError> for AuthorizeError {
    fn from(e: StoreError) -> Self {
        Self::direct(e.into())
    }
}

impl From<OAuthError> for AuthorizeError {
    fn from(e: OAuthError) -> Self {
        Self::direct(e)
    }
}

/// Append `error`, `error_description`, and `state` query parameters to a
/// redirect URI.
pub fn error_redirect_url(
    redirect_uri: &str,
    kind: &str,
    description: &str,
    state: Option<&str>,
) -> String {
    let mut url = redirect_uri.to_string();
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&format!(
        "error={}&error_description={}",
        urlencoding::encode(kind),
        urlencoding::encode(description)
    ));
    if let Some(state) = state {
        url.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    url
}

/// A plain 302. `axum::response::Redirect` speaks 303/307/308, and the
/// authorization responses here must be 302 Found (RFC 6749 §4.1.2).
pub fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        if self.error.is_internal() {
            return self.error.into_response();
        }

        match self.redirect_uri {
            Some(uri) => {
                let url = error_redirect_url(
                    &uri,
                    self.error.kind(),
                    &self.error.to_string(),
                    self.state.as_deref(),
                );
                found(&url)
            }
            None => {
                let body = ErrorBody {
                    error: self.error.kind().to_string(),
                    error_description: self.error.to_string(),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn json_rendering_carries_kind_and_description() {
        let response =
            OAuthError::InvalidGrant("PKCE code verifier is required but not provided".to_string())
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_grant");
        assert_eq!(
            body["error_description"],
            "PKCE code verifier is required but not provided"
        );
    }

    #[tokio::test]
    async fn bad_resource_owner_credentials_answer_401() {
        let response =
            OAuthError::InvalidCredentials("invalid username or password".to_string())
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn internal_errors_are_not_leaked() {
        let response = OAuthError::Internal(anyhow::anyhow!("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "server_error");
        assert_eq!(body["error_description"], "internal server error");
    }

    #[test]
    fn redirect_rendering_echoes_state() {
        let response = AuthorizeError::redirect(
            OAuthError::InvalidScope("scope is not allowed for this client".to_string()),
            "http://localhost",
            Some("123ABC"),
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("http://localhost?error=invalid_scope"));
        assert!(location.contains("state=123ABC"));
    }

    #[test]
    fn redirect_url_appends_to_existing_query() {
        let url = error_redirect_url("http://localhost/cb?keep=1", "access_denied", "denied", None);
        assert!(url.starts_with("http://localhost/cb?keep=1&error=access_denied"));
        assert!(!url.contains("state="));
    }

    #[tokio::test]
    async fn direct_authorize_errors_answer_400_json() {
        let response = AuthorizeError::direct(OAuthError::InvalidClient).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_client");
    }
}
