//! OAuth protocol endpoints: `/authorize`, `/approve`, `/refuse`, `/token`.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::AppState;
use crate::dto::{ApproveForm, AuthorizeParams, TokenRequest, TokenResponse};
use crate::error::{found, ErrorBody, OAuthError};
use crate::models::{Client, PendingAuthorization, Session};
use crate::services::{AuthorizeOutcome, OAuthService, SessionService, SESSION_COOKIE};
use crate::utils::secret::constant_time_compare;

pub(crate) fn session_cookie(session: &Session) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(true)
        .build()
}

/// Attach the session cookie to a response when a session was just created.
pub(crate) fn with_session(jar: CookieJar, created: bool, session: &Session, response: Response) -> Response {
    if created {
        (jar.add(session_cookie(session)), response).into_response()
    } else {
        response
    }
}

pub(crate) fn csrf_rejected() -> Response {
    let body = ErrorBody {
        error: "invalid_request".to_string(),
        error_description: "missing or invalid CSRF token".to_string(),
    };
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// Check a submitted CSRF token against the session's, in constant time.
pub(crate) fn csrf_matches(session: &Session, submitted: Option<&str>) -> bool {
    submitted
        .map(|token| constant_time_compare(token, &session.csrf_token))
        .unwrap_or(false)
}

fn consent_page(session: &Session, client: &Client, pending: &PendingAuthorization) -> Response {
    let scopes = if pending.scopes.is_empty() {
        "<li>(no scope requested)</li>".to_string()
    } else {
        pending
            .scopes
            .iter()
            .map(|s| format!("<li>{}</li>", s))
            .collect::<Vec<_>>()
            .join("")
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorize {info}</title></head>
<body>
  <h1>{info}</h1>
  <p><a href="{homepage}">{homepage}</a> is asking for access to:</p>
  <ul>{scopes}</ul>
  <form method="post" action="/approve">
    <input type="hidden" name="csrf_token" value="{csrf}">
    <button type="submit">Approve</button>
  </form>
  <p><a href="/refuse">Refuse</a></p>
</body>
</html>
"#,
        info = client.info,
        homepage = client.homepage,
        scopes = scopes,
        csrf = session.csrf_token,
    ))
    .into_response()
}

/// GET /authorize - start a code or implicit grant.
///
/// Validates the request, parks it in the session, and either bounces to
/// the login form, renders the consent page, or issues straight away for
/// pre-approved clients.
pub async fn authorize_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let sessions = SessionService::new(state.clone());
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let (mut session, created) = match sessions.fetch_or_create(cookie.as_deref()).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let outcome = OAuthService::new(state.clone())
        .authorize(&mut session, &params)
        .await;

    if let Err(e) = sessions.save(session.clone()).await {
        return e.into_response();
    }

    let response = match outcome {
        Err(e) => e.into_response(),
        Ok(AuthorizeOutcome::LoginRequired) => found(&state.config.login_path),
        Ok(AuthorizeOutcome::ConsentRequired { client, pending }) => {
            consent_page(&session, &client, &pending)
        }
        Ok(AuthorizeOutcome::Issued { redirect_url }) => found(&redirect_url),
    };

    with_session(jar, created, &session, response)
}

/// POST /approve - user consent for the pending authorize request.
pub async fn approve_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ApproveForm>,
) -> Response {
    let sessions = SessionService::new(state.clone());
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let Ok(Some(mut session)) = sessions.fetch(cookie.as_deref()).await else {
        return csrf_rejected();
    };

    if !csrf_matches(&session, form.csrf_token.as_deref()) {
        return csrf_rejected();
    }

    let result = OAuthService::new(state).approve(&mut session).await;

    if let Err(e) = sessions.save(session).await {
        return e.into_response();
    }

    match result {
        Ok(redirect_url) => found(&redirect_url),
        Err(e) => e.into_response(),
    }
}

/// GET /refuse - user denial; bounces back with `error=access_denied`.
pub async fn refuse_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let sessions = SessionService::new(state.clone());
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let Ok(Some(mut session)) = sessions.fetch(cookie.as_deref()).await else {
        return OAuthError::InvalidRequest("no authorization request is pending".to_string())
            .into_response();
    };

    let result = OAuthService::new(state).refuse(&mut session);

    if let Err(e) = sessions.save(session).await {
        return e.into_response();
    }

    match result {
        Ok(redirect_url) => found(&redirect_url),
        Err(e) => e.into_response(),
    }
}

/// POST /token - grant exchange.
pub async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Result<TokenResponse, OAuthError> {
    OAuthService::new(state).token(&headers, &req).await
}
