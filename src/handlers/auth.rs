//! Session authentication endpoints: the login form, the login submission,
//! and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::AppState;
use crate::dto::{LoginForm, LoginResponse};
use crate::error::found;
use crate::handlers::oauth::{csrf_matches, csrf_rejected, with_session};
use crate::services::{AuthService, OAuthService, SessionService, SESSION_COOKIE};

/// True when the client is a script following the JSON contract rather than
/// a browser following redirects.
fn wants_json(headers: &HeaderMap) -> bool {
    let xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
        .unwrap_or(false);

    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    xhr || accepts_json
}

/// GET /login - the login form, with the session's CSRF token embedded.
pub async fn login_form_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let sessions = SessionService::new(state);
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let (session, created) = match sessions.fetch_or_create(cookie.as_deref()).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let page = Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
  <h1>Sign in</h1>
  <form method="post" action="/login">
    <input type="hidden" name="csrf_token" value="{csrf}">
    <label>Login <input type="text" name="login"></label>
    <label>Password <input type="password" name="password"></label>
    <button type="submit">Sign in</button>
  </form>
</body>
</html>
"#,
        csrf = session.csrf_token,
    ))
    .into_response();

    with_session(jar, created, &session, page)
}

/// POST /login - credential submission.
///
/// CSRF-protected; content-negotiated: XHR callers get JSON with the landing
/// URL (200) or a 401, browsers get a 302 either way.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let sessions = SessionService::new(state.clone());
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let Ok(Some(mut session)) = sessions.fetch(cookie.as_deref()).await else {
        return csrf_rejected();
    };

    if !csrf_matches(&session, form.csrf_token.as_deref()) {
        return csrf_rejected();
    }

    let login = form.login.unwrap_or_default();
    let password = form.password.unwrap_or_default();

    match AuthService::new(state.clone()).authenticate(&login, &password).await {
        Ok(user) => {
            session.user_id = Some(user.id);
            let landing = session
                .pending_authorization
                .as_ref()
                .map(|pending| OAuthService::new(state.clone()).continue_url(pending))
                .unwrap_or_else(|| state.config.landing_path.clone());

            if let Err(e) = sessions.save(session).await {
                return e.into_response();
            }

            if wants_json(&headers) {
                Json(LoginResponse {
                    landing_url: landing,
                })
                .into_response()
            } else {
                found(&landing)
            }
        }
        Err(_) => {
            if wants_json(&headers) {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(crate::error::ErrorBody {
                        error: "invalid_grant".to_string(),
                        error_description: "invalid username or password".to_string(),
                    }),
                )
                    .into_response()
            } else {
                found(&format!("{}?error=invalid_credentials", state.config.login_path))
            }
        }
    }
}

/// GET /logout - destroy the session and bounce to the landing page.
pub async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let sessions = SessionService::new(state.clone());

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let sid = cookie.value().to_string();
        if let Err(e) = sessions.destroy(&sid).await {
            return e.into_response();
        }
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    (jar, found(&state.config.landing_path)).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    use crate::config::{AppState, Config};
    use crate::create_router;
    use crate::models::User;
    use crate::store::Stores;
    use crate::utils::clock::Clock;
    use crate::utils::password::{hash_password, PasswordKdf};

    async fn setup() -> (AppState, String, String) {
        let state = AppState::new(Stores::in_memory(), Config::default(), Clock::system());

        let hash = hash_password(PasswordKdf::Bcrypt, "pass").unwrap();
        let user = User::new("alice", "alice@example.com", &hash, state.clock.now());
        state.stores.users.put(user).await.unwrap();

        // A GET of the login form starts the session and hands out the cookie.
        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        let sid = cookie
            .split(';')
            .next()
            .unwrap()
            .split_once('=')
            .unwrap()
            .1
            .to_string();

        let csrf = state
            .stores
            .sessions
            .get(&sid, state.clock.now())
            .await
            .unwrap()
            .unwrap()
            .csrf_token;

        (state, sid, csrf)
    }

    fn login_request(sid: &str, body: &str, xhr: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, format!("sid={}", sid));
        if xhr {
            builder = builder
                .header("x-requested-with", "XMLHttpRequest")
                .header(header::ACCEPT, "application/json");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn xhr_login_answers_json_landing_url() {
        let (state, sid, csrf) = setup().await;

        let body = format!("login=alice&password=pass&csrf_token={}", csrf);
        let response = create_router(state)
            .oneshot(login_request(&sid, &body, true))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["landing-url"], "/");
    }

    #[tokio::test]
    async fn xhr_login_failure_is_401() {
        let (state, sid, csrf) = setup().await;

        let body = format!("login=alice&password=wrong&csrf_token={}", csrf);
        let response = create_router(state)
            .oneshot(login_request(&sid, &body, true))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn browser_login_redirects_to_landing() {
        let (state, sid, csrf) = setup().await;

        let body = format!("login=alice&password=pass&csrf_token={}", csrf);
        let response = create_router(state)
            .oneshot(login_request(&sid, &body, false))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn login_without_csrf_token_is_rejected() {
        let (state, sid, _csrf) = setup().await;

        let body = "login=alice&password=pass";
        let response = create_router(state.clone())
            .oneshot(login_request(&sid, body, false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A wrong token is just as dead as a missing one.
        let body = "login=alice&password=pass&csrf_token=forged";
        let response = create_router(state)
            .oneshot(login_request(&sid, body, false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login_form_embeds_the_session_csrf_token() {
        let (state, sid, csrf) = setup().await;

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/login")
                    .header(header::COOKIE, format!("sid={}", sid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(page.contains(&csrf));
    }

    #[tokio::test]
    async fn logout_destroys_the_session() {
        let (state, sid, _csrf) = setup().await;

        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/logout")
                    .header(header::COOKIE, format!("sid={}", sid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let gone = state
            .stores
            .sessions
            .get(&sid, state.clock.now())
            .await
            .unwrap();
        assert!(gone.is_none());
    }
}
