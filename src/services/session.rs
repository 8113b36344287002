use chrono::Duration;

use crate::config::AppState;
use crate::error::OAuthError;
use crate::models::Session;
use crate::utils::secret::random_secret;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "sid";

/// Server-side session management. Sessions carry the logged-in user, the
/// CSRF token, and the parked authorize request.
#[derive(Clone)]
pub struct SessionService {
    state: AppState,
}

impl SessionService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Look up a live session by cookie value.
    pub async fn fetch(&self, id: Option<&str>) -> Result<Option<Session>, OAuthError> {
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self.state.stores.sessions.get(id, self.state.clock.now()).await?)
    }

    /// Fetch the cookie's session or start a fresh one. The flag reports
    /// whether a new cookie must be set.
    pub async fn fetch_or_create(&self, id: Option<&str>) -> Result<(Session, bool), OAuthError> {
        if let Some(session) = self.fetch(id).await? {
            return Ok((session, false));
        }

        let now = self.state.clock.now();
        let session = Session {
            id: random_secret(),
            user_id: None,
            csrf_token: random_secret(),
            pending_authorization: None,
            created_at: now,
            expires_at: now + Duration::seconds(self.state.config.session_ttl_secs),
        };
        let session = self.state.stores.sessions.put(session).await?;
        Ok((session, true))
    }

    pub async fn save(&self, session: Session) -> Result<Session, OAuthError> {
        Ok(self.state.stores.sessions.put(session).await?)
    }

    pub async fn destroy(&self, id: &str) -> Result<(), OAuthError> {
        Ok(self.state.stores.sessions.delete(id).await?)
    }
}
