use crate::config::AppState;
use crate::error::OAuthError;
use crate::models::User;
use crate::utils::password::verify_password;

/// Resource-owner credential checks for the login endpoint and the password
/// grant. Failures are deliberately indistinguishable between unknown login
/// and wrong password.
#[derive(Clone)]
pub struct AuthService {
    state: AppState,
}

impl AuthService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, OAuthError> {
        let user = self
            .state
            .stores
            .users
            .get_by_login(login)
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidCredentials("invalid username or password".to_string())
            })?;

        if !verify_password(password, &user.password_hash)? {
            return Err(OAuthError::InvalidCredentials(
                "invalid username or password".to_string(),
            ));
        }

        if !user.enabled {
            return Err(OAuthError::InvalidCredentials(
                "user account is disabled".to_string(),
            ));
        }

        Ok(user)
    }
}
