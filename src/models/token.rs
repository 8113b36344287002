use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque bearer credential, indexed by `secret`.
///
/// `user_id` is absent for tokens minted through the client credentials
/// grant. Expiry is absolute; validation re-checks the owning client's and
/// user's `enabled` flags on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub secret: String,
    pub client_id: String,
    pub user_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Long-lived opaque credential for minting fresh access tokens. Never
/// issued for the client credentials or implicit grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub secret: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}
