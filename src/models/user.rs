use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource owner. Unique by `login`; `enabled` gates every authenticated
/// access, including tokens minted before the flag was cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub enabled: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(login: &str, email: &str, password_hash: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            login: login.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            enabled: true,
            roles: Vec::new(),
            permissions: Vec::new(),
            created_at,
        }
    }
}
