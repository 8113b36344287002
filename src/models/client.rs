use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered client application.
///
/// `id` and `secret` are high-entropy opaque strings. A client with no
/// secret is a public client and authenticates by id alone. `approved`
/// waives the per-user consent step; `enabled` gates token minting and
/// validation alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub info: String,
    pub homepage: String,
    pub approved: bool,
    pub scopes: HashSet<String>,
    pub grants: HashSet<String>,
    pub redirects: HashSet<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Check whether a redirect URI is registered for this client.
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirects.iter().any(|u| u == uri)
    }

    /// Check whether every requested scope is declared by this client.
    /// An empty request is always allowed.
    pub fn allows_scopes(&self, requested: &[String]) -> bool {
        requested.iter().all(|s| self.scopes.contains(s))
    }

    /// Check whether the client is registered for a grant type.
    pub fn allows_grant(&self, grant: &str) -> bool {
        self.grants.iter().any(|g| g == grant)
    }
}
