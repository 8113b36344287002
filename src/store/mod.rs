//! Pluggable persistence for the protocol entities.
//!
//! One capability trait per entity; backends are interchangeable and
//! constructor-injected as a [`Stores`] bundle. Expiring stores (codes,
//! access tokens, sessions) treat expired rows as absent and purge them on
//! lookup. The current time is always passed in so every expiry decision
//! flows from the single injectable clock.

pub mod memory;
pub mod mysql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use uuid::Uuid;

use crate::models::{AccessToken, AuthCode, Client, RefreshToken, Session, User};

/// Backend failure. Surfaces to clients as a generic 500; details go to the
/// log, never to the response body.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;
    /// Insert or update; the returned value is what was stored.
    async fn put(&self, user: User) -> Result<User, StoreError>;
    /// Idempotent.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Client>, StoreError>;
    async fn put(&self, client: Client) -> Result<Client, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuthCodeStore: Send + Sync {
    async fn get(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError>;
    async fn put(&self, code: AuthCode) -> Result<AuthCode, StoreError>;
    async fn delete(&self, code: &str) -> Result<(), StoreError>;
    /// Atomic delete-returning lookup. Of two concurrent takes of the same
    /// code, at most one observes it; expired codes are absent.
    async fn take(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError>;
}

#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    async fn get(&self, secret: &str, now: DateTime<Utc>)
        -> Result<Option<AccessToken>, StoreError>;
    async fn put(&self, token: AccessToken) -> Result<AccessToken, StoreError>;
    async fn delete(&self, secret: &str) -> Result<(), StoreError>;
    /// Drop every token minted for `client_id`, optionally narrowed to one
    /// user.
    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn get(&self, secret: &str) -> Result<Option<RefreshToken>, StoreError>;
    async fn put(&self, token: RefreshToken) -> Result<RefreshToken, StoreError>;
    async fn delete(&self, secret: &str) -> Result<(), StoreError>;
    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>, StoreError>;
    async fn put(&self, session: Session) -> Result<Session, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// The injected store bundle. Cloning is cheap; all handles share state.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub clients: Arc<dyn ClientStore>,
    pub auth_codes: Arc<dyn AuthCodeStore>,
    pub access_tokens: Arc<dyn AccessTokenStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(memory::MemoryUserStore::default()),
            clients: Arc::new(memory::MemoryClientStore::default()),
            auth_codes: Arc::new(memory::MemoryAuthCodeStore::default()),
            access_tokens: Arc::new(memory::MemoryAccessTokenStore::default()),
            refresh_tokens: Arc::new(memory::MemoryRefreshTokenStore::default()),
            sessions: Arc::new(memory::MemorySessionStore::default()),
        }
    }

    pub fn mysql(pool: MySqlPool) -> Self {
        Self {
            users: Arc::new(mysql::MySqlUserStore::new(pool.clone())),
            clients: Arc::new(mysql::MySqlClientStore::new(pool.clone())),
            auth_codes: Arc::new(mysql::MySqlAuthCodeStore::new(pool.clone())),
            access_tokens: Arc::new(mysql::MySqlAccessTokenStore::new(pool.clone())),
            refresh_tokens: Arc::new(mysql::MySqlRefreshTokenStore::new(pool.clone())),
            sessions: Arc::new(mysql::MySqlSessionStore::new(pool)),
        }
    }
}
