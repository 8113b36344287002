//! MySQL backend over sqlx. Schema lives in `migrations/`.
//!
//! String sets (scopes, grants, redirects) and the parked authorize request
//! are JSON columns; user ids are stored as their canonical string form.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, MySqlPool};
use uuid::Uuid;

use crate::models::{AccessToken, AuthCode, Client, PendingAuthorization, RefreshToken, Session, User};

use super::{
    AccessTokenStore, AuthCodeStore, ClientStore, RefreshTokenStore, SessionStore, StoreError,
    UserStore,
};

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Decode(e.to_string()))
}

fn string_set(value: serde_json::Value) -> Result<HashSet<String>, StoreError> {
    Ok(serde_json::from_value(value)?)
}

fn string_vec(value: serde_json::Value) -> Result<Vec<String>, StoreError> {
    Ok(serde_json::from_value(value)?)
}

fn json_of<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    login: String,
    email: String,
    password_hash: String,
    enabled: bool,
    roles: serde_json::Value,
    permissions: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            login: self.login,
            email: self.email,
            password_hash: self.password_hash,
            enabled: self.enabled,
            roles: string_vec(self.roles)?,
            permissions: string_vec(self.permissions)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlUserStore {
    pool: MySqlPool,
}

impl MySqlUserStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, login, email, password_hash, enabled, roles, permissions, created_at";

#[async_trait]
impl UserStore for MySqlUserStore {
    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE login = ?"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    async fn put(&self, user: User) -> Result<User, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, login, email, password_hash, enabled, roles, permissions, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                login = VALUES(login), email = VALUES(email),
                password_hash = VALUES(password_hash), enabled = VALUES(enabled),
                roles = VALUES(roles), permissions = VALUES(permissions)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.enabled)
        .bind(json_of(&user.roles)?)
        .bind(json_of(&user.permissions)?)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ClientRow {
    id: String,
    secret: Option<String>,
    info: String,
    homepage: String,
    approved: bool,
    scopes: serde_json::Value,
    grants: serde_json::Value,
    redirects: serde_json::Value,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl ClientRow {
    fn into_client(self) -> Result<Client, StoreError> {
        Ok(Client {
            id: self.id,
            secret: self.secret,
            info: self.info,
            homepage: self.homepage,
            approved: self.approved,
            scopes: string_set(self.scopes)?,
            grants: string_set(self.grants)?,
            redirects: string_set(self.redirects)?,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlClientStore {
    pool: MySqlPool,
}

impl MySqlClientStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const CLIENT_COLUMNS: &str =
    "id, secret, info, homepage, approved, scopes, grants, redirects, enabled, created_at";

#[async_trait]
impl ClientStore for MySqlClientStore {
    async fn get(&self, id: &str) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClientRow::into_client).transpose()
    }

    async fn put(&self, client: Client) -> Result<Client, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, secret, info, homepage, approved, scopes, grants, redirects, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                secret = VALUES(secret), info = VALUES(info), homepage = VALUES(homepage),
                approved = VALUES(approved), scopes = VALUES(scopes), grants = VALUES(grants),
                redirects = VALUES(redirects), enabled = VALUES(enabled)
            "#,
        )
        .bind(&client.id)
        .bind(&client.secret)
        .bind(&client.info)
        .bind(&client.homepage)
        .bind(client.approved)
        .bind(json_of(&client.scopes)?)
        .bind(json_of(&client.grants)?)
        .bind(json_of(&client.redirects)?)
        .bind(client.enabled)
        .bind(client.created_at)
        .execute(&self.pool)
        .await?;

        Ok(client)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM clients WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Authorization codes
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct AuthCodeRow {
    code: String,
    client_id: String,
    user_id: String,
    scopes: serde_json::Value,
    redirect_uri: String,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthCodeRow {
    fn into_auth_code(self) -> Result<AuthCode, StoreError> {
        let method = self
            .code_challenge_method
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: crate::utils::pkce::UnsupportedChallengeMethod| {
                StoreError::Decode(e.to_string())
            })?;

        Ok(AuthCode {
            code: self.code,
            client_id: self.client_id,
            user_id: parse_uuid(&self.user_id)?,
            scopes: string_vec(self.scopes)?,
            redirect_uri: self.redirect_uri,
            code_challenge: self.code_challenge,
            code_challenge_method: method,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlAuthCodeStore {
    pool: MySqlPool,
}

impl MySqlAuthCodeStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const AUTH_CODE_COLUMNS: &str = "code, client_id, user_id, scopes, redirect_uri, code_challenge, code_challenge_method, created_at, expires_at";

#[async_trait]
impl AuthCodeStore for MySqlAuthCodeStore {
    async fn get(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError> {
        sqlx::query("DELETE FROM auth_codes WHERE code = ? AND expires_at <= ?")
            .bind(code)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, AuthCodeRow>(&format!(
            "SELECT {AUTH_CODE_COLUMNS} FROM auth_codes WHERE code = ? AND expires_at > ?"
        ))
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AuthCodeRow::into_auth_code).transpose()
    }

    async fn put(&self, code: AuthCode) -> Result<AuthCode, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_codes (code, client_id, user_id, scopes, redirect_uri, code_challenge, code_challenge_method, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                client_id = VALUES(client_id), user_id = VALUES(user_id),
                scopes = VALUES(scopes), redirect_uri = VALUES(redirect_uri),
                code_challenge = VALUES(code_challenge),
                code_challenge_method = VALUES(code_challenge_method),
                expires_at = VALUES(expires_at)
            "#,
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(code.user_id.to_string())
        .bind(json_of(&code.scopes)?)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.map(|m| m.to_string()))
        .bind(code.created_at)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(code)
    }

    async fn delete(&self, code: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_codes WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError> {
        // SELECT ... FOR UPDATE plus DELETE inside one transaction gives the
        // compare-and-delete guarantee: a concurrent take blocks on the row
        // lock and then finds nothing.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AuthCodeRow>(&format!(
            "SELECT {AUTH_CODE_COLUMNS} FROM auth_codes WHERE code = ? FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM auth_codes WHERE code = ?")
            .bind(code)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let auth_code = row.into_auth_code()?;
        Ok((!auth_code.is_expired(now)).then_some(auth_code))
    }
}

// ---------------------------------------------------------------------------
// Access tokens
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct AccessTokenRow {
    secret: String,
    client_id: String,
    user_id: Option<String>,
    scopes: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessTokenRow {
    fn into_token(self) -> Result<AccessToken, StoreError> {
        Ok(AccessToken {
            secret: self.secret,
            client_id: self.client_id,
            user_id: self.user_id.as_deref().map(parse_uuid).transpose()?,
            scopes: string_vec(self.scopes)?,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlAccessTokenStore {
    pool: MySqlPool,
}

impl MySqlAccessTokenStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessTokenStore for MySqlAccessTokenStore {
    async fn get(
        &self,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError> {
        sqlx::query("DELETE FROM access_tokens WHERE secret = ? AND expires_at <= ?")
            .bind(secret)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, AccessTokenRow>(
            "SELECT secret, client_id, user_id, scopes, created_at, expires_at
             FROM access_tokens WHERE secret = ? AND expires_at > ?",
        )
        .bind(secret)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccessTokenRow::into_token).transpose()
    }

    async fn put(&self, token: AccessToken) -> Result<AccessToken, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO access_tokens (secret, client_id, user_id, scopes, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                client_id = VALUES(client_id), user_id = VALUES(user_id),
                scopes = VALUES(scopes), expires_at = VALUES(expires_at)
            "#,
        )
        .bind(&token.secret)
        .bind(&token.client_id)
        .bind(token.user_id.map(|u| u.to_string()))
        .bind(json_of(&token.scopes)?)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    async fn delete(&self, secret: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM access_tokens WHERE secret = ?")
            .bind(secret)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError> {
        match user_id {
            Some(user_id) => {
                sqlx::query("DELETE FROM access_tokens WHERE client_id = ? AND user_id = ?")
                    .bind(client_id)
                    .bind(user_id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM access_tokens WHERE client_id = ?")
                    .bind(client_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct RefreshTokenRow {
    secret: String,
    client_id: String,
    user_id: String,
    scopes: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl RefreshTokenRow {
    fn into_token(self) -> Result<RefreshToken, StoreError> {
        Ok(RefreshToken {
            secret: self.secret,
            client_id: self.client_id,
            user_id: parse_uuid(&self.user_id)?,
            scopes: string_vec(self.scopes)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlRefreshTokenStore {
    pool: MySqlPool,
}

impl MySqlRefreshTokenStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for MySqlRefreshTokenStore {
    async fn get(&self, secret: &str) -> Result<Option<RefreshToken>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT secret, client_id, user_id, scopes, created_at
             FROM refresh_tokens WHERE secret = ?",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RefreshTokenRow::into_token).transpose()
    }

    async fn put(&self, token: RefreshToken) -> Result<RefreshToken, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (secret, client_id, user_id, scopes, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                client_id = VALUES(client_id), user_id = VALUES(user_id),
                scopes = VALUES(scopes)
            "#,
        )
        .bind(&token.secret)
        .bind(&token.client_id)
        .bind(token.user_id.to_string())
        .bind(json_of(&token.scopes)?)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    async fn delete(&self, secret: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE secret = ?")
            .bind(secret)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError> {
        match user_id {
            Some(user_id) => {
                sqlx::query("DELETE FROM refresh_tokens WHERE client_id = ? AND user_id = ?")
                    .bind(client_id)
                    .bind(user_id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM refresh_tokens WHERE client_id = ?")
                    .bind(client_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    user_id: Option<String>,
    csrf_token: String,
    pending_authorization: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StoreError> {
        let pending: Option<PendingAuthorization> = self
            .pending_authorization
            .map(serde_json::from_value)
            .transpose()?;

        Ok(Session {
            id: self.id,
            user_id: self.user_id.as_deref().map(parse_uuid).transpose()?,
            csrf_token: self.csrf_token,
            pending_authorization: pending,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Clone)]
pub struct MySqlSessionStore {
    pool: MySqlPool,
}

impl MySqlSessionStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for MySqlSessionStore {
    async fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = ? AND expires_at <= ?")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, csrf_token, pending_authorization, created_at, expires_at
             FROM sessions WHERE id = ? AND expires_at > ?",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn put(&self, session: Session) -> Result<Session, StoreError> {
        let pending = session
            .pending_authorization
            .as_ref()
            .map(json_of)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, csrf_token, pending_authorization, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                user_id = VALUES(user_id), csrf_token = VALUES(csrf_token),
                pending_authorization = VALUES(pending_authorization),
                expires_at = VALUES(expires_at)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id.map(|u| u.to_string()))
        .bind(&session.csrf_token)
        .bind(pending)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
