//! In-memory backend. Used by the test suite and as the default
//! `STORE_BACKEND=memory`.
//!
//! Locks are plain `std::sync::RwLock`s taken only inside the synchronous
//! body of each call, never across an await point. Expired rows are purged
//! as they are encountered.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AccessToken, AuthCode, Client, RefreshToken, Session, User};

use super::{
    AccessTokenStore, AuthCodeStore, ClientStore, RefreshTokenStore, SessionStore, StoreError,
    UserStore,
};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .map_err(poisoned)?
            .values()
            .find(|u| u.login == login)
            .cloned())
    }

    async fn put(&self, user: User) -> Result<User, StoreError> {
        self.users
            .write()
            .map_err(poisoned)?
            .insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.users.write().map_err(poisoned)?.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryClientStore {
    clients: RwLock<HashMap<String, Client>>,
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn get(&self, id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn put(&self, client: Client) -> Result<Client, StoreError> {
        self.clients
            .write()
            .map_err(poisoned)?
            .insert(client.id.clone(), client.clone());
        Ok(client)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.clients.write().map_err(poisoned)?.remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuthCodeStore {
    codes: RwLock<HashMap<String, AuthCode>>,
}

#[async_trait]
impl AuthCodeStore for MemoryAuthCodeStore {
    async fn get(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError> {
        let mut codes = self.codes.write().map_err(poisoned)?;
        match codes.get(code) {
            Some(c) if c.is_expired(now) => {
                codes.remove(code);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn put(&self, code: AuthCode) -> Result<AuthCode, StoreError> {
        self.codes
            .write()
            .map_err(poisoned)?
            .insert(code.code.clone(), code.clone());
        Ok(code)
    }

    async fn delete(&self, code: &str) -> Result<(), StoreError> {
        self.codes.write().map_err(poisoned)?.remove(code);
        Ok(())
    }

    async fn take(&self, code: &str, now: DateTime<Utc>) -> Result<Option<AuthCode>, StoreError> {
        let removed = self.codes.write().map_err(poisoned)?.remove(code);
        Ok(removed.filter(|c| !c.is_expired(now)))
    }
}

#[derive(Default)]
pub struct MemoryAccessTokenStore {
    tokens: RwLock<HashMap<String, AccessToken>>,
}

#[async_trait]
impl AccessTokenStore for MemoryAccessTokenStore {
    async fn get(
        &self,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        match tokens.get(secret) {
            Some(t) if t.is_expired(now) => {
                tokens.remove(secret);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn put(&self, token: AccessToken) -> Result<AccessToken, StoreError> {
        self.tokens
            .write()
            .map_err(poisoned)?
            .insert(token.secret.clone(), token.clone());
        Ok(token)
    }

    async fn delete(&self, secret: &str) -> Result<(), StoreError> {
        self.tokens.write().map_err(poisoned)?.remove(secret);
        Ok(())
    }

    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError> {
        self.tokens
            .write()
            .map_err(poisoned)?
            .retain(|_, t| t.client_id != client_id || (user_id.is_some() && t.user_id != user_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    tokens: RwLock<HashMap<String, RefreshToken>>,
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn get(&self, secret: &str) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.tokens.read().map_err(poisoned)?.get(secret).cloned())
    }

    async fn put(&self, token: RefreshToken) -> Result<RefreshToken, StoreError> {
        self.tokens
            .write()
            .map_err(poisoned)?
            .insert(token.secret.clone(), token.clone());
        Ok(token)
    }

    async fn delete(&self, secret: &str) -> Result<(), StoreError> {
        self.tokens.write().map_err(poisoned)?.remove(secret);
        Ok(())
    }

    async fn revoke_by(&self, client_id: &str, user_id: Option<Uuid>) -> Result<(), StoreError> {
        self.tokens.write().map_err(poisoned)?.retain(|_, t| {
            t.client_id != client_id || (user_id.is_some() && Some(t.user_id) != user_id)
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get(id) {
            Some(s) if s.is_expired(now) => {
                sessions.remove(id);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn put(&self, session: Session) -> Result<Session, StoreError> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().map_err(poisoned)?.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn auth_code(code: &str, now: DateTime<Utc>, ttl_secs: i64) -> AuthCode {
        AuthCode {
            code: code.to_string(),
            client_id: "client-1".to_string(),
            user_id: Uuid::new_v4(),
            scopes: vec!["photo:read".to_string()],
            redirect_uri: "http://localhost".to_string(),
            code_challenge: None,
            code_challenge_method: None,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    fn access_token(secret: &str, client_id: &str, now: DateTime<Utc>, ttl_secs: i64) -> AccessToken {
        AccessToken {
            secret: secret.to_string(),
            client_id: client_id.to_string(),
            user_id: Some(Uuid::new_v4()),
            scopes: vec![],
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn take_consumes_a_code_exactly_once() {
        let store = MemoryAuthCodeStore::default();
        let now = Utc::now();
        store.put(auth_code("abc", now, 600)).await.unwrap();

        assert!(store.take("abc", now).await.unwrap().is_some());
        assert!(store.take("abc", now).await.unwrap().is_none());
        assert!(store.get("abc", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_takes_yield_at_most_one_winner() {
        let store = std::sync::Arc::new(MemoryAuthCodeStore::default());
        let now = Utc::now();
        store.put(auth_code("race", now, 600)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.take("race", now).await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_codes_are_absent_and_purged() {
        let store = MemoryAuthCodeStore::default();
        let now = Utc::now();
        store.put(auth_code("old", now, 600)).await.unwrap();

        let later = now + Duration::seconds(601);
        assert!(store.get("old", later).await.unwrap().is_none());
        assert!(store.take("old", later).await.unwrap().is_none());
        assert!(store.codes.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_access_tokens_are_absent() {
        let store = MemoryAccessTokenStore::default();
        let now = Utc::now();
        store.put(access_token("tok", "client-1", now, 60)).await.unwrap();

        assert!(store.get("tok", now).await.unwrap().is_some());
        assert!(store
            .get("tok", now + Duration::seconds(61))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoke_by_client_drops_only_that_client() {
        let store = MemoryAccessTokenStore::default();
        let now = Utc::now();
        store.put(access_token("a", "client-1", now, 600)).await.unwrap();
        store.put(access_token("b", "client-1", now, 600)).await.unwrap();
        store.put(access_token("c", "client-2", now, 600)).await.unwrap();

        store.revoke_by("client-1", None).await.unwrap();

        assert!(store.get("a", now).await.unwrap().is_none());
        assert!(store.get("b", now).await.unwrap().is_none());
        assert!(store.get("c", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revoke_by_client_and_user_narrows_to_that_user() {
        let store = MemoryAccessTokenStore::default();
        let now = Utc::now();
        let victim = Uuid::new_v4();
        let mut mine = access_token("mine", "client-1", now, 600);
        mine.user_id = Some(victim);
        store.put(mine).await.unwrap();
        store.put(access_token("other", "client-1", now, 600)).await.unwrap();

        store.revoke_by("client-1", Some(victim)).await.unwrap();

        assert!(store.get("mine", now).await.unwrap().is_none());
        assert!(store.get("other", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_acts_as_update() {
        let store = MemoryUserStore::default();
        let mut user = User::new("alice", "alice@example.com", "$argon2-hash", Utc::now());
        store.put(user.clone()).await.unwrap();

        user.enabled = false;
        store.put(user.clone()).await.unwrap();

        let stored = store.get(user.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert!(store.get_by_login("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryClientStore::default();
        store.delete("missing").await.unwrap();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn expired_sessions_are_absent() {
        let store = MemorySessionStore::default();
        let now = Utc::now();
        store
            .put(Session {
                id: "sid".to_string(),
                user_id: None,
                csrf_token: "csrf".to_string(),
                pending_authorization: None,
                created_at: now,
                expires_at: now + Duration::seconds(10),
            })
            .await
            .unwrap();

        assert!(store.get("sid", now).await.unwrap().is_some());
        assert!(store
            .get("sid", now + Duration::seconds(11))
            .await
            .unwrap()
            .is_none());
    }
}
