//! The grant state machine: authorize-request validation, the
//! login/consent/issue transitions, the four token-endpoint grants, and
//! bearer-token validation.

use axum::http::{header, HeaderMap};
use chrono::Duration;
use uuid::Uuid;

use crate::config::AppState;
use crate::dto::{AuthorizeParams, TokenRequest, TokenResponse};
use crate::error::{error_redirect_url, AuthorizeError, OAuthError};
use crate::models::{AccessToken, AuthCode, Client, PendingAuthorization, RefreshToken, Session, User};
use crate::services::AuthService;
use crate::utils::pkce::{self, CodeChallengeMethod};
use crate::utils::secret::{constant_time_compare, random_secret};

pub const RESPONSE_TYPE_CODE: &str = "code";
pub const RESPONSE_TYPE_TOKEN: &str = "token";

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_IMPLICIT: &str = "implicit";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

const AUTHORIZE_PATH: &str = "/authorize";

/// Grant required by a `response_type` value, per RFC 6749 §3.1.1.
fn grant_for_response_type(response_type: &str) -> Option<&'static str> {
    match response_type {
        RESPONSE_TYPE_CODE => Some(GRANT_AUTHORIZATION_CODE),
        RESPONSE_TYPE_TOKEN => Some(GRANT_IMPLICIT),
        _ => None,
    }
}

/// An authorize request that passed every check in §4.1.1 order.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorize {
    pub client: Client,
    pub pending: PendingAuthorization,
}

/// Where the authorize flow goes next for this request.
pub enum AuthorizeOutcome {
    /// No authenticated user in the session; send to the login form.
    LoginRequired,
    /// Authenticated, but the client needs per-user consent.
    ConsentRequired {
        client: Client,
        pending: PendingAuthorization,
    },
    /// Artifacts minted; redirect back to the client.
    Issued { redirect_url: String },
}

#[derive(Clone)]
pub struct OAuthService {
    state: AppState,
}

impl OAuthService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    // ------------------------------------------------------------------
    // Authorize-request validation
    // ------------------------------------------------------------------

    /// Validate an authorization request.
    ///
    /// Check order matters: failures up to redirect-uri validation (and the
    /// PKCE shape checks) answer JSON directly, the rest redirect back to
    /// the client per RFC 6749 §4.1.2.1.
    pub async fn validate_authorize(
        &self,
        params: &AuthorizeParams,
    ) -> Result<ValidatedAuthorize, AuthorizeError> {
        let client_id = params
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthorizeError::direct(OAuthError::InvalidClient))?;

        let client = self
            .state
            .stores
            .clients
            .get(client_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or_else(|| AuthorizeError::direct(OAuthError::InvalidClient))?;

        let redirect_uri = match params.redirect_uri.as_deref() {
            Some(uri) => {
                if !client.has_redirect_uri(uri) {
                    return Err(AuthorizeError::direct(OAuthError::InvalidRequest(
                        "redirect_uri is not registered for this client".to_string(),
                    )));
                }
                uri.to_string()
            }
            // A client with a single registered redirect may omit the
            // parameter; anything else is ambiguous.
            None => {
                if client.redirects.len() == 1 {
                    client.redirects.iter().next().cloned().unwrap_or_default()
                } else {
                    return Err(AuthorizeError::direct(OAuthError::InvalidRequest(
                        "redirect_uri is required".to_string(),
                    )));
                }
            }
        };

        let state = params.state.as_deref();

        let response_type = params.response_type.clone().unwrap_or_default();
        let permitted = grant_for_response_type(&response_type)
            .map(|grant| client.allows_grant(grant))
            .unwrap_or(false);
        if !permitted {
            return Err(AuthorizeError::redirect(
                OAuthError::UnsupportedResponseType(response_type),
                &redirect_uri,
                state,
            ));
        }

        let scopes = params.scopes();
        if !client.allows_scopes(&scopes) {
            return Err(AuthorizeError::redirect(
                OAuthError::InvalidScope("scope is not allowed for this client".to_string()),
                &redirect_uri,
                state,
            ));
        }

        let code_challenge_method = params
            .code_challenge_method
            .as_deref()
            .map(str::parse::<CodeChallengeMethod>)
            .transpose()
            .map_err(|e| AuthorizeError::direct(OAuthError::InvalidRequest(e.to_string())))?;

        let code_challenge = match (params.code_challenge.as_deref(), code_challenge_method) {
            (None, None) => None,
            (None, Some(_)) => {
                return Err(AuthorizeError::direct(OAuthError::InvalidRequest(
                    "code_challenge is required when code_challenge_method is given".to_string(),
                )));
            }
            (Some(challenge), _) => {
                if !pkce::is_well_formed_challenge(challenge) {
                    return Err(AuthorizeError::direct(OAuthError::InvalidRequest(
                        "code_challenge is not a well-formed URL-safe base64 value".to_string(),
                    )));
                }
                Some(challenge.to_string())
            }
        };

        // A challenge without a method means "plain" (RFC 7636 §4.3).
        let code_challenge_method = match (&code_challenge, code_challenge_method) {
            (Some(_), None) => Some(CodeChallengeMethod::Plain),
            (Some(_), m @ Some(_)) => m,
            (None, _) => None,
        };

        Ok(ValidatedAuthorize {
            pending: PendingAuthorization {
                response_type,
                client_id: client.id.clone(),
                redirect_uri,
                scopes,
                state: params.state.clone(),
                code_challenge,
                code_challenge_method,
            },
            client,
        })
    }

    // ------------------------------------------------------------------
    // Authorize-flow transitions
    // ------------------------------------------------------------------

    /// Drive one authorize request through the state machine. Parks the
    /// validated parameters in the session; the caller persists it.
    pub async fn authorize(
        &self,
        session: &mut Session,
        params: &AuthorizeParams,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        let validated = self.validate_authorize(params).await?;
        session.pending_authorization = Some(validated.pending.clone());

        let Some(user) = self.session_user(session).await? else {
            return Ok(AuthorizeOutcome::LoginRequired);
        };

        if validated.client.approved {
            let redirect_url = self.issue(&validated, &user).await?;
            session.pending_authorization = None;
            return Ok(AuthorizeOutcome::Issued { redirect_url });
        }

        Ok(AuthorizeOutcome::ConsentRequired {
            client: validated.client,
            pending: validated.pending,
        })
    }

    /// Consent granted: re-validate the parked request and issue.
    pub async fn approve(&self, session: &mut Session) -> Result<String, AuthorizeError> {
        let pending = session.pending_authorization.clone().ok_or_else(|| {
            AuthorizeError::direct(OAuthError::InvalidRequest(
                "no authorization request is pending".to_string(),
            ))
        })?;

        let user = self.session_user(session).await?.ok_or_else(|| {
            AuthorizeError::direct(OAuthError::InvalidRequest(
                "login is required before approving".to_string(),
            ))
        })?;

        // The client may have been disabled or re-registered while the user
        // sat on the consent page.
        let params: AuthorizeParams = (&pending).into();
        let validated = self.validate_authorize(&params).await?;
        let redirect_url = self.issue(&validated, &user).await?;
        session.pending_authorization = None;
        Ok(redirect_url)
    }

    /// Consent denied: clear the parked request and bounce back with
    /// `access_denied`.
    pub fn refuse(&self, session: &mut Session) -> Result<String, AuthorizeError> {
        let pending = session.pending_authorization.take().ok_or_else(|| {
            AuthorizeError::direct(OAuthError::InvalidRequest(
                "no authorization request is pending".to_string(),
            ))
        })?;

        Ok(error_redirect_url(
            &pending.redirect_uri,
            "access_denied",
            "the resource owner denied the request",
            pending.state.as_deref(),
        ))
    }

    /// Mint the artifacts for a validated request and build the redirect.
    async fn issue(
        &self,
        validated: &ValidatedAuthorize,
        user: &User,
    ) -> Result<String, AuthorizeError> {
        let pending = &validated.pending;
        let state_suffix = pending
            .state
            .as_deref()
            .map(|s| format!("&state={}", urlencoding::encode(s)))
            .unwrap_or_default();

        match pending.response_type.as_str() {
            RESPONSE_TYPE_CODE => {
                let now = self.state.clock.now();
                let code = AuthCode {
                    code: random_secret(),
                    client_id: pending.client_id.clone(),
                    user_id: user.id,
                    scopes: pending.scopes.clone(),
                    redirect_uri: pending.redirect_uri.clone(),
                    code_challenge: pending.code_challenge.clone(),
                    code_challenge_method: pending.code_challenge_method,
                    created_at: now,
                    expires_at: now + Duration::seconds(self.state.config.auth_code_ttl_secs),
                };
                let code = self.state.stores.auth_codes.put(code).await?;

                Ok(format!(
                    "{}{}code={}{}",
                    pending.redirect_uri,
                    if pending.redirect_uri.contains('?') { '&' } else { '?' },
                    urlencoding::encode(&code.code),
                    state_suffix,
                ))
            }
            RESPONSE_TYPE_TOKEN => {
                let token = self
                    .mint_access_token(&pending.client_id, Some(user.id), &pending.scopes)
                    .await
                    .map_err(AuthorizeError::direct)?;

                // Implicit-grant artifacts travel in the fragment and never
                // include a refresh token.
                Ok(format!(
                    "{}#access_token={}&token_type=Bearer&expires_in={}{}",
                    pending.redirect_uri,
                    urlencoding::encode(&token.secret),
                    self.state.config.access_token_ttl_secs,
                    state_suffix,
                ))
            }
            other => Err(AuthorizeError::direct(OAuthError::UnsupportedResponseType(
                other.to_string(),
            ))),
        }
    }

    /// URL that re-enters the authorize endpoint after login.
    pub fn continue_url(&self, pending: &PendingAuthorization) -> String {
        let params: AuthorizeParams = pending.into();
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(v) = params.response_type {
            query.push(("response_type", v));
        }
        if let Some(v) = params.client_id {
            query.push(("client_id", v));
        }
        if let Some(v) = params.redirect_uri {
            query.push(("redirect_uri", v));
        }
        if let Some(v) = params.scope {
            query.push(("scope", v));
        }
        if let Some(v) = params.state {
            query.push(("state", v));
        }
        if let Some(v) = params.code_challenge {
            query.push(("code_challenge", v));
        }
        if let Some(v) = params.code_challenge_method {
            query.push(("code_challenge_method", v));
        }

        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", AUTHORIZE_PATH, query)
    }

    /// Resolve the session's user, dropping stale or disabled bindings.
    async fn session_user(&self, session: &mut Session) -> Result<Option<User>, OAuthError> {
        let Some(user_id) = session.user_id else {
            return Ok(None);
        };

        let user = self
            .state
            .stores
            .users
            .get(user_id)
            .await?
            .filter(|u| u.enabled);
        if user.is_none() {
            session.user_id = None;
        }
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Token endpoint
    // ------------------------------------------------------------------

    /// Handle one `POST /token` request.
    pub async fn token(
        &self,
        headers: &HeaderMap,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = req
            .grant_type
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("grant_type is required".to_string()))?;

        let client = self.authenticate_client(headers, req).await?;

        // Unknown grant names take precedence over permission checks.
        if !matches!(
            grant_type,
            GRANT_AUTHORIZATION_CODE | GRANT_PASSWORD | GRANT_CLIENT_CREDENTIALS | GRANT_REFRESH_TOKEN
        ) {
            return Err(OAuthError::UnsupportedGrantType(grant_type.to_string()));
        }

        if !client.allows_grant(grant_type) {
            return Err(OAuthError::UnauthorizedClient);
        }

        match grant_type {
            GRANT_AUTHORIZATION_CODE => self.exchange_code(&client, req).await,
            GRANT_PASSWORD => self.password_grant(&client, req).await,
            GRANT_CLIENT_CREDENTIALS => self.client_credentials_grant(&client, req).await,
            _ => self.refresh_grant(&client, req).await,
        }
    }

    /// Authenticate the client from Basic auth or body credentials.
    ///
    /// Secrets compare in constant time. A client registered without a
    /// secret is public and authenticates by id alone.
    async fn authenticate_client(
        &self,
        headers: &HeaderMap,
        req: &TokenRequest,
    ) -> Result<Client, OAuthError> {
        let (client_id, client_secret) = match headers.get(header::AUTHORIZATION) {
            Some(value) => {
                let value = value.to_str().map_err(|_| OAuthError::InvalidClient)?;
                crate::utils::auth::parse_basic_auth(value).ok_or(OAuthError::InvalidClient)?
            }
            None => (
                req.client_id.clone().ok_or(OAuthError::InvalidClient)?,
                req.client_secret.clone(),
            ),
        };

        let client = self
            .state
            .stores
            .clients
            .get(&client_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or(OAuthError::InvalidClient)?;

        match client.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(stored) => {
                let provided = client_secret.ok_or(OAuthError::InvalidClient)?;
                if !constant_time_compare(stored, &provided) {
                    return Err(OAuthError::InvalidClient);
                }
            }
            None => {
                if client_secret.is_some() {
                    return Err(OAuthError::InvalidClient);
                }
            }
        }

        Ok(client)
    }

    async fn exchange_code(
        &self,
        client: &Client,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let code = req
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
        let redirect_uri = req
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;

        // Atomic take: a concurrent exchange of the same code sees nothing.
        let auth_code = self
            .state
            .stores
            .auth_codes
            .take(code, self.state.clock.now())
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidGrant("invalid or expired authorization code".to_string())
            })?;

        if auth_code.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }

        if auth_code.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }

        if let Some(challenge) = auth_code.code_challenge.as_deref() {
            let verifier = req.code_verifier.as_deref().ok_or_else(|| {
                OAuthError::InvalidGrant(
                    "PKCE code verifier is required but not provided".to_string(),
                )
            })?;
            let method = auth_code
                .code_challenge_method
                .unwrap_or(CodeChallengeMethod::Plain);
            if !pkce::verify(challenge, method, verifier) {
                return Err(OAuthError::InvalidGrant(
                    "code verifier does not match the code challenge".to_string(),
                ));
            }
        }

        let user = self
            .state
            .stores
            .users
            .get(auth_code.user_id)
            .await?
            .filter(|u| u.enabled)
            .ok_or_else(|| OAuthError::InvalidGrant("user account is disabled".to_string()))?;

        let access = self
            .mint_access_token(&client.id, Some(user.id), &auth_code.scopes)
            .await?;
        let refresh = self
            .mint_refresh_token(&client.id, user.id, &auth_code.scopes)
            .await?;

        Ok(TokenResponse::new(
            access.secret,
            Some(refresh.secret),
            self.state.config.access_token_ttl_secs,
            &auth_code.scopes,
        ))
    }

    async fn password_grant(
        &self,
        client: &Client,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let username = req
            .username
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("username is required".to_string()))?;
        let password = req
            .password
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("password is required".to_string()))?;

        let scopes = req.scopes();
        if !client.allows_scopes(&scopes) {
            return Err(OAuthError::InvalidScope(
                "scope is not allowed for this client".to_string(),
            ));
        }

        let user = AuthService::new(self.state.clone())
            .authenticate(username, password)
            .await?;

        let access = self
            .mint_access_token(&client.id, Some(user.id), &scopes)
            .await?;
        let refresh = self.mint_refresh_token(&client.id, user.id, &scopes).await?;

        Ok(TokenResponse::new(
            access.secret,
            Some(refresh.secret),
            self.state.config.access_token_ttl_secs,
            &scopes,
        ))
    }

    async fn client_credentials_grant(
        &self,
        client: &Client,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let scopes = req.scopes();
        if !client.allows_scopes(&scopes) {
            return Err(OAuthError::InvalidScope(
                "scope is not allowed for this client".to_string(),
            ));
        }

        // No user and no refresh token for machine-to-machine tokens.
        let access = self.mint_access_token(&client.id, None, &scopes).await?;

        Ok(TokenResponse::new(
            access.secret,
            None,
            self.state.config.access_token_ttl_secs,
            &scopes,
        ))
    }

    async fn refresh_grant(
        &self,
        client: &Client,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let secret = req
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".to_string()))?;

        let refresh = self
            .state
            .stores
            .refresh_tokens
            .get(secret)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("invalid refresh token".to_string()))?;

        if refresh.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }

        // The owning user may have been disabled since issuance.
        self.state
            .stores
            .users
            .get(refresh.user_id)
            .await?
            .filter(|u| u.enabled)
            .ok_or_else(|| OAuthError::InvalidGrant("user account is disabled".to_string()))?;

        let access = self
            .mint_access_token(&client.id, Some(refresh.user_id), &refresh.scopes)
            .await?;

        // The refresh token is reused as-is; no rotation.
        Ok(TokenResponse::new(
            access.secret,
            Some(refresh.secret),
            self.state.config.access_token_ttl_secs,
            &refresh.scopes,
        ))
    }

    // ------------------------------------------------------------------
    // Bearer validation
    // ------------------------------------------------------------------

    /// Resolve a bearer secret to its token and user, re-checking the
    /// `enabled` flags of both principals on every call.
    pub async fn validate_bearer(
        &self,
        secret: &str,
    ) -> Result<(AccessToken, Option<User>), OAuthError> {
        let token = self
            .state
            .stores
            .access_tokens
            .get(secret, self.state.clock.now())
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidToken("invalid or expired access token".to_string())
            })?;

        self.state
            .stores
            .clients
            .get(&token.client_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or_else(|| OAuthError::InvalidToken("client is disabled".to_string()))?;

        let user = match token.user_id {
            Some(user_id) => Some(
                self.state
                    .stores
                    .users
                    .get(user_id)
                    .await?
                    .filter(|u| u.enabled)
                    .ok_or_else(|| OAuthError::InvalidToken("user is disabled".to_string()))?,
            ),
            None => None,
        };

        Ok((token, user))
    }

    // ------------------------------------------------------------------
    // Minting
    // ------------------------------------------------------------------

    async fn mint_access_token(
        &self,
        client_id: &str,
        user_id: Option<Uuid>,
        scopes: &[String],
    ) -> Result<AccessToken, OAuthError> {
        let now = self.state.clock.now();
        let token = AccessToken {
            secret: random_secret(),
            client_id: client_id.to_string(),
            user_id,
            scopes: scopes.to_vec(),
            created_at: now,
            expires_at: now + Duration::seconds(self.state.config.access_token_ttl_secs),
        };
        Ok(self.state.stores.access_tokens.put(token).await?)
    }

    async fn mint_refresh_token(
        &self,
        client_id: &str,
        user_id: Uuid,
        scopes: &[String],
    ) -> Result<RefreshToken, OAuthError> {
        let token = RefreshToken {
            secret: random_secret(),
            client_id: client_id.to_string(),
            user_id,
            scopes: scopes.to_vec(),
            created_at: self.state.clock.now(),
        };
        Ok(self.state.stores.refresh_tokens.put(token).await?)
    }
}
