//! GoTrue-backed identity provider.
//!
//! Holds at most one [`AuthSession`]. Sessions come from a password sign-in
//! or are restored from disk with [`SupabaseAuth::with_session`]. On lookup
//! the access token is checked against `/auth/v1/user`; an expired or
//! rejected token is exchanged once for a new one using the refresh token.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{SupabaseClient, SupabaseError};
use crate::error::AuthError;
use crate::session::{IdentityProvider, SessionEvent};
use crate::types::{AuthSession, Identity};

/// Capacity of the session event channel.
const SESSION_EVENT_CAPACITY: usize = 16;

/// User object returned by `/auth/v1/user` and embedded in token responses.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        Identity::new(user.id, user.email)
    }
}

/// Response of `/auth/v1/token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    user: UserResponse,
}

impl TryFrom<TokenResponse> for AuthSession {
    type Error = SupabaseError;

    fn try_from(token: TokenResponse) -> Result<Self, Self::Error> {
        let expires_at = ChronoDuration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                SupabaseError::InvalidResponse(format!(
                    "token expires_in out of range: {}",
                    token.expires_in
                ))
            })?;

        Ok(AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user.into(),
        })
    }
}

/// Identity provider talking to Supabase Auth.
#[derive(Debug)]
pub struct SupabaseAuth {
    client: SupabaseClient,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupabaseAuth {
    /// Creates a provider with nobody signed in.
    pub fn new(client: SupabaseClient) -> Self {
        Self::with_session(client, None)
    }

    /// Creates a provider holding a previously persisted session.
    pub fn with_session(client: SupabaseClient, session: Option<AuthSession>) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            client,
            session: RwLock::new(session),
            events,
        }
    }

    /// Returns the session currently held, without contacting Supabase.
    pub fn session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the current access token, if a session is held.
    pub fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    fn store(&self, session: Option<AuthSession>) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Signs in with email and password.
    ///
    /// Broadcasts [`SessionEvent::SignedIn`] on success.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if Supabase rejects the
    /// credentials, or [`AuthError::Provider`] on transport failures.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        debug!(email = %email, "Signing in with password");

        let request = self
            .client
            .request(Method::POST, "/auth/v1/token?grant_type=password", None)
            .json(&json!({ "email": email, "password": password }));

        let response = self.client.send(request).await.map_err(|e| match e {
            SupabaseError::Rejected { status: 400, .. } | SupabaseError::Unauthorized => {
                AuthError::InvalidCredentials
            }
            other => AuthError::Provider(other.to_string()),
        })?;

        let session = SupabaseClient::json::<TokenResponse>(response, "token")
            .await
            .and_then(AuthSession::try_from)
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        info!(user_id = %session.user.id, "Signed in");
        self.store(Some(session.clone()));
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// Validates an access token and returns the user it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Unauthorized`] if the token is invalid or
    /// expired, or another [`SupabaseError`] on transport failures.
    pub async fn get_user(&self, access_token: &str) -> Result<Identity, SupabaseError> {
        let request = self
            .client
            .request(Method::GET, "/auth/v1/user", Some(access_token));
        let response = self.client.send(request).await?;
        let user: UserResponse = SupabaseClient::json(response, "user").await?;

        debug!(user_id = %user.id, "JWT validated successfully");
        Ok(user.into())
    }

    /// Exchanges a refresh token for a new session.
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<AuthSession, SupabaseError> {
        let request = self
            .client
            .request(Method::POST, "/auth/v1/token?grant_type=refresh_token", None)
            .json(&json!({ "refresh_token": refresh_token }));
        let response = self.client.send(request).await?;
        let token: TokenResponse = SupabaseClient::json(response, "token").await?;
        token.try_into()
    }

    /// Refreshes `session`, or drops it if the refresh token is unusable.
    async fn refresh_or_drop(
        &self,
        session: &AuthSession,
    ) -> Result<Option<AuthSession>, AuthError> {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            debug!(user_id = %session.user.id, "Session expired without refresh token");
            self.drop_session();
            return Ok(None);
        };

        match self.exchange_refresh_token(refresh_token).await {
            Ok(fresh) => {
                info!(user_id = %fresh.user.id, "Access token refreshed");
                self.store(Some(fresh.clone()));
                self.emit(SessionEvent::TokenRefreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(
                SupabaseError::Unauthorized
                | SupabaseError::Forbidden(_)
                | SupabaseError::Rejected { .. },
            ) => {
                warn!(user_id = %session.user.id, "Refresh token rejected, session dropped");
                self.drop_session();
                Ok(None)
            }
            Err(e) => Err(AuthError::Provider(e.to_string())),
        }
    }

    fn drop_session(&self) {
        self.store(None);
        self.emit(SessionEvent::SignedOut);
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let Some(session) = self.session() else {
            return Ok(None);
        };

        if session.is_expired() {
            debug!(user_id = %session.user.id, "Access token expired");
            return self.refresh_or_drop(&session).await;
        }

        match self.get_user(&session.access_token).await {
            Ok(user) => {
                let mut current = session;
                current.user = user;
                self.store(Some(current.clone()));
                Ok(Some(current))
            }
            Err(SupabaseError::Unauthorized) => self.refresh_or_drop(&session).await,
            Err(e) => Err(AuthError::Provider(e.to_string())),
        }
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(token) = self.access_token() else {
            self.drop_session();
            return Ok(());
        };

        let request = self
            .client
            .request(Method::POST, "/auth/v1/logout", Some(&token));
        match self.client.send(request).await {
            // A token Supabase no longer accepts is already signed out.
            Ok(_) | Err(SupabaseError::Unauthorized) => {}
            Err(e) => {
                warn!(error = %e, "Sign out request failed");
                return Err(AuthError::Provider(e.to_string()));
            }
        }

        self.drop_session();
        Ok(())
    }
}
