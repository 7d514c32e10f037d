//! Session manager: who is signed in, and change notifications.
//!
//! The manager wraps an [`IdentityProvider`] and exposes a tri-state view of
//! the authenticated identity. [`SessionState::Unresolved`] is distinct from
//! [`SessionState::SignedOut`] so a shell never renders a signed-out view
//! before the initial session lookup has finished.
//!
//! Observers subscribe through a `tokio::sync::watch` channel. Notifications
//! are sent synchronously from [`SessionManager::apply`] and only when the
//! identity actually changes; a token refresh for the same user swaps the
//! stored credential without waking anyone.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = Arc::new(SessionManager::new(provider));
//! let _listener = manager.listen();
//!
//! match manager.resolve().await? {
//!     SessionState::SignedIn(identity) => println!("Hello {}", identity.display_name()),
//!     _ => println!("Please sign in"),
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::types::{AuthSession, Identity};

/// Push notification from an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user signed in.
    SignedIn(AuthSession),

    /// The provider refreshed the credentials of the current session.
    TokenRefreshed(AuthSession),

    /// The session ended.
    SignedOut,
}

/// The identity/authentication collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-shot lookup of the existing session.
    async fn current_session(&self) -> std::result::Result<Option<AuthSession>, AuthError>;

    /// Subscribes to login, logout and refresh events.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Ends the current session with the provider.
    async fn sign_out(&self) -> std::result::Result<(), AuthError>;
}

/// Authentication state as seen by the rest of the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// The initial lookup has not finished yet.
    #[default]
    Unresolved,

    /// Resolved, with nobody signed in.
    SignedOut,

    /// Resolved, with a signed-in identity.
    SignedIn(Identity),
}

impl SessionState {
    /// Returns the signed-in identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) => Some(identity),
            _ => None,
        }
    }

    /// Returns true once the initial lookup has finished.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Returns true if both states name the same user, ignoring credentials.
    pub fn same_identity(&self, other: &SessionState) -> bool {
        match (self, other) {
            (Self::SignedIn(a), Self::SignedIn(b)) => a.same_as(b),
            (Self::SignedOut, Self::SignedOut) | (Self::Unresolved, Self::Unresolved) => true,
            _ => false,
        }
    }
}

/// Tracks the authenticated identity and notifies observers of changes.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Creates a manager in the [`SessionState::Unresolved`] state.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(SessionState::Unresolved);
        Self { provider, state }
    }

    /// Performs the one-shot resolution of the existing session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the provider lookup fails. The manager still
    /// resolves to [`SessionState::SignedOut`] in that case, so the shell can
    /// show its sign-in view.
    pub async fn resolve(&self) -> Result<SessionState> {
        match self.provider.current_session().await {
            Ok(Some(session)) => {
                debug!(user_id = %session.user.id, "Resolved existing session");
                self.set_state(SessionState::SignedIn(session.identity()));
            }
            Ok(None) => {
                debug!("No existing session");
                self.set_state(SessionState::SignedOut);
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed, treating as signed out");
                self.set_state(SessionState::SignedOut);
                return Err(e.into());
            }
        }
        Ok(self.state())
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns the signed-in identity, if any.
    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    /// Returns true once the initial lookup has finished.
    pub fn is_resolved(&self) -> bool {
        self.state.borrow().is_resolved()
    }

    /// Subscribes to identity changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Applies a provider event.
    ///
    /// Returns `true` if observers were notified.
    pub fn apply(&self, event: SessionEvent) -> bool {
        let next = match event {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                SessionState::SignedIn(session.identity())
            }
            SessionEvent::SignedOut => SessionState::SignedOut,
        };
        self.set_state(next)
    }

    /// Spawns a task that forwards provider events into [`Self::apply`].
    ///
    /// The task ends when the provider's event channel closes.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = self.provider.session_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        manager.apply(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session listener lagged, re-resolving");
                        if let Err(e) = manager.resolve().await {
                            warn!(error = %e, "Re-resolving session failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Session event channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Signs out with the provider and transitions to signed out.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the provider request fails. The local state
    /// is left unchanged in that case.
    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await?;
        self.set_state(SessionState::SignedOut);
        info!("Signed out");
        Ok(())
    }

    /// Stores `next`, notifying observers only if the identity changed.
    fn set_state(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.same_identity(&next) {
                // Same user: keep the freshest credentials without notifying.
                *current = next;
                false
            } else {
                debug!(
                    from = state_label(current),
                    to = state_label(&next),
                    "Session state changed"
                );
                *current = next;
                true
            }
        })
    }
}

fn state_label(state: &SessionState) -> &'static str {
    match state {
        SessionState::Unresolved => "unresolved",
        SessionState::SignedOut => "signed_out",
        SessionState::SignedIn(_) => "signed_in",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIdentityProvider;
    use chrono::{Duration, Utc};

    fn session_for(id: &str, token: &str) -> AuthSession {
        AuthSession {
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            user: Identity::new(id, Some(format!("{id}@example.com"))),
        }
    }

    #[tokio::test]
    async fn starts_unresolved() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(provider);
        assert_eq!(manager.state(), SessionState::Unresolved);
        assert!(!manager.is_resolved());
        assert!(manager.current_identity().is_none());
    }

    #[tokio::test]
    async fn resolve_without_session_is_signed_out() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(provider);

        let state = manager.resolve().await.expect("resolve should succeed");
        assert_eq!(state, SessionState::SignedOut);
        assert!(manager.is_resolved());
    }

    #[tokio::test]
    async fn resolve_with_session_is_signed_in() {
        let provider = Arc::new(MemoryIdentityProvider::signed_in(session_for("user-a", "t1")));
        let manager = SessionManager::new(provider);

        manager.resolve().await.expect("resolve should succeed");
        let identity = manager.current_identity().expect("should be signed in");
        assert_eq!(identity.id, "user-a");
        assert_eq!(identity.access_token(), Some("t1"));
    }

    #[tokio::test]
    async fn resolve_failure_resolves_to_signed_out() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider.fail_lookup(AuthError::Provider("down".to_string()));
        let manager = SessionManager::new(provider);

        let result = manager.resolve().await;
        assert!(result.is_err());
        assert_eq!(manager.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn apply_notifies_on_identity_change() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(provider);
        let mut rx = manager.subscribe();

        assert!(manager.apply(SessionEvent::SignedIn(session_for("user-a", "t1"))));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().identity().map(|i| i.id.as_str()), Some("user-a"));

        assert!(manager.apply(SessionEvent::SignedOut));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn token_refresh_for_same_identity_is_silent() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(provider);
        manager.apply(SessionEvent::SignedIn(session_for("user-a", "t1")));
        let mut rx = manager.subscribe();
        rx.mark_unchanged();

        let notified = manager.apply(SessionEvent::TokenRefreshed(session_for("user-a", "t2")));

        assert!(!notified);
        assert!(!rx.has_changed().unwrap());
        // The fresher credential is still stored.
        let identity = manager.current_identity().expect("signed in");
        assert_eq!(identity.access_token(), Some("t2"));
    }

    #[tokio::test]
    async fn switching_users_notifies() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(provider);
        manager.apply(SessionEvent::SignedIn(session_for("user-a", "t1")));

        assert!(manager.apply(SessionEvent::SignedIn(session_for("user-b", "t2"))));
        assert_eq!(manager.current_identity().unwrap().id, "user-b");
    }

    #[tokio::test]
    async fn sign_out_transitions_to_signed_out() {
        let provider = Arc::new(MemoryIdentityProvider::signed_in(session_for("user-a", "t1")));
        let manager = SessionManager::new(provider.clone());
        manager.resolve().await.unwrap();

        manager.sign_out().await.expect("sign out should succeed");

        assert_eq!(manager.state(), SessionState::SignedOut);
        assert!(provider.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_failure_keeps_state() {
        let provider = Arc::new(MemoryIdentityProvider::signed_in(session_for("user-a", "t1")));
        let manager = SessionManager::new(provider.clone());
        manager.resolve().await.unwrap();
        provider.fail_sign_out(AuthError::Provider("offline".to_string()));

        assert!(manager.sign_out().await.is_err());
        assert!(manager.current_identity().is_some());
    }

    #[tokio::test]
    async fn listen_forwards_provider_events() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = Arc::new(SessionManager::new(provider.clone()));
        manager.resolve().await.unwrap();
        let mut rx = manager.subscribe();
        let handle = manager.listen();

        provider.sign_in(session_for("user-a", "t1"));

        tokio::time::timeout(std::time::Duration::from_secs(1), rx.changed())
            .await
            .expect("should be notified in time")
            .expect("sender alive");
        assert_eq!(manager.current_identity().unwrap().id, "user-a");

        handle.abort();
    }

    #[test]
    fn same_identity_compares_states() {
        let a = SessionState::SignedIn(Identity::new("a", None));
        let a2 = SessionState::SignedIn(Identity::new("a", None).with_access_token("x"));
        let b = SessionState::SignedIn(Identity::new("b", None));
        assert!(a.same_identity(&a2));
        assert!(!a.same_identity(&b));
        assert!(!SessionState::Unresolved.same_identity(&SessionState::SignedOut));
    }
}
