//! Session store: the current authenticated identity.
//!
//! Holds the last-known identity reported by the hosted auth service.
//! Explicit sign-in/out calls and pushed auth events are the only
//! writers; everything else reads synchronously from the mirror.
//!
//! Failure policy follows blast radius: background identity refreshes
//! swallow errors (logged, identity set to absent), while
//! user-initiated sign-in/up/out log and return the error so the UI
//! can show feedback.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{error, instrument, warn};

use bramble_core::{Email, User};

use crate::backend::{AuthEvent, Backend};
use crate::error::Result;

/// Published view of the session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// The signed-in user, or `None` when no session is established.
    pub identity: Option<User>,
    /// Whether an identity fetch is in flight.
    pub loading: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        // loading starts true: identity is unknown until the first
        // fetch resolves
        Self {
            identity: None,
            loading: true,
        }
    }
}

/// Shared handle to the session state.
///
/// Cheaply cloneable; all clones observe the same identity.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn Backend>,
    state: RwLock<SessionSnapshot>,
    changed: watch::Sender<SessionSnapshot>,
}

impl SessionStore {
    /// Create a store bound to a backend. No identity is fetched yet;
    /// call [`SessionStore::fetch_identity`] (or let
    /// [`Storefront`](crate::state::Storefront) do it) to resolve the
    /// cold-start state.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (changed, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                backend,
                state: RwLock::new(SessionSnapshot::default()),
                changed,
            }),
        }
    }

    /// Spawn the listener that mirrors backend auth events into this
    /// store. The task ends when the backend drops its event channel.
    pub fn spawn_auth_listener(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let mut events = self.inner.backend.subscribe_auth_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => store.apply_auth_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "auth event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Overwrite identity from a pushed auth event.
    ///
    /// Unconditional by design: the pushed payload is the backend's
    /// current view and wins over anything fetched earlier.
    pub(crate) fn apply_auth_event(&self, event: &AuthEvent) {
        let identity = event.session.as_ref().map(|s| s.user.clone());
        self.mutate(|state| state.identity = identity);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The last-known identity. Synchronous; never touches the
    /// network.
    #[must_use]
    pub fn identity(&self) -> Option<User> {
        self.read().identity
    }

    /// Whether an identity fetch is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.read().loading
    }

    /// Current snapshot of the session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.read()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.changed.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Refresh identity from the backend's current session.
    ///
    /// Soft failure: an error is logged, identity becomes absent, and
    /// nothing is raised to the caller.
    #[instrument(skip(self))]
    pub async fn fetch_identity(&self) {
        self.mutate(|state| state.loading = true);

        let identity = match self.inner.backend.current_user().await {
            Ok(user) => user,
            Err(e) => {
                warn!("failed to fetch identity: {e}");
                None
            }
        };

        self.mutate(|state| {
            state.identity = identity;
            state.loading = false;
        });
    }

    /// Sign in with email and password, then refresh identity.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection (bad credentials, outage) to
    /// the caller; identity is left unchanged on failure.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<()> {
        let email = Email::parse(email)?;

        if let Err(e) = self
            .inner
            .backend
            .sign_in_with_password(&email, password)
            .await
        {
            error!("sign-in failed: {e}");
            return Err(e.into());
        }

        self.fetch_identity().await;
        Ok(())
    }

    /// Register a new account.
    ///
    /// Does not touch identity: the service may require confirmation
    /// before the account can sign in.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection to the caller.
    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<()> {
        let email = Email::parse(email)?;

        if let Err(e) = self.inner.backend.sign_up(&email, password).await {
            error!("sign-up failed: {e}");
            return Err(e.into());
        }

        Ok(())
    }

    /// Terminate the current session.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection to the caller; on failure the
    /// identity is NOT cleared optimistically.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        if let Err(e) = self.inner.backend.sign_out().await {
            error!("sign-out failed: {e}");
            return Err(e.into());
        }

        self.mutate(|state| state.identity = None);
        Ok(())
    }

    // =========================================================================
    // State plumbing
    // =========================================================================

    fn read(&self) -> SessionSnapshot {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        let snapshot = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut state);
            state.clone()
        };
        self.inner.changed.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthEventKind, MemoryBackend, Session};
    use crate::error::StoreError;

    fn store_with_account(email: &str, password: &str) -> (SessionStore, MemoryBackend, User) {
        let backend = MemoryBackend::new();
        let user = backend.register_account(
            &Email::parse(email).expect("valid email"),
            password,
        );
        let store = SessionStore::new(Arc::new(backend.clone()));
        (store, backend, user)
    }

    #[tokio::test]
    async fn test_sign_in_sets_identity() {
        let (store, _backend, user) = store_with_account("a@b.com", "pw123456");

        assert!(store.identity().is_none());
        store.sign_in("a@b.com", "pw123456").await.expect("sign in");

        assert_eq!(store.identity().map(|u| u.id), Some(user.id));
        assert!(!store.loading());
    }

    #[tokio::test]
    async fn test_sign_in_failure_is_raised_and_identity_untouched() {
        let (store, _backend, _user) = store_with_account("a@b.com", "pw123456");

        let err = store
            .sign_in("a@b.com", "wrong-password")
            .await
            .expect_err("must fail");
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.identity().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_rejects_malformed_email() {
        let (store, _backend, _user) = store_with_account("a@b.com", "pw123456");

        let err = store
            .sign_in("not-an-email", "pw123456")
            .await
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidEmail(_)));
    }

    #[tokio::test]
    async fn test_sign_up_does_not_establish_identity() {
        let backend = MemoryBackend::new();
        let store = SessionStore::new(Arc::new(backend));

        store
            .sign_up("new@shop.com", "pw123456")
            .await
            .expect("sign up");
        assert!(store.identity().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_failure_is_raised() {
        let backend = MemoryBackend::new();
        backend.set_fail_writes(true);
        let store = SessionStore::new(Arc::new(backend));

        let err = store
            .sign_up("new@shop.com", "pw123456")
            .await
            .expect_err("must fail");
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.identity().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_failure_leaves_identity() {
        let (store, backend, user) = store_with_account("a@b.com", "pw123456");
        store.sign_in("a@b.com", "pw123456").await.expect("sign in");

        backend.set_fail_writes(true);
        let err = store.sign_out().await.expect_err("must fail");
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.identity().map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_sign_out_clears_identity() {
        let (store, _backend, _user) = store_with_account("a@b.com", "pw123456");
        store.sign_in("a@b.com", "pw123456").await.expect("sign in");

        store.sign_out().await.expect("sign out");
        assert!(store.identity().is_none());
    }

    #[tokio::test]
    async fn test_fetch_identity_soft_fails_to_absent() {
        let (store, backend, _user) = store_with_account("a@b.com", "pw123456");
        store.sign_in("a@b.com", "pw123456").await.expect("sign in");
        assert!(store.identity().is_some());

        backend.set_fail_reads(true);
        store.fetch_identity().await;

        assert!(store.identity().is_none());
        assert!(!store.loading());
    }

    #[tokio::test]
    async fn test_pushed_event_overwrites_identity() {
        let (store, _backend, user) = store_with_account("a@b.com", "pw123456");

        let session = Session {
            user: user.clone(),
            access_token: secrecy::SecretString::from("tok-1".to_owned()),
        };
        store.apply_auth_event(&AuthEvent::signed_in(session));
        assert_eq!(store.identity().map(|u| u.id), Some(user.id));

        store.apply_auth_event(&AuthEvent::signed_out());
        assert!(store.identity().is_none());
    }

    #[tokio::test]
    async fn test_listener_mirrors_out_of_band_events() {
        let (store, backend, user) = store_with_account("a@b.com", "pw123456");
        let handle = store.spawn_auth_listener();
        let mut seen = store.subscribe();

        let session = Session {
            user: user.clone(),
            access_token: secrecy::SecretString::from("tok-2".to_owned()),
        };
        backend.push_event(AuthEvent {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        });

        seen.changed().await.expect("snapshot published");
        assert_eq!(store.identity().map(|u| u.id), Some(user.id));
        handle.abort();
    }
}
