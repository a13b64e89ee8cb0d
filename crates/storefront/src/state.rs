//! Application state: the stores, the guard, and their wiring.
//!
//! [`Storefront`] owns one backend handle and the two stores built on
//! it, spawns the auth-event listeners that keep the stores in sync,
//! and runs the initial fetches so a pre-existing session is picked
//! up at startup.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::instrument;

use bramble_core::CurrencyCode;

use crate::backend::{Backend, RestBackend};
use crate::cart::CartStore;
use crate::config::StorefrontConfig;
use crate::error::Result;
use crate::guard::NavigationGuard;
use crate::session::SessionStore;

/// Shared handle to the whole state layer.
///
/// Cheaply cloneable; dropping the last clone stops the auth-event
/// listeners.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    backend: Arc<dyn Backend>,
    session: SessionStore,
    cart: CartStore,
    guard: NavigationGuard,
    listeners: [JoinHandle<()>; 2],
}

impl Storefront {
    /// Connect to the hosted backend described by `config` and bring
    /// the stores up to date with any existing session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    #[instrument(skip(config))]
    pub async fn connect(config: &StorefrontConfig) -> Result<Self> {
        let backend = RestBackend::new(config)?;
        Ok(Self::with_backend(Arc::new(backend), config.currency).await)
    }

    /// Build the state layer on an arbitrary backend.
    ///
    /// Runs the initial identity fetch and, when a session already
    /// exists, the initial cart fetch. Both are soft: on failure the
    /// stores start empty.
    pub async fn with_backend(backend: Arc<dyn Backend>, currency: CurrencyCode) -> Self {
        let session = SessionStore::new(Arc::clone(&backend));
        let cart = CartStore::new(Arc::clone(&backend), currency);
        let guard = NavigationGuard::new(session.clone());

        let listeners = [session.spawn_auth_listener(), cart.spawn_auth_listener()];

        session.fetch_identity().await;
        // Skips itself when no session exists
        cart.fetch_cart().await;

        Self {
            inner: Arc::new(StorefrontInner {
                backend,
                session,
                cart,
                guard,
                listeners,
            }),
        }
    }

    /// The session store.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// The cart store.
    #[must_use]
    pub fn cart(&self) -> &CartStore {
        &self.inner.cart
    }

    /// The navigation guard.
    #[must_use]
    pub fn guard(&self) -> &NavigationGuard {
        &self.inner.guard
    }

    /// The underlying backend handle.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.inner.backend)
    }
}

impl Drop for StorefrontInner {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}
