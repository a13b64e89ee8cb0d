//! Hosted-backend seam.
//!
//! # Architecture
//!
//! The hosted service is the source of truth for identity, cart rows,
//! and the catalog - NO local persistence, direct API calls. This
//! module defines the capability surface the stores consume:
//!
//! - Auth: current session, password sign-in, sign-up, sign-out, and
//!   a push channel of auth transitions
//! - Cart rows: filtered reads and single-row writes
//! - Products: single and batched reads (read-only)
//!
//! Two implementations ship with the crate: [`RestBackend`] speaks the
//! hosted service's REST conventions, and [`MemoryBackend`] is an
//! in-process double for tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use bramble_storefront::backend::{Backend, RestBackend};
//!
//! let backend = RestBackend::new(&config)?;
//! let session = backend.sign_in_with_password(&email, "hunter2!").await?;
//! let items = backend.cart_items_for_user(session.user.id).await?;
//! ```

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::broadcast;

use bramble_core::{CartItem, CartItemId, Email, NewCartItem, Product, ProductId, User, UserId};

/// Errors that can occur when talking to the hosted backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Response body had an unexpected shape.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The auth service rejected the request (bad credentials,
    /// unconfirmed account, expired token).
    #[error("auth error: {0}")]
    Auth(String),

    /// The service returned a non-success status.
    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },
}

/// An established auth session pushed or returned by the backend.
#[derive(Debug, Clone)]
pub struct Session {
    /// The signed-in user.
    pub user: User,
    /// Bearer token for subsequent calls.
    pub access_token: SecretString,
}

/// Kind of auth transition pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// An auth transition pushed by the backend.
///
/// The payload carries the session as the backend now sees it; a
/// subscriber that mirrors identity should overwrite from it
/// unconditionally rather than merging.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    /// Event for a newly established session.
    #[must_use]
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    /// Event for a terminated session.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }
}

/// Capability surface of the hosted backend.
///
/// All methods are pass-through calls: implementations hold no cart or
/// identity state of their own beyond transport concerns (tokens,
/// response caches).
#[async_trait]
pub trait Backend: Send + Sync {
    // =========================================================================
    // Auth
    // =========================================================================

    /// The user of the current session, if one is established.
    async fn current_user(&self) -> Result<Option<User>, BackendError>;

    /// Check credentials and establish a session.
    ///
    /// Implementations emit a [`AuthEventKind::SignedIn`] event on
    /// success, after the session is established.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<Session, BackendError>;

    /// Register a new account.
    ///
    /// Does not establish a session; the service may require email
    /// confirmation first.
    async fn sign_up(&self, email: &Email, password: &str) -> Result<(), BackendError>;

    /// Terminate the current session.
    ///
    /// Implementations emit a [`AuthEventKind::SignedOut`] event on
    /// success.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Subscribe to auth transitions (sign-in here or elsewhere, token
    /// refresh, sign-out).
    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    // =========================================================================
    // Cart rows
    // =========================================================================

    /// All cart rows belonging to `user_id`, oldest first.
    async fn cart_items_for_user(&self, user_id: UserId) -> Result<Vec<CartItem>, BackendError>;

    /// Insert a cart row; the backend assigns id and timestamp and
    /// returns the stored row.
    async fn insert_cart_item(&self, item: NewCartItem) -> Result<CartItem, BackendError>;

    /// Set the quantity of an existing cart row.
    async fn update_cart_item_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<(), BackendError>;

    /// Delete one cart row.
    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), BackendError>;

    /// Delete every cart row belonging to `user_id`.
    async fn delete_cart_items_for_user(&self, user_id: UserId) -> Result<(), BackendError>;

    // =========================================================================
    // Products (read-only)
    // =========================================================================

    /// One product by id.
    async fn product(&self, id: ProductId) -> Result<Product, BackendError>;

    /// Batched product lookup; missing ids are simply absent from the
    /// result.
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError>;
}
