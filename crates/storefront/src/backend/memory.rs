//! In-memory implementation of the hosted-backend seam.
//!
//! Test double used by the store and integration tests: seedable
//! catalog and accounts, injectable read/write failures, and the same
//! auth-event channel the REST backend exposes. Rows live in a single
//! mutex-guarded table set.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::broadcast;

use bramble_core::{CartItem, CartItemId, Email, NewCartItem, Product, ProductId, User, UserId};

use super::{AuthEvent, Backend, BackendError, Session};

const AUTH_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    accounts: Vec<Account>,
    session: Option<User>,
    products: Vec<Product>,
    cart_items: Vec<CartItem>,
    fail_reads: bool,
    fail_writes: bool,
    delete_calls: usize,
}

/// In-memory backend for tests.
///
/// Clones share state, so a test can hold one handle for assertions
/// while the stores hold another.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend: no accounts, no catalog, no session.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                events,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Seeding and fault injection
    // =========================================================================

    /// Add a product to the catalog.
    pub fn add_product(&self, product: Product) {
        self.lock().products.push(product);
    }

    /// Register an account and return its user record.
    pub fn register_account(&self, email: &Email, password: &str) -> User {
        let user = User {
            id: UserId::random(),
            email: email.clone(),
            created_at: Utc::now(),
        };
        self.lock().accounts.push(Account {
            user: user.clone(),
            password: password.to_owned(),
        });
        user
    }

    /// Make row reads fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make row writes fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Number of delete calls received (single-row and per-user).
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    /// Rows currently stored for `user_id`, for assertions.
    #[must_use]
    pub fn stored_cart_items(&self, user_id: UserId) -> Vec<CartItem> {
        self.lock()
            .cart_items
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Push an out-of-band auth event, as if the transition happened
    /// on another device.
    pub fn push_event(&self, event: AuthEvent) {
        if let Some(session) = &event.session {
            self.lock().session = Some(session.user.clone());
        } else if event.kind == super::AuthEventKind::SignedOut {
            self.lock().session = None;
        }
        let _ = self.inner.events.send(event);
    }

    fn read_guard(state: &MemoryState) -> Result<(), BackendError> {
        if state.fail_reads {
            return Err(BackendError::Service {
                status: 503,
                message: "injected read failure".to_owned(),
            });
        }
        Ok(())
    }

    fn write_guard(state: &MemoryState) -> Result<(), BackendError> {
        if state.fail_writes {
            return Err(BackendError::Service {
                status: 503,
                message: "injected write failure".to_owned(),
            });
        }
        Ok(())
    }

    fn session_for(user: &User) -> Session {
        Session {
            user: user.clone(),
            access_token: SecretString::from(uuid::Uuid::new_v4().to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn current_user(&self) -> Result<Option<User>, BackendError> {
        let state = self.lock();
        Self::read_guard(&state)?;
        Ok(state.session.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<Session, BackendError> {
        let session = {
            let mut state = self.lock();
            let account = state
                .accounts
                .iter()
                .find(|a| a.user.email == *email && a.password == password)
                .ok_or_else(|| BackendError::Auth("invalid login credentials".to_owned()))?;
            let session = Self::session_for(&account.user);
            state.session = Some(session.user.clone());
            session
        };

        let _ = self.inner.events.send(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &Email, password: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::write_guard(&state)?;
        if state.accounts.iter().any(|a| a.user.email == *email) {
            return Err(BackendError::Auth("account already registered".to_owned()));
        }
        let user = User {
            id: UserId::random(),
            email: email.clone(),
            created_at: Utc::now(),
        };
        state.accounts.push(Account {
            user,
            password: password.to_owned(),
        });
        // No session is established; confirmation happens out of band
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            Self::write_guard(&state)?;
            if state.session.is_none() {
                return Err(BackendError::Auth("no active session".to_owned()));
            }
            state.session = None;
        }

        let _ = self.inner.events.send(AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    async fn cart_items_for_user(&self, user_id: UserId) -> Result<Vec<CartItem>, BackendError> {
        let state = self.lock();
        Self::read_guard(&state)?;
        Ok(state
            .cart_items
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_cart_item(&self, item: NewCartItem) -> Result<CartItem, BackendError> {
        let mut state = self.lock();
        Self::write_guard(&state)?;
        let row = CartItem {
            id: CartItemId::random(),
            user_id: item.user_id,
            product_id: item.product_id,
            quantity: item.quantity,
            created_at: Utc::now(),
        };
        state.cart_items.push(row.clone());
        Ok(row)
    }

    async fn update_cart_item_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::write_guard(&state)?;
        // Like the REST service, a filter matching no rows is not an error
        if let Some(item) = state.cart_items.iter_mut().find(|item| item.id == id) {
            item.quantity = quantity;
        }
        Ok(())
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::write_guard(&state)?;
        state.delete_calls += 1;
        state.cart_items.retain(|item| item.id != id);
        Ok(())
    }

    async fn delete_cart_items_for_user(&self, user_id: UserId) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::write_guard(&state)?;
        state.delete_calls += 1;
        state.cart_items.retain(|item| item.user_id != user_id);
        Ok(())
    }

    async fn product(&self, id: ProductId) -> Result<Product, BackendError> {
        let state = self.lock();
        Self::read_guard(&state)?;
        state
            .products
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("product {id}")))
    }

    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError> {
        let state = self.lock();
        Self::read_guard(&state)?;
        Ok(state
            .products
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }
}
