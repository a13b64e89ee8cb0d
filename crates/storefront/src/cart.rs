//! Cart store: cart lines plus a local mirror of referenced products.
//!
//! Every mutation is remote-first: the hosted backend commits the
//! write, then the local mirror is updated from the confirmed result.
//! On failure the mirror is left exactly as it was.
//!
//! Single-row mutations reconcile incrementally; establishing a
//! session always does a wholesale refetch instead, because local
//! state carried across a session switch cannot be trusted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, instrument, warn};

use bramble_core::{CartItem, CartItemId, CurrencyCode, NewCartItem, Price, Product, ProductId};

use crate::backend::{AuthEvent, AuthEventKind, Backend};
use crate::error::{Result, StoreError};

/// Published view of the cart state.
///
/// Item count and total are computed from the mirrors on demand,
/// never stored.
#[derive(Debug, Clone, Default)]
pub struct CartSnapshot {
    /// Cart lines, oldest first.
    pub items: Vec<CartItem>,
    /// Products referenced by the lines, keyed by id. Populated
    /// lazily; a line whose product has not arrived yet contributes
    /// zero to the total.
    pub products: HashMap<ProductId, Product>,
    /// Whether a wholesale refetch is in flight.
    pub loading: bool,
}

impl CartSnapshot {
    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Sum of quantity times unit price over all lines with a cached
    /// product.
    #[must_use]
    pub fn total_amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| {
                self.products
                    .get(&item.product_id)
                    .map_or(Decimal::ZERO, |p| p.price * Decimal::from(item.quantity))
            })
            .sum()
    }
}

/// Shared handle to the cart state.
///
/// Cheaply cloneable; all clones observe the same mirrors.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartInner>,
}

struct CartInner {
    backend: Arc<dyn Backend>,
    currency: CurrencyCode,
    state: RwLock<CartSnapshot>,
    changed: watch::Sender<CartSnapshot>,
}

impl CartStore {
    /// Create a store bound to a backend. The mirror starts empty;
    /// [`Storefront`](crate::state::Storefront) runs the initial
    /// fetch when a session already exists.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, currency: CurrencyCode) -> Self {
        let (changed, _) = watch::channel(CartSnapshot::default());
        Self {
            inner: Arc::new(CartInner {
                backend,
                currency,
                state: RwLock::new(CartSnapshot::default()),
                changed,
            }),
        }
    }

    /// Spawn the listener that reacts to backend auth events: a
    /// sign-in triggers a wholesale refetch, a sign-out wipes the
    /// local mirrors. The task ends when the backend drops its event
    /// channel.
    pub fn spawn_auth_listener(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let mut events = self.inner.backend.subscribe_auth_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => store.apply_auth_event(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "auth event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub(crate) async fn apply_auth_event(&self, event: &AuthEvent) {
        match event.kind {
            AuthEventKind::SignedIn => self.fetch_cart().await,
            // The rows survive server-side for the next login; only
            // the local mirrors are emptied.
            AuthEventKind::SignedOut => self.mutate(|state| {
                state.items.clear();
                state.products.clear();
            }),
            AuthEventKind::TokenRefreshed => {}
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Cart lines, oldest first.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.read().items
    }

    /// The cached product for `id`, if it has been fetched.
    #[must_use]
    pub fn cached_product(&self, id: ProductId) -> Option<Product> {
        self.read().products.get(&id).cloned()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.read().item_count()
    }

    /// Cart total in the catalog currency. Lines whose product is not
    /// cached yet contribute zero.
    #[must_use]
    pub fn total(&self) -> Price {
        Price::new(self.read().total_amount(), self.inner.currency)
    }

    /// Whether a wholesale refetch is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.read().loading
    }

    /// Current snapshot of the cart state.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.read()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.changed.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Reload the cart and every referenced product from the backend,
    /// replacing the local mirrors wholesale.
    ///
    /// Soft failure: an error is logged and the mirrors keep their
    /// last-known-good value.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) {
        self.mutate(|state| state.loading = true);

        if let Err(e) = self.refresh().await {
            warn!("failed to refresh cart: {e}");
        }

        self.mutate(|state| state.loading = false);
    }

    async fn refresh(&self) -> Result<()> {
        let Some(user) = self.inner.backend.current_user().await? else {
            debug!("no session, cart refresh skipped");
            return Ok(());
        };

        let items = self.inner.backend.cart_items_for_user(user.id).await?;

        let mut product_ids: Vec<ProductId> = items.iter().map(|item| item.product_id).collect();
        product_ids.sort_unstable();
        product_ids.dedup();
        let products = self.inner.backend.products_by_ids(&product_ids).await?;

        self.mutate(|state| {
            state.items = items;
            state.products = products.into_iter().map(|p| (p.id, p)).collect();
        });
        Ok(())
    }

    /// Add `quantity` units of a product to the cart.
    ///
    /// If a line for the product already exists its quantity is
    /// incremented; otherwise a new line is inserted and the product
    /// fetched into the mirror if absent. Requires a signed-in user.
    /// A `quantity` of zero is a no-op: stored lines always have
    /// quantity >= 1, so there is no row to create or change.
    ///
    /// Concurrent calls for the same product are not serialized: both
    /// may see no existing line and insert, leaving two rows. The
    /// backend's own constraints are the only backstop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAuthenticated`] without a session, or
    /// the backend's rejection; local state is unchanged on failure.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_to_cart(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Ok(());
        }

        let user = self
            .inner
            .backend
            .current_user()
            .await
            .inspect_err(|e| error!("failed to add to cart: {e}"))?
            .ok_or(StoreError::NotAuthenticated)?;

        let existing = self
            .read()
            .items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| (item.id, item.quantity));

        if let Some((id, current)) = existing {
            let next = current.saturating_add(quantity);
            self.inner
                .backend
                .update_cart_item_quantity(id, next)
                .await
                .inspect_err(|e| error!("failed to add to cart: {e}"))?;

            self.mutate(|state| {
                if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                    item.quantity = next;
                }
            });
            return Ok(());
        }

        let row = self
            .inner
            .backend
            .insert_cart_item(NewCartItem {
                user_id: user.id,
                product_id,
                quantity,
            })
            .await
            .inspect_err(|e| error!("failed to add to cart: {e}"))?;

        let product = if self.read().products.contains_key(&product_id) {
            None
        } else {
            Some(
                self.inner
                    .backend
                    .product(product_id)
                    .await
                    .inspect_err(|e| error!("failed to add to cart: {e}"))?,
            )
        };

        self.mutate(|state| {
            state.items.push(row);
            if let Some(product) = product {
                state.products.insert(product.id, product);
            }
        });
        Ok(())
    }

    /// Set the quantity of an existing line.
    ///
    /// A quantity of zero means the line should not exist at all and
    /// delegates to [`CartStore::remove_from_cart`].
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection; local state is unchanged on
    /// failure.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_quantity(&self, item_id: CartItemId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return self.remove_from_cart(item_id).await;
        }

        self.inner
            .backend
            .update_cart_item_quantity(item_id, quantity)
            .await
            .inspect_err(|e| error!("failed to update quantity: {e}"))?;

        self.mutate(|state| {
            if let Some(item) = state.items.iter_mut().find(|item| item.id == item_id) {
                item.quantity = quantity;
            }
        });
        Ok(())
    }

    /// Remove one line from the cart.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection; local state is unchanged on
    /// failure.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_from_cart(&self, item_id: CartItemId) -> Result<()> {
        self.inner
            .backend
            .delete_cart_item(item_id)
            .await
            .inspect_err(|e| error!("failed to remove from cart: {e}"))?;

        self.mutate(|state| state.items.retain(|item| item.id != item_id));
        Ok(())
    }

    /// Delete every cart row for the current user and empty the local
    /// mirrors. Without a session there is nothing to delete remotely
    /// and only the mirrors are emptied.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection; local state is unchanged on
    /// failure.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<()> {
        let user = self
            .inner
            .backend
            .current_user()
            .await
            .inspect_err(|e| error!("failed to clear cart: {e}"))?;

        if let Some(user) = user {
            self.inner
                .backend
                .delete_cart_items_for_user(user.id)
                .await
                .inspect_err(|e| error!("failed to clear cart: {e}"))?;
        }

        self.mutate(|state| {
            state.items.clear();
            state.products.clear();
        });
        Ok(())
    }

    // =========================================================================
    // State plumbing
    // =========================================================================

    fn read(&self) -> CartSnapshot {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut CartSnapshot)) {
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
    use crate::backend::MemoryBackend;

    use bramble_core::{Email, User};

    fn product(name: &str, cents: i64) -> Product {
        Product {
            id: ProductId::random(),
            name: name.to_owned(),
            description: format!("{name} description"),
            price: Decimal::new(cents, 2),
            features: vec![],
            category: "test".to_owned(),
            image_url: format!("https://cdn.example.com/{name}.jpg"),
        }
    }

    async fn signed_in_store() -> (CartStore, MemoryBackend, User) {
        let backend = MemoryBackend::new();
        let email = Email::parse("shopper@example.com").expect("valid email");
        backend.register_account(&email, "pw123456");
        let session = backend
            .sign_in_with_password(&email, "pw123456")
            .await
            .expect("sign in");

        let store = CartStore::new(Arc::new(backend.clone()), CurrencyCode::USD);
        (store, backend, session.user)
    }

    #[tokio::test]
    async fn test_add_to_cart_inserts_line_and_caches_product() {
        let (store, backend, _user) = signed_in_store().await;
        let p1 = product("p1", 1999);
        backend.add_product(p1.clone());

        store.add_to_cart(p1.id, 2).await.expect("add");

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items.first().map(|i| i.quantity), Some(2));
        assert!(store.cached_product(p1.id).is_some());
        assert_eq!(store.item_count(), 2);
        assert_eq!(store.total().amount, Decimal::new(3998, 2));
    }

    #[tokio::test]
    async fn test_add_to_cart_coalesces_duplicate_product() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 1000);
        backend.add_product(p1.clone());

        store.add_to_cart(p1.id, 2).await.expect("first add");
        store.add_to_cart(p1.id, 3).await.expect("second add");

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items.first().map(|i| i.quantity), Some(5));
        // One row remotely as well, not two
        assert_eq!(backend.stored_cart_items(user.id).len(), 1);
    }

    #[tokio::test]
    async fn test_add_to_cart_with_zero_quantity_is_a_no_op() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 1500);
        backend.add_product(p1.clone());

        store.add_to_cart(p1.id, 0).await.expect("no-op succeeds");

        assert!(store.items().is_empty());
        assert!(store.cached_product(p1.id).is_none());
        assert!(backend.stored_cart_items(user.id).is_empty());
    }

    #[tokio::test]
    async fn test_add_to_cart_requires_session() {
        let backend = MemoryBackend::new();
        let store = CartStore::new(Arc::new(backend.clone()), CurrencyCode::USD);
        let p1 = product("p1", 500);
        backend.add_product(p1.clone());

        let err = store.add_to_cart(p1.id, 1).await.expect_err("must fail");
        assert!(matches!(err, StoreError::NotAuthenticated));
        assert!(store.items().is_empty());
    }

    #[tokio::test]
    async fn test_item_count_and_total_track_mutations() {
        let (store, backend, _user) = signed_in_store().await;
        let p1 = product("p1", 250);
        let p2 = product("p2", 1050);
        backend.add_product(p1.clone());
        backend.add_product(p2.clone());

        store.add_to_cart(p1.id, 2).await.expect("add p1");
        store.add_to_cart(p2.id, 1).await.expect("add p2");
        assert_eq!(store.item_count(), 3);
        assert_eq!(store.total().amount, Decimal::new(1550, 2));

        let p1_line = store
            .items()
            .iter()
            .find(|i| i.product_id == p1.id)
            .map(|i| i.id)
            .expect("p1 line");
        store.update_quantity(p1_line, 4).await.expect("update");
        assert_eq!(store.item_count(), 5);
        assert_eq!(store.total().amount, Decimal::new(2050, 2));

        store.remove_from_cart(p1_line).await.expect("remove");
        assert_eq!(store.item_count(), 1);
        assert_eq!(store.total().amount, Decimal::new(1050, 2));
    }

    #[tokio::test]
    async fn test_update_quantity_zero_removes_line() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 900);
        backend.add_product(p1.clone());

        store.add_to_cart(p1.id, 2).await.expect("add");
        let line = store.items().first().map(|i| i.id).expect("line");

        store.update_quantity(line, 0).await.expect("update to 0");

        assert!(store.items().is_empty());
        assert!(backend.stored_cart_items(user.id).is_empty());
    }

    #[tokio::test]
    async fn test_clear_cart_empties_lines_and_product_mirror() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 100);
        let p2 = product("p2", 200);
        backend.add_product(p1.clone());
        backend.add_product(p2.clone());

        store.add_to_cart(p1.id, 1).await.expect("add p1");
        store.add_to_cart(p2.id, 1).await.expect("add p2");

        store.clear_cart().await.expect("clear");

        assert!(store.items().is_empty());
        assert!(store.snapshot().products.is_empty());
        assert_eq!(store.item_count(), 0);
        assert!(backend.stored_cart_items(user.id).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_mirrors_untouched() {
        let (store, backend, _user) = signed_in_store().await;
        let p1 = product("p1", 300);
        let p2 = product("p2", 400);
        backend.add_product(p1.clone());
        backend.add_product(p2.clone());
        store.add_to_cart(p1.id, 2).await.expect("add");
        let before = store.snapshot();

        backend.set_fail_writes(true);

        assert!(store.add_to_cart(p2.id, 1).await.is_err());
        assert!(store.add_to_cart(p1.id, 1).await.is_err());
        let line = before.items.first().map(|i| i.id).expect("line");
        assert!(store.update_quantity(line, 7).await.is_err());
        assert!(store.remove_from_cart(line).await.is_err());
        assert!(store.clear_cart().await.is_err());

        let after = store.snapshot();
        assert_eq!(after.items, before.items);
        assert_eq!(after.products.len(), before.products.len());
        assert_eq!(after.item_count(), before.item_count());
        assert_eq!(after.total_amount(), before.total_amount());
    }

    #[tokio::test]
    async fn test_fetch_cart_swallows_errors_and_keeps_state() {
        let (store, backend, _user) = signed_in_store().await;
        let p1 = product("p1", 600);
        backend.add_product(p1.clone());
        store.add_to_cart(p1.id, 2).await.expect("add");

        backend.set_fail_reads(true);
        store.fetch_cart().await;

        assert_eq!(store.item_count(), 2);
        assert!(!store.loading());
    }

    #[tokio::test]
    async fn test_fetch_cart_replaces_mirrors_wholesale() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 750);
        backend.add_product(p1.clone());

        // Row created on another device; the local mirror knows nothing
        backend
            .insert_cart_item(NewCartItem {
                user_id: user.id,
                product_id: p1.id,
                quantity: 3,
            })
            .await
            .expect("seed row");

        store.fetch_cart().await;

        assert_eq!(store.item_count(), 3);
        assert!(store.cached_product(p1.id).is_some());
        assert_eq!(store.total().amount, Decimal::new(2250, 2));
    }

    #[tokio::test]
    async fn test_sign_out_event_wipes_locally_without_remote_delete() {
        let (store, backend, user) = signed_in_store().await;
        let p1 = product("p1", 800);
        backend.add_product(p1.clone());
        store.add_to_cart(p1.id, 2).await.expect("add");
        let deletes_before = backend.delete_calls();

        store.apply_auth_event(&AuthEvent::signed_out()).await;

        assert!(store.items().is_empty());
        assert!(store.snapshot().products.is_empty());
        // No remote delete: the rows are still there for the next login
        assert_eq!(backend.delete_calls(), deletes_before);
        assert_eq!(backend.stored_cart_items(user.id).len(), 1);
    }

    #[tokio::test]
    async fn test_uncached_product_contributes_zero_to_total() {
        let snapshot = CartSnapshot {
            items: vec![CartItem {
                id: CartItemId::random(),
                user_id: bramble_core::UserId::random(),
                product_id: ProductId::random(),
                quantity: 4,
                created_at: chrono::Utc::now(),
            }],
            products: HashMap::new(),
            loading: false,
        };

        assert_eq!(snapshot.item_count(), 4);
        assert_eq!(snapshot.total_amount(), Decimal::ZERO);
    }
}
