//! Cross-store integration tests for Bramble.
//!
//! Everything runs in-process against [`MemoryBackend`], so the tests
//! exercise the real wiring between the session store, the cart store,
//! and the navigation guard: auth events flow over the same broadcast
//! channel the hosted backend would use.
//!
//! Run with: `cargo test -p bramble-integration-tests`

use std::sync::Arc;

use rust_decimal::Decimal;

use bramble_core::{CurrencyCode, Email, Product, ProductId, User};
use bramble_storefront::backend::MemoryBackend;
use bramble_storefront::{Storefront, StoreError};

/// A storefront wired to an in-memory backend, with the auth-event
/// listeners running.
pub struct TestShop {
    pub backend: MemoryBackend,
    pub app: Storefront,
}

impl TestShop {
    pub async fn new() -> Self {
        init_tracing();
        let backend = MemoryBackend::new();
        let app = Storefront::with_backend(Arc::new(backend.clone()), CurrencyCode::USD).await;
        Self { backend, app }
    }

    /// Add a product to the backend catalog.
    pub fn seed_product(&self, name: &str, cents: i64) -> Product {
        let product = Product {
            id: ProductId::random(),
            name: name.to_owned(),
            description: format!("{name} description"),
            price: Decimal::new(cents, 2),
            features: vec![],
            category: "test".to_owned(),
            image_url: format!("https://cdn.example.com/{name}.jpg"),
        };
        self.backend.add_product(product.clone());
        product
    }

    /// Register an account and sign in through the session store.
    ///
    /// # Errors
    ///
    /// Propagates the sign-in failure.
    pub async fn register_and_sign_in(&self, address: &str) -> Result<User, StoreError> {
        let email = Email::parse(address).expect("test email must be valid");
        let user = self.backend.register_account(&email, "pw123456");
        self.app.session().sign_in(address, "pw123456").await?;
        Ok(user)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
