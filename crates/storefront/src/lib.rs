//! Bramble Storefront - client-side shop state.
//!
//! This crate holds the state a storefront UI reads and mutates:
//! the current identity, the shopping cart, and the navigation gate.
//! Persistence and credential checks are delegated to a hosted
//! backend; every mutation here is a remote call followed by a local
//! mirror update, never the other way around.
//!
//! # Architecture
//!
//! - [`backend`] - The hosted-service seam: one trait covering auth,
//!   cart rows, and product reads, with a REST implementation and an
//!   in-memory test double
//! - [`session`] - Current identity, sign-in/up/out, auth-event sync
//! - [`cart`] - Cart lines and the product mirror, with derived
//!   item count and total
//! - [`guard`] - Navigation decisions from route metadata and the
//!   last-known identity
//! - [`state`] - The [`Storefront`](state::Storefront) context object
//!   that wires the stores to one backend
//!
//! # Example
//!
//! ```rust,ignore
//! use bramble_storefront::{Storefront, StorefrontConfig};
//!
//! let config = StorefrontConfig::from_env()?;
//! let shop = Storefront::connect(&config).await?;
//!
//! shop.session().sign_in("user@example.com", "hunter2!").await?;
//! shop.cart().add_to_cart(product_id, 2).await?;
//! assert_eq!(shop.cart().item_count(), 2);
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod cart;
pub mod config;
pub mod error;
pub mod guard;
pub mod session;
pub mod state;

pub use backend::{AuthEvent, AuthEventKind, Backend, BackendError, Session};
pub use cart::{CartSnapshot, CartStore};
pub use config::{ConfigError, StorefrontConfig};
pub use error::{Result, StoreError};
pub use guard::{NavDecision, NavigationGuard, ROUTES, Route, route_names};
pub use session::{SessionSnapshot, SessionStore};
pub use state::Storefront;
