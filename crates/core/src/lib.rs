//! Bramble Core - Shared types library.
//!
//! This crate provides the domain types used across the Bramble
//! storefront components:
//! - `storefront` - Client-side session, cart, and navigation state
//! - `integration-tests` - Cross-store scenario tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no
//! channels. Every row shape here mirrors a collection served by the
//! hosted backend; the storefront crate owns all the logic that reads
//! and writes them.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, prices, and status enums
//! - [`models`] - Row shapes: products, cart items, orders, invoices

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod models;
pub mod types;

pub use models::*;
pub use types::*;
