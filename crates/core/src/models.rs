//! Row shapes served by the hosted backend.
//!
//! Each struct mirrors one collection; field names match the wire
//! payloads, so these derive `Serialize`/`Deserialize` directly.
//!
//! `Order`, `OrderItem`, `Invoice`, and `Address` describe the
//! checkout and billing stage. No storefront logic exercises them yet;
//! they are typed here so the shapes stay in one place.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    CartItemId, Email, InvoiceId, InvoiceStatus, OrderId, OrderItemId, OrderStatus, PaymentMethod,
    ProductId, UserId,
};

/// An authenticated user as reported by the hosted auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub created_at: DateTime<Utc>,
}

/// A catalog product. Read-only from the storefront's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Unit price in the catalog currency. Never negative.
    pub price: Decimal,
    pub features: Vec<String>,
    pub category: String,
    pub image_url: String,
}

/// One line in a user's cart: a product reference and a quantity.
///
/// Stored rows always have `quantity >= 1`; a quantity that would drop
/// below 1 means the row is deleted instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new cart line. The backend assigns `id` and
/// `created_at` and returns the full row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCartItem {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub created_at: DateTime<Utc>,
}

/// A shipping or billing address, embedded in orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// One line of a placed order, with the unit price frozen at purchase
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_time: Decimal,
}

/// An invoice for a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub email_sent: bool,
}
