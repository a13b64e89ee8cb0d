//! REST implementation of the hosted-backend seam.
//!
//! Speaks the hosted service's conventions: auth endpoints under
//! `auth/v1/`, row endpoints under `rest/v1/` with equality and
//! membership filters in the query string. Product reads are cached
//! with `moka` (TTL from config); cart rows are never cached.

use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};

use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use url::Url;

use bramble_core::{CartItem, CartItemId, Email, NewCartItem, Product, ProductId, User, UserId};

use crate::config::StorefrontConfig;

use super::{AuthEvent, Backend, BackendError, Session};

/// Capacity of the auth-event channel. Subscribers that fall this far
/// behind see a `Lagged` error and resynchronize on the next event.
const AUTH_EVENT_CAPACITY: usize = 16;

/// How much of an error response body to keep in messages.
const ERROR_BODY_LIMIT: usize = 200;

// =============================================================================
// Wire payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: UserId,
    email: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl UserPayload {
    fn into_user(self) -> Result<User, BackendError> {
        let email = Email::parse(&self.email)
            .map_err(|e| BackendError::Payload(format!("user email: {e}")))?;
        Ok(User {
            id: self.id,
            email,
            created_at: self.created_at,
        })
    }
}

/// Error body shape used by the auth endpoints.
#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(alias = "msg", alias = "message")]
    error_description: Option<String>,
}

// =============================================================================
// RestBackend
// =============================================================================

/// REST client for the hosted backend.
///
/// Cheaply cloneable; all clones share the HTTP client, the access
/// token, the product cache, and the auth-event channel.
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestInner>,
}

struct RestInner {
    http: reqwest::Client,
    auth_base: Url,
    rest_base: Url,
    api_key: SecretString,
    access_token: RwLock<Option<SecretString>>,
    products: Cache<ProductId, Product>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    /// Create a new REST backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed or
    /// the service URL does not accept path joins.
    pub fn new(config: &StorefrontConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let auth_base = join_base(&config.service_url, "auth/v1/")?;
        let rest_base = join_base(&config.service_url, "rest/v1/")?;

        let products = Cache::builder()
            .max_capacity(config.product_cache_capacity)
            .time_to_live(config.product_cache_ttl)
            .build();

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(RestInner {
                http,
                auth_base,
                rest_base,
                api_key: config.service_key.clone(),
                access_token: RwLock::new(None),
                products,
                events,
            }),
        })
    }

    /// The bearer value for the next request: the session token when
    /// signed in, the publishable key otherwise.
    fn bearer(&self) -> String {
        let token = self
            .inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        token.as_ref().map_or_else(
            || self.inner.api_key.expose_secret().to_owned(),
            |t| t.expose_secret().to_owned(),
        )
    }

    fn set_token(&self, token: Option<SecretString>) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn has_token(&self) -> bool {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn emit(&self, event: AuthEvent) {
        // send only fails when no store is subscribed yet
        let _ = self.inner.events.send(event);
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.inner
            .http
            .request(method, url)
            .header("apikey", self.inner.api_key.expose_secret())
            .bearer_auth(self.bearer())
    }

    fn auth_endpoint(&self, path: &str) -> Result<Url, BackendError> {
        join_base(&self.inner.auth_base, path)
    }

    fn rest_endpoint(&self, collection: &str) -> Result<Url, BackendError> {
        join_base(&self.inner.rest_base, collection)
    }
}

// =============================================================================
// Response handling
// =============================================================================

/// Surface non-success responses as typed errors.
///
/// Auth endpoints return a JSON body with a human-readable
/// description; row endpoints return plain text or JSON we keep
/// truncated.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<AuthErrorBody>(&body)
        .ok()
        .and_then(|b| b.error_description)
        .unwrap_or_else(|| body.chars().take(ERROR_BODY_LIMIT).collect());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(BackendError::Auth(message));
    }

    Err(BackendError::Service {
        status: status.as_u16(),
        message,
    })
}

fn join_base(base: &Url, path: &str) -> Result<Url, BackendError> {
    base.join(path)
        .map_err(|e| BackendError::Payload(format!("endpoint {path}: {e}")))
}

/// `eq.` filter value for a query-string predicate.
fn eq_filter(value: &impl Display) -> String {
    format!("eq.{value}")
}

/// `in.(...)` filter value for a membership predicate.
fn in_filter(ids: &[ProductId]) -> String {
    let joined = ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

// =============================================================================
// Backend impl
// =============================================================================

#[async_trait::async_trait]
impl Backend for RestBackend {
    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<Option<User>, BackendError> {
        if !self.has_token() {
            return Ok(None);
        }

        let url = self.auth_endpoint("user")?;
        let response = self.request(reqwest::Method::GET, url).send().await?;

        // An expired or revoked token means "no session", not an error
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!("access token rejected, treating session as absent");
            self.set_token(None);
            return Ok(None);
        }

        let payload: UserPayload = check(response).await?.json().await?;
        payload.into_user().map(Some)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<Session, BackendError> {
        let mut url = self.auth_endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({
                "email": email.as_str(),
                "password": password,
            }))
            .send()
            .await?;

        let token: TokenResponse = check(response).await?.json().await?;
        let session = Session {
            user: token.user.into_user()?,
            access_token: SecretString::from(token.access_token),
        };

        self.set_token(Some(session.access_token.clone()));
        self.emit(AuthEvent::signed_in(session.clone()));

        Ok(session)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_up(&self, email: &Email, password: &str) -> Result<(), BackendError> {
        let url = self.auth_endpoint("signup")?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({
                "email": email.as_str(),
                "password": password,
            }))
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        if !self.has_token() {
            return Err(BackendError::Auth("no active session".to_owned()));
        }

        let url = self.auth_endpoint("logout")?;
        let response = self.request(reqwest::Method::POST, url).send().await?;
        check(response).await?;

        self.set_token(None);
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn cart_items_for_user(&self, user_id: UserId) -> Result<Vec<CartItem>, BackendError> {
        let mut url = self.rest_endpoint("cart_items")?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &eq_filter(&user_id))
            .append_pair("order", "created_at.asc");

        let response = self.request(reqwest::Method::GET, url).send().await?;
        let items = check(response).await?.json().await?;
        Ok(items)
    }

    #[instrument(skip(self, item), fields(product_id = %item.product_id))]
    async fn insert_cart_item(&self, item: NewCartItem) -> Result<CartItem, BackendError> {
        let url = self.rest_endpoint("cart_items")?;
        let response = self
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&item)
            .send()
            .await?;

        let mut rows: Vec<CartItem> = check(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| BackendError::Payload("insert returned no representation".to_owned()))
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn update_cart_item_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        let mut url = self.rest_endpoint("cart_items")?;
        url.query_pairs_mut().append_pair("id", &eq_filter(&id));

        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(&serde_json::json!({ "quantity": quantity }))
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), BackendError> {
        let mut url = self.rest_endpoint("cart_items")?;
        url.query_pairs_mut().append_pair("id", &eq_filter(&id));

        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn delete_cart_items_for_user(&self, user_id: UserId) -> Result<(), BackendError> {
        let mut url = self.rest_endpoint("cart_items")?;
        url.query_pairs_mut()
            .append_pair("user_id", &eq_filter(&user_id));

        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn product(&self, id: ProductId) -> Result<Product, BackendError> {
        if let Some(product) = self.inner.products.get(&id).await {
            debug!("cache hit for product");
            return Ok(product);
        }

        let mut url = self.rest_endpoint("products")?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("id", &eq_filter(&id));

        let response = self.request(reqwest::Method::GET, url).send().await?;
        let mut rows: Vec<Product> = check(response).await?.json().await?;
        let product = rows
            .pop()
            .ok_or_else(|| BackendError::NotFound(format!("product {id}")))?;

        self.inner.products.insert(id, product.clone()).await;
        Ok(product)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.rest_endpoint("products")?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("id", &in_filter(ids));

        let response = self.request(reqwest::Method::GET, url).send().await?;
        let rows: Vec<Product> = check(response).await?.json().await?;

        for product in &rows {
            self.inner.products.insert(product.id, product.clone()).await;
        }

        Ok(rows)
    }
}
