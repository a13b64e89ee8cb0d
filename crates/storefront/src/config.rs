//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BRAMBLE_SERVICE_URL` - Base URL of the hosted backend
//! - `BRAMBLE_SERVICE_KEY` - Publishable API key for the hosted backend
//!
//! ## Optional
//! - `BRAMBLE_CURRENCY` - Catalog currency code (default: USD)
//! - `BRAMBLE_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 10)
//! - `BRAMBLE_PRODUCT_CACHE_TTL_SECS` - Product cache TTL (default: 300)
//! - `BRAMBLE_PRODUCT_CACHE_CAPACITY` - Product cache entries (default: 1000)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use bramble_core::CurrencyCode;

const MIN_SERVICE_KEY_LENGTH: usize = 20;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PRODUCT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_PRODUCT_CACHE_CAPACITY: u64 = 1000;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
///
/// Implements `Debug` manually to redact the service key.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Base URL of the hosted backend (auth and row endpoints hang
    /// off this).
    pub service_url: Url,
    /// Publishable API key sent with every request.
    pub service_key: SecretString,
    /// Catalog currency used for derived cart totals.
    pub currency: CurrencyCode,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// TTL for the backend-side product cache.
    pub product_cache_ttl: Duration,
    /// Maximum entries in the backend-side product cache.
    pub product_cache_capacity: u64,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("service_url", &self.service_url.as_str())
            .field("service_key", &"[REDACTED]")
            .field("currency", &self.currency)
            .field("request_timeout", &self.request_timeout)
            .field("product_cache_ttl", &self.product_cache_ttl)
            .field("product_cache_capacity", &self.product_cache_capacity)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Loads a `.env` file first if one is present.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value
    /// fails to parse, or the service key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignore a missing .env file; real deployments set vars directly
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// `from_env` passes `std::env::var`; tests pass a map.
    ///
    /// # Errors
    ///
    /// Same conditions as [`StorefrontConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service_url = required(&lookup, "BRAMBLE_SERVICE_URL")?;
        let service_url = Url::parse(&service_url).map_err(|e| {
            ConfigError::InvalidEnvVar("BRAMBLE_SERVICE_URL".to_owned(), e.to_string())
        })?;
        if !matches!(service_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                "BRAMBLE_SERVICE_URL".to_owned(),
                format!("unsupported scheme: {}", service_url.scheme()),
            ));
        }

        let service_key = required(&lookup, "BRAMBLE_SERVICE_KEY")?;
        validate_service_key("BRAMBLE_SERVICE_KEY", &service_key)?;

        let currency = match lookup("BRAMBLE_CURRENCY") {
            None => CurrencyCode::default(),
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.clone())).map_err(
                |_| ConfigError::InvalidEnvVar("BRAMBLE_CURRENCY".to_owned(), raw),
            )?,
        };

        let request_timeout = Duration::from_secs(optional_u64(
            &lookup,
            "BRAMBLE_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let product_cache_ttl = Duration::from_secs(optional_u64(
            &lookup,
            "BRAMBLE_PRODUCT_CACHE_TTL_SECS",
            DEFAULT_PRODUCT_CACHE_TTL_SECS,
        )?);
        let product_cache_capacity = optional_u64(
            &lookup,
            "BRAMBLE_PRODUCT_CACHE_CAPACITY",
            DEFAULT_PRODUCT_CACHE_CAPACITY,
        )?;

        Ok(Self {
            service_url,
            service_key: SecretString::from(service_key),
            currency,
            request_timeout,
            product_cache_ttl,
            product_cache_capacity,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_owned()))
}

fn optional_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar(name.to_owned(), raw)),
    }
}

/// Reject obviously unusable service keys before the first request.
fn validate_service_key(name: &str, key: &str) -> Result<(), ConfigError> {
    if key.len() < MIN_SERVICE_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            name.to_owned(),
            format!("must be at least {MIN_SERVICE_KEY_LENGTH} characters"),
        ));
    }

    let lowered = key.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lowered.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                name.to_owned(),
                format!("looks like a placeholder (contains \"{pattern}\")"),
            ));
        }
    }

    Ok(())
}
