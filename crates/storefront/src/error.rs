//! Store-level error type.
//!
//! Backend fetches that run in the background swallow their errors at
//! the call site (logged, state untouched); user-initiated operations
//! return this type to the caller.

use thiserror::Error;

use bramble_core::EmailError;

use crate::backend::BackendError;

/// Errors returned by session and cart operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The hosted backend rejected or failed the remote call.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The operation requires a signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The supplied email address is malformed.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),
}

/// Result type alias for [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
