//! Daemon error types.

use gophermart_domain::DomainError;
use gophermart_store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Daemon-level errors.
///
/// `api::to_error_response` is the only place these become HTTP status codes.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Validation error (empty field, bad order number, bad amount)
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Login already registered
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Unknown login or wrong password
    #[error("Invalid login or password")]
    InvalidCredentials,

    /// Missing or stale session token
    #[error("Unauthorized")]
    Unauthorized,

    /// Order number already submitted by another user
    #[error("Order {0} was uploaded by another user")]
    OrderOwnedByAnother(String),

    /// Order number already used for a withdrawal
    #[error("Withdrawal already recorded for order {0}")]
    WithdrawalExists(String),

    /// Withdrawal larger than the current balance
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested sum
        requested: Decimal,
        /// Current balance
        available: Decimal,
    },

    /// Nothing to list
    #[error("No data")]
    NoData,

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
