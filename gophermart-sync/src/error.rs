//! Synchronization error types.

use gophermart_connectors::AccrualRestError;
use thiserror::Error;

/// Errors that can occur during a reconciliation cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The accrual authority could not be reached
    #[error("Accrual transport error: {0}")]
    Transport(String),

    /// The accrual authority answered with something unusable
    #[error("Accrual payload error: {0}")]
    Payload(String),

    /// The authority kept rate limiting one order past the retry bound
    #[error("Rate limit not lifted for order {order} after {attempts} attempts")]
    RateLimitExhausted {
        /// Order being queried
        order: String,
        /// Rate-limited responses received
        attempts: u32,
    },

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] gophermart_store::StoreError),
}

impl SyncError {
    /// Failure to reach the authority at all
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl From<AccrualRestError> for SyncError {
    fn from(err: AccrualRestError) -> Self {
        match err {
            AccrualRestError::ParseError(msg) => SyncError::Payload(msg),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
