//! Synchronization port definitions.
//!
//! Ports define the interfaces for external services (the accrual authority).
//! Adapters implement these ports for specific services (REST, stub).

use async_trait::async_trait;

use gophermart_connectors::{AccrualResponse, AccrualRestClient};
use gophermart_domain::OrderNumber;

use crate::error::SyncError;

// =============================================================================
// Accrual Port
// =============================================================================

/// Port for querying the accrual authority.
///
/// Implementations:
/// - `AccrualRestClient` - Real authority over HTTP
/// - `StubAccrual` - For testing and running without an authority
#[async_trait]
pub trait AccrualPort: Send + Sync {
    /// Query the authority for one order.
    ///
    /// # Errors
    /// - `SyncError::Transport` if the authority could not be reached
    /// - `SyncError::Payload` if it answered 200 with an unparsable body
    async fn fetch_order(&self, number: &OrderNumber) -> Result<AccrualResponse, SyncError>;
}

#[async_trait]
impl AccrualPort for AccrualRestClient {
    async fn fetch_order(&self, number: &OrderNumber) -> Result<AccrualResponse, SyncError> {
        Ok(AccrualRestClient::fetch_order(self, number).await?)
    }
}
