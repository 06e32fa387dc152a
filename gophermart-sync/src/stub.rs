//! Stub accrual authority for testing.
//!
//! Replies come from per-order scripts; an order with no script left gets
//! the fallback reply. `approve_all` is also what the daemon runs against
//! when no accrual address is configured.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use gophermart_connectors::{AccrualReport, AccrualResponse, AccrualStatus};
use gophermart_domain::OrderNumber;

use crate::error::SyncError;
use crate::ports::AccrualPort;

// =============================================================================
// Stub Reply
// =============================================================================

/// One scripted answer from the stub authority.
#[derive(Debug, Clone, PartialEq)]
pub enum StubReply {
    /// 200 with a report for the queried order
    Report {
        /// Reported status
        status: AccrualStatus,
        /// Reported accrual
        accrual: Option<Decimal>,
    },
    /// Returned exactly as given
    Raw(AccrualResponse),
    /// The authority cannot be reached
    TransportFailure,
    /// 200 with a body that does not parse
    MalformedPayload,
}

impl StubReply {
    /// PROCESSED with the given accrual
    pub fn processed(accrual: Decimal) -> Self {
        StubReply::Report {
            status: AccrualStatus::Processed,
            accrual: Some(accrual),
        }
    }

    /// Report with no accrual
    pub fn status(status: AccrualStatus) -> Self {
        StubReply::Report { status, accrual: None }
    }

    /// 429, optionally with a Retry-After hint
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        StubReply::Raw(AccrualResponse::RateLimited { retry_after })
    }

    /// 204
    pub fn not_registered() -> Self {
        StubReply::Raw(AccrualResponse::NotRegistered)
    }

    fn into_result(self, number: &OrderNumber) -> Result<AccrualResponse, SyncError> {
        match self {
            StubReply::Report { status, accrual } => Ok(AccrualResponse::Report(AccrualReport {
                order: number.as_str().to_string(),
                status,
                accrual,
            })),
            StubReply::Raw(response) => Ok(response),
            StubReply::TransportFailure => {
                Err(SyncError::Transport(format!("stub: {} unreachable", number)))
            },
            StubReply::MalformedPayload => {
                Err(SyncError::Payload(format!("stub: malformed body for {}", number)))
            },
        }
    }
}

// =============================================================================
// Stub Accrual
// =============================================================================

/// Stub accrual authority.
pub struct StubAccrual {
    /// Pending replies by order number
    scripts: RwLock<HashMap<String, VecDeque<StubReply>>>,
    /// Reply once an order's script is exhausted
    fallback: StubReply,
    /// Every queried order number, in call order
    calls: RwLock<Vec<String>>,
}

impl StubAccrual {
    /// Stub answering 204 for anything not scripted.
    pub fn new() -> Self {
        Self::with_fallback(StubReply::not_registered())
    }

    /// Stub approving every order with a fixed accrual.
    pub fn approve_all(accrual: Decimal) -> Self {
        Self::with_fallback(StubReply::processed(accrual))
    }

    /// Stub with a custom fallback reply.
    pub fn with_fallback(fallback: StubReply) -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            fallback,
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Queue replies for one order, consumed in order.
    pub fn script(&self, number: &str, replies: impl IntoIterator<Item = StubReply>) {
        let mut scripts = self.scripts.write().unwrap_or_else(PoisonError::into_inner);
        scripts.entry(number.to_string()).or_default().extend(replies);
    }

    /// Order numbers queried so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of queries made so far.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for StubAccrual {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccrualPort for StubAccrual {
    async fn fetch_order(&self, number: &OrderNumber) -> Result<AccrualResponse, SyncError> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(number.as_str().to_string());

        let scripted = self
            .scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(number.as_str())
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| self.fallback.clone()).into_result(number)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn number() -> OrderNumber {
        OrderNumber::parse_luhn("79927398713").unwrap()
    }

    #[tokio::test]
    async fn test_approve_all() {
        let stub = StubAccrual::approve_all(dec!(100));

        let response = stub.fetch_order(&number()).await.unwrap();

        assert_eq!(
            response,
            AccrualResponse::Report(AccrualReport {
                order: "79927398713".to_string(),
                status: AccrualStatus::Processed,
                accrual: Some(dec!(100)),
            })
        );
        assert_eq!(stub.calls(), vec!["79927398713".to_string()]);
    }

    #[tokio::test]
    async fn test_script_is_consumed_then_falls_back() {
        let stub = StubAccrual::new();
        stub.script(
            "79927398713",
            [StubReply::rate_limited(None), StubReply::TransportFailure],
        );

        assert_eq!(
            stub.fetch_order(&number()).await.unwrap(),
            AccrualResponse::RateLimited { retry_after: None }
        );
        assert!(stub.fetch_order(&number()).await.unwrap_err().is_transport());
        assert_eq!(stub.fetch_order(&number()).await.unwrap(), AccrualResponse::NotRegistered);
        assert_eq!(stub.call_count(), 3);
    }
}
