//! Accrual Authority REST Client
//!
//! Queries the external point-calculation service for the state of one order:
//!
//! ```text
//! GET {base}/api/orders/{number}
//!   200 {"order": "...", "status": "REGISTERED|PROCESSING|INVALID|PROCESSED", "accrual": 500}
//!   204 order not registered with the authority
//!   429 rate limited, optional Retry-After (seconds)
//! ```
//!
//! The client only classifies responses. Deciding what a response means for
//! the ledger (skip, retry, finalize) is the reconciler's job.

use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use gophermart_domain::OrderNumber;

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the accrual REST client.
#[derive(Debug, Clone, Error)]
pub enum AccrualRestError {
    /// HTTP request failed (connection refused, reset, DNS, ...)
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Failed to parse a 200 response body
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl AccrualRestError {
    /// Transport-level failure (the authority never answered)
    pub fn is_transport(&self) -> bool {
        matches!(self, AccrualRestError::RequestFailed(_) | AccrualRestError::Timeout)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Order status as reported by the accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// Known to the authority, calculation not started
    Registered,
    /// Calculation in progress
    Processing,
    /// Rejected, no points will be awarded
    Invalid,
    /// Calculation finished
    Processed,
    /// Any label this client does not know
    #[serde(other)]
    Unknown,
}

impl AccrualStatus {
    /// PROCESSED and INVALID are final answers
    pub fn is_final(&self) -> bool {
        matches!(self, AccrualStatus::Processed | AccrualStatus::Invalid)
    }
}

/// Body of a 200 response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualReport {
    /// Order number echoed back by the authority
    pub order: String,
    /// Calculation status
    pub status: AccrualStatus,
    /// Awarded points, present only for PROCESSED
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

/// Classified response from the accrual authority.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualResponse {
    /// 200 with a parsed body
    Report(AccrualReport),
    /// 429; `retry_after` carries the server's hint when present and parsable
    RateLimited {
        /// Server-suggested wait
        retry_after: Option<Duration>,
    },
    /// 204: the authority has never heard of this order
    NotRegistered,
    /// Any other status code
    Unexpected(u16),
}

// =============================================================================
// Accrual REST Client
// =============================================================================

/// REST client for the accrual authority.
#[derive(Debug, Clone)]
pub struct AccrualRestClient {
    /// HTTP client
    client: Client,
    /// Base URL without trailing slash
    base_url: String,
    /// Per-request timeout
    timeout: Duration,
}

impl AccrualRestClient {
    /// Create a client for the authority at `base_url`.
    ///
    /// A missing scheme defaults to `http://`.
    ///
    /// # Errors
    /// Returns `AccrualRestError::InvalidParameter` if the address is blank
    pub fn new(base_url: impl Into<String>) -> Result<Self, AccrualRestError> {
        let raw = base_url.into();
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(AccrualRestError::InvalidParameter(
                "accrual system address is empty".to_string(),
            ));
        }

        let base_url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        Ok(Self {
            client: Client::new(),
            base_url,
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the authority for one order.
    ///
    /// # Errors
    /// - `AccrualRestError::Timeout` if no response arrived in time
    /// - `AccrualRestError::RequestFailed` on transport failure
    /// - `AccrualRestError::ParseError` if a 200 body is not a valid report
    pub async fn fetch_order(
        &self,
        number: &OrderNumber,
    ) -> Result<AccrualResponse, AccrualRestError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);

        let response = timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| AccrualRestError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    AccrualRestError::Timeout
                } else {
                    AccrualRestError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(order = %number, status = status.as_u16(), "Accrual response");

        match status {
            StatusCode::OK => {
                let body = timeout(self.timeout, response.text())
                    .await
                    .map_err(|_| AccrualRestError::Timeout)?
                    .map_err(|e| AccrualRestError::RequestFailed(e.to_string()))?;
                let report = serde_json::from_str::<AccrualReport>(&body)
                    .map_err(|e| AccrualRestError::ParseError(format!("{}: {}", e, body)))?;
                Ok(AccrualResponse::Report(report))
            },
            StatusCode::NO_CONTENT => Ok(AccrualResponse::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                Ok(AccrualResponse::RateLimited { retry_after })
            },
            other => Ok(AccrualResponse::Unexpected(other.as_u16())),
        }
    }
}

/// Parse a Retry-After value given in whole seconds.
///
/// HTTP-date values are not supported and yield `None`.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse_luhn(raw).unwrap()
    }

    #[test]
    fn test_new_normalizes_base_url() {
        let client = AccrualRestClient::new("localhost:8081/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8081");

        let client = AccrualRestClient::new("https://accrual.example.com").unwrap();
        assert_eq!(client.base_url(), "https://accrual.example.com");

        assert!(matches!(
            AccrualRestClient::new("  "),
            Err(AccrualRestError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_report_deserialization() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":729.98}"#)
                .unwrap();
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.accrual, Some(dec!(729.98)));

        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        assert_eq!(report.status, AccrualStatus::Registered);
        assert_eq!(report.accrual, None);

        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"79927398713","status":"QUEUED"}"#).unwrap();
        assert_eq!(report.status, AccrualStatus::Unknown);
        assert!(!report.status.is_final());
    }

    #[tokio::test]
    async fn test_fetch_order_processed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(200).json_body(json!({
                    "order": "79927398713",
                    "status": "PROCESSED",
                    "accrual": 100
                }));
            })
            .await;

        let client = AccrualRestClient::new(server.base_url()).unwrap();
        let response = client.fetch_order(&number("79927398713")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            response,
            AccrualResponse::Report(AccrualReport {
                order: "79927398713".to_string(),
                status: AccrualStatus::Processed,
                accrual: Some(dec!(100)),
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_order_not_registered() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(204);
            })
            .await;

        let client = AccrualRestClient::new(server.base_url()).unwrap();
        let response = client.fetch_order(&number("79927398713")).await.unwrap();

        assert_eq!(response, AccrualResponse::NotRegistered);
    }

    #[tokio::test]
    async fn test_fetch_order_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(429).header("Retry-After", "7").body("No more than N requests per minute allowed");
            })
            .await;

        let client = AccrualRestClient::new(server.base_url()).unwrap();
        let response = client.fetch_order(&number("79927398713")).await.unwrap();

        assert_eq!(
            response,
            AccrualResponse::RateLimited { retry_after: Some(Duration::from_secs(7)) }
        );
    }

    #[tokio::test]
    async fn test_fetch_order_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(500);
            })
            .await;

        let client = AccrualRestClient::new(server.base_url()).unwrap();
        let response = client.fetch_order(&number("79927398713")).await.unwrap();

        assert_eq!(response, AccrualResponse::Unexpected(500));
    }

    #[tokio::test]
    async fn test_fetch_order_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(200).body("{not json");
            })
            .await;

        let client = AccrualRestClient::new(server.base_url()).unwrap();
        let err = client.fetch_order(&number("79927398713")).await.unwrap_err();

        assert!(matches!(err, AccrualRestError::ParseError(_)));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_fetch_order_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/orders/79927398713");
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;

        let client = AccrualRestClient::new(server.base_url())
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let err = client.fetch_order(&number("79927398713")).await.unwrap_err();

        assert!(matches!(err, AccrualRestError::Timeout));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_fetch_order_connection_refused() {
        // Nothing listens on port 1
        let client = AccrualRestClient::new("http://127.0.0.1:1").unwrap();
        let err = client.fetch_order(&number("79927398713")).await.unwrap_err();

        assert!(err.is_transport());
    }
}
