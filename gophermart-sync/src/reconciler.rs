//! Accrual Reconciler
//!
//! One reconciliation cycle:
//!
//! 1. Load every NEW/PROCESSING order, oldest first
//! 2. Give each a provisional PROCESSING/0 update
//! 3. Query the authority order by order, replacing the provisional update
//!    with the authority's answer when it is final
//! 4. Write every update of a queried order in one batch
//!
//! Only PROCESSED and INVALID answers are copied; anything else leaves the
//! order provisional until a later cycle. Final orders are never revisited.

use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gophermart_connectors::{AccrualReport, AccrualResponse, AccrualStatus};
use gophermart_domain::{Order, OrderStatus, Points, StatusUpdate};
use gophermart_store::Store;

use crate::error::{SyncError, SyncResult};
use crate::ports::AccrualPort;
use crate::retry::RateLimitPolicy;

// =============================================================================
// Configuration
// =============================================================================

/// What a cycle does when the authority cannot be reached for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportFailurePolicy {
    /// Keep the provisional update and move on to the next order
    #[default]
    Skip,
    /// Fail the whole cycle without writing anything
    Abort,
}

impl FromStr for TransportFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(TransportFailurePolicy::Skip),
            "abort" => Ok(TransportFailurePolicy::Abort),
            other => Err(format!("unknown transport failure policy: {}", other)),
        }
    }
}

/// Reconciler tuning.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Backoff for 429 responses
    pub rate_limit: RateLimitPolicy,
    /// Handling of unreachable authority
    pub transport_failure: TransportFailurePolicy,
}

// =============================================================================
// Cycle Report
// =============================================================================

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unsettled orders found at cycle start
    pub examined: usize,
    /// Orders the authority gave a final answer for
    pub finalized: usize,
    /// Orders skipped after an unusable answer or transport failure
    pub skipped: usize,
    /// Waits caused by 429 responses
    pub rate_limited_retries: u32,
    /// Rows written by the batch update
    pub applied: usize,
    /// Rows the batch update failed to write
    pub write_failures: usize,
    /// Cycle stopped early on cancellation
    pub cancelled: bool,
}

/// Outcome of querying the authority for one order.
enum Answer {
    /// Final status to record
    Final(StatusUpdate),
    /// No final answer yet
    Pending,
    /// Unusable answer; keep the provisional update
    Skip(String),
    /// Cancelled while waiting out a rate limit
    Cancelled,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciles unsettled orders with the accrual authority.
pub struct Reconciler<A: AccrualPort + 'static, S: Store + 'static> {
    accrual: Arc<A>,
    store: Arc<S>,
    config: ReconcilerConfig,
}

impl<A: AccrualPort + 'static, S: Store + 'static> Reconciler<A, S> {
    /// Create a new reconciler.
    pub fn new(accrual: Arc<A>, store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self { accrual, store, config }
    }

    /// Run one reconciliation cycle.
    ///
    /// Cancellation is checked before each order and while waiting out a
    /// rate limit; updates for orders already queried are still written.
    ///
    /// # Errors
    /// - `SyncError::Store` if unsettled orders cannot be loaded or the batch fails
    /// - `SyncError::Transport` under `TransportFailurePolicy::Abort`
    /// - `SyncError::RateLimitExhausted` if one order stays rate limited past the bound
    ///
    /// On error nothing is written.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> SyncResult<CycleReport> {
        let mut report = CycleReport::default();

        let orders = self.store.orders().find_unsettled().await?;
        report.examined = orders.len();
        if orders.is_empty() {
            debug!("No unsettled orders");
            return Ok(report);
        }

        let mut pending = Vec::with_capacity(orders.len());

        for order in &orders {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut update = StatusUpdate::provisional(order.number.clone());

            match self.query(order, cancel, &mut report).await? {
                Answer::Final(final_update) => {
                    report.finalized += 1;
                    update = final_update;
                },
                Answer::Pending => {},
                Answer::Skip(reason) => {
                    warn!(order = %order.number, reason = %reason, "Order skipped this cycle");
                    report.skipped += 1;
                },
                Answer::Cancelled => {
                    report.cancelled = true;
                    break;
                },
            }

            pending.push(update);
        }

        if !pending.is_empty() {
            let outcome = self.store.orders().apply_updates(&pending).await?;
            report.applied = outcome.applied;
            report.write_failures = outcome.failed;
            if outcome.skipped > 0 {
                debug!(unchanged = outcome.skipped, "Rows left untouched by batch update");
            }
        }

        if report.finalized > 0 || report.skipped > 0 || report.cancelled {
            info!(
                examined = report.examined,
                finalized = report.finalized,
                skipped = report.skipped,
                retries = report.rate_limited_retries,
                applied = report.applied,
                write_failures = report.write_failures,
                cancelled = report.cancelled,
                "Reconciliation cycle complete"
            );
        } else {
            debug!(examined = report.examined, applied = report.applied, "Reconciliation cycle complete");
        }

        Ok(report)
    }

    /// Query one order, waiting out rate limits.
    async fn query(
        &self,
        order: &Order,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> SyncResult<Answer> {
        let policy = &self.config.rate_limit;
        let mut attempt = 0u32;

        loop {
            let response = match self.accrual.fetch_order(&order.number).await {
                Ok(response) => response,
                Err(e) if e.is_transport() => {
                    return match self.config.transport_failure {
                        TransportFailurePolicy::Skip => Ok(Answer::Skip(e.to_string())),
                        TransportFailurePolicy::Abort => Err(e),
                    };
                },
                Err(SyncError::Payload(msg)) => return Ok(Answer::Skip(msg)),
                Err(e) => return Err(e),
            };

            match response {
                AccrualResponse::Report(body) => return Ok(classify(order, body)),
                AccrualResponse::NotRegistered => {
                    return Ok(Answer::Skip("not registered with accrual authority".to_string()));
                },
                AccrualResponse::Unexpected(code) => {
                    return Ok(Answer::Skip(format!("unexpected status {}", code)));
                },
                AccrualResponse::RateLimited { retry_after } => {
                    if !policy.allows(attempt) {
                        return Err(SyncError::RateLimitExhausted {
                            order: order.number.to_string(),
                            attempts: attempt,
                        });
                    }

                    let delay = policy.delay_for(attempt, retry_after);
                    warn!(
                        order = %order.number,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Accrual authority rate limited, backing off"
                    );
                    attempt += 1;
                    report.rate_limited_retries += 1;

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Answer::Cancelled),
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }
}

/// Turn a 200 report into an answer for `order`.
fn classify(order: &Order, report: AccrualReport) -> Answer {
    if report.order != order.number.as_str() {
        return Answer::Skip(format!("report names order {}", report.order));
    }

    match report.status {
        AccrualStatus::Processed => {
            let raw = report.accrual.unwrap_or_default();
            match Points::new(raw) {
                Ok(points) => Answer::Final(StatusUpdate::finalized(
                    order.number.clone(),
                    OrderStatus::Processed,
                    points,
                )),
                Err(e) => Answer::Skip(e.to_string()),
            }
        },
        AccrualStatus::Invalid => Answer::Final(StatusUpdate::finalized(
            order.number.clone(),
            OrderStatus::Invalid,
            Points::zero(),
        )),
        AccrualStatus::Registered | AccrualStatus::Processing | AccrualStatus::Unknown => {
            Answer::Pending
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
