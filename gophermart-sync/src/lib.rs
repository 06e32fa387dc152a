//! Gophermart Accrual Synchronization
//!
//! Reconciles locally stored order statuses with the external accrual authority.
//!
//! # Architecture
//!
//! ```text
//! Store (NEW/PROCESSING) → Reconciler → AccrualPort → pending updates → Store (one batch)
//! ```
//!
//! # Components
//!
//! - **Ports**: Trait defining the accrual authority interface
//! - **Reconciler**: One reconciliation cycle over every unsettled order
//! - **Retry**: Bounded, jittered backoff for rate-limited queries
//! - **Stub**: Scripted accrual authority for tests and local runs
//!
//! # Example
//!
//! ```rust,ignore
//! use gophermart_sync::{Reconciler, ReconcilerConfig, StubAccrual};
//! use gophermart_store::MemoryStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let accrual = Arc::new(StubAccrual::approve_all(dec!(100)));
//! let store = Arc::new(MemoryStore::new());
//! let reconciler = Reconciler::new(accrual, store, ReconcilerConfig::default());
//!
//! let report = reconciler.run_cycle(&CancellationToken::new()).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod ports;
pub mod reconciler;
pub mod retry;
pub mod stub;

// Re-exports for convenience
pub use error::{SyncError, SyncResult};
pub use ports::AccrualPort;
pub use reconciler::{CycleReport, Reconciler, ReconcilerConfig, TransportFailurePolicy};
pub use retry::RateLimitPolicy;
pub use stub::{StubAccrual, StubReply};
