//! Gophermart Daemon Library
//!
//! Runtime orchestrator for the loyalty points ledger.
//!
//! # Architecture
//!
//! ```text
//! HTTP client → API Server → Ledger → Store ← Reconciler ← Sync Worker
//!                                                 ↓
//!                                          Accrual authority
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator and backend selection
//! - **Ledger**: Registration, sessions, orders, balance, withdrawals
//! - **Sync Worker**: Periodic accrual reconciliation
//! - **API**: HTTP endpoints
//! - **Config**: Environment and command-line configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use gophermartd::{CliArgs, Config};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env(&CliArgs::parse()).expect("Failed to load config");
//!     gophermartd::launch(config).await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ledger;
pub mod sync_worker;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use config::{
    AccrualConfig, ApiConfig, CliArgs, Command, Config, DatabaseConfig, DbAction, Environment,
    SyncConfig,
};
pub use daemon::{launch, Daemon};
pub use error::{DaemonError, DaemonResult};
pub use ledger::{Ledger, SubmitOutcome};
pub use sync_worker::SyncWorker;
