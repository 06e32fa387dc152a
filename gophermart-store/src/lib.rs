//! Gophermart Storage Layer
//!
//! Provides persistence for users, orders, and withdrawals.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing and development
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use gophermart_store::{MemoryStore, Store, OrderRepository};
//! use gophermart_domain::{Login, Order, OrderNumber};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let order = Order::new(
//!         OrderNumber::parse_luhn("79927398713").unwrap(),
//!         Login::new("alice").unwrap(),
//!     );
//!     store.orders().insert(&order).await.unwrap();
//!
//!     let unsettled = store.orders().find_unsettled().await.unwrap();
//!     println!("Orders awaiting accrual: {}", unsettled.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    BatchOutcome, OrderRepository, Store, UserRepository, WithdrawalRepository,
};
