//! Gophermart Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, credentials, and domain rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::{Password, PasswordHash, SessionToken};
pub use entities::{Balance, Order, OrderStatus, StatusUpdate, User, Withdrawal};
pub use value_objects::{luhn_valid, DomainError, Login, OrderNumber, Points};
