//! Gophermart Connectors
//!
//! Adapters for the external accrual authority.
//! Normalizes its HTTP responses to typed outcomes.

#![warn(clippy::all)]

// Public modules
pub mod accrual_rest;

// Re-exports
pub use accrual_rest::{
    AccrualReport, AccrualResponse, AccrualRestClient, AccrualRestError, AccrualStatus,
};
