//! Value Objects for the Gophermart Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// A required input was missing or empty
    #[error("Empty value is not allowed: {0}")]
    EmptyField(&'static str),

    /// Order number is not made of digits or fails the check digit
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    /// Amount is negative, zero where a positive value is required, or malformed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown order status label
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    /// Order status would move backwards or out of a final status
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Password hashing or hash parsing failed
    #[error("Password hash error: {0}")]
    PasswordHash(String),
}

// =============================================================================
// Luhn
// =============================================================================

/// Check a string of ASCII digits against the Luhn check-digit algorithm.
///
/// Returns `false` for empty input or any non-digit character.
///
/// ```
/// # use gophermart_domain::luhn_valid;
/// assert!(luhn_valid("79927398713"));
/// assert!(!luhn_valid("79927398710"));
/// ```
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, ch) in digits.bytes().rev().enumerate() {
        if !ch.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(ch - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}

// =============================================================================
// OrderNumber
// =============================================================================

/// OrderNumber is a purchase-order number made of ASCII digits
///
/// # Invariants
/// - Non-empty
/// - Digits only
/// - Luhn-valid when built with [`OrderNumber::parse_luhn`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse an order number submitted for accrual.
    ///
    /// Requires digits only and a valid Luhn check digit.
    ///
    /// # Errors
    /// - `DomainError::EmptyField` if the input is blank
    /// - `DomainError::InvalidOrderNumber` if it is not digits or fails the checksum
    pub fn parse_luhn(raw: &str) -> Result<Self, DomainError> {
        let number = Self::parse_digits(raw)?;
        if !luhn_valid(&number.0) {
            return Err(DomainError::InvalidOrderNumber(format!(
                "{} fails the Luhn check",
                number.0
            )));
        }
        Ok(number)
    }

    /// Parse an order number used for a withdrawal.
    ///
    /// Only the digit format is checked; withdrawals do not require a check digit.
    ///
    /// # Errors
    /// - `DomainError::EmptyField` if the input is blank
    /// - `DomainError::InvalidOrderNumber` if it contains anything but digits
    pub fn parse_digits(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyField("order number"));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidOrderNumber(format!(
                "{} is not a sequence of digits",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Rebuild an order number read back from storage without re-validating it.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the number as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Login
// =============================================================================

/// Login is the immutable, unique user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Login(String);

impl Login {
    /// Create a login, rejecting blank input.
    ///
    /// # Errors
    /// Returns `DomainError::EmptyField` if the login is blank
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::EmptyField("login"));
        }
        Ok(Self(raw))
    }

    /// Get the login as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Points
// =============================================================================

/// Points is a non-negative loyalty-point amount
///
/// # Invariants
/// - Must be >= 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(Decimal);

impl Points {
    /// Create a new amount with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value < Decimal::ZERO {
            return Err(DomainError::InvalidAmount(format!("{} is negative", value)));
        }
        Ok(Self(value))
    }

    /// Create a strictly positive amount (withdrawals)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value <= 0
    pub fn positive(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(format!("{} must be positive", value)));
        }
        Ok(Self(value))
    }

    /// Zero points
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
