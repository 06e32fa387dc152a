//! Domain Entities for Gophermart
//!
//! Core business entities with lifecycle management.
//! Orders carry the only state machine in the system; users and withdrawals
//! are created once and (apart from session rotation) never change.

use crate::credentials::{PasswordHash, SessionToken};
use crate::value_objects::{DomainError, Login, OrderNumber, Points};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// User
// =============================================================================

/// A registered user.
///
/// `session_token` is the only valid bearer for this user; every successful
/// registration or login overwrites it.
#[derive(Debug, Clone)]
pub struct User {
    pub login: Login,
    pub password_hash: PasswordHash,
    pub session_token: SessionToken,
}

impl User {
    /// Create a user with a freshly issued session token
    pub fn new(login: Login, password_hash: PasswordHash) -> Self {
        Self {
            login,
            password_hash,
            session_token: SessionToken::generate(),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A purchase order submitted for accrual.
///
/// Ownership is fixed at creation; only the reconciler moves `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub number: OrderNumber,
    pub owner: Login,
    pub status: OrderStatus,
    /// Accrued points, meaningful only when `status == Processed`
    pub accrual: Points,
    /// Creation time; also the reconciler's polling order
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in NEW status with zero accrual
    pub fn new(number: OrderNumber, owner: Login) -> Self {
        Self {
            number,
            owner,
            status: OrderStatus::New,
            accrual: Points::zero(),
            uploaded_at: Utc::now(),
        }
    }

    /// Apply a reconciler update, enforcing forward-only transitions.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatusTransition` if the order is final
    /// or the update would move it backwards.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), DomainError> {
        if !self.status.can_advance_to(update.status) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: update.status.to_string(),
            });
        }
        self.status = update.status;
        self.accrual = update.accrual;
        Ok(())
    }

    /// Check if the order still needs reconciling
    pub fn is_unsettled(&self) -> bool {
        !self.status.is_final()
    }
}

/// Order processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Submitted, not yet seen by the reconciler
    New,
    /// Picked up by the reconciler, accrual not final yet
    Processing,
    /// Accrual calculated (final)
    Processed,
    /// Rejected by the accrual authority (final)
    Invalid,
}

impl OrderStatus {
    /// Storage / wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// PROCESSED and INVALID are never revisited
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Forward-only transition table.
    ///
    /// ```text
    /// NEW ─► PROCESSING ─► PROCESSED | INVALID
    ///  └──────────────────►
    /// ```
    ///
    /// PROCESSING → PROCESSING is allowed: the reconciler rewrites the
    /// provisional value every cycle until the authority gives a final answer.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::New, OrderStatus::New) => false,
            (OrderStatus::New, _) => true,
            (OrderStatus::Processing, OrderStatus::New) => false,
            (OrderStatus::Processing, _) => true,
            (OrderStatus::Processed, _) | (OrderStatus::Invalid, _) => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Status Update
// =============================================================================

/// Pending (status, accrual) pair produced by a reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub number: OrderNumber,
    pub status: OrderStatus,
    pub accrual: Points,
}

impl StatusUpdate {
    /// PROCESSING with zero accrual, written back when no final answer arrived
    pub fn provisional(number: OrderNumber) -> Self {
        Self {
            number,
            status: OrderStatus::Processing,
            accrual: Points::zero(),
        }
    }

    /// Final update. INVALID always carries zero accrual.
    pub fn finalized(number: OrderNumber, status: OrderStatus, accrual: Points) -> Self {
        let accrual = if status == OrderStatus::Invalid { Points::zero() } else { accrual };
        Self { number, status, accrual }
    }

    /// Check if the update moves the order into a final status
    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}

// =============================================================================
// Withdrawal
// =============================================================================

/// Points spent against an order. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: OrderNumber,
    pub sum: Points,
    pub owner: Login,
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Create a withdrawal stamped with the current time
    pub fn new(order: OrderNumber, sum: Points, owner: Login) -> Self {
        Self {
            order,
            sum,
            owner,
            processed_at: Utc::now(),
        }
    }
}

// =============================================================================
// Balance
// =============================================================================

/// Spendable balance and lifetime withdrawals for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    /// accrued(PROCESSED) - withdrawn
    pub current: Decimal,
    /// Sum of all withdrawals
    pub withdrawn: Decimal,
}

impl Balance {
    /// Derive the balance from the two aggregate sums
    pub fn from_sums(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    /// Check whether `amount` can be withdrawn
    pub fn covers(&self, amount: Points) -> bool {
        amount.as_decimal() <= self.current
    }
}

// =============================================================================
// Tests
// =============================================================================
