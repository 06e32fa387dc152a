//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the ledger.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use gophermart_domain::{
    Balance, Login, Order, OrderNumber, SessionToken, StatusUpdate, User, Withdrawal,
};

/// Repository for User entities
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user.
    ///
    /// Returns `StoreError::Duplicate` if the login is taken.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    /// Find a user by login
    async fn find_by_login(&self, login: &Login) -> Result<Option<User>, StoreError>;

    /// Find the user currently holding a session token
    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<User>, StoreError>;

    /// Replace the user's session token, invalidating the previous one
    async fn update_session(&self, login: &Login, token: &SessionToken) -> Result<(), StoreError>;
}

/// Repository for Order entities
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order.
    ///
    /// Returns `StoreError::Duplicate` if the number already exists, whoever owns it.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    /// Find an order by number
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    /// All orders of a user, oldest first
    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Order>, StoreError>;

    /// All NEW and PROCESSING orders, oldest first
    async fn find_unsettled(&self) -> Result<Vec<Order>, StoreError>;

    /// Write a batch of reconciler updates in one transaction.
    ///
    /// Best-effort per row: a row that fails or is already final is skipped
    /// and the rest of the batch still commits.
    async fn apply_updates(&self, updates: &[StatusUpdate]) -> Result<BatchOutcome, StoreError>;
}

/// Repository for Withdrawal entities (append-only)
#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    /// Record a withdrawal if the owner's balance covers it.
    ///
    /// The balance check and the insert are atomic with respect to other
    /// withdrawals of the same owner.
    ///
    /// # Errors
    /// - `StoreError::InsufficientFunds` if the sum exceeds the current balance
    /// - `StoreError::Duplicate` if the order number was already used
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    /// All withdrawals of a user, oldest first
    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Withdrawal>, StoreError>;
}

/// Result of a batch status update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows written
    pub applied: usize,
    /// Rows left alone (already final, unknown, or not a forward move)
    pub skipped: usize,
    /// Rows whose write failed
    pub failed: usize,
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get user repository
    fn users(&self) -> &dyn UserRepository;

    /// Get order repository
    fn orders(&self) -> &dyn OrderRepository;

    /// Get withdrawal repository
    fn withdrawals(&self) -> &dyn WithdrawalRepository;

    /// Current balance and lifetime withdrawals, read from one consistent snapshot
    async fn balance(&self, owner: &Login) -> Result<Balance, StoreError>;
}
