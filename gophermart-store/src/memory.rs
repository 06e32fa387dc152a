//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.
//!
//! Lock order is always users → orders → withdrawals; no method takes
//! them in any other order.

use crate::error::StoreError;
use crate::repository::{BatchOutcome, OrderRepository, Store, UserRepository, WithdrawalRepository};
use async_trait::async_trait;
use gophermart_domain::{
    Balance, Login, Order, OrderNumber, OrderStatus, SessionToken, StatusUpdate, User, Withdrawal,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// In-memory store for testing
pub struct MemoryStore {
    users: RwLock<HashMap<Login, User>>,
    orders: RwLock<HashMap<OrderNumber, Order>>,
    withdrawals: RwLock<Vec<Withdrawal>>,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Database("in-memory store lock poisoned".to_string())
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            withdrawals: RwLock::new(Vec::new()),
        }
    }

    /// Get the number of users
    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.orders.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Get the number of withdrawals
    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.read().map(|w| w.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum accrued and withdrawn points for one owner from locked snapshots
fn balance_of(
    owner: &Login,
    orders: &HashMap<OrderNumber, Order>,
    withdrawals: &[Withdrawal],
) -> Balance {
    let accrued: Decimal = orders
        .values()
        .filter(|o| &o.owner == owner && o.status == OrderStatus::Processed)
        .map(|o| o.accrual.as_decimal())
        .sum();
    let withdrawn: Decimal = withdrawals
        .iter()
        .filter(|w| &w.owner == owner)
        .map(|w| w.sum.as_decimal())
        .sum();
    Balance::from_sums(accrued, withdrawn)
}

// =============================================================================
// User Repository Implementation
// =============================================================================

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&user.login) {
            return Err(StoreError::duplicate("user", user.login.as_str()));
        }
        users.insert(user.login.clone(), user.clone());
        Ok(())
    }

    async fn find_by_login(&self, login: &Login) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(login).cloned())
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.values().find(|u| &u.session_token == token).cloned())
    }

    async fn update_session(&self, login: &Login, token: &SessionToken) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        match users.get_mut(login) {
            Some(user) => {
                user.session_token = token.clone();
                Ok(())
            },
            None => Err(StoreError::not_found("user", login.as_str())),
        }
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        if orders.contains_key(&order.number) {
            return Err(StoreError::duplicate("order", order.number.as_str()));
        }
        orders.insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        Ok(orders.get(number).cloned())
    }

    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        let mut found: Vec<Order> = orders.values().filter(|o| &o.owner == owner).cloned().collect();
        found.sort_by(|a, b| (a.uploaded_at, &a.number).cmp(&(b.uploaded_at, &b.number)));
        Ok(found)
    }

    async fn find_unsettled(&self) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        let mut found: Vec<Order> = orders.values().filter(|o| o.is_unsettled()).cloned().collect();
        found.sort_by(|a, b| (a.uploaded_at, &a.number).cmp(&(b.uploaded_at, &b.number)));
        Ok(found)
    }

    async fn apply_updates(&self, updates: &[StatusUpdate]) -> Result<BatchOutcome, StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        let mut outcome = BatchOutcome::default();

        for update in updates {
            let Some(order) = orders.get_mut(&update.number) else {
                debug!(order = %update.number, "Update for unknown order skipped");
                outcome.skipped += 1;
                continue;
            };
            match order.apply(update) {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    debug!(order = %update.number, error = %e, "Update skipped");
                    outcome.skipped += 1;
                },
            }
        }

        Ok(outcome)
    }
}

// =============================================================================
// Withdrawal Repository Implementation
// =============================================================================

#[async_trait]
impl WithdrawalRepository for MemoryStore {
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        // Held across check and insert: withdrawals are linearized
        let orders = self.orders.read().map_err(poisoned)?;
        let mut withdrawals = self.withdrawals.write().map_err(poisoned)?;

        let balance = balance_of(&withdrawal.owner, &orders, &withdrawals);
        if !balance.covers(withdrawal.sum) {
            return Err(StoreError::InsufficientFunds {
                requested: withdrawal.sum.as_decimal(),
                available: balance.current,
            });
        }
        if withdrawals.iter().any(|w| w.order == withdrawal.order) {
            return Err(StoreError::duplicate("withdrawal", withdrawal.order.as_str()));
        }

        withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Withdrawal>, StoreError> {
        let withdrawals = self.withdrawals.read().map_err(poisoned)?;
        let mut found: Vec<Withdrawal> =
            withdrawals.iter().filter(|w| &w.owner == owner).cloned().collect();
        found.sort_by_key(|w| w.processed_at);
        Ok(found)
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn users(&self) -> &dyn UserRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn withdrawals(&self) -> &dyn WithdrawalRepository {
        self
    }

    async fn balance(&self, owner: &Login) -> Result<Balance, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        let withdrawals = self.withdrawals.read().map_err(poisoned)?;
        Ok(balance_of(owner, &orders, &withdrawals))
    }
}

// =============================================================================
// Tests
// =============================================================================
