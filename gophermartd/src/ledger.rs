//! Ledger: user-facing operations on accounts, orders and points.
//!
//! The Ledger is responsible for:
//! - Registering users and issuing session tokens
//! - Accepting order numbers for accrual
//! - Reporting balances
//! - Processing withdrawals against the balance
//!
//! # Architecture
//!
//! ```text
//! HTTP handler → Ledger → Store
//!                            ↑
//!            SyncWorker → Reconciler (writes accruals)
//! ```
//!
//! Every operation except `register` and `authenticate` starts by resolving
//! the caller's session token.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use gophermart_domain::{
    Balance, Login, Order, OrderNumber, Password, PasswordHash, Points, SessionToken, User,
    Withdrawal,
};
use gophermart_store::{Store, StoreError};

use crate::error::{DaemonError, DaemonResult};

/// Result of submitting an order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New order stored, waiting for accrual
    Accepted,
    /// The caller had already submitted this number
    AlreadyMine,
}

// =============================================================================
// Ledger
// =============================================================================

/// User-facing ledger operations.
pub struct Ledger<S: Store + 'static> {
    /// Store for persistence
    store: Arc<S>,
}

impl<S: Store + 'static> Ledger<S> {
    /// Create a new ledger.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Register a new user and open a session.
    ///
    /// # Errors
    /// - `DaemonError::Domain` if login or password is empty
    /// - `DaemonError::UserExists` if the login is taken
    pub async fn register(&self, login: &str, password: &str) -> DaemonResult<SessionToken> {
        let login = Login::new(login)?;
        let password = Password::new(password)?;

        if self.store.users().find_by_login(&login).await?.is_some() {
            return Err(DaemonError::UserExists(login.to_string()));
        }

        let user = User::new(login, PasswordHash::derive(&password)?);

        // The pre-check can race; the primary key settles it
        match self.store.users().create(&user).await {
            Ok(()) => {},
            Err(e) if e.is_duplicate() => return Err(DaemonError::UserExists(user.login.to_string())),
            Err(e) => return Err(e.into()),
        }

        info!(login = %user.login, "User registered");
        Ok(user.session_token)
    }

    /// Check credentials and issue a fresh session token.
    ///
    /// The previous token of the user stops working.
    ///
    /// # Errors
    /// - `DaemonError::Domain` if login or password is empty
    /// - `DaemonError::InvalidCredentials` for an unknown login or wrong password
    pub async fn authenticate(&self, login: &str, password: &str) -> DaemonResult<SessionToken> {
        let login = Login::new(login)?;
        let password = Password::new(password)?;

        let user = self
            .store
            .users()
            .find_by_login(&login)
            .await?
            .ok_or(DaemonError::InvalidCredentials)?;

        if !user.password_hash.verify(&password) {
            debug!(login = %login, "Password mismatch");
            return Err(DaemonError::InvalidCredentials);
        }

        let token = SessionToken::generate();
        self.store.users().update_session(&user.login, &token).await?;

        info!(login = %user.login, "User logged in");
        Ok(token)
    }

    /// Find the user holding `token`.
    pub async fn resolve_session(&self, token: &SessionToken) -> DaemonResult<User> {
        if token.as_str().is_empty() {
            return Err(DaemonError::Unauthorized);
        }
        self.store.users().find_by_token(token).await?.ok_or(DaemonError::Unauthorized)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Submit an order number for accrual.
    ///
    /// Resubmitting one's own number is an idempotent success.
    ///
    /// # Errors
    /// - `DaemonError::Unauthorized` for a bad session
    /// - `DaemonError::Domain` if the number is empty or fails the Luhn check
    /// - `DaemonError::OrderOwnedByAnother` if another user submitted it first
    pub async fn submit_order(&self, token: &SessionToken, raw: &str) -> DaemonResult<SubmitOutcome> {
        let user = self.resolve_session(token).await?;
        let number = OrderNumber::parse_luhn(raw)?;

        if let Some(existing) = self.store.orders().find_by_number(&number).await? {
            return classify_existing(&user, &existing);
        }

        let order = Order::new(number, user.login.clone());
        match self.store.orders().insert(&order).await {
            Ok(()) => {
                info!(order = %order.number, login = %user.login, "Order accepted");
                Ok(SubmitOutcome::Accepted)
            },
            Err(e) if e.is_duplicate() => {
                // Lost a race with a concurrent submit of the same number
                let existing = self
                    .store
                    .orders()
                    .find_by_number(&order.number)
                    .await?
                    .ok_or_else(|| StoreError::not_found("order", order.number.as_str()))?;
                classify_existing(&user, &existing)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's orders, oldest first.
    ///
    /// # Errors
    /// Returns `DaemonError::NoData` if the caller has no orders
    pub async fn list_orders(&self, token: &SessionToken) -> DaemonResult<Vec<Order>> {
        let user = self.resolve_session(token).await?;
        let orders = self.store.orders().find_by_owner(&user.login).await?;
        if orders.is_empty() {
            return Err(DaemonError::NoData);
        }
        Ok(orders)
    }

    // -------------------------------------------------------------------------
    // Balance & withdrawals
    // -------------------------------------------------------------------------

    /// Current balance and lifetime withdrawals of the caller.
    pub async fn balance(&self, token: &SessionToken) -> DaemonResult<Balance> {
        let user = self.resolve_session(token).await?;
        Ok(self.store.balance(&user.login).await?)
    }

    /// Spend points against an order number.
    ///
    /// The number only has to be digits; no check digit is required.
    ///
    /// # Errors
    /// - `DaemonError::Domain` if the number is malformed or the sum is not positive
    /// - `DaemonError::InsufficientFunds` if the sum exceeds the current balance
    /// - `DaemonError::WithdrawalExists` if the number was already used
    pub async fn withdraw(
        &self,
        token: &SessionToken,
        order: &str,
        sum: Decimal,
    ) -> DaemonResult<Withdrawal> {
        let user = self.resolve_session(token).await?;
        self.withdraw_for(&user, order, sum).await
    }

    /// Spend points on behalf of an already resolved user.
    pub async fn withdraw_for(
        &self,
        user: &User,
        order: &str,
        sum: Decimal,
    ) -> DaemonResult<Withdrawal> {
        let order = OrderNumber::parse_digits(order)?;
        let sum = Points::positive(sum)?;

        let withdrawal = Withdrawal::new(order, sum, user.login.clone());
        match self.store.withdrawals().withdraw(&withdrawal).await {
            Ok(()) => {
                info!(
                    order = %withdrawal.order,
                    login = %withdrawal.owner,
                    sum = %withdrawal.sum,
                    "Withdrawal recorded"
                );
                Ok(withdrawal)
            },
            Err(StoreError::InsufficientFunds { requested, available }) => {
                warn!(login = %withdrawal.owner, %requested, %available, "Withdrawal refused");
                Err(DaemonError::InsufficientFunds { requested, available })
            },
            Err(e) if e.is_duplicate() => {
                Err(DaemonError::WithdrawalExists(withdrawal.order.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's withdrawals, oldest first.
    ///
    /// # Errors
    /// Returns `DaemonError::NoData` if the caller never withdrew
    pub async fn list_withdrawals(&self, token: &SessionToken) -> DaemonResult<Vec<Withdrawal>> {
        let user = self.resolve_session(token).await?;
        let withdrawals = self.store.withdrawals().find_by_owner(&user.login).await?;
        if withdrawals.is_empty() {
            return Err(DaemonError::NoData);
        }
        Ok(withdrawals)
    }
}

fn classify_existing(user: &User, existing: &Order) -> DaemonResult<SubmitOutcome> {
    if existing.owner == user.login {
        Ok(SubmitOutcome::AlreadyMine)
    } else {
        Err(DaemonError::OrderOwnedByAnother(existing.number.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gophermart_domain::{DomainError, OrderStatus, StatusUpdate};
    use gophermart_store::{MemoryStore, OrderRepository};
    use rust_decimal_macros::dec;

    fn create_test_ledger() -> Ledger<MemoryStore> {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    async fn credit(ledger: &Ledger<MemoryStore>, number: &str, accrual: Decimal) {
        ledger
            .store()
            .orders()
            .apply_updates(&[StatusUpdate::finalized(
                OrderNumber::from_stored(number),
                OrderStatus::Processed,
                Points::new(accrual).unwrap(),
            )])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let ledger = create_test_ledger();

        let token = ledger.register("alice", "secret").await.unwrap();
        let user = ledger.resolve_session(&token).await.unwrap();

        assert_eq!(user.login.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_register_rejects_empty_fields() {
        let ledger = create_test_ledger();

        assert!(matches!(
            ledger.register("", "secret").await,
            Err(DaemonError::Domain(DomainError::EmptyField("login")))
        ));
        assert!(matches!(
            ledger.register("alice", "").await,
            Err(DaemonError::Domain(DomainError::EmptyField("password")))
        ));
    }

    #[tokio::test]
    async fn test_register_twice() {
        let ledger = create_test_ledger();
        ledger.register("alice", "secret").await.unwrap();

        let err = ledger.register("alice", "other").await.unwrap_err();
        assert!(matches!(err, DaemonError::UserExists(_)));
    }

    #[tokio::test]
    async fn test_login_rotates_token() {
        let ledger = create_test_ledger();
        let first = ledger.register("alice", "secret").await.unwrap();

        let second = ledger.authenticate("alice", "secret").await.unwrap();

        assert_ne!(first, second);
        assert!(matches!(ledger.resolve_session(&first).await, Err(DaemonError::Unauthorized)));
        assert!(ledger.resolve_session(&second).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let ledger = create_test_ledger();
        ledger.register("alice", "secret").await.unwrap();

        let wrong_password = ledger.authenticate("alice", "nope").await.unwrap_err();
        let unknown_login = ledger.authenticate("bob", "secret").await.unwrap_err();

        assert!(matches!(wrong_password, DaemonError::InvalidCredentials));
        assert!(matches!(unknown_login, DaemonError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_login.to_string());
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let ledger = create_test_ledger();

        let result = ledger.list_orders(&SessionToken::from_string("DEADBEEF")).await;
        assert!(matches!(result, Err(DaemonError::Unauthorized)));

        let result = ledger.balance(&SessionToken::from_string("")).await;
        assert!(matches!(result, Err(DaemonError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_submit_order_outcomes() {
        let ledger = create_test_ledger();
        let alice = ledger.register("alice", "a").await.unwrap();
        let bob = ledger.register("bob", "b").await.unwrap();

        assert_eq!(
            ledger.submit_order(&alice, "79927398713").await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            ledger.submit_order(&alice, "79927398713").await.unwrap(),
            SubmitOutcome::AlreadyMine
        );
        assert!(matches!(
            ledger.submit_order(&bob, "79927398713").await,
            Err(DaemonError::OrderOwnedByAnother(_))
        ));

        let orders = ledger.list_orders(&alice).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::New);
        assert!(matches!(ledger.list_orders(&bob).await, Err(DaemonError::NoData)));
    }

    #[tokio::test]
    async fn test_submit_order_validates_number() {
        let ledger = create_test_ledger();
        let token = ledger.register("alice", "a").await.unwrap();

        assert!(matches!(
            ledger.submit_order(&token, "79927398710").await,
            Err(DaemonError::Domain(DomainError::InvalidOrderNumber(_)))
        ));
        assert!(matches!(
            ledger.submit_order(&token, "").await,
            Err(DaemonError::Domain(DomainError::EmptyField(_)))
        ));
        assert_eq!(ledger.store().order_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_flow() {
        let ledger = create_test_ledger();
        let token = ledger.register("alice", "a").await.unwrap();
        ledger.submit_order(&token, "79927398713").await.unwrap();
        credit(&ledger, "79927398713", dec!(100)).await;

        assert_eq!(ledger.balance(&token).await.unwrap(), Balance::from_sums(dec!(100), dec!(0)));

        let withdrawal = ledger.withdraw(&token, "2377225624", dec!(30)).await.unwrap();
        assert_eq!(withdrawal.sum.as_decimal(), dec!(30));

        let err = ledger.withdraw(&token, "2377225625", dec!(80)).await.unwrap_err();
        assert!(matches!(err, DaemonError::InsufficientFunds { .. }));

        let balance = ledger.balance(&token).await.unwrap();
        assert_eq!(balance.current, dec!(70));
        assert_eq!(balance.withdrawn, dec!(30));

        let listed = ledger.list_withdrawals(&token).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].order.as_str(), "2377225624");
    }

    #[tokio::test]
    async fn test_withdraw_validation() {
        let ledger = create_test_ledger();
        let token = ledger.register("alice", "a").await.unwrap();

        assert!(matches!(
            ledger.withdraw(&token, "12a4", dec!(1)).await,
            Err(DaemonError::Domain(DomainError::InvalidOrderNumber(_)))
        ));
        assert!(matches!(
            ledger.withdraw(&token, "1234", dec!(0)).await,
            Err(DaemonError::Domain(DomainError::InvalidAmount(_)))
        ));
        assert!(matches!(ledger.list_withdrawals(&token).await, Err(DaemonError::NoData)));
    }

    #[tokio::test]
    async fn test_withdraw_skips_luhn_but_not_duplicates() {
        let ledger = create_test_ledger();
        let token = ledger.register("alice", "a").await.unwrap();
        ledger.submit_order(&token, "79927398713").await.unwrap();
        credit(&ledger, "79927398713", dec!(100)).await;

        // 1234 fails the Luhn check
        ledger.withdraw(&token, "1234", dec!(10)).await.unwrap();
        assert!(matches!(
            ledger.withdraw(&token, "1234", dec!(10)).await,
            Err(DaemonError::WithdrawalExists(_))
        ));
    }

    #[tokio::test]
    async fn test_withdraw_for_resolved_user() {
        let ledger = create_test_ledger();
        let token = ledger.register("alice", "a").await.unwrap();
        ledger.submit_order(&token, "79927398713").await.unwrap();
        credit(&ledger, "79927398713", dec!(100)).await;

        let user = ledger.resolve_session(&token).await.unwrap();
        let withdrawal = ledger.withdraw_for(&user, "2377225624", dec!(40)).await.unwrap();
        assert_eq!(withdrawal.owner.as_str(), "alice");

        assert!(matches!(
            ledger.withdraw_for(&user, "2377225625", dec!(61)).await,
            Err(DaemonError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.balance(&token).await.unwrap().current, dec!(60));
    }
}
