//! E2E test: loyalty points flow from order upload to withdrawal.
//!
//! Flow:
//! 1. Register a user and upload an order
//! 2. Run a reconciliation cycle against the stub accrual authority
//! 3. Verify: order PROCESSED with its accrual, balance credited
//! 4. Withdraw within the balance, then fail to overdraw

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use gophermart_domain::{OrderStatus, SessionToken};
use gophermart_store::MemoryStore;
use gophermart_sync::{
    RateLimitPolicy, Reconciler, ReconcilerConfig, StubAccrual, StubReply,
};
use gophermartd::api::{create_router, ApiState};
use gophermartd::{DaemonError, Ledger};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

fn setup(accrual: StubAccrual) -> (Arc<Ledger<MemoryStore>>, Reconciler<StubAccrual, MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::new(store.clone()));
    let config = ReconcilerConfig {
        rate_limit: RateLimitPolicy::new(3, 5_000, 60_000, 0.0),
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(Arc::new(accrual), store, config);
    (ledger, reconciler)
}

// =============================================================================
// Test: Order to withdrawal
// =============================================================================

#[tokio::test]
async fn test_order_accrual_and_withdrawal() {
    let (ledger, reconciler) = setup(StubAccrual::approve_all(dec!(100)));
    let token = ledger.register("alice", "secret").await.unwrap();

    ledger.submit_order(&token, "79927398713").await.unwrap();

    let report = reconciler.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.finalized, 1);

    let orders = ledger.list_orders(&token).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::Processed);
    assert_eq!(orders[0].accrual.as_decimal(), dec!(100));

    let balance = ledger.balance(&token).await.unwrap();
    assert_eq!((balance.current, balance.withdrawn), (dec!(100), dec!(0)));

    ledger.withdraw(&token, "2377225624", dec!(30)).await.unwrap();
    let balance = ledger.balance(&token).await.unwrap();
    assert_eq!((balance.current, balance.withdrawn), (dec!(70), dec!(30)));

    let err = ledger.withdraw(&token, "2377225625", dec!(80)).await.unwrap_err();
    assert!(matches!(err, DaemonError::InsufficientFunds { .. }));
    let balance = ledger.balance(&token).await.unwrap();
    assert_eq!((balance.current, balance.withdrawn), (dec!(70), dec!(30)));

    // Final orders are not revisited
    let report = reconciler.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_processed() {
    let accrual = StubAccrual::new();
    accrual.script(
        "79927398713",
        [StubReply::rate_limited(None), StubReply::processed(dec!(50))],
    );
    let (ledger, reconciler) = setup(accrual);
    let token = ledger.register("alice", "secret").await.unwrap();
    ledger.submit_order(&token, "79927398713").await.unwrap();

    let started = tokio::time::Instant::now();
    let report = reconciler.run_cycle(&CancellationToken::new()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(report.rate_limited_retries, 1);

    let orders = ledger.list_orders(&token).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::Processed);
    assert_eq!(orders[0].accrual.as_decimal(), dec!(50));
    assert_eq!(ledger.balance(&token).await.unwrap().current, dec!(50));
}

#[tokio::test]
async fn test_unfinished_orders_do_not_count() {
    let accrual = StubAccrual::new();
    accrual.script("12345678903", [StubReply::processed(dec!(40))]);
    let (ledger, reconciler) = setup(accrual);
    let token = ledger.register("alice", "secret").await.unwrap();

    ledger.submit_order(&token, "12345678903").await.unwrap();
    ledger.submit_order(&token, "79927398713").await.unwrap();
    reconciler.run_cycle(&CancellationToken::new()).await.unwrap();

    let orders = ledger.list_orders(&token).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].number.as_str(), "12345678903");
    assert_eq!(orders[0].status, OrderStatus::Processed);
    assert_eq!(orders[1].status, OrderStatus::Processing);

    assert_eq!(ledger.balance(&token).await.unwrap().current, dec!(40));
}

// =============================================================================
// Test: Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_single_winner() {
    let (ledger, _) = setup(StubAccrual::new());

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.register("alice", &format!("pw{}", i)).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(e, DaemonError::UserExists(_))),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_cannot_overdraw() {
    let (ledger, reconciler) = setup(StubAccrual::approve_all(dec!(100)));
    let token = ledger.register("alice", "secret").await.unwrap();
    ledger.submit_order(&token, "79927398713").await.unwrap();
    reconciler.run_cycle(&CancellationToken::new()).await.unwrap();

    let handles: Vec<_> = (0..10u64)
        .map(|i| {
            let ledger = ledger.clone();
            let token: SessionToken = token.clone();
            tokio::spawn(async move {
                ledger.withdraw(&token, &format!("{}", 1000 + i), dec!(30)).await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, DaemonError::InsufficientFunds { .. })),
        }
    }

    assert_eq!(succeeded, 3);
    let balance = ledger.balance(&token).await.unwrap();
    assert_eq!((balance.current, balance.withdrawn), (dec!(10), dec!(90)));
}

// =============================================================================
// Test: HTTP surface
// =============================================================================

#[tokio::test]
async fn test_http_flow() {
    let (ledger, reconciler) = setup(StubAccrual::approve_all(dec!(100)));
    let app = create_router(Arc::new(ApiState { ledger }));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/user/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"login":"alice","password":"secret"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let request = |method: &str, uri: &str, content_type: &str, body: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie.as_str())
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(request("POST", "/api/user/orders", "text/plain", "79927398713"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    reconciler.run_cycle(&CancellationToken::new()).await.unwrap();

    let response = app
        .clone()
        .oneshot(request("GET", "/api/user/orders", "text/plain", ""))
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let orders: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(orders[0]["status"], "PROCESSED");
    assert_eq!(orders[0]["accrual"].as_f64(), Some(100.0));

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/user/balance/withdraw",
            "application/json",
            r#"{"order":"2377225624","sum":30}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/user/balance/withdraw",
            "application/json",
            r#"{"order":"2377225624","sum":1}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/user/balance", "text/plain", ""))
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let balance: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(balance["current"].as_f64(), Some(70.0));
    assert_eq!(balance["withdrawn"].as_f64(), Some(30.0));

    let response = app
        .oneshot(request("GET", "/api/user/withdrawals", "text/plain", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let withdrawals: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(withdrawals[0]["order"], "2377225624");
    assert_eq!(withdrawals[0]["sum"].as_f64(), Some(30.0));
}
