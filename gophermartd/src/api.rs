//! HTTP API for the Gophermart daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Registration and login (session cookie `sessionid`)
//! - Order submission and listing
//! - Balance, withdrawals and withdrawal history
//!
//! Request bodies may be gzip-encoded; responses are gzip-compressed when
//! the client accepts it.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use gophermart_domain::{DomainError, Order, OrderStatus, SessionToken, Withdrawal};
use gophermart_store::Store;

use crate::error::DaemonError;
use crate::ledger::{Ledger, SubmitOutcome};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sessionid";

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<S: Store + 'static> {
    pub ledger: Arc<Ledger<S>>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Register or login request.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub login: String,
    pub password: String,
}

/// One order in the caller's order list.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            number: order.number.to_string(),
            status: order.status,
            accrual: (order.status == OrderStatus::Processed).then(|| order.accrual.as_decimal()),
            uploaded_at: order.uploaded_at,
        }
    }
}

/// Balance response.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// Withdrawal request.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

/// One entry in the withdrawal history.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<&Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: &Withdrawal) -> Self {
        Self {
            order: withdrawal.order.to_string(),
            sum: withdrawal.sum.as_decimal(),
            processed_at: withdrawal.processed_at,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Session extractor
// =============================================================================

/// Session token taken from the `sessionid` cookie.
///
/// A request without the cookie is rejected with 401 before the handler runs.
pub struct SessionCookie(pub SessionToken);

#[async_trait]
impl<T: Send + Sync> FromRequestParts<T> for SessionCookie {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
            .map(|(_, value)| SessionCookie(SessionToken::from_string(value)))
            .ok_or_else(|| to_error_response(DaemonError::Unauthorized))
    }
}

fn session_cookie(token: &SessionToken) -> String {
    format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, token)
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<S>(state: Arc<ApiState<S>>) -> Router
where
    S: Store + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/user/register", post(register_handler))
        .route("/api/user/login", post(login_handler))
        .route("/api/user/orders", post(submit_order_handler).get(list_orders_handler))
        .route("/api/user/balance", get(balance_handler))
        .route("/api/user/balance/withdraw", post(withdraw_handler))
        .route("/api/user/balance/withdrawals", get(list_withdrawals_handler))
        .route("/api/user/withdrawals", get(list_withdrawals_handler))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Register a new user and open a session.
async fn register_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Response, Response>
where
    S: Store + 'static,
{
    let Json(request) = payload.map_err(rejection_response)?;
    let token = state
        .ledger
        .register(&request.login, &request.password)
        .await
        .map_err(to_error_response)?;

    Ok((StatusCode::OK, [(header::SET_COOKIE, session_cookie(&token))]).into_response())
}

/// Log in and rotate the session.
async fn login_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Response, Response>
where
    S: Store + 'static,
{
    let Json(request) = payload.map_err(rejection_response)?;
    let token = state
        .ledger
        .authenticate(&request.login, &request.password)
        .await
        .map_err(to_error_response)?;

    Ok((StatusCode::OK, [(header::SET_COOKIE, session_cookie(&token))]).into_response())
}

/// Submit an order number (plain text body).
async fn submit_order_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    SessionCookie(token): SessionCookie,
    body: String,
) -> Result<StatusCode, Response>
where
    S: Store + 'static,
{
    let outcome = state.ledger.submit_order(&token, &body).await.map_err(to_error_response)?;

    Ok(match outcome {
        SubmitOutcome::Accepted => StatusCode::ACCEPTED,
        SubmitOutcome::AlreadyMine => StatusCode::OK,
    })
}

/// List the caller's orders.
async fn list_orders_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    SessionCookie(token): SessionCookie,
) -> Result<Json<Vec<OrderResponse>>, Response>
where
    S: Store + 'static,
{
    let orders = state.ledger.list_orders(&token).await.map_err(to_error_response)?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// Current balance.
async fn balance_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    SessionCookie(token): SessionCookie,
) -> Result<Json<BalanceResponse>, Response>
where
    S: Store + 'static,
{
    let balance = state.ledger.balance(&token).await.map_err(to_error_response)?;
    Ok(Json(BalanceResponse {
        current: balance.current,
        withdrawn: balance.withdrawn,
    }))
}

/// Spend points.
async fn withdraw_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    SessionCookie(token): SessionCookie,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<StatusCode, Response>
where
    S: Store + 'static,
{
    // Authenticate before looking at the body
    let user = state.ledger.resolve_session(&token).await.map_err(to_error_response)?;

    let Json(request) = payload.map_err(rejection_response)?;
    state
        .ledger
        .withdraw_for(&user, &request.order, request.sum)
        .await
        .map_err(to_error_response)?;

    Ok(StatusCode::OK)
}

/// Withdrawal history.
async fn list_withdrawals_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    SessionCookie(token): SessionCookie,
) -> Result<Json<Vec<WithdrawalResponse>>, Response>
where
    S: Store + 'static,
{
    let withdrawals = state.ledger.list_withdrawals(&token).await.map_err(to_error_response)?;
    Ok(Json(withdrawals.iter().map(WithdrawalResponse::from).collect()))
}

// =============================================================================
// Helpers
// =============================================================================

fn rejection_response(rejection: JsonRejection) -> Response {
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

/// Map a daemon error to its HTTP response.
pub fn to_error_response(error: DaemonError) -> Response {
    let status = match &error {
        DaemonError::Domain(DomainError::InvalidOrderNumber(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        DaemonError::Domain(DomainError::EmptyField(_) | DomainError::InvalidAmount(_)) => {
            StatusCode::BAD_REQUEST
        },
        DaemonError::UserExists(_)
        | DaemonError::OrderOwnedByAnother(_)
        | DaemonError::WithdrawalExists(_) => StatusCode::CONFLICT,
        DaemonError::InvalidCredentials | DaemonError::Unauthorized => StatusCode::UNAUTHORIZED,
        DaemonError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        DaemonError::NoData => return StatusCode::NO_CONTENT.into_response(),
        _ => {
            error!(error = %error, "Request failed");
            return error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        },
    };

    error_body(status, error.to_string())
}

// =============================================================================
// Tests
// =============================================================================
