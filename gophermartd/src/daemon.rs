//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Ledger (accounts, orders, withdrawals)
//! - Sync Worker (periodic accrual reconciliation)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Select the store and accrual backends
//! 3. Start API server
//! 4. Start sync worker
//! 5. Wait for SIGINT, SIGTERM, SIGQUIT or a cancelled shutdown token
//! 6. Drain the API server and let the worker persist the order in flight

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gophermart_connectors::AccrualRestClient;
use gophermart_store::{MemoryStore, Store};
use gophermart_sync::{AccrualPort, Reconciler, StubAccrual};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::ledger::Ledger;
use crate::sync_worker::SyncWorker;

// =============================================================================
// Daemon
// =============================================================================

/// The main Gophermart daemon.
pub struct Daemon<A: AccrualPort + 'static, S: Store + 'static> {
    /// Configuration
    config: Config,
    /// User-facing operations
    ledger: Arc<Ledger<S>>,
    /// Accrual authority
    accrual: Arc<A>,
    /// Store
    store: Arc<S>,
    /// Cancelled on shutdown
    shutdown: CancellationToken,
}

impl Daemon<StubAccrual, MemoryStore> {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// The stub authority approves every order with 100 points.
    pub fn new_stub(config: Config) -> Self {
        let accrual = Arc::new(StubAccrual::approve_all(dec!(100)));
        let store = Arc::new(MemoryStore::new());
        Self::new(config, accrual, store)
    }
}

impl<A: AccrualPort + 'static, S: Store + 'static> Daemon<A, S> {
    /// Create a new daemon with provided components.
    pub fn new(config: Config, accrual: Arc<A>, store: Arc<S>) -> Self {
        let ledger = Arc::new(Ledger::new(store.clone()));
        Self {
            config,
            ledger,
            accrual,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ledger shared with the API.
    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon.
    ///
    /// Blocks until a termination signal arrives or the shutdown token is
    /// cancelled.
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Gophermart daemon"
        );

        let signal = shutdown_signal().map_err(|e| {
            DaemonError::Config(format!("Failed to install signal handlers: {}", e))
        })?;

        // 1. Start API server
        let (api_addr, server) = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 2. Start sync worker
        let worker = self.start_sync_worker();

        // 3. Wait for shutdown
        tokio::select! {
            name = signal => {
                info!(signal = name, "Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
        }

        // 4. Graceful shutdown
        self.shutdown.cancel();
        self.join(server, worker).await
    }

    /// Start the API server.
    ///
    /// The server stops accepting connections once the shutdown token is
    /// cancelled and finishes in-flight requests.
    async fn start_api_server(&self) -> DaemonResult<(SocketAddr, JoinHandle<()>)> {
        let state = Arc::new(ApiState {
            ledger: self.ledger.clone(),
        });

        let router = create_router(state);
        let addr = &self.config.api.run_address;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });

        Ok((local_addr, handle))
    }

    /// Spawn the sync worker.
    fn start_sync_worker(&self) -> JoinHandle<DaemonResult<()>> {
        let reconciler = Reconciler::new(
            self.accrual.clone(),
            self.store.clone(),
            self.config.sync.reconciler_config(),
        );
        let worker =
            SyncWorker::new(reconciler, Duration::from_secs(self.config.sync.interval_secs));

        tokio::spawn(worker.run(self.shutdown.clone()))
    }

    /// Wait for the server and worker to stop.
    async fn join(
        &self,
        server: JoinHandle<()>,
        worker: JoinHandle<DaemonResult<()>>,
    ) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        if let Err(e) = server.await {
            error!(error = %e, "API server task failed");
        }

        match worker.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "Sync worker task failed"),
        }

        info!("Shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Future resolving with the name of the first termination signal received.
///
/// Handlers are registered before this returns, so a signal sent afterwards
/// is never lost to the default action.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    })
}

// =============================================================================
// Launch
// =============================================================================

/// Pick backends from configuration and run until shutdown.
///
/// - `DATABASE_URI` set: PostgreSQL store (migrated on startup), else memory
/// - `ACCRUAL_SYSTEM_ADDRESS` set: REST client, else the approving stub
pub async fn launch(config: Config) -> DaemonResult<()> {
    match config.database.uri.clone() {
        Some(uri) => launch_postgres(config, &uri).await,
        None => {
            info!("DATABASE_URI not set, using in-memory store");
            launch_with_store(config, Arc::new(MemoryStore::new())).await
        },
    }
}

#[cfg(feature = "postgres")]
async fn launch_postgres(config: Config, uri: &str) -> DaemonResult<()> {
    use gophermart_store::PgStore;

    let store = PgStore::connect(uri, config.database.max_connections).await?;
    gophermart_db::migrate(store.pool())
        .await
        .map_err(|e| DaemonError::Config(format!("Migration failed: {}", e)))?;
    info!("Connected to PostgreSQL");

    launch_with_store(config, Arc::new(store)).await
}

#[cfg(not(feature = "postgres"))]
async fn launch_postgres(_config: Config, _uri: &str) -> DaemonResult<()> {
    Err(DaemonError::Config(
        "DATABASE_URI is set but gophermartd was built without the `postgres` feature".to_string(),
    ))
}

async fn launch_with_store<S: Store + 'static>(config: Config, store: Arc<S>) -> DaemonResult<()> {
    match config.accrual.address.clone() {
        Some(address) => {
            let client = AccrualRestClient::new(address)
                .map_err(|e| DaemonError::Config(e.to_string()))?
                .with_timeout(Duration::from_secs(config.accrual.timeout_secs));
            info!(accrual = %client.base_url(), "Using accrual system");
            Daemon::new(config, Arc::new(client), store).run().await
        },
        None => {
            warn!("ACCRUAL_SYSTEM_ADDRESS not set, every order is approved with 100 points");
            let accrual = Arc::new(StubAccrual::approve_all(dec!(100)));
            Daemon::new(config, accrual, store).run().await
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        assert_eq!(daemon.store.user_count(), 0);
        assert!(!daemon.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        let (addr, server) = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        // Can make a health check request
        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());

        daemon.shutdown_token().cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_daemon_run_stops_on_cancel() {
        let daemon = Daemon::new_stub(Config::test());
        let shutdown = daemon.shutdown_token();

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_daemon_reconciles_submitted_orders() {
        let daemon = Daemon::new_stub(Config::test());
        let ledger = daemon.ledger().clone();
        let shutdown = daemon.shutdown_token();

        let token = ledger.register("alice", "secret").await.unwrap();
        ledger.submit_order(&token, "79927398713").await.unwrap();

        let handle = tokio::spawn(daemon.run());

        // First cycle starts immediately
        let mut balance = ledger.balance(&token).await.unwrap();
        for _ in 0..50 {
            if !balance.current.is_zero() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            balance = ledger.balance(&token).await.unwrap();
        }
        assert_eq!(balance.current, dec!(100));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_launch_rejects_database_without_feature() {
        let mut config = Config::test();
        config.database.uri = Some("postgres://localhost/gophermart".to_string());

        let err = launch(config).await.unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }
}
