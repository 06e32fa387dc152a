//! Gophermart Daemon
//!
//! Loyalty points ledger: HTTP API plus periodic accrual reconciliation.
//!
//! # Usage
//!
//! ```bash
//! # Start with in-memory store and stub accrual system
//! cargo run -p gophermartd
//!
//! # Start against PostgreSQL and a real accrual system
//! cargo run -p gophermartd --features postgres -- \
//!     -a 0.0.0.0:8080 -d postgres://localhost/gophermart -r http://localhost:8081
//!
//! # Database maintenance
//! cargo run -p gophermartd --features postgres -- -d postgres://... db migrate
//! ```
//!
//! # Environment Variables
//!
//! Environment variables take precedence over flags.
//!
//! - `RUN_ADDRESS` (`-a`): HTTP listen address (default: 127.0.0.1:8080)
//! - `DATABASE_URI` (`-d`): PostgreSQL connection string (default: in-memory)
//! - `ACCRUAL_SYSTEM_ADDRESS` (`-r`): accrual system base URL (default: stub)
//! - `GOPHERMART_ENV`: Environment (test, development, production)
//! - `GOPHERMART_SYNC_INTERVAL_SECS`: Reconciliation period (default: 10)
//! - `GOPHERMART_RATE_LIMIT_BASE_MS`, `GOPHERMART_RATE_LIMIT_MAX_MS`,
//!   `GOPHERMART_RATE_LIMIT_MAX_ATTEMPTS`: 429 backoff
//! - `GOPHERMART_TRANSPORT_FAILURE`: skip or abort
//! - `GOPHERMART_ACCRUAL_TIMEOUT_SECS`, `GOPHERMART_DB_MAX_CONNECTIONS`

use clap::Parser;
use gophermartd::{CliArgs, Command, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("gophermartd=info".parse()?)
                .add_directive("gophermart_sync=info".parse()?),
        )
        .init();

    let args = CliArgs::parse();

    // Load configuration
    let config = Config::from_env(&args)?;

    if let Some(Command::Db { action }) = args.command {
        return run_db(action, config.database.uri.as_deref()).await;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        run_address = %config.api.run_address,
        persistent = config.database.uri.is_some(),
        "Gophermart Daemon"
    );

    gophermartd::launch(config).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_db(action: gophermartd::DbAction, database_uri: Option<&str>) -> anyhow::Result<()> {
    gophermartd::db::run_db_command(action, database_uri).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_action: gophermartd::DbAction, _database_uri: Option<&str>) -> anyhow::Result<()> {
    anyhow::bail!("db commands require gophermartd built with the `postgres` feature")
}
