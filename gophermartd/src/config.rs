//! Daemon configuration.
//!
//! Sources, highest priority first: environment variables, command-line
//! flags, defaults. A `.env` file is loaded into the environment if present.
//! Empty values count as unset.

use clap::{Parser, Subcommand};
use std::env;
use std::fmt;
use std::str::FromStr;

use gophermart_sync::{RateLimitPolicy, ReconcilerConfig, TransportFailurePolicy};

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Command line
// =============================================================================

/// Command-line arguments.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gophermartd", version, about = "Loyalty points ledger daemon")]
pub struct CliArgs {
    /// Address the HTTP server listens on
    #[arg(short = 'a', long = "address")]
    pub run_address: Option<String>,

    /// PostgreSQL connection string
    #[arg(short = 'd', long = "database-uri")]
    pub database_uri: Option<String>,

    /// Base URL of the accrual system
    #[arg(short = 'r', long = "accrual-address")]
    pub accrual_address: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

/// Database maintenance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum DbAction {
    /// Apply pending migrations
    Migrate,
    /// Show applied migrations and missing tables
    Status,
}

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Accrual system configuration
    pub accrual: AccrualConfig,

    /// Reconciliation schedule and policies
    pub sync: SyncConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `host:port` to bind to
    pub run_address: String,
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection string; `None` selects the in-memory store
    pub uri: Option<String>,
    /// Pool size
    pub max_connections: u32,
}

/// Accrual system configuration.
#[derive(Debug, Clone)]
pub struct AccrualConfig {
    /// Base URL; `None` selects the stub that approves everything
    pub address: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

/// Reconciliation configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Seconds between cycle starts
    pub interval_secs: u64,
    pub rate_limit_base_ms: u64,
    pub rate_limit_max_ms: u64,
    pub rate_limit_max_attempts: u32,
    pub transport_failure: TransportFailurePolicy,
}

impl SyncConfig {
    /// Reconciler settings derived from this configuration.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            rate_limit: RateLimitPolicy::new(
                self.rate_limit_max_attempts,
                self.rate_limit_base_ms,
                self.rate_limit_max_ms,
                RateLimitPolicy::default().jitter_pct,
            ),
            transport_failure: self.transport_failure,
        }
    }
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment (requires a database)
    Production,
}

impl FromStr for Environment {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid GOPHERMART_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }
}

impl Config {
    /// Load configuration from the process environment and parsed flags.
    pub fn from_env(args: &CliArgs) -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_sources(args, |key| env::var(key).ok())
    }

    /// Load configuration from flags and an arbitrary variable lookup.
    pub fn from_sources<F>(args: &CliArgs, lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        let environment = match var("GOPHERMART_ENV") {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let defaults = Self::default();

        let api = ApiConfig {
            run_address: var("RUN_ADDRESS")
                .or_else(|| flag(&args.run_address))
                .unwrap_or(defaults.api.run_address),
        };

        let database = DatabaseConfig {
            uri: var("DATABASE_URI").or_else(|| flag(&args.database_uri)),
            max_connections: parse_var(
                &var,
                "GOPHERMART_DB_MAX_CONNECTIONS",
                defaults.database.max_connections,
            )?,
        };

        let accrual = AccrualConfig {
            address: var("ACCRUAL_SYSTEM_ADDRESS").or_else(|| flag(&args.accrual_address)),
            timeout_secs: parse_var(
                &var,
                "GOPHERMART_ACCRUAL_TIMEOUT_SECS",
                defaults.accrual.timeout_secs,
            )?,
        };

        let sync = SyncConfig {
            interval_secs: parse_var(
                &var,
                "GOPHERMART_SYNC_INTERVAL_SECS",
                defaults.sync.interval_secs,
            )?,
            rate_limit_base_ms: parse_var(
                &var,
                "GOPHERMART_RATE_LIMIT_BASE_MS",
                defaults.sync.rate_limit_base_ms,
            )?,
            rate_limit_max_ms: parse_var(
                &var,
                "GOPHERMART_RATE_LIMIT_MAX_MS",
                defaults.sync.rate_limit_max_ms,
            )?,
            rate_limit_max_attempts: parse_var(
                &var,
                "GOPHERMART_RATE_LIMIT_MAX_ATTEMPTS",
                defaults.sync.rate_limit_max_attempts,
            )?,
            transport_failure: match var("GOPHERMART_TRANSPORT_FAILURE") {
                Some(raw) => raw.parse().map_err(|_| {
                    DaemonError::Config(format!(
                        "Invalid GOPHERMART_TRANSPORT_FAILURE: {}. Expected: skip, abort",
                        raw
                    ))
                })?,
                None => defaults.sync.transport_failure,
            },
        };

        if sync.interval_secs == 0 {
            return Err(DaemonError::Config(
                "GOPHERMART_SYNC_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        if environment == Environment::Production && database.uri.is_none() {
            return Err(DaemonError::Config(
                "DATABASE_URI is required in production".to_string(),
            ));
        }

        Ok(Self {
            api,
            database,
            accrual,
            sync,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                run_address: "127.0.0.1:0".to_string(), // Let OS assign port
            },
            sync: SyncConfig {
                interval_secs: 1,
                ..Self::default().sync
            },
            environment: Environment::Test,
            ..Self::default()
        }
    }
}

fn parse_var<T, V>(var: &V, key: &str, default: T) -> DaemonResult<T>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, raw))),
        None => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                run_address: "127.0.0.1:8080".to_string(),
            },
            database: DatabaseConfig {
                uri: None,
                max_connections: 10,
            },
            accrual: AccrualConfig {
                address: None,
                timeout_secs: 10,
            },
            sync: SyncConfig {
                interval_secs: 10,
                rate_limit_base_ms: 5_000,
                rate_limit_max_ms: 60_000,
                rate_limit_max_attempts: 12,
                transport_failure: TransportFailurePolicy::Skip,
            },
            environment: Environment::Development,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
