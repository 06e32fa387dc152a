//! Database lifecycle management for Gophermart.
//!
//! Provides migration running and status checking.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Tables the ledger needs before it can serve requests.
pub const LEDGER_TABLES: [&str; 3] = ["users", "orders", "withdrawals"];

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the latest applied migrations and whether every ledger table exists.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    // Runtime query (sqlx::query! requires DB at compile time)
    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Latest migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let installed_on: DateTime<Utc> = mig.try_get("installed_on")?;
                let success: bool = mig.try_get("success")?;

                let status = if success { "✓" } else { "✗" };
                info!("  {} v{}: {} ({})", status, version, description, installed_on.to_rfc3339());
            }
        },
        Ok(_) => {
            warn!("No migrations found in database (run `gophermartd db migrate` first)");
        },
        Err(e) => {
            // Table might not exist yet
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `gophermartd db migrate` first)");
            } else {
                return Err(e.into());
            }
        },
    }

    let missing = missing_tables(pool).await?;
    if missing.is_empty() {
        info!("Ledger tables: OK");
    } else {
        warn!(missing = ?missing, "Ledger tables missing");
    }

    Ok(())
}

/// Ledger tables not present in the current schema.
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in LEDGER_TABLES {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        if !exists {
            missing.push(table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Run with DATABASE_URL set; sqlx::test creates a throwaway database.
    #[sqlx::test(migrations = false)]
    async fn test_migrate_creates_ledger_tables(pool: PgPool) {
        assert_eq!(missing_tables(&pool).await.unwrap(), LEDGER_TABLES.to_vec());

        migrate(&pool).await.unwrap();
        assert!(missing_tables(&pool).await.unwrap().is_empty());

        // Idempotent
        migrate(&pool).await.unwrap();
        status(&pool).await.unwrap();
    }
}
