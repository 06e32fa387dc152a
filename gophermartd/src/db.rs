//! Database CLI subcommands for gophermartd.
//!
//! Provides `db migrate` and `db status`.

use anyhow::{anyhow, Result};

use gophermart_db::{migrate, status};

use crate::config::DbAction;

/// Run a database CLI subcommand against `database_uri`.
///
/// Supported commands:
/// - `gophermartd db migrate` - Run pending migrations
/// - `gophermartd db status` - Check migration status and ledger tables
pub async fn run_db_command(action: DbAction, database_uri: Option<&str>) -> Result<()> {
    let database_uri = database_uri.ok_or_else(|| {
        anyhow!("DATABASE_URI (or -d) is required for db commands")
    })?;

    let pool = sqlx::PgPool::connect(database_uri).await?;

    match action {
        DbAction::Migrate => migrate(&pool).await?,
        DbAction::Status => status(&pool).await?,
    }

    Ok(())
}
