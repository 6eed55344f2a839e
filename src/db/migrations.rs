use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::{Connection, Transaction};

/// Bump whenever the shape of `sleep_sessions` changes. There is no upgrade
/// path: any mismatch drops the table and recreates it empty.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    if version != 0 {
        warn!(
            "Schema version {version} does not match {CURRENT_SCHEMA_VERSION}; recreating sleep_sessions"
        );
        drop_schema(&tx)?;
    }

    tx.execute_batch(include_str!("schemas/schema_v1.sql"))
        .context("failed to execute schema_v1.sql")?;

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    info!("Database schema at version {CURRENT_SCHEMA_VERSION}");
    Ok(())
}

fn drop_schema(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch("DROP TABLE IF EXISTS sleep_sessions;")
        .context("failed to drop sleep_sessions")
}
