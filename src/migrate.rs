//! Schema version management and migrations.
//!
//! The store carries a single integer version in `PRAGMA user_version`
//! (0 for a fresh database or a legacy unversioned one). Migrations are a
//! static ordered list; each entry upgrades the store *to* its version.
//! The runner decides what is pending — individual migrations only have to
//! tolerate a schema that already reflects their change, so running the
//! full path on a current store is a no-op.
//!
//! Downgrades are unsupported: migrations may drop columns and are not
//! reversible. Opening a store stamped beyond the known migrations means a
//! newer build wrote it, which is fatal.

use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

type ApplyFn = for<'a> fn(&'a SqlitePool) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One schema transformation: the version it upgrades the store to, and the
/// operation that mutates the live schema.
pub struct Migration {
    pub version: i64,
    pub apply: ApplyFn,
}

/// All known migrations, in application order. `MIGRATIONS[i].version == i + 1`.
pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    apply: migration_001,
}];

fn migration_001(
    pool: &SqlitePool,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
    Box::pin(drop_prompt_response_columns(pool))
}

/// The version a fully migrated store is stamped with.
pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<()> {
    // PRAGMA does not accept bind parameters; version is a trusted integer.
    sqlx::query(&format!("PRAGMA user_version = {}", version))
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply all migrations between the store's current version and `target`,
/// then stamp `target`.
///
/// Fails if `target` exceeds the known migrations (store written by a newer
/// build) or lies below the current version (downgrade). Both are fatal
/// configuration errors and abort store initialization.
pub async fn apply_pending(pool: &SqlitePool, target: i64) -> Result<()> {
    let current = schema_version(pool).await?;

    if target > MIGRATIONS.len() as i64 {
        anyhow::bail!(
            "Target version {} exceeds available migrations ({})",
            target,
            MIGRATIONS.len()
        );
    }
    if target < current {
        anyhow::bail!(
            "Downgrade from version {} to {} is not supported",
            current,
            target
        );
    }

    for migration in &MIGRATIONS[current as usize..target as usize] {
        (migration.apply)(pool).await?;
    }
    set_schema_version(pool, target).await?;
    Ok(())
}

/// Migration 1: drop the legacy `prompt_text` and `response_text` columns
/// from `call_logs`. Raw prompt/response bodies are no longer persisted;
/// all other columns and rows survive.
async fn drop_prompt_response_columns(pool: &SqlitePool) -> Result<()> {
    let columns = sqlx::query("PRAGMA table_info(call_logs)")
        .fetch_all(pool)
        .await?;
    let existing: Vec<String> = columns
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    for column in ["prompt_text", "response_text"] {
        if existing.iter().any(|c| c == column) {
            sqlx::query(&format!("ALTER TABLE call_logs DROP COLUMN {}", column))
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}
