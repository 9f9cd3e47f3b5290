//! SQLite persistence for jobs.
//!
//! Repositories take a [`DbPool`] as their first argument; the pool itself is
//! created here together with the schema migrations.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

mod migrations;
pub mod models;
pub mod repositories;

pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Open (or create) the database behind `database_url` and apply migrations.
pub async fn create_pool(database_url: &str) -> DbResult<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;

    tracing::info!(url = %database_url, "Database opened");
    Ok(pool)
}

/// In-memory database for tests.
///
/// A single connection that is never recycled, so every query sees the same
/// database for the lifetime of the pool.
pub async fn create_in_memory_pool() -> DbResult<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply every inline migration not yet recorded in `_migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
        .execute(pool)
        .await?;

    let (current,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
        .fetch_one(pool)
        .await?;

    for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
        let version = i as i64 + 1;
        if version <= current {
            continue;
        }
        sqlx::raw_sql(migration).execute(pool).await?;
        sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
            .bind(version)
            .execute(pool)
            .await?;
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
