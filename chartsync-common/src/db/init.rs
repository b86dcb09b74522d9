//! Database initialization
//!
//! Opens (or creates) the catalog database and applies the first-run schema.
//! All table creation is idempotent (`CREATE TABLE IF NOT EXISTS`), so startup
//! is safe against an existing catalog.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new catalog database: {}", db_path.display());
    } else {
        info!("Opened existing catalog database: {}", db_path.display());
    }

    // Foreign keys are off by default in SQLite
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent chart runs to read while one writer commits
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create all catalog tables (idempotent — safe to call multiple times)
///
/// Exposed separately so tests can apply the schema to `sqlite::memory:` pools.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_movies_table(pool).await?;
    create_chart_types_table(pool).await?;
    create_charts_table(pool).await?;
    create_chart_entries_table(pool).await?;
    create_chart_history_table(pool).await?;
    Ok(())
}

async fn create_movies_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS movies (
            guid TEXT PRIMARY KEY,
            censored_id TEXT UNIQUE NOT NULL,
            serial_number TEXT,
            name TEXT,
            release_date TEXT,
            length_minutes INTEGER,
            score REAL,
            have_file INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_chart_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chart_types (
            guid TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_charts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS charts (
            guid TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            chart_type_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (chart_type_id) REFERENCES chart_types(guid)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_chart_entries_table(pool: &SqlitePool) -> Result<()> {
    // UNIQUE(chart_id, movie_id) enforces the single-live-entry invariant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chart_entries (
            guid TEXT PRIMARY KEY,
            chart_id TEXT NOT NULL,
            movie_id TEXT NOT NULL,
            rank INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0.0,
            votes INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (chart_id) REFERENCES charts(guid),
            FOREIGN KEY (movie_id) REFERENCES movies(guid),
            UNIQUE (chart_id, movie_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_chart_history_table(pool: &SqlitePool) -> Result<()> {
    // Append-only: rows are inserted by the tracker and never updated
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chart_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chart_id TEXT NOT NULL,
            movie_id TEXT NOT NULL,
            rank INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0.0,
            votes INTEGER NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY (chart_id) REFERENCES charts(guid),
            FOREIGN KEY (movie_id) REFERENCES movies(guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chart_history_lookup
         ON chart_history (chart_id, movie_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tables_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        create_tables(&pool).await.expect("First create failed");
        create_tables(&pool).await.expect("Second create failed");
    }

    #[tokio::test]
    async fn test_init_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");

        let pool = init_database(&db_path).await.expect("init failed");
        assert!(db_path.exists());

        // Schema is queryable
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
