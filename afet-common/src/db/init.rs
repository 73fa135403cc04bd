//! Database initialization
//!
//! Opens the connection pool and creates the feed tables if they are
//! missing. Safe to run on every startup.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

/// Open the pool described by `config` and ensure the schema exists
pub async fn init_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = config.url.contains(":memory:");

    // every connection to an in-memory database sees its own copy
    let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&config.url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    if !in_memory {
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    }

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    info!("Database ready: {}", redact_url(&config.url));
    Ok(pool)
}

/// Create feed tables and indexes (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_feeds_entry_table(pool).await?;
    create_feeds_location_table(pool).await?;
    Ok(())
}

async fn create_feeds_entry_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feeds_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            full_text TEXT NOT NULL,
            is_resolved INTEGER NOT NULL DEFAULT 0,
            channel TEXT NOT NULL DEFAULT '',
            extra_parameters TEXT,
            timestamp TIMESTAMP NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            is_geolocated INTEGER NOT NULL DEFAULT 0,
            reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_feeds_location_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feeds_location (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            formatted_address TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            northeast_lat REAL NOT NULL DEFAULT 0,
            northeast_lng REAL NOT NULL DEFAULT 0,
            southwest_lat REAL NOT NULL DEFAULT 0,
            southwest_lng REAL NOT NULL DEFAULT 0,
            entry_id INTEGER NOT NULL REFERENCES feeds_entry(id),
            timestamp TIMESTAMP,
            epoch INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL DEFAULT '',
            channel TEXT NOT NULL DEFAULT '',
            is_location_verified INTEGER NOT NULL DEFAULT 0,
            is_need_verified INTEGER NOT NULL DEFAULT 0,
            needs TEXT NOT NULL DEFAULT '[]',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            extra_parameters TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feeds_location_entry_id ON feeds_location(entry_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Hide credentials embedded in a connection URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
