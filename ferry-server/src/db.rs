use sqlx::{
    PgPool, SqlitePool,
    postgres::PgPoolOptions,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};

use crate::repository::{LogStore, PgLogStore, SqliteLogStore, StoreError};

pub async fn create_pg_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn create_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to `:memory:` opens a separate database.
    if database_url.contains(":memory:") {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await;
    }

    SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

/// Connect to the database named by `database_url`, choosing the log store
/// strategy the backend supports.
pub async fn connect(database_url: &str) -> Result<Arc<dyn LogStore>, StoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let pool = create_pg_pool(database_url).await?;
        tracing::info!("Using PostgreSQL log store");
        return Ok(Arc::new(PgLogStore::new(pool)));
    }

    if database_url.starts_with("sqlite:") {
        let pool = create_sqlite_pool(database_url).await?;
        tracing::info!("Using SQLite log store");
        return Ok(Arc::new(SqliteLogStore::new(pool)));
    }

    Err(StoreError::UnsupportedDatabase(redact(database_url)))
}

fn redact(database_url: &str) -> String {
    match database_url.split_once("://") {
        Some((scheme, _)) => format!("{}://...", scheme),
        None => database_url.to_string(),
    }
}
