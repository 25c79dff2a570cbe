//! Log Store
//!
//! Durable, batched insertion of build log lines.
//!
//! A batch is written with exactly one multi-row statement. Lines whose build
//! does not exist are silently discarded by the store itself; callers only see
//! the rows that were actually written, each carrying its assigned `log_id`,
//! in insertion order.
//!
//! Two strategies implement the same contract:
//! - [`PgLogStore`]: joins an inline `VALUES` table against `build` inside an
//!   `INSERT ... SELECT ... RETURNING`.
//! - [`SqliteLogStore`]: `INSERT OR IGNORE ... RETURNING` backed by the
//!   `log -> build` foreign key.

mod postgres;
mod sqlite;

pub use postgres::PgLogStore;
pub use sqlite::SqliteLogStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::domain::log::{BuildId, LogLine, NewLogLine};
use thiserror::Error;

/// Errors returned by a [`LogStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("build id {0} exceeds the storable range")]
    BuildIdOutOfRange(BuildId),

    #[error("stored row has a negative {column}: {value}")]
    NegativeColumn { column: &'static str, value: i64 },

    #[error("unsupported database url: {0}")]
    UnsupportedDatabase(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence adapter for build log lines
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert a batch in a single statement.
    ///
    /// Returns the persisted subset of `lines` in input order, with
    /// freshly assigned, strictly increasing identifiers. Lines referencing a
    /// nonexistent build are dropped without error.
    async fn insert_batch(&self, lines: Vec<NewLogLine>) -> Result<Vec<LogLine>>;

    /// Persisted lines of a build with `log_id > after`, ordered by `log_id`
    async fn find_by_build(&self, build_id: BuildId, after: Option<u64>) -> Result<Vec<LogLine>>;

    /// Create the `build` and `log` tables if they are missing
    async fn ensure_schema(&self) -> Result<()>;
}

// =============================================================================
// Helper Functions
// =============================================================================

fn stored_build_id(build_id: BuildId) -> Result<i64> {
    i64::try_from(build_id).map_err(|_| StoreError::BuildIdOutOfRange(build_id))
}

fn stored_log_id(after: Option<u64>) -> i64 {
    after.map_or(0, |id| i64::try_from(id).unwrap_or(i64::MAX))
}

/// Convert returned rows and restore insertion order.
///
/// `RETURNING` makes no ordering promise; identifiers are assigned in
/// insertion order, so sorting by them recovers it.
fn into_log_lines(rows: Vec<LogRow>) -> Result<Vec<LogLine>> {
    let mut lines = rows
        .into_iter()
        .map(LogLine::try_from)
        .collect::<Result<Vec<_>>>()?;
    lines.sort_by_key(|line| line.log_id);
    Ok(lines)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    log_id: i64,
    build_id: i64,
    message: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogLine {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self> {
        let unsigned = |column, value: i64| {
            u64::try_from(value).map_err(|_| StoreError::NegativeColumn { column, value })
        };

        Ok(LogLine {
            log_id: unsigned("log_id", row.log_id)?,
            build_id: unsigned("build_id", row.build_id)?,
            message: row.message,
            timestamp: row.timestamp,
        })
    }
}
