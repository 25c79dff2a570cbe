//! SQLite log store: insert-or-ignore strategy

use async_trait::async_trait;
use ferry_core::domain::log::{BuildId, LogLine, NewLogLine};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{LogRow, LogStore, Result, into_log_lines, stored_build_id, stored_log_id};

/// Log store for databases without join-on-insert support
///
/// Relies on the `log.build_id` foreign key and `INSERT OR IGNORE`. SQLite's
/// conflict clause does not cover foreign keys, so the schema backs the key
/// with a trigger that turns orphan rows into ignored rows.
#[derive(Debug, Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert_batch(&self, lines: Vec<NewLogLine>) -> Result<Vec<LogLine>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let build_ids = lines
            .iter()
            .map(|line| stored_build_id(line.build_id))
            .collect::<Result<Vec<_>>>()?;

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO log (build_id, message, timestamp) ");
        query.push_values(lines.iter().zip(build_ids), |mut row, (line, build_id)| {
            row.push_bind(build_id)
                .push_bind(line.message.as_str())
                .push_bind(line.timestamp);
        });
        query.push(" RETURNING log_id, build_id, message, timestamp");

        let rows = query
            .build_query_as::<LogRow>()
            .fetch_all(&self.pool)
            .await?;

        into_log_lines(rows)
    }

    async fn find_by_build(&self, build_id: BuildId, after: Option<u64>) -> Result<Vec<LogLine>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT log_id, build_id, message, timestamp
            FROM log
            WHERE build_id = ? AND log_id > ?
            ORDER BY log_id ASC
            "#,
        )
        .bind(stored_build_id(build_id)?)
        .bind(stored_log_id(after))
        .fetch_all(&self.pool)
        .await?;

        into_log_lines(rows)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS build (
                build_id INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                build_id INTEGER NOT NULL REFERENCES build(build_id) ON DELETE CASCADE,
                message TEXT NOT NULL,
                timestamp DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS log_ignore_missing_build
            BEFORE INSERT ON log
            WHEN NOT EXISTS (SELECT 1 FROM build WHERE build_id = NEW.build_id)
            BEGIN
                SELECT RAISE(IGNORE);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_log_build_id ON log(build_id, log_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("SQLite log schema ready");
        Ok(())
    }
}
