//! PostgreSQL log store: join-on-insert strategy

use async_trait::async_trait;
use ferry_core::domain::log::{BuildId, LogLine, NewLogLine};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{LogRow, LogStore, Result, into_log_lines, stored_build_id, stored_log_id};

/// Log store for databases that can join inside an `INSERT ... SELECT`
#[derive(Debug, Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn insert_batch(&self, lines: Vec<NewLogLine>) -> Result<Vec<LogLine>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let build_ids = lines
            .iter()
            .map(|line| stored_build_id(line.build_id))
            .collect::<Result<Vec<_>>>()?;

        // Rows without a matching build fall out of the inner join.
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO log (build_id, message, timestamp) \
             SELECT v.build_id, v.message, v.timestamp FROM (",
        );
        query.push_values(
            lines.iter().zip(build_ids).enumerate(),
            |mut row, (ord, (line, build_id))| {
                row.push_bind(build_id)
                    .push_bind(line.message.as_str())
                    .push_bind(line.timestamp)
                    .push_bind(ord as i64);
            },
        );
        query.push(
            ") AS v (build_id, message, timestamp, ord) \
             INNER JOIN build b ON b.build_id = v.build_id \
             ORDER BY v.ord \
             RETURNING log_id, build_id, message, timestamp",
        );

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
            WHERE build_id = $1 AND log_id > $2
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
                build_id BIGINT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log (
                log_id BIGSERIAL PRIMARY KEY,
                build_id BIGINT NOT NULL REFERENCES build(build_id) ON DELETE CASCADE,
                message TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_log_build_id ON log(build_id, log_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("PostgreSQL log schema ready");
        Ok(())
    }
}
