use crate::queries;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use studyforge::rate_limit::store::{RequestLog, WindowStats};
use studyforge::request::{RequestKind, UserId};

/// Rate-limit log in the `request_log` table.
#[derive(Debug, Clone)]
pub struct PgRequestLog {
    pool: PgPool,
}

impl PgRequestLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestLog for PgRequestLog {
    type Error = sqlx::Error;

    async fn window_stats(
        &self,
        user: UserId,
        kind: RequestKind,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, Self::Error> {
        let row = sqlx::query(queries::WINDOW_STATS)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(WindowStats { count: u32::try_from(count).unwrap_or(u32::MAX), oldest: row.try_get("oldest")? })
    }

    async fn record(&self, user: UserId, kind: RequestKind, at: DateTime<Utc>) -> Result<(), Self::Error> {
        sqlx::query(queries::RECORD_REQUEST)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error> {
        let result = sqlx::query(queries::PURGE_REQUESTS).bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
