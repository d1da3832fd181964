use crate::{queries, RowError};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use studyforge::consent::{ConsentError, ConsentRecord, ConsentState, ConsentStore};
use studyforge::request::UserId;
use uuid::Uuid;

/// Append-only consent history in the `consent_records` table.
#[derive(Debug, Clone)]
pub struct PgConsentStore {
    pool: PgPool,
}

impl PgConsentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsentStore for PgConsentStore {
    async fn latest(&self, user: UserId) -> Result<Option<ConsentRecord>, ConsentError> {
        let Some(row) = sqlx::query(queries::LATEST_CONSENT)
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(ConsentError::store)?
        else {
            return Ok(None);
        };
        let state: String = row.try_get("state").map_err(ConsentError::store)?;
        let state = ConsentState::parse(&state)
            .ok_or_else(|| ConsentError::store(RowError::UnknownValue { column: "state", value: state }))?;
        let user: Uuid = row.try_get("user_id").map_err(ConsentError::store)?;
        Ok(Some(ConsentRecord {
            user: UserId(user),
            state,
            consent_text: row.try_get("consent_text").map_err(ConsentError::store)?,
            method: row.try_get("method").map_err(ConsentError::store)?,
            recorded_at: row.try_get("recorded_at").map_err(ConsentError::store)?,
        }))
    }

    async fn append(&self, record: ConsentRecord) -> Result<(), ConsentError> {
        sqlx::query(queries::APPEND_CONSENT)
            .bind(record.user.as_uuid())
            .bind(record.state.as_str())
            .bind(&record.consent_text)
            .bind(&record.method)
            .bind(record.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(ConsentError::store)?;
        Ok(())
    }
}
