use crate::{queries, to_u32, RowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use studyforge::artifact::{ArtifactDocument, NewArtifact, StoredArtifact, MAX_QUIZ_SCORE};
use studyforge::request::{RequestKind, UserId};
use studyforge::store::{ArtifactStore, StoreError, DEFAULT_ARTIFACT_CAP};
use uuid::Uuid;

/// Artifact store in the `artifacts` table with a per-user, per-kind FIFO cap.
#[derive(Debug, Clone)]
pub struct PgArtifactStore {
    pool: PgPool,
    cap: usize,
}

impl PgArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_cap(pool, DEFAULT_ARTIFACT_CAP)
    }

    pub fn with_cap(pool: PgPool, cap: usize) -> Self {
        Self { pool, cap: cap.max(1) }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

fn artifact_from_row(row: &PgRow) -> Result<StoredArtifact, StoreError> {
    let kind: String = row.try_get("kind").map_err(StoreError::backend)?;
    let kind = RequestKind::parse(&kind)
        .ok_or_else(|| StoreError::backend(RowError::UnknownValue { column: "kind", value: kind }))?;
    let credits_charged: i64 = row.try_get("credits_charged").map_err(StoreError::backend)?;
    let score: Option<i32> = row.try_get("score").map_err(StoreError::backend)?;
    let Json(document): Json<ArtifactDocument> = row.try_get("document").map_err(StoreError::backend)?;
    let user: Uuid = row.try_get("user_id").map_err(StoreError::backend)?;
    Ok(StoredArtifact {
        id: row.try_get("id").map_err(StoreError::backend)?,
        user_id: UserId(user),
        kind,
        topic: row.try_get("topic").map_err(StoreError::backend)?,
        level: row.try_get("level").map_err(StoreError::backend)?,
        language: row.try_get("language").map_err(StoreError::backend)?,
        credits_charged: to_u32("credits_charged", credits_charged).map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        document,
        score: score
            .map(|s| to_u32("score", i64::from(s)))
            .transpose()
            .map_err(StoreError::backend)?,
    })
}

#[async_trait]
impl ArtifactStore for PgArtifactStore {
    async fn insert(&self, artifact: NewArtifact, now: DateTime<Utc>) -> Result<StoredArtifact, StoreError> {
        let user = artifact.user;
        let kind = artifact.kind();
        let stored = StoredArtifact::from_new(artifact, Uuid::new_v4(), now);

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        sqlx::query(queries::LOCK_COLLECTION)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        let keep = i64::try_from(self.cap - 1).unwrap_or(i64::MAX);
        let evicted: Vec<Uuid> = sqlx::query_scalar(queries::EVICT_OLDEST)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .bind(keep)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        for id in &evicted {
            tracing::debug!(target: "studyforge::store", user = %user, kind = %kind, id = %id, "evicted oldest artifact");
        }

        sqlx::query(queries::INSERT_ARTIFACT)
            .bind(stored.id)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .bind(&stored.topic)
            .bind(&stored.level)
            .bind(&stored.language)
            .bind(i64::from(stored.credits_charged))
            .bind(stored.created_at)
            .bind(Json(&stored.document))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(stored)
    }

    async fn list(&self, user: UserId, kind: RequestKind) -> Result<Vec<StoredArtifact>, StoreError> {
        let rows = sqlx::query(queries::LIST_ARTIFACTS)
            .bind(user.as_uuid())
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn get(&self, user: UserId, id: Uuid) -> Result<StoredArtifact, StoreError> {
        let row = sqlx::query(queries::GET_ARTIFACT)
            .bind(user.as_uuid())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(artifact_from_row).transpose()?.ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, user: UserId, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::DELETE_ARTIFACT)
            .bind(user.as_uuid())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn attach_score(&self, user: UserId, id: Uuid, score: u32) -> Result<StoredArtifact, StoreError> {
        if score > MAX_QUIZ_SCORE {
            return Err(StoreError::InvalidScore { score, max: MAX_QUIZ_SCORE });
        }
        let row = sqlx::query(queries::ATTACH_SCORE)
            .bind(user.as_uuid())
            .bind(id)
            .bind(score as i32)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if let Some(row) = row {
            return artifact_from_row(&row);
        }
        // the row exists only if it is a learning plan
        self.get(user, id).await?;
        Err(StoreError::NotAQuiz(id))
    }
}
