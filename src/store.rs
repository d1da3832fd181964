//! Per-user artifact storage with a FIFO cap.
//!
//! Each user keeps at most [`DEFAULT_ARTIFACT_CAP`] learning plans and, separately,
//! at most that many quiz results. Inserting into a full collection first deletes the
//! oldest entry by creation time (FIFO, not LRU: reading an artifact does not
//! refresh it).

use crate::artifact::{NewArtifact, StoredArtifact};
use crate::request::{RequestKind, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod memory;

pub use memory::InMemoryArtifactStore;

/// Items kept per user and kind.
pub const DEFAULT_ARTIFACT_CAP: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact {0} not found")]
    NotFound(Uuid),
    #[error("artifact {0} is not a quiz")]
    NotAQuiz(Uuid),
    #[error("score {score} is out of range (max {max})")]
    InvalidScore { score: u32, max: u32 },
    #[error("artifact store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert `artifact` stamped with `now`, evicting the user's oldest entries of the
    /// same kind first if the collection is at capacity.
    async fn insert(&self, artifact: NewArtifact, now: DateTime<Utc>) -> Result<StoredArtifact, StoreError>;

    /// All of the user's artifacts of `kind`, newest first.
    async fn list(&self, user: UserId, kind: RequestKind) -> Result<Vec<StoredArtifact>, StoreError>;

    async fn get(&self, user: UserId, id: Uuid) -> Result<StoredArtifact, StoreError>;

    /// Explicit user deletion; `Ok(false)` when nothing matched.
    async fn delete(&self, user: UserId, id: Uuid) -> Result<bool, StoreError>;

    /// Record the score of a completed quiz.
    async fn attach_score(&self, user: UserId, id: Uuid, score: u32) -> Result<StoredArtifact, StoreError>;
}
