use super::{ArtifactStore, StoreError, DEFAULT_ARTIFACT_CAP};
use crate::artifact::{NewArtifact, StoredArtifact, MAX_QUIZ_SCORE};
use crate::request::{RequestKind, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

type Collections = HashMap<(UserId, RequestKind), Vec<StoredArtifact>>;

/// In-memory artifact store. Collections are kept in insertion order.
#[derive(Debug, Clone)]
pub struct InMemoryArtifactStore {
    data: Arc<Mutex<Collections>>,
    cap: usize,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::with_cap(DEFAULT_ARTIFACT_CAP)
    }
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(cap: usize) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), cap: cap.max(1) }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Number of stored artifacts of `kind` for `user`.
    pub fn count(&self, user: UserId, kind: RequestKind) -> usize {
        self.lock().get(&(user, kind)).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Index of the oldest artifact; ties go to the earliest inserted.
fn oldest_index(items: &[StoredArtifact]) -> Option<usize> {
    items.iter().enumerate().min_by_key(|(i, a)| (a.created_at, *i)).map(|(i, _)| i)
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn insert(&self, artifact: NewArtifact, now: DateTime<Utc>) -> Result<StoredArtifact, StoreError> {
        let key = (artifact.user, artifact.kind());
        let stored = StoredArtifact::from_new(artifact, Uuid::new_v4(), now);
        let mut guard = self.lock();
        let items = guard.entry(key).or_default();
        while items.len() >= self.cap {
            let Some(idx) = oldest_index(items) else { break };
            let evicted = items.remove(idx);
            tracing::debug!(
                target: "studyforge::store",
                user = %evicted.user_id,
                kind = %evicted.kind,
                id = %evicted.id,
                "evicted oldest artifact"
            );
        }
        items.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, user: UserId, kind: RequestKind) -> Result<Vec<StoredArtifact>, StoreError> {
        let mut items = self.lock().get(&(user, kind)).cloned().unwrap_or_default();
        // reversed first so equal timestamps list the later insertion first
        items.reverse();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get(&self, user: UserId, id: Uuid) -> Result<StoredArtifact, StoreError> {
        let guard = self.lock();
        [RequestKind::LearningPlan, RequestKind::Quiz]
            .iter()
            .filter_map(|kind| guard.get(&(user, *kind)))
            .flatten()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, user: UserId, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        for kind in [RequestKind::LearningPlan, RequestKind::Quiz] {
            if let Some(items) = guard.get_mut(&(user, kind)) {
                if let Some(pos) = items.iter().position(|a| a.id == id) {
                    items.remove(pos);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn attach_score(&self, user: UserId, id: Uuid, score: u32) -> Result<StoredArtifact, StoreError> {
        if score > MAX_QUIZ_SCORE {
            return Err(StoreError::InvalidScore { score, max: MAX_QUIZ_SCORE });
        }
        let mut guard = self.lock();
        if let Some(quiz) = guard
            .get_mut(&(user, RequestKind::Quiz))
            .and_then(|items| items.iter_mut().find(|a| a.id == id))
        {
            quiz.score = Some(score);
            return Ok(quiz.clone());
        }
        let is_plan = guard
            .get(&(user, RequestKind::LearningPlan))
            .is_some_and(|items| items.iter().any(|a| a.id == id));
        if is_plan {
            Err(StoreError::NotAQuiz(id))
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}
