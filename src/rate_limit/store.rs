use crate::request::{RequestKind, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Count and age of the entries inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowStats {
    pub count: u32,
    /// Timestamp of the oldest entry still inside the window.
    pub oldest: Option<DateTime<Utc>>,
}

/// Abstract storage interface for the request log.
///
/// This trait is designed to support both in-memory and database backends.
/// Entries are (user, kind, timestamp) tuples; they are only ever counted.
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Count entries for `(user, kind)` with timestamp `>= since`.
    async fn window_stats(
        &self,
        user: UserId,
        kind: RequestKind,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, Self::Error>;

    /// Append an entry.
    async fn record(&self, user: UserId, kind: RequestKind, at: DateTime<Utc>)
        -> Result<(), Self::Error>;

    /// Drop every entry older than `cutoff`; returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error>;
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Simple in-memory request log.
#[derive(Default, Clone, Debug)]
pub struct InMemoryRequestLog {
    // (user, kind) -> timestamps in insertion order
    data: Arc<Mutex<HashMap<(UserId, RequestKind), VecDeque<DateTime<Utc>>>>>,
}

impl InMemoryRequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all users; used by tests to observe cleanup.
    pub fn len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(UserId, RequestKind), VecDeque<DateTime<Utc>>>> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RequestLog for InMemoryRequestLog {
    type Error = std::convert::Infallible;

    async fn window_stats(
        &self,
        user: UserId,
        kind: RequestKind,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, Self::Error> {
        let guard = self.lock();
        let Some(entries) = guard.get(&(user, kind)) else {
            return Ok(WindowStats::default());
        };
        let mut stats = WindowStats::default();
        for ts in entries.iter().filter(|ts| **ts >= since) {
            stats.count += 1;
            stats.oldest = Some(stats.oldest.map_or(*ts, |o| o.min(*ts)));
        }
        Ok(stats)
    }

    async fn record(
        &self,
        user: UserId,
        kind: RequestKind,
        at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        self.lock().entry((user, kind)).or_default().push_back(at);
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Self::Error> {
        let mut guard = self.lock();
        let mut removed = 0u64;
        for entries in guard.values_mut() {
            let before = entries.len();
            entries.retain(|ts| *ts >= cutoff);
            removed += (before - entries.len()) as u64;
        }
        guard.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }
}
