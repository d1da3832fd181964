//! Rate limiting primitives.
//!
//! This module provides the building blocks for rate limiting:
//! - [`RateLimiter`]: The core trait for rate limiting logic.
//! - [`Decision`]: The result of a rate limit check (Allowed/Denied).
//! - [`RateLimitRules`]: per request kind limits (5/hour plans, 10/hour quizzes by default).
//!
//! # Architecture
//!
//! - **Logic**: [`SlidingWindowLimiter`](strategies::SlidingWindowLimiter) counts prior
//!   requests in a trailing window and logs the current one when it is allowed.
//! - **Storage**: [`RequestLog`](store::RequestLog) holds the (user, kind, timestamp)
//!   entries, enabling in-memory or database backends.
//!
//! Limiter infrastructure errors are surfaced as [`RateLimitError`]; callers decide
//! whether to fail open. The generation orchestrator does.

use crate::request::{RequestKind, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod store;
pub mod strategies;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Number of requests still available in the current window.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u32,
        /// Optional metadata (e.g., "window_secs", "limit").
        metadata: HashMap<String, String>,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying.
        /// Useful for `Retry-After` headers.
        wait: Duration,
        /// Reason for denial (e.g., "quiz_window").
        reason: String,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// What is being limited: one user's requests of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub user: UserId,
    pub kind: RequestKind,
}

impl RateKey {
    pub fn new(user: UserId, kind: RequestKind) -> Self {
        Self { user, kind }
    }
}

/// A single limit: at most `max_requests` within a trailing `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateRule {
    pub fn per_hour(max_requests: u32) -> Self {
        Self { max_requests, window_secs: 3600 }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Limits for every request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRules {
    pub learning_plan: RateRule,
    pub quiz: RateRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self { learning_plan: RateRule::per_hour(5), quiz: RateRule::per_hour(10) }
    }
}

impl RateLimitRules {
    pub fn rule_for(&self, kind: RequestKind) -> RateRule {
        match kind {
            RequestKind::LearningPlan => self.learning_plan,
            RequestKind::Quiz => self.quiz,
        }
    }

    /// Longest configured window; entries older than this are garbage.
    pub fn longest_window(&self) -> Duration {
        self.learning_plan.window().max(self.quiz.window())
    }
}

/// Limiter infrastructure failure (the request log could not be read).
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("request log unavailable: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Core interface for rate limiting logic.
///
/// This trait allows decoupling the orchestrator from the implementation (sliding
/// window log, fixed window) and the storage (memory, Postgres).
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check `key` against its rule and, when allowed, count this request.
    async fn acquire(&self, key: RateKey) -> Result<Decision, RateLimitError>;
}
