use crate::orchestrator::Stage;
use crate::request::{RequestKind, UserId};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Events emitted while a generation request moves through the saga.
///
/// Every event carries the user and request kind so sinks can aggregate per user or
/// per endpoint without extra lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// The request was rejected by the rate limiter.
    RateLimited { user: UserId, kind: RequestKind, retry_after: Duration },
    /// The request log could not be read; the request went ahead (fail-open).
    LimiterUnavailable { user: UserId, kind: RequestKind },
    /// Credits were taken for the request.
    Debited { user: UserId, kind: RequestKind, amount: u32, balance: u32 },
    /// The balance did not cover the cost.
    InsufficientCredits { user: UserId, kind: RequestKind, available: u32, required: u32 },
    /// A debit was compensated after a downstream failure.
    Refunded { user: UserId, kind: RequestKind, amount: u32, balance: u32, stage: Stage },
    /// A compensating refund failed.
    ///
    /// The user is short `amount` credits until someone reconciles the account.
    RefundFailed { user: UserId, kind: RequestKind, amount: u32, stage: Stage, error: String },
    /// The artifact was stored and the request succeeded.
    Completed {
        user: UserId,
        kind: RequestKind,
        artifact_id: Uuid,
        credits_charged: u32,
        duration: Duration,
    },
    /// The request failed at `stage`.
    Failed { user: UserId, kind: RequestKind, stage: Stage, duration: Duration },
}

impl GenerationEvent {
    pub fn user(&self) -> UserId {
        match self {
            GenerationEvent::RateLimited { user, .. }
            | GenerationEvent::LimiterUnavailable { user, .. }
            | GenerationEvent::Debited { user, .. }
            | GenerationEvent::InsufficientCredits { user, .. }
            | GenerationEvent::Refunded { user, .. }
            | GenerationEvent::RefundFailed { user, .. }
            | GenerationEvent::Completed { user, .. }
            | GenerationEvent::Failed { user, .. } => *user,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            GenerationEvent::RateLimited { kind, .. }
            | GenerationEvent::LimiterUnavailable { kind, .. }
            | GenerationEvent::Debited { kind, .. }
            | GenerationEvent::InsufficientCredits { kind, .. }
            | GenerationEvent::Refunded { kind, .. }
            | GenerationEvent::RefundFailed { kind, .. }
            | GenerationEvent::Completed { kind, .. }
            | GenerationEvent::Failed { kind, .. } => *kind,
        }
    }

    /// Stable snake_case name, used as a metric label and JSON `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            GenerationEvent::RateLimited { .. } => "rate_limited",
            GenerationEvent::LimiterUnavailable { .. } => "limiter_unavailable",
            GenerationEvent::Debited { .. } => "debited",
            GenerationEvent::InsufficientCredits { .. } => "insufficient_credits",
            GenerationEvent::Refunded { .. } => "refunded",
            GenerationEvent::RefundFailed { .. } => "refund_failed",
            GenerationEvent::Completed { .. } => "completed",
            GenerationEvent::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for GenerationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationEvent::RateLimited { kind, retry_after, .. } => {
                write!(f, "RateLimited({}, retry_after={:?})", kind, retry_after)
            }
            GenerationEvent::LimiterUnavailable { kind, .. } => write!(f, "LimiterUnavailable({})", kind),
            GenerationEvent::Debited { kind, amount, balance, .. } => {
                write!(f, "Debited({}, -{}, balance={})", kind, amount, balance)
            }
            GenerationEvent::InsufficientCredits { kind, available, required, .. } => {
                write!(f, "InsufficientCredits({}, {}/{})", kind, available, required)
            }
            GenerationEvent::Refunded { kind, amount, balance, stage, .. } => {
                write!(f, "Refunded({}, +{}, balance={}, at={})", kind, amount, balance, stage)
            }
            GenerationEvent::RefundFailed { kind, amount, stage, error, .. } => {
                write!(f, "RefundFailed({}, {}, at={}: {})", kind, amount, stage, error)
            }
            GenerationEvent::Completed { kind, artifact_id, credits_charged, duration, .. } => {
                write!(
                    f,
                    "Completed({}, id={}, charged={}, duration={:?})",
                    kind, artifact_id, credits_charged, duration
                )
            }
            GenerationEvent::Failed { kind, stage, duration, .. } => {
                write!(f, "Failed({}, at={}, duration={:?})", kind, stage, duration)
            }
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a [`GenerationEvent`] into a JSON value for sinks.
pub fn event_to_json(event: &GenerationEvent) -> serde_json::Value {
    let mut value = match event {
        GenerationEvent::RateLimited { retry_after, .. } => json!({
            "retry_after_secs": retry_after.as_secs(),
        }),
        GenerationEvent::LimiterUnavailable { .. } => json!({}),
        GenerationEvent::Debited { amount, balance, .. } => json!({
            "amount": *amount,
            "balance": *balance,
        }),
        GenerationEvent::InsufficientCredits { available, required, .. } => json!({
            "available": *available,
            "required": *required,
        }),
        GenerationEvent::Refunded { amount, balance, stage, .. } => json!({
            "amount": *amount,
            "balance": *balance,
            "stage": stage.as_str(),
        }),
        GenerationEvent::RefundFailed { amount, stage, error, .. } => json!({
            "amount": *amount,
            "stage": stage.as_str(),
            "error": error,
        }),
        GenerationEvent::Completed { artifact_id, credits_charged, duration, .. } => json!({
            "artifact_id": artifact_id.to_string(),
            "credits_charged": *credits_charged,
            "duration_ms": clamp_u64(duration.as_millis()),
        }),
        GenerationEvent::Failed { stage, duration, .. } => json!({
            "stage": stage.as_str(),
            "duration_ms": clamp_u64(duration.as_millis()),
        }),
    };
    if let Some(map) = value.as_object_mut() {
        map.insert("event".into(), json!(event.name()));
        map.insert("user".into(), json!(event.user().to_string()));
        map.insert("kind".into(), json!(event.kind().as_str()));
    }
    value
}
