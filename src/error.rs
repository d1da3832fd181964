//! Error type for generation requests
use crate::artifact::ShapeError;
use crate::ledger::LedgerError;
use crate::provider::ProviderError;
use crate::request::ValidationError;
use crate::store::StoreError;
use std::time::Duration;

/// Why a generation request failed.
///
/// The first three variants are raised before any credit moves. The remaining
/// ones happen after the debit, and by the time the caller sees them the
/// orchestrator has already attempted the refund (see [`GenerationError::refunded`]).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The request body failed validation
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Too many requests of this kind in the trailing window
    #[error("rate limit exceeded; retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    /// The balance does not cover the cost
    #[error("insufficient credits: {available} available, {required} required")]
    InsufficientCredits { available: u32, required: u32 },
    /// The provider call failed or timed out
    #[error("generation failed: {source}")]
    Provider {
        #[source]
        source: ProviderError,
        refunded: bool,
    },
    /// The provider reply did not have the expected structure
    #[error("generated content was invalid: {source}")]
    MalformedResult {
        #[source]
        source: ShapeError,
        refunded: bool,
    },
    /// The artifact could not be stored
    #[error("failed to save the result: {source}")]
    Persistence {
        #[source]
        source: StoreError,
        refunded: bool,
    },
    /// The ledger itself failed (no credits were taken)
    #[error("credit ledger unavailable: {0}")]
    Ledger(#[source] LedgerError),
}

impl GenerationError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Invalid(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::InsufficientCredits { .. } => 402,
            Self::Ledger(LedgerError::UnknownAccount(_)) => 404,
            Self::Provider { .. } | Self::MalformedResult { .. } | Self::Persistence { .. } | Self::Ledger(_) => {
                500
            }
        }
    }

    /// Whether the compensating refund succeeded. `None` when nothing was debited.
    pub fn refunded(&self) -> Option<bool> {
        match self {
            Self::Provider { refunded, .. }
            | Self::MalformedResult { refunded, .. }
            | Self::Persistence { refunded, .. } => Some(*refunded),
            _ => None,
        }
    }

    /// Check if this error was raised after the debit
    pub fn is_post_debit(&self) -> bool {
        self.refunded().is_some()
    }

    /// Check if this error is a rate limit rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Seconds until a rate-limited caller may retry
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
