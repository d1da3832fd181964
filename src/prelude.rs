//! Convenient re-exports for common studyforge types.
pub use crate::{
    adaptive::DynamicConfig,
    artifact::{ArtifactDocument, LearningPlan, Quiz, ShapeError, StoredArtifact},
    clock::{Clock, ManualClock, SystemClock},
    consent::{ConsentAction, ConsentReport, ConsentRequest, ConsentService, ConsentState},
    credits::{CreditService, ResetReport},
    error::GenerationError,
    ledger::{CreditLedger, DebitOutcome, InMemoryLedger, LedgerError},
    orchestrator::{GenerationOrchestrator, GenerationOutcome, Stage},
    pricing::PricingTable,
    provider::{GenerationProvider, OpenAiProvider, ProviderError, StaticProvider},
    rate_limit::{
        store::InMemoryRequestLog, strategies::SlidingWindowLimiter, Decision, RateLimitRules,
        RateLimiter,
    },
    request::{Difficulty, Language, PlanRequest, PlanTier, QuizRequest, RequestKind, UserId},
    store::{ArtifactStore, InMemoryArtifactStore, StoreError},
    telemetry::{GenerationEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    timeout::{TimeoutPolicy, MAX_TIMEOUT},
};
