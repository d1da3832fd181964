//! The generation saga.
//!
//! A request moves through the stages below. Steps before `Debiting` have no side
//! effects on credits; every failure after a successful debit goes through
//! `ErrorRefunding`, which puts the credits back before the error is returned.
//!
//! ```text
//! Validating -> RateLimitChecking -> Debiting -> Generating -> ValidatingResult -> Persisting -> Done
//!                                                    \______________\__________________\
//!                                                                                       -> ErrorRefunding
//! ```
//!
//! The rate-limit step fails open: if the request log cannot be read the request
//! proceeds. Refund failures are logged at `error` with target
//! `studyforge::ledger` and emitted as [`GenerationEvent::RefundFailed`]; the caller
//! still sees the original error.

use crate::adaptive::DynamicConfig;
use crate::artifact::{ArtifactDocument, LearningPlan, NewArtifact, Quiz, ShapeError, StoredArtifact};
use crate::clock::{Clock, SystemClock};
use crate::error::GenerationError;
use crate::ledger::{CreditLedger, DebitOutcome};
use crate::pricing::PricingTable;
use crate::prompt::{plan_prompt, quiz_prompt, Prompt};
use crate::provider::{GenerationProvider, ProviderError};
use crate::rate_limit::{Decision, RateKey, RateLimiter};
use crate::request::{PlanRequest, QuizRequest, RequestKind, UserId};
use crate::store::ArtifactStore;
use crate::telemetry::{emit_best_effort, GenerationEvent, NullSink, TelemetrySink};
use crate::timeout::TimeoutPolicy;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Saga stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    RateLimitChecking,
    Debiting,
    Generating,
    ValidatingResult,
    Persisting,
    Done,
    ErrorRefunding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::RateLimitChecking => "rate_limit_checking",
            Stage::Debiting => "debiting",
            Stage::Generating => "generating",
            Stage::ValidatingResult => "validating_result",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
            Stage::ErrorRefunding => "error_refunding",
        }
    }

    /// Legal forward moves of the saga.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Validating, RateLimitChecking)
                | (RateLimitChecking, Debiting)
                | (Debiting, Generating)
                | (Generating, ValidatingResult)
                | (ValidatingResult, Persisting)
                | (Persisting, Done)
                | (Generating | ValidatingResult | Persisting, ErrorRefunding)
        )
    }

    /// Whether credits have been debited by the time the saga is in this stage.
    pub fn holds_debit(self) -> bool {
        matches!(self, Stage::Generating | Stage::ValidatingResult | Stage::Persisting)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful generation: the stored artifact and the balance after the debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub artifact: StoredArtifact,
    pub new_credits: u32,
}

/// Errors produced while building an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("orchestrator is missing its {0}")]
    Missing(&'static str),
}

/// Runs generation requests through the saga.
///
/// Cheap to clone: every collaborator sits behind an `Arc`.
pub struct GenerationOrchestrator<S = NullSink> {
    ledger: Arc<dyn CreditLedger>,
    limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn ArtifactStore>,
    provider: Arc<dyn GenerationProvider>,
    clock: Arc<dyn Clock>,
    pricing: DynamicConfig<PricingTable>,
    timeout: TimeoutPolicy,
    sink: S,
}

impl<S: Clone> Clone for GenerationOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            limiter: self.limiter.clone(),
            store: self.store.clone(),
            provider: self.provider.clone(),
            clock: self.clock.clone(),
            pricing: self.pricing.clone(),
            timeout: self.timeout,
            sink: self.sink.clone(),
        }
    }
}

impl<S> fmt::Debug for GenerationOrchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("pricing", &*self.pricing.get())
            .field("timeout", &self.timeout)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator<NullSink> {
    pub fn builder() -> GenerationOrchestratorBuilder<NullSink> {
        GenerationOrchestratorBuilder::new()
    }
}

/// Builder for [`GenerationOrchestrator`].
pub struct GenerationOrchestratorBuilder<S> {
    ledger: Option<Arc<dyn CreditLedger>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    store: Option<Arc<dyn ArtifactStore>>,
    provider: Option<Arc<dyn GenerationProvider>>,
    clock: Arc<dyn Clock>,
    pricing: DynamicConfig<PricingTable>,
    timeout: TimeoutPolicy,
    sink: S,
}

impl GenerationOrchestratorBuilder<NullSink> {
    /// Builder with system clock, default pricing, 60s provider timeout and no telemetry.
    pub fn new() -> Self {
        Self {
            ledger: None,
            limiter: None,
            store: None,
            provider: None,
            clock: Arc::new(SystemClock),
            pricing: DynamicConfig::new(PricingTable::default()),
            timeout: TimeoutPolicy::default(),
            sink: NullSink,
        }
    }
}

impl Default for GenerationOrchestratorBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> GenerationOrchestratorBuilder<S> {
    pub fn ledger<L: CreditLedger + 'static>(mut self, ledger: L) -> Self {
        self.ledger = Some(Arc::new(ledger));
        self
    }

    pub fn limiter<R: RateLimiter + 'static>(mut self, limiter: R) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    pub fn store<A: ArtifactStore + 'static>(mut self, store: A) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn provider<P: GenerationProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Use already shared collaborators (e.g. a ledger also used by the credit service).
    pub fn shared_ledger(mut self, ledger: Arc<dyn CreditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shared_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn shared_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_pricing(mut self, pricing: DynamicConfig<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the telemetry sink.
    pub fn sink<S2>(self, sink: S2) -> GenerationOrchestratorBuilder<S2> {
        GenerationOrchestratorBuilder {
            ledger: self.ledger,
            limiter: self.limiter,
            store: self.store,
            provider: self.provider,
            clock: self.clock,
            pricing: self.pricing,
            timeout: self.timeout,
            sink,
        }
    }

    pub fn build(self) -> Result<GenerationOrchestrator<S>, BuildError> {
        Ok(GenerationOrchestrator {
            ledger: self.ledger.ok_or(BuildError::Missing("ledger"))?,
            limiter: self.limiter.ok_or(BuildError::Missing("rate limiter"))?,
            store: self.store.ok_or(BuildError::Missing("artifact store"))?,
            provider: self.provider.ok_or(BuildError::Missing("provider"))?,
            clock: self.clock,
            pricing: self.pricing,
            timeout: self.timeout,
            sink: self.sink,
        })
    }
}

/// Everything the shared saga needs to know about one validated request.
struct Job {
    kind: RequestKind,
    cost: u32,
    prompt: Prompt,
    topic: String,
    level: &'static str,
    language: &'static str,
}

/// Tracks the current stage and rejects illegal moves in debug builds.
struct Saga {
    user: UserId,
    kind: RequestKind,
    stage: Stage,
}

impl Saga {
    fn advance(&mut self, next: Stage) {
        debug_assert!(self.stage.can_transition_to(next), "illegal saga move {} -> {}", self.stage, next);
        tracing::trace!(
            target: "studyforge::orchestrator",
            user = %self.user,
            kind = %self.kind,
            from = %self.stage,
            to = %next,
            "stage"
        );
        self.stage = next;
    }
}

impl<S> GenerationOrchestrator<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Live pricing handle; updates apply to the next request.
    pub fn pricing(&self) -> &DynamicConfig<PricingTable> {
        &self.pricing
    }

    /// Generate, check and store a learning plan.
    pub async fn generate_plan(&self, user: UserId, request: PlanRequest) -> Result<GenerationOutcome, GenerationError> {
        let valid = request.validate()?;
        let tier = valid.tier;
        let job = Job {
            kind: RequestKind::LearningPlan,
            cost: self.pricing.get().plan_cost(tier),
            prompt: plan_prompt(&valid),
            topic: valid.topic.to_string(),
            level: tier.as_str(),
            language: valid.language.code(),
        };
        self.run(user, job, move |reply| {
            let plan = LearningPlan::parse(reply)?;
            plan.validate(tier)?;
            Ok(ArtifactDocument::LearningPlan(plan))
        })
        .await
    }

    /// Generate, check and store a quiz.
    pub async fn generate_quiz(&self, user: UserId, request: QuizRequest) -> Result<GenerationOutcome, GenerationError> {
        let valid = request.validate()?;
        let job = Job {
            kind: RequestKind::Quiz,
            cost: self.pricing.get().quiz_cost(valid.difficulty),
            prompt: quiz_prompt(&valid),
            topic: valid.topic.to_string(),
            level: valid.difficulty.as_str(),
            language: valid.language.code(),
        };
        self.run(user, job, |reply| {
            let quiz = Quiz::parse(reply)?;
            quiz.validate()?;
            Ok(ArtifactDocument::Quiz(quiz))
        })
        .await
    }

    async fn run<F>(&self, user: UserId, job: Job, shape: F) -> Result<GenerationOutcome, GenerationError>
    where
        F: FnOnce(&str) -> Result<ArtifactDocument, ShapeError> + Send,
    {
        let started = Instant::now();
        let kind = job.kind;
        let mut saga = Saga { user, kind, stage: Stage::Validating };

        saga.advance(Stage::RateLimitChecking);
        match self.limiter.acquire(RateKey::new(user, kind)).await {
            Ok(Decision::Allowed { .. }) => {}
            Ok(Decision::Denied { wait, .. }) => {
                self.emit(GenerationEvent::RateLimited { user, kind, retry_after: wait }).await;
                return Err(GenerationError::RateLimited { retry_after: wait });
            }
            Err(e) => {
                tracing::warn!(
                    target: "studyforge::orchestrator",
                    user = %user,
                    kind = %kind,
                    error = %e,
                    "rate limiter unavailable; allowing request"
                );
                self.emit(GenerationEvent::LimiterUnavailable { user, kind }).await;
            }
        }

        saga.advance(Stage::Debiting);
        let new_credits = match self.ledger.debit(user, job.cost).await.map_err(GenerationError::Ledger)? {
            DebitOutcome::Debited { new_balance } => new_balance,
            DebitOutcome::Insufficient { available, required } => {
                self.emit(GenerationEvent::InsufficientCredits { user, kind, available, required }).await;
                return Err(GenerationError::InsufficientCredits { available, required });
            }
        };
        tracing::info!(
            target: "studyforge::ledger",
            user = %user,
            kind = %kind,
            amount = job.cost,
            balance = new_credits,
            "debited credits"
        );
        self.emit(GenerationEvent::Debited { user, kind, amount: job.cost, balance: new_credits }).await;

        saga.advance(Stage::Generating);
        let provider = self.provider.clone();
        let prompt = &job.prompt;
        let reply = match self.timeout.execute(|| provider.complete(prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(self.fail_provider(&mut saga, &job, e, started).await),
            Err(timed_out) => return Err(self.fail_provider(&mut saga, &job, timed_out.into(), started).await),
        };

        saga.advance(Stage::ValidatingResult);
        let document = match shape(&reply) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(target: "studyforge::orchestrator", user = %user, kind = %kind, error = %e, "rejected provider reply");
                let refunded = self.compensate(&mut saga, job.cost, started).await;
                return Err(GenerationError::MalformedResult { source: e, refunded });
            }
        };

        saga.advance(Stage::Persisting);
        let new = NewArtifact {
            user,
            topic: job.topic,
            level: job.level.to_string(),
            language: job.language.to_string(),
            credits_charged: job.cost,
            document,
        };
        let artifact = match self.store.insert(new, self.clock.now()).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(target: "studyforge::orchestrator", user = %user, kind = %kind, error = %e, "failed to persist artifact");
                let refunded = self.compensate(&mut saga, job.cost, started).await;
                return Err(GenerationError::Persistence { source: e, refunded });
            }
        };

        saga.advance(Stage::Done);
        self.emit(GenerationEvent::Completed {
            user,
            kind,
            artifact_id: artifact.id,
            credits_charged: job.cost,
            duration: started.elapsed(),
        })
        .await;
        Ok(GenerationOutcome { artifact, new_credits })
    }

    async fn fail_provider(&self, saga: &mut Saga, job: &Job, error: ProviderError, started: Instant) -> GenerationError {
        tracing::warn!(
            target: "studyforge::orchestrator",
            user = %saga.user,
            kind = %saga.kind,
            error = %error,
            "provider call failed"
        );
        let refunded = self.compensate(saga, job.cost, started).await;
        GenerationError::Provider { source: error, refunded }
    }

    /// Put `amount` back after a post-debit failure. Returns whether the refund landed.
    async fn compensate(&self, saga: &mut Saga, amount: u32, started: Instant) -> bool {
        let failed_at = saga.stage;
        saga.advance(Stage::ErrorRefunding);
        let (user, kind) = (saga.user, saga.kind);

        let refunded = match self.ledger.refund(user, amount).await {
            Ok(balance) => {
                tracing::info!(target: "studyforge::ledger", user = %user, amount, balance, stage = %failed_at, "refunded credits");
                self.emit(GenerationEvent::Refunded { user, kind, amount, balance, stage: failed_at }).await;
                true
            }
            Err(e) => {
                tracing::error!(
                    target: "studyforge::ledger",
                    user = %user,
                    kind = %kind,
                    amount,
                    stage = %failed_at,
                    error = %e,
                    "refund failed; account needs reconciliation"
                );
                self.emit(GenerationEvent::RefundFailed { user, kind, amount, stage: failed_at, error: e.to_string() })
                    .await;
                false
            }
        };
        self.emit(GenerationEvent::Failed { user, kind, stage: failed_at, duration: started.elapsed() }).await;
        refunded
    }

    async fn emit(&self, event: GenerationEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CreditAccount, InMemoryLedger, LedgerError, ResetOutcome};
    use crate::provider::StaticProvider;
    use crate::rate_limit::store::InMemoryRequestLog;
    use crate::rate_limit::strategies::SlidingWindowLimiter;
    use crate::rate_limit::RateLimitError;
    use crate::request::{Budget, Difficulty, Language, LearningStyle, PlanTier};
    use crate::store::{InMemoryArtifactStore, StoreError};
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;
    use uuid::Uuid;

    const QUIZ: &str = r#"{"title":"Rust","questions":[{"prompt":"Borrow?","options":["a","b"],"answerIndex":0}]}"#;

    fn plan_reply(resources: usize) -> String {
        let resources: Vec<_> = (0..resources)
            .map(|i| serde_json::json!({"title": format!("R{i}"), "url": format!("https://example.com/{i}")}))
            .collect();
        serde_json::json!({
            "title": "Rust",
            "overview": "",
            "phases": [{"title": "Basics", "description": "", "resources": resources}]
        })
        .to_string()
    }

    fn plan_request(topic: &str, tier: PlanTier) -> PlanRequest {
        PlanRequest {
            topic: topic.into(),
            selected_tier: tier,
            language: Language::En,
            budget: Budget::Free,
            learning_style: LearningStyle::Mixed,
        }
    }

    fn quiz_request() -> QuizRequest {
        QuizRequest { topic: "Rust".into(), difficulty: Difficulty::Medium, language: Language::En }
    }

    struct Fixture {
        ledger: InMemoryLedger,
        store: InMemoryArtifactStore,
        sink: MemorySink,
        user: UserId,
    }

    impl Fixture {
        fn new(balance: u32) -> Self {
            let ledger = InMemoryLedger::new(400);
            let user = UserId::new();
            ledger.insert_account(user, balance, Utc::now());
            Self { ledger, store: InMemoryArtifactStore::new(), sink: MemorySink::new(), user }
        }

        fn orchestrator<P: GenerationProvider + 'static>(&self, provider: P) -> GenerationOrchestrator<MemorySink> {
            GenerationOrchestrator::builder()
                .ledger(self.ledger.clone())
                .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()).with_cleanup_probability(0.0))
                .store(self.store.clone())
                .provider(provider)
                .sink(self.sink.clone())
                .build()
                .unwrap()
        }

        async fn balance(&self) -> u32 {
            self.ledger.account(self.user).await.unwrap().credits
        }
    }

    #[test]
    fn stage_transitions() {
        assert!(Stage::Validating.can_transition_to(Stage::RateLimitChecking));
        assert!(Stage::Persisting.can_transition_to(Stage::ErrorRefunding));
        assert!(!Stage::Debiting.can_transition_to(Stage::ErrorRefunding));
        assert!(!Stage::Validating.can_transition_to(Stage::Debiting));
        assert!(!Stage::Done.can_transition_to(Stage::ErrorRefunding));
        assert!(Stage::ValidatingResult.holds_debit());
        assert!(!Stage::RateLimitChecking.holds_debit());
    }

    #[test]
    fn builder_requires_collaborators() {
        let err = GenerationOrchestrator::builder().build().unwrap_err();
        assert_eq!(err, BuildError::Missing("ledger"));
    }

    #[tokio::test]
    async fn successful_quiz_debits_and_persists() {
        let fx = Fixture::new(400);
        let orch = fx.orchestrator(StaticProvider::new(QUIZ));

        let outcome = orch.generate_quiz(fx.user, quiz_request()).await.unwrap();
        assert_eq!(outcome.new_credits, 385);
        assert_eq!(outcome.artifact.credits_charged, 15);
        assert_eq!(outcome.artifact.level, "medium");
        assert_eq!(fx.balance().await, 385);
        assert_eq!(fx.store.count(fx.user, RequestKind::Quiz), 1);
        assert!(matches!(fx.sink.events().last(), Some(GenerationEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn premium_plan_without_enough_credits_is_402() {
        let fx = Fixture::new(100);
        let provider = StaticProvider::new(plan_reply(5));
        let orch = fx.orchestrator(provider.clone());

        let err = orch.generate_plan(fx.user, plan_request("Rust", PlanTier::Premium)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InsufficientCredits { available: 100, required: 120 }));
        assert_eq!(err.status_code(), 402);
        assert_eq!(fx.balance().await, 100);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn provider_failure_refunds_and_persists_nothing() {
        let fx = Fixture::new(150);
        let orch = fx.orchestrator(StaticProvider::failing("upstream 503"));

        let err = orch.generate_plan(fx.user, plan_request("Rust", PlanTier::Premium)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider { refunded: true, .. }));
        assert_eq!(fx.balance().await, 150);
        assert_eq!(fx.store.count(fx.user, RequestKind::LearningPlan), 0);

        let events = fx.sink.events();
        assert!(events.iter().any(|e| matches!(e, GenerationEvent::Refunded { amount: 120, balance: 150, .. })));
    }

    #[tokio::test]
    async fn too_many_subtopics_are_rejected_before_credits_move() {
        let fx = Fixture::new(400);
        let provider = StaticProvider::new(plan_reply(3));
        let orch = fx.orchestrator(provider.clone());

        let err = orch.generate_plan(fx.user, plan_request("JS, React, Node, Vue", PlanTier::Basic)).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(fx.balance().await, 400);
        assert_eq!(provider.calls(), 0);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_plan_is_refunded() {
        let fx = Fixture::new(400);
        // Premium needs five resources per phase.
        let orch = fx.orchestrator(StaticProvider::new(plan_reply(3)));

        let err = orch.generate_plan(fx.user, plan_request("Rust", PlanTier::Premium)).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::MalformedResult { source: ShapeError::MissingResources { .. }, refunded: true }
        ));
        assert_eq!(fx.balance().await, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_timeout_is_refunded() {
        let fx = Fixture::new(400);
        let orch = GenerationOrchestrator::builder()
            .ledger(fx.ledger.clone())
            .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()).with_cleanup_probability(0.0))
            .store(fx.store.clone())
            .provider(StaticProvider::new(QUIZ).with_delay(Duration::from_secs(120)))
            .with_timeout(TimeoutPolicy::new(Duration::from_secs(60)).unwrap())
            .build()
            .unwrap();

        let err = orch.generate_quiz(fx.user, quiz_request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider { source: ProviderError::Timeout(_), refunded: true }));
        assert_eq!(fx.balance().await, 400);
    }

    #[tokio::test]
    async fn rate_limit_blocks_before_debit() {
        let fx = Fixture::new(400);
        let orch = fx.orchestrator(StaticProvider::new(plan_reply(3)));

        for _ in 0..5 {
            orch.generate_plan(fx.user, plan_request("Rust", PlanTier::Basic)).await.unwrap();
        }
        let err = orch.generate_plan(fx.user, plan_request("Rust", PlanTier::Basic)).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.retry_after().unwrap() >= Duration::from_secs(1));
        assert_eq!(fx.balance().await, 400 - 5 * 40);
    }

    #[derive(Debug)]
    struct BrokenLimiter;

    #[async_trait]
    impl RateLimiter for BrokenLimiter {
        async fn acquire(&self, _key: RateKey) -> Result<Decision, RateLimitError> {
            Err(RateLimitError::Store(Box::new(std::io::Error::new(std::io::ErrorKind::Other, "db down"))))
        }
    }

    #[tokio::test]
    async fn limiter_outage_fails_open() {
        let fx = Fixture::new(400);
        let orch = GenerationOrchestrator::builder()
            .ledger(fx.ledger.clone())
            .limiter(BrokenLimiter)
            .store(fx.store.clone())
            .provider(StaticProvider::new(QUIZ))
            .sink(fx.sink.clone())
            .build()
            .unwrap();

        orch.generate_quiz(fx.user, quiz_request()).await.unwrap();
        assert!(matches!(fx.sink.events()[0], GenerationEvent::LimiterUnavailable { .. }));
    }

    struct RejectingStore;

    #[async_trait]
    impl ArtifactStore for RejectingStore {
        async fn insert(&self, _a: NewArtifact, _now: DateTime<Utc>) -> Result<StoredArtifact, StoreError> {
            Err(StoreError::backend(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn list(&self, _u: UserId, _k: RequestKind) -> Result<Vec<StoredArtifact>, StoreError> {
            Ok(Vec::new())
        }
        async fn get(&self, _u: UserId, id: Uuid) -> Result<StoredArtifact, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn delete(&self, _u: UserId, _id: Uuid) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn attach_score(&self, _u: UserId, id: Uuid, _s: u32) -> Result<StoredArtifact, StoreError> {
            Err(StoreError::NotFound(id))
        }
    }

    /// Ledger whose refunds always fail.
    #[derive(Clone)]
    struct NoRefundLedger(InMemoryLedger);

    #[async_trait]
    impl CreditLedger for NoRefundLedger {
        async fn ensure_account(&self, user: UserId, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError> {
            self.0.ensure_account(user, now).await
        }
        async fn account(&self, user: UserId) -> Result<CreditAccount, LedgerError> {
            self.0.account(user).await
        }
        async fn debit(&self, user: UserId, amount: u32) -> Result<DebitOutcome, LedgerError> {
            self.0.debit(user, amount).await
        }
        async fn refund(&self, _user: UserId, _amount: u32) -> Result<u32, LedgerError> {
            Err(LedgerError::backend(std::io::Error::new(std::io::ErrorKind::Other, "connection reset")))
        }
        async fn reset_if_new_month(&self, user: UserId, now: DateTime<Utc>) -> Result<ResetOutcome, LedgerError> {
            self.0.reset_if_new_month(user, now).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_refunds() {
        let fx = Fixture::new(400);
        let orch = GenerationOrchestrator::builder()
            .ledger(fx.ledger.clone())
            .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()))
            .store(RejectingStore)
            .provider(StaticProvider::new(QUIZ))
            .build()
            .unwrap();

        let err = orch.generate_quiz(fx.user, quiz_request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Persistence { refunded: true, .. }));
        assert_eq!(fx.balance().await, 400);
    }

    #[tokio::test]
    async fn refund_failure_keeps_original_error() {
        let fx = Fixture::new(400);
        let orch = GenerationOrchestrator::builder()
            .ledger(NoRefundLedger(fx.ledger.clone()))
            .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()))
            .store(fx.store.clone())
            .provider(StaticProvider::failing("boom"))
            .sink(fx.sink.clone())
            .build()
            .unwrap();

        let err = orch.generate_quiz(fx.user, quiz_request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider { refunded: false, .. }));
        assert_eq!(err.status_code(), 500);
        assert_eq!(fx.balance().await, 385, "lost refund is not retried");
        assert!(fx
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::RefundFailed { amount: 15, stage: Stage::Generating, .. })));
    }

    #[tokio::test]
    async fn pricing_updates_apply_to_next_request() {
        let fx = Fixture::new(400);
        let orch = fx.orchestrator(StaticProvider::new(QUIZ));
        orch.pricing().update(|p| PricingTable { medium_quiz: 50, ..*p });

        let outcome = orch.generate_quiz(fx.user, quiz_request()).await.unwrap();
        assert_eq!(outcome.new_credits, 350);
    }
}
