//! Shared handler state.

use crate::auth::Authenticator;
use axum::extract::FromRef;
use std::sync::Arc;
use studyforge::adaptive::DynamicConfig;
use studyforge::clock::Clock;
use studyforge::consent::{AudienceProvider, ConsentService, ConsentStore, InMemoryConsentStore};
use studyforge::credits::CreditService;
use studyforge::ledger::{CreditLedger, InMemoryLedger};
use studyforge::orchestrator::{BuildError, GenerationOrchestrator};
use studyforge::provider::GenerationProvider;
use studyforge::rate_limit::store::{InMemoryRequestLog, RequestLog};
use studyforge::rate_limit::strategies::SlidingWindowLimiter;
use studyforge::rate_limit::RateLimiter;
use studyforge::settings::Settings;
use studyforge::store::{ArtifactStore, InMemoryArtifactStore};
use studyforge::telemetry::TelemetrySink;
use studyforge::timeout::TimeoutError;
use studyforge_postgres::{PgArtifactStore, PgConsentStore, PgLedger, PgPool, PgRequestLog};

/// The four storage-backed collaborators.
#[derive(Clone)]
pub struct Backends {
    pub ledger: Arc<dyn CreditLedger>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub consent: Arc<dyn ConsentStore>,
}

fn limiter<L, C>(log: L, settings: &Settings, clock: C) -> Arc<dyn RateLimiter>
where
    L: RequestLog + 'static,
    C: Clock + 'static,
{
    Arc::new(
        SlidingWindowLimiter::new(log)
            .with_rules(DynamicConfig::new(settings.rate_limits))
            .with_cleanup_probability(settings.cleanup_probability)
            .with_clock(clock),
    )
}

impl Backends {
    /// Process-local storage; everything is lost on restart.
    pub fn in_memory<C: Clock + Clone + 'static>(settings: &Settings, clock: C) -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new(settings.pricing.monthly_allotment)),
            artifacts: Arc::new(InMemoryArtifactStore::with_cap(settings.artifact_cap)),
            limiter: limiter(InMemoryRequestLog::new(), settings, clock),
            consent: Arc::new(InMemoryConsentStore::new()),
        }
    }

    pub fn postgres<C: Clock + Clone + 'static>(pool: PgPool, settings: &Settings, clock: C) -> Self {
        Self {
            ledger: Arc::new(PgLedger::new(pool.clone(), settings.pricing.monthly_allotment)),
            artifacts: Arc::new(PgArtifactStore::with_cap(pool.clone(), settings.artifact_cap)),
            limiter: limiter(PgRequestLog::new(pool.clone()), settings, clock),
            consent: Arc::new(PgConsentStore::new(pool)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("invalid provider timeout: {0}")]
    Timeout(#[from] TimeoutError),
}

/// Everything a handler needs. Cheap to clone.
pub struct AppState<S> {
    pub orchestrator: GenerationOrchestrator<S>,
    pub credits: CreditService,
    pub consent: ConsentService,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub auth: Authenticator,
    /// Served at `/metrics` when set.
    pub metrics: Option<prometheus::Registry>,
}

impl<S: Clone> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            credits: self.credits.clone(),
            consent: self.consent.clone(),
            artifacts: Arc::clone(&self.artifacts),
            auth: self.auth.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> FromRef<AppState<S>> for Authenticator {
    fn from_ref(state: &AppState<S>) -> Self {
        state.auth.clone()
    }
}

impl<S: TelemetrySink> AppState<S> {
    pub fn new<C: Clock + Clone + 'static>(
        settings: &Settings,
        backends: Backends,
        provider: Arc<dyn GenerationProvider>,
        audience: Arc<dyn AudienceProvider>,
        sink: S,
        clock: C,
    ) -> Result<Self, StateError> {
        let orchestrator = GenerationOrchestrator::builder()
            .shared_ledger(Arc::clone(&backends.ledger))
            .shared_limiter(backends.limiter)
            .shared_store(Arc::clone(&backends.artifacts))
            .shared_provider(provider)
            .with_clock(clock.clone())
            .with_pricing(DynamicConfig::new(settings.pricing))
            .with_timeout(settings.provider.timeout()?)
            .sink(sink)
            .build()?;
        Ok(Self {
            orchestrator,
            credits: CreditService::new(backends.ledger).with_clock(clock.clone()),
            consent: ConsentService::new(backends.consent, audience).with_clock(clock),
            artifacts: backends.artifacts,
            auth: Authenticator::new(&settings.auth.jwt_secret),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, registry: prometheus::Registry) -> Self {
        self.metrics = Some(registry);
        self
    }
}
