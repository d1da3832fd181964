//! Compile-time prelude coverage test.
use std::sync::Arc;
use studyforge::prelude::*;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let ledger = InMemoryLedger::default();
    let user = UserId::new();
    ledger.ensure_account(user, chrono::Utc::now()).await.unwrap();

    let orchestrator: GenerationOrchestrator<NullSink> = GenerationOrchestrator::builder()
        .ledger(ledger.clone())
        .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()))
        .store(InMemoryArtifactStore::new())
        .provider(StaticProvider::failing("offline"))
        .with_timeout(TimeoutPolicy::new(MAX_TIMEOUT).unwrap())
        .build()
        .unwrap();
    let _ = orchestrator.pricing().get();

    let credits = CreditService::new(Arc::new(ledger));
    assert_eq!(credits.profile(user).await.unwrap().credits, PricingTable::default().monthly_allotment);
    assert_eq!(Stage::Validating.as_str(), "validating");
}
