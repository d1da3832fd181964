use chrono::{DateTime, TimeZone, Utc};
use studyforge::prelude::*;
use studyforge::request::{Budget, LearningStyle};

pub const QUIZ_REPLY: &str = r#"{"title":"Rust","questions":[
    {"prompt":"Who owns a moved value?","options":["the caller","the callee"],"answerIndex":1,"explanation":"Moves transfer ownership."}
]}"#;

pub fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
}

/// A plan reply with `phases` phases of `resources` resources each.
pub fn plan_reply(phases: usize, resources: usize) -> String {
    let phases: Vec<_> = (0..phases)
        .map(|p| {
            let resources: Vec<_> = (0..resources)
                .map(|r| {
                    serde_json::json!({
                        "title": format!("Resource {r}"),
                        "url": format!("https://example.com/phase/{p}/{r}"),
                        "kind": "article"
                    })
                })
                .collect();
            serde_json::json!({"title": format!("Phase {p}"), "description": "", "durationWeeks": 2, "resources": resources})
        })
        .collect();
    serde_json::json!({"title": "Plan", "overview": "Overview", "phases": phases}).to_string()
}

pub fn plan_request(topic: &str, tier: PlanTier) -> PlanRequest {
    PlanRequest {
        topic: topic.into(),
        selected_tier: tier,
        language: Language::En,
        budget: Budget::Free,
        learning_style: LearningStyle::Mixed,
    }
}

pub fn quiz_request(topic: &str, difficulty: Difficulty) -> QuizRequest {
    QuizRequest { topic: topic.into(), difficulty, language: Language::En }
}

/// Orchestrator over in-memory backends driven by `clock`.
pub fn orchestrator(
    ledger: &InMemoryLedger,
    store: &InMemoryArtifactStore,
    provider: StaticProvider,
    clock: &ManualClock,
    sink: &MemorySink,
) -> GenerationOrchestrator<MemorySink> {
    GenerationOrchestrator::builder()
        .ledger(ledger.clone())
        .limiter(
            SlidingWindowLimiter::new(InMemoryRequestLog::new())
                .with_clock(clock.clone())
                .with_cleanup_probability(0.0),
        )
        .store(store.clone())
        .provider(provider)
        .with_clock(clock.clone())
        .sink(sink.clone())
        .build()
        .unwrap()
}
