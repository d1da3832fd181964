use prometheus::Registry;
use std::time::Duration;
use studyforge::orchestrator::Stage;
use studyforge::request::{RequestKind, UserId};
use studyforge::telemetry::GenerationEvent;
use studyforge_prometheus::PrometheusSink;
use tower_service::Service;

fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> f64 {
    let families = registry.gather();
    let Some(family) = families.iter().find(|mf| mf.get_name() == name) else {
        return 0.0;
    };
    family
        .get_metric()
        .iter()
        .find(|m| {
            labels.iter().all(|(k, v)| m.get_label().iter().any(|l| l.get_name() == *k && l.get_value() == *v))
        })
        .and_then(|m| m.get_counter().as_ref().map(|c| c.value()))
        .unwrap_or(0.0)
}

#[tokio::test]
async fn events_are_counted_by_name_and_kind() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::new(registry.clone()).expect("sink");
    let user = UserId::new();

    for _ in 0..2 {
        sink.call(GenerationEvent::RateLimited {
            user,
            kind: RequestKind::Quiz,
            retry_after: Duration::from_secs(30),
        })
        .await
        .unwrap();
    }
    sink.call(GenerationEvent::Failed {
        user,
        kind: RequestKind::LearningPlan,
        stage: Stage::Generating,
        duration: Duration::from_millis(5),
    })
    .await
    .unwrap();

    assert_eq!(
        counter_value(&registry, "studyforge_events_total", &[("event", "rate_limited"), ("kind", "quiz")]),
        2.0
    );
    assert_eq!(
        counter_value(&registry, "studyforge_events_total", &[("event", "failed"), ("kind", "learning_plan")]),
        1.0
    );
}

#[tokio::test]
async fn credit_movements_are_summed() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::new(registry.clone()).expect("sink");
    let user = UserId::new();
    let kind = RequestKind::LearningPlan;

    sink.call(GenerationEvent::Debited { user, kind, amount: 120, balance: 280 }).await.unwrap();
    sink.call(GenerationEvent::Refunded { user, kind, amount: 120, balance: 400, stage: Stage::Generating })
        .await
        .unwrap();
    sink.call(GenerationEvent::Debited { user, kind, amount: 40, balance: 360 }).await.unwrap();
    sink.call(GenerationEvent::RefundFailed {
        user,
        kind,
        amount: 40,
        stage: Stage::Persisting,
        error: "db down".into(),
    })
    .await
    .unwrap();

    let value = |direction| {
        counter_value(&registry, "studyforge_credits_total", &[("direction", direction), ("kind", "learning_plan")])
    };
    assert_eq!(value("debited"), 160.0);
    assert_eq!(value("refunded"), 120.0);
    assert_eq!(value("unrefunded"), 40.0);
}

#[test]
fn registering_twice_is_an_error() {
    let registry = Registry::new();
    let _first = PrometheusSink::new(registry.clone()).expect("first");
    assert!(PrometheusSink::new(registry).is_err());
}
