use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use studyforge::clock::ManualClock;
use studyforge::consent::NoopAudience;
use studyforge::ledger::InMemoryLedger;
use studyforge::provider::StaticProvider;
use studyforge::request::UserId;
use studyforge::settings::Settings;
use studyforge::telemetry::{GenerationEvent, MemorySink};
use studyforge_server::{router, AppState, Backends, Claims};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

const QUIZ_REPLY: &str = r#"{"title":"Rust","questions":[
    {"prompt":"Who owns a moved value?","options":["the caller","the callee"],"answerIndex":1,"explanation":"Moves transfer ownership."}
]}"#;

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
}

struct Harness {
    app: Router,
    ledger: InMemoryLedger,
    clock: ManualClock,
    audience: NoopAudience,
    sink: MemorySink,
}

fn harness(provider: StaticProvider, configure: impl FnOnce(&mut Settings)) -> Harness {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = SECRET.into();
    settings.cleanup_probability = 0.0;
    configure(&mut settings);

    let clock = ManualClock::new(at(1, 10));
    let ledger = InMemoryLedger::new(settings.pricing.monthly_allotment);
    let backends = Backends { ledger: Arc::new(ledger.clone()), ..Backends::in_memory(&settings, clock.clone()) };
    let audience = NoopAudience::default();
    let sink = MemorySink::new();
    let state = AppState::new(
        &settings,
        backends,
        Arc::new(provider),
        Arc::new(audience.clone()),
        sink.clone(),
        clock.clone(),
    )
    .unwrap();
    Harness { app: router(state), ledger, clock, audience, sink }
}

fn token(user: UserId, email: Option<&str>) -> String {
    let claims = Claims {
        sub: user.to_string(),
        email: email.map(str::to_string),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, headers, value)
}

fn quiz_body() -> Value {
    json!({"topic": "Rust ownership", "difficulty": "medium", "language": "en"})
}

fn premium_plan_body(topic: &str) -> Value {
    json!({"topic": topic, "selectedTier": "premium", "language": "en", "budget": "free", "learningStyle": "mixed"})
}

#[tokio::test]
async fn health_needs_no_token() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let (status, _, body) = call(&h.app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_forged_tokens_are_unauthorized() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let (status, _, body) = call(&h.app, Method::POST, "/generate-quiz", None, Some(quiz_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _, _) = call(&h.app, Method::GET, "/profile", Some("not.a.jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn quiz_generation_debits_and_stores() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();
    let token = token(user, None);

    let (status, _, body) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["newCredits"], 385);
    assert_eq!(body["quiz"]["kind"], "quiz");
    assert_eq!(body["quiz"]["document"]["content"]["questions"][0]["answerIndex"], 1);

    let (_, _, quizzes) = call(&h.app, Method::GET, "/quizzes", Some(&token), None).await;
    assert_eq!(quizzes.as_array().unwrap().len(), 1);

    let (_, _, profile) = call(&h.app, Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(profile["credits"], 385);
    assert!(profile["lastCreditReset"].is_string());
}

#[tokio::test]
async fn insufficient_credits_is_payment_required() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();
    h.ledger.insert_account(user, 100, at(1, 1));

    let (status, _, body) =
        call(&h.app, Method::POST, "/generate-learning-plan", Some(&token(user, None)), Some(premium_plan_body("Rust"))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["available_credits"], 100);
    assert_eq!(body["required_credits"], 120);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_topic_is_rejected_before_any_debit() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();
    let token = token(user, None);

    let (status, _, body) =
        call(&h.app, Method::POST, "/generate-learning-plan", Some(&token), Some(premium_plan_body("JS, React, Node, Vue"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("at most 3"));

    let (status, _, _) = call(
        &h.app,
        Method::POST,
        "/generate-quiz",
        Some(&token),
        Some(json!({"topic": "Rust", "difficulty": "impossible", "language": "en"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, profile) = call(&h.app, Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(profile["credits"], 400);
}

#[tokio::test]
async fn rate_limited_requests_carry_retry_after() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |s| s.rate_limits.quiz.max_requests = 1);
    let token = token(UserId::new(), None);

    let (first, _, _) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    assert_eq!(first, StatusCode::OK);

    let (status, headers, body) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "3600");
    assert_eq!(body["retryAfter"], 3600);
}

#[tokio::test]
async fn provider_failure_is_refunded() {
    let h = harness(StaticProvider::failing("upstream down"), |_| {});
    let user = UserId::new();
    h.ledger.insert_account(user, 150, at(1, 1));

    let (status, _, body) =
        call(&h.app, Method::POST, "/generate-learning-plan", Some(&token(user, None)), Some(premium_plan_body("Rust"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["refunded"], true);

    let (_, _, profile) = call(&h.app, Method::GET, "/profile", Some(&token(user, None)), None).await;
    assert_eq!(profile["credits"], 150);
    assert!(h.sink.events().iter().any(|e| matches!(e, GenerationEvent::Refunded { amount: 120, .. })));
}

#[tokio::test]
async fn consent_reports_each_write() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();

    let (status, _, _) = call(
        &h.app,
        Method::POST,
        "/manage-marketing-consent",
        Some(&token(user, Some("a@example.com"))),
        Some(json!({"action": "revoke", "consentText": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, body) = call(
        &h.app,
        Method::POST,
        "/manage-marketing-consent",
        Some(&token(user, Some("a@example.com"))),
        Some(json!({"action": "grant", "consentText": "Send me study tips"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["database"]["success"], true);
    assert_eq!(body["resend"]["success"], true);
    assert_eq!(h.audience.calls(), vec![("a@example.com".to_string(), true)]);

    let (status, _, body) = call(
        &h.app,
        Method::POST,
        "/manage-marketing-consent",
        Some(&token(user, None)),
        Some(json!({"action": "revoke", "consentText": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["database"]["success"], true);
    assert_eq!(body["resend"]["success"], false);
}

#[tokio::test]
async fn reset_credits_once_per_month() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();
    let token = token(user, None);
    h.ledger.insert_account(user, 25, at(1, 2));

    let (status, _, body) = call(&h.app, Method::POST, "/reset-credits", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["credits"], 25);
    assert_eq!(body["monthsUntilReset"], 1);
    assert!(body.get("resetDate").is_none());

    h.clock.set(at(2, 1));
    let (_, _, body) = call(&h.app, Method::POST, "/reset-credits", Some(&token), None).await;
    assert_eq!(body["credits"], 400);
    assert!(body["resetDate"].is_string());

    let (_, _, body) = call(&h.app, Method::POST, "/reset-credits", Some(&token), None).await;
    assert!(body.get("resetDate").is_none());
}

#[tokio::test]
async fn first_generation_of_a_new_month_gets_the_allotment() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let user = UserId::new();
    let token = token(user, None);
    h.ledger.insert_account(user, 0, at(1, 5));

    let (status, _, _) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    h.clock.set(at(2, 3));
    let (status, _, body) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["newCredits"], 385);
}

#[tokio::test]
async fn quizzes_can_be_scored_and_deleted() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let token = token(UserId::new(), None);
    let (_, _, body) = call(&h.app, Method::POST, "/generate-quiz", Some(&token), Some(quiz_body())).await;
    let id = body["quiz"]["id"].as_str().unwrap().to_string();

    let (status, _, scored) =
        call(&h.app, Method::POST, &format!("/quizzes/{id}/score"), Some(&token), Some(json!({"score": 90}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scored["score"], 90);

    let (status, _, _) =
        call(&h.app, Method::POST, &format!("/quizzes/{id}/score"), Some(&token), Some(json!({"score": 101}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = call(&h.app, Method::DELETE, &format!("/learning-plans/{id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = call(&h.app, Method::DELETE, &format!("/quizzes/{id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = call(&h.app, Method::DELETE, &format!("/quizzes/{}", Uuid::new_v4()), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_are_disabled_without_a_registry() {
    let h = harness(StaticProvider::new(QUIZ_REPLY), |_| {});
    let (status, _, _) = call(&h.app, Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
