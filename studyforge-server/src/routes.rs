//! Route table and handlers.

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use studyforge::artifact::StoredArtifact;
use studyforge::consent::{ConsentReport, ConsentRequest};
use studyforge::credits::ResetReport;
use studyforge::request::{PlanRequest, QuizRequest, RequestKind, ValidationError};
use studyforge::telemetry::TelemetrySink;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Build the service router.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics::<S>))
        .route("/profile", get(profile::<S>))
        .route("/generate-learning-plan", post(generate_learning_plan::<S>))
        .route("/generate-quiz", post(generate_quiz::<S>))
        .route("/manage-marketing-consent", post(manage_marketing_consent::<S>))
        .route("/reset-credits", post(reset_credits::<S>))
        .route("/learning-plans", get(list_learning_plans::<S>))
        .route("/learning-plans/:id", delete(delete_learning_plan::<S>))
        .route("/quizzes", get(list_quizzes::<S>))
        .route("/quizzes/:id", delete(delete_quiz::<S>))
        .route("/quizzes/:id/score", post(score_quiz::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

fn malformed(rejection: JsonRejection) -> ApiError {
    ApiError::Generation(ValidationError::Malformed(rejection.body_text()).into())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics<S>(State(state): State<AppState<S>>) -> Result<Response, ApiError> {
    use prometheus::Encoder;

    let registry = state.metrics.as_ref().ok_or_else(|| ApiError::NotFound("metrics are disabled".into()))?;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buf) {
        tracing::warn!(target: "studyforge::server", error = %e, "failed to encode metrics");
        return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }
    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    credits: u32,
    last_credit_reset: DateTime<Utc>,
}

async fn profile<S>(State(state): State<AppState<S>>, user: AuthUser) -> Result<Json<ProfileBody>, ApiError> {
    let account = state.credits.profile(user.id).await?;
    Ok(Json(ProfileBody { credits: account.credits, last_credit_reset: account.last_credit_reset }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanBody {
    plan: StoredArtifact,
    new_credits: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuizBody {
    quiz: StoredArtifact,
    new_credits: u32,
}

async fn generate_learning_plan<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    body: Result<Json<PlanRequest>, JsonRejection>,
) -> Result<Json<PlanBody>, ApiError>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    let Json(request) = body.map_err(malformed)?;
    // first access creates the account with the monthly allotment
    state.credits.profile(user.id).await?;
    let outcome = state.orchestrator.generate_plan(user.id, request).await?;
    Ok(Json(PlanBody { plan: outcome.artifact, new_credits: outcome.new_credits }))
}

async fn generate_quiz<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    body: Result<Json<QuizRequest>, JsonRejection>,
) -> Result<Json<QuizBody>, ApiError>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    let Json(request) = body.map_err(malformed)?;
    state.credits.profile(user.id).await?;
    let outcome = state.orchestrator.generate_quiz(user.id, request).await?;
    Ok(Json(QuizBody { quiz: outcome.artifact, new_credits: outcome.new_credits }))
}

async fn manage_marketing_consent<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    body: Result<Json<ConsentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConsentReport>), ApiError> {
    let Json(request) = body.map_err(|r| ApiError::BadRequest(r.body_text()))?;
    let report = state.consent.apply(user.id, user.email.as_deref(), request).await?;
    let status = StatusCode::from_u16(report.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(report)))
}

#[derive(Debug, Serialize)]
struct ResetBody {
    success: bool,
    #[serde(flatten)]
    report: ResetReport,
}

async fn reset_credits<S>(State(state): State<AppState<S>>, user: AuthUser) -> Result<Json<ResetBody>, ApiError> {
    let report = state.credits.reset_credits(user.id).await?;
    Ok(Json(ResetBody { success: true, report }))
}

async fn list_learning_plans<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
) -> Result<Json<Vec<StoredArtifact>>, ApiError> {
    Ok(Json(state.artifacts.list(user.id, RequestKind::LearningPlan).await?))
}

async fn list_quizzes<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
) -> Result<Json<Vec<StoredArtifact>>, ApiError> {
    Ok(Json(state.artifacts.list(user.id, RequestKind::Quiz).await?))
}

/// Delete `id` if it belongs to `user` and is of `kind`.
async fn delete_of_kind<S>(state: &AppState<S>, user: &AuthUser, id: Uuid, kind: RequestKind) -> Result<StatusCode, ApiError> {
    let existing = state.artifacts.get(user.id, id).await?;
    if existing.kind != kind {
        return Err(ApiError::NotFound(format!("no {kind} with id {id}")));
    }
    if state.artifacts.delete(user.id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no {kind} with id {id}")))
    }
}

async fn delete_learning_plan<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    delete_of_kind(&state, &user, id, RequestKind::LearningPlan).await
}

async fn delete_quiz<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    delete_of_kind(&state, &user, id, RequestKind::Quiz).await
}

#[derive(Debug, Deserialize)]
struct ScoreBody {
    score: u32,
}

async fn score_quiz<S>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Result<Json<ScoreBody>, JsonRejection>,
) -> Result<Json<StoredArtifact>, ApiError> {
    let Json(ScoreBody { score }) = body.map_err(|r| ApiError::BadRequest(r.body_text()))?;
    Ok(Json(state.artifacts.attach_score(user.id, id, score).await?))
}
