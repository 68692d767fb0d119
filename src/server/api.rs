use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::audit::{AuditMode, AuditPipeline, AuditRequest, MemoryContext, Verdict};
use crate::dispatch::CodeHost;
use crate::errors::{PipelineError, ValidationError};
use crate::ingest::{IngestRequest, IngestionPipeline};
use crate::reasoning::{ContinuationToken, MediaRef};
use crate::store::ContinuationStore;

/// Upper bound for a meeting upload.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Pull-request actions that trigger an audit.
const AUDITED_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "ready_for_review"];

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub ingest: IngestionPipeline,
    pub audit: AuditPipeline,
    pub store: Arc<dyn ContinuationStore>,
    pub code_host: Arc<dyn CodeHost>,
    pub default_project: String,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPrRequest {
    #[serde(alias = "prDiff")]
    pub diff: Option<String>,
    pub repo: Option<String>,
    #[serde(default, alias = "prNumber", deserialize_with = "change_number")]
    pub change_number: Option<u64>,
    #[serde(alias = "thoughtSignature")]
    pub continuation_token: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullRequestPayload {
    pub number: Option<u64>,
    pub diff_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: Option<String>,
}

/// A `pull_request` event, plus the flat fields used for manual testing.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookRequest {
    pub action: Option<String>,
    pub pull_request: Option<PullRequestPayload>,
    pub repository: Option<RepositoryPayload>,
    #[serde(alias = "prDiff")]
    pub diff: Option<String>,
    #[serde(alias = "repoName")]
    pub repo: Option<String>,
    #[serde(default, alias = "prNumber", alias = "changeNumber", deserialize_with = "change_number")]
    pub number: Option<u64>,
    pub project: Option<String>,
}

/// Accept a change number as a JSON number or a numeric string.
fn change_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMeetingResponse {
    pub text: String,
    pub signature: Option<ContinuationToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub tickets_created: usize,
    pub tickets_failed: usize,
    pub notification_sent: bool,
    pub requirements: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub success: bool,
    pub review: String,
    pub downstream_status: &'static str,
    pub memory: MemoryContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Validation(ValidationError),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({"error": msg})),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": err.to_string(),
                    "debug": {
                        "hasDiff": !err.is_missing("diff"),
                        "hasRepo": !err.is_missing("repo"),
                        "hasChangeNumber": !err.is_missing("changeNumber"),
                    }
                }),
            ),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, json!({"error": msg})),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(err) => ApiError::Validation(err),
            PipelineError::Engine(err) => ApiError::Upstream(err.to_string()),
            PipelineError::Store(err) => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/process-meeting",
            post(process_meeting).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/review-pr", post(review_pr))
        .route("/api/github-webhook", post(github_webhook))
        .route("/api/projects/{id}/state", get(get_project_state))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn process_meeting(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut text = None;
    let mut media = None;
    let mut signature = None;
    let mut project = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let file_name = field.file_name().map(String::from);
                let mime = field
                    .content_type()
                    .map(String::from)
                    .or_else(|| {
                        file_name
                            .as_deref()
                            .and_then(|f| mime_guess::from_path(f).first())
                            .map(|m| m.to_string())
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                let display_name = file_name.unwrap_or_else(|| format!("meeting-{}", uuid::Uuid::new_v4()));
                media = Some(MediaRef::new(bytes.to_vec(), mime).with_display_name(display_name));
            }
            "text" | "signature" | "project" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "text" => text = Some(value),
                    "signature" => signature = ContinuationToken::new(value),
                    _ => project = Some(value).filter(|p| !p.trim().is_empty()),
                }
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let request = IngestRequest::new(project.unwrap_or_else(|| state.default_project.clone()))
        .with_text(text)
        .with_media(media)
        .with_continuation(signature);
    let outcome = state.ingest.run(request).await?;

    Ok(Json(ProcessMeetingResponse {
        tickets_created: outcome.report.tickets_created(),
        tickets_failed: outcome.report.tickets_failed(),
        notification_sent: outcome.report.notification_sent(),
        text: outcome.text,
        signature: outcome.continuation_token,
        reasoning: outcome.reasoning,
        requirements: outcome.requirements,
    }))
}

async fn review_pr(
    State(state): State<SharedState>,
    payload: Result<Json<ReviewPrRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let request = AuditRequest {
        project_id: req.project.unwrap_or_else(|| state.default_project.clone()),
        diff: req.diff,
        repo: req.repo,
        change_number: req.change_number,
        continuation: req.continuation_token.and_then(ContinuationToken::new),
        mode: AuditMode::Review,
    };
    let outcome = state.audit.run(request).await?;

    Ok(Json(ReviewResponse {
        success: true,
        downstream_status: outcome.downstream_status(),
        memory: outcome.memory,
        review: outcome.review,
        verdict: None,
    }))
}

async fn github_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;

    let event = headers.get("x-github-event").and_then(|v| v.to_str().ok());
    if let Some(event) = event
        && event != "pull_request"
    {
        tracing::debug!(event, "ignoring non pull_request event");
        return Ok(Json(json!({"success": true, "ignored": event})).into_response());
    }
    if let Some(action) = req.action.as_deref()
        && !AUDITED_ACTIONS.contains(&action)
    {
        tracing::debug!(action, "ignoring pull_request action");
        return Ok(Json(json!({"success": true, "ignored": action})).into_response());
    }

    let pull_request = req.pull_request.unwrap_or_default();
    let repo = req.repository.and_then(|r| r.full_name).or(req.repo);
    let change_number = pull_request.number.or(req.number);

    let mut diff = None;
    if let Some(url) = pull_request.diff_url.as_deref() {
        match state.code_host.fetch_diff(url).await {
            Ok(fetched) => diff = Some(fetched),
            Err(err) => tracing::warn!(url, error = %err, "diff fetch failed"),
        }
    }
    let diff = diff.filter(|d| !d.trim().is_empty()).or(req.diff);

    let request = AuditRequest {
        project_id: req.project.unwrap_or_else(|| state.default_project.clone()),
        diff,
        repo,
        change_number,
        continuation: None,
        mode: AuditMode::Verdict,
    };
    let outcome = state.audit.run(request).await?;

    Ok(Json(ReviewResponse {
        success: true,
        downstream_status: outcome.downstream_status(),
        memory: outcome.memory,
        review: outcome.review,
        verdict: outcome.verdict,
    })
    .into_response())
}

async fn get_project_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let found = state
        .store
        .get(&id)
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    match found {
        Some(project_state) => Ok(Json(project_state)),
        None => Err(ApiError::NotFound(format!("No strategic state for project {}", id))),
    }
}
