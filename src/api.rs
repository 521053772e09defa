use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};
use tracing::error;

use crate::detect::PatternVerdict;
use crate::error::SubmitError;
use crate::live::LiveSnapshot;
use crate::metrics::Metrics;
use crate::pipeline::{RetryReceipt, SubmissionReceipt, TriagePipeline};
use crate::report::ReportForm;

const GENERIC_FAILURE: &str =
    "An unexpected error occurred while submitting your report. Please try again.";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TriagePipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<TriagePipeline>) -> Self {
        Self { pipeline }
    }
}

/// Full HTTP surface. `/metrics` is mounted only when a recorder is installed.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/detect", post(detect))
        .route("/live", post(live_update).get(live_snapshot))
        .route("/reports", post(submit_report))
        .route("/reports/retry", post(retry_reports))
        .route("/reports/pending", get(pending_reports))
        .with_state(state);

    if let Some(m) = metrics {
        app = app.merge(m.router());
    }

    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::very_permissive())
}

#[derive(serde::Deserialize)]
struct TextReq {
    text: String,
}

async fn detect(State(state): State<AppState>, Json(body): Json<TextReq>) -> Json<PatternVerdict> {
    Json(state.pipeline.detect(&body.text))
}

#[derive(serde::Serialize)]
struct LiveAck {
    generation: u64,
    keyword: PatternVerdict,
}

async fn live_update(State(state): State<AppState>, Json(body): Json<TextReq>) -> Json<LiveAck> {
    let live = state.pipeline.live();
    let generation = live.update(&body.text);
    Json(LiveAck {
        generation,
        keyword: live.snapshot().keyword,
    })
}

async fn live_snapshot(State(state): State<AppState>) -> Json<LiveSnapshot> {
    Json(state.pipeline.live().snapshot())
}

async fn submit_report(
    State(state): State<AppState>,
    Json(form): Json<ReportForm>,
) -> Result<Json<SubmissionReceipt>, SubmitError> {
    state.pipeline.submit(form).await.map(Json)
}

async fn retry_reports(State(state): State<AppState>) -> Result<Json<RetryReceipt>, SubmitError> {
    state.pipeline.retry_pending().await.map(Json)
}

async fn pending_reports(State(state): State<AppState>) -> Result<Json<serde_json::Value>, SubmitError> {
    let n = state.pipeline.pending_count().await?;
    Ok(Json(json!({ "pending": n })))
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = match &self {
            SubmitError::Validation(_) => StatusCode::BAD_REQUEST,
            SubmitError::Internal(e) => {
                error!(target: "api", error = ?e, "submission failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal", "message": GENERIC_FAILURE })),
                )
                    .into_response();
            }
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
            "fields": self.field_errors(),
        });
        if let SubmitError::AnonymityChoiceRequired { fields } = &self {
            body["requiredFields"] = json!(fields);
        }
        (status, Json(body)).into_response()
    }
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    error!(target: "api", "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal", "message": GENERIC_FAILURE })),
    )
        .into_response()
}
