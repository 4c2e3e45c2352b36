use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::DispatchError;
use crate::scheduler::{Dispatcher, JobRequest};

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    status: &'static str,
    name: String,
    job_id: String,
    queue_position: usize,
}

/// Build the HTTP router over `dispatcher`.
pub fn router(dispatcher: Dispatcher) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(submit_job_handler))
        .route("/jobs/pending", get(pending_jobs_handler))
        .route("/jobs/running", get(running_jobs_handler))
        .route("/jobs/stats", get(stats_handler))
        .layer(cors)
        .with_state(ApiState { dispatcher })
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected malformed job submission");
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    match state.dispatcher.submit(request).await {
        Ok(submission) => (
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                status: "Job submitted successfully",
                name: submission.name,
                job_id: submission.job_id.to_string(),
                queue_position: submission.queue_position,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn pending_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.dispatcher.pending_jobs().await)
}

async fn running_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.dispatcher.running_jobs().await)
}

async fn stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.dispatcher.stats().await)
}

fn error_response(error: DispatchError) -> Response {
    let status = match &error {
        DispatchError::EmptyName => StatusCode::BAD_REQUEST,
        DispatchError::DuplicateName(_) => StatusCode::CONFLICT,
        DispatchError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
