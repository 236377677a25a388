use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, get_service, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use plotwise_common::api::{QueryRequest, QueryResponse};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use crate::agent::{QueryAgent, MISSING_INPUT_MESSAGE};

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub agent: QueryAgent,
    pub metrics_handle: PrometheusHandle,
    /// Directory holding the landing page.
    pub static_dir: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    let index = ServeFile::new(state.static_dir.join("index.html"));

    Router::new()
        .route("/", get_service(index))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Answer a natural-language question. Always 200 with a response body, even
/// when the request body itself is unusable.
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Json<QueryResponse> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Unreadable query body");
            metrics::counter!("agent.query.outcome", "outcome" => "input_error").increment(1);
            return Json(QueryResponse::text_only(MISSING_INPUT_MESSAGE));
        }
    };

    Json(state.agent.answer(request).await)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "healthy"})))
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
