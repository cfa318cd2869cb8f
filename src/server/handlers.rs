use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::commands::{CommandEnvelope, CommandResponse};
use crate::server::state::AppState;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    uptime_secs: i64,
    pipelines_in_flight: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        pipelines_in_flight: state.engine.in_flight(),
    })
}

/// Command endpoint. The body of the reply is always a [`CommandResponse`];
/// the HTTP status mirrors its `status` field.
pub async fn command(
    State(state): State<AppState>,
    Json(envelope): Json<CommandEnvelope>,
) -> impl IntoResponse {
    let response: CommandResponse = state.engine.handle(envelope).await;
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/commands", post(command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
