use axum::extract::State;
use axum::Json;
use launcher_core::PhaseId;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
    /// Phase currently awaited, 0 for an ad-hoc command
    #[serde(skip_serializing_if = "Option::is_none")]
    running: Option<PhaseId>,
    busy: bool,
    phases: usize,
    /// Troubleshooting is available
    advisor: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.orchestrator.snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running: snapshot.running,
        busy: snapshot.is_busy(),
        phases: state.config.phases.len(),
        advisor: state.pipeline.has_advisor(),
    })
}
