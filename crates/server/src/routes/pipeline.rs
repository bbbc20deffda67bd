use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use launcher_core::{Phase, PhaseId};
use orchestrator::{PhaseTarget, SessionSnapshot, Ticket};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunPhaseRequest {
    /// Configured phase to run
    pub phase_id: Option<PhaseId>,
    /// Ad-hoc command, used when `phase_id` is absent
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl RunPhaseRequest {
    fn target(self) -> Result<PhaseTarget, AppError> {
        if let Some(id) = self.phase_id {
            return Ok(PhaseTarget::Id(id));
        }
        match self.command {
            Some(command) if !command.trim().is_empty() => Ok(PhaseTarget::AdHoc {
                command,
                args: self.args,
            }),
            _ => Err(AppError::BadRequest(
                "Either phase_id or command is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RunPipelineRequest {
    #[serde(default)]
    pub ai_assisted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Log the outcome of an accepted intent once it settles. The operator
/// learns about it through the event channel.
fn settle_in_background<T: Send + 'static>(intent: &'static str, ticket: Ticket<T>) {
    tokio::spawn(async move {
        match ticket.wait().await {
            Ok(_) => debug!(intent, "Intent settled"),
            Err(e) => warn!(intent, error = %e, "Intent failed"),
        }
    });
}

#[utoipa::path(
    post,
    path = "/api/run-phase",
    request_body = RunPhaseRequest,
    responses(
        (status = 202, description = "Phase started", body = StatusResponse),
        (status = 400, description = "Neither phase nor command given"),
        (status = 404, description = "Phase not found"),
        (status = 409, description = "Another phase is running")
    ),
    tag = "pipeline"
)]
pub async fn run_phase(
    State(state): State<AppState>,
    Json(payload): Json<RunPhaseRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let target = payload.target()?;
    info!(target = ?target, "Run phase requested");

    let ticket = state.orchestrator.run_phase(target).await?;
    settle_in_background("run_phase", ticket);

    Ok((StatusCode::ACCEPTED, Json(StatusResponse::new("started"))))
}

#[utoipa::path(
    post,
    path = "/api/run-pipeline",
    request_body = RunPipelineRequest,
    responses(
        (status = 202, description = "Pipeline started", body = StatusResponse),
        (status = 409, description = "Another phase is running")
    ),
    tag = "pipeline"
)]
pub async fn run_pipeline(
    State(state): State<AppState>,
    payload: Option<Json<RunPipelineRequest>>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    info!(ai_assisted = payload.ai_assisted, "Run pipeline requested");

    let ticket = state.orchestrator.run_pipeline(payload.ai_assisted).await?;
    settle_in_background("run_pipeline", ticket);

    Ok((StatusCode::ACCEPTED, Json(StatusResponse::new("started"))))
}

#[utoipa::path(
    get,
    path = "/api/pipeline",
    responses(
        (status = 200, description = "Current session snapshot", body = SessionSnapshot)
    ),
    tag = "pipeline"
)]
pub async fn get_pipeline(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.orchestrator.snapshot())
}

#[utoipa::path(
    post,
    path = "/api/pipeline/reset",
    responses(
        (status = 200, description = "All phases pending", body = SessionSnapshot),
        (status = 409, description = "Another phase is running")
    ),
    tag = "pipeline"
)]
pub async fn reset_pipeline(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, AppError> {
    state.orchestrator.reset().await?;
    Ok(Json(state.orchestrator.snapshot()))
}

#[utoipa::path(
    get,
    path = "/api/phases",
    responses(
        (status = 200, description = "Configured phases in pipeline order", body = Vec<Phase>)
    ),
    tag = "pipeline"
)]
pub async fn list_phases(State(state): State<AppState>) -> Json<Vec<Phase>> {
    Json(state.phases().to_vec())
}
