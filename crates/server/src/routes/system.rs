use axum::extract::State;
use axum::Json;
use events::Event;
use launcher_core::ToolCheck;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::routes::pipeline::StatusResponse;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckSystemResponse {
    pub checks: Vec<ToolCheck>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InstallToolRequest {
    pub tool: String,
}

#[utoipa::path(
    post,
    path = "/api/check-system",
    responses(
        (status = 200, description = "Fresh detection result for every configured tool", body = CheckSystemResponse)
    ),
    tag = "system"
)]
pub async fn check_system(State(state): State<AppState>) -> Json<CheckSystemResponse> {
    let checks = orchestrator::check_all(state.probe.as_ref(), state.tools()).await;
    let missing = checks.iter().filter(|c| !c.is_installed()).count();
    info!(tools = checks.len(), missing, "System check finished");

    state.event_bus.emit(Event::DependencyCheck {
        checks: checks.clone(),
    });

    Json(CheckSystemResponse { checks })
}

#[utoipa::path(
    post,
    path = "/api/install-tool",
    request_body = InstallToolRequest,
    responses(
        (status = 200, description = "Installer started", body = StatusResponse),
        (status = 400, description = "Unknown tool"),
        (status = 409, description = "Another phase is running")
    ),
    tag = "system"
)]
pub async fn install_tool(
    State(state): State<AppState>,
    Json(payload): Json<InstallToolRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    info!(tool = %payload.tool, "Install requested");
    let ticket = state.orchestrator.install_tool(payload.tool.clone()).await?;

    let tool = payload.tool;
    tokio::spawn(async move {
        match ticket.wait().await {
            Ok(exit_code) => info!(tool = %tool, exit_code, "Installer finished"),
            Err(e) => tracing::warn!(tool = %tool, error = %e, "Installer failed"),
        }
    });

    Ok(Json(StatusResponse::new("installing")))
}
