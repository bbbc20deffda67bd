use axum::extract::State;
use axum::Json;
use orchestrator::Advice;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TroubleshootRequest {
    /// Output to analyze. Defaults to the current phase's recent output
    pub logs: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/troubleshoot",
    request_body = TroubleshootRequest,
    responses(
        (status = 200, description = "Advisor analysis", body = Advice),
        (status = 400, description = "No output to analyze"),
        (status = 500, description = "Advisor request failed"),
        (status = 503, description = "No advisor configured")
    ),
    tag = "troubleshoot"
)]
pub async fn troubleshoot(
    State(state): State<AppState>,
    payload: Option<Json<TroubleshootRequest>>,
) -> Result<Json<Advice>, AppError> {
    if !state.pipeline.has_advisor() {
        return Err(AppError::Unavailable(format!(
            "Advisor not configured; set {} to enable troubleshooting",
            state.config.advisor.api_key_env
        )));
    }

    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let (phase_id, logs) = match payload.logs {
        Some(logs) => (None, logs),
        None => {
            let snapshot = state.orchestrator.snapshot();
            (snapshot.current_phase, snapshot.recent_output)
        }
    };

    if logs.trim().is_empty() {
        return Err(AppError::BadRequest("No output to analyze".to_string()));
    }

    state
        .pipeline
        .troubleshoot(phase_id, &logs)
        .await
        .map(Json)
        .ok_or_else(|| AppError::Internal("Failed to analyze logs".to_string()))
}
