use axum::extract::{Path, State};
use axum::Json;
use orchestrator::{LifecycleFlow, LifecycleOutcome};

use crate::error::AppError;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/api/lifecycle/{flow}",
    params(
        ("flow" = String, Path, description = "stop, update or uninstall")
    ),
    responses(
        (status = 200, description = "Chain settled", body = LifecycleOutcome),
        (status = 404, description = "Unknown flow")
    ),
    tag = "lifecycle"
)]
pub async fn run_lifecycle(
    State(state): State<AppState>,
    Path(flow): Path<String>,
) -> Result<Json<LifecycleOutcome>, AppError> {
    let flow = LifecycleFlow::parse(&flow)
        .ok_or_else(|| AppError::NotFound(format!("Unknown lifecycle flow: {}", flow)))?;

    Ok(Json(state.lifecycle.run(flow).await))
}
