pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Launcher API",
        version = "0.1.0",
        description = "Drive the installation pipeline of a local project and stream its output"
    ),
    paths(
        routes::health_check,
        routes::pipeline::run_phase,
        routes::pipeline::run_pipeline,
        routes::pipeline::get_pipeline,
        routes::pipeline::reset_pipeline,
        routes::pipeline::list_phases,
        routes::system::check_system,
        routes::system::install_tool,
        routes::lifecycle::run_lifecycle,
        routes::troubleshoot::troubleshoot,
        routes::mcp::list_tools,
        routes::mcp::json_rpc,
        routes::sse::events_stream,
    ),
    components(
        schemas(
            routes::HealthResponse,
            routes::pipeline::RunPhaseRequest,
            routes::pipeline::RunPipelineRequest,
            routes::pipeline::StatusResponse,
            routes::system::CheckSystemResponse,
            routes::system::InstallToolRequest,
            routes::troubleshoot::TroubleshootRequest,
            error::ErrorResponse,
            launcher_core::Phase,
            launcher_core::PhaseStatus,
            launcher_core::PhaseClassification,
            launcher_core::ReadinessProbe,
            launcher_core::ExecutionMode,
            launcher_core::ToolCheck,
            launcher_core::ToolStatus,
            orchestrator::SessionSnapshot,
            orchestrator::PipelineReport,
            orchestrator::Advice,
            orchestrator::LifecycleFlow,
            orchestrator::LifecycleOutcome,
            orchestrator::StepOutcome,
            events::EventEnvelope,
            events::Event,
            events::OutputStream,
        )
    ),
    tags(
        (name = "health", description = "Health check"),
        (name = "pipeline", description = "Phase and pipeline execution"),
        (name = "system", description = "Tool detection and installation"),
        (name = "lifecycle", description = "Stop, update and uninstall"),
        (name = "troubleshoot", description = "Advisor analysis of failed output"),
        (name = "mcp", description = "Lifecycle operations as MCP tools"),
        (name = "events", description = "Event channel stream"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route("/api/run-phase", post(routes::pipeline::run_phase))
        .route("/api/run-pipeline", post(routes::pipeline::run_pipeline))
        .route("/api/pipeline", get(routes::pipeline::get_pipeline))
        .route("/api/pipeline/reset", post(routes::pipeline::reset_pipeline))
        .route("/api/phases", get(routes::pipeline::list_phases))
        .route("/api/check-system", post(routes::system::check_system))
        .route("/api/install-tool", post(routes::system::install_tool))
        .route("/api/lifecycle/{flow}", post(routes::lifecycle::run_lifecycle))
        .route("/api/troubleshoot", post(routes::troubleshoot::troubleshoot))
        .route("/api/mcp/tools", get(routes::mcp::list_tools))
        .route("/api/mcp", post(routes::mcp::json_rpc))
        .route("/api/events", get(routes::sse::events_stream))
        .route("/ws", get(routes::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
