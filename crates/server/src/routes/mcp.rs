//! Model Context Protocol surface: the launcher's lifecycle operations as
//! JSON-RPC 2.0 tools.

use axum::extract::State;
use axum::Json;
use orchestrator::{LifecycleFlow, OrchestratorError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::state::AppState;

pub const JSONRPC_VERSION: &str = "2.0";

mod error_codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const SERVER_BUSY: i32 = -32000;
}

const TOOLS: &[(&str, &str)] = &[
    (
        "install_repository",
        "Runs the full installation sequence (npm install, docker up, build, migrate, seed).",
    ),
    (
        "uninstall_repository",
        "Stops all services and removes all build artifacts/dependencies (Reset).",
    ),
    (
        "update_repository",
        "Pulls latest code from git and re-installs dependencies.",
    ),
    ("stop_services", "Stops running Docker services."),
];

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn from_result(id: Value, result: Result<Value, JsonRpcError>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn tool_list() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|(name, description)| {
            json!({
                "name": name,
                "description": description,
                "inputSchema": { "type": "object", "properties": {} }
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn text_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "isError": is_error
    })
}

#[utoipa::path(
    get,
    path = "/api/mcp/tools",
    responses(
        (status = 200, description = "JSON-RPC tool listing")
    ),
    tag = "mcp"
)]
pub async fn list_tools() -> Json<Value> {
    Json(json!({
        "jsonrpc": JSONRPC_VERSION,
        "result": tool_list()
    }))
}

#[utoipa::path(
    post,
    path = "/api/mcp",
    responses(
        (status = 200, description = "JSON-RPC response")
    ),
    tag = "mcp"
)]
pub async fn json_rpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let id = request.id.clone();
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(JsonRpcResponse::from_result(
            id,
            Err(JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Unsupported JSON-RPC version: {}", request.jsonrpc),
            )),
        ));
    }

    let result = match request.method.as_str() {
        "tools/list" => Ok(tool_list()),
        "tools/call" => call_tool(&state, request.params.as_ref()).await,
        other => Err(JsonRpcError::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        )),
    };

    Json(JsonRpcResponse::from_result(id, result))
}

async fn call_tool(state: &AppState, params: Option<&Value>) -> Result<Value, JsonRpcError> {
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing or invalid 'name' field"))?;
    info!(tool = name, "MCP tool call");

    let flow = match name {
        "install_repository" => {
            return match state.orchestrator.run_pipeline(false).await {
                Ok(ticket) => {
                    tokio::spawn(async move {
                        let _ = ticket.wait().await;
                    });
                    Ok(text_result("Installation pipeline started", false))
                }
                Err(OrchestratorError::Busy) => Err(JsonRpcError::new(
                    error_codes::SERVER_BUSY,
                    OrchestratorError::Busy.to_string(),
                )),
                Err(e) => Ok(text_result(e.to_string(), true)),
            };
        }
        "uninstall_repository" => LifecycleFlow::Uninstall,
        "update_repository" => LifecycleFlow::Update,
        "stop_services" => LifecycleFlow::Stop,
        other => {
            return Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", other),
            ))
        }
    };

    let outcome = state.lifecycle.run(flow).await;
    let text = match &outcome.abort {
        Some(reason) => reason.clone(),
        None if outcome.success => format!("{} finished successfully", flow.as_str()),
        None => format!("{} finished with errors", flow.as_str()),
    };
    Ok(text_result(text, !outcome.success))
}
