//! Tool listing and invocation endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::server::error::{ErrorResponse, OutcomeResponse, SuccessResponse};
use crate::server::ServerState;
use crate::tools::{new_correlation_id, Failure, Invocation, SideEffect};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body of `POST /invoke`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct InvokeRequest {
    pub tool: String,
    /// Defaults to `{}`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub arguments: Value,
    /// Correlation id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub side_effect: SideEffect,
    #[schema(value_type = Object)]
    pub input_schema: Value,
    /// Effective handler timeout.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToolListResponse {
    pub read_only: bool,
    pub tools: Vec<ToolInfo>,
}

/// Correlation id supplied by the client through `x-request-id`.
pub(crate) fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn correlation_id(body_id: Option<String>, headers: &HeaderMap) -> String {
    body_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| request_id(headers))
        .unwrap_or_else(new_correlation_id)
}

/// Missing or `null` arguments mean "no arguments"; anything else must be an object.
fn normalize_arguments(arguments: Value) -> Result<Value, Failure> {
    match arguments {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(arguments),
        _ => Err(Failure::decode("arguments must be a JSON object")),
    }
}

fn decode_invoke(body: Result<Bytes, BytesRejection>) -> Result<(InvokeRequest, Value), (Option<String>, Failure)> {
    let body = body.map_err(|e| (None, Failure::decode(format!("unreadable request body: {e}"))))?;
    let request: InvokeRequest = serde_json::from_slice(&body)
        .map_err(|e| (None, Failure::decode(format!("invalid request body: {e}"))))?;
    if request.tool.trim().is_empty() {
        return Err((request.id, Failure::decode("tool name must not be empty")));
    }
    match normalize_arguments(request.arguments.clone()) {
        Ok(arguments) => Ok((request, arguments)),
        Err(failure) => Err((request.id, failure)),
    }
}

fn decode_arguments(body: Result<Bytes, BytesRejection>) -> Result<Value, Failure> {
    let body = body.map_err(|e| Failure::decode(format!("unreadable request body: {e}")))?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let arguments: Value = serde_json::from_slice(&body)
        .map_err(|e| Failure::decode(format!("invalid request body: {e}")))?;
    normalize_arguments(arguments)
}

/// POST /invoke
///
/// Decodes `{ tool, arguments, id }`, runs the invocation through the
/// coordinator and returns the `{ ok, id, data }` / `{ ok, id, error }` envelope.
#[utoipa::path(
    post,
    path = "/invoke",
    tag = "tools",
    request_body = InvokeRequest,
    params(("x-request-id" = Option<String>, Header, description = "Correlation id fallback")),
    responses(
        (status = 200, body = SuccessResponse),
        (status = 400, description = "decode_error", body = ErrorResponse),
        (status = 404, description = "unknown_tool", body = ErrorResponse),
        (status = 422, description = "validation_error", body = ErrorResponse),
        (status = 429, description = "backpressure", body = ErrorResponse),
        (status = 500, description = "internal_fault", body = ErrorResponse),
        (status = 502, description = "execution_error", body = ErrorResponse),
        (status = 504, description = "timeout", body = ErrorResponse),
    )
)]
pub(crate) async fn invoke(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> OutcomeResponse {
    match decode_invoke(body) {
        Ok((request, arguments)) => {
            let id = correlation_id(request.id, &headers);
            run(&state, id, request.tool, arguments).await
        }
        Err((body_id, failure)) => reject(correlation_id(body_id, &headers), failure),
    }
}

/// POST /tools/{name}
///
/// Same as `/invoke` with the tool taken from the path and the body used as
/// the argument object.
#[utoipa::path(
    post,
    path = "/tools/{name}",
    tag = "tools",
    params(
        ("name" = String, Path, description = "Registered tool name"),
        ("x-request-id" = Option<String>, Header, description = "Correlation id"),
    ),
    request_body(content = serde_json::Value, description = "Tool arguments"),
    responses(
        (status = 200, body = SuccessResponse),
        (status = 400, description = "decode_error", body = ErrorResponse),
        (status = 404, description = "unknown_tool", body = ErrorResponse),
        (status = 422, description = "validation_error", body = ErrorResponse),
        (status = 429, description = "backpressure", body = ErrorResponse),
        (status = 500, description = "internal_fault", body = ErrorResponse),
        (status = 502, description = "execution_error", body = ErrorResponse),
        (status = 504, description = "timeout", body = ErrorResponse),
    )
)]
pub(crate) async fn invoke_named(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> OutcomeResponse {
    let id = correlation_id(None, &headers);
    match decode_arguments(body) {
        Ok(arguments) => run(&state, id, name, arguments).await,
        Err(failure) => reject(id, failure),
    }
}

async fn run(state: &ServerState, id: String, tool: String, arguments: Value) -> OutcomeResponse {
    let invocation = Invocation::new(tool, arguments).with_correlation_id(id.clone());
    let outcome = state.coordinator.dispatch(invocation).await;
    OutcomeResponse::new(id, outcome)
}

fn reject(id: String, failure: Failure) -> OutcomeResponse {
    tracing::warn!(correlation_id = %id, status = %failure.kind, error = %failure.message, "request rejected");
    OutcomeResponse::failure(id, failure)
}

/// GET /tools
#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    responses((status = 200, body = ToolListResponse))
)]
pub(crate) async fn list_tools(State(state): State<Arc<ServerState>>) -> Json<ToolListResponse> {
    let coordinator = &state.coordinator;
    let default_timeout = coordinator.config().default_timeout;
    let tools = coordinator
        .registry()
        .descriptors()
        .into_iter()
        .map(|tool| ToolInfo {
            name: tool.name.clone(),
            description: tool.description.clone(),
            side_effect: tool.side_effect,
            input_schema: tool.input_schema.clone(),
            timeout_ms: tool.timeout.unwrap_or(default_timeout).as_millis() as u64,
        })
        .collect();
    Json(ToolListResponse {
        read_only: coordinator.registry().is_read_only(),
        tools,
    })
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Server is up", content_type = "text/plain"))
)]
pub(crate) async fn health() -> &'static str {
    "ok"
}
