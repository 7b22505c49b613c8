use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use utoipa::openapi::server::Server as OpenApiServer;
use utoipa::OpenApi;

use crate::server::error::{ErrorBody, ErrorResponse, SuccessResponse};
use crate::server::invoke::{InvokeRequest, ToolInfo, ToolListResponse};
use crate::server::ServerState;
use crate::tools::{FailureKind, SideEffect};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "db-tools API",
        version = "0.1.0",
        description = "Tool invocation dispatch server"
    ),
    paths(
        crate::server::invoke::health,
        crate::server::invoke::list_tools,
        crate::server::invoke::invoke,
        crate::server::invoke::invoke_named,
    ),
    components(schemas(
        InvokeRequest,
        ToolInfo,
        ToolListResponse,
        SideEffect,
        SuccessResponse,
        ErrorResponse,
        ErrorBody,
        FailureKind,
    )),
    tags(
        (name = "tools", description = "Tool discovery and invocation"),
        (name = "system", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// GET /openapi.json
///
/// Paths are relative to the mount path, which is advertised as the server URL.
pub(crate) async fn openapi_json(State(state): State<Arc<ServerState>>) -> Json<utoipa::openapi::OpenApi> {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![OpenApiServer::new(state.mount_path.clone())]);
    Json(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["/health", "/invoke", "/tools", "/tools/{name}"]);
    }

    #[test]
    fn failure_kinds_are_snake_case() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let kinds = &json["components"]["schemas"]["FailureKind"]["enum"];
        assert!(kinds.as_array().unwrap().iter().any(|k| k == "validation_error"));
    }
}
