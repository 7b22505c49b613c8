//! Host header allow-list and CORS origin matching.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::http::{request, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::server::error::{OutcomeResponse, CORRELATION_HEADER};
use crate::server::invoke::request_id;
use crate::server::ServerState;
use crate::tools::{new_correlation_id, Failure};

/// Reject requests whose `Host` is not allow-listed, before any decoding.
pub(crate) async fn check_host(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(strip_port)
        });

    match host {
        Some(host) if host_allowed(&host, &state.allowed_hosts) => next.run(request).await,
        other => {
            let id = request_id(request.headers()).unwrap_or_else(new_correlation_id);
            tracing::warn!(correlation_id = %id, host = ?other, "host not allowed");
            OutcomeResponse::failure(id, Failure::decode("host not allowed")).into_response()
        }
    }
}

/// `example.com:9001` → `example.com`, `[::1]:9001` → `::1`.
fn strip_port(authority: &str) -> String {
    let authority = authority.trim();
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host.to_string()
        }
        _ => authority.to_string(),
    }
}

pub(crate) fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    allowed
        .iter()
        .any(|entry| entry == "*" || entry.eq_ignore_ascii_case(host))
}

/// Match an `Origin` against configured patterns.
///
/// Patterns are exact origins, `scheme://*`, or `*`. A pattern without a port
/// also matches the same origin on any port.
pub(crate) fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" || pattern == origin {
            return true;
        }
        if let Some(scheme) = pattern.strip_suffix("://*") {
            return origin
                .strip_prefix(scheme)
                .is_some_and(|rest| rest.starts_with("://") && rest.len() > 3);
        }
        match origin.strip_prefix(pattern.as_str()) {
            Some(port) => {
                port.len() > 1
                    && port.starts_with(':')
                    && port[1..].chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        }
    })
}

pub(crate) fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let patterns: Arc<[String]> = allowed_origins.into();
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &request::Parts| {
        origin
            .to_str()
            .map(|origin| origin_allowed(origin, &patterns))
            .unwrap_or(false)
    });
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CORRELATION_HEADER, axum::http::header::RETRY_AFTER])
}
