use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::tools::{Failure, FailureKind, Outcome};

pub const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Successful invocation envelope.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub ok: bool,
    pub id: String,
    #[schema(value_type = Object)]
    pub data: Value,
}

/// Failed invocation envelope:
/// ```json
/// { "ok": false, "id": "<id>", "error": { "kind": "<kind>", "message": "<message>" } }
/// ```
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub ok: bool,
    pub id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorBody {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// HTTP status for each failure kind.
pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::DecodeError => StatusCode::BAD_REQUEST,
        FailureKind::UnknownTool => StatusCode::NOT_FOUND,
        FailureKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::ExecutionError => StatusCode::BAD_GATEWAY,
        FailureKind::InternalFault => StatusCode::INTERNAL_SERVER_ERROR,
        FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::Backpressure => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// An [`Outcome`] bound to the correlation id it is delivered under.
#[derive(Debug)]
pub struct OutcomeResponse {
    correlation_id: String,
    outcome: Outcome,
}

impl OutcomeResponse {
    pub fn new(correlation_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome,
        }
    }

    pub fn failure(correlation_id: impl Into<String>, failure: Failure) -> Self {
        Self::new(correlation_id, Outcome::Failure(failure))
    }

    pub fn status(&self) -> StatusCode {
        match &self.outcome {
            Outcome::Success(_) => StatusCode::OK,
            Outcome::Failure(failure) => status_for(failure.kind),
        }
    }
}

impl IntoResponse for OutcomeResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let id = self.correlation_id;
        let mut retry_after = None;

        let mut response = match self.outcome {
            Outcome::Success(data) => (
                status,
                Json(SuccessResponse {
                    ok: true,
                    id: id.clone(),
                    data,
                }),
            )
                .into_response(),
            Outcome::Failure(failure) => {
                retry_after = failure.retry_after_ms;
                let body = ErrorResponse {
                    ok: false,
                    id: id.clone(),
                    error: ErrorBody {
                        kind: failure.kind,
                        message: failure.message,
                        retry_after_ms: failure.retry_after_ms,
                    },
                };
                (status, Json(body)).into_response()
            }
        };

        let headers = response.headers_mut();
        // Ids taken from request bodies may not be valid header values.
        if let Ok(value) = HeaderValue::from_str(&id) {
            headers.insert(CORRELATION_HEADER, value);
        }
        if let Some(ms) = retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(ms)));
        }
        response
    }
}

/// `Retry-After` carries whole seconds; round up and never send zero.
fn retry_after_secs(ms: u64) -> u64 {
    ms.div_ceil(1000).max(1)
}
