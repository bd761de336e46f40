//! Maps the shared `conclave_domain::Error` taxonomy onto HTTP responses.
//! The WebSocket surface has its own mapping onto JSON-RPC error codes in
//! [`conclave_protocol::jsonrpc`]; this one is for the REST/SSE surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conclave_domain::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::SlowConsumer => StatusCode::GONE,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Fatal(_) | Error::Io(_) | Error::Json(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string(), "kind": self.0.kind() }))).into_response()
    }
}
