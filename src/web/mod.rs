//! HTTP boundary.
//!
//! Domain errors map to deterministic status codes and wire codes; bodies
//! are `{ "error": ..., "code": ... }`. Identity federation and RBAC live
//! outside the core: handlers read the tenant slug from `x-tenant` and the
//! actor from `x-actor`, which the real boundary layer fills in.

pub mod dto;
pub mod routes;

pub use routes::router;

use crate::core::ArtifactError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Domain(ArtifactError),
    Input(String),
}

impl From<ArtifactError> for WebError {
    fn from(err: ArtifactError) -> Self {
        WebError::Domain(err)
    }
}

impl WebError {
    pub fn input(message: impl Into<String>) -> Self {
        WebError::Input(message.into())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Domain(err) => {
                let status = match &err {
                    ArtifactError::Validation(_) => StatusCode::BAD_REQUEST,
                    ArtifactError::NotFound(_) => StatusCode::NOT_FOUND,
                    ArtifactError::Conflict { .. } => StatusCode::CONFLICT,
                    ArtifactError::QuarantinedBlob(_) => StatusCode::LOCKED,
                    ArtifactError::PolicyTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ArtifactError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
                    ArtifactError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ArtifactError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string(), err.wire_code().to_string())
            }
            WebError::Input(message) => {
                (StatusCode::BAD_REQUEST, message, "validation_error".to_string())
            }
        };

        let body = Json(ErrorResponse { error: message, code });
        (status, body).into_response()
    }
}

pub type WebResult<T> = std::result::Result<T, WebError>;
