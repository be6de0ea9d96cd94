use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::NexaError;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Error payload returned by every endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub NexaError);

impl From<NexaError> for ApiError {
    fn from(e: NexaError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            NexaError::Validation(_)
            | NexaError::InvalidArgument(_)
            | NexaError::UnsupportedClusterType(_)
            | NexaError::UnsupportedRole { .. }
            | NexaError::MissingProperty(_)
            | NexaError::InvalidPageSize { .. } => StatusCode::BAD_REQUEST,
            NexaError::NotFound(_) | NexaError::PageExpired(_) => StatusCode::NOT_FOUND,
            NexaError::ConcurrentOperation(_) | NexaError::InvalidState(_) | NexaError::Cancelled(_) => {
                StatusCode::CONFLICT
            }
            NexaError::Provisioning(_) => StatusCode::BAD_GATEWAY,
            NexaError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            NexaError::Config(_)
            | NexaError::Io(_)
            | NexaError::Yaml(_)
            | NexaError::Json(_)
            | NexaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_internal() {
            error!("Request failed: {}", self.0);
            INTERNAL_MESSAGE.to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            code: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
