use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use medgemma::errors::ModelError;
use serde_json::json;
use thiserror::Error;

/// Errors returned by the HTTP handlers, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid API key")]
    Unauthorized,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Error generating response: {0}")]
    Generation(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Wrap a failure of the generation step itself. Configuration and access errors keep their
    /// own status codes.
    pub fn generation(err: ModelError) -> Self {
        match err {
            ModelError::Generation(detail) => ApiError::Generation(detail),
            other if other.is_access_error() => ApiError::Model(other),
            other => ApiError::Generation(other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::PermissionDenied(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Model(err) => match err {
                ModelError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
                ModelError::ModelAccessDenied(_) => StatusCode::NOT_FOUND,
                ModelError::Registry(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Model(ModelError::Unconfigured(_)) => format!(
                "{} You can also run `medgemma setup-token` to store it in .env.",
                self
            ),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
