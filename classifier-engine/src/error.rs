//! HTTP-facing error type for the control surface: maps
//! [`classifier_core::EngineError`] and friends onto status codes and
//! a minimal XML error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use classifier_core::{EngineError, StorageError, TaggerError};

#[derive(Debug, thiserror::Error)]
pub enum EngineHttpError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tagger(#[from] TaggerError),
}

impl EngineHttpError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineHttpError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineHttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineHttpError::Forbidden => StatusCode::FORBIDDEN,
            EngineHttpError::Engine(EngineError::NoSuchTag(_)) => StatusCode::NOT_FOUND,
            EngineHttpError::Engine(EngineError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            EngineHttpError::Engine(EngineError::BadJobType(_)) => StatusCode::BAD_REQUEST,
            EngineHttpError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineHttpError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineHttpError::Tagger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineHttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "control surface request failed");
        }
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<error><message>{}</message></error>",
            quick_xml::escape::escape(self.to_string())
        );
        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

pub type EngineHttpResult<T> = Result<T, EngineHttpError>;
