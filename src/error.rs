use http::StatusCode;
use thiserror::Error;

use crate::vector::VectorError;

#[derive(Error, Debug, Clone)]
pub enum Img2PoeError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Vector(String),

    #[error("Corrupt store at {path}: {reason}")]
    CorruptStore { path: String, reason: String },

    #[error("Store was built with a different embedder: {0}")]
    EmbedderMismatch(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Img2PoeError>;

impl From<std::io::Error> for Img2PoeError {
    fn from(e: std::io::Error) -> Self {
        Img2PoeError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Img2PoeError {
    fn from(e: serde_json::Error) -> Self {
        Img2PoeError::Json(e.to_string())
    }
}

impl From<VectorError> for Img2PoeError {
    fn from(e: VectorError) -> Self {
        match e {
            VectorError::EmbeddingError(msg) => Img2PoeError::Embedding(msg),
            VectorError::IoError(io) => Img2PoeError::Io(io.to_string()),
            VectorError::InvalidConfig(msg) => Img2PoeError::Config(msg),
            other => Img2PoeError::Vector(other.to_string()),
        }
    }
}

impl Img2PoeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Img2PoeError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Img2PoeError::InvalidInput(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Vector(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::CorruptStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::EmbedderMismatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Corpus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Img2PoeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Img2PoeError::InvalidQuery(_) => "invalid_query",
            Img2PoeError::InvalidInput(_) => "invalid_input",
            Img2PoeError::Embedding(_) => "embedding_error",
            Img2PoeError::Vector(_) => "vector_index_error",
            Img2PoeError::CorruptStore { .. } => "corrupt_store",
            Img2PoeError::EmbedderMismatch(_) => "embedder_mismatch",
            Img2PoeError::Corpus(_) => "corpus_error",
            Img2PoeError::Io(_) => "io_error",
            Img2PoeError::Json(_) => "json_error",
            Img2PoeError::Config(_) => "config_error",
        }
    }
}


// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub request_id: String,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for Img2PoeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match &self {
            Img2PoeError::InvalidQuery(msg) => msg.clone(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", error);
        }
        let body = ErrorResponse {
            error,
            code: self.code().to_string(),
            request_id: format!("req_{}", uuid::Uuid::new_v4()),
        };
        (status, Json(body)).into_response()
    }
}
