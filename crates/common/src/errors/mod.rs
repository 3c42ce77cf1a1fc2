//! Error types for DocChat services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for the fetch / index / citation / planning stages
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Document retrieval / parse failure. Never retried here.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Could not sign access URL for {url}: {message}")]
    Presign { url: String, message: String },

    #[error("Unsupported document URL: {url}")]
    UnsupportedUrl { url: String },

    #[error("Parse error for {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed attempt to load persisted index state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexLoadError {
    /// Nothing persisted at the expected location
    #[error("Persisted {what} not found")]
    NotFound { what: String },

    /// Persisted state exists but cannot be decoded or is inconsistent
    #[error("Persisted index {index_id} is corrupt: {message}")]
    Corrupt { index_id: String, message: String },

    /// Some requested indices exist and others do not
    #[error("Index id mismatch: {} found, missing {missing:?}", found.len())]
    PartialMismatch {
        found: Vec<String>,
        missing: Vec<String>,
    },
}

/// A scored passage that cannot be turned into a citation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CitationResolutionError {
    #[error("Passage carries no document id")]
    MissingDocumentId,

    #[error("Passage document id is not a UUID: {value}")]
    InvalidDocumentId { value: String },

    #[error("Passage carries no page label")]
    MissingPageLabel,

    #[error("Passage page label is not a number: {value}")]
    InvalidPageLabel { value: String },
}

/// Failure in the sub-question decomposition step.
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Decomposition LLM call failed: {message}")]
    Llm { message: String },

    #[error("Decomposition output could not be parsed: {message}")]
    Parse { message: String },
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Resource errors (4xxx)
    ConversationNotFound,
    DocumentNotFound,

    // Retrieval pipeline errors (5xxx)
    FetchError,
    IndexLoadError,
    PlanningError,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    LlmError,
    EmbeddingError,
    EmbeddingTimeout,
    VectorStoreError,
    StorageError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Resource errors
    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    // Retrieval pipeline
    #[error("Document fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Index load failed: {0}")]
    IndexLoad(#[from] IndexLoadError),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("LLM error: {message}")]
    LlmError { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("Object storage error: {message}")]
    Storage { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::ConversationNotFound { .. } => ErrorCode::ConversationNotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::Fetch(_) => ErrorCode::FetchError,
            AppError::IndexLoad(_) => ErrorCode::IndexLoadError,
            AppError::Planning(_) => ErrorCode::PlanningError,
            AppError::Database(_) | AppError::Sql(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::ConversationNotFound { .. } | AppError::DocumentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 500 Internal Server Error
            AppError::IndexLoad(_)
            | AppError::Database(_)
            | AppError::Sql(_)
            | AppError::DatabaseConnection { .. }
            | AppError::VectorStore { .. }
            | AppError::Storage { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Fetch(_)
            | AppError::Planning(_)
            | AppError::LlmError { .. }
            | AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if status.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_renders_client_error_body() {
        let response = AppError::DocumentNotFound { id: "d-1".into() }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::ConversationNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_fetch_error_is_upstream_failure() {
        let err: AppError = FetchError::Status {
            url: "https://bucket.example/doc.pdf".into(),
            status: 403,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::FetchError);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_planning_error_surfaces_as_server_error() {
        let err: AppError = PlanningError::Parse {
            message: "not json".into(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::PlanningError);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Empty message".into(),
            field: Some("content".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_partial_mismatch_message() {
        let err = IndexLoadError::PartialMismatch {
            found: vec!["a".into()],
            missing: vec!["b".into()],
        };
        assert!(err.to_string().contains("missing [\"b\"]"));
    }
}
