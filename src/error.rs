//! Application error types with MCP protocol conversion.

use rmcp::model::ErrorCode;
use thiserror::Error;

use crate::embedder::EmbeddingFailure;
use crate::llm::ExtractionFailure;

/// Application-level errors for the memory server.
#[derive(Error, Debug)]
pub enum AppError {
    // Reachability errors
    #[error("{service} unreachable: {message}")]
    Connectivity {
        service: &'static str,
        message: String,
    },

    // Neo4j errors
    #[error("Neo4j error: {0}")]
    Database(#[from] neo4rs::Error),

    #[error("Neo4j query error: {message}")]
    Query { message: String, query: String },

    // Model server errors
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error(transparent)]
    Embedding(#[from] EmbeddingFailure),

    // Input errors
    #[error("Invalid argument '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Shorthand for a [`AppError::Validation`] error.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Application error code used as the message prefix on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Connectivity { .. } => "CONNECTIVITY_FAILURE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Query { .. } => "QUERY_ERROR",
            AppError::Extraction(_) => "EXTRACTION_FAILURE",
            AppError::Embedding(_) => "EMBEDDING_FAILURE",
            AppError::Validation { .. } => "VALIDATION_FAILURE",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<AppError> for rmcp::model::ErrorData {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::Validation { .. } => ErrorCode::INVALID_PARAMS,
            _ => ErrorCode::INTERNAL_ERROR,
        };

        rmcp::model::ErrorData::new(code, format!("[{}] {}", err.code(), err), None)
    }
}
