//! Error types for the CGRAG core library.

use std::time::Duration;

use serde::Serialize;

/// Failure kinds reported by the LLM generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    Auth,
    RateLimit,
    Connection,
    Generic,
}

/// Typed LLM generation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("LLM connection failed: {0}")]
    Connection(String),

    #[error("LLM generation failed: {0}")]
    Generic(String),
}

impl LlmError {
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::Auth(_) => LlmErrorKind::Auth,
            LlmError::RateLimit(_) => LlmErrorKind::RateLimit,
            LlmError::Connection(_) => LlmErrorKind::Connection,
            LlmError::Generic(_) => LlmErrorKind::Generic,
        }
    }
}

/// Top-level error enum for the CGRAG core library.
#[derive(Debug, thiserror::Error)]
pub enum CgragError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CgragError {
    /// Short machine-readable code used in streamed `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            CgragError::Llm(err) => match err.kind() {
                LlmErrorKind::Auth => "llm_auth",
                LlmErrorKind::RateLimit => "llm_rate_limit",
                LlmErrorKind::Connection => "llm_connection",
                LlmErrorKind::Generic => "llm_error",
            },
            CgragError::Cancelled => "cancelled",
            CgragError::Timeout(_) => "timeout",
            CgragError::Retrieval(_) => "retrieval",
            CgragError::Store(_) | CgragError::Sqlite(_) => "store",
            CgragError::Config(_) => "config",
            CgragError::InvalidRequest(_) => "invalid_request",
            CgragError::Io(_) => "io",
            CgragError::Json(_) => "json",
        }
    }
}

pub type CgragResult<T> = Result<T, CgragError>;
