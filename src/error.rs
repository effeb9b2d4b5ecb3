//! Error taxonomy shared by the library and the HTTP layer.
//!
//! Every variant carries a stable machine-readable [`code`](HearthError::code)
//! and maps onto an HTTP status, so the server can render any failure as
//! `{"error": {"code": ..., "message": ...}}` without string matching.

use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T, E = HearthError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum HearthError {
    #[error("knowledge base is disabled")]
    KnowledgeDisabled,

    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unknown pipeline profile: {0}")]
    UnknownProfile(String),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("invalid or expired OAuth state")]
    InvalidState,

    #[error("OAuth client credentials are not configured")]
    OAuthNotConfigured,

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("a reindex is already running")]
    ReindexBusy,

    #[error("no documents found")]
    NoDocuments,

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl HearthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::KnowledgeDisabled => "knowledge_disabled",
            Self::InvalidChunking(_) => "invalid_chunking",
            Self::BadRequest(_) => "bad_request",
            Self::UnknownProfile(_) => "unknown_profile",
            Self::UnsupportedCommand(_) => "unsupported_command",
            Self::InvalidState => "invalid_state",
            Self::OAuthNotConfigured => "oauth_not_configured",
            Self::NotAuthorized(_) => "not_authorized",
            Self::ReindexBusy => "conflict",
            Self::NoDocuments => "no_documents",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Upstream(_) => "upstream_error",
            Self::Embedding(_) => "embedding_error",
            Self::Database(_) => "database_error",
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::KnowledgeDisabled
            | Self::InvalidChunking(_)
            | Self::BadRequest(_)
            | Self::UnknownProfile(_)
            | Self::UnsupportedCommand(_)
            | Self::InvalidState
            | Self::OAuthNotConfigured => StatusCode::BAD_REQUEST,
            Self::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ReindexBusy => StatusCode::CONFLICT,
            Self::NoDocuments => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::Embedding(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<anyhow::Error> for HearthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for HearthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream(format!("request timed out: {}", err))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for HearthError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {}", err))
    }
}
