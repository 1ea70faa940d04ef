//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelId;

/// Result type alias using the subsystem error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the streaming subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// Two listeners registered for the same path at startup
    #[error("duplicate listener for path: {0}")]
    DuplicatePath(String),

    /// Client IP rejected by access control
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No listener bound to the requested path
    #[error("not found, path={0}")]
    PathNotFound(String),

    /// Connect admission rejected by rate control
    #[error("rate limit exceeded, group={0}")]
    RateLimited(String),

    /// Request could not be parsed into a streaming request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Write on a channel that has already been closed
    #[error("channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// Group operation on a channel the registry does not own
    #[error("channel not registered: {0}")]
    ChannelNotRegistered(ChannelId),

    /// Application on-connect callback failed
    #[error("listener error: {0}")]
    Listener(anyhow::Error),

    /// Event payload serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    /// HTTP response construction error
    #[error("http error: {0}")]
    Http(Box<axum::http::Error>),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<axum::http::Error> for Error {
    fn from(err: axum::http::Error) -> Self {
        Self::Http(Box::new(err))
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Stable error code
    pub code: String,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create an error response with a code
    pub fn new(status: StatusCode, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            status: status.as_u16(),
        }
    }
}

impl Error {
    /// Stable error code reported to clients and logs
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicatePath(_) => "SSE_DUPLICATE_PATH",
            Self::Forbidden(_) => "SSE_FORBIDDEN",
            Self::PathNotFound(_) => "PATH_NOT_FOUND",
            Self::RateLimited(_) => "SSE_RATE_LIMITED",
            Self::BadRequest(_) => "SSE_BAD_REQUEST",
            Self::ChannelClosed(_) => "SSE_CHANNEL_CLOSED",
            Self::ChannelNotRegistered(_) => "SSE_CHANNEL_NOT_REGISTERED",
            Self::Listener(_) => "SSE_LISTENER_ERROR",
            Self::Serialization(_) => "SSE_SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status this error maps to
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PathNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal failures keep their detail in the logs, not the body
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse::new(status, code, message))).into_response()
    }
}
