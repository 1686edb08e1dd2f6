//! Error types for ingest, broadcast, and configuration.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("consumer push failed: {0}")]
    ConsumerPush(#[from] PushError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::ConsumerPush(_) => "consumer_push",
            Self::Config(_) => "config",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::ConsumerPush(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Why a snapshot could not be handed to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Outbound buffer is full; this tick is dropped.
    #[error("consumer buffer full")]
    Full,

    /// The consumer's writer has gone away.
    #[error("consumer disconnected")]
    Closed,
}
