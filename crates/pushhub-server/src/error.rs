//! HTTP layer errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pushhub_core::PublishError;
use serde_json::json;
use thiserror::Error;

/// Failure starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested `host:port`.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The server loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// A rejected publish, rendered as a JSON error response.
#[derive(Debug)]
pub struct PublishRejection(pub PublishError);

impl PublishRejection {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PublishError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PublishError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<PublishError> for PublishRejection {
    fn from(err: PublishError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PublishRejection {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "retryable": self.0.is_retryable(),
        });
        (self.status(), Json(body)).into_response()
    }
}
