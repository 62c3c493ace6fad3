//! Error taxonomy for publishing and backplane transport.
//!
//! - [`EnvelopeError`]: an event could not be encoded, or received bytes could
//!   not be decoded
//! - [`BackplaneError`]: the shared transport failed (publish or subscription)
//! - [`PublishError`]: what a publisher sees; only encode and transport
//!   failures at publish time ever propagate
//!
//! A full mailbox and an unknown target are deliberately not errors.

use thiserror::Error;

/// Failure converting between an event and its wire envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The event could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    /// The received bytes are not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Failure of the shared publish/subscribe transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackplaneError {
    /// The backplane cannot be reached.
    #[error("backplane unavailable: {0}")]
    Unavailable(String),
    /// An established subscription dropped.
    #[error("backplane connection lost: {0}")]
    ConnectionLost(String),
    /// The backplane was shut down.
    #[error("backplane closed")]
    Closed,
}

/// Error returned to a caller of `publish`.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event could not be serialized. Never retried internally.
    #[error(transparent)]
    Encode(#[from] EnvelopeError),
    /// The backplane write failed. The caller decides whether to retry.
    #[error("publish failed: {0}")]
    Transport(#[from] BackplaneError),
}

impl PublishError {
    /// Whether retrying the same publish could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(BackplaneError::Unavailable(_) | BackplaneError::ConnectionLost(_))
        )
    }

    /// Short machine-readable kind, used as a metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Encode(_) => "encode",
            Self::Transport(_) => "transport",
        }
    }
}
