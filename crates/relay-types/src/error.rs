//! Shared error types for the relay.

use crate::message::FormatKind;
use thiserror::Error;

/// Top-level error type for channel delivery.
///
/// Every variant collapses into a [`crate::message::DeliveryResult`] at the
/// dispatcher boundary; nothing here is surfaced to callers as a fault.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad or missing configuration/target, detected before any I/O.
    #[error("{0}")]
    Validation(String),

    /// Token issuance failed or the credentials are invalid.
    #[error("{0}")]
    Auth(String),

    /// The message cannot be rendered in any format the channel accepts.
    #[error("no common content format: message offers [{offered}], channel accepts [{accepted}]")]
    UnsupportedFormat {
        /// Formats the content can render.
        offered: String,
        /// Formats the channel declares.
        accepted: String,
    },

    /// Network failure, non-2xx status, or an unparseable response.
    #[error("{message}")]
    Transport {
        /// Human-readable cause.
        message: String,
        /// Raw response body, when one was received.
        body: Option<String>,
    },

    /// The provider accepted the request but reported a business failure.
    #[error("{message}")]
    Delivery {
        /// Provider error code.
        code: i64,
        /// Provider message, with any auxiliary diagnostics appended.
        message: String,
        /// Raw response body.
        body: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Build an [`RelayError::UnsupportedFormat`] from the two format sets.
    pub fn unsupported_format(offered: &[FormatKind], accepted: &[FormatKind]) -> Self {
        let join = |kinds: &[FormatKind]| {
            kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Self::UnsupportedFormat {
            offered: join(offered),
            accepted: join(accepted),
        }
    }

    /// Wrap a transport-level failure that produced no response body.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            body: None,
        }
    }

    /// The raw provider response body kept for diagnostics, if any.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Transport { body, .. } => body.as_deref(),
            Self::Delivery { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}

/// Alias for Result with RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
