//! Errors surfaced by the feed client.
//!
//! Every failure falls into one of three kinds:
//! - `NetworkUnreachable`: the request never got a response
//! - `RequestFailed`: the server answered with a non-2xx status (or an unusable body)
//! - `ValidationFailed`: a local precondition failed and nothing was sent
//!
//! None of them are fatal; the client stays usable after any error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl ClientError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ClientError::ValidationFailed(msg.into())
    }

    /// HTTP status for server-side failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::NetworkUnreachable(_))
    }
}
