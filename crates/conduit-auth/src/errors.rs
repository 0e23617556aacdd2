//! Authentication error types.

use conduit_core::FailureKind;

/// Errors that can occur while resolving a credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identity service was unreachable or the request timed out.
    #[error("identity service request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity service answered with a non-success status.
    #[error("identity service rejected credential ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response carried no usable principal.
    #[error("no principal in identity response: {0}")]
    NoPrincipal(String),

    /// The response body was not JSON.
    #[error("invalid identity response: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Failure category; every authentication error rejects the connection
    /// or skips the processor that needed the principal.
    pub fn kind(&self) -> FailureKind {
        FailureKind::Authentication
    }
}
