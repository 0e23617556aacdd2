//! Server error types.

use std::time::Duration;

use conduit_auth::AuthError;
use conduit_core::FailureKind;
use conduit_directory::CacheError;

/// Why a connection could not be brought into an active state.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The transport handle exposes no underlying connection.
    #[error("transport not recognized")]
    UnrecognizedTransport,

    /// Handshake attributes match neither connection kind.
    #[error("handshake attributes match no connection kind")]
    Unclassified,

    /// The credential could not be resolved into a principal.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The per-kind registration lock was not acquired in time.
    #[error("registration lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Publishing to the shared cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl LifecycleError {
    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnrecognizedTransport | Self::Unclassified => FailureKind::Classification,
            Self::Auth(e) => e.kind(),
            Self::LockTimeout(_) => FailureKind::RegistrationTimeout,
            Self::Cache(e) => e.kind(),
        }
    }
}

/// Error returned by a [`MessageProcessor`](crate::dispatch::MessageProcessor).
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The message does not have the shape this processor expects.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Handling failed.
    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidMessage(_) => FailureKind::DispatchDecode,
            Self::Failed(_) => FailureKind::Processor,
        }
    }
}

/// A failure while delivering one frame.
///
/// Every variant except [`DispatchError::Decode`] is scoped to a single
/// processor; none of them closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The text frame is not a JSON message envelope.
    #[error("frame does not decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// The processor returned an error.
    #[error("processor {processor} failed: {source}")]
    Processor {
        /// Processor name.
        processor: String,
        /// Underlying error.
        #[source]
        source: ProcessorError,
    },

    /// The processor did not finish in time.
    #[error("processor {processor} timed out after {after:?}")]
    Timeout {
        /// Processor name.
        processor: String,
        /// Configured bound.
        after: Duration,
    },

    /// The processor needs a principal and the credential did not resolve.
    #[error("processor {processor} skipped, credential did not resolve: {source}")]
    Unauthenticated {
        /// Processor name.
        processor: String,
        /// Underlying error.
        #[source]
        source: AuthError,
    },
}

impl DispatchError {
    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Decode(_) => FailureKind::DispatchDecode,
            Self::Processor { source, .. } => source.kind(),
            Self::Timeout { .. } => FailureKind::Processor,
            Self::Unauthenticated { source, .. } => source.kind(),
        }
    }

    /// Name of the processor the failure is scoped to, if any.
    pub fn processor(&self) -> Option<&str> {
        match self {
            Self::Decode(_) => None,
            Self::Processor { processor, .. }
            | Self::Timeout { processor, .. }
            | Self::Unauthenticated { processor, .. } => Some(processor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_kinds() {
        assert_eq!(
            LifecycleError::Unclassified.kind(),
            FailureKind::Classification
        );
        assert_eq!(
            LifecycleError::UnrecognizedTransport.kind(),
            FailureKind::Classification
        );
        assert_eq!(
            LifecycleError::from(AuthError::NoPrincipal(String::new())).kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            LifecycleError::LockTimeout(Duration::from_secs(10)).kind(),
            FailureKind::RegistrationTimeout
        );
        assert_eq!(
            LifecycleError::from(CacheError::Unavailable("down".into())).kind(),
            FailureKind::Registration
        );
    }

    #[test]
    fn only_timeout_leaves_connection_open() {
        assert!(!LifecycleError::LockTimeout(Duration::ZERO).kind().closes_connection());
        assert!(LifecycleError::Unclassified.kind().closes_connection());
        assert!(
            LifecycleError::from(CacheError::Unavailable(String::new()))
                .kind()
                .closes_connection()
        );
    }

    #[test]
    fn dispatch_kinds_and_processor() {
        let decode = DispatchError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(decode.kind(), FailureKind::DispatchDecode);
        assert!(decode.processor().is_none());

        let failed = DispatchError::Processor {
            processor: "chat".into(),
            source: ProcessorError::Failed("boom".into()),
        };
        assert_eq!(failed.kind(), FailureKind::Processor);
        assert_eq!(failed.processor(), Some("chat"));
        assert_eq!(failed.to_string(), "processor chat failed: boom");

        let invalid = DispatchError::Processor {
            processor: "chat".into(),
            source: ProcessorError::InvalidMessage("missing key".into()),
        };
        assert_eq!(invalid.kind(), FailureKind::DispatchDecode);

        let timeout = DispatchError::Timeout {
            processor: "slow".into(),
            after: Duration::from_millis(5),
        };
        assert_eq!(timeout.kind(), FailureKind::Processor);
    }
}
