//! Failure taxonomy shared by the lifecycle controller and the dispatch engine.
//!
//! Each crate defines its own `thiserror` error type; every one of them maps
//! onto a [`FailureKind`], which decides the propagation policy and the
//! metric label.

use serde::{Deserialize, Serialize};

/// Category of a gateway failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Handshake attributes match neither connection kind, or the transport
    /// type is unrecognized.
    Classification,
    /// Identity service unreachable or returned no usable principal.
    Authentication,
    /// Per-kind registration lock not acquired in time.
    RegistrationTimeout,
    /// Writing the local directory or the shared cache failed.
    Registration,
    /// Frame payload did not decode into the processor's message shape.
    DispatchDecode,
    /// A processor's handling operation failed or timed out.
    Processor,
}

impl FailureKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Authentication => "authentication",
            Self::RegistrationTimeout => "registration_timeout",
            Self::Registration => "registration",
            Self::DispatchDecode => "dispatch_decode",
            Self::Processor => "processor",
        }
    }

    /// Whether this failure ends the connection.
    ///
    /// Setup failures close the transport; a registration timeout leaves the
    /// connection open but unregistered; dispatch failures never close it.
    pub fn closes_connection(self) -> bool {
        matches!(
            self,
            Self::Classification | Self::Authentication | Self::Registration
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
