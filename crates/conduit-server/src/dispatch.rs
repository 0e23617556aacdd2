//! Fan-out of inbound frames to message processors.
//!
//! Every frame is offered to every registered processor, one after another.
//! Each processor's turn is isolated: an authentication failure, an error, or
//! a timeout is logged, counted, and the next processor still runs. None of
//! these close the connection.
//!
//! The principal is handed to a processor as part of its [`FrameContext`]
//! and is dropped when the processor's turn ends, so it never carries over
//! to a later frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conduit_auth::Authenticator;
use conduit_core::{ConnectionId, HandshakeAttributes, Principal};
use conduit_directory::LocalDirectory;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::errors::{DispatchError, ProcessorError};
use crate::metrics::{
    FRAMES_RECEIVED_TOTAL, HEARTBEATS_TOTAL, PROCESSOR_DURATION_SECONDS, PROCESSOR_FAILURES_TOTAL,
};

/// Slow-processor warning threshold.
const SLOW_PROCESSOR: Duration = Duration::from_secs(5);

/// Generic message envelope decoded from a text frame.
///
/// Only the common routing fields are named; everything else a processor
/// needs is kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Routing or correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Message type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Any other top-level field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a processor sees of the connection a frame arrived on.
pub struct FrameContext<'a> {
    /// Connection the frame arrived on.
    pub connection_id: &'a ConnectionId,
    /// Handshake attributes of that connection.
    pub attributes: &'a HandshakeAttributes,
    /// Principal resolved for this frame, when the processor asked for one
    /// and the connection carries a credential.
    pub principal: Option<&'a Principal>,
    /// This node's directory, for replying or routing to local sessions.
    pub directory: &'a LocalDirectory,
}

/// A pluggable handler that receives every inbound frame.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Stable name used in logs, metrics, and [`ProcessorRegistry::unregister`].
    fn name(&self) -> &str;

    /// Whether the frame's principal must be resolved before this processor
    /// runs.
    fn needs_principal(&self) -> bool {
        false
    }

    /// Handle a decoded text frame.
    async fn handle_message(
        &self,
        ctx: &FrameContext<'_>,
        message: MessageEnvelope,
    ) -> Result<(), ProcessorError>;

    /// Handle a binary frame. Ignored unless overridden.
    async fn handle_bytes(&self, ctx: &FrameContext<'_>, payload: &[u8]) -> Result<(), ProcessorError> {
        let _ = (ctx, payload);
        Ok(())
    }
}

/// Runtime-mutable set of processors.
///
/// Dispatch takes a snapshot per frame, so processors added or removed
/// while a frame is in flight take effect from the next frame.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<Vec<Arc<dyn MessageProcessor>>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor. A processor with the same name is replaced in
    /// place.
    pub fn register(&self, processor: Arc<dyn MessageProcessor>) {
        let mut processors = self.processors.write();
        if let Some(slot) = processors.iter_mut().find(|p| p.name() == processor.name()) {
            *slot = processor;
        } else {
            processors.push(processor);
        }
    }

    /// Remove the processor called `name`. Returns whether one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut processors = self.processors.write();
        let before = processors.len();
        processors.retain(|p| p.name() != name);
        processors.len() != before
    }

    /// Current processors in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn MessageProcessor>> {
        self.processors.read().clone()
    }

    /// Registered processor names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.processors
            .read()
            .iter()
            .map(|p| p.name().to_owned())
            .collect()
    }

    /// Number of registered processors.
    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    /// Whether no processor is registered.
    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }
}

/// Result of dispatching one frame.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// The frame was the heartbeat sentinel and was discarded.
    pub heartbeat: bool,
    /// Processors whose turn completed successfully.
    pub delivered: usize,
    /// Failures, at most one per processor.
    pub failures: Vec<DispatchError>,
}

#[derive(Clone, Copy)]
enum Frame<'a> {
    Text(&'a MessageEnvelope),
    Binary(&'a [u8]),
}

impl Frame<'_> {
    fn kind(self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Delivers inbound frames to every registered processor.
pub struct DispatchEngine {
    registry: Arc<ProcessorRegistry>,
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<LocalDirectory>,
    heartbeat: String,
    processor_timeout: Duration,
}

impl DispatchEngine {
    /// Create an engine.
    ///
    /// `heartbeat` is the text frame discarded as a keep-alive;
    /// `processor_timeout` bounds each processor's turn.
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<LocalDirectory>,
        heartbeat: impl Into<String>,
        processor_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            authenticator,
            directory,
            heartbeat: heartbeat.into(),
            processor_timeout,
        }
    }

    /// The processor registry this engine reads from.
    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Dispatch a text frame.
    #[instrument(skip_all, fields(conn_id = %connection_id))]
    pub async fn dispatch_text(
        &self,
        connection_id: &ConnectionId,
        attributes: &HandshakeAttributes,
        text: &str,
    ) -> DispatchReport {
        if text == self.heartbeat {
            trace!("heartbeat");
            counter!(HEARTBEATS_TOTAL).increment(1);
            return DispatchReport {
                heartbeat: true,
                ..DispatchReport::default()
            };
        }
        counter!(FRAMES_RECEIVED_TOTAL, "kind" => "text").increment(1);

        let envelope: MessageEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = DispatchError::from(e);
                error!(kind = %err.kind(), len = text.len(), error = %err, "undecodable text frame");
                counter!(PROCESSOR_FAILURES_TOTAL, "processor" => "-", "kind" => err.kind().as_str())
                    .increment(1);
                return DispatchReport {
                    failures: vec![err],
                    ..DispatchReport::default()
                };
            }
        };

        self.fan_out(connection_id, attributes, Frame::Text(&envelope))
            .await
    }

    /// Dispatch a binary frame. The payload reaches processors unmodified.
    #[instrument(skip_all, fields(conn_id = %connection_id, len = payload.len()))]
    pub async fn dispatch_binary(
        &self,
        connection_id: &ConnectionId,
        attributes: &HandshakeAttributes,
        payload: &[u8],
    ) -> DispatchReport {
        counter!(FRAMES_RECEIVED_TOTAL, "kind" => "binary").increment(1);
        self.fan_out(connection_id, attributes, Frame::Binary(payload))
            .await
    }

    /// Record a pong. Pongs are never dispatched.
    pub fn on_pong(&self, connection_id: &ConnectionId) {
        counter!(FRAMES_RECEIVED_TOTAL, "kind" => "pong").increment(1);
        info!(conn_id = %connection_id, "pong received");
    }

    async fn fan_out(
        &self,
        connection_id: &ConnectionId,
        attributes: &HandshakeAttributes,
        frame: Frame<'_>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for processor in self.registry.snapshot() {
            match self.deliver(processor.as_ref(), connection_id, attributes, frame).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    error!(
                        processor = processor.name(),
                        kind = %err.kind(),
                        frame = frame.kind(),
                        error = %err,
                        "processor failed"
                    );
                    counter!(
                        PROCESSOR_FAILURES_TOTAL,
                        "processor" => processor.name().to_owned(),
                        "kind" => err.kind().as_str()
                    )
                    .increment(1);
                    report.failures.push(err);
                }
            }
        }
        report
    }

    async fn deliver(
        &self,
        processor: &dyn MessageProcessor,
        connection_id: &ConnectionId,
        attributes: &HandshakeAttributes,
        frame: Frame<'_>,
    ) -> Result<(), DispatchError> {
        let name = processor.name();
        let principal = match attributes.token() {
            Some(token) if processor.needs_principal() => Some(
                self.authenticator
                    .authenticate(token)
                    .await
                    .map_err(|source| DispatchError::Unauthenticated {
                        processor: name.to_owned(),
                        source,
                    })?,
            ),
            _ => None,
        };

        let ctx = FrameContext {
            connection_id,
            attributes,
            principal: principal.as_ref(),
            directory: &self.directory,
        };

        let start = Instant::now();
        let outcome = match frame {
            Frame::Text(envelope) => {
                tokio::time::timeout(
                    self.processor_timeout,
                    processor.handle_message(&ctx, envelope.clone()),
                )
                .await
            }
            Frame::Binary(payload) => {
                tokio::time::timeout(self.processor_timeout, processor.handle_bytes(&ctx, payload))
                    .await
            }
        };

        let elapsed = start.elapsed();
        histogram!(PROCESSOR_DURATION_SECONDS, "processor" => name.to_owned())
            .record(elapsed.as_secs_f64());
        if elapsed >= SLOW_PROCESSOR {
            warn!(processor = name, duration_secs = elapsed.as_secs_f64(), "slow processor");
        }

        match outcome {
            Ok(Ok(())) => {
                debug!(processor = name, "frame handled");
                Ok(())
            }
            Ok(Err(source)) => Err(DispatchError::Processor {
                processor: name.to_owned(),
                source,
            }),
            Err(_elapsed) => Err(DispatchError::Timeout {
                processor: name.to_owned(),
                after: self.processor_timeout,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
