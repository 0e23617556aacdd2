//! # conduit-server
//!
//! Axum WebSocket front end of a conduit gateway node.
//!
//! - [`lifecycle`]: classify, authenticate, and register each connection in the
//!   local directory and the shared cache
//! - [`dispatch`]: fan every inbound frame out to the registered processors
//! - [`session`]: per-socket read/write loop with ping/pong liveness
//! - [`reconcile`]: keep live sessions fresh in the shared cache
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod shutdown;

#[cfg(test)]
mod test_helpers;

pub use config::ServerConfig;
pub use connection::{ClientConnection, SockJsSession};
pub use dispatch::{
    DispatchEngine, DispatchReport, FrameContext, MessageEnvelope, MessageProcessor,
    ProcessorRegistry,
};
pub use errors::{DispatchError, LifecycleError, ProcessorError};
pub use lifecycle::{ConnectionState, LifecycleController};
pub use server::{GatewayDeps, GatewayServer};
