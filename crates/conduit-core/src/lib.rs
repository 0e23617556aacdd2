//! # conduit-core
//!
//! Foundation types, errors, branded IDs, and logging for the conduit gateway.
//!
//! This crate provides the shared vocabulary that all other conduit crates depend on:
//!
//! - **Branded IDs**: [`ids::ConnectionId`], [`ids::BrokerId`] as newtypes
//! - **Identity**: [`principal::Principal`] produced by the identity service
//! - **Directory entries**: [`session::UserSessionEntry`], [`session::GroupSessionEntry`]
//! - **Handshake**: [`attributes::HandshakeAttributes`] set by the negotiation layer
//! - **Transport**: [`transport::Transport`], the handle the directory stores per connection
//! - **Errors**: [`errors::FailureKind`] taxonomy shared by lifecycle and dispatch
//! - **Logging**: [`logging::init_subscriber`] and a log-capturing layer for tests
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other conduit crates.

#![deny(unsafe_code)]

pub mod attributes;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod principal;
pub mod session;
pub mod transport;

pub use attributes::HandshakeAttributes;
pub use errors::FailureKind;
pub use ids::{BrokerId, ConnectionId};
pub use principal::Principal;
pub use session::{ConnectionKind, GroupSessionEntry, UserSessionEntry};
pub use transport::{Transport, TransportError};
