//! # conduit-directory
//!
//! Where a gateway node records the connections it owns.
//!
//! - [`LocalDirectory`]: this node's in-memory map from connection id to live
//!   transport, split into user and group scopes. Source of truth.
//! - [`SessionCache`]: the cluster-wide view, partitioned into one bucket per
//!   broker so any node can find the owner of a user or group session.
//! - [`CacheStore`]: the key/value backend behind the cache, with an
//!   in-memory and a Redis implementation.

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod local;
pub mod store;

pub use cache::SessionCache;
pub use errors::CacheError;
pub use local::{GroupSession, LocalDirectory, UserSession};
pub use store::{CacheStore, MemoryStore, RedisStore};
