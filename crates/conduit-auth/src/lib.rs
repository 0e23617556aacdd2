//! # conduit-auth
//!
//! Resolves a bearer credential into a [`Principal`] by calling the external
//! identity service.
//!
//! - [`authenticate`] is the stateless call itself
//! - [`extract_principal`] converts the service's response body
//! - [`Authenticator`] is the seam the lifecycle controller and the dispatch
//!   engine depend on; [`HttpAuthenticator`] is the production implementation
//!
//! [`Principal`]: conduit_core::Principal

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod principal;

pub use client::{Authenticator, HttpAuthenticator, authenticate};
pub use errors::AuthError;
pub use principal::extract_principal;
