//! Core library for the agent control plane
//!
//! This crate contains the pieces shared by the adapter layer and the server:
//! - Gateway records and the gateway store
//! - The credential vault used to keep remote gateway secrets at rest
//! - Shared error types

pub mod crypto;
pub mod error;
pub mod gateway;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
