//! Gateway adapters
//!
//! This crate provides the capability set the control plane uses to manage
//! LLM provider deployments on a remote gateway, and the backends that
//! implement it. Callers only ever see [`GatewayAdapter`]; concrete backends
//! are chosen at runtime through [`AdapterFactory`] by their type name.

mod adapter;
mod error;
mod factory;
pub mod mock;
pub mod onpremise;
mod types;

pub use adapter::GatewayAdapter;
pub use error::{AdapterError, Result};
pub use factory::{register_default_adapters, AdapterConstructor, AdapterFactory};
pub use types::*;
