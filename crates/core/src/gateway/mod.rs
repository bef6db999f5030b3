//! Gateway module
//!
//! Gateway records as the control plane stores them, and the store they live in.

mod model;
mod repository;
mod store;

pub use model::*;
pub use repository::GatewayRepository;
pub use store::FileGatewayStore;
