//! Gateway repository trait
//!
//! The read side adapters need; implemented by the file store and by test doubles.

use async_trait::async_trait;

use super::model::GatewayRecord;
use crate::Result;

/// Repository interface for gateway lookups
#[async_trait]
pub trait GatewayRepository: Send + Sync {
    /// Get a gateway by ID, failing with `Error::GatewayNotFound` when absent
    async fn get_gateway(&self, gateway_id: &str) -> Result<GatewayRecord>;
}
