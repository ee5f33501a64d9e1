// Order gateway: signed REST execution against the venue, single and
// batched, with per-call error classification.

pub mod client;
pub mod orders;
pub mod payload;

use async_trait::async_trait;
use thiserror::Error;

use crate::gateway::payload::VenueResponse;

/// Faults below the business level. Venue rejections are NOT here: a
/// rejected order is an outcome, carried in `VenueResponse.ret_code`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network-level failure (timeout, reset, DNS); retriable next tick.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Response arrived but could not be understood; not retriable per call.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

/// Seam between order operations and the wire. Production uses
/// `GatewayClient`; tests substitute a scripted implementation.
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn submit(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<VenueResponse, GatewayError>;
}

#[async_trait]
impl VenueApi for client::GatewayClient {
    async fn submit(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<VenueResponse, GatewayError> {
        client::GatewayClient::submit(self, endpoint, body).await
    }
}
