//! Live position relay: one producer posts its location over HTTP, every
//! connected WebSocket consumer receives it once per tick.

use std::sync::Arc;

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod position;
pub mod registry;
pub mod service;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use config::{FileConfig, RelayConfig};
pub use error::{PushError, RelayError};
pub use ingest::{IngestEndpoint, IngestPayload};
pub use position::{BroadcastLine, Coordinate, PositionRecord, PositionStore};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use service::{BoundRelay, RelayService};
pub use session::{BroadcastSession, SessionState};

/// State shared by the ingest and broadcast routers.
#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<PositionStore>,
    pub ingest: Arc<IngestEndpoint>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<metrics::RelayMetrics>,
    pub websocket: Arc<config::WebSocketConfig>,
}
