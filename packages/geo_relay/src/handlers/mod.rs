pub mod consumer;
pub mod health;
pub mod ingest;

// Re-export all handlers for easy route registration
pub use consumer::{consumer_websocket_handler, serve_consumer};
pub use health::{health_handler, health_live_handler, metrics_handler};
pub use ingest::update_data;
