//! Relay composition: shared state, the two routers, and their listeners.

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::RelayState;
use crate::config::RelayConfig;
use crate::handlers;
use crate::ingest::IngestEndpoint;
use crate::metrics::RelayMetrics;
use crate::position::PositionStore;
use crate::registry::ConnectionRegistry;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// Owns the process-wide position store and everything that references it.
pub struct RelayService {
    config: RelayConfig,
    state: RelayState,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Self {
        let store = Arc::new(PositionStore::new());
        let metrics = Arc::new(RelayMetrics::new());
        let ingest = Arc::new(IngestEndpoint::new(store.clone(), metrics.clone()));
        let registry = Arc::new(ConnectionRegistry::new(
            store.clone(),
            metrics.clone(),
            config.websocket.tick_interval,
        ));

        let state = RelayState {
            store,
            ingest,
            registry,
            metrics,
            websocket: Arc::new(config.websocket.clone()),
        };

        Self { config, state }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Producer-facing routes.
    pub fn ingest_router(&self) -> Router {
        Router::new()
            .route("/updateData", post(handlers::update_data))
            .route("/health", get(handlers::health_handler))
            .route("/health/live", get(handlers::health_live_handler))
            .route("/metrics", get(handlers::metrics_handler))
            .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Consumer-facing routes: every path upgrades to a WebSocket.
    pub fn broadcast_router(&self) -> Router {
        Router::new()
            .fallback(handlers::consumer_websocket_handler)
            .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
            .with_state(self.state.clone())
    }

    /// Bind both listeners. Either bind failing aborts startup.
    pub async fn bind(self) -> Result<BoundRelay> {
        let ingest_listener = TcpListener::bind(self.config.ingest_addr)
            .await
            .with_context(|| format!("Failed to bind ingest listener on {}", self.config.ingest_addr))?;
        let broadcast_listener = TcpListener::bind(self.config.broadcast_addr)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind broadcast listener on {}",
                    self.config.broadcast_addr
                )
            })?;

        Ok(BoundRelay {
            ingest_addr: ingest_listener.local_addr()?,
            broadcast_addr: broadcast_listener.local_addr()?,
            ingest_listener,
            broadcast_listener,
            service: self,
        })
    }
}

/// A relay whose listeners are bound but not yet serving.
pub struct BoundRelay {
    service: RelayService,
    ingest_listener: TcpListener,
    broadcast_listener: TcpListener,
    ingest_addr: SocketAddr,
    broadcast_addr: SocketAddr,
}

impl BoundRelay {
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    pub fn state(&self) -> &RelayState {
        self.service.state()
    }

    /// Serve both listeners until `shutdown` resolves, then close every
    /// consumer session.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            shutdown.await;
            trigger.cancel();
        });

        let ingest_app = self.service.ingest_router();
        let broadcast_app = self.service.broadcast_router();

        info!("Ingest listening on http://{}", self.ingest_addr);
        info!("  POST /updateData  - submit producer position");
        info!("  GET  /health      - relay status");
        info!("Broadcast listening on ws://{}", self.broadcast_addr);

        let ingest = axum::serve(self.ingest_listener, ingest_app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned());
        let broadcast = axum::serve(self.broadcast_listener, broadcast_app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned());

        let result = tokio::try_join!(
            async { ingest.await.context("Ingest server error") },
            async { broadcast.await.context("Broadcast server error") },
        );

        cancel.cancel();
        self.service.state.registry.close_all().await;
        info!("Relay stopped");
        result.map(|_| ())
    }
}
