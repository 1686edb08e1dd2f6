//! Active consumer sessions keyed by connection id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::metrics::RelayMetrics;
use crate::position::PositionStore;
use crate::session::{BroadcastSession, SessionState};

/// Identity of one consumer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: ConnectionId,
    /// Fires when the session closes, whether by deregistration or because
    /// the timer found the consumer gone.
    pub closed: CancellationToken,
}

pub struct ConnectionRegistry {
    store: Arc<PositionStore>,
    metrics: Arc<RelayMetrics>,
    tick_interval: Duration,
    sessions: Mutex<HashMap<ConnectionId, BroadcastSession>>,
}

impl ConnectionRegistry {
    pub fn new(
        store: Arc<PositionStore>,
        metrics: Arc<RelayMetrics>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            tick_interval,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session for a newly connected consumer and start its timer.
    pub async fn register(&self, outbound: mpsc::Sender<String>) -> Registration {
        let id = ConnectionId::new();
        let mut session = BroadcastSession::new(
            id,
            self.store.clone(),
            self.metrics.clone(),
            self.tick_interval,
            outbound,
        );
        session.start();
        let closed = session.closed_token();

        self.sessions.lock().await.insert(id, session);
        self.metrics.connection_opened();
        info!(conn_id = %id, "Consumer connected");

        Registration { id, closed }
    }

    /// Close and forget the session for `id`. The timer is stopped before
    /// this returns. Returns false if `id` was not registered.
    pub async fn deregister(&self, id: &ConnectionId) -> bool {
        let session = self.sessions.lock().await.remove(id);
        let Some(mut session) = session else {
            return false;
        };
        session.close().await;
        self.metrics.connection_closed();
        info!(conn_id = %id, "Consumer disconnected");
        true
    }

    pub async fn state(&self, id: &ConnectionId) -> Option<SessionState> {
        self.sessions.lock().await.get(id).map(BroadcastSession::state)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every session (process shutdown).
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        let count = sessions.len();
        for (_, mut session) in sessions {
            session.close().await;
            self.metrics.connection_closed();
        }
        if count > 0 {
            info!("Closed {} consumer sessions", count);
        }
    }
}
