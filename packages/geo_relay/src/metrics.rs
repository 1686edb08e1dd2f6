//! Relay metrics for observability
//!
//! Counters for consumer connections, ingest outcomes, and broadcast delivery.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide relay metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    /// Currently attached consumers
    pub active_connections: AtomicU64,
    /// Total consumers since start
    pub total_connections: AtomicU64,

    // Ingest metrics
    pub ingests_accepted: AtomicU64,
    pub ingests_rejected: AtomicU64,

    // Broadcast metrics
    /// Snapshots handed to a consumer's outbound buffer
    pub snapshots_sent: AtomicU64,
    /// Ticks skipped because the consumer's buffer was full
    pub snapshots_dropped: AtomicU64,
    /// Pushes that found the consumer gone
    pub push_failures: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn ingest_accepted(&self) {
        self.ingests_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingest_rejected(&self) {
        self.ingests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_sent(&self) {
        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_dropped(&self) {
        self.snapshots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_failed(&self) {
        self.push_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            ingest: IngestMetrics {
                accepted: self.ingests_accepted.load(Ordering::Relaxed),
                rejected: self.ingests_rejected.load(Ordering::Relaxed),
            },
            broadcast: BroadcastMetrics {
                sent: self.snapshots_sent.load(Ordering::Relaxed),
                dropped: self.snapshots_dropped.load(Ordering::Relaxed),
                push_failures: self.push_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub ingest: IngestMetrics,
    pub broadcast: BroadcastMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMetrics {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMetrics {
    pub sent: u64,
    pub dropped: u64,
    pub push_failures: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub has_position: bool,
    pub consumers: u64,
    pub uptime_secs: u64,
}
