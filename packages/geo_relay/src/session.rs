//! Per-consumer broadcast timer.
//!
//! A session moves `Idle → Active → Closed`. While active it wakes once per
//! tick, reads the store, and hands the formatted line to the consumer's
//! outbound channel. Nothing is sent until the store holds a valid record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PushError;
use crate::metrics::RelayMetrics;
use crate::position::PositionStore;
use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, timer not started
    Idle,
    /// Timer running
    Active,
    /// Timer cancelled; terminal
    Closed,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    /// No valid record yet
    Skipped,
}

pub struct BroadcastSession {
    id: ConnectionId,
    store: Arc<PositionStore>,
    metrics: Arc<RelayMetrics>,
    interval: Duration,
    /// Moved into the timer task on start
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BroadcastSession {
    pub fn new(
        id: ConnectionId,
        store: Arc<PositionStore>,
        metrics: Arc<RelayMetrics>,
        interval: Duration,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            id,
            store,
            metrics,
            interval,
            outbound: Some(outbound),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Closed
        } else if self.task.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// Token that fires once the session is closed, including when the timer
    /// closes itself after finding the consumer gone.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `Idle → Active`. Has no effect in any other state.
    pub fn start(&mut self) {
        if self.state() != SessionState::Idle {
            return;
        }
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        self.task = Some(tokio::spawn(run_ticks(
            self.id,
            self.store.clone(),
            self.metrics.clone(),
            self.interval,
            outbound,
            self.cancel.clone(),
        )));
    }

    /// `→ Closed`. Returns once the timer task has fully stopped, so no push
    /// can happen after this resolves.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.outbound = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(conn_id = %self.id, "Broadcast task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for BroadcastSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read the store once and push the current line if there is one.
pub async fn tick(
    store: &PositionStore,
    outbound: &mpsc::Sender<String>,
) -> Result<TickOutcome, PushError> {
    let snapshot = store.get().await;
    let Some(line) = snapshot.record.broadcast_line() else {
        return Ok(TickOutcome::Skipped);
    };
    match outbound.try_send(line.to_string()) {
        Ok(()) => Ok(TickOutcome::Sent),
        Err(TrySendError::Full(_)) => Err(PushError::Full),
        Err(TrySendError::Closed(_)) => Err(PushError::Closed),
    }
}

async fn run_ticks(
    id: ConnectionId,
    store: Arc<PositionStore>,
    metrics: Arc<RelayMetrics>,
    interval: Duration,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    // First push one full interval after connect.
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match tick(&store, &outbound).await {
                    Ok(TickOutcome::Sent) => {
                        metrics.snapshot_sent();
                        debug!(conn_id = %id, "Snapshot sent");
                    }
                    Ok(TickOutcome::Skipped) => {}
                    Err(PushError::Full) => {
                        metrics.snapshot_dropped();
                        debug!(conn_id = %id, "Consumer buffer full, dropping tick");
                    }
                    Err(PushError::Closed) => {
                        metrics.push_failed();
                        debug!(conn_id = %id, "Consumer gone, closing broadcast session");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{CalendarFields, Coordinate, PositionRecord};
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(1000);

    fn record(ts: i64) -> PositionRecord {
        PositionRecord {
            timestamp: Some(ts),
            calendar: CalendarFields {
                year: Some(2023),
                month: Some(11),
                day: Some(14),
                hour: Some(12),
                minute: Some(0),
                second: Some(0),
            },
            latitude: Some(Coordinate::from_micros(35_689_500)),
            longitude: Some(Coordinate::from_micros(139_691_700)),
        }
    }

    fn session(capacity: usize) -> (BroadcastSession, mpsc::Receiver<String>, Arc<PositionStore>) {
        let store = Arc::new(PositionStore::new());
        let (tx, rx) = mpsc::channel(capacity);
        let session = BroadcastSession::new(
            ConnectionId::new(),
            store.clone(),
            Arc::new(RelayMetrics::new()),
            TICK,
            tx,
        );
        (session, rx, store)
    }

    #[tokio::test]
    async fn tick_skips_until_valid() {
        let store = PositionStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        assert_eq!(tick(&store, &tx).await, Ok(TickOutcome::Skipped));
        assert!(rx.try_recv().is_err());

        store.set(record(1)).await;
        assert_eq!(tick(&store, &tx).await, Ok(TickOutcome::Sent));
        assert_eq!(
            rx.try_recv().unwrap(),
            "1,2023,11,14,12,0,0,35.689500,139.691700"
        );
    }

    #[tokio::test]
    async fn tick_reports_full_and_closed() {
        let store = PositionStore::new();
        store.set(record(1)).await;

        let (tx, rx) = mpsc::channel(1);
        assert_eq!(tick(&store, &tx).await, Ok(TickOutcome::Sent));
        assert_eq!(tick(&store, &tx).await, Err(PushError::Full));
        drop(rx);
        assert_eq!(tick(&store, &tx).await, Err(PushError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_idle_active_closed() {
        let (mut s, _rx, _store) = session(4);
        assert_eq!(s.state(), SessionState::Idle);
        s.start();
        assert_eq!(s.state(), SessionState::Active);
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);

        // Closed is terminal.
        s.start();
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_before_first_ingest_then_every_tick() {
        let (mut s, mut rx, store) = session(4);
        s.start();

        assert!(timeout(TICK * 3, rx.recv()).await.is_err());

        store.set(record(7)).await;
        let first = rx.recv().await.unwrap();
        assert!(first.starts_with("7,2023"));

        store.set(record(8)).await;
        let second = rx.recv().await.unwrap();
        assert!(second.starts_with("8,2023"));

        // Same record keeps being re-sent on later ticks.
        assert_eq!(rx.recv().await.unwrap(), second);
        s.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_push_waits_one_interval() {
        let (mut s, mut rx, store) = session(4);
        store.set(record(1)).await;
        let started = Instant::now();
        s.start();
        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), TICK);
        s.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_stream() {
        let (mut s, mut rx, store) = session(4);
        store.set(record(1)).await;
        s.start();
        rx.recv().await.unwrap();

        s.close().await;
        // The task owned the only sender; once joined the channel is done.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn push_to_departed_consumer_closes_session() {
        let (mut s, rx, store) = session(4);
        let closed = s.closed_token();
        store.set(record(1)).await;
        s.start();
        drop(rx);

        closed.cancelled().await;
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.metrics.snapshot().broadcast.push_failures, 1);
        s.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_drops_tick_without_closing() {
        let (mut s, mut rx, store) = session(1);
        store.set(record(1)).await;
        s.start();

        tokio::time::sleep(TICK * 2 + TICK / 2).await;
        assert_eq!(s.metrics.snapshot().broadcast.sent, 1);
        assert_eq!(s.metrics.snapshot().broadcast.dropped, 1);
        assert_eq!(s.state(), SessionState::Active);

        rx.recv().await.unwrap();
        assert!(rx.recv().await.is_some());
        s.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_timer() {
        let (mut s, mut rx, store) = session(4);
        store.set(record(1)).await;
        s.start();
        let token = s.closed_token();
        drop(s);
        assert!(token.is_cancelled());
        assert!(rx.recv().await.is_none());
    }
}
