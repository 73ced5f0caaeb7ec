//! Live Metrics Aggregator.
//!
//! [`LiveMetrics`] is the plain state: latest engagement and progress
//! sub-objects, bounded chart histories and the alert feed. [`Aggregator`]
//! wraps it in a single worker task that is the only writer. Push events and
//! poll results arrive on separate queues and are applied one at a time, and
//! every applied update publishes a fresh immutable [`LiveSnapshot`] for
//! readers.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wire::{AlertRecord, EngagementMetrics, ProgressMetrics, ProgressStreamPoint, PushMessage, StreamHistoryPoint};

use crate::bootstrap::Bootstrap;
use crate::config::{DEFAULT_ALERT_CAPACITY, DEFAULT_HISTORY_CAPACITY};
use crate::stream::{ConnectionState, StreamEvent};

/// Queue depth between the poller and the aggregator worker.
const POLL_QUEUE_CAPACITY: usize = 16;

/// Capacities of the bounded collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub history: usize,
    pub alerts: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { history: DEFAULT_HISTORY_CAPACITY, alerts: DEFAULT_ALERT_CAPACITY }
    }
}

/// Fixed-capacity insertion-ordered buffer. Appends at the tail and evicts
/// from the head.
#[derive(Clone, Debug)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::new(), capacity }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Newest-first alert list, truncated at capacity.
#[derive(Clone, Debug)]
pub struct AlertFeed {
    items: VecDeque<AlertRecord>,
    capacity: usize,
}

impl AlertFeed {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::new(), capacity }
    }

    pub fn push(&mut self, alert: AlertRecord) {
        self.items.push_front(alert);
        self.items.truncate(self.capacity);
    }

    /// Replace the feed with a server-ordered list.
    pub fn replace(&mut self, alerts: Vec<AlertRecord>) {
        self.items = alerts.into_iter().take(self.capacity).collect();
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.items.iter().cloned().collect()
    }
}

/// Immutable copy of aggregator state handed to readers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub connection: ConnectionState,
    pub engagement: Option<EngagementMetrics>,
    pub progress: Option<ProgressMetrics>,
    /// Engagement samples, oldest first.
    pub history: Vec<StreamHistoryPoint>,
    /// Progress samples from the poll fallback, oldest first.
    pub progress_history: Vec<ProgressStreamPoint>,
    /// Alerts, newest first.
    pub alerts: Vec<AlertRecord>,
    /// Number of accepted updates since mount, bootstrap included.
    pub updates_applied: u64,
    /// Timestamp of the last accepted `live_update`.
    pub last_push_at: Option<String>,
}

/// A result from the poll fallback.
#[derive(Clone, Debug, PartialEq)]
pub enum PollUpdate {
    Engagement(StreamHistoryPoint),
    Progress(ProgressStreamPoint),
}

/// Canonical in-memory analytics state.
#[derive(Clone, Debug)]
pub struct LiveMetrics {
    connection: ConnectionState,
    engagement: Option<EngagementMetrics>,
    progress: Option<ProgressMetrics>,
    history: BoundedHistory<StreamHistoryPoint>,
    progress_history: BoundedHistory<ProgressStreamPoint>,
    alerts: AlertFeed,
    updates_applied: u64,
    last_push_at: Option<String>,
}

impl LiveMetrics {
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            engagement: None,
            progress: None,
            history: BoundedHistory::new(limits.history),
            progress_history: BoundedHistory::new(limits.history),
            alerts: AlertFeed::new(limits.alerts),
            updates_applied: 0,
            last_push_at: None,
        }
    }

    /// Seed state from the initial REST load.
    pub fn seed(&mut self, bootstrap: Bootstrap) {
        if bootstrap.engagement.is_some() {
            self.engagement = bootstrap.engagement;
        }
        if bootstrap.progress.is_some() {
            self.progress = bootstrap.progress;
        }
        self.alerts.replace(bootstrap.alerts);
        self.updates_applied += 1;
    }

    /// Apply one push message. Returns whether state changed.
    pub fn apply_push(&mut self, message: PushMessage) -> bool {
        match message {
            PushMessage::LiveUpdate(update) => {
                if update.engagement.is_none() && update.progress.is_none() {
                    return false;
                }
                if let Some(engagement) = update.engagement {
                    self.engagement = Some(engagement);
                }
                if let Some(progress) = update.progress {
                    self.progress = Some(progress);
                }
                self.last_push_at = Some(update.timestamp);
            }
            PushMessage::UserEvent(event) => {
                let Some(engagement) = &self.engagement else {
                    debug!(user_id = %event.user_id, "no engagement yet; user_event not sampled");
                    return false;
                };
                self.history.push(StreamHistoryPoint::sample(engagement, now_rfc3339()));
            }
            PushMessage::Alert(push) => {
                info!(user_id = %push.alert.user_id, risk = %push.alert.risk_level, kind = %push.alert.kind, "alert received");
                self.alerts.push(push.alert);
            }
            other => {
                debug!(kind = other.kind(), "push message ignored");
                return false;
            }
        }
        self.updates_applied += 1;
        true
    }

    /// Append an externally computed engagement point.
    pub fn apply_poll(&mut self, point: StreamHistoryPoint) {
        self.history.push(point);
        self.updates_applied += 1;
    }

    pub fn apply_progress_poll(&mut self, point: ProgressStreamPoint) {
        self.progress_history.push(point);
        self.updates_applied += 1;
    }

    /// Record the connection state. Returns whether it changed.
    pub fn set_connection(&mut self, state: ConnectionState) -> bool {
        if self.connection == state {
            return false;
        }
        self.connection = state;
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            connection: self.connection,
            engagement: self.engagement.clone(),
            progress: self.progress.clone(),
            history: self.history.to_vec(),
            progress_history: self.progress_history.to_vec(),
            alerts: self.alerts.to_vec(),
            updates_applied: self.updates_applied,
            last_push_at: self.last_push_at.clone(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Handle to the aggregator worker.
pub struct Aggregator {
    snapshots: watch::Receiver<Arc<LiveSnapshot>>,
    worker: JoinHandle<()>,
    token: CancellationToken,
}

impl Aggregator {
    /// Spawn the single writer over `metrics`.
    ///
    /// Returns the handle and the sender the poller feeds. The worker stops
    /// when `token` is cancelled; anything still queued is discarded.
    #[must_use]
    pub fn spawn(
        metrics: LiveMetrics,
        stream_events: mpsc::UnboundedReceiver<StreamEvent>,
        token: CancellationToken,
    ) -> (Self, mpsc::Sender<PollUpdate>) {
        let (polls_tx, polls_rx) = mpsc::channel(POLL_QUEUE_CAPACITY);
        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::new(metrics.snapshot()));
        let worker = tokio::spawn(run(metrics, stream_events, polls_rx, snapshots_tx, token.clone()));
        (Self { snapshots: snapshots_rx, worker, token }, polls_tx)
    }

    /// Latest published snapshot. Never blocks on the writer.
    #[must_use]
    pub fn current_snapshot(&self) -> Arc<LiveSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver that is notified on every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<LiveSnapshot>> {
        self.snapshots.clone()
    }

    /// Cancel the worker and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.worker.await;
    }
}

async fn run(
    mut metrics: LiveMetrics,
    mut stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    mut polls: mpsc::Receiver<PollUpdate>,
    snapshots: watch::Sender<Arc<LiveSnapshot>>,
    token: CancellationToken,
) {
    let mut stream_open = true;
    let mut polls_open = true;

    loop {
        let changed = tokio::select! {
            biased;
            () = token.cancelled() => break,
            event = stream_events.recv(), if stream_open => match event {
                Some(StreamEvent::State(state)) => metrics.set_connection(state),
                Some(StreamEvent::Message(message)) => metrics.apply_push(message),
                None => {
                    stream_open = false;
                    false
                }
            },
            update = polls.recv(), if polls_open => match update {
                Some(PollUpdate::Engagement(point)) => {
                    metrics.apply_poll(point);
                    true
                }
                Some(PollUpdate::Progress(point)) => {
                    metrics.apply_progress_poll(point);
                    true
                }
                None => {
                    polls_open = false;
                    false
                }
            },
        };

        if changed {
            snapshots.send_replace(Arc::new(metrics.snapshot()));
        }
    }
    debug!("aggregator stopped");
}

#[cfg(test)]
#[path = "aggregator_test.rs"]
mod tests;
