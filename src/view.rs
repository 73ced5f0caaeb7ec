//! One mounted dashboard view.
//!
//! The view owns the Connection Manager, the aggregator worker and the
//! poller for exactly as long as it is mounted. `unmount` tears everything
//! down in order; dropping the view cancels the same work through a drop
//! guard.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

use crate::aggregator::{Aggregator, LiveMetrics, LiveSnapshot};
use crate::api::AnalyticsSource;
use crate::bootstrap::{self, BootstrapError};
use crate::config::{ConfigError, LiveConfig};
use crate::poll::{PollConfig, spawn_poller};
use crate::stream::{ConnectionState, StreamManager};
use crate::transport::Connector;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

pub struct DashboardView {
    stream: StreamManager,
    aggregator: Aggregator,
    poller: JoinHandle<()>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl DashboardView {
    /// Bootstrap, then start streaming and polling.
    ///
    /// Nothing is spawned unless bootstrap succeeds.
    ///
    /// # Errors
    ///
    /// [`ViewError::Config`] for an unusable config and
    /// [`ViewError::Bootstrap`] when an initial fetch fails.
    pub async fn mount(
        config: &LiveConfig,
        connector: Arc<dyn Connector>,
        source: Arc<dyn AnalyticsSource>,
    ) -> Result<Self, ViewError> {
        config.validate()?;
        let endpoint = config.stream_url()?;
        let seed = bootstrap::load(source.as_ref(), &config.engagement_timeframe).await?;

        let mut metrics = LiveMetrics::new(config.limits());
        metrics.seed(seed);

        let token = CancellationToken::new();
        let (stream, events) = StreamManager::spawn(connector, config.reconnect_delay);
        let (aggregator, polls) = Aggregator::spawn(metrics, events, token.clone());

        stream.subscribe(config.channels.iter().cloned());
        stream.open(endpoint);

        let poll_config = PollConfig {
            interval: config.poll_interval,
            timeframe: config.stream_timeframe.clone(),
            progress: config.poll_progress,
        };
        let poller = spawn_poller(source, poll_config, polls, token.clone());

        info!(user_id = %config.user_id, role = %config.role, "dashboard mounted");
        let guard = token.clone().drop_guard();
        Ok(Self { stream, aggregator, poller, token, _guard: guard })
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Arc<LiveSnapshot> {
        self.aggregator.current_snapshot()
    }

    /// Receiver notified on every snapshot change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<LiveSnapshot>> {
        self.aggregator.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn track_event(&self, data: Value) {
        self.stream.track_event(data);
    }

    /// Stop polling and aggregation, close the stream, and wait for every
    /// task to exit.
    pub async fn unmount(self) {
        let Self { stream, aggregator, poller, token, _guard } = self;
        token.cancel();
        stream.shutdown().await;
        let _ = poller.await;
        aggregator.shutdown().await;
        info!("dashboard unmounted");
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
