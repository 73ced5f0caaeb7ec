//! Poll fallback.
//!
//! DESIGN
//! ======
//! A background task fetches the stream endpoints on a fixed period and
//! hands results to the aggregator queue. It never touches aggregator state
//! itself, so a slow request only delays the next poll, never push handling.
//!
//! ERROR HANDLING
//! ==============
//! A failed request skips that tick only. The engagement and progress
//! requests of one tick are independent. Missed ticks are skipped rather than
//! bunched up. After cancellation nothing is sent, including responses that
//! were already in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::PollUpdate;
use crate::api::AnalyticsSource;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Window passed to the engagement stream endpoint.
    pub timeframe: String,
    /// Also poll the progress stream endpoint.
    pub progress: bool,
}

/// Spawn the poller. The first request goes out one full period after start.
pub fn spawn_poller(
    source: Arc<dyn AnalyticsSource>,
    config: PollConfig,
    updates: mpsc::Sender<PollUpdate>,
    token: CancellationToken,
) -> JoinHandle<()> {
    info!(interval = ?config.interval, progress = config.progress, "poll fallback configured");
    tokio::spawn(run(source, config, updates, token))
}

async fn run(
    source: Arc<dyn AnalyticsSource>,
    config: PollConfig,
    updates: mpsc::Sender<PollUpdate>,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batch = tokio::select! {
            biased;
            () = token.cancelled() => break,
            batch = poll_once(source.as_ref(), &config) => batch,
        };

        for update in batch {
            let sent = tokio::select! {
                biased;
                () = token.cancelled() => return,
                sent = updates.send(update) => sent,
            };
            if sent.is_err() {
                debug!("aggregator gone; poller stopping");
                return;
            }
        }
    }
    debug!("poller stopped");
}

async fn poll_once(source: &dyn AnalyticsSource, config: &PollConfig) -> Vec<PollUpdate> {
    let engagement = async {
        match source.engagement_point(&config.timeframe).await {
            Ok(point) => Some(PollUpdate::Engagement(point)),
            Err(e) => {
                warn!(error = %e, endpoint = "stream/engagement", "poll failed; skipping tick");
                None
            }
        }
    };
    let progress = async {
        if !config.progress {
            return None;
        }
        match source.progress_point().await {
            Ok(point) => Some(PollUpdate::Progress(point)),
            Err(e) => {
                warn!(error = %e, endpoint = "stream/progress", "poll failed; skipping tick");
                None
            }
        }
    };

    let (engagement, progress) = tokio::join!(engagement, progress);
    engagement.into_iter().chain(progress).collect()
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
