//! Initial-state load, run once when a view mounts.

use wire::{AlertRecord, EngagementMetrics, ProgressMetrics};

use crate::api::{AnalyticsSource, ApiError};

/// The three bootstrap payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bootstrap {
    pub engagement: Option<EngagementMetrics>,
    pub progress: Option<ProgressMetrics>,
    /// Alerts in server order.
    pub alerts: Vec<AlertRecord>,
}

/// Bootstrap failure. The only error a mounted view shows to the user.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("could not load {endpoint}: {source}")]
    Fetch {
        endpoint: &'static str,
        #[source]
        source: ApiError,
    },
}

impl BootstrapError {
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Fetch { endpoint, .. } => endpoint,
        }
    }
}

/// Fetch engagement, progress and alerts concurrently.
///
/// # Errors
///
/// Returns the first [`BootstrapError::Fetch`]; partial results are discarded.
pub async fn load(source: &dyn AnalyticsSource, timeframe: &str) -> Result<Bootstrap, BootstrapError> {
    let (engagement, progress, alerts) = tokio::try_join!(
        async { source.engagement_metrics(timeframe).await.map_err(fetch_failed("engagement-metrics")) },
        async { source.progress_tracking().await.map_err(fetch_failed("progress-tracking")) },
        async { source.predictive_alerts().await.map_err(fetch_failed("predictive-alerts")) },
    )?;

    tracing::info!(
        has_engagement = engagement.is_some(),
        has_progress = progress.is_some(),
        alerts = alerts.len(),
        "bootstrap loaded"
    );
    Ok(Bootstrap { engagement, progress, alerts })
}

fn fetch_failed(endpoint: &'static str) -> impl FnOnce(ApiError) -> BootstrapError {
    move |source| BootstrapError::Fetch { endpoint, source }
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
