//! REST client for the realtime analytics collaborators.
//!
//! Every endpoint except `/health` answers with a `{"status": "success", ...}`
//! envelope; decoding and status checks live in `wire`.

use std::time::Duration;

use async_trait::async_trait;
use wire::{
    AlertRecord, AlertsEnvelope, CodecError, EngagementEnvelope, EngagementMetrics, HealthReport, ProgressEnvelope,
    ProgressMetrics, ProgressStreamPoint, StreamEnvelope, StreamHistoryPoint,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unusable response body: {0}")]
    Envelope(#[from] CodecError),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Source of bootstrap and poll data.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    /// `GET /engagement-metrics?timeframe=`. `None` when the server has no
    /// metrics for the window.
    async fn engagement_metrics(&self, timeframe: &str) -> Result<Option<EngagementMetrics>, ApiError>;

    /// `GET /progress-tracking`.
    async fn progress_tracking(&self) -> Result<Option<ProgressMetrics>, ApiError>;

    /// `GET /predictive-alerts`, in server order.
    async fn predictive_alerts(&self) -> Result<Vec<AlertRecord>, ApiError>;

    /// `GET /stream/engagement?timeframe=`.
    async fn engagement_point(&self, timeframe: &str) -> Result<StreamHistoryPoint, ApiError>;

    /// `GET /stream/progress`.
    async fn progress_point(&self) -> Result<ProgressStreamPoint, ApiError>;

    /// `GET /health`.
    async fn health(&self) -> Result<HealthReport, ApiError>;
}

/// HTTP implementation of [`AnalyticsSource`].
#[derive(Clone, Debug)]
pub struct AnalyticsApi {
    http: reqwest::Client,
    base: String,
}

impl AnalyticsApi {
    /// Build a client rooted at `base` (e.g. `http://host/api/v1/realtime-analytics`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidBaseUrl`] unless `base` is http(s), and
    /// [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base = base.into().trim_end_matches('/').to_owned();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ApiError::InvalidBaseUrl(base));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl AnalyticsSource for AnalyticsApi {
    async fn engagement_metrics(&self, timeframe: &str) -> Result<Option<EngagementMetrics>, ApiError> {
        let body = self.get_text("/engagement-metrics", &[("timeframe", timeframe)]).await?;
        let envelope: EngagementEnvelope = wire::decode_envelope(&body)?;
        Ok(envelope.metrics)
    }

    async fn progress_tracking(&self) -> Result<Option<ProgressMetrics>, ApiError> {
        let body = self.get_text("/progress-tracking", &[]).await?;
        let envelope: ProgressEnvelope = wire::decode_envelope(&body)?;
        Ok(envelope.data)
    }

    async fn predictive_alerts(&self) -> Result<Vec<AlertRecord>, ApiError> {
        let body = self.get_text("/predictive-alerts", &[]).await?;
        let envelope: AlertsEnvelope = wire::decode_envelope(&body)?;
        Ok(envelope.alerts)
    }

    async fn engagement_point(&self, timeframe: &str) -> Result<StreamHistoryPoint, ApiError> {
        let body = self.get_text("/stream/engagement", &[("timeframe", timeframe)]).await?;
        let envelope: StreamEnvelope<StreamHistoryPoint> = wire::decode_envelope(&body)?;
        Ok(envelope.data)
    }

    async fn progress_point(&self) -> Result<ProgressStreamPoint, ApiError> {
        let body = self.get_text("/stream/progress", &[]).await?;
        let envelope: StreamEnvelope<ProgressStreamPoint> = wire::decode_envelope(&body)?;
        Ok(envelope.data)
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        let body = self.get_text("/health", &[]).await?;
        Ok(wire::decode_json(&body)?)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted source. Each poll call pops the next queued result; an empty
    /// queue answers with a failure.
    #[derive(Default)]
    pub struct FakeSource {
        pub engagement: Option<EngagementMetrics>,
        pub progress: Option<ProgressMetrics>,
        pub alerts: Vec<AlertRecord>,
        pub fail_bootstrap: Option<&'static str>,
        pub engagement_points: Mutex<VecDeque<Result<StreamHistoryPoint, CodecError>>>,
        pub progress_points: Mutex<VecDeque<Result<ProgressStreamPoint, CodecError>>>,
        /// Delay applied to every poll call, to model slow requests.
        pub poll_latency: Option<Duration>,
        pub engagement_calls: AtomicUsize,
        pub progress_calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn push_engagement(&self, point: StreamHistoryPoint) {
            self.engagement_points.lock().expect("lock").push_back(Ok(point));
        }

        pub fn push_engagement_failure(&self) {
            self.engagement_points
                .lock()
                .expect("lock")
                .push_back(Err(CodecError::Status("error".into())));
        }

        pub fn push_progress(&self, point: ProgressStreamPoint) {
            self.progress_points.lock().expect("lock").push_back(Ok(point));
        }

        fn bootstrap_result<T>(&self, endpoint: &str, value: T) -> Result<T, ApiError> {
            if self.fail_bootstrap == Some(endpoint) {
                return Err(ApiError::Envelope(CodecError::Status("error".into())));
            }
            Ok(value)
        }

        async fn latency(&self) {
            if let Some(delay) = self.poll_latency {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl AnalyticsSource for FakeSource {
        async fn engagement_metrics(&self, _timeframe: &str) -> Result<Option<EngagementMetrics>, ApiError> {
            self.bootstrap_result("engagement-metrics", self.engagement.clone())
        }

        async fn progress_tracking(&self) -> Result<Option<ProgressMetrics>, ApiError> {
            self.bootstrap_result("progress-tracking", self.progress.clone())
        }

        async fn predictive_alerts(&self) -> Result<Vec<AlertRecord>, ApiError> {
            self.bootstrap_result("predictive-alerts", self.alerts.clone())
        }

        async fn engagement_point(&self, _timeframe: &str) -> Result<StreamHistoryPoint, ApiError> {
            self.engagement_calls.fetch_add(1, Ordering::SeqCst);
            self.latency().await;
            let next = self.engagement_points.lock().expect("lock").pop_front();
            match next {
                Some(result) => Ok(result?),
                None => Err(ApiError::Envelope(CodecError::Status("missing".into()))),
            }
        }

        async fn progress_point(&self) -> Result<ProgressStreamPoint, ApiError> {
            self.progress_calls.fetch_add(1, Ordering::SeqCst);
            self.latency().await;
            let next = self.progress_points.lock().expect("lock").pop_front();
            match next {
                Some(result) => Ok(result?),
                None => Err(ApiError::Envelope(CodecError::Status("missing".into()))),
            }
        }

        async fn health(&self) -> Result<HealthReport, ApiError> {
            Ok(HealthReport { status: "healthy".into(), service: None, version: None })
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
