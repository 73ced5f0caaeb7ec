//! Shared message model and JSON codec for the live analytics channel.
//!
//! This crate owns the wire representation used by the dashboard core: push
//! messages arriving over the live-update socket, control messages sent back
//! over it, and the `{"status": "success", ...}` envelopes returned by the
//! REST collaborators. Validation happens here, at decode time, so consumers
//! only ever see fully-shaped values.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel carrying engagement metrics.
pub const CHANNEL_ENGAGEMENT: &str = "engagement";
/// Channel carrying learning-path progress.
pub const CHANNEL_PROGRESS: &str = "progress";
/// Channel carrying predictive alerts.
pub const CHANNEL_ALERTS: &str = "alerts";

/// Channels a dashboard subscribes to when none are configured.
pub const DEFAULT_CHANNELS: [&str; 3] = [CHANNEL_ENGAGEMENT, CHANNEL_PROGRESS, CHANNEL_ALERTS];

/// Envelope status value the REST collaborators use for a usable body.
pub const STATUS_SUCCESS: &str = "success";

/// Error returned by the decode functions.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not valid JSON or did not match the expected shape.
    #[error("invalid message json: {0}")]
    Json(#[from] serde_json::Error),
    /// A REST envelope carried a status other than `"success"`.
    #[error("unexpected envelope status: {0}")]
    Status(String),
}

// =============================================================================
// METRIC PAYLOADS
// =============================================================================

/// Engagement metrics for a recent window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub active_users: u64,
    pub page_views: u64,
    pub interactions: u64,
    /// Interactions per hundred page views, as computed by the server.
    pub interaction_rate: f64,
    /// Average session time in seconds.
    pub avg_session_time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub course_engagement: Vec<CourseEngagement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Per-course engagement row inside [`EngagementMetrics`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourseEngagement {
    pub course_id: String,
    pub avg_progress: f64,
    pub active_students: u64,
}

/// Learning-path progress totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub total_learning_paths: u64,
    pub completed_paths: u64,
    pub in_progress_paths: u64,
    /// Percentage of tracked paths that are complete.
    pub completion_rate: f64,
    pub average_progress: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_completions: Vec<Completion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A learning path completed within the last hour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub user_id: String,
    pub learning_path_id: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Severity attached to a predictive alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predictive alert about one learner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Alert category, e.g. `"engagement_drop"` or `"low_progress"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_path_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// One engagement sample in the chart history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamHistoryPoint {
    pub timestamp: String,
    pub active_users: u64,
    pub page_views: u64,
    pub interactions: u64,
    pub interaction_rate: f64,
    pub avg_session_time: f64,
}

impl StreamHistoryPoint {
    /// Sample an engagement snapshot at the given time.
    #[must_use]
    pub fn sample(engagement: &EngagementMetrics, timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            active_users: engagement.active_users,
            page_views: engagement.page_views,
            interactions: engagement.interactions,
            interaction_rate: engagement.interaction_rate,
            avg_session_time: engagement.avg_session_time,
        }
    }
}

/// One progress sample returned by the progress stream endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressStreamPoint {
    pub timestamp: String,
    pub completion_rate: f64,
    pub average_progress: f64,
    pub active_learners: u64,
    /// Number of completions in the last hour.
    pub recent_completions: u64,
}

// =============================================================================
// PUSH MESSAGES
// =============================================================================

/// A message pushed by the server over the live-update socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    LiveUpdate(LiveUpdate),
    UserEvent(UserEvent),
    Alert(AlertPush),
    ConnectionEstablished(SessionNotice),
    SubscriptionConfirmed(ChannelAck),
    SystemNotification(SystemNotice),
    /// Any tag this client does not know about.
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    /// Wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LiveUpdate(_) => "live_update",
            Self::UserEvent(_) => "user_event",
            Self::Alert(_) => "alert",
            Self::ConnectionEstablished(_) => "connection_established",
            Self::SubscriptionConfirmed(_) => "subscription_confirmed",
            Self::SystemNotification(_) => "system_notification",
            Self::Unknown => "unknown",
        }
    }
}

/// Fresh engagement and/or progress values.
///
/// A sub-object that is absent, `null` or `{}` decodes as `None`, meaning
/// "no change". A present sub-object must be complete.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    #[serde(default, deserialize_with = "absent_if_empty", skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementMetrics>,
    #[serde(default, deserialize_with = "absent_if_empty", skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressMetrics>,
    pub timestamp: String,
}

/// A learner action relayed to dashboards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Raw event body, as tracked by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl UserEvent {
    /// The action name, taken from the top level or from the nested event body.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action
            .as_deref()
            .or_else(|| self.event.as_ref()?.get("action")?.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPush {
    pub alert: AlertRecord,
    pub timestamp: String,
}

/// Greeting sent by the server right after the socket is accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAck {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub notification: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// =============================================================================
// CONTROL MESSAGES
// =============================================================================

/// A message sent by the client over the live-update socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Declare interest in named channels.
    Subscribe { channels: Vec<String> },
    /// Report a learner event for server-side tracking.
    TrackEvent { data: Value },
}

// =============================================================================
// REST ENVELOPES
// =============================================================================

/// Body of `GET /engagement-metrics`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EngagementEnvelope {
    #[serde(default, deserialize_with = "absent_if_empty")]
    pub metrics: Option<EngagementMetrics>,
    #[serde(default)]
    pub timeframe: Option<String>,
}

/// Body of `GET /progress-tracking`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProgressEnvelope {
    #[serde(default, deserialize_with = "absent_if_empty")]
    pub data: Option<ProgressMetrics>,
}

/// Body of `GET /predictive-alerts`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AlertsEnvelope {
    #[serde(default)]
    pub alerts: Vec<AlertRecord>,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Body of the `/stream/*` poll endpoints.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StreamEnvelope<T> {
    pub data: T,
    #[serde(default)]
    pub timeframe: Option<String>,
}

/// Body of `GET /health`. Not wrapped in a success envelope.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

// =============================================================================
// CODEC
// =============================================================================

/// Decode one push message from socket text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] when the text is not JSON, has no `type` tag,
/// or a known message is missing required keys or has wrong types.
pub fn decode_push(text: &str) -> Result<PushMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a control message as socket text.
#[must_use]
pub fn encode_control(message: &ControlMessage) -> String {
    // Serializing these shapes cannot fail: every map key is a string.
    serde_json::to_string(message).unwrap_or_default()
}

/// Decode a REST body wrapped in a `{"status": "success", ...}` envelope.
///
/// # Errors
///
/// Returns [`CodecError::Status`] when the status is missing or not
/// `"success"`, and [`CodecError::Json`] when the body does not fit `T`.
pub fn decode_envelope<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("status").and_then(Value::as_str) {
        Some(STATUS_SUCCESS) => {}
        Some(other) => return Err(CodecError::Status(other.to_owned())),
        None => return Err(CodecError::Status("missing".to_owned())),
    }
    Ok(serde_json::from_value(value)?)
}

/// Decode a plain JSON body.
///
/// # Errors
///
/// Returns [`CodecError::Json`] when the body does not fit `T`.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

fn absent_if_empty<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
