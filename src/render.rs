//! Text presentation of a snapshot. Reads only.

use std::error::Error as _;
use std::fmt::Write as _;

use wire::RiskLevel;

use crate::aggregator::LiveSnapshot;
use crate::bootstrap::BootstrapError;
use crate::stream::ConnectionState;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[must_use]
pub fn render_dashboard(snapshot: &LiveSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Live analytics  {}", connection_badge(snapshot.connection));

    let _ = writeln!(out, "\nEngagement");
    match &snapshot.engagement {
        Some(e) => {
            let _ = writeln!(out, "  {:<20}{}", "Active users", e.active_users);
            let _ = writeln!(out, "  {:<20}{}", "Page views", e.page_views);
            let _ = writeln!(out, "  {:<20}{}", "Interactions", e.interactions);
            let _ = writeln!(out, "  {:<20}{:.1}%", "Interaction rate", e.interaction_rate);
            let _ = writeln!(out, "  {:<20}{}", "Avg session", format_session(e.avg_session_time));
        }
        None => {
            let _ = writeln!(out, "  no data");
        }
    }

    let _ = writeln!(out, "\nProgress");
    match &snapshot.progress {
        Some(p) => {
            let _ = writeln!(out, "  {:<20}{:.1}%", "Completion rate", p.completion_rate);
            let _ = writeln!(out, "  {:<20}{:.1}%", "Average progress", p.average_progress);
            let _ = writeln!(
                out,
                "  {:<20}{} completed / {} in progress / {} total",
                "Learning paths", p.completed_paths, p.in_progress_paths, p.total_learning_paths
            );
            let _ = writeln!(out, "  {:<20}{}", "Recent completions", p.recent_completions.len());
        }
        None => {
            let _ = writeln!(out, "  no data");
        }
    }

    let active: Vec<u64> = snapshot.history.iter().map(|p| p.active_users).collect();
    let _ = writeln!(out, "\nActive users ({} samples)", active.len());
    if !active.is_empty() {
        let _ = writeln!(out, "  {}", sparkline(&active));
    }
    if let Some(last) = snapshot.progress_history.last() {
        let _ = writeln!(
            out,
            "  completion {:.1}%, {} active learners at {}",
            last.completion_rate, last.active_learners, last.timestamp
        );
    }

    let _ = writeln!(out, "\nAlerts ({})", snapshot.alerts.len());
    if snapshot.alerts.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for alert in &snapshot.alerts {
        let _ = writeln!(
            out,
            "  [{}] {} {}: {}",
            risk_tag(alert.risk_level),
            alert.user_id,
            alert.kind,
            alert.recommendation
        );
    }

    if let Some(at) = &snapshot.last_push_at {
        let _ = writeln!(out, "\nLast push {at}");
    }
    out
}

/// Visible error state for a failed bootstrap.
#[must_use]
pub fn render_bootstrap_error(error: &BootstrapError) -> String {
    let mut out = String::from("Unable to load dashboard data\n");
    let _ = writeln!(out, "  endpoint: {}", error.endpoint());
    if let Some(cause) = error.source() {
        let _ = writeln!(out, "  reason:   {cause}");
    }
    out
}

/// One bar per value, scaled between the series min and max.
#[must_use]
pub fn sparkline(values: &[u64]) -> String {
    let (Some(&min), Some(&max)) = (values.iter().min(), values.iter().max()) else {
        return String::new();
    };
    let span = max - min;
    let top = SPARK_LEVELS.len() - 1;
    values
        .iter()
        .map(|&v| {
            if span == 0 {
                SPARK_LEVELS[top / 2]
            } else {
                let level = u128::from(v - min) * top as u128 / u128::from(span);
                SPARK_LEVELS[usize::try_from(level).unwrap_or(top)]
            }
        })
        .collect()
}

fn connection_badge(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connected => "● live",
        ConnectionState::Connecting => "◐ connecting",
        ConnectionState::Reconnecting => "◌ reconnecting",
        ConnectionState::Disconnected => "○ disconnected",
    }
}

fn risk_tag(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::High => "HIGH",
        RiskLevel::Medium => "MED ",
        RiskLevel::Low => "LOW ",
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_session(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}m {:02}s", total / 60, total % 60)
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
