use std::collections::HashMap;

use axum::Router;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};

use super::*;

const PREFIX: &str = "/api/v1/realtime-analytics";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}{PREFIX}")
}

fn api(base: &str) -> AnalyticsApi {
    AnalyticsApi::new(base, Duration::from_secs(2)).expect("client")
}

#[test]
fn new_rejects_non_http_base() {
    let err = AnalyticsApi::new("ws://host/api", Duration::from_secs(1)).expect_err("scheme");
    assert!(matches!(err, ApiError::InvalidBaseUrl(ref base) if base == "ws://host/api"));
}

#[test]
fn new_trims_trailing_slash() {
    let api = AnalyticsApi::new("http://host/api/", Duration::from_secs(1)).expect("client");
    assert_eq!(api.base(), "http://host/api");
}

#[tokio::test]
async fn engagement_metrics_passes_timeframe_and_unwraps_envelope() {
    let router = Router::new().route(
        &format!("{PREFIX}/engagement-metrics"),
        get(|Query(params): Query<HashMap<String, String>>| async move {
            let active_users = if params.get("timeframe").map(String::as_str) == Some("1h") { 12 } else { 0 };
            axum::Json(json!({
                "status": "success",
                "timeframe": params.get("timeframe"),
                "metrics": {
                    "active_users": active_users,
                    "page_views": 40,
                    "interactions": 9,
                    "interaction_rate": 22.5,
                    "avg_session_time": 300.0
                }
            }))
        }),
    );
    let base = serve(router).await;

    let metrics = api(&base).engagement_metrics("1h").await.expect("fetch").expect("metrics");
    assert_eq!(metrics.active_users, 12);
    assert!((metrics.interaction_rate - 22.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn alerts_and_progress_decode() {
    let router = Router::new()
        .route(
            &format!("{PREFIX}/predictive-alerts"),
            get(|| async {
                axum::Json(json!({
                    "status": "success",
                    "count": 1,
                    "alerts": [{
                        "type": "low_progress",
                        "user_id": "u3",
                        "learning_path_id": "lp-1",
                        "risk_level": "medium",
                        "progress": 12.0,
                        "recommendation": "Consider providing additional support or resources"
                    }]
                }))
            }),
        )
        .route(
            &format!("{PREFIX}/progress-tracking"),
            get(|| async {
                axum::Json(json!({
                    "status": "success",
                    "data": {
                        "total_learning_paths": 15,
                        "completed_paths": 8,
                        "in_progress_paths": 6,
                        "completion_rate": 53.3,
                        "average_progress": 61.0,
                        "recent_completions": []
                    }
                }))
            }),
        );
    let base = serve(router).await;
    let api = api(&base);

    let alerts = api.predictive_alerts().await.expect("alerts");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, "low_progress");

    let progress = api.progress_tracking().await.expect("progress").expect("data");
    assert!((progress.completion_rate - 53.3).abs() < f64::EPSILON);
}

#[tokio::test]
async fn stream_point_with_error_status_is_rejected() {
    let router = Router::new().route(
        &format!("{PREFIX}/stream/engagement"),
        get(|| async { axum::Json(json!({"status": "error", "message": "cache unavailable"})) }),
    );
    let base = serve(router).await;

    let err = api(&base).engagement_point("5m").await.expect_err("status");
    assert!(matches!(err, ApiError::Envelope(CodecError::Status(ref s)) if s == "error"));
}

#[tokio::test]
async fn http_error_status_maps_to_http_error() {
    let router = Router::new().route(
        &format!("{PREFIX}/stream/progress"),
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = serve(router).await;

    let err = api(&base).progress_point().await.expect_err("500");
    assert!(matches!(err, ApiError::Http(_)));
}

#[tokio::test]
async fn health_is_read_without_envelope() {
    let router = Router::new().route(
        &format!("{PREFIX}/health"),
        get(|| async {
            axum::Json::<Value>(json!({"status": "healthy", "service": "real-time analytics", "version": "1.0.0"}))
        }),
    );
    let base = serve(router).await;

    let report = api(&base).health().await.expect("health");
    assert_eq!(report.status, "healthy");
    assert_eq!(report.service.as_deref(), Some("real-time analytics"));
}
