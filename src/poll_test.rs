use std::sync::atomic::Ordering;

use super::*;
use crate::api::test_helpers::FakeSource;
use wire::{ProgressStreamPoint, StreamHistoryPoint};

const PERIOD: Duration = Duration::from_millis(5000);

fn point(label: &str) -> StreamHistoryPoint {
    StreamHistoryPoint {
        timestamp: label.to_owned(),
        active_users: 7,
        page_views: 70,
        interactions: 21,
        interaction_rate: 30.0,
        avg_session_time: 200.0,
    }
}

fn progress_point(label: &str) -> ProgressStreamPoint {
    ProgressStreamPoint {
        timestamp: label.to_owned(),
        completion_rate: 40.0,
        average_progress: 55.0,
        active_learners: 12,
        recent_completions: 1,
    }
}

fn config(progress: bool) -> PollConfig {
    PollConfig { interval: PERIOD, timeframe: "5m".into(), progress }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn first_poll_fires_one_period_after_start() {
    let source = Arc::new(FakeSource::default());
    source.push_engagement(point("a"));
    let (tx, mut rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    let _poller = spawn_poller(source.clone(), config(false), tx, token.clone());

    time::advance(PERIOD - Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(source.engagement_calls.load(Ordering::SeqCst), 0);

    time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(source.engagement_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rx.try_recv().ok(), Some(PollUpdate::Engagement(point("a"))));
    assert_eq!(source.progress_calls.load(Ordering::SeqCst), 0);

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn failed_tick_is_skipped_and_next_tick_proceeds() {
    let source = Arc::new(FakeSource::default());
    source.push_engagement_failure();
    source.push_engagement(point("b"));
    let (tx, mut rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    let _poller = spawn_poller(source.clone(), config(false), tx, token.clone());

    time::advance(PERIOD).await;
    settle().await;
    assert!(rx.try_recv().is_err());

    time::advance(PERIOD).await;
    settle().await;
    assert_eq!(rx.try_recv().ok(), Some(PollUpdate::Engagement(point("b"))));

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn progress_poll_is_independent_of_engagement_failure() {
    let source = Arc::new(FakeSource::default());
    source.push_progress(progress_point("p"));
    let (tx, mut rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    let _poller = spawn_poller(source.clone(), config(true), tx, token.clone());

    time::advance(PERIOD).await;
    settle().await;
    assert_eq!(rx.try_recv().ok(), Some(PollUpdate::Progress(progress_point("p"))));
    assert!(rx.try_recv().is_err());
    assert_eq!(source.engagement_calls.load(Ordering::SeqCst), 1);

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn in_flight_response_after_cancel_is_discarded() {
    let source = Arc::new(FakeSource { poll_latency: Some(Duration::from_millis(1000)), ..FakeSource::default() });
    source.push_engagement(point("late"));
    let (tx, mut rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    let poller = spawn_poller(source.clone(), config(false), tx, token.clone());

    time::advance(PERIOD).await;
    settle().await;
    assert_eq!(source.engagement_calls.load(Ordering::SeqCst), 1);

    token.cancel();
    time::advance(Duration::from_millis(2000)).await;
    poller.await.expect("poller exits");

    assert_eq!(rx.recv().await, None);
}
