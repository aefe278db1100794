//! End-to-end stream session tests: frame grammar, id monotonicity,
//! keep-alive behavior and subscription cleanup on disconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::time::{timeout, Instant};

use crm_notification_stream::broker::Broker;
use crm_notification_stream::config::StreamConfig;
use crm_notification_stream::event::EventKind;
use crm_notification_stream::sse::session_stream;

fn fast_config(poll_ms: u64, ping_ms: u64, heartbeat_ms: u64) -> StreamConfig {
    StreamConfig {
        channel_capacity: 100,
        retry_ms: 3000,
        poll_interval_ms: poll_ms,
        ping_interval_ms: ping_ms,
        heartbeat_interval_ms: heartbeat_ms,
    }
}

/// Read raw bytes off the stream until the deadline, then split into frames.
async fn collect_frames(
    stream: impl futures::Stream<Item = Result<axum::body::Bytes, std::convert::Infallible>>,
    window: Duration,
) -> Vec<String> {
    let mut stream = Box::pin(stream);
    let deadline = Instant::now() + window;
    let mut raw = String::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.next()).await {
            Ok(Some(Ok(bytes))) => raw.push_str(std::str::from_utf8(&bytes).unwrap()),
            Ok(None) => break,
            Err(_) => break,
        }
    }

    raw.split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string())
        .collect()
}

fn frame_id(frame: &str) -> Option<u64> {
    frame
        .lines()
        .find_map(|l| l.strip_prefix("id: "))
        .and_then(|v| v.parse().ok())
}

#[tokio::test]
async fn test_handshake_frame_is_first_and_carries_retry_hint() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(5).await;
    let stream = session_stream(broker.clone(), sub, fast_config(50, 10_000, 10_000));

    let frames = collect_frames(stream, Duration::from_millis(150)).await;

    assert!(!frames.is_empty());
    let first = &frames[0];
    assert!(first.starts_with("id: 0\n"), "got: {first}");
    assert!(first.contains("\nevent: connected\n"));
    assert!(first.contains("\nretry: 3000\n"));
    assert!(first.contains("Connected to notification stream"));
    assert!(first.contains("\"user_id\":5"));
}

#[tokio::test]
async fn test_published_notification_reaches_the_wire() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(5).await;
    let stream = session_stream(broker.clone(), sub, fast_config(50, 10_000, 10_000));

    broker
        .publish(
            5,
            EventKind::Notification,
            json!({"title": "Lead Assigned: Jane Doe", "lead_id": 12}),
        )
        .await;

    let frames = collect_frames(stream, Duration::from_millis(200)).await;

    let notification = frames
        .iter()
        .find(|f| f.contains("event: notification"))
        .unwrap();
    assert_eq!(frame_id(notification), Some(1));
    assert!(notification.contains("Lead Assigned: Jane Doe"));
    assert!(notification.contains("\"lead_id\":12"));
}

#[tokio::test]
async fn test_event_ids_are_monotonic_across_frame_kinds() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(9).await;
    // Pings fire fast enough to interleave with published events
    let stream = session_stream(broker.clone(), sub, fast_config(30, 120, 10_000));

    let publisher = broker.clone();
    tokio::spawn(async move {
        for n in 0..3 {
            tokio::time::sleep(Duration::from_millis(90)).await;
            publisher
                .publish(9, EventKind::Notification, json!({ "seq": n }))
                .await;
        }
    });

    let frames = collect_frames(stream, Duration::from_millis(600)).await;

    let ids: Vec<u64> = frames.iter().filter_map(|f| frame_id(f)).collect();
    assert!(ids.len() >= 4, "expected handshake plus traffic, got {ids:?}");
    assert_eq!(ids[0], 0);
    assert!(ids.windows(2).all(|w| w[0] + 1 == w[1]), "ids: {ids:?}");
}

#[tokio::test]
async fn test_idle_session_emits_pings() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(6).await;
    let stream = session_stream(broker.clone(), sub, fast_config(40, 150, 10_000));

    let frames = collect_frames(stream, Duration::from_millis(650)).await;

    let pings: Vec<&String> = frames
        .iter()
        .filter(|f| f.contains("event: ping"))
        .collect();
    assert!(pings.len() >= 2, "expected repeated pings, got {} frames", pings.len());
    for ping in &pings {
        assert!(ping.contains("keep-alive"));
        assert!(frame_id(ping).is_some(), "pings consume an event id");
    }
}

#[tokio::test]
async fn test_heartbeat_comments_carry_no_id() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(7).await;
    // Heartbeats only; pings far out of reach
    let stream = session_stream(broker.clone(), sub, fast_config(30, 60_000, 100));

    let frames = collect_frames(stream, Duration::from_millis(450)).await;

    let heartbeats: Vec<&String> = frames
        .iter()
        .filter(|f| f.starts_with(": heartbeat "))
        .collect();
    assert!(!heartbeats.is_empty());
    for hb in &heartbeats {
        assert!(frame_id(hb).is_none());
    }

    // Only the handshake consumed an id
    let ids: Vec<u64> = frames.iter().filter_map(|f| frame_id(f)).collect();
    assert_eq!(ids, vec![0]);
}

#[tokio::test]
async fn test_dropping_the_stream_releases_the_subscription() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(8).await;
    assert_eq!(broker.session_count(8), 1);

    {
        let mut stream = Box::pin(session_stream(
            broker.clone(),
            sub,
            fast_config(50, 10_000, 10_000),
        ));
        // Consume the handshake, then simulate a client disconnect by dropping
        let first = stream.next().await;
        assert!(first.is_some());
    }

    // Cleanup runs on a spawned task; give it a moment
    let deadline = Instant::now() + Duration::from_secs(1);
    while broker.session_count(8) != 0 {
        assert!(Instant::now() < deadline, "subscription was never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.session_count(8), 0);
}

#[tokio::test]
async fn test_dropping_an_unpolled_stream_releases_the_subscription() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(42).await;
    assert_eq!(broker.session_count(42), 1);

    // The connection can be torn down before the response body is ever
    // polled; the subscription must still be released.
    let stream = session_stream(broker.clone(), sub, fast_config(50, 10_000, 10_000));
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(1);
    while broker.session_count(42) != 0 {
        assert!(Instant::now() < deadline, "subscription was never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.session_count(42), 0);
}

#[tokio::test]
async fn test_every_event_frame_follows_the_grammar() {
    let broker = Arc::new(Broker::local(100));
    let sub = broker.subscribe(10).await;
    let stream = session_stream(broker.clone(), sub, fast_config(30, 120, 10_000));

    broker
        .publish(10, EventKind::Notification, json!({"title": "x"}))
        .await;

    let frames = collect_frames(stream, Duration::from_millis(300)).await;
    assert!(!frames.is_empty());

    for frame in frames.iter().filter(|f| !f.starts_with(':')) {
        let lines: Vec<&str> = frame.lines().collect();
        assert!(lines[0].starts_with("id: "), "frame: {frame}");
        assert!(lines[1].starts_with("event: "), "frame: {frame}");
        assert!(lines[2].starts_with("retry: "), "frame: {frame}");
        assert!(lines[3].starts_with("data: "), "frame: {frame}");
    }
}
