//! Live WebSocket tests against a bound server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use sigrelay_core::{ClassifiedMessage, MarketNote};
use sigrelay_dashboard::{
    bind, serve, AppState, Broadcaster, DashboardConfig, CLOSE_CAPACITY, CLOSE_GOING_AWAY,
};
use sigrelay_persistence::{Buffer, SqliteStore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

struct Harness {
    url: String,
    broadcaster: Arc<Broadcaster>,
    shutdown: CancellationToken,
}

async fn start(max_subscribers: usize) -> Harness {
    let config = DashboardConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_subscribers,
        ..DashboardConfig::default()
    };
    let broadcaster = Arc::new(Broadcaster::new(max_subscribers));
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let state = AppState::new(
        broadcaster.clone(),
        Arc::new(Buffer::new(10)),
        store,
        config.clone(),
    );

    let listener = bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, state, shutdown.clone()));

    Harness {
        url: format!("ws://{addr}/ws"),
        broadcaster,
        shutdown,
    }
}

async fn wait_for_subscribers(broadcaster: &Broadcaster, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broadcaster.len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count not reached");
}

fn note(text: &str) -> ClassifiedMessage {
    ClassifiedMessage::Market(MarketNote::new(Some("Desk"), text, Utc::now()))
}

#[tokio::test]
async fn test_subscriber_receives_published_event() {
    let harness = start(4).await;
    let (mut client, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();
    wait_for_subscribers(&harness.broadcaster, 1).await;

    let report = harness.broadcaster.publish(&note("BTC looks heavy")).await;
    assert_eq!(report.delivered, 1);

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["type"], "market");
    assert_eq!(event["sender"], "Desk");
    assert_eq!(event["text"], "BTC looks heavy");

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_connection_over_capacity_closed_with_1008() {
    let harness = start(1).await;
    let (_first, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();
    wait_for_subscribers(&harness.broadcaster, 1).await;

    let (mut second, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), CLOSE_CAPACITY);
            assert_eq!(frame.reason, "Max connections reached");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(harness.broadcaster.len(), 1);

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_disconnected_client_is_unregistered() {
    let harness = start(4).await;
    let (mut client, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();
    wait_for_subscribers(&harness.broadcaster, 1).await;

    client.close(None).await.unwrap();
    wait_for_subscribers(&harness.broadcaster, 0).await;

    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_close_all_sends_going_away() {
    let harness = start(4).await;
    let (mut client, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();
    wait_for_subscribers(&harness.broadcaster, 1).await;

    harness
        .broadcaster
        .close_all(CLOSE_GOING_AWAY, "Server shutting down")
        .await;

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), CLOSE_GOING_AWAY),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(harness.broadcaster.is_empty());

    harness.shutdown.cancel();
}
