//! Relay source lifecycle tests against a mock relay.

mod common;
use common::mock_relay::{MockRelay, Script};

use sigrelay_feed::{ConnectionState, RelayConfig, RelaySource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config(url: String) -> RelayConfig {
    RelayConfig {
        url,
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 50,
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn test_forwards_frames_as_raw_messages() {
    let relay = MockRelay::start(vec![Script {
        frames: vec![
            r#"{"text":"hello","date":"2024-05-01T08:00:00Z","sender":"Alice"}"#.to_string(),
            "garbage".to_string(),
            r#"{"message":"world","timestamp":"2024-05-01T08:00:01Z"}"#.to_string(),
        ],
        close_after: false,
    }])
    .await;

    let (tx, mut rx) = mpsc::channel(16);
    let source = Arc::new(RelaySource::new(config(relay.url()), tx));
    let stream = source.open().await.expect("first connect");
    assert_eq!(source.state(), ConnectionState::Connected);

    let runner = {
        let source = source.clone();
        tokio::spawn(async move { source.run(stream).await })
    };

    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.text, "hello");
    assert_eq!(first.sender_label.as_deref(), Some("Alice"));

    let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.text, "world");
    assert_eq!(source.skipped(), 1);

    source.shutdown();
    timeout(Duration::from_secs(2), runner)
        .await
        .expect("run exits on shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(source.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_subscribe_frame_and_channel_filter() {
    let relay = MockRelay::start(vec![Script {
        frames: vec![
            r#"{"text":"elsewhere","chat":"public"}"#.to_string(),
            r#"{"text":"wanted","chat":"vip"}"#.to_string(),
        ],
        close_after: false,
    }])
    .await;

    let (tx, mut rx) = mpsc::channel(16);
    let source = Arc::new(RelaySource::new(
        RelayConfig {
            channel: Some("vip".to_string()),
            auth_token: Some("secret".to_string()),
            ..config(relay.url())
        },
        tx,
    ));
    let stream = source.open().await.unwrap();
    let runner = {
        let source = source.clone();
        tokio::spawn(async move { source.run(stream).await })
    };

    let msg = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.text, "wanted");
    assert_eq!(msg.source_channel.as_deref(), Some("vip"));

    let received = timeout(Duration::from_secs(2), async {
        loop {
            let received = relay.received().await;
            if !received.is_empty() {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscribe frame recorded");
    let subscribe: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(subscribe["op"], "subscribe");
    assert_eq!(subscribe["channel"], "vip");
    assert_eq!(subscribe["token"], "secret");

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), runner).await;
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let relay = MockRelay::start(vec![
        Script {
            frames: vec![r#"{"text":"before"}"#.to_string()],
            close_after: true,
        },
        Script {
            frames: vec![r#"{"text":"after"}"#.to_string()],
            close_after: false,
        },
    ])
    .await;

    let (tx, mut rx) = mpsc::channel(16);
    let source = Arc::new(RelaySource::new(config(relay.url()), tx));
    let stream = source.open().await.unwrap();
    let runner = {
        let source = source.clone();
        tokio::spawn(async move { source.run(stream).await })
    };

    let first = timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.text, "before");
    assert_eq!(second.text, "after");
    assert_eq!(relay.connection_count().await, 2);

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), runner).await;
}

#[tokio::test]
async fn test_open_fails_without_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (tx, _rx) = mpsc::channel(1);
    let source = RelaySource::new(config(url), tx);
    assert!(source.open().await.is_err());
    assert_eq!(source.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    // Accept a single connection, close it, then stop listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                let _ = ws.close(None).await;
            }
        }
    });

    let (tx, _rx) = mpsc::channel(1);
    let source = RelaySource::new(
        RelayConfig {
            max_reconnect_attempts: 2,
            ..config(url)
        },
        tx,
    );
    let stream = source.open().await.unwrap();

    let result = timeout(Duration::from_secs(10), source.run(stream))
        .await
        .expect("run gives up before the timeout");
    assert!(matches!(
        result,
        Err(sigrelay_feed::FeedError::ReconnectExhausted(2))
    ));
    assert_eq!(source.state(), ConnectionState::Disconnected);
}
