//! Relay connection manager.
//!
//! Owns the connection lifecycle: first connect, subscription, read loop,
//! and automatic reconnection with exponential backoff until shutdown.

use crate::error::{FeedError, FeedResult};
use crate::frame::{RelayFrame, SubscribeRequest};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sigrelay_core::RawMessage;
use sigrelay_telemetry::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An open relay connection.
pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket URL of the relay.
    #[serde(default = "default_url")]
    pub url: String,

    /// Credential sent in the subscribe frame.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Only accept frames from this chat.
    #[serde(default)]
    pub channel: Option<String>,

    /// Maximum consecutive reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:8765".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: None,
            channel: None,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// WebSocket client that forwards relay frames as `RawMessage`s.
pub struct RelaySource {
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    message_tx: mpsc::Sender<RawMessage>,
    shutdown_token: CancellationToken,
    forwarded: AtomicU64,
    skipped: AtomicU64,
}

impl RelaySource {
    pub fn new(config: RelayConfig, message_tx: mpsc::Sender<RawMessage>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            message_tx,
            shutdown_token: CancellationToken::new(),
            forwarded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Messages forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Frames dropped as undecodable or belonging to another channel.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown; `run` returns promptly.
    pub fn shutdown(&self) {
        info!("Relay source shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// First connection. Failure here is a startup error and is not retried.
    pub async fn open(&self) -> FeedResult<RelayStream> {
        self.set_state(ConnectionState::Connecting);
        match self.connect_once().await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(FeedError::ConnectionFailed(format!(
                    "{}: {}",
                    self.config.url, e
                )))
            }
        }
    }

    /// Read from `stream`, reconnecting whenever it drops, until shutdown.
    ///
    /// Returns an error only when `max_reconnect_attempts` is exhausted.
    pub async fn run(&self, stream: RelayStream) -> FeedResult<()> {
        let mut next = Some(stream);
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting relay loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let stream = match next.take() {
                Some(stream) => Some(stream),
                None => {
                    self.set_state(ConnectionState::Connecting);
                    match self.connect_once().await {
                        Ok(stream) => Some(stream),
                        Err(e) => {
                            error!(error = %e, "Relay connect failed");
                            Metrics::source_reconnect("connect_failed");
                            None
                        }
                    }
                }
            };

            if let Some(stream) = stream {
                attempt = 0;
                match self.read_loop(stream).await {
                    Ok(()) => info!("Relay connection closed"),
                    Err(e) => {
                        error!(error = %e, "Relay connection error");
                        Metrics::source_reconnect(reconnect_reason(&e));
                    }
                }
                Metrics::source_disconnected();
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt > self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(FeedError::ReconnectExhausted(attempt - 1));
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to relay");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn connect_once(&self) -> FeedResult<RelayStream> {
        info!(url = %self.config.url, "Connecting to relay");
        let (mut stream, _response) = connect_async(self.config.url.as_str()).await?;

        if self.config.channel.is_some() || self.config.auth_token.is_some() {
            let request = SubscribeRequest::new(
                self.config.channel.as_deref(),
                self.config.auth_token.as_deref(),
            );
            stream
                .send(Message::Text(serde_json::to_string(&request)?))
                .await?;
            debug!(channel = ?self.config.channel, "Subscribe frame sent");
        }

        self.set_state(ConnectionState::Connected);
        Metrics::source_connected();
        info!("Relay connected");
        Ok(stream)
    }

    async fn read_loop(&self, stream: RelayStream) -> FeedResult<()> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in relay read loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_text(&text).await {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Relay closed the connection");
                            return Err(FeedError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("Relay stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Forward one text frame. Returns `false` once the receiver is gone.
    async fn handle_text(&self, text: &str) -> bool {
        let frame: RelayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, frame = %preview(text), "Skipping undecodable relay frame");
                return true;
            }
        };

        if !frame.matches_channel(self.config.channel.as_deref()) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(chat = ?frame.chat, "Skipping frame from another channel");
            return true;
        }

        let Some(raw) = frame.into_raw(Utc::now()) else {
            debug!("Control frame ignored");
            return true;
        };

        if self.message_tx.send(raw).await.is_err() {
            warn!("Message receiver dropped, stopping relay source");
            self.shutdown_token.cancel();
            return false;
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter())
    }
}

fn reconnect_reason(err: &FeedError) -> &'static str {
    match err {
        FeedError::ConnectionClosed { .. } => "closed",
        FeedError::Tungstenite(_) => "read_error",
        _ => "other",
    }
}

/// Random jitter in 0..1000 ms.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: u64, max: u64) -> RelaySource {
        let (tx, _rx) = mpsc::channel(1);
        RelaySource::new(
            RelayConfig {
                reconnect_base_delay_ms: base,
                reconnect_max_delay_ms: max,
                ..RelayConfig::default()
            },
            tx,
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let s = source(100, 1_000);
        let ms = |attempt| s.calculate_backoff_delay(attempt).as_millis() as u64;

        assert!((100..1_100).contains(&ms(1)));
        assert!((200..1_200).contains(&ms(2)));
        assert!((400..1_400).contains(&ms(3)));
        assert!((1_000..2_000).contains(&ms(8)));
    }

    #[test]
    fn test_shutdown_flag() {
        let s = source(100, 1_000);
        assert!(!s.is_shutdown());
        s.shutdown();
        assert!(s.is_shutdown());
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }
}
