//! HTTP server implementation using axum.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use sigrelay_core::ClassifiedMessage;
use sigrelay_telemetry::Metrics;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::broadcast::Subscriber;
use crate::config::DashboardConfig;
use crate::error::{BroadcastError, BroadcastResult};
use crate::state::AppState;
use crate::types::{HealthResponse, MessagesQuery, StatusResponse};

/// Rows returned by `/api/messages` when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;
/// Largest accepted `/api/messages` limit.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// A WebSocket client fed through a bounded queue drained by a writer task.
struct WsSubscriber {
    tx: mpsc::Sender<Message>,
    alive: AtomicBool,
    send_timeout: Duration,
}

impl WsSubscriber {
    fn new(tx: mpsc::Sender<Message>, send_timeout: Duration) -> Self {
        Self {
            tx,
            alive: AtomicBool::new(true),
            send_timeout,
        }
    }

    fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&self, text: &str) -> BroadcastResult<()> {
        self.tx
            .send_timeout(Message::Text(text.to_string().into()), self.send_timeout)
            .await
            .map_err(|e| {
                self.mark_closed();
                BroadcastError::SendFailed(e.to_string())
            })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        if self
            .tx
            .send_timeout(Message::Close(Some(frame)), self.send_timeout)
            .await
            .is_err()
        {
            debug!("Close frame not queued, client already gone");
        }
        self.mark_closed();
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/fetch-past", get(fetch_past))
        .route("/api/messages", get(recent_messages))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(cors)
}

fn cors_layer(config: &DashboardConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle one subscriber connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.client_queue.max(1));

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let subscriber = Arc::new(WsSubscriber::new(
        tx,
        Duration::from_millis(state.config.send_timeout_ms),
    ));

    let id = match state.broadcaster.register(subscriber.clone()).await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Subscriber rejected");
            drop(subscriber);
            let _ = writer.await;
            return;
        }
    };

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!(%id, "Client sent close frame");
                break;
            }
            Err(e) => {
                debug!(%id, error = %e, "WebSocket receive error");
                break;
            }
            _ => {}
        }
    }

    subscriber.mark_closed();
    state.broadcaster.unregister(id);
    info!(%id, subscribers = state.broadcaster.len(), "Subscriber disconnected");
}

/// Run the configured backfill.
async fn fetch_past(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    let Some(backfill) = state.backfill.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse::error("No message archive configured")),
        );
    };

    match backfill.fetch_past().await {
        Ok(outcome) => {
            info!(?outcome, "Backfill complete");
            (StatusCode::OK, Json(StatusResponse::success(outcome.to_string())))
        }
        Err(e) => {
            error!(error = %e, "Backfill failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error(e.to_string())),
            )
        }
    }
}

/// Stored history from both tables, newest first.
async fn recent_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ClassifiedMessage>>, (StatusCode, Json<StatusResponse>)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    state.store.recent_messages(limit).await.map(Json).map_err(|e| {
        error!(error = %e, limit, "Failed to load message history");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse::error(e.to_string())),
        )
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (pending_signals, pending_notes) = state.buffer.counts();
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.broadcaster.len(),
        max_subscribers: state.broadcaster.max_subscribers(),
        pending_signals,
        pending_notes,
    })
}

async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind the configured address.
pub async fn bind(config: &DashboardConfig) -> BroadcastResult<TcpListener> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), "Subscriber server bound");
    Ok(listener)
}

/// Serve on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> BroadcastResult<()> {
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Subscriber server stopped");
    Ok(())
}

/// Bind and serve.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> BroadcastResult<()> {
    let listener = bind(&state.config).await?;
    serve(listener, state, shutdown).await
}
