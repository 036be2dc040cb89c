//! Mock relay server for integration tests.
//!
//! Each accepted connection takes the next script from the queue, sends its
//! frames, then either closes or stays open until the client leaves.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Frames to send on one connection.
#[derive(Clone)]
pub struct Script {
    pub frames: Vec<String>,
    pub close_after: bool,
}

impl Default for Script {
    /// Connections beyond the scripted ones are closed straight away.
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            close_after: true,
        }
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockRelay {
    pub async fn start(scripts: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));

        let received_clone = received.clone();
        let connections_clone = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                *connections_clone.lock().await += 1;
                let script = scripts.lock().await.pop_front().unwrap_or_default();
                tokio::spawn(handle_connection(stream, script, received_clone.clone()));
            }
        });

        Self {
            addr,
            received,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }
}

async fn handle_connection(stream: TcpStream, script: Script, received: Arc<Mutex<Vec<String>>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    for frame in script.frames {
        if write.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    if script.close_after {
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => received.lock().await.push(text),
            Message::Close(_) => break,
            _ => {}
        }
    }
}
