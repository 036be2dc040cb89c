//! Dashboard configuration.

use serde::{Deserialize, Serialize};

/// Subscriber server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent subscribers.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
    /// A send slower than this marks the subscriber as failed.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Outbound frames queued per subscriber.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
    /// Largest inbound frame accepted from a subscriber, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Allowed CORS origins; `*` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6789
}

fn default_max_subscribers() -> usize {
    100
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_client_queue() -> usize {
    64
}

fn default_max_message_size() -> usize {
    1_000_000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_subscribers: default_max_subscribers(),
            send_timeout_ms: default_send_timeout_ms(),
            client_queue: default_client_queue(),
            max_message_size: default_max_message_size(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl DashboardConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}
