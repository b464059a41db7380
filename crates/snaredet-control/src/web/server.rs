//! Axum HTTP server

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;

use crate::broadcaster::BroadcasterStats;
use crate::message::DEFAULT_GREETING;
use crate::registry::{ConnectionRegistry, DEFAULT_QUEUE_DEPTH};
use crate::{error::ControlError, Result};

use super::routes::build_router;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub stats: Arc<BroadcasterStats>,
    pub config: Arc<WebServerConfig>,
    pub started: Instant,
    pub shutdown: watch::Receiver<bool>,
}

/// Web server configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub host: String,
    pub port: u16,
    /// Text of the `connected` message
    pub greeting: String,
    /// Outbound messages buffered per client before drops start
    pub client_queue_depth: usize,
    /// Longest a single write to a client may take
    pub send_timeout_ms: u64,
    /// Ping interval
    pub keepalive_interval_ms: u64,
    /// Close a client silent for this long
    pub idle_timeout_ms: u64,
    /// Longest an HTTP request (including the upgrade handshake) may take
    pub handshake_timeout_ms: u64,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            // Secure by default: bind to localhost to prevent accidental network exposure
            host: "127.0.0.1".to_string(),
            port: 8765,
            greeting: DEFAULT_GREETING.to_string(),
            client_queue_depth: DEFAULT_QUEUE_DEPTH,
            send_timeout_ms: 2_000,
            keepalive_interval_ms: 15_000,
            idle_timeout_ms: 60_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl WebServerConfig {
    /// Create a new web server config
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set the host address
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set the greeting text
    pub fn with_greeting(mut self, greeting: String) -> Self {
        self.greeting = greeting;
        self
    }

    /// Set the per-client queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.client_queue_depth = depth;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Resolve `host:port` to the address to bind
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                ControlError::InvalidParameter(format!(
                    "invalid bind address {}:{}: {}",
                    self.host, self.port, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                ControlError::InvalidParameter(format!(
                    "bind address {}:{} resolves to nothing",
                    self.host, self.port
                ))
            })
    }

    /// Startup checks. Port 0 is refused here; tests that want an ephemeral
    /// port bind without validating.
    pub fn validate(&self) -> Result<SocketAddr> {
        if self.port == 0 {
            return Err(ControlError::InvalidParameter(
                "port must be in 1..=65535".to_string(),
            ));
        }
        if self.client_queue_depth == 0 {
            return Err(ControlError::InvalidParameter(
                "client queue depth must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("send timeout", self.send_timeout_ms),
            ("keepalive interval", self.keepalive_interval_ms),
            ("idle timeout", self.idle_timeout_ms),
            ("handshake timeout", self.handshake_timeout_ms),
        ] {
            if value == 0 {
                return Err(ControlError::InvalidParameter(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        self.socket_addr()
    }
}

/// Bound WebSocket server, ready to serve
pub struct WebServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: WebServerConfig,
    registry: ConnectionRegistry,
    stats: Arc<BroadcasterStats>,
}

impl WebServer {
    /// Bind the listening socket. Fails if the address is invalid or taken.
    pub async fn bind(
        config: WebServerConfig,
        registry: ConnectionRegistry,
        stats: Arc<BroadcasterStats>,
    ) -> Result<Self> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ControlError::HttpError(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config,
            registry,
            stats,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` turns true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let state = AppState {
            registry: self.registry,
            stats: self.stats,
            config: Arc::new(self.config),
            started: Instant::now(),
            shutdown: shutdown.clone(),
        };

        let app = build_router()
            .layer(TimeoutLayer::new(state.config.handshake_timeout()))
            .with_state(state);

        tracing::info!("WebSocket server listening on ws://{}", self.local_addr);

        let mut signal = shutdown;
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            // A dropped sender also means shut down.
            let _ = signal.wait_for(|stop| *stop).await;
            tracing::info!("WebSocket server shutting down");
        })
        .await
        .map_err(|e| ControlError::HttpError(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Spawn the server in a background task
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.serve(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_server_config() {
        let config = WebServerConfig::new(9000)
            .with_host("0.0.0.0".to_string())
            .with_greeting("hello".to_string())
            .with_queue_depth(8);

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.greeting, "hello");
        assert_eq!(config.client_queue_depth, 8);
    }

    #[test]
    fn test_defaults() {
        let config = WebServerConfig::default();
        assert_eq!(config.port, 8765);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.greeting, "Connected to snare drum detector");
        assert_eq!(
            config.validate().unwrap(),
            "127.0.0.1:8765".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(WebServerConfig::new(0).validate().is_err());
        assert!(WebServerConfig::default()
            .with_host("not a host name!".to_string())
            .validate()
            .is_err());
        assert!(WebServerConfig::default()
            .with_queue_depth(0)
            .validate()
            .is_err());
        let config = WebServerConfig {
            send_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ControlError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_partial_config() {
        let config: WebServerConfig = serde_json::from_str(r#"{"port": 9001}"#).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.client_queue_depth, DEFAULT_QUEUE_DEPTH);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let registry = ConnectionRegistry::default();
        let server = WebServer::bind(
            WebServerConfig::new(0),
            registry,
            Arc::new(BroadcasterStats::default()),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
