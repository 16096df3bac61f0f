//! The connection dispatcher: accept loop, shared server state and
//! lifecycle orchestration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::BoxError;
use crate::buffer::BufferPool;
use crate::h2::H2Config;
use crate::metrics::Metrics;
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, GracefulShutdown};
use crate::sse::{SseConfig, SseHandler, SseManager};
use crate::ws::{Message, WsConfig, WsHandler, WsSender};

mod conn;
pub mod handler;
mod health;

pub use self::handler::{HttpService, NotFound, service_fn, text_response};
pub use self::health::HealthState;

/// Server configuration, sourced from the environment in deployments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub webroot: PathBuf,
    /// Accepted for compatibility with thread-pool deployments; the
    /// task-per-connection runtime has no use for it.
    pub worker_hint: Option<usize>,
    pub shutdown_timeout: Duration,
    /// Path serving `text/event-stream` requests.
    pub sse_path: String,
    pub max_head_size: usize,
    pub max_body_size: usize,
    pub buffer_size: usize,
    pub buffer_pool_max: usize,
    pub h2: H2Config,
    pub ws: WsConfig,
    pub sse: SseConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            webroot: PathBuf::from("."),
            worker_hint: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            sse_path: "/events".to_owned(),
            max_head_size: 16 * 1024,
            max_body_size: 1024 * 1024,
            buffer_size: 8 * 1024,
            buffer_pool_max: 1024,
            h2: H2Config::default(),
            ws: WsConfig::default(),
            sse: SseConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `SWITCHYARD_PORT`, `SWITCHYARD_WEBROOT`,
    /// `SWITCHYARD_WORKERS` and `SWITCHYARD_SHUTDOWN_TIMEOUT_MS` on top
    /// of the defaults.
    pub fn from_env() -> Result<Self, BoxError> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("SWITCHYARD_PORT") {
            config.port = port.parse().map_err(|_| format!("invalid port: {port}"))?;
        }
        if let Ok(webroot) = std::env::var("SWITCHYARD_WEBROOT") {
            config.webroot = PathBuf::from(webroot);
        }
        if let Ok(workers) = std::env::var("SWITCHYARD_WORKERS") {
            config.worker_hint = Some(
                workers
                    .parse()
                    .map_err(|_| format!("invalid worker hint: {workers}"))?,
            );
        }
        if let Ok(timeout) = std::env::var("SWITCHYARD_SHUTDOWN_TIMEOUT_MS") {
            let ms: u64 = timeout
                .parse()
                .map_err(|_| format!("invalid shutdown timeout: {timeout}"))?;
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Everything a connection task needs, shared behind one `Arc`.
pub(crate) struct ServerState {
    pub config: ServerConfig,
    pub handler: Arc<dyn HttpService>,
    pub ws_handler: Arc<dyn WsHandler>,
    pub sse_handler: Arc<dyn SseHandler>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Arc<GracefulShutdown>,
    pub health: Arc<HealthState>,
    pub buffer_pool: BufferPool,
    pub sse_ids: AtomicU64,
}

/// The default WebSocket behavior until an application installs its
/// own handler: echo every message back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoWs;

impl WsHandler for EchoWs {
    fn on_message(&self, sender: &WsSender, message: Message) {
        sender.send(message);
    }
}

/// Unregisters SSE connections from the global manager when they
/// close, whichever side initiated it.
struct SseCleanup;

impl SseHandler for SseCleanup {
    fn on_close(&self, conn: &crate::sse::SseConnection) {
        SseManager::global().unregister_connection(conn);
    }
}

/// The multi-protocol server.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let metrics = Metrics::shared();
        let health = Arc::new(HealthState::new(config.webroot.clone()));
        let buffer_pool = BufferPool::new(config.buffer_size, config.buffer_pool_max);
        Self {
            state: Arc::new(ServerState {
                handler: Arc::new(NotFound),
                ws_handler: Arc::new(EchoWs),
                sse_handler: Arc::new(SseCleanup),
                metrics,
                shutdown: Arc::new(GracefulShutdown::new()),
                health,
                buffer_pool,
                sse_ids: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Install the application request handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn HttpService>) -> Self {
        self.state_mut().handler = handler;
        self
    }

    /// Install the application WebSocket handler.
    #[must_use]
    pub fn with_ws_handler(mut self, handler: Arc<dyn WsHandler>) -> Self {
        self.state_mut().ws_handler = handler;
        self
    }

    fn state_mut(&mut self) -> &mut ServerState {
        Arc::get_mut(&mut self.state).expect("configure the server before cloning or running it")
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        self.state.metrics.clone()
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        self.state.health.clone()
    }

    #[must_use]
    pub fn shutdown_coordinator(&self) -> Arc<GracefulShutdown> {
        self.state.shutdown.clone()
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn run(&self) -> Result<(), BoxError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.state.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve connections from an already-bound listener. Returns once
    /// shutdown begins; connection tasks drain on their own.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), BoxError> {
        let local = listener.local_addr()?;
        tracing::info!(%local, workers = ?self.state.config.worker_hint, "listening");

        let mut shutdown_rx = self.state.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!("accept failed: {err}");
                            continue;
                        }
                    };
                    // Refused during drain: the counter must not rise.
                    if !self.state.shutdown.increment_active_connections() {
                        tracing::debug!(%peer, "refusing connection during shutdown");
                        drop(stream);
                        continue;
                    }
                    self.state.metrics.http_active_connections.inc();
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        conn::serve_connection(stream, state.clone()).await;
                        state.metrics.http_active_connections.dec();
                        state.shutdown.decrement_active_connections();
                    });
                }
                changed = shutdown_rx.changed() => {
                    let _ = changed;
                    tracing::info!("accept loop stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Graceful shutdown: mark the health endpoint `DOWN`, stop
    /// accepting, close all SSE streams and wait for in-flight
    /// connections to drain (or the timeout).
    pub async fn shutdown(&self) -> bool {
        self.state.health.mark_unhealthy();
        SseManager::global().close_all_connections();
        self.state
            .shutdown
            .shutdown(self.state.config.shutdown_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sse_path, "/events");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.worker_hint.is_none());
    }

    #[tokio::test]
    async fn shutdown_refuses_new_registrations() {
        let server = Server::new(ServerConfig::default());
        assert!(server.shutdown().await);
        assert!(server.state.shutdown.is_shutting_down());
        assert!(!server.state.shutdown.increment_active_connections());
        assert_eq!(server.state.shutdown.active_connection_count(), 0);
        assert!(!server.state.health.is_healthy());
    }
}
