//! Worker HTTP server.
//!
//! Serves the WebSocket upgrade path and, when enabled, `/health` and
//! `/metrics` on one listener. Cancelling the server's token stops accepting
//! upgrades and closes every registered connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::config::{ConfigError, ServerConfig, HEALTH_PATH, METRICS_PATH};
use crate::error::ServerError;
use crate::health::{health_handler, metrics_handler, HealthState};
use crate::ws::{ws_handler, Hub, HubHandle, WsMetrics, WsState};

/// Listen backlog.
const BACKLOG: u32 = 1024;

/// Router state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Upgrade handler state.
    pub ws: WsState,
    /// Health route state.
    pub health: HealthState,
}

impl FromRef<AppState> for WsState {
    fn from_ref(state: &AppState) -> Self {
        state.ws.clone()
    }
}

impl FromRef<AppState> for HealthState {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

/// One worker's server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    metrics: Arc<WsMetrics>,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a server and starts its hub.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener settings are invalid.
    pub fn new(
        config: ServerConfig,
        authenticator: Authenticator,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate_listener()?;

        let metrics = Arc::new(WsMetrics::new());
        let (hub, handle) = Hub::new(
            config.heartbeat_interval(),
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let hub_task = hub.spawn();

        let state = AppState {
            ws: WsState {
                hub: handle.clone(),
                authenticator,
                metrics: Arc::clone(&metrics),
                send_buffer: config.send_buffer,
            },
            health: HealthState::new(handle.clone(), Arc::clone(&metrics)),
        };

        Ok(Self {
            config,
            state,
            hub: handle,
            hub_task,
            metrics,
            cancel,
        })
    }

    /// Creates a server whose identity provider comes from `config.auth`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: ServerConfig, cancel: CancellationToken) -> Result<Self, ServerError> {
        config.validate()?;
        let auth = config.auth.as_ref().ok_or(ConfigError::MissingAuth)?;
        let authenticator = Authenticator::from_config(auth)?;
        Self::new(config, authenticator, cancel)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the producer-facing hub handle.
    #[must_use]
    pub fn handle(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Returns the worker metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<WsMetrics> {
        &self.metrics
    }

    /// Returns the token that stops the server.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        let mut router = Router::new().route(&self.config.ws_path, get(ws_handler));

        if self.config.health_check_enabled {
            router = router
                .route(HEALTH_PATH, get(health_handler))
                .route(METRICS_PATH, get(metrics_handler));
        }

        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds the configured address.
    ///
    /// With `reuse_port`, several processes can bind the same port and the
    /// kernel spreads incoming connections across them.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not resolve or cannot be bound.
    pub async fn bind(&self, reuse_port: bool) -> Result<TcpListener, ServerError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let addr: SocketAddr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| ServerError::Resolve(target.clone()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(unix)]
        {
            if reuse_port {
                socket.set_reuseport(true)?;
            }
        }
        #[cfg(not(unix))]
        let _ = reuse_port;

        socket.bind(addr)?;
        Ok(socket.listen(BACKLOG)?)
    }

    /// Serves on `listener` until the cancel token fires.
    ///
    /// Returns after the hub has closed every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(%addr, ws_path = %self.config.ws_path, "listening");

        let stats_task = self.config.monitoring_enabled.then(|| {
            tokio::spawn(log_stats(
                self.hub.clone(),
                self.config.stats_interval(),
                self.cancel.clone(),
            ))
        });

        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await;

        self.cancel.cancel();
        let _ = self.hub_task.await;
        if let Some(task) = stats_task {
            task.abort();
        }
        info!(%addr, "server stopped");

        result.map_err(ServerError::from)
    }

    /// Binds the configured address and serves.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind(false).await?;
        self.serve(listener).await
    }
}

async fn log_stats(hub: HubHandle, every: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => match hub.stats().await {
                Ok(stats) => info!(
                    connections = stats.total_connections,
                    users = stats.unique_users,
                    topics = ?stats.subscriptions_by_topic,
                    "worker stats"
                ),
                Err(_) => break,
            },
        }
    }
    debug!("stats logger stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::config::AuthConfig;

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0).with_auth(AuthConfig::Static {
            tokens: BTreeMap::from([("t1".to_string(), "u1".to_string())]),
        })
    }

    fn make_server(config: ServerConfig) -> Server {
        Server::from_config(config, CancellationToken::new()).expect("server")
    }

    async fn status_of(router: Router, uri: &str) -> StatusCode {
        let req = Request::builder().uri(uri).body(Body::empty()).expect("request");
        router.oneshot(req).await.expect("response").status()
    }

    #[tokio::test]
    async fn test_from_config_requires_auth() {
        let result = Server::from_config(ServerConfig::new("127.0.0.1", 0), CancellationToken::new());
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_with_explicit_provider() {
        let auth = Authenticator::new(Arc::new(StaticTokenProvider::new([("a", "b")])));
        let server = Server::new(ServerConfig::new("127.0.0.1", 0), auth, CancellationToken::new())
            .expect("server");
        assert_eq!(server.config().ws_path, "/ws");
    }

    #[tokio::test]
    async fn test_health_routes_enabled() {
        let server = make_server(config());
        assert_eq!(status_of(server.router(), "/health").await, StatusCode::OK);
        assert_eq!(status_of(server.router(), "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_routes_disabled() {
        let server = make_server(config().with_health_check(false));
        assert_eq!(status_of(server.router(), "/health").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(server.router(), "/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_route_requires_token() {
        let server = make_server(config());
        assert_eq!(status_of(server.router(), "/ws").await, StatusCode::UNAUTHORIZED);
        assert_eq!(server.metrics().auth_failures(), 1);
    }

    #[tokio::test]
    async fn test_custom_ws_path() {
        let mut config = config();
        config.ws_path = "/stream".to_string();
        let server = make_server(config);
        assert_eq!(status_of(server.router(), "/stream").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(server.router(), "/ws").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = make_server(config());
        let listener = server.bind(false).await.expect("bind");
        assert_ne!(listener.local_addr().expect("addr").port(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_shared_port() {
        let first = make_server(config());
        let listener = first.bind(true).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let second = make_server(ServerConfig { port, ..config() });
        assert!(second.bind(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let server = make_server(config());
        let cancel = server.cancel_token();
        let hub = server.handle();
        let listener = server.bind(false).await.expect("bind");

        let task = tokio::spawn(server.serve(listener));
        cancel.cancel();

        let result = time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stopped in time")
            .expect("join");
        assert!(result.is_ok());
        assert!(hub.is_closed());
    }
}
