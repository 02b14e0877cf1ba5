//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, limits, request ID, rate limiting)
//! - Register configured services before accepting traffic
//! - Apply live configuration updates
//! - Coordinate graceful shutdown of sessions and background tasks

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{GatewayConfig, TimeoutConfig};
use crate::http::request::request_id;
use crate::http::{multiplex, proxy, status, websocket};
use crate::lifecycle::startup::bootstrap_services;
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::net::SessionTracker;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::registry::ServiceRegistry;
use crate::routing::ServiceRouter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub limiter: Arc<RateLimiter>,
    pub router: Arc<ServiceRouter>,
    pub client: reqwest::Client,
    pub sessions: SessionTracker,
    pub shutdown: Shutdown,
    pub timeouts: TimeoutConfig,
    pub max_body_size: usize,
    pub admin_api_key: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &GatewayConfig) -> Self {
        let registry = ServiceRegistry::new(config.registry.clone());
        let balancer = Arc::new(LoadBalancer::new(
            Arc::clone(&registry),
            config.balancer.strategy,
        ));

        // Timeouts are applied per call; the pool only bounds connects.
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build upstream client, using defaults");
                reqwest::Client::new()
            });

        Self {
            registry,
            balancer,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            router: Arc::new(ServiceRouter::from_config(&config.routes)),
            client,
            sessions: SessionTracker::new(),
            shutdown: Shutdown::new(),
            timeouts: config.timeouts.clone(),
            max_body_size: config.listener.max_body_size,
            admin_api_key: Arc::from(config.admin.api_key.as_str()),
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let state = AppState::new(&config);
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut app = Router::new()
            .route("/health", get(status::gateway_health))
            .route("/services", get(status::list_services))
            .route("/api/{service}", any(proxy::proxy_root_handler))
            .route("/api/{service}/{*path}", any(proxy::proxy_handler))
            .route("/ws", get(multiplex::multiplex_handler))
            .route("/ws/{service}", get(websocket::duplex_handler))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state.limiter),
                rate_limit_middleware,
            ));

        // Operator routes bypass the client rate limit.
        if config.admin.enabled {
            app = app.nest("/admin", admin::router(state.clone()));
        }

        app.with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id(request.headers()),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Shared state, for embedding and tests.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Configured services are registered first. The server stops when
    /// `shutdown` fires; open sessions are closed with 1001 and given
    /// `timeouts.drain_secs` to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let state = self.state;

        let registered = bootstrap_services(&state.registry, &self.config.services).await;
        tracing::info!(
            registered,
            configured = self.config.services.len(),
            "Configured services registered"
        );

        let cleanup = tokio::spawn(Arc::clone(&state.limiter).run_cleanup(state.shutdown.subscribe()));
        let reload = tokio::spawn(apply_config_updates(
            state.clone(),
            self.config.clone(),
            config_updates,
            state.shutdown.subscribe(),
        ));

        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let internal = state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, stopping listener");
                internal.trigger();
            })
            .await?;

        let drain = self.config.timeouts.drain();
        if !state.sessions.wait_for_drain(drain).await {
            tracing::warn!(
                open_sessions = state.sessions.active_count(),
                drain_secs = drain.as_secs(),
                "Sessions still open after drain timeout"
            );
        }

        state.registry.stop_monitoring().await;
        let _ = cleanup.await;
        let _ = reload.await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply live-reloadable sections of new configurations until shutdown.
async fn apply_config_updates(
    state: AppState,
    mut current: GatewayConfig,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(next) = update else { break };
                apply_config(&state, &current, &next);
                current = next;
            }
            _ = shutdown.recv() => break,
        }
    }
}

fn apply_config(state: &AppState, current: &GatewayConfig, next: &GatewayConfig) {
    if next.rate_limit != current.rate_limit {
        state.limiter.update_config(next.rate_limit.clone());
    }
    if next.balancer.strategy != current.balancer.strategy {
        state.balancer.set_strategy(next.balancer.strategy);
    }

    let restart_required = next.listener.bind_address != current.listener.bind_address
        || next.listener.max_body_size != current.listener.max_body_size
        || next.registry.probe_interval_secs != current.registry.probe_interval_secs
        || next.registry.probe_timeout_secs != current.registry.probe_timeout_secs
        || next.registry.health_path != current.registry.health_path
        || next.routes.len() != current.routes.len()
        || next.admin.enabled != current.admin.enabled;
    if restart_required {
        tracing::warn!("Configuration changes outside rate_limit and balancer require a restart");
    }
    tracing::info!("Configuration reload applied");
}
