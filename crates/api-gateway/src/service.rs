//! Gateway service: wires configuration, the gateway core and the middleware
//! pipeline, and runs the public and admin servers.

use crate::adapters::{HttpForwarder, StaticKeyValidator};
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::gateway::Gateway;
use crate::limiter::TieredRateLimiter;
use crate::middleware::MiddlewareStack;
use crate::ports::outbound::{ApiKeyValidator, Forwarder};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Connect timeout for the built-in HTTP forwarder
const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway service
pub struct ApiGatewayService {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    limiter: Arc<TieredRateLimiter>,
    validator: Arc<dyn ApiKeyValidator>,
    shutdown_tx: watch::Sender<bool>,
}

impl ApiGatewayService {
    /// Create the service with the HTTP forwarder and the configured static keys
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let forwarder = HttpForwarder::new(BACKEND_CONNECT_TIMEOUT)
            .map_err(|e| GatewayError::Config(format!("HTTP client: {e}")))?;
        let validator = StaticKeyValidator::new(config.api_keys.clone());
        Self::with_components(config, Arc::new(forwarder), Arc::new(validator))
    }

    /// Create the service with custom collaborators
    pub fn with_components(
        config: GatewayConfig,
        forwarder: Arc<dyn Forwarder>,
        validator: Arc<dyn ApiKeyValidator>,
    ) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let gateway = Gateway::new(forwarder)
            .with_breaker_config(config.circuit_breaker.clone())
            .with_default_timeout(config.timeouts.route_default);
        for route in &config.routes {
            gateway.register_route(route.clone())?;
        }

        let limiter = Arc::new(TieredRateLimiter::new(config.rate_limit.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            limiter,
            validator,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    pub fn limiter(&self) -> Arc<TieredRateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Bind the configured addresses and serve until [`shutdown`](Self::shutdown)
    pub async fn start(&self) -> Result<(), GatewayError> {
        let http = bind(self.config.http_addr()).await?;
        let admin = if self.config.admin.enabled {
            Some(bind(self.config.admin_addr()).await?)
        } else {
            None
        };
        self.serve(http, admin).await
    }

    /// Serve on already-bound listeners until shutdown
    pub async fn serve(
        &self,
        http: TcpListener,
        admin: Option<TcpListener>,
    ) -> Result<(), GatewayError> {
        info!("Starting request gateway...");
        self.limiter.start_cleanup();

        let admin_handle = match admin {
            Some(listener) => {
                info!(addr = ?listener.local_addr().ok(), "Starting admin server");
                let router = self.admin_router();
                let signal = self.shutdown_signal();
                Some(tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(signal)
                        .await
                }))
            }
            None => None,
        };

        info!(
            addr = ?http.local_addr().ok(),
            routes = self.gateway.routes().len(),
            "Request gateway started"
        );

        let result = axum::serve(
            http,
            self.http_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown_signal())
        .await;

        // The public server can only end on shutdown or error; take admin down with it
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = admin_handle {
            match handle.await {
                Ok(Err(e)) => error!(error = %e, "Admin server error"),
                Err(e) => error!(error = %e, "Admin server task failed"),
                Ok(Ok(())) => {}
            }
        }
        self.limiter.stop();

        info!("Request gateway stopped");
        result.map_err(GatewayError::Server)
    }

    /// Trigger graceful shutdown and stop the limiter sweep
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
        self.limiter.stop();
    }

    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Public router: every path goes through the middleware pipeline to the
    /// gateway core
    pub fn http_router(&self) -> Router {
        let stack = MiddlewareStack::from_config(
            &self.config,
            Arc::clone(&self.limiter),
            Arc::clone(&self.validator),
        );
        let handler = stack.apply(Arc::clone(&self.gateway).into_handler());
        Router::new().fallback_service(handler)
    }

    /// Admin router
    pub fn admin_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/stats", get(route_stats))
            .route("/metrics", get(metrics_json))
            .route("/routes", get(list_routes))
            .route("/circuits/reset", post(reset_circuits));

        #[cfg(feature = "metrics")]
        let router = router.route("/metrics/prometheus", get(metrics_prometheus));

        router.with_state(Arc::clone(&self.gateway))
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))
}

/// Health check endpoint
async fn health_check(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "request-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": gateway.routes().len(),
    }))
}

async fn route_stats(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.get_stats())
}

async fn metrics_json(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.metrics().to_json())
}

#[cfg(feature = "metrics")]
async fn metrics_prometheus(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        gateway.metrics().to_prometheus(),
    )
}

async fn list_routes(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.routes())
}

async fn reset_circuits(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let reset = gateway.reset_circuits();
    info!(reset, "Circuit breakers reset via admin API");
    Json(serde_json::json!({ "reset": reset }))
}
