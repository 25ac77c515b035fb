//! Harness: scriptable loopback backends and a gateway serving on ephemeral
//! ports.

use api_gateway::domain::config::RateLimitConfig;
use api_gateway::{ApiGatewayService, GatewayConfig, GatewayError, RouteConfig};
use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What a backend saw for one request
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Clone)]
struct BackendState {
    hits: Arc<AtomicUsize>,
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    last: Arc<Mutex<Option<SeenRequest>>>,
}

/// A backend that answers every path with a configurable status and delay
pub struct Backend {
    pub addr: SocketAddr,
    state: BackendState,
}

impl Backend {
    pub async fn spawn() -> Self {
        let state = BackendState {
            hits: Arc::new(AtomicUsize::new(0)),
            status: Arc::new(AtomicU16::new(200)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            last: Arc::new(Mutex::new(None)),
        };

        let router = Router::new()
            .fallback(record)
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.state.last.lock().clone()
    }
}

async fn record(State(state): State<BackendState>, req: Request<Body>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    *state.last.lock() = Some(SeenRequest {
        method: parts.method.to_string(),
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).to_string(),
    });

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(format!("backend:{}", parts.uri.path())));
    *response.status_mut() = status;
    response
}

/// Config with generous tier ceilings and no routes
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        rate_limit: RateLimitConfig {
            anonymous: 1_000,
            free: 2_000,
            paid: 3_000,
            enterprise: 4_000,
            ..RateLimitConfig::default()
        },
        ..GatewayConfig::default()
    }
}

pub fn route(path: &str, target: &str) -> RouteConfig {
    RouteConfig::new(path, target, Duration::from_secs(5), 1_000, true)
}

/// A gateway serving on ephemeral loopback ports
pub struct RunningGateway {
    pub http: SocketAddr,
    pub admin: SocketAddr,
    pub service: Arc<ApiGatewayService>,
    pub client: reqwest::Client,
    handle: JoinHandle<Result<(), GatewayError>>,
}

impl RunningGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let service = Arc::new(ApiGatewayService::new(config).unwrap());
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http.local_addr().unwrap();
        let admin_addr = admin.local_addr().unwrap();

        let running = Arc::clone(&service);
        let handle = tokio::spawn(async move { running.serve(http, Some(admin)).await });

        Self {
            http: http_addr,
            admin: admin_addr,
            service,
            client: reqwest::Client::new(),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn admin_json(&self, path: &str) -> serde_json::Value {
        self.client
            .get(self.admin_url(path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    pub async fn stop(self) {
        self.service.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("gateway did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Parse the JSON error envelope
pub async fn error_code(response: reqwest::Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}
