//! # Resilience
//!
//! Backend failure handling: the per-route circuit breaker opening and
//! recovering, route deadlines, and unreachable backends.

#[cfg(test)]
mod tests {
    use crate::integration::support::{error_code, route, test_config, Backend, RunningGateway};
    use api_gateway::domain::config::CircuitBreakerConfig;
    use reqwest::StatusCode;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: 3,
            reset_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_then_recovers() {
        let backend = Backend::spawn().await;
        backend.set_status(500);

        let mut config = test_config();
        config.circuit_breaker = breaker_config();
        config.routes = vec![route("/flaky", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        for _ in 0..3 {
            let response = gateway.get("/flaky").await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        // Open: rejected without reaching the backend
        let response = gateway.get("/flaky").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_code(response).await, "SERVICE_UNAVAILABLE");
        assert_eq!(backend.hits(), 3);

        let routes = gateway.admin_json("/routes").await;
        assert_eq!(routes[0]["circuit_breaker"]["state"], "open");

        // After the reset timeout a probe goes through and closes the circuit
        backend.set_status(200);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(gateway.get("/flaky").await.status(), StatusCode::OK);
        assert_eq!(gateway.get("/flaky").await.status(), StatusCode::OK);
        assert_eq!(backend.hits(), 5);

        let routes = gateway.admin_json("/routes").await;
        assert_eq!(routes[0]["circuit_breaker"]["state"], "closed");

        let stats = gateway.admin_json("/stats").await;
        assert_eq!(stats["/flaky"]["failures"], 3);
        assert_eq!(stats["/flaky"]["success"], 2);
        assert_eq!(stats["/flaky"]["circuit_rejected"], 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let backend = Backend::spawn().await;
        backend.set_status(503);

        let mut config = test_config();
        config.circuit_breaker = breaker_config();
        config.routes = vec![route("/down", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        for _ in 0..3 {
            gateway.get("/down").await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Probe fails: the backend answers once more, then the circuit is open again
        assert_eq!(gateway.get("/down").await.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(backend.hits(), 4);
        let response = gateway.get("/down").await;
        assert_eq!(error_code(response).await, "SERVICE_UNAVAILABLE");
        assert_eq!(backend.hits(), 4);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_admin_reset_closes_circuit() {
        let backend = Backend::spawn().await;
        backend.set_status(500);

        let mut config = test_config();
        config.circuit_breaker = CircuitBreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(60),
        };
        config.routes = vec![route("/flaky", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        gateway.get("/flaky").await;
        gateway.get("/flaky").await;
        assert_eq!(gateway.get("/flaky").await.status(), StatusCode::SERVICE_UNAVAILABLE);

        let reset: serde_json::Value = gateway
            .client
            .post(gateway.admin_url("/circuits/reset"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reset["reset"], 1);

        backend.set_status(200);
        assert_eq!(gateway.get("/flaky").await.status(), StatusCode::OK);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_client_errors_do_not_open_circuit() {
        let backend = Backend::spawn().await;
        backend.set_status(404);

        let mut config = test_config();
        config.circuit_breaker = breaker_config();
        config.routes = vec![route("/items", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        for _ in 0..5 {
            assert_eq!(gateway.get("/items").await.status(), StatusCode::NOT_FOUND);
        }
        assert_eq!(backend.hits(), 5);

        let stats = gateway.admin_json("/stats").await;
        assert_eq!(stats["/items"]["failures"], 0);
        assert_eq!(stats["/items"]["requests"], 5);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_slow_backend_hits_route_deadline() {
        let backend = Backend::spawn().await;
        backend.set_delay(Duration::from_millis(500));

        let mut config = test_config();
        let mut slow = route("/slow", &backend.url());
        slow.timeout = Some(Duration::from_millis(100));
        config.routes = vec![slow];
        let gateway = RunningGateway::start(config).await;

        let started = std::time::Instant::now();
        let response = gateway.get("/slow").await;
        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(error_code(response).await, "TIMEOUT");

        let stats = gateway.admin_json("/stats").await;
        assert_eq!(stats["/slow"]["timeouts"], 1);
        assert_eq!(stats["/slow"]["failures"], 1);
        assert_eq!(stats["/slow"]["last_error"], "timeout");

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let mut config = test_config();
        config.routes = vec![route("/gone", &format!("http://{dead}"))];
        let gateway = RunningGateway::start(config).await;

        let response = gateway.get("/gone").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_code(response).await, "BAD_GATEWAY");

        let stats = gateway.admin_json("/stats").await;
        assert_eq!(stats["/gone"]["failures"], 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_route_without_breaker_keeps_forwarding() {
        let backend = Backend::spawn().await;
        backend.set_status(500);

        let mut config = test_config();
        config.circuit_breaker = breaker_config();
        let mut unprotected = route("/raw", &backend.url());
        unprotected.circuit_breaker_enabled = false;
        config.routes = vec![unprotected];
        let gateway = RunningGateway::start(config).await;

        for _ in 0..6 {
            assert_eq!(
                gateway.get("/raw").await.status(),
                StatusCode::INTERNAL_SERVER_ERROR
            );
        }
        assert_eq!(backend.hits(), 6);

        gateway.stop().await;
    }
}
