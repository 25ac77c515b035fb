//! # Proxy Flows
//!
//! Requests travel client → pipeline → gateway core → backend and back.
//! Checks routing, URL joining, header propagation, and the admin view of the
//! traffic.

#[cfg(test)]
mod tests {
    use crate::integration::support::{error_code, route, test_config, Backend, RunningGateway};
    use reqwest::StatusCode;

    #[tokio::test]
    async fn test_request_proxied_with_joined_url() {
        let backend = Backend::spawn().await;
        let mut config = test_config();
        config.routes = vec![route("/users", &format!("{}/api/v1?source=gw", backend.url()))];
        let gateway = RunningGateway::start(config).await;

        let response = gateway.get("/users?page=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "backend:/api/v1/users");

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.method, "GET");
        assert_eq!(seen.path_and_query, "/api/v1/users?source=gw&page=2");

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_request_headers_propagated() {
        let backend = Backend::spawn().await;
        let mut config = test_config();
        config.routes = vec![route("/orders", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        let response = gateway
            .client
            .post(gateway.url("/orders"))
            .header("x-request-id", "trace-123")
            .header("x-user-id", "spoofed")
            .body(r#"{"item":"book"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "trace-123");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().contains_key("x-ratelimit-remaining"));

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.method, "POST");
        assert_eq!(seen.body, r#"{"item":"book"}"#);
        assert_eq!(seen.headers["x-request-id"], "trace-123");
        assert_eq!(seen.headers["x-forwarded-for"], "127.0.0.1");
        // Anonymous callers cannot assert an identity
        assert!(!seen.headers.contains_key("x-user-id"));

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_generated_request_id_reaches_backend() {
        let backend = Backend::spawn().await;
        let mut config = test_config();
        config.routes = vec![route("/users", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        let response = gateway.get("/users").await;
        let echoed = response.headers()["x-request-id"].to_str().unwrap().to_string();
        assert!(!echoed.is_empty());

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.headers["x-request-id"], echoed.as_str());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_unregistered_path_is_404() {
        let backend = Backend::spawn().await;
        let mut config = test_config();
        config.routes = vec![route("/users", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        // Exact match only
        let response = gateway.get("/users/42").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_code(response).await, "ROUTE_NOT_FOUND");
        assert_eq!(backend.hits(), 0);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_cors_preflight_short_circuits() {
        let backend = Backend::spawn().await;
        let mut config = test_config();
        config.routes = vec![route("/users", &backend.url())];
        let gateway = RunningGateway::start(config).await;

        let response = gateway
            .client
            .request(reqwest::Method::OPTIONS, gateway.url("/users"))
            .header("origin", "https://app.example.com")
            .header("access-control-request-method", "POST")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().contains_key("access-control-allow-methods"));
        assert_eq!(backend.hits(), 0);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_admin_reports_route_traffic() {
        let healthy = Backend::spawn().await;
        let failing = Backend::spawn().await;
        failing.set_status(502);

        let mut config = test_config();
        config.routes = vec![
            route("/healthy", &healthy.url()),
            route("/failing", &failing.url()),
        ];
        let gateway = RunningGateway::start(config).await;

        for _ in 0..3 {
            gateway.get("/healthy").await;
        }
        assert_eq!(gateway.get("/failing").await.status(), StatusCode::BAD_GATEWAY);

        let stats = gateway.admin_json("/stats").await;
        assert_eq!(stats["/healthy"]["requests"], 3);
        assert_eq!(stats["/healthy"]["success"], 3);
        assert_eq!(stats["/failing"]["failures"], 1);
        assert_eq!(stats["/failing"]["last_error"], "HTTP 502");

        let routes = gateway.admin_json("/routes").await;
        assert_eq!(routes.as_array().unwrap().len(), 2);

        let metrics = gateway.admin_json("/metrics").await;
        assert_eq!(metrics["requests"]["total"], 4);
        assert_eq!(metrics["requests"]["success"], 3);

        let health = gateway.admin_json("/health").await;
        assert_eq!(health["status"], "healthy");

        gateway.stop().await;
    }
}
