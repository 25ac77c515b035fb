//! # Admission
//!
//! Authentication and the tiered rate limiter in front of a live backend:
//! which callers get through, with what identity, and how often.

#[cfg(test)]
mod tests {
    use crate::integration::support::{error_code, route, test_config, Backend, RunningGateway};
    use api_gateway::domain::config::RateLimitConfig;
    use api_gateway::{ApiKeyInfo, GatewayConfig, Tier};
    use reqwest::StatusCode;
    use std::time::Duration;

    fn keyed_config(backend: &Backend) -> GatewayConfig {
        let mut expired = ApiKeyInfo::new("key-expired", "carol", Tier::Paid);
        expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
        let mut inactive = ApiKeyInfo::new("key-inactive", "dave", Tier::Paid);
        inactive.active = false;

        let mut config = test_config();
        config.api_keys = vec![
            ApiKeyInfo::new("key-free", "alice", Tier::Free),
            ApiKeyInfo::new("key-paid", "bob", Tier::Paid),
            expired,
            inactive,
        ];
        config.routes = vec![route("/data", &backend.url())];
        config
    }

    #[tokio::test]
    async fn test_required_auth_rejects_anonymous() {
        let backend = Backend::spawn().await;
        let mut config = keyed_config(&backend);
        config.auth.require_auth = true;
        let gateway = RunningGateway::start(config).await;

        let response = gateway.get("/data").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "Bearer");
        assert_eq!(error_code(response).await, "UNAUTHORIZED");
        assert_eq!(backend.hits(), 0);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_authenticated_identity_reaches_backend() {
        let backend = Backend::spawn().await;
        let mut config = keyed_config(&backend);
        config.auth.require_auth = true;
        let gateway = RunningGateway::start(config).await;

        let response = gateway
            .client
            .get(gateway.url("/data"))
            .bearer_auth("key-paid")
            .header("x-user-id", "mallory")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3000");

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.headers["x-user-id"], "bob");

        // Query-string credential is accepted as a last resort
        let response = gateway.get("/data?api_key=key-free&page=3").await;
        assert_eq!(response.status(), StatusCode::OK);
        let seen = backend.last_request().unwrap();
        assert_eq!(seen.headers["x-user-id"], "alice");
        // The credential stays at the gateway
        assert_eq!(seen.path_and_query, "/data?page=3");

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected_even_when_optional() {
        let backend = Backend::spawn().await;
        let gateway = RunningGateway::start(keyed_config(&backend)).await;

        let cases = [
            ("key-unknown", "INVALID_API_KEY"),
            ("key-expired", "API_KEY_EXPIRED"),
            ("key-inactive", "API_KEY_INACTIVE"),
        ];
        for (key, code) in cases {
            let response = gateway
                .client
                .get(gateway.url("/data"))
                .header("x-api-key", key)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{key}");
            assert_eq!(error_code(response).await, code);
        }

        // No credential at all is fine when auth is optional
        assert_eq!(gateway.get("/data").await.status(), StatusCode::OK);
        assert_eq!(backend.hits(), 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_tier_ceilings_enforced() {
        let backend = Backend::spawn().await;
        let mut config = keyed_config(&backend);
        config.rate_limit = RateLimitConfig {
            anonymous: 2,
            free: 4,
            paid: 6,
            enterprise: 8,
            window: Duration::from_secs(60),
            ..RateLimitConfig::default()
        };
        let gateway = RunningGateway::start(config).await;

        // Anonymous: keyed by address
        for remaining in ["1", "0"] {
            let response = gateway.get("/data").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        }
        let rejected = gateway.get("/data").await;
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = rejected.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
        assert_eq!(error_code(rejected).await, "RATE_LIMIT_EXCEEDED");

        // Free key: own window, higher ceiling
        let mut admitted = 0;
        for _ in 0..6 {
            let response = gateway
                .client
                .get(gateway.url("/data"))
                .header("x-api-key", "key-free")
                .send()
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
        assert_eq!(backend.hits(), 6);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_admitted_exactly() {
        let backend = Backend::spawn().await;
        let mut config = keyed_config(&backend);
        config.rate_limit = RateLimitConfig {
            anonymous: 5,
            free: 6,
            paid: 7,
            enterprise: 8,
            window: Duration::from_secs(60),
            ..RateLimitConfig::default()
        };
        let gateway = RunningGateway::start(config).await;

        let responses = futures::future::join_all((0..20).map(|_| gateway.get("/data"))).await;
        let admitted = responses
            .iter()
            .filter(|r| r.status() == StatusCode::OK)
            .count();
        let rejected = responses
            .iter()
            .filter(|r| r.status() == StatusCode::TOO_MANY_REQUESTS)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(rejected, 15);
        assert_eq!(backend.hits(), 5);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_limiter_disabled() {
        let backend = Backend::spawn().await;
        let mut config = keyed_config(&backend);
        config.rate_limit.enabled = false;
        config.rate_limit.anonymous = 1;
        let gateway = RunningGateway::start(config).await;

        for _ in 0..5 {
            let response = gateway.get("/data").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }

        gateway.stop().await;
    }
}
