//! Gateway configuration with validation.

use super::types::{ApiKeyInfo, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public HTTP server configuration
    pub http: HttpConfig,
    /// Admin server configuration (localhost only by default)
    pub admin: AdminConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Tiered rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Per-route circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Static API keys served by the built-in validator
    pub api_keys: Vec<ApiKeyInfo>,
    /// Routes registered at startup
    pub routes: Vec<RouteConfig>,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.enabled && self.http.port == self.admin.port && self.http.port != 0 {
            return Err(ConfigError::DuplicatePorts);
        }

        self.rate_limit.validate()?;

        if self.timeouts.request.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.route_default.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "route_default timeout cannot be 0".into(),
            ));
        }
        // A route deadline longer than the pipeline deadline never fires
        if self.timeouts.route_default > self.timeouts.request {
            return Err(ConfigError::InvalidTimeout(format!(
                "route_default ({:?}) exceeds request timeout ({:?})",
                self.timeouts.route_default, self.timeouts.request
            )));
        }

        if self.circuit_breaker.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.max_failures cannot be 0".into(),
            ));
        }
        if self.circuit_breaker.reset_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "circuit_breaker.reset_timeout cannot be 0".into(),
            ));
        }

        let mut paths = HashSet::new();
        for route in &self.routes {
            if !paths.insert(route.path.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.path.clone()));
            }
            if let Some(timeout) = route.timeout.filter(|t| *t > self.timeouts.request) {
                return Err(ConfigError::InvalidTimeout(format!(
                    "route {} timeout ({:?}) exceeds request timeout ({:?})",
                    route.path, timeout, self.timeouts.request
                )));
            }
        }

        let mut keys = HashSet::new();
        for key in &self.api_keys {
            if key.key.is_empty() {
                return Err(ConfigError::Invalid("api key cannot be empty".into()));
            }
            if !keys.insert(key.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "api key for user '{}' is listed twice",
                    key.user_id
                )));
            }
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Get Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (localhost only by default)
    pub host: IpAddr,
    /// Port (default: 8081)
    pub port: u16,
    /// Enable admin server
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8081,
            enabled: true,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline enforced by the timeout middleware around the whole pipeline
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// Forwarding deadline for routes that don't set their own
    #[serde(with = "humantime_serde")]
    pub route_default: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            route_default: Duration::from_secs(30),
        }
    }
}

/// Tiered rate limiting configuration.
///
/// Ceilings are requests per `window` for each caller tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the tiered rate-limit middleware
    pub enabled: bool,
    pub anonymous: u32,
    pub free: u32,
    pub paid: u32,
    pub enterprise: u32,
    /// Counting window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Interval between sweeps of idle entries
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Idle time after which an entry may be swept
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous: 10,
            free: 100,
            paid: 1_000,
            enterprise: 10_000,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
            retention: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    /// Ceiling for a tier
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Anonymous => self.anonymous,
            Tier::Free => self.free,
            Tier::Paid => self.paid,
            Tier::Enterprise => self.enterprise,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anonymous == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "anonymous ceiling cannot be 0".into(),
            ));
        }
        let ceilings = Tier::ALL.map(|tier| self.limit_for(tier));
        if ceilings.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::InvalidRateLimit(format!(
                "tier ceilings must be strictly increasing, got {ceilings:?}"
            )));
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidRateLimit("window cannot be 0".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidRateLimit(
                "cleanup_interval cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Circuit breaker settings applied to every route that enables one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub max_failures: u32,
    /// Time spent open before a probe is admitted
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Expose headers
    pub expose_headers: Vec<String>,
    /// Max age for preflight cache
    pub max_age: u64,
    /// Allow credentials
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            enabled: true,
            allowed_origins: strings(&["*"]),
            allowed_methods: strings(&["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"]),
            allowed_headers: strings(&[
                "Content-Type",
                "Authorization",
                "X-API-Key",
                "X-Request-ID",
            ]),
            expose_headers: strings(&[
                "X-Request-ID",
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
            ]),
            max_age: 86400, // 24 hours
            allow_credentials: false,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject requests that carry no credential
    pub require_auth: bool,
}

/// A route registration: public path, backend target and its policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Exact public path
    pub path: String,
    /// Backend base URL
    pub target_url: String,
    /// Forwarding deadline; falls back to `timeouts.route_default`
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Requests per second admitted by the route-local limiter
    #[serde(default = "default_route_rate_limit")]
    pub rate_limit: u32,
    /// Attach a circuit breaker to this route
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
}

fn default_route_rate_limit() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl RouteConfig {
    pub fn new(
        path: impl Into<String>,
        target_url: impl Into<String>,
        timeout: Duration,
        rate_limit: u32,
        circuit_breaker_enabled: bool,
    ) -> Self {
        Self {
            path: path.into(),
            target_url: target_url.into(),
            timeout: Some(timeout),
            rate_limit,
            circuit_breaker_enabled,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// HTTP and admin servers share a port
    #[error("duplicate ports configured")]
    DuplicatePorts,
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Two routes claim the same path
    #[error("duplicate route path: {0}")]
    DuplicateRoute(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Duration (de)serialization accepting "30s", "500ms", "5m" or bare seconds
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Raw::deserialize(deserializer)?;
        raw.into_duration().map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::Raw;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<Raw>::deserialize(deserializer)?
                .map(Raw::into_duration)
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }

    /// TOML and env files may carry either a string or an integer
    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum Raw {
        Secs(u64),
        Text(String),
    }

    impl Raw {
        pub(super) fn into_duration(self) -> Result<Duration, &'static str> {
            match self {
                Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
                Raw::Text(s) => parse_duration(&s),
            }
        }
    }

    fn format_duration(duration: &Duration) -> String {
        if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
