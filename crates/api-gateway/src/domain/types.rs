//! Core gateway types: caller tiers and API key records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller classification that determines the rate-limit ceiling.
///
/// Ordering is meaningful: `Anonymous < Free < Paid < Enterprise`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Unauthenticated callers, keyed by IP
    #[default]
    Anonymous,
    /// Free API key holders
    Free,
    /// Paid API key holders
    Paid,
    /// Enterprise API key holders
    Enterprise,
}

impl Tier {
    /// All tiers, lowest ceiling first
    pub const ALL: [Tier; 4] = [Tier::Anonymous, Tier::Free, Tier::Paid, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Paid => "paid",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Ok(Tier::Anonymous),
            "free" => Ok(Tier::Free),
            "paid" => Ok(Tier::Paid),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// API key record resolved by an [`ApiKeyValidator`](crate::ports::outbound::ApiKeyValidator).
///
/// Owned by an external identity store; the gateway never persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub key: String,
    pub user_id: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl ApiKeyInfo {
    pub fn new(key: impl Into<String>, user_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            key: key.into(),
            user_id: user_id.into(),
            tier,
            active: true,
            expires_at: None,
        }
    }

    /// Whether the key has passed its expiry time
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}
