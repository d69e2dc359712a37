//! Gateway configuration.
//!
//! Defaults match the documented delivery policy (3 webhook attempts, 60 s
//! media / 30 s text per-attempt timeouts, 30 s media downloads, subscriber
//! queues of 256). `from_env` overlays `GATEWAY_*` variables on top.

use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// SQLite connection string for the persistence adapter.
    pub database_url: String,
    /// Origins accepted at subscriber handshake. Empty list allows all.
    pub allowed_origins: Vec<String>,
    /// Outbound queue capacity per dashboard subscriber.
    pub subscriber_queue_capacity: usize,
    /// Deadline for materializing inbound media before falling back to text.
    #[serde(with = "secs")]
    pub media_download_timeout: Duration,
    pub webhook: WebhookConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub max_attempts: u32,
    /// Per-attempt timeout when the payload carries media (multipart).
    #[serde(with = "secs")]
    pub media_timeout: Duration,
    /// Per-attempt timeout for plain JSON payloads.
    #[serde(with = "secs")]
    pub text_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            allowed_origins: Vec::new(),
            subscriber_queue_capacity: 256,
            media_download_timeout: Duration::from_secs(30),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            media_timeout: Duration::from_secs(60),
            text_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Defaults overlaid with `GATEWAY_DATABASE_URL` and
    /// `GATEWAY_ALLOWED_ORIGINS` (comma-separated) when set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("GATEWAY_DATABASE_URL") {
            if !url.is_empty() {
                cfg.database_url = url;
            }
        }
        if let Ok(origins) = std::env::var("GATEWAY_ALLOWED_ORIGINS") {
            cfg.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        cfg
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_delivery_policy() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.webhook.max_attempts, 3);
        assert_eq!(cfg.webhook.media_timeout, Duration::from_secs(60));
        assert_eq!(cfg.webhook.text_timeout, Duration::from_secs(30));
        assert_eq!(cfg.media_download_timeout, Duration::from_secs(30));
        assert_eq!(cfg.subscriber_queue_capacity, 256);
        assert!(cfg.allowed_origins.is_empty());
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let cfg: GatewayConfig = serde_json::from_str(
            r#"{"database_url":"sqlite://gw.db","webhook":{"max_attempts":5}}"#,
        )
        .unwrap();
        assert_eq!(cfg.database_url, "sqlite://gw.db");
        assert_eq!(cfg.webhook.max_attempts, 5);
        assert_eq!(cfg.webhook.text_timeout, Duration::from_secs(30));
    }
}
