//! Server configuration

use std::time::Duration;

use crate::hub::{AckRetryPolicy, HubConfig, RateLimitConfig};

/// Hub server configuration, env-driven
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    pub http_port: u16,
    pub stream_tcp_port: u16,
    pub environment: String,

    // Delivery tuning
    pub channel_capacity: usize,
    pub replay_capacity: usize,
    pub replay_retention_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_missed_heartbeats: u32,
    pub rate_limit_window_ms: u64,
    /// "heartbeat" or "backoff"
    pub ack_retry_mode: String,
    pub ack_retry_base_ms: u64,
    pub ack_retry_cap_ms: u64,
    pub max_ack_attempts: u32,

    /// Accepted subscribe tokens (comma-separated in env); empty list means
    /// every subscribe is rejected until a validator is provided
    pub accepted_tokens: Vec<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/gambero/hub".into()),
            http_port: env_parse("HTTP_PORT", 3000),
            stream_tcp_port: env_parse("STREAM_TCP_PORT", 8081),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            channel_capacity: env_parse("CHANNEL_CAPACITY", 1024),
            replay_capacity: env_parse("REPLAY_CAPACITY", 256),
            replay_retention_ms: env_parse("REPLAY_RETENTION_MS", 120_000),
            heartbeat_interval_ms: env_parse("HEARTBEAT_INTERVAL_MS", 30_000),
            max_missed_heartbeats: env_parse("MAX_MISSED_HEARTBEATS", 3),
            rate_limit_window_ms: env_parse("RATE_LIMIT_WINDOW_MS", 2_000),
            ack_retry_mode: std::env::var("ACK_RETRY_MODE").unwrap_or_else(|_| "heartbeat".into()),
            ack_retry_base_ms: env_parse("ACK_RETRY_BASE_MS", 1_000),
            ack_retry_cap_ms: env_parse("ACK_RETRY_CAP_MS", 30_000),
            max_ack_attempts: env_parse("MAX_ACK_ATTEMPTS", 5),

            accepted_tokens: std::env::var("ACCEPTED_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Create a config with custom overrides
    pub fn with_overrides(
        work_dir: impl Into<String>,
        http_port: u16,
        stream_tcp_port: u16,
    ) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config.stream_tcp_port = stream_tcp_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Hub tuning derived from this config
    pub fn hub_config(&self) -> HubConfig {
        let ack_retry = match self.ack_retry_mode.as_str() {
            "backoff" => AckRetryPolicy::Backoff {
                base: Duration::from_millis(self.ack_retry_base_ms),
                cap: Duration::from_millis(self.ack_retry_cap_ms),
            },
            _ => AckRetryPolicy::EveryHeartbeat,
        };

        HubConfig {
            channel_capacity: self.channel_capacity,
            replay_capacity: self.replay_capacity,
            replay_retention: Duration::from_millis(self.replay_retention_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_missed_heartbeats: self.max_missed_heartbeats,
            rate_limit: RateLimitConfig {
                window: Duration::from_millis(self.rate_limit_window_ms),
                ..Default::default()
            },
            ack_retry,
            max_ack_attempts: self.max_ack_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
