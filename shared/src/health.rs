//! Connection status and quality

use serde::{Deserialize, Serialize};

/// Connection manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Quality bucket derived from the heartbeat round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    #[default]
    Poor,
}

impl ConnectionQuality {
    /// Bucket a measured round-trip latency
    ///
    /// <100ms excellent, <300ms good, <1000ms fair, else poor.
    pub fn from_latency_ms(latency_ms: u64) -> Self {
        if latency_ms < 100 {
            ConnectionQuality::Excellent
        } else if latency_ms < 300 {
            ConnectionQuality::Good
        } else if latency_ms < 1000 {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }
}

/// Connection health snapshot, exchanged in heartbeats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    pub quality: ConnectionQuality,
    pub latency_ms: u64,
    pub reconnect_attempts: u32,
    /// Unix milliseconds of the last delivered event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<i64>,
}

impl ConnectionHealth {
    /// Record a measured round trip, rebucketing quality
    pub fn record_latency(&mut self, latency_ms: u64) {
        self.latency_ms = latency_ms;
        self.quality = ConnectionQuality::from_latency_ms(latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_buckets() {
        assert_eq!(ConnectionQuality::from_latency_ms(0), ConnectionQuality::Excellent);
        assert_eq!(ConnectionQuality::from_latency_ms(99), ConnectionQuality::Excellent);
        assert_eq!(ConnectionQuality::from_latency_ms(100), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::from_latency_ms(299), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::from_latency_ms(300), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::from_latency_ms(999), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::from_latency_ms(1000), ConnectionQuality::Poor);
    }
}
