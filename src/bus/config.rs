//! Broker configuration

use std::time::Duration;

/// In-process broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Server name reported to clients and used in metrics subjects
    pub server_name: String,

    /// Protocol version string reported to clients
    pub version: String,

    /// Maximum payload size in bytes (0 = unlimited)
    pub max_payload: usize,

    /// Artificial one-way latency added to round-trip probes
    pub ping_latency: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server_name: "local".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_payload: 1024 * 1024, // 1MB
            ping_latency: Duration::ZERO,
        }
    }
}

impl BrokerConfig {
    /// Set the server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set the maximum payload size
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// Set the simulated ping latency
    pub fn ping_latency(mut self, latency: Duration) -> Self {
        self.ping_latency = latency;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();

        assert_eq!(config.server_name, "local");
        assert_eq!(config.max_payload, 1024 * 1024);
        assert_eq!(config.ping_latency, Duration::ZERO);
    }

    #[test]
    fn test_builder_chaining() {
        let config = BrokerConfig::default()
            .server_name("east-1")
            .max_payload(0)
            .ping_latency(Duration::from_millis(5));

        assert_eq!(config.server_name, "east-1");
        assert_eq!(config.max_payload, 0);
        assert_eq!(config.ping_latency, Duration::from_millis(5));
    }
}
