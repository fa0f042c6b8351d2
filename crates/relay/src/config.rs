use std::time::Duration;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_UNRESTRICTED_RETENTION};

/// Relay agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of live exchanges on this node
    pub max_exchanges: usize,
    /// Forwarding quota given to each new exchange
    pub exchange_points: i64,
    /// Idle time after which an exchange is swept
    pub exchange_retention: Duration,
    /// Upper bound for a retention requested by the client
    pub max_exchange_retention: Duration,
    /// How long an unrestricted endpoint mark stays valid
    pub unrestricted_retention: Duration,
    pub endpoint_cache_capacity: usize,
    /// Minimum spacing between packets admitted from unknown senders, node-wide
    pub unknown_sender_interval: Duration,
    pub clean_interval: Duration,
    pub send_interval: Duration,
    /// Packets handed to the transport per send tick
    pub max_send_batch: usize,
    /// Admit unknown senders on every exchange, whatever its flags
    pub allow_unknown_inbound: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_exchanges: 1000,
            exchange_points: 1_000_000,
            exchange_retention: Duration::from_secs(60),
            max_exchange_retention: Duration::from_secs(600),
            unrestricted_retention: DEFAULT_UNRESTRICTED_RETENTION,
            endpoint_cache_capacity: DEFAULT_CAPACITY,
            unknown_sender_interval: Duration::from_millis(100),
            clean_interval: Duration::from_secs(10),
            send_interval: Duration::from_millis(1),
            max_send_batch: 256,
            allow_unknown_inbound: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.clean_interval, Duration::from_secs(10));
        assert_eq!(config.unrestricted_retention, Duration::from_secs(60));
        assert!(config.exchange_retention <= config.max_exchange_retention);
    }
}
