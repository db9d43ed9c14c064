//! Session tunables with the stock game-client defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Mirrored entities and players further than this from the character
    /// are evicted on every positional recompute.
    pub eviction_radius: f64,
    /// Deadline for fast correlated commands.
    pub command_timeout: Duration,
    /// Deadline for slow correlated commands (upgrade, compound).
    pub slow_command_timeout: Duration,
    /// Deadline for the connect handshake.
    pub connect_timeout: Duration,
    /// Cadence of the background ping loop.
    pub ping_every: Duration,
    /// Size of the rolling round-trip window.
    pub max_pings: usize,
    /// How many upcoming route steps the executor may scan when checking
    /// whether it can skip straight ahead. Bounds the per-checkpoint
    /// line-of-sight cost on long routes.
    pub route_lookahead: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            eviction_radius: 600.0,
            command_timeout: Duration::from_millis(shared::TIMEOUT_MS),
            slow_command_timeout: Duration::from_millis(shared::SLOW_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(shared::CONNECT_TIMEOUT_MS),
            ping_every: Duration::from_millis(shared::PING_EVERY_MS),
            max_pings: shared::MAX_PINGS,
            route_lookahead: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.eviction_radius, 600.0);
        assert_eq!(config.command_timeout, Duration::from_secs(1));
        assert_eq!(config.slow_command_timeout, Duration::from_secs(60));
        assert_eq!(config.max_pings, 100);
    }
}
