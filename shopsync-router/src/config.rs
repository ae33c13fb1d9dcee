//! Router configuration.

use std::time::Duration;

/// Configuration for a front-end router. Timing parameters mirror the
/// constants of the deployment; all are settable.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Replication factor N used for the authoritative ring.
    pub replication: usize,
    /// Virtual nodes per physical node on the ring.
    pub vnodes: usize,
    /// How often the liveness monitor runs (eviction + heartbeat burst).
    pub monitor_interval: Duration,
    /// How long a node may stay silent before eviction. Interpreted in
    /// seconds end-to-end.
    pub timeout_threshold: Duration,
    /// How long the election waits for health-check responses.
    pub coordinator_health_check_timeout: Duration,
    /// State-beat period of the router pair.
    pub bstar_heartbeat: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            replication: 4,
            vnodes: 24,
            monitor_interval: Duration::from_secs(30),
            timeout_threshold: Duration::from_secs(500),
            coordinator_health_check_timeout: Duration::from_millis(300),
            bstar_heartbeat: Duration::from_secs(1),
        }
    }
}
