//! Node configuration.

use std::time::Duration;

/// Configuration for a storage node. All quorum and timing parameters are
/// settable; the defaults are the production values.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Replication factor N: copies per key (primary + N−1 replicas).
    pub replication: usize,
    /// Read quorum R.
    pub read_quorum: usize,
    /// Write quorum W.
    pub write_quorum: usize,
    /// Virtual nodes per physical node on the ring.
    pub vnodes: usize,
    /// Hard deadline for one quorum round.
    pub quorum_timeout: Duration,
    /// Minimum spacing between retries to the same peer inside a quorum.
    pub min_retry_interval: Duration,
    /// How often pending hints are probed and flushed.
    pub hint_flush_interval: Duration,
    /// How long a probed peer has to answer a health check.
    pub health_check_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            replication: 4,
            read_quorum: 2,
            write_quorum: 3,
            vnodes: 24,
            quorum_timeout: Duration::from_secs(5),
            min_retry_interval: Duration::from_secs(1),
            hint_flush_interval: Duration::from_secs(15),
            health_check_timeout: Duration::from_millis(150),
        }
    }
}
