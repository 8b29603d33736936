//! Aggregate status of a cluster batch job.

use serde::{Deserialize, Serialize};

/// Pod counts reported by one status poll of a batch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterJobStatus {
    pub succeeded: u32,
    pub failed: u32,
    pub active: u32,
    pub ready: u32,
}

impl ClusterJobStatus {
    /// Every node of the job has completed successfully.
    pub fn is_complete(&self, node_count: u32) -> bool {
        self.succeeded == node_count
    }

    /// Human-readable progress line. Consecutive polls producing the same
    /// text are reported only once.
    pub fn summary(&self, node_count: u32) -> String {
        format!(
            "Success {}, Fail {}, Active {}, Ready {} of {node_count}",
            self.succeeded, self.failed, self.active, self.ready
        )
    }
}
