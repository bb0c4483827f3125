//! Store Configuration
//!
//! Tunables for a [`Store`](crate::store::Store). Configuration is plain data
//! that can be built in code or loaded from JSON.

use serde::{Deserialize, Serialize};

/// When unreachable atom state is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcPolicy {
    /// Sweep after every propagation pass and every unsubscribe.
    #[default]
    Eager,
    /// Only sweep when `Store::collect_garbage` is called.
    Manual,
}

/// Configuration for a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of nested evaluations before reads fail with
    /// `StoreError::DepthExceeded`.
    #[serde(default = "default_max_evaluation_depth")]
    pub max_evaluation_depth: usize,

    /// Garbage collection policy.
    #[serde(default)]
    pub gc: GcPolicy,
}

fn default_max_evaluation_depth() -> usize {
    512
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_evaluation_depth: default_max_evaluation_depth(),
            gc: GcPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the maximum evaluation depth.
    pub fn with_max_evaluation_depth(mut self, depth: usize) -> Self {
        self.max_evaluation_depth = depth;
        self
    }

    /// Set the garbage collection policy.
    pub fn with_gc(mut self, gc: GcPolicy) -> Self {
        self.gc = gc;
        self
    }
}
