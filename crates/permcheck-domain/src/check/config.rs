//! Configuration for the check engine.

use std::time::Duration;

/// Depth given to requests built with default metadata.
pub const DEFAULT_DEPTH: u32 = 20;

/// Configuration for the check engine.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Concurrently running sub-checks per union/intersection call.
    pub concurrency_limit: usize,
    /// Upper bound applied to the depth a caller asks for.
    pub max_depth: u32,
    /// Deadline for one top-level check.
    pub timeout: Duration,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
            max_depth: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

impl CheckConfig {
    /// Sets the per-combinator concurrency limit. Zero is treated as one.
    pub fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
