use std::time::Duration;

use serde::Deserialize;

/// What to do when a connection's async queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Give up observation of the oldest queued message. A held-open
    /// message keeps its place and is forwarded in turn, unobserved.
    #[default]
    DropOldest,
    /// Refuse observation of the new message. A held-open message is still
    /// queued and forwarded in turn, unobserved.
    RejectNew,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of async dispatch workers.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Per-connection, per-direction async queue bound.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Stall timeout for async listeners registered without one. 0 = none.
    #[serde(default)]
    pub async_timeout_ms: u64,
    /// Message names whose forwarding waits for async listeners.
    #[serde(default)]
    pub hold_open: Vec<String>,
}

fn default_worker_threads() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

impl DispatchConfig {
    pub fn async_timeout(&self) -> Option<Duration> {
        (self.async_timeout_ms > 0).then(|| Duration::from_millis(self.async_timeout_ms))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            async_timeout_ms: 0,
            hold_open: Vec::new(),
        }
    }
}
