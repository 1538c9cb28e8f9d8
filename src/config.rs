//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// What `spawn` does when the task queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Return `PoolError::QueueFull` immediately.
    #[default]
    Reject,
    /// Wait for a queue slot to free up.
    Block,
}

/// Core configuration, supplied at construction.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum number of runs executing simultaneously.
    pub max_concurrent: usize,
    /// Deadline applied to runs that do not specify their own.
    pub default_timeout: Duration,
    /// Model passed to providers when a run does not specify one
    /// (None = each provider's own default).
    pub default_model: Option<String>,
    /// Maximum number of runs waiting for an execution slot.
    pub queue_capacity: usize,
    /// Behavior when the queue is full.
    pub overflow: OverflowPolicy,
    /// Minimum interval between two failover notifications.
    pub failover_cooldown: Duration,
    /// How many finished runs the registry retains (most recent first).
    pub max_completed_retained: usize,
    /// Result text that means "nothing worth reporting" — the terminal
    /// state is still recorded but no announcement is sent.
    pub skip_sentinel: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            default_timeout: Duration::from_secs(300), // 5 minutes
            default_model: None,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Reject,
            failover_cooldown: Duration::from_secs(3600), // 1 hour
            max_completed_retained: 50,
            skip_sentinel: "NO_REPORT".to_string(),
        }
    }
}

impl CoreConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "default_timeout".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
