//! Run model and lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted by `spawn`, waiting for a free execution slot.
    Queued,
    /// Actively executing a provider request.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// The configured deadline elapsed before the provider call returned.
    TimedOut,
    /// Cancelled while still queued; never ran.
    Cancelled,
}

impl RunState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Check if the run is in flight (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What happens to a finished run's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Keep the record for later inspection.
    #[default]
    Archive,
    /// Discard the record right after the announcement.
    Delete,
}

/// Specification of a task to spawn.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Free-form instructions for the sub-task. The task receives only
    /// these — no ambient conversation context.
    pub instructions: String,
    /// Human-readable label; derived from the instructions if absent.
    pub label: Option<String>,
    /// Preferred model; None = pool default, then provider default.
    pub model: Option<String>,
    /// Deadline, started when execution begins; None = pool default.
    pub timeout: Option<Duration>,
    /// Cleanup policy for the finished record.
    pub cleanup: CleanupPolicy,
}

impl RunSpec {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            label: None,
            model: None,
            timeout: None,
            cleanup: CleanupPolicy::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }
}

/// One unit of spawned work, tracked from enqueue to terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: Uuid,
    pub label: String,
    pub instructions: String,
    pub model: Option<String>,
    pub timeout: Duration,
    pub cleanup: CleanupPolicy,
    pub state: RunState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Result text on completion, error message on failure/timeout.
    pub output: Option<String>,
}

impl Run {
    /// Build a queued run from a spec, filling defaults from the pool
    /// configuration.
    pub fn new(spec: RunSpec, default_timeout: Duration, default_model: Option<String>) -> Self {
        let label = spec
            .label
            .unwrap_or_else(|| derive_label(&spec.instructions));
        Self {
            id: Uuid::new_v4(),
            label,
            instructions: spec.instructions,
            model: spec.model.or(default_model),
            timeout: spec.timeout.unwrap_or(default_timeout),
            cleanup: spec.cleanup,
            state: RunState::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            output: None,
        }
    }

    /// Transition to a new state, recording timestamps and output.
    pub fn transition_to(
        &mut self,
        target: RunState,
        output: Option<String>,
    ) -> Result<(), PoolError> {
        if !self.state.can_transition_to(target) {
            return Err(PoolError::InvalidTransition {
                id: self.id,
                state: self.state.to_string(),
                target: target.to_string(),
            });
        }

        match target {
            RunState::Running => self.started_at = Some(Utc::now()),
            _ if target.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        if output.is_some() {
            self.output = output;
        }
        self.state = target;
        Ok(())
    }

    /// Wall time spent executing, if the run started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.finished_at.unwrap_or_else(Utc::now);
            let signed = end.signed_duration_since(start);
            signed.to_std().unwrap_or(Duration::ZERO)
        })
    }

    /// First hex group of the run id, for logs and announcements.
    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }
}

/// A label is the first line of the instructions, trimmed to 40 chars.
fn derive_label(instructions: &str) -> String {
    let first_line = instructions.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "subtask".to_string();
    }
    let label: String = first_line.chars().take(40).collect();
    if first_line.chars().count() > 40 {
        format!("{label}…")
    } else {
        label
    }
}
