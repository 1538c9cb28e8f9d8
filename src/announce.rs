//! Completion announcements.
//!
//! The core never talks to a chat channel directly — an application
//! injects a [`Notifier`] (e.g. a LINE or Telegram push function) and the
//! dispatcher formats one message per finished run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::pool::{Run, RunState};

/// External delivery sink for run announcements and failover notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, message: &str) -> anyhow::Result<()>;
}

/// Formats and delivers one notification per finished run.
pub struct AnnounceDispatcher {
    sink: Arc<dyn Notifier>,
}

impl AnnounceDispatcher {
    pub fn new(sink: Arc<dyn Notifier>) -> Self {
        Self { sink }
    }

    /// Announce a finished run. Delivery failures are logged and never
    /// propagated back into the pool's execution path.
    pub async fn announce(&self, run: &Run) {
        let message = format_announcement(run);
        if let Err(e) = self.sink.deliver(&message).await {
            tracing::warn!(run_id = %run.id, error = %e, "Announcement delivery failed");
        }
    }
}

fn format_announcement(run: &Run) -> String {
    let elapsed = run
        .elapsed()
        .map(|d| format!(" ({:.1}s)", d.as_secs_f64()))
        .unwrap_or_default();
    let body = run.output.as_deref().unwrap_or("(no output)");

    match run.state {
        RunState::Completed => {
            format!("✅ [{}] finished{elapsed}\n{body}", run.label)
        }
        RunState::Failed => {
            format!("❌ [{}] failed{elapsed}\n{body}", run.label)
        }
        RunState::TimedOut => {
            format!(
                "⏱️ [{}] timed out after {}s",
                run.label,
                run.timeout.as_secs()
            )
        }
        other => format!("[{}] {}", run.label, other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::pool::{CleanupPolicy, RunSpec};

    fn finished_run(state: RunState, output: Option<&str>) -> Run {
        let spec = RunSpec::new("check overnight bookings")
            .with_label("bookings")
            .with_cleanup(CleanupPolicy::Archive);
        let mut run = Run::new(spec, Duration::from_secs(60), None);
        run.transition_to(RunState::Running, None).unwrap();
        run.transition_to(state, output.map(String::from)).unwrap();
        run
    }

    #[test]
    fn completed_format_carries_result() {
        let run = finished_run(RunState::Completed, Some("3 new bookings"));
        let msg = format_announcement(&run);
        assert!(msg.starts_with("✅ [bookings]"));
        assert!(msg.contains("3 new bookings"));
    }

    #[test]
    fn failed_format_carries_error() {
        let run = finished_run(RunState::Failed, Some("All providers failed"));
        let msg = format_announcement(&run);
        assert!(msg.starts_with("❌ [bookings]"));
        assert!(msg.contains("All providers failed"));
    }

    #[test]
    fn timeout_format_names_deadline() {
        let run = finished_run(RunState::TimedOut, Some("timed out after 60s"));
        let msg = format_announcement(&run);
        assert!(msg.contains("timed out after 60s"));
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingSink {
        async fn deliver(&self, _message: &str) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("channel unreachable")
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let dispatcher = AnnounceDispatcher::new(sink.clone());
        let run = finished_run(RunState::Completed, Some("ok"));
        // must not panic or propagate
        dispatcher.announce(&run).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }
}
