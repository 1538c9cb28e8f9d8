//! Provider failover router.
//!
//! Tries providers in fixed priority order. Quota and rate-limit failures
//! skip to the next provider immediately; other failures are logged,
//! retained as the last error, and the loop continues. A provider switch
//! outside the cooldown window emits one notification through the
//! configured sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::announce::Notifier;
use crate::error::{LlmError, ProviderErrorKind};
use crate::llm::{ChatMessage, ChatOptions, ChatProvider};

/// Which provider is currently serving requests, and when a failover was
/// last announced. Kept in one struct behind one lock so the
/// "is this a new failover" check and the marker update are atomic under
/// concurrent calls.
struct FailoverState {
    active: Option<String>,
    last_notified: Option<Instant>,
}

/// Routes one chat request across a ranked provider list.
pub struct FailoverRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
    cooldown: Duration,
    notifier: Option<Arc<dyn Notifier>>,
    state: Mutex<FailoverState>,
}

impl FailoverRouter {
    /// Create a router over providers in priority order. The first
    /// provider is considered active until a request is served by another.
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>, cooldown: Duration) -> Self {
        let active = providers.first().map(|p| p.name().to_string());
        Self {
            providers,
            cooldown,
            notifier: None,
            state: Mutex::new(FailoverState {
                active,
                last_notified: None,
            }),
        }
    }

    /// Attach a sink for failover notifications.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Send one chat request, failing over across providers as needed.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let mut last_err: Option<LlmError> = None;

        for provider in &self.providers {
            if !provider.is_configured() {
                tracing::debug!(provider = provider.name(), "Skipping unconfigured provider");
                continue;
            }

            match provider.chat(messages, options).await {
                Ok(text) => {
                    self.note_success(provider.name()).await;
                    return Ok(text);
                }
                Err(e) => match e.kind() {
                    ProviderErrorKind::QuotaExceeded | ProviderErrorKind::RateLimited => {
                        tracing::debug!(
                            provider = provider.name(),
                            error = %e,
                            "Provider exhausted, failing over"
                        );
                        last_err = Some(e);
                    }
                    ProviderErrorKind::Unconfigured => {
                        tracing::debug!(provider = provider.name(), "Provider not configured");
                    }
                    ProviderErrorKind::Other => {
                        tracing::warn!(
                            provider = provider.name(),
                            error = %e,
                            "Provider call failed"
                        );
                        last_err = Some(e);
                    }
                },
            }
        }

        Err(LlmError::AllProvidersFailed {
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no provider is configured".to_string()),
        })
    }

    /// Record which provider served the request. Decides under one lock
    /// whether this is a fresh failover and whether the cooldown permits a
    /// notification; the cooldown timer resets only when a notification is
    /// actually sent.
    async fn note_success(&self, name: &str) {
        let notify = {
            let mut state = self.state.lock().await;
            let switched = state.active.as_deref() != Some(name);
            state.active = Some(name.to_string());
            if !switched {
                false
            } else {
                let due = state
                    .last_notified
                    .is_none_or(|at| at.elapsed() >= self.cooldown);
                if due {
                    state.last_notified = Some(Instant::now());
                }
                due
            }
        };

        if notify {
            tracing::info!(provider = name, "LLM provider failover");
            if let Some(ref notifier) = self.notifier {
                let message = format!("⚠️ LLM provider failover: now using {name}");
                if let Err(e) = notifier.deliver(&message).await {
                    tracing::warn!(error = %e, "Failover notification delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    struct StubProvider {
        name: &'static str,
        configured: bool,
        outcome: Outcome,
        calls: AtomicUsize,
    }

    enum Outcome {
        Ok(&'static str),
        RateLimited,
        Quota,
        Broken,
    }

    impl StubProvider {
        fn ok(name: &'static str, text: &'static str) -> Arc<Self> {
            Self::build(name, true, Outcome::Ok(text))
        }

        fn rate_limited(name: &'static str) -> Arc<Self> {
            Self::build(name, true, Outcome::RateLimited)
        }

        fn quota(name: &'static str) -> Arc<Self> {
            Self::build(name, true, Outcome::Quota)
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Self::build(name, true, Outcome::Broken)
        }

        fn unconfigured(name: &'static str) -> Arc<Self> {
            Self::build(name, false, Outcome::Broken)
        }

        fn build(name: &'static str, configured: bool, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                name,
                configured,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Ok(text) => Ok(text.to_string()),
                Outcome::RateLimited => Err(LlmError::RateLimited {
                    provider: self.name.to_string(),
                    reason: "HTTP 429".to_string(),
                    retry_after: None,
                }),
                Outcome::Quota => Err(LlmError::QuotaExceeded {
                    provider: self.name.to_string(),
                    reason: "HTTP 402".to_string(),
                }),
                Outcome::Broken => Err(LlmError::RequestFailed {
                    provider: self.name.to_string(),
                    reason: "connection reset".to_string(),
                }),
            }
        }
    }

    /// Provider that plays back a fixed sequence of outcomes, one per call.
    struct ScriptedProvider {
        name: &'static str,
        script: std::sync::Mutex<std::collections::VecDeque<Outcome>>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: std::sync::Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LlmError> {
            let outcome = self.script.lock().unwrap().pop_front().expect("script exhausted");
            match outcome {
                Outcome::Ok(text) => Ok(text.to_string()),
                Outcome::RateLimited => Err(LlmError::RateLimited {
                    provider: self.name.to_string(),
                    reason: "HTTP 429".to_string(),
                    retry_after: None,
                }),
                Outcome::Quota => Err(LlmError::QuotaExceeded {
                    provider: self.name.to_string(),
                    reason: "HTTP 402".to_string(),
                }),
                Outcome::Broken => Err(LlmError::RequestFailed {
                    provider: self.name.to_string(),
                    reason: "connection reset".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: AsyncMutex<Vec<String>>,
    }

    impl RecordingSink {
        async fn count(&self) -> usize {
            self.messages.lock().await.len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingSink {
        async fn deliver(&self, message: &str) -> anyhow::Result<()> {
            self.messages.lock().await.push(message.to_string());
            Ok(())
        }
    }

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::user("ping")]
    }

    #[tokio::test]
    async fn primary_success_no_notification() {
        let sink = Arc::new(RecordingSink::default());
        let router = FailoverRouter::new(
            vec![StubProvider::ok("a", "hi"), StubProvider::ok("b", "never")],
            Duration::from_secs(3600),
        )
        .with_notifier(sink.clone());

        let text = router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(text, "hi");
        assert_eq!(sink.count().await, 0);
    }

    #[tokio::test]
    async fn rate_limited_primary_fails_over_with_one_notification() {
        let a = StubProvider::rate_limited("a");
        let b = StubProvider::ok("b", "ok");
        let sink = Arc::new(RecordingSink::default());
        let router = FailoverRouter::new(vec![a.clone(), b.clone()], Duration::from_secs(3600))
            .with_notifier(sink.clone());

        let text = router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count().await, 1);
        assert!(sink.messages.lock().await[0].contains("b"));
    }

    #[tokio::test]
    async fn cooldown_suppresses_second_notification() {
        let sink = Arc::new(RecordingSink::default());
        let router = FailoverRouter::new(
            vec![StubProvider::quota("a"), StubProvider::ok("b", "ok")],
            Duration::from_secs(3600),
        )
        .with_notifier(sink.clone());

        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        // second call is served by "b" again — not a switch, and even a
        // repeated switch would be inside the cooldown window
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test]
    async fn zero_cooldown_still_requires_a_switch() {
        let a = StubProvider::rate_limited("a");
        let b = StubProvider::ok("b", "ok");
        let sink = Arc::new(RecordingSink::default());
        let router =
            FailoverRouter::new(vec![a, b], Duration::ZERO).with_notifier(sink.clone());

        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(sink.count().await, 1);
        // still serving from "b": no switch, no notification
        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_cooldown_allows_next_notification() {
        // primary: limited, recovers, then limited again
        let a = ScriptedProvider::new(
            "a",
            vec![Outcome::RateLimited, Outcome::Ok("back on a"), Outcome::RateLimited],
        );
        let b = StubProvider::ok("b", "ok");
        let sink = Arc::new(RecordingSink::default());
        let router = FailoverRouter::new(vec![a, b], Duration::from_secs(3600))
            .with_notifier(sink.clone());

        // switch a -> b: notified, cooldown starts
        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(sink.count().await, 1);

        // switch b -> a inside the window: suppressed, timer NOT reset
        tokio::time::sleep(Duration::from_secs(1800)).await;
        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(sink.count().await, 1);

        // switch a -> b at t=75min, past the window measured from the
        // notification actually sent at t=0
        tokio::time::sleep(Duration::from_secs(2700)).await;
        router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(sink.count().await, 2);
        assert!(sink.messages.lock().await[1].contains("b"));
    }

    #[tokio::test]
    async fn unconfigured_providers_skipped_silently() {
        let a = StubProvider::unconfigured("a");
        let b = StubProvider::ok("b", "ok");
        let sink = Arc::new(RecordingSink::default());
        let router = FailoverRouter::new(vec![a.clone(), b], Duration::from_secs(3600))
            .with_notifier(sink.clone());

        let text = router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        // switching away from an unconfigured primary is still a failover
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test]
    async fn all_failing_reports_last_error() {
        let router = FailoverRouter::new(
            vec![StubProvider::rate_limited("a"), StubProvider::broken("b")],
            Duration::from_secs(3600),
        );

        let err = router
            .chat(&msgs(), &ChatOptions::default())
            .await
            .unwrap_err();
        match err {
            LlmError::AllProvidersFailed { last } => {
                assert!(last.contains("connection reset"), "last = {last}");
            }
            other => panic!("expected AllProvidersFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn no_providers_at_all_fails() {
        let router = FailoverRouter::new(vec![], Duration::from_secs(3600));
        let err = router
            .chat(&msgs(), &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AllProvidersFailed { .. }));
    }

    #[tokio::test]
    async fn other_error_still_tries_next_provider() {
        let a = StubProvider::broken("a");
        let b = StubProvider::ok("b", "recovered");
        let router = FailoverRouter::new(vec![a, b], Duration::from_secs(3600));

        let text = router.chat(&msgs(), &ChatOptions::default()).await.unwrap();
        assert_eq!(text, "recovered");
    }
}
