//! Bounded-concurrency task pool.
//!
//! `spawn()` accepts a task, records it as queued, and returns
//! immediately. A dispatcher task admits queued runs in FIFO order, at
//! most `max_concurrent` at a time; each admitted run executes a single
//! provider request raced against its own deadline, announces its outcome
//! once, and applies its cleanup policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::announce::AnnounceDispatcher;
use crate::config::{CoreConfig, OverflowPolicy};
use crate::error::{ConfigError, PoolError};
use crate::llm::{ChatMessage, ChatOptions, FailoverRouter};
use crate::pool::run::{CleanupPolicy, Run, RunSpec, RunState};
use crate::registry::RunRegistry;

/// Monotonic pool counters.
#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Returned by `spawn`: the new run's id and how many runs were waiting
/// for a slot at acceptance time (this one included).
#[derive(Debug, Clone, Serialize)]
pub struct SpawnReceipt {
    pub run_id: Uuid,
    pub queue_depth: usize,
}

/// Full pool status for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub active: Vec<Run>,
    pub completed_recent: Vec<Run>,
    pub stats: PoolStats,
}

/// Shared dependencies for run execution.
struct ExecDeps {
    registry: Arc<RunRegistry>,
    router: Arc<FailoverRouter>,
    announcer: Arc<AnnounceDispatcher>,
    counters: Arc<Counters>,
    skip_sentinel: String,
}

/// Bounded-concurrency executor for AI-completion sub-tasks.
pub struct TaskPool {
    config: CoreConfig,
    registry: Arc<RunRegistry>,
    counters: Arc<Counters>,
    tx: mpsc::Sender<Uuid>,
    dispatcher: JoinHandle<()>,
    shut_down: AtomicBool,
}

impl TaskPool {
    /// Create a pool and start its dispatcher.
    pub fn new(
        config: CoreConfig,
        router: Arc<FailoverRouter>,
        announcer: Arc<AnnounceDispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(RunRegistry::new(config.max_completed_retained));
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        let deps = Arc::new(ExecDeps {
            registry: Arc::clone(&registry),
            router,
            announcer,
            counters: Arc::clone(&counters),
            skip_sentinel: config.skip_sentinel.clone(),
        });
        let dispatcher = tokio::spawn(dispatch_loop(rx, semaphore, deps));

        tracing::info!(
            max_concurrent = config.max_concurrent,
            queue_capacity = config.queue_capacity,
            "Task pool started"
        );

        Ok(Self {
            config,
            registry,
            counters,
            tx,
            dispatcher,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Accept a task and return immediately with its run id. The run is
    /// visible as `queued` before this returns.
    ///
    /// With `OverflowPolicy::Reject` (the default) a full queue yields
    /// `PoolError::QueueFull`; with `Block` this waits for a slot.
    pub async fn spawn(&self, spec: RunSpec) -> Result<SpawnReceipt, PoolError> {
        // the dispatcher is gone after shutdown; a run accepted now would
        // sit queued forever
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let run = Run::new(
            spec,
            self.config.default_timeout,
            self.config.default_model.clone(),
        );
        let id = run.id;
        let label = run.label.clone();
        self.registry.insert(run).await;

        let enqueued = match self.config.overflow {
            OverflowPolicy::Reject => self.tx.try_send(id).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PoolError::QueueFull {
                    capacity: self.config.queue_capacity,
                },
                mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
            }),
            OverflowPolicy::Block => self.tx.send(id).await.map_err(|_| PoolError::ShutDown),
        };
        if let Err(e) = enqueued {
            self.registry.remove(id).await;
            return Err(e);
        }

        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        let queue_depth = self.registry.queued_count().await;
        tracing::debug!(run_id = %id, label = %label, queue_depth, "Run queued");

        Ok(SpawnReceipt {
            run_id: id,
            queue_depth,
        })
    }

    /// Look up a run by id.
    pub async fn get(&self, id: Uuid) -> Option<Run> {
        self.registry.get(id).await
    }

    /// Cancel a queued run. Running runs are unaffected (returns false) —
    /// the per-run timeout is the only bound on a started run.
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.registry.cancel(id).await
    }

    /// Pool status: in-flight runs, recently finished runs, counters.
    pub async fn status(&self) -> PoolStatus {
        let (active, completed_recent) = self.registry.list().await;
        PoolStatus {
            active: active.into_iter().filter(|r| r.state.is_active()).collect(),
            completed_recent,
            stats: self.stats(),
        }
    }

    /// Snapshot of the monotonic counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }

    /// The registry backing this pool.
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Stop admitting runs and cancel everything still queued. Later
    /// `spawn` calls return `PoolError::ShutDown`; runs that already
    /// started keep executing to their own terminal state.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.dispatcher.abort();
        let (active, _) = self.registry.list().await;
        for run in active {
            if run.state == RunState::Queued {
                self.registry.cancel(run.id).await;
            }
        }
        tracing::info!("Task pool shut down");
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Admit queued runs in FIFO order, one execution slot each.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<Uuid>,
    semaphore: Arc<Semaphore>,
    deps: Arc<ExecDeps>,
) {
    loop {
        // Take a slot first so the channel keeps holding the FIFO backlog.
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let Some(id) = rx.recv().await else {
            break;
        };

        // Runs cancelled while queued never start.
        let admitted = deps
            .registry
            .update(id, |run| {
                run.transition_to(RunState::Running, None).is_ok()
            })
            .await
            .unwrap_or(false);
        if !admitted {
            tracing::debug!(run_id = %id, "Skipping dequeued run (cancelled or gone)");
            drop(permit);
            continue;
        }

        let deps = Arc::clone(&deps);
        tokio::spawn(async move {
            execute_run(id, deps).await;
            drop(permit);
        });
    }
}

/// Execute one admitted run to its terminal state. Errors are contained
/// to this run; nothing here can abort the pool or other runs.
async fn execute_run(id: Uuid, deps: Arc<ExecDeps>) {
    let Some(run) = deps.registry.get(id).await else {
        return;
    };
    let span = tracing::info_span!("run", id = %run.short_id(), label = %run.label);

    async {
        tracing::info!(timeout_secs = run.timeout.as_secs(), "Run started");

        let messages = task_messages(&run, &deps.skip_sentinel);
        let options = ChatOptions {
            model: run.model.clone(),
            ..Default::default()
        };

        // First settlement wins: if the deadline elapses, the request
        // future is dropped and a late provider result never lands.
        let outcome = tokio::time::timeout(run.timeout, deps.router.chat(&messages, &options)).await;

        let (state, output) = match outcome {
            Ok(Ok(text)) => (RunState::Completed, text),
            Ok(Err(e)) => (RunState::Failed, e.to_string()),
            Err(_) => (
                RunState::TimedOut,
                format!("timed out after {}s", run.timeout.as_secs()),
            ),
        };

        match state {
            RunState::Completed => deps.counters.completed.fetch_add(1, Ordering::Relaxed),
            RunState::Failed => deps.counters.failed.fetch_add(1, Ordering::Relaxed),
            _ => deps.counters.timed_out.fetch_add(1, Ordering::Relaxed),
        };

        let finished = deps
            .registry
            .update(id, |r| {
                if let Err(e) = r.transition_to(state, Some(output.clone())) {
                    tracing::warn!(error = %e, "Terminal transition rejected");
                }
                r.clone()
            })
            .await;
        let Some(finished) = finished else {
            return;
        };

        let suppressed = finished.state == RunState::Completed
            && finished.output.as_deref().map(str::trim) == Some(deps.skip_sentinel.as_str());
        if suppressed {
            tracing::debug!("Result matched skip sentinel, announcement suppressed");
        } else {
            deps.announcer.announce(&finished).await;
        }

        match finished.cleanup {
            CleanupPolicy::Delete => {
                deps.registry.remove(id).await;
            }
            CleanupPolicy::Archive => {
                deps.registry.archive(id).await;
            }
        }

        tracing::info!(state = %finished.state, "Run finished");
    }
    .instrument(span)
    .await
}

/// The sub-task gets a minimal, task-scoped preamble and its own
/// instructions — no ambient conversation context.
fn task_messages(run: &Run, skip_sentinel: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are a background sub-task worker. Complete the task below \
             using only the instructions given; you have no access to any \
             surrounding conversation. Reply with your findings, or reply \
             with exactly {skip_sentinel} if there is nothing worth reporting."
        )),
        ChatMessage::user(run.instructions.clone()),
    ]
}
