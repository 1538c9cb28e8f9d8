//! In-memory run registry.
//!
//! Tracks every spawned run's identity, lifecycle state, and result. The
//! pool mutates a run through the registry until it reaches a terminal
//! state; archived records are read-mostly afterwards, capped to the most
//! recent N to bound memory.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::pool::{Run, RunState};

/// Registry of in-flight and recently finished runs.
pub struct RunRegistry {
    /// Queued and running runs, plus terminal runs not yet archived.
    active: RwLock<HashMap<Uuid, Run>>,
    /// Finished runs, most recent first.
    completed: RwLock<VecDeque<Run>>,
    retain: usize,
}

impl RunRegistry {
    pub fn new(retain: usize) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
            retain,
        }
    }

    pub(crate) async fn insert(&self, run: Run) {
        self.active.write().await.insert(run.id, run);
    }

    /// Look up a run by id, in-flight or archived.
    pub async fn get(&self, id: Uuid) -> Option<Run> {
        if let Some(run) = self.active.read().await.get(&id) {
            return Some(run.clone());
        }
        self.completed
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Snapshot of (in-flight, finished) runs. In-flight runs are ordered
    /// by enqueue time, finished runs most recent first.
    pub async fn list(&self) -> (Vec<Run>, Vec<Run>) {
        let mut active: Vec<Run> = self.active.read().await.values().cloned().collect();
        active.sort_by_key(|r| r.queued_at);
        let completed: Vec<Run> = self.completed.read().await.iter().cloned().collect();
        (active, completed)
    }

    /// Cancel a run that is still queued. Returns false for running,
    /// finished, or unknown runs — cancellation is not preemptive.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let removed = {
            let mut active = self.active.write().await;
            match active.get(&id) {
                Some(run) if run.state == RunState::Queued => active.remove(&id),
                _ => None,
            }
        };

        let Some(mut run) = removed else {
            return false;
        };
        if run.transition_to(RunState::Cancelled, None).is_err() {
            return false;
        }
        tracing::info!(run_id = %run.short_id(), label = %run.label, "Run cancelled while queued");
        self.push_completed(run).await;
        true
    }

    /// Apply a mutation to an in-flight run, returning the closure's
    /// result, or None if the run is no longer tracked as active.
    pub(crate) async fn update<F, R>(&self, id: Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut Run) -> R,
    {
        self.active.write().await.get_mut(&id).map(f)
    }

    /// Move a terminal run from the active map to the archive ring.
    pub(crate) async fn archive(&self, id: Uuid) {
        let removed = self.active.write().await.remove(&id);
        if let Some(run) = removed {
            self.push_completed(run).await;
        }
    }

    /// Drop a run record entirely (the `delete` cleanup policy).
    pub(crate) async fn remove(&self, id: Uuid) -> Option<Run> {
        self.active.write().await.remove(&id)
    }

    /// Number of runs currently waiting for a slot.
    pub async fn queued_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|r| r.state == RunState::Queued)
            .count()
    }

    /// Number of runs currently executing.
    pub async fn running_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|r| r.state == RunState::Running)
            .count()
    }

    async fn push_completed(&self, run: Run) {
        let mut completed = self.completed.write().await;
        completed.push_front(run);
        completed.truncate(self.retain);
    }
}
