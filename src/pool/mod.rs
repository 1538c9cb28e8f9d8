//! Task pool: run model, scheduler, and stats.

pub mod run;
pub mod scheduler;

pub use run::{CleanupPolicy, Run, RunSpec, RunState};
pub use scheduler::{PoolStats, PoolStatus, SpawnReceipt, TaskPool};
