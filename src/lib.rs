//! Sub-agent task-execution core.
//!
//! A bounded-concurrency pool for spawning independent AI-completion
//! sub-tasks, backed by a failover router over ranked chat providers and
//! a one-shot completion announcer.

pub mod announce;
pub mod config;
pub mod error;
pub mod llm;
pub mod pool;
pub mod registry;
