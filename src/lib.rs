//! runway - run GitHub-Actions-style CI workflows locally

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheError, CacheStore, FsCacheStore, NoopCacheStore};
pub use core::{ExecutionStatus, Job, JobResult, JobStatus, ParseError, Pipeline, PipelineResult, Step, TriggerEvent};
pub use execution::{ExecutionEngine, ExecutionEvent, ExecutorConfig, RunRegistry, SchedulingStrategy};
pub use runner::{
    Environment, EnvironmentProvider, LocalEnvironmentProvider, RunnerConfig, StepRunner,
    SubprocessRunner,
};
