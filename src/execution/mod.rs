//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod registry;
pub mod scheduler;

pub use engine::{EngineBuilder, EventBus, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutorConfig, JobExecutor, RunContext, StepError};
pub use registry::{RunHandle, RunRegistry};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
