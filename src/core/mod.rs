//! Core domain models for workflows
//!
//! This module defines the fundamental data structures that represent
//! pipelines, jobs, steps, and the expressions attached to them.

pub mod config;
pub mod context;
pub mod error;
pub mod expression;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use error::ParseError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use trigger::{Trigger, TriggerEvent};
