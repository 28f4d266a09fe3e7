//! Scenario-based tests for runway

mod helpers;

mod cache_behavior;
mod cancellation;
mod concurrency;
mod failure_policy;
mod loading;
mod success_path;
