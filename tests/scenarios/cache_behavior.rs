//! Test: dependency cache restore and save

use crate::helpers::*;
use async_trait::async_trait;
use runway::cache::{CacheError, CacheHit};
use runway::core::{ExecutionStatus, JobStatus, StepOutcome};
use runway::execution::{ExecutionEvent, SchedulingStrategy};
use runway::{CacheStore, FsCacheStore, NoopCacheStore};
use std::path::Path;
use std::sync::Arc;

/// A cache backend that is always down
struct UnavailableCache;

#[async_trait]
impl CacheStore for UnavailableCache {
    async fn restore(
        &self,
        _scope: &str,
        _key: &str,
        _restore_keys: &[String],
        _dest: &Path,
    ) -> Result<Option<CacheHit>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn save(&self, _scope: &str, _key: &str, _src: &Path) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

const LOCK: &str = "[[package]]\nname = \"pytest\"\nversion = \"7.4.0\"\n";

const SINGLE_JOB: &str = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v3
      - id: cache
        uses: actions/cache@v3
        with:
          path: .venv
          key: venv-${{ hashFiles('poetry.lock') }}
          restore-keys: |
            venv-
      - name: Install dependencies
        if: steps.cache.outputs.cache-hit != 'true'
        run: poetry install
      - name: Run tests
        run: poetry run pytest
"#;

#[tokio::test]
async fn test_cache_key_is_deterministic() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    plox_project(first_dir.path(), LOCK);
    plox_project(second_dir.path(), LOCK);

    let first = run_scenario(
        PLOX_WORKFLOW,
        MockRunner::new(),
        first_dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Parallel,
    )
    .await;
    let second = run_scenario(
        PLOX_WORKFLOW,
        MockRunner::new(),
        second_dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Parallel,
    )
    .await;

    let first_keys = first.cache_keys();
    assert_eq!(first_keys.len(), 2);
    assert_eq!(first_keys[0], first_keys[1]);
    assert!(first_keys[0].starts_with("venv-"));
    assert_eq!(first_keys, second.cache_keys());
}

#[tokio::test]
async fn test_cache_key_follows_lock_file() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    plox_project(first_dir.path(), LOCK);
    plox_project(second_dir.path(), "[[package]]\nname = \"pytest\"\nversion = \"8.0.0\"\n");

    let first = run_scenario(
        SINGLE_JOB,
        MockRunner::new(),
        first_dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Sequential,
    )
    .await;
    let second = run_scenario(
        SINGLE_JOB,
        MockRunner::new(),
        second_dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_ne!(first.cache_keys(), second.cache_keys());
}

#[tokio::test]
async fn test_cache_hit_skips_install() {
    let project = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    plox_project(project.path(), LOCK);
    let cache: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(cache_root.path()));

    let cold_runner = MockRunner::new();
    let cold = run_scenario(
        PLOX_WORKFLOW,
        cold_runner.clone(),
        project.path(),
        cache.clone(),
        SchedulingStrategy::Sequential,
    )
    .await;
    assert_eq!(cold.result.status, ExecutionStatus::Completed);
    assert!(cold_runner.ran("poetry install"));
    assert!(cold
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheSaved { .. })));

    let warm_runner = MockRunner::new();
    let warm = run_scenario(
        PLOX_WORKFLOW,
        warm_runner.clone(),
        project.path(),
        cache,
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_eq!(warm.result.status, ExecutionStatus::Completed);
    assert_step(&warm, "lint", "Install dependencies", StepOutcome::Skipped);
    assert_step(&warm, "test", "Install dependencies", StepOutcome::Skipped);
    assert!(!warm_runner.ran("poetry install"));
    assert!(warm_runner.ran("poetry run pytest"));

    let cache_step = warm.result.job("test").unwrap().step("Load cached venv").unwrap();
    assert_eq!(cache_step.outputs["cache-hit"], "true");
}

#[tokio::test]
async fn test_unavailable_cache_matches_cold_cache() {
    for failing in [vec![], vec!["black"], vec!["pytest", "mypy"]] {
        let cold_dir = tempfile::tempdir().unwrap();
        let cold_cache = tempfile::tempdir().unwrap();
        plox_project(cold_dir.path(), LOCK);
        let cold = run_scenario(
            PLOX_WORKFLOW,
            MockRunner::failing(&failing),
            cold_dir.path(),
            Arc::new(FsCacheStore::new(cold_cache.path())),
            SchedulingStrategy::Parallel,
        )
        .await;

        let down_dir = tempfile::tempdir().unwrap();
        plox_project(down_dir.path(), LOCK);
        let down = run_scenario(
            PLOX_WORKFLOW,
            MockRunner::failing(&failing),
            down_dir.path(),
            Arc::new(UnavailableCache),
            SchedulingStrategy::Parallel,
        )
        .await;

        // Which job saves first is up to the scheduler, so installs may
        // differ; statuses and the check steps may not
        assert_eq!(cold.result.status, down.result.status, "failing {:?}", failing);
        for job in ["lint", "test"] {
            assert_eq!(cold.job_status(job), down.job_status(job));
            assert_eq!(checks(&cold, job), checks(&down, job));
            assert_step(&down, job, "Install dependencies", StepOutcome::Success);
        }
        assert!(down
            .events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::CacheUnavailable { .. })));
    }
}

fn checks(result: &ScenarioResult, job: &str) -> Vec<(String, StepOutcome)> {
    result
        .outcomes(job)
        .into_iter()
        .filter(|(name, _)| name != "Install dependencies")
        .collect()
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
    let project = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    plox_project(project.path(), LOCK);
    let cache: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(cache_root.path()));

    run_scenario(
        SINGLE_JOB,
        MockRunner::new(),
        project.path(),
        cache.clone(),
        SchedulingStrategy::Sequential,
    )
    .await;

    // Damage every manifest in the store
    for entry in std::fs::read_dir(cache_root.path()).unwrap() {
        let manifest = entry.unwrap().path().join("manifest.json");
        if manifest.exists() {
            std::fs::write(&manifest, "not json").unwrap();
        }
    }

    let runner = MockRunner::new();
    let result = run_scenario(
        SINGLE_JOB,
        runner.clone(),
        project.path(),
        cache.clone(),
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_eq!(result.job_status("test"), JobStatus::Success);
    assert_step(&result, "test", "Install dependencies", StepOutcome::Success);
    assert!(runner.ran("poetry install"));

    // The miss stored a fresh entry in place of the damaged one
    let runner = MockRunner::new();
    let repaired = run_scenario(
        SINGLE_JOB,
        runner.clone(),
        project.path(),
        cache,
        SchedulingStrategy::Sequential,
    )
    .await;
    assert_step(&repaired, "test", "Install dependencies", StepOutcome::Skipped);
    assert!(!runner.ran("poetry install"));
    let cache_step = repaired.result.job("test").unwrap().step("cache").unwrap();
    assert_eq!(cache_step.outputs["cache-hit"], "true");
}

#[tokio::test]
async fn test_restore_keys_give_partial_restore() {
    let project = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    plox_project(project.path(), LOCK);
    let cache: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(cache_root.path()));

    let first = run_scenario(
        SINGLE_JOB,
        MockRunner::new(),
        project.path(),
        cache.clone(),
        SchedulingStrategy::Sequential,
    )
    .await;
    let old_key = first.cache_keys().remove(0);

    // New dependency set, old venv still useful
    std::fs::write(project.path().join("poetry.lock"), "[[package]]\nname = \"mypy\"\n").unwrap();

    let runner = MockRunner::new();
    let second = run_scenario(
        SINGLE_JOB,
        runner.clone(),
        project.path(),
        cache,
        SchedulingStrategy::Sequential,
    )
    .await;

    let restored = second.events.iter().find_map(|e| match e {
        ExecutionEvent::CacheRestored {
            matched_key, exact, ..
        } => Some((matched_key.clone(), *exact)),
        _ => None,
    });
    assert_eq!(restored, Some((old_key, false)));

    // A partial restore still installs and saves under the new key
    assert!(runner.ran("poetry install"));
    assert!(second
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheSaved { .. })));

    let cache_step = second.result.job("test").unwrap().step("cache").unwrap();
    assert_eq!(cache_step.outputs["cache-hit"], "false");
}

#[tokio::test]
async fn test_failed_job_does_not_save_cache() {
    let project = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    plox_project(project.path(), LOCK);
    let cache: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(cache_root.path()));

    let result = run_scenario(
        SINGLE_JOB,
        MockRunner::failing(&["pytest"]),
        project.path(),
        cache,
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_eq!(result.job_status("test"), JobStatus::Failure);
    assert!(!result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheSaved { .. })));
}

#[tokio::test]
async fn test_unrenderable_key_runs_uncached() {
    let project = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    plox_project(project.path(), LOCK);
    let yaml = SINGLE_JOB.replace("hashFiles('poetry.lock')", "hashFiles('[')");

    let runner = MockRunner::new();
    let result = run_scenario(
        &yaml,
        runner.clone(),
        project.path(),
        Arc::new(FsCacheStore::new(cache_root.path())),
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_eq!(result.job_status("test"), JobStatus::Success);
    let cache_step = result.result.job("test").unwrap().step("cache").unwrap();
    assert_eq!(cache_step.outcome, StepOutcome::Success);
    assert_eq!(cache_step.outputs["cache-hit"], "false");
    assert_step(&result, "test", "Install dependencies", StepOutcome::Success);
    assert!(runner.ran("poetry install"));

    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheUnavailable { .. })));
    assert!(!result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheSaved { .. })));
}
