//! Dependency cache
//!
//! Cache entries are addressed by `(scope, key)` where the scope is the
//! job's runtime target. A cache is an optimization only: every error
//! surfaces as a [`CacheError`] that callers degrade to a miss.

pub mod fs;
pub mod key;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use fs::FsCacheStore;

/// Errors from a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache entry '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// A successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// The key of the entry that was restored
    pub matched_key: String,

    /// Whether `matched_key` is the primary key (not a restore-key prefix)
    pub exact: bool,

    /// Number of files written
    pub files: usize,
}

/// Storage backend for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Restore the entry for `key` (or the newest entry matching one of
    /// `restore_keys` as a prefix) into `dest`
    async fn restore(
        &self,
        scope: &str,
        key: &str,
        restore_keys: &[String],
        dest: &Path,
    ) -> Result<Option<CacheHit>, CacheError>;

    /// Store `src` under `key`. Returns `false` when nothing was written
    /// (missing path, or an entry for the key already exists).
    async fn save(&self, scope: &str, key: &str, src: &Path) -> Result<bool, CacheError>;
}

/// A cache that never hits and never stores
#[derive(Debug, Clone, Default)]
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    async fn restore(
        &self,
        _scope: &str,
        _key: &str,
        _restore_keys: &[String],
        _dest: &Path,
    ) -> Result<Option<CacheHit>, CacheError> {
        Ok(None)
    }

    async fn save(&self, _scope: &str, _key: &str, _src: &Path) -> Result<bool, CacheError> {
        Ok(false)
    }
}
