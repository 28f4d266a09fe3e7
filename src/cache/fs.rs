//! Filesystem-backed cache store

use crate::cache::{
    key::{entry_id, sha256_hex},
    CacheError, CacheHit, CacheStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const MANIFEST: &str = "manifest.json";
const DATA: &str = "data";

/// Cache entries stored as directories under a root
///
/// Each entry lives in `<root>/<sha256(scope, key)>/` with a `data/`
/// snapshot of the cached path and a manifest of per-file digests.
/// Entries are written to a temporary directory and renamed into place.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    scope: String,
    key: String,
    created_at: DateTime<Utc>,
    kind: EntryKind,
    files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestFile {
    /// Path relative to the cached root, `/`-separated; empty for a single file
    path: String,
    sha256: String,
    size: u64,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create store under the user's cache directory
    pub fn with_default_path() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("runway").join("cache"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, scope: &str, key: &str) -> PathBuf {
        self.root.join(entry_id(scope, key))
    }

    fn read_manifest(dir: &Path, key: &str) -> Result<Manifest, CacheError> {
        let raw = std::fs::read_to_string(dir.join(MANIFEST)).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: format!("unreadable manifest: {}", e),
        })?;
        serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: format!("invalid manifest: {}", e),
        })
    }

    /// Newest entry in `scope` whose key starts with `prefix`
    fn find_by_prefix(&self, scope: &str, prefix: &str) -> Result<Option<(PathBuf, Manifest)>, CacheError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(PathBuf, Manifest)> = None;
        for entry in entries {
            let dir = entry?.path();
            if !dir.is_dir() || is_temp(&dir) {
                continue;
            }
            let manifest = match Self::read_manifest(&dir, prefix) {
                Ok(m) => m,
                Err(e) => {
                    debug!("Ignoring cache entry {}: {}", dir.display(), e);
                    continue;
                }
            };
            if manifest.scope != scope || !manifest.key.starts_with(prefix) {
                continue;
            }
            let newer = best
                .as_ref()
                .map_or(true, |(_, current)| manifest.created_at > current.created_at);
            if newer {
                best = Some((dir, manifest));
            }
        }

        Ok(best)
    }

    fn restore_blocking(
        &self,
        scope: &str,
        key: &str,
        restore_keys: &[String],
        dest: &Path,
    ) -> Result<Option<CacheHit>, CacheError> {
        let exact_dir = self.entry_dir(scope, key);
        let found = if exact_dir.is_dir() {
            let manifest = Self::read_manifest(&exact_dir, key)
                .and_then(|manifest| {
                    if manifest.scope != scope || manifest.key != key {
                        return Err(CacheError::Corrupt {
                            key: key.to_string(),
                            reason: "manifest does not match entry".to_string(),
                        });
                    }
                    Ok(manifest)
                })
                .inspect_err(|_| evict(&exact_dir))?;
            Some((exact_dir, manifest, true))
        } else {
            let mut found = None;
            for prefix in restore_keys {
                if let Some((dir, manifest)) = self.find_by_prefix(scope, prefix)? {
                    found = Some((dir, manifest, false));
                    break;
                }
            }
            found
        };

        let Some((dir, manifest, exact)) = found else {
            return Ok(None);
        };

        verify(&dir, &manifest).inspect_err(|_| evict(&dir))?;
        let files = copy_out(&dir.join(DATA), &manifest, dest)?;

        Ok(Some(CacheHit {
            matched_key: manifest.key,
            exact,
            files,
        }))
    }

    fn save_blocking(&self, scope: &str, key: &str, src: &Path) -> Result<bool, CacheError> {
        if !src.exists() {
            warn!("Cache path {} does not exist, nothing to save", src.display());
            return Ok(false);
        }

        let target = self.entry_dir(scope, key);
        if target.exists() {
            debug!("Cache entry for key {} already exists", key);
            return Ok(false);
        }

        std::fs::create_dir_all(&self.root)
            .map_err(|e| CacheError::Unavailable(format!("{}: {}", self.root.display(), e)))?;

        let staging = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = write_entry(&staging, scope, key, src).and_then(|()| {
            match std::fs::rename(&staging, &target) {
                Ok(()) => Ok(true),
                // Another job stored the same key first
                Err(_) if target.exists() => Ok(false),
                Err(e) => Err(e.into()),
            }
        });

        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result
    }
}

/// Drop a corrupt entry so the next save can replace it
fn evict(dir: &Path) {
    warn!("Removing corrupt cache entry {}", dir.display());
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!("Failed to remove cache entry {}: {}", dir.display(), e);
    }
}

fn is_temp(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(".tmp-"))
}

fn write_entry(staging: &Path, scope: &str, key: &str, src: &Path) -> Result<(), CacheError> {
    let data = staging.join(DATA);
    std::fs::create_dir_all(&data)?;

    let mut files = Vec::new();
    let kind = if src.is_dir() {
        copy_tree(src, &data, "", &mut files)?;
        EntryKind::Dir
    } else {
        let contents = std::fs::read(src)?;
        std::fs::write(data.join("file"), &contents)?;
        files.push(ManifestFile {
            path: String::new(),
            sha256: sha256_hex(&contents),
            size: contents.len() as u64,
        });
        EntryKind::File
    };

    let manifest = Manifest {
        scope: scope.to_string(),
        key: key.to_string(),
        created_at: Utc::now(),
        kind,
        files,
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| CacheError::Unavailable(format!("failed to encode manifest: {}", e)))?;
    std::fs::write(staging.join(MANIFEST), json)?;
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path, prefix: &str, files: &mut Vec<ManifestFile>) -> Result<(), CacheError> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let rel = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            std::fs::create_dir_all(dest.join(&name))?;
            copy_tree(&path, &dest.join(&name), &rel, files)?;
        } else if file_type.is_file() {
            let contents = std::fs::read(&path)?;
            std::fs::write(dest.join(&name), &contents)?;
            files.push(ManifestFile {
                path: rel,
                sha256: sha256_hex(&contents),
                size: contents.len() as u64,
            });
        }
        // Symlinks and special files are not cached
    }
    Ok(())
}

fn stored_path(data: &Path, manifest: &Manifest, file: &ManifestFile) -> PathBuf {
    match manifest.kind {
        EntryKind::File => data.join("file"),
        EntryKind::Dir => file.path.split('/').fold(data.to_path_buf(), |p, seg| p.join(seg)),
    }
}

fn verify(dir: &Path, manifest: &Manifest) -> Result<(), CacheError> {
    let data = dir.join(DATA);
    for file in &manifest.files {
        let stored = stored_path(&data, manifest, file);
        let contents = std::fs::read(&stored).map_err(|e| CacheError::Corrupt {
            key: manifest.key.clone(),
            reason: format!("missing {}: {}", file.path, e),
        })?;
        if sha256_hex(&contents) != file.sha256 {
            return Err(CacheError::Corrupt {
                key: manifest.key.clone(),
                reason: format!("digest mismatch for '{}'", file.path),
            });
        }
    }
    Ok(())
}

fn copy_out(data: &Path, manifest: &Manifest, dest: &Path) -> Result<usize, CacheError> {
    for file in &manifest.files {
        let stored = stored_path(data, manifest, file);
        let target = match manifest.kind {
            EntryKind::File => dest.to_path_buf(),
            EntryKind::Dir => file.path.split('/').fold(dest.to_path_buf(), |p, seg| p.join(seg)),
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&stored, &target)?;
    }
    if manifest.kind == EntryKind::Dir {
        std::fs::create_dir_all(dest)?;
    }
    Ok(manifest.files.len())
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn restore(
        &self,
        scope: &str,
        key: &str,
        restore_keys: &[String],
        dest: &Path,
    ) -> Result<Option<CacheHit>, CacheError> {
        let store = self.clone();
        let (scope, key, dest) = (scope.to_string(), key.to_string(), dest.to_path_buf());
        let restore_keys = restore_keys.to_vec();
        tokio::task::spawn_blocking(move || store.restore_blocking(&scope, &key, &restore_keys, &dest))
            .await
            .map_err(|e| CacheError::Unavailable(format!("restore task failed: {}", e)))?
    }

    async fn save(&self, scope: &str, key: &str, src: &Path) -> Result<bool, CacheError> {
        let store = self.clone();
        let (scope, key, src) = (scope.to_string(), key.to_string(), src.to_path_buf());
        tokio::task::spawn_blocking(move || store.save_blocking(&scope, &key, &src))
            .await
            .map_err(|e| CacheError::Unavailable(format!("save task failed: {}", e)))?
    }
}
