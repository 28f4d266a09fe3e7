//! Cache key helpers

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Digest of every file matching `patterns` under `workspace`
///
/// Matching files are hashed individually in path order and the digests are
/// hashed again, so the result depends only on file contents and their
/// relative order. Returns an empty string when nothing matches.
pub fn hash_files(workspace: &Path, patterns: &[String]) -> io::Result<String> {
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();

    for pattern in patterns.iter().flat_map(|p| p.lines()) {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }

        // Only the pattern may carry glob syntax, not the workspace path
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            let root = glob::Pattern::escape(&workspace.to_string_lossy());
            format!("{}/{}", root.trim_end_matches('/'), pattern)
        };
        let entries = glob::glob(&full)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", pattern, e)))?;

        for entry in entries {
            let path = entry.map_err(|e| e.into_error())?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    if files.is_empty() {
        return Ok(String::new());
    }

    let mut outer = Sha256::new();
    for path in &files {
        let contents = std::fs::read(path)?;
        outer.update(Sha256::digest(&contents));
    }

    Ok(hex::encode(outer.finalize()))
}

/// Stable directory name for a cache entry
pub fn entry_id(scope: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
