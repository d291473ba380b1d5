use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CACHE_DIR: &str = ".declsync/cache";

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
}

/// Remembers files already at the fixpoint for a given handle configuration.
pub struct IncrementalCache {
    cache_dir: PathBuf,
    fingerprint: String,
}

impl IncrementalCache {
    /// Cache under `<base>/.declsync/cache`, keyed by the configuration fingerprint.
    pub fn new(base: &Path, fingerprint: impl Into<String>) -> Self {
        let cache_dir = base.join(CACHE_DIR);
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).ok();
        }
        Self {
            cache_dir,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn compute_hash(fingerprint: &str, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get_cache_path(&self, file_path: &Path) -> PathBuf {
        let safe_name = file_path
            .to_string_lossy()
            .replace(['/', '\\', ':'], "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    /// Whether `source` was recorded as converged for `file_path`.
    pub fn is_converged(&self, file_path: &Path, source: &str) -> bool {
        let cache_path = self.get_cache_path(file_path);
        let Ok(data) = fs::read_to_string(&cache_path) else {
            return false;
        };

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = %file_path.display(), error = %e, "corrupt cache entry dropped");
                fs::remove_file(cache_path).ok();
                return false;
            }
        };

        entry.hash == Self::compute_hash(&self.fingerprint, source)
    }

    pub fn record(&self, file_path: &Path, source: &str) {
        let entry = CacheEntry {
            hash: Self::compute_hash(&self.fingerprint, source),
        };
        if let Ok(data) = serde_json::to_string(&entry) {
            fs::write(self.get_cache_path(file_path), data).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IncrementalCache::new(dir.path(), "cfg-a");
        let file = Path::new("app/page.tsx");

        assert!(!cache.is_converged(file, "x"));
        cache.record(file, "x");
        assert!(cache.is_converged(file, "x"));
        assert!(!cache.is_converged(file, "y"));

        let other = IncrementalCache::new(dir.path(), "cfg-b");
        assert!(!other.is_converged(file, "x"));
    }

    #[test]
    fn test_corrupt_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IncrementalCache::new(dir.path(), "cfg");
        let file = Path::new("lib/a.ts");
        let path = cache.get_cache_path(file);
        fs::write(&path, "not json").unwrap();
        assert!(!cache.is_converged(file, "x"));
        assert!(!path.exists());
    }
}
