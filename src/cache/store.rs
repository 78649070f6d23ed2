//! Key-value persistence for per-root caches.
//!
//! Stores know nothing about diffing; they read and write whole [`RootCache`]
//! values under a root key produced by [`root_cache_key`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::cache::model::RootCache;
use crate::core::errors::{RdxError, Result};
use crate::core::paths::{path_key, resolve_absolute_path};

const CACHE_EXTENSION: &str = "json";

/// Longest readable prefix kept in a key before the digest suffix.
const MAX_KEY_PREFIX: usize = 96;

/// Hex digits of the path digest appended to every key.
const KEY_DIGEST_LEN: usize = 12;

/// Read/write access to persisted root caches.
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored for `key`.
    fn read(&self, key: &str) -> Result<Option<RootCache>>;

    /// Replace whatever is stored under `key`.
    fn write(&self, key: &str, cache: &RootCache) -> Result<()>;

    /// Returns whether an entry existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Keys of every stored root, sorted.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Filesystem-safe, collision-free cache key for a scan root.
///
/// The readable part replaces separators, drive colons, and anything else
/// outside `[a-z0-9._-]` with `_`; the SHA-256 suffix over the case-folded
/// absolute path keeps distinct roots apart even when their readable parts
/// coincide.
#[must_use]
pub fn root_cache_key(root: &Path) -> String {
    let normalized = path_key(&resolve_absolute_path(root));

    let mut readable: String = normalized
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    readable = readable.trim_matches('_').to_string();
    if readable.len() > MAX_KEY_PREFIX {
        readable = readable[readable.len() - MAX_KEY_PREFIX..].to_string();
    }
    if readable.is_empty() {
        readable.push_str("root");
    }

    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(KEY_DIGEST_LEN)
        .collect();

    format!("{readable}-{hex}")
}

/// One pretty-printed JSON file per root under a cache directory.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Store rooted at `dir`; the directory is created on first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{CACHE_EXTENSION}"))
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self, key: &str) -> Result<Option<RootCache>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RdxError::io(&path, err)),
        };

        let cache: RootCache = serde_json::from_str(&raw)?;
        if cache.normalized_root != key {
            return Err(RdxError::CacheCorrupt {
                key: key.to_string(),
                details: format!(
                    "file {} holds cache for {}",
                    path.display(),
                    cache.normalized_root
                ),
            });
        }
        Ok(Some(cache))
    }

    /// Write to a sibling temp file, then rename over the target.
    fn write(&self, key: &str, cache: &RootCache) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| RdxError::io(&self.dir, err))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension(format!("{CACHE_EXTENSION}.tmp"));
        let data = serde_json::to_vec_pretty(cache)?;

        fs::write(&tmp_path, data).map_err(|err| RdxError::io(&tmp_path, err))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(RdxError::io(&path, err));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(RdxError::io(&path, err)),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RdxError::io(&self.dir, err)),
        };

        let mut keys: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == CACHE_EXTENSION))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-process store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, RootCache>>,
}

impl MemoryCacheStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, key: &str) -> Result<Option<RootCache>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, cache: &RootCache) -> Result<()> {
        self.entries.lock().insert(key.to_string(), cache.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    fn read(&self, key: &str) -> Result<Option<RootCache>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, cache: &RootCache) -> Result<()> {
        (**self).write(key, cache)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::model::CachedRepository;
    use crate::scanner::signature::Signature;
    use chrono::{DateTime, Utc};

    fn sample_cache(key: &str) -> RootCache {
        let mut cache = RootCache::empty(key.to_string(), Path::new("/data/src"));
        cache.cached_at_utc = DateTime::<Utc>::default() + chrono::Duration::seconds(1_000);
        cache.repos.push(CachedRepository {
            name: "orders".to_string(),
            path: PathBuf::from("/data/src/services/orders"),
            has_git: true,
            has_solution_marker: true,
            solution_marker_path: Some(PathBuf::from("/data/src/services/orders/Orders.sln")),
            group_key: "services".to_string(),
            signature: Signature(42),
            last_seen_utc: DateTime::<Utc>::default(),
        });
        cache
    }

    #[test]
    fn key_is_stable_and_filesystem_safe() {
        let a = root_cache_key(Path::new("/data/src/"));
        let b = root_cache_key(Path::new("/data/src"));
        assert_eq!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        );
        assert!(a.starts_with("data_src-"));
    }

    #[test]
    fn keys_do_not_collide_when_readable_parts_match() {
        let a = root_cache_key(Path::new("/data/my_src"));
        let b = root_cache_key(Path::new("/data/my/src"));
        assert_ne!(a, b);
    }

    #[test]
    fn key_ignores_case() {
        assert_eq!(
            root_cache_key(Path::new("/Data/Src")),
            root_cache_key(Path::new("/data/src"))
        );
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().join("cache"));
        assert!(store.read("nothing-here").expect("read").is_none());
        assert!(store.keys().expect("keys").is_empty());
    }

    #[test]
    fn write_then_read_returns_same_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().join("nested").join("cache"));
        let cache = sample_cache("data_src-abc");

        store.write("data_src-abc", &cache).expect("write");
        assert!(store.path_for("data_src-abc").exists());
        assert!(
            !store
                .path_for("data_src-abc")
                .with_extension("json.tmp")
                .exists()
        );

        let loaded = store.read("data_src-abc").expect("read").expect("present");
        assert_eq!(loaded, cache);
        assert_eq!(store.keys().expect("keys"), vec!["data_src-abc".to_string()]);
    }

    #[test]
    fn overwrite_replaces_previous_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().to_path_buf());
        let mut cache = sample_cache("k");
        store.write("k", &cache).expect("first write");
        cache.repos.clear();
        store.write("k", &cache).expect("second write");
        assert!(store.read("k").expect("read").expect("present").repos.is_empty());
    }

    #[test]
    fn corrupt_json_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().to_path_buf());
        fs::write(store.path_for("broken"), "{not-json").expect("write corrupt");
        let err = store.read("broken").expect_err("corrupt cache should fail");
        assert_eq!(err.code(), "RDX-2001");
    }

    #[test]
    fn mismatched_key_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().to_path_buf());
        store.write("other", &sample_cache("original")).expect("write");
        let err = store.read("other").expect_err("key mismatch should fail");
        assert!(matches!(err, RdxError::CacheCorrupt { .. }));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().to_path_buf());
        store.write("k", &sample_cache("k")).expect("write");
        assert!(store.remove("k").expect("remove"));
        assert!(!store.remove("k").expect("second remove"));
        assert!(store.read("k").expect("read").is_none());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryCacheStore::new();
        store.write("b", &sample_cache("b")).unwrap();
        store.write("a", &sample_cache("a")).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
        assert_eq!(store.read("a").unwrap().unwrap().normalized_root, "a");
        assert!(store.remove("a").unwrap());
        assert!(store.read("a").unwrap().is_none());
    }
}
