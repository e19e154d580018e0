//! Side-cache records: the fragment hashes a cache key was built from.
//!
//! A record lets a later process decide whether a stored artifact is still
//! valid without walking the call graph again: it re-reads every recorded
//! fragment and compares digests. Records are JSON, one file per key at
//! `<dir>/side/<key>.json`. Anything unreadable is treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use kcache_fingerprint::{CacheKey, FragmentHash};
use kcache_source::{fragment_digest, SourceDb};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::artifact::write_atomic;
use crate::error::CacheError;

/// Bump on any change to [`CacheRecord`].
pub const RECORD_FORMAT_VERSION: u32 = 1;

const SIDE_SUBDIR: &str = "side";

/// What the cache remembers about one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Record format version.
    pub format_version: u32,
    /// The key this record describes.
    pub key: CacheKey,
    /// Qualified name of the root callable.
    pub callable: String,
    /// Every fragment the source fingerprint covered.
    pub fragments: Vec<FragmentHash>,
    /// Key of the stored artifact.
    pub artifact: CacheKey,
}

impl CacheRecord {
    /// Creates a record whose artifact is stored under `key`.
    pub fn new(key: CacheKey, callable: impl Into<String>, fragments: Vec<FragmentHash>) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            key,
            callable: callable.into(),
            fragments,
            artifact: key,
        }
    }
}

enum Backing {
    Disk(PathBuf),
    Memory(RwLock<HashMap<CacheKey, CacheRecord>>),
}

/// Store of [`CacheRecord`]s.
pub struct SideCache {
    backing: Backing,
}

impl SideCache {
    /// Records persisted under `cache_dir`.
    pub fn on_disk(cache_dir: &Path) -> Self {
        Self {
            backing: Backing::Disk(cache_dir.join(SIDE_SUBDIR)),
        }
    }

    /// Records held for the life of the process.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Returns `true` for a disk-backed cache.
    pub fn is_persistent(&self) -> bool {
        matches!(self.backing, Backing::Disk(_))
    }

    /// Path of the record file for `key`, if disk-backed.
    pub fn record_path(&self, key: &CacheKey) -> Option<PathBuf> {
        match &self.backing {
            Backing::Disk(dir) => Some(dir.join(format!("{key}.json"))),
            Backing::Memory(_) => None,
        }
    }

    /// Loads the record for `key`.
    ///
    /// A successful load refreshes the file's modification time so external
    /// eviction can go by last use.
    pub fn load(&self, key: &CacheKey) -> Option<CacheRecord> {
        match &self.backing {
            Backing::Memory(map) => map
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned(),
            Backing::Disk(_) => {
                let path = self.record_path(key)?;
                let text = std::fs::read_to_string(&path).ok()?;
                let record: CacheRecord = match serde_json::from_str(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("ignoring unparsable record {}: {e}", path.display());
                        return None;
                    }
                };
                if record.format_version != RECORD_FORMAT_VERSION || record.key != *key {
                    debug!("ignoring incompatible record {}", path.display());
                    return None;
                }
                touch(&path);
                Some(record)
            }
        }
    }

    /// Stores `record`, replacing any record for the same key.
    pub fn store(&self, record: &CacheRecord) -> Result<(), CacheError> {
        match &self.backing {
            Backing::Memory(map) => {
                map.write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(record.key, record.clone());
                Ok(())
            }
            Backing::Disk(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| CacheError::Io {
                    path: dir.clone(),
                    source: e,
                })?;
                let json =
                    serde_json::to_string_pretty(record).map_err(|e| CacheError::Serialization {
                        reason: e.to_string(),
                    })?;
                write_atomic(&dir.join(format!("{}.json", record.key)), json.as_bytes())
            }
        }
    }

    /// Returns `true` if every fragment in `record` still digests to its
    /// recorded hash. A fragment that cannot be read fails validation.
    pub fn validate(record: &CacheRecord) -> bool {
        let mut db = SourceDb::new();
        for fragment in &record.fragments {
            let text = match db.fragment(&fragment.location) {
                Ok(text) => text,
                Err(e) => {
                    debug!("record {} fails validation: {e}", record.key);
                    return false;
                }
            };
            if fragment_digest(text) != fragment.hash {
                debug!(
                    "record {} fails validation: {} changed",
                    record.key, fragment.location
                );
                return false;
            }
        }
        true
    }

    /// Loads and validates the record for `key`.
    pub fn validate_key(&self, key: &CacheKey) -> bool {
        self.load(key).is_some_and(|r| Self::validate(&r))
    }
}

fn touch(path: &Path) {
    let result = std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        warn!("cannot refresh {}: {e}", path.display());
    }
}
