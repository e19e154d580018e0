//! Compiled artifact storage keyed by [`CacheKey`].
//!
//! On disk, each artifact lives at `<dir>/artifacts/<key>.kca` behind a small
//! binary header carrying magic bytes, the format version, the producing crate
//! version and a payload checksum. Reads are fail-safe: anything that does not
//! validate is a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use kcache_common::ContentHash;
use kcache_fingerprint::CacheKey;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

const ARTIFACT_MAGIC: [u8; 4] = *b"KCAC";

/// Bump on any change to the header or payload layout.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

const ARTIFACT_SUBDIR: &str = "artifacts";
const ARTIFACT_EXT: &str = "kca";

/// Header prepended to every stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Must be `b"KCAC"`.
    pub magic: [u8; 4],
    /// Artifact format version.
    pub format_version: u32,
    /// Version of the crate that wrote the artifact.
    pub producer: String,
    /// Digest of the payload.
    pub checksum: ContentHash,
}

/// Storage for compiled artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Returns the artifact for `key`, or `None` on any miss.
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Stores `bytes` under `key`, replacing any previous artifact.
    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError>;

    /// Returns `true` if a readable artifact exists for `key`.
    fn exists(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }
}

/// Artifact store backed by a directory.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store under `cache_dir`. Nothing is created until the first
    /// write.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join(ARTIFACT_SUBDIR),
        }
    }

    /// Path of the artifact file for `key`.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.{ARTIFACT_EXT}"))
    }

    fn encode(bytes: &[u8]) -> Result<Vec<u8>, CacheError> {
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            producer: env!("CARGO_PKG_VERSION").to_string(),
            checksum: ContentHash::from_bytes(bytes),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte little-endian header length, header, payload
        let mut out = Vec::with_capacity(4 + header_bytes.len() + bytes.len());
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(bytes);
        Ok(out)
    }

    fn decode(raw: &[u8]) -> Option<Vec<u8>> {
        let len_bytes: [u8; 4] = raw.get(..4)?.try_into().ok()?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_end = 4usize.checked_add(header_len)?;
        let header_raw = raw.get(4..header_end)?;

        let (header, _): (ArtifactHeader, _) =
            bincode::serde::decode_from_slice(header_raw, bincode::config::standard()).ok()?;
        if header.magic != ARTIFACT_MAGIC || header.format_version != ARTIFACT_FORMAT_VERSION {
            return None;
        }

        let payload = &raw[header_end..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }
        Some(payload.to_vec())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.artifact_path(key);
        let raw = std::fs::read(&path).ok()?;
        let payload = Self::decode(&raw);
        if payload.is_none() {
            debug!("ignoring unreadable artifact {}", path.display());
        }
        payload
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CacheError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        let encoded = Self::encode(bytes)?;
        let path = self.artifact_path(key);
        write_atomic(&path, &encoded)
    }

    fn exists(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }
}

/// Artifact store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.read().map_or(0, |a| a.len())
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.artifacts.read().ok()?.get(key).cloned()
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        let mut artifacts = self
            .artifacts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        artifacts.insert(*key, bytes.to_vec());
        Ok(())
    }
}

/// Writes `bytes` to a sibling temporary file and renames it over `path`, so
/// concurrent readers see either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    // unique per write: threads of one process may store the same key at once
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp{}-{n}", std::process::id()));
    std::fs::write(&tmp, bytes).map_err(|e| CacheError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
