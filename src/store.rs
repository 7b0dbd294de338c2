//! Key-addressed binary store for photo artifacts.
//!
//! The photo core only needs three operations from storage (`get`, `put`,
//! `clear`) and three named reasons a `put` can be refused. [`BinaryStore`]
//! is that seam; everything above it is store-agnostic.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a `Mutex<HashMap>` with the same size/quota rules as
//!   the file store. Used by tests and by embedders that persist elsewhere.
//!   It counts writes so idempotence can be asserted.
//! - [`FileStore`]: a directory of blobs plus a JSON manifest.
//!
//! # FileStore layout
//!
//! ```text
//! <root>/
//! ├── .store-manifest.json     # key → { sha256, size }
//! └── blobs/
//!     └── 3f5a…e1.bin           # content-addressed, shared by equal payloads
//! ```
//!
//! Blobs are **content-addressed** by SHA-256: two keys holding the same bytes
//! (e.g. `{id}` and `{id}_orig` right after the original is preserved) share
//! one file. A blob is deleted only when no key references it anymore.
//!
//! The manifest is versioned. A missing, corrupt, or version-mismatched
//! manifest loads as empty: the blobs become unreachable but nothing is
//! misread.
//!
//! # Refusals
//!
//! `put` rejects, in this order:
//! 1. payloads larger than the per-item limit → [`StoreError::TooLarge`]
//! 2. payloads that are not a recognizable raster → [`StoreError::UnsupportedFormat`]
//! 3. payloads that would push the total past the quota → [`StoreError::QuotaExceeded`]
//!
//! A refused `put` leaves the store untouched.

use crate::config::StoreConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the manifest file within the store directory.
const MANIFEST_FILENAME: &str = ".store-manifest.json";

/// Directory holding the content-addressed blobs.
const BLOB_DIR: &str = "blobs";

/// Bump to invalidate existing manifests when the format changes.
const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("payload of {size} bytes exceeds the {limit}-byte item limit")]
    TooLarge { size: usize, limit: usize },
    #[error("payload is not a supported image format")]
    UnsupportedFormat,
    #[error("storing {needed} bytes would exceed the quota ({available} bytes available)")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl StoreError {
    /// Short user-facing reason for a refused write.
    pub fn user_reason(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "The photo is too large to save.",
            Self::UnsupportedFormat => "This file type is not supported.",
            Self::QuotaExceeded { .. } => "Storage is full. Remove some photos and try again.",
            Self::Io(_) | Self::Manifest(_) => "The photo could not be saved.",
        }
    }
}

/// Key-addressed binary storage.
///
/// Implementations must be shareable across threads: the session holds the
/// store behind an `Arc` and performs I/O outside its state lock.
pub trait BinaryStore: Send + Sync {
    /// Fetch the bytes under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Clearing an absent key is not an error.
    fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Whether `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Size/format/quota admission check shared by both stores.
///
/// `used` is the total currently stored, `replaced` the size of the value the
/// write would overwrite (it is freed by the write).
fn admit(
    limits: &StoreConfig,
    bytes: &[u8],
    used: usize,
    replaced: usize,
) -> Result<(), StoreError> {
    if bytes.len() > limits.max_item_bytes {
        return Err(StoreError::TooLarge {
            size: bytes.len(),
            limit: limits.max_item_bytes,
        });
    }
    if image::guess_format(bytes).is_err() {
        return Err(StoreError::UnsupportedFormat);
    }
    let available = limits
        .quota_bytes
        .saturating_sub(used.saturating_sub(replaced));
    if bytes.len() > available {
        return Err(StoreError::QuotaExceeded {
            needed: bytes.len(),
            available,
        });
    }
    Ok(())
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store with the same admission rules as [`FileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    limits: StoreConfig,
    entries: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreConfig) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Keys of every successful `put`, in order.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    /// Number of successful `put`s against `key`.
    pub fn write_count(&self, key: &str) -> usize {
        lock(&self.writes).iter().filter(|k| *k == key).count()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl BinaryStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let used: usize = entries.values().map(Vec::len).sum();
        let replaced = entries.get(key).map_or(0, Vec::len);
        admit(&self.limits, bytes, used, replaced)?;
        entries.insert(key.to_string(), bytes.to_vec());
        lock(&self.writes).push(key.to_string());
        debug!(key, size = bytes.len(), "memory store put");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// A single manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobEntry {
    pub sha256: String,
    pub size: usize,
}

/// On-disk manifest mapping keys to blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreManifest {
    version: u32,
    entries: HashMap<String, BlobEntry>,
}

impl StoreManifest {
    fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
        }
    }

    /// Load from the store directory. Returns an empty manifest if the file
    /// doesn't exist or can't be parsed (version mismatch, corruption).
    fn load(root: &Path) -> Self {
        let content = match std::fs::read_to_string(root.join(MANIFEST_FILENAME)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "store manifest unreadable, starting empty");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            warn!(found = manifest.version, "store manifest version mismatch");
            return Self::empty();
        }
        manifest
    }

    fn save(&self, root: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(root.join(MANIFEST_FILENAME), json)?;
        Ok(())
    }

    fn total_size(&self) -> usize {
        // Shared blobs count once.
        let mut seen = HashMap::new();
        for entry in self.entries.values() {
            seen.insert(entry.sha256.as_str(), entry.size);
        }
        seen.values().sum()
    }

    fn references(&self, sha256: &str) -> usize {
        self.entries.values().filter(|e| e.sha256 == sha256).count()
    }
}

/// Directory-backed store. See the [module docs](self) for the layout.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    limits: StoreConfig,
    manifest: Mutex<StoreManifest>,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: &Path, limits: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join(BLOB_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
            limits,
            manifest: Mutex::new(StoreManifest::load(root)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total bytes held, counting shared blobs once.
    pub fn used_bytes(&self) -> usize {
        lock(&self.manifest).total_size()
    }

    pub fn entry(&self, key: &str) -> Option<BlobEntry> {
        lock(&self.manifest).entries.get(key).cloned()
    }

    fn blob_path(&self, sha256: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(format!("{sha256}.bin"))
    }

    /// Delete the blob if `manifest` no longer references it.
    fn collect_blob(&self, manifest: &StoreManifest, sha256: &str) -> Result<(), StoreError> {
        if manifest.references(sha256) == 0 {
            match std::fs::remove_file(self.blob_path(sha256)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// SHA-256 of a payload, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl BinaryStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };
        match std::fs::read(self.blob_path(&entry.sha256)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(key, sha256 = %entry.sha256, "manifest entry without blob");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut manifest = lock(&self.manifest);
        let sha256 = hash_bytes(bytes);

        let used = manifest.total_size();
        // A blob already stored under another key costs nothing extra.
        let shared = manifest.references(&sha256) > 0;
        let replaced = match manifest.entries.get(key) {
            Some(old) if manifest.references(&old.sha256) == 1 => old.size,
            _ => 0,
        };
        let charged = if shared { replaced + bytes.len() } else { replaced };
        admit(&self.limits, bytes, used, charged)?;

        let path = self.blob_path(&sha256);
        if !path.exists() {
            std::fs::write(&path, bytes)?;
        }

        let previous = manifest.entries.insert(
            key.to_string(),
            BlobEntry {
                sha256: sha256.clone(),
                size: bytes.len(),
            },
        );
        if let Some(old) = previous
            && old.sha256 != sha256
        {
            self.collect_blob(&manifest, &old.sha256)?;
        }
        manifest.save(&self.root)?;
        debug!(key, size = bytes.len(), %sha256, "file store put");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut manifest = lock(&self.manifest);
        if let Some(old) = manifest.entries.remove(key) {
            self.collect_blob(&manifest, &old.sha256)?;
            manifest.save(&self.root)?;
            debug!(key, "file store clear");
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entry(key)
            .is_some_and(|e| self.blob_path(&e.sha256).exists()))
    }
}
