//! Persistent signature → resolution cache.
//!
//! One JSON document maps signature keys to the file and export a signature
//! last resolved to. Entries only reference primitive keys (path, mtime), never
//! loaded values, and are honored only while the file's mtime is unchanged.

use crate::error::Result;
use crate::extract::AccessDescriptor;
use crate::signature::SignatureKey;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Milliseconds since the Unix epoch, saturating at zero for earlier times.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A persisted resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Absolute path of the resolved file.
    pub path: PathBuf,
    pub access: AccessDescriptor,
    /// File mtime at resolution, ms since epoch.
    pub mtime: u64,
    /// When the entry was written, ms since epoch.
    pub timestamp: u64,
    /// Per-entry time to live in seconds, overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub score: f64,
}

/// Why a stored entry was not honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Missing,
    Modified,
    Expired,
}

impl CacheEntry {
    /// Checks the entry against the filesystem and clock.
    pub fn staleness(&self, default_ttl: Option<Duration>, now: SystemTime) -> Option<Staleness> {
        let Ok(metadata) = fs::metadata(&self.path) else {
            return Some(Staleness::Missing);
        };
        let current = metadata.modified().map(epoch_millis).unwrap_or(0);
        if current != self.mtime {
            return Some(Staleness::Modified);
        }
        let ttl = self.ttl.map(Duration::from_secs).or(default_ttl);
        if let Some(ttl) = ttl {
            let age = epoch_millis(now).saturating_sub(self.timestamp);
            if u128::from(age) > ttl.as_millis() {
                return Some(Staleness::Expired);
            }
        }
        None
    }
}

type Document = BTreeMap<String, CacheEntry>;

/// Disk-backed cache; disabled instances keep nothing.
#[derive(Debug)]
pub struct PersistentCache {
    path: Option<PathBuf>,
    default_ttl: Option<Duration>,
    entries: Mutex<Document>,
}

impl PersistentCache {
    /// Opens the document at `path`. A missing or corrupt document yields an empty cache.
    pub fn open(path: PathBuf, default_ttl: Option<Duration>) -> Self {
        let entries = load_document(&path);
        debug!(path = %path.display(), entries = entries.len(), "Opened discovery cache");
        Self {
            path: Some(path),
            default_ttl,
            entries: Mutex::new(entries),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            default_ttl: None,
            entries: Mutex::new(Document::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a fresh entry for `key`, dropping it when stale.
    pub fn lookup(&self, key: SignatureKey) -> Option<CacheEntry> {
        self.lookup_at(key, SystemTime::now())
    }

    pub fn lookup_at(&self, key: SignatureKey, now: SystemTime) -> Option<CacheEntry> {
        let key = key.to_string();
        let mut entries = self.lock();
        let entry = entries.get(&key)?;
        match entry.staleness(self.default_ttl, now) {
            None => Some(entry.clone()),
            Some(reason) => {
                debug!(
                    key = %key,
                    path = %entry.path.display(),
                    ?reason,
                    "Dropping stale cache entry"
                );
                entries.remove(&key);
                None
            }
        }
    }

    pub fn store(&self, key: SignatureKey, entry: CacheEntry) {
        if self.is_enabled() {
            self.lock().insert(key.to_string(), entry);
        }
    }

    pub fn remove(&self, key: SignatureKey) -> Option<CacheEntry> {
        self.lock().remove(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Writes the document atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_json::to_vec_pretty(&*self.lock())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
        }
        let tmp_path = temp_path(path);
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace cache at {}", path.display()))?;
        Ok(())
    }

    /// Drops every entry and deletes the document.
    pub fn clear(&self) -> Result<()> {
        self.lock().clear();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed discovery cache"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove cache at {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn load_document(path: &Path) -> Document {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Document::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discovery cache unreadable, starting empty");
            return Document::new();
        }
    };
    match serde_json::from_slice(&data) {
        Ok(document) => document,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discovery cache is corrupt, starting empty");
            Document::new()
        }
    }
}
