use crate::error::CacheError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One processed release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: u64,
    pub name: String,
}

/// Persistent set of release ids that have already been handled.
///
/// Every operation re-reads the backing file, so a cache must only be
/// mutated from one thread of one process at a time.
#[derive(Debug, Clone)]
pub struct DedupCache {
    path: PathBuf,
}

impl DedupCache {
    /// Opens the cache at `path`, creating an empty one when absent.
    /// `invalidate` discards any existing file first.
    pub fn open(path: impl AsRef<Path>, invalidate: bool) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if invalidate && path.exists() {
            fs::remove_file(&path)?;
            debug!("Removed cache file {:?}", path);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let cache = DedupCache { path };
        if !cache.path.exists() {
            cache.write(&[])?;
            debug!("Created empty cache file {:?}", cache.path);
        }
        Ok(cache)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries on disk with repeated ids collapsed onto their first occurrence
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let raw = fs::read(&self.path)?;
        let parsed: Vec<CacheEntry> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cache file {:?} is corrupt ({}); treating it as empty",
                    self.path, e
                );
                return Ok(Vec::new());
            }
        };
        let mut seen = HashSet::new();
        Ok(parsed.into_iter().filter(|e| seen.insert(e.id)).collect())
    }

    pub fn contains(&self, release_id: u64) -> Result<bool, CacheError> {
        Ok(self.entries()?.iter().any(|e| e.id == release_id))
    }

    /// Records a release. Adding an id that is already present is a no-op.
    pub fn add(&self, release_id: u64, display_name: impl Into<String>) -> Result<(), CacheError> {
        let mut entries = self.entries()?;
        if entries.iter().any(|e| e.id == release_id) {
            return Ok(());
        }
        entries.push(CacheEntry {
            id: release_id,
            name: display_name.into(),
        });
        self.write(&entries)
    }

    /// Forgets a release; true when something was removed
    pub fn remove(&self, release_id: u64) -> Result<bool, CacheError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| e.id != release_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    fn write(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, entries)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
