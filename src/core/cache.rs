//! Bounded LRU cache of memory-mapped root sources
//!
//! Replaces a process-wide handle table: the cache is an explicit object
//! injected into the resolver. The lock is never held while mapping a file.

use crate::core::layer::SharedBytes;
use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// LRU cache of mapped source files keyed by path
pub struct SourceCache {
    entries: Mutex<LruCache<PathBuf, SharedBytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SourceCache {
    /// Create a cache holding at most `capacity` sources (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        SourceCache {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the mapped contents of `path`, mapping it on a miss
    pub fn open(&self, path: &Path) -> io::Result<SharedBytes> {
        if let Some(bytes) = self.entries.lock().get(path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let bytes = map_file(path)?;
        debug!("Mapped source {} ({} bytes)", path.display(), bytes.len());

        self.entries.lock().put(path.to_path_buf(), bytes.clone());
        Ok(bytes)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains(path)
    }

    /// Drop a single entry; layers already holding it keep their mapping
    pub fn evict(&self, path: &Path) -> bool {
        self.entries.lock().pop(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache").field("stats", &self.stats()).finish()
    }
}

fn map_file(path: &Path) -> io::Result<SharedBytes> {
    let file = File::open(path)?;
    // Zero-length files cannot be mapped on every platform
    if file.metadata()?.len() == 0 {
        return Ok(SharedBytes::empty());
    }
    // SAFETY: evidence sources are opened read-only and treated as immutable
    // for the lifetime of the case.
    let map = unsafe { Mmap::map(&file)? };
    Ok(SharedBytes::new(map))
}
