//! Directory-listing cache.
//!
//! Memoizes `ls` results per directory with optional time-based expiry and
//! a least-recently-inserted capacity bound. Owned by each filesystem
//! instance; writes and removals by the owning filesystem invalidate the
//! affected directory and its ancestors.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

use crate::fs::FileEntry;
use crate::path;

#[derive(Debug)]
struct CachedListing {
    entries: Vec<FileEntry>,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    listings: HashMap<String, CachedListing>,
    // Insertion order for capacity eviction.
    order: VecDeque<String>,
}

/// Per-filesystem cache of directory listings.
#[derive(Debug)]
pub struct DirCache {
    inner: Mutex<Inner>,
    /// Entries older than this many seconds are treated as absent.
    expiry_seconds: Option<f64>,
    /// Max cached directories; least-recently-inserted evicted first.
    max_paths: Option<usize>,
    /// When false every operation is a no-op.
    enabled: bool,
}

impl DirCache {
    pub fn new(enabled: bool, expiry_seconds: Option<f64>, max_paths: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            expiry_seconds,
            max_paths,
            enabled,
        }
    }

    /// Cache with defaults taken from the process configuration.
    pub fn from_config() -> Self {
        let cfg = crate::config::config();
        Self::new(cfg.use_listings_cache, cfg.listings_expiry_time, None)
    }

    /// Cached listing for `dir`, if present and fresh.
    pub fn get(&self, dir: &str) -> Option<Vec<FileEntry>> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        let cached = inner.listings.get(dir)?;
        if let Some(ttl) = self.expiry_seconds {
            if cached.inserted_at.elapsed().as_secs_f64() > ttl {
                inner.listings.remove(dir);
                inner.order.retain(|p| p != dir);
                return None;
            }
        }
        Some(cached.entries.clone())
    }

    /// Store a listing for `dir`, evicting the oldest entries past capacity.
    pub fn put(&self, dir: &str, entries: Vec<FileEntry>) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.listings.insert(
            dir.to_string(),
            CachedListing {
                entries,
                inserted_at: Instant::now(),
            },
        ).is_none()
        {
            inner.order.push_back(dir.to_string());
        }
        if let Some(cap) = self.max_paths {
            while inner.listings.len() > cap {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.listings.remove(&oldest);
            }
        }
    }

    /// Drop the listing for `path` and every ancestor touched by it.
    ///
    /// Called with the path that changed: both its own listing (if it was a
    /// directory) and the listings containing it go stale.
    pub fn invalidate(&self, path: &str) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        inner.listings.remove(path);
        for ancestor in path::ancestors(path) {
            inner.listings.remove(&ancestor);
        }
        inner
            .order
            .retain(|p| p != path && !path::ancestors(path).contains(p));
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.listings.clear();
        inner.order.clear();
    }

    /// Number of cached directories (fresh or not).
    pub fn len(&self) -> usize {
        self.inner.lock().listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileEntry, FileType};

    fn entry(name: &str) -> FileEntry {
        FileEntry::new(name, FileType::File, Some(3))
    }

    #[test]
    fn put_get_round_trip() {
        let cache = DirCache::new(true, None, None);
        cache.put("/a", vec![entry("/a/x")]);
        let got = cache.get("/a").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "/a/x");
        assert!(cache.get("/b").is_none());
    }

    #[test]
    fn disabled_cache_is_inert() {
        let cache = DirCache::new(false, None, None);
        cache.put("/a", vec![entry("/a/x")]);
        assert!(cache.get("/a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = DirCache::new(true, Some(0.0), None);
        cache.put("/a", vec![entry("/a/x")]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("/a").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_inserted() {
        let cache = DirCache::new(true, None, Some(2));
        cache.put("/a", vec![]);
        cache.put("/b", vec![]);
        cache.put("/c", vec![]);
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/b").is_some());
        assert!(cache.get("/c").is_some());
    }

    #[test]
    fn invalidate_removes_ancestors() {
        let cache = DirCache::new(true, None, None);
        cache.put("/", vec![]);
        cache.put("/a", vec![]);
        cache.put("/a/b", vec![]);
        cache.put("/z", vec![]);
        cache.invalidate("/a/b/file");
        assert!(cache.get("/a/b").is_none());
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/").is_none());
        assert!(cache.get("/z").is_some());
    }
}
