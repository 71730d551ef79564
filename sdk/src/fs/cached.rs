//! Caching wrapper filesystems.
//!
//! Three variants compose over any inner filesystem:
//!
//! - [`WholeFileCacheFs`]: first read copies the full remote object to a
//!   local file keyed by a stable hash of the URL; later reads are local.
//!   Freshness is governed by a [`CachePolicy`]; cache state persists in
//!   a small manifest journal per cache directory.
//! - [`SimpleCacheFs`]: whole-file with no freshness check and no
//!   journal. Presence of the hashed file means cached; suited to large
//!   counts of immutable objects.
//! - [`BlockCacheFs`]: a sparse local file sized to the remote object;
//!   read requests fault in aligned blocks on demand and persist them,
//!   with the per-file block bitmap journaled alongside.
//!
//! Writes through any wrapper go to the inner filesystem and invalidate
//! the local copy and the inner listing caches.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Capabilities, FileEntry, Filesystem};
use crate::error::{io_error_at, Result, VfsError};
use crate::file::{ChunkUploader, UploadMode};
use crate::path;
use crate::transaction::TransactionState;

/// Freshness policy for [`WholeFileCacheFs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Serve the local copy forever (default).
    NeverCheck,
    /// Compare mtime/size against the inner filesystem on each open.
    CheckOnOpen,
    /// Refetch copies older than this many seconds.
    ExpireAfter(u64),
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Stable local file name for a remote URL.
fn hashed_name(url: &str) -> String {
    hex::encode(&Sha256::digest(url.as_bytes())[..16])
}

/// One cached object in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    url: String,
    local_name: String,
    size: Option<u64>,
    mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    created_at: i64,
    /// Present blocks, for the block-sparse variant.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    blocks: BTreeSet<usize>,
}

/// The journal: a JSON file of cached objects in the cache directory.
struct Manifest {
    file: PathBuf,
    entries: Mutex<BTreeMap<String, ManifestEntry>>,
}

impl Manifest {
    fn load(dir: &Path) -> Self {
        let file = dir.join("cache_manifest.json");
        let entries = std::fs::read(&file)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default();
        Self {
            file,
            entries: Mutex::new(entries),
        }
    }

    fn get(&self, url: &str) -> Option<ManifestEntry> {
        self.entries.lock().get(url).cloned()
    }

    fn upsert(&self, entry: ManifestEntry) {
        self.entries.lock().insert(entry.url.clone(), entry);
        self.save();
    }

    fn remove(&self, url: &str) -> Option<ManifestEntry> {
        let removed = self.entries.lock().remove(url);
        if removed.is_some() {
            self.save();
        }
        removed
    }

    fn save(&self) {
        let snapshot = self.entries.lock().clone();
        // Journal loss is recoverable (the cache refetches), so errors
        // only log.
        let write = || -> std::io::Result<()> {
            let data = serde_json::to_vec_pretty(&snapshot)?;
            let dir = self.file.parent().unwrap_or(Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&self.file)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(file = %self.file.display(), "failed to persist cache manifest: {e}");
        }
    }
}

/// Cache directory: either caller-provided or a temp dir owned for the
/// lifetime of the wrapper.
enum Storage {
    Dir(PathBuf),
    Temp(tempfile::TempDir),
}

impl Storage {
    fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        match dir {
            Some(d) => {
                std::fs::create_dir_all(&d)
                    .map_err(|e| io_error_at(e, &d.display().to_string()))?;
                Ok(Storage::Dir(d))
            }
            None => Ok(Storage::Temp(tempfile::tempdir()?)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Storage::Dir(d) => d,
            Storage::Temp(t) => t.path(),
        }
    }
}

/// Shared plumbing for the three wrapper variants.
struct CacheLayer {
    target: Arc<dyn Filesystem>,
    storage: Storage,
    manifest: Manifest,
}

impl CacheLayer {
    fn new(target: Arc<dyn Filesystem>, dir: Option<PathBuf>) -> Result<Self> {
        let storage = Storage::resolve(dir)?;
        let manifest = Manifest::load(storage.path());
        Ok(Self {
            target,
            storage,
            manifest,
        })
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.storage.path().join(name)
    }

    fn cache_url(&self, p: &str) -> String {
        self.target.unstrip_protocol(p)
    }

    /// Drop the local copy (if any) after a write or removal through the
    /// wrapper, and poke the inner listing cache.
    fn invalidate(&self, p: &str) {
        let url = self.cache_url(p);
        if let Some(entry) = self.manifest.remove(&url) {
            let _ = std::fs::remove_file(self.local_path(&entry.local_name));
        } else {
            let _ = std::fs::remove_file(self.local_path(&hashed_name(&url)));
        }
        self.target.invalidate_cache(Some(p));
    }
}

fn read_local_range(local: &Path, start: u64, end: u64) -> Result<Bytes> {
    let mut f = std::fs::File::open(local)
        .map_err(|e| io_error_at(e, &local.display().to_string()))?;
    let size = f.metadata()?.len();
    let s = start.min(size);
    let e = end.min(size);
    if s >= e {
        return Ok(Bytes::new());
    }
    f.seek(SeekFrom::Start(s))?;
    let mut buf = vec![0u8; (e - s) as usize];
    f.read_exact(&mut buf)?;
    Ok(Bytes::from(buf))
}

/// Uploader that forwards to the inner filesystem and invalidates the
/// local copy once the final chunk lands.
struct WriteThroughUploader {
    inner: Box<dyn ChunkUploader>,
    layer: Arc<CacheLayer>,
    path: String,
}

#[async_trait]
impl ChunkUploader for WriteThroughUploader {
    async fn upload_chunk(&mut self, index: usize, data: Bytes, is_final: bool) -> Result<()> {
        self.inner.upload_chunk(index, data, is_final).await?;
        if is_final {
            self.layer.invalidate(&self.path);
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.inner.cancel().await
    }
}

// ---------------------------------------------------------------------------
// Whole-file cache

/// Whole-file local cache over an inner filesystem.
pub struct WholeFileCacheFs {
    layer: Arc<CacheLayer>,
    policy: CachePolicy,
    transactions: TransactionState,
}

impl WholeFileCacheFs {
    pub fn new(
        target: Arc<dyn Filesystem>,
        cache_dir: Option<PathBuf>,
        policy: CachePolicy,
    ) -> Result<Self> {
        Ok(Self {
            layer: Arc::new(CacheLayer::new(target, cache_dir)?),
            policy,
            transactions: TransactionState::new(),
        })
    }

    pub fn target(&self) -> &Arc<dyn Filesystem> {
        &self.layer.target
    }

    /// Directory holding the cached copies.
    pub fn cache_dir(&self) -> &Path {
        self.layer.storage.path()
    }

    fn is_fresh(&self, entry: &ManifestEntry, remote: &FileEntry) -> bool {
        match self.policy {
            CachePolicy::NeverCheck => true,
            CachePolicy::CheckOnOpen => {
                entry.size == remote.size && entry.mtime == remote.modified
            }
            CachePolicy::ExpireAfter(secs) => {
                (now_epoch() - entry.created_at) as u64 <= secs
            }
        }
    }

    /// Local copy of `p`, fetching or refreshing as the policy requires.
    async fn ensure_cached(&self, p: &str) -> Result<PathBuf> {
        let p = self.layer.target.strip_protocol(p);
        let url = self.layer.cache_url(&p);

        let needs_remote_info = !matches!(self.policy, CachePolicy::NeverCheck);
        let remote = if needs_remote_info {
            Some(self.layer.target.info(&p).await?)
        } else {
            None
        };

        if let Some(entry) = self.layer.manifest.get(&url) {
            let local = self.layer.local_path(&entry.local_name);
            let fresh = match &remote {
                Some(remote) => self.is_fresh(&entry, remote),
                None => true,
            };
            if fresh && local.is_file() {
                return Ok(local);
            }
        }

        let remote = match remote {
            Some(r) => r,
            None => self.layer.target.info(&p).await?,
        };
        let local_name = hashed_name(&url);
        let local = self.layer.local_path(&local_name);
        self.layer.target.get_file(&p, &local).await?;
        self.layer.manifest.upsert(ManifestEntry {
            url,
            local_name,
            size: remote.size,
            mtime: remote.modified,
            checksum: remote.checksum.clone(),
            created_at: now_epoch(),
            blocks: BTreeSet::new(),
        });
        tracing::debug!(path = %p, "cached remote object locally");
        Ok(local)
    }
}

#[async_trait]
impl Filesystem for WholeFileCacheFs {
    fn protocol(&self) -> &'static str {
        "filecache"
    }

    fn capabilities(&self) -> Capabilities {
        self.layer.target.capabilities()
    }

    fn transactions(&self) -> Option<&TransactionState> {
        Some(&self.transactions)
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        self.layer.target.info(p).await
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        self.layer.target.ls(p).await
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let local = self.ensure_cached(p).await?;
        let size = std::fs::metadata(&local)?.len();
        let (s, e) = path::resolve_range(size, start, end)?;
        read_local_range(&local, s, e)
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        self.layer.target.pipe_file(p, data).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        self.layer.target.mkdir(p, create_parents).await
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        self.layer.target.rmdir(p).await
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        self.layer.target.rm_file(p).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let inner = self.layer.target.start_upload(p, mode).await?;
        Ok(Box::new(WriteThroughUploader {
            inner,
            layer: Arc::clone(&self.layer),
            path: self.layer.target.strip_protocol(p),
        }))
    }

    async fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        // Serve the download from the cache copy.
        let local = self.ensure_cached(rpath).await?;
        std::fs::copy(&local, lpath)
            .map_err(|e| io_error_at(e, &lpath.display().to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simple cache

/// Append-only whole-file cache: no freshness checks, no journal.
pub struct SimpleCacheFs {
    layer: Arc<CacheLayer>,
    transactions: TransactionState,
}

impl SimpleCacheFs {
    pub fn new(target: Arc<dyn Filesystem>, cache_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            layer: Arc::new(CacheLayer::new(target, cache_dir)?),
            transactions: TransactionState::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        self.layer.storage.path()
    }

    async fn ensure_cached(&self, p: &str) -> Result<PathBuf> {
        let p = self.layer.target.strip_protocol(p);
        let local = self.layer.local_path(&hashed_name(&self.layer.cache_url(&p)));
        if !local.is_file() {
            self.layer.target.get_file(&p, &local).await?;
        }
        Ok(local)
    }

    /// Local materialization of `p`, fetching on first use. The backing
    /// file lives as long as the cache directory does.
    pub async fn local_path_of(&self, p: &str) -> Result<PathBuf> {
        self.ensure_cached(p).await
    }
}

#[async_trait]
impl Filesystem for SimpleCacheFs {
    fn protocol(&self) -> &'static str {
        "simplecache"
    }

    fn capabilities(&self) -> Capabilities {
        self.layer.target.capabilities()
    }

    fn transactions(&self) -> Option<&TransactionState> {
        Some(&self.transactions)
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        self.layer.target.info(p).await
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        self.layer.target.ls(p).await
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let local = self.ensure_cached(p).await?;
        let size = std::fs::metadata(&local)?.len();
        let (s, e) = path::resolve_range(size, start, end)?;
        read_local_range(&local, s, e)
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        self.layer.target.pipe_file(p, data).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        self.layer.target.mkdir(p, create_parents).await
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        self.layer.target.rmdir(p).await
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        self.layer.target.rm_file(p).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let inner = self.layer.target.start_upload(p, mode).await?;
        Ok(Box::new(WriteThroughUploader {
            inner,
            layer: Arc::clone(&self.layer),
            path: self.layer.target.strip_protocol(p),
        }))
    }
}

// ---------------------------------------------------------------------------
// Block-sparse cache

/// Block-sparse local cache: a sparse file sized to the remote object,
/// faulting in aligned blocks on demand.
pub struct BlockCacheFs {
    layer: Arc<CacheLayer>,
    block_size: usize,
    transactions: TransactionState,
}

impl BlockCacheFs {
    pub fn new(
        target: Arc<dyn Filesystem>,
        cache_dir: Option<PathBuf>,
        block_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            layer: Arc::new(CacheLayer::new(target, cache_dir)?),
            block_size: block_size.max(1),
            transactions: TransactionState::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        self.layer.storage.path()
    }

    /// Blocks currently faulted in for `p`.
    pub fn populated_blocks(&self, p: &str) -> usize {
        let url = self.layer.cache_url(&self.layer.target.strip_protocol(p));
        self.layer
            .manifest
            .get(&url)
            .map(|e| e.blocks.len())
            .unwrap_or(0)
    }

    async fn fault_range(&self, p: &str, start: u64, end: u64) -> Result<(PathBuf, u64)> {
        let p = self.layer.target.strip_protocol(p);
        let url = self.layer.cache_url(&p);
        let remote = self.layer.target.info(&p).await?;
        let size = remote.size.ok_or(VfsError::Unsupported(
            "block cache requires the inner filesystem to report sizes",
        ))?;

        let mut entry = match self.layer.manifest.get(&url) {
            Some(entry) if entry.size == Some(size) => entry,
            _ => ManifestEntry {
                local_name: hashed_name(&url),
                url: url.clone(),
                size: Some(size),
                mtime: remote.modified,
                checksum: None,
                created_at: now_epoch(),
                blocks: BTreeSet::new(),
            },
        };
        let local = self.layer.local_path(&entry.local_name);
        if !local.is_file() {
            let f = std::fs::File::create(&local)
                .map_err(|e| io_error_at(e, &local.display().to_string()))?;
            f.set_len(size)?;
            entry.blocks.clear();
        }

        let end = end.min(size);
        if start < end {
            let bs = self.block_size as u64;
            let first = (start / bs) as usize;
            let last = ((end - 1) / bs) as usize;
            let mut file: Option<std::fs::File> = None;
            let mut dirty = false;
            for idx in first..=last {
                if entry.blocks.contains(&idx) {
                    continue;
                }
                let lo = idx as u64 * bs;
                let hi = (lo + bs).min(size);
                let data = self
                    .layer
                    .target
                    .cat_file(&p, Some(lo as i64), Some(hi as i64))
                    .await?;
                if file.is_none() {
                    file = Some(std::fs::OpenOptions::new().write(true).open(&local)?);
                }
                let f = file.as_mut().expect("opened above");
                f.seek(SeekFrom::Start(lo))?;
                f.write_all(&data)?;
                entry.blocks.insert(idx);
                dirty = true;
            }
            if dirty {
                self.layer.manifest.upsert(entry);
            }
        }
        Ok((local, size))
    }
}

#[async_trait]
impl Filesystem for BlockCacheFs {
    fn protocol(&self) -> &'static str {
        "blockcache"
    }

    fn capabilities(&self) -> Capabilities {
        self.layer.target.capabilities()
    }

    fn transactions(&self) -> Option<&TransactionState> {
        Some(&self.transactions)
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        self.layer.target.info(p).await
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        self.layer.target.ls(p).await
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let probe_size = self
            .layer
            .target
            .size(p)
            .await?
            .ok_or(VfsError::Unsupported(
                "block cache requires the inner filesystem to report sizes",
            ))?;
        let (s, e) = path::resolve_range(probe_size, start, end)?;
        let (local, _) = self.fault_range(p, s, e).await?;
        read_local_range(&local, s, e)
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        self.layer.target.pipe_file(p, data).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        self.layer.target.mkdir(p, create_parents).await
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        self.layer.target.rmdir(p).await
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        self.layer.target.rm_file(p).await?;
        self.layer.invalidate(&self.layer.target.strip_protocol(p));
        Ok(())
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let inner = self.layer.target.start_upload(p, mode).await?;
        Ok(Box::new(WriteThroughUploader {
            inner,
            layer: Arc::clone(&self.layer),
            path: self.layer.target.strip_protocol(p),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;

    async fn seeded_memory() -> Arc<dyn Filesystem> {
        let fs = MemoryFs::arc();
        let payload: Vec<u8> = (0..256u32).map(|i| i as u8).collect();
        fs.pipe_file("/a", Bytes::from(payload)).await.unwrap();
        fs.pipe_file("/b", Bytes::from_static(b"small")).await.unwrap();
        fs
    }

    #[tokio::test]
    async fn whole_file_cache_serves_second_read_locally() {
        let target = seeded_memory().await;
        let cache =
            WholeFileCacheFs::new(Arc::clone(&target), None, CachePolicy::NeverCheck).unwrap();

        let first = cache.cat_file("/b", None, None).await.unwrap();
        assert_eq!(&first[..], b"small");

        // Mutate behind the cache's back; NeverCheck keeps serving the copy.
        target.pipe_file("/b", Bytes::from_static(b"CHANGED")).await.unwrap();
        let second = cache.cat_file("/b", None, None).await.unwrap();
        assert_eq!(&second[..], b"small");
    }

    #[tokio::test]
    async fn check_on_open_refetches_stale_copies() {
        let target = seeded_memory().await;
        let cache =
            WholeFileCacheFs::new(Arc::clone(&target), None, CachePolicy::CheckOnOpen).unwrap();

        assert_eq!(&cache.cat_file("/b", None, None).await.unwrap()[..], b"small");
        target
            .pipe_file("/b", Bytes::from_static(b"version two"))
            .await
            .unwrap();
        assert_eq!(
            &cache.cat_file("/b", None, None).await.unwrap()[..],
            b"version two"
        );
    }

    #[tokio::test]
    async fn manifest_survives_reopen() {
        let target = seeded_memory().await;
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = WholeFileCacheFs::new(
                Arc::clone(&target),
                Some(dir.path().to_path_buf()),
                CachePolicy::NeverCheck,
            )
            .unwrap();
            cache.cat_file("/b", None, None).await.unwrap();
        }
        // New wrapper over the same directory reuses the journaled copy.
        let cache = WholeFileCacheFs::new(
            Arc::clone(&target),
            Some(dir.path().to_path_buf()),
            CachePolicy::NeverCheck,
        )
        .unwrap();
        target.rm_file("/b").await.unwrap();
        assert_eq!(&cache.cat_file("/b", None, None).await.unwrap()[..], b"small");
    }

    #[tokio::test]
    async fn writes_through_cache_invalidate_local_copy() {
        let target = seeded_memory().await;
        let cache =
            WholeFileCacheFs::new(Arc::clone(&target), None, CachePolicy::NeverCheck).unwrap();

        cache.cat_file("/b", None, None).await.unwrap();
        cache
            .pipe_file("/b", Bytes::from_static(b"written through"))
            .await
            .unwrap();
        assert_eq!(
            &target.cat_file("/b", None, None).await.unwrap()[..],
            b"written through"
        );
        assert_eq!(
            &cache.cat_file("/b", None, None).await.unwrap()[..],
            b"written through"
        );
    }

    #[tokio::test]
    async fn simple_cache_has_no_freshness_check() {
        let target = seeded_memory().await;
        let cache = SimpleCacheFs::new(Arc::clone(&target), None).unwrap();
        assert_eq!(&cache.cat_file("/b", None, None).await.unwrap()[..], b"small");
        target.pipe_file("/b", Bytes::from_static(b"NEW")).await.unwrap();
        assert_eq!(&cache.cat_file("/b", None, None).await.unwrap()[..], b"small");
    }

    #[tokio::test]
    async fn block_cache_faults_in_exactly_needed_blocks() {
        let target = seeded_memory().await;
        let cache = BlockCacheFs::new(Arc::clone(&target), None, 64).unwrap();

        let expected: Vec<u8> = (0..70u32).map(|i| i as u8).collect();
        let got = cache.cat_file("/a", Some(0), Some(70)).await.unwrap();
        assert_eq!(&got[..], &expected[..]);
        assert_eq!(cache.populated_blocks("/a"), 2);

        // Re-reading inside the faulted range adds nothing.
        cache.cat_file("/a", Some(10), Some(60)).await.unwrap();
        assert_eq!(cache.populated_blocks("/a"), 2);

        // Touching the tail faults the last blocks only.
        cache.cat_file("/a", Some(-10), None).await.unwrap();
        assert_eq!(cache.populated_blocks("/a"), 3);
    }

    #[tokio::test]
    async fn block_cache_bitmap_survives_reopen() {
        let target = seeded_memory().await;
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = BlockCacheFs::new(
                Arc::clone(&target),
                Some(dir.path().to_path_buf()),
                64,
            )
            .unwrap();
            cache.cat_file("/a", Some(0), Some(70)).await.unwrap();
        }
        let cache = BlockCacheFs::new(
            Arc::clone(&target),
            Some(dir.path().to_path_buf()),
            64,
        )
        .unwrap();
        assert_eq!(cache.populated_blocks("/a"), 2);
    }
}
