//! Read-buffer strategies.
//!
//! Every strategy fronts a cold [`RangeFetcher`] with one primitive,
//! `fetch(start, end)`. Requests past end-of-file short-read, empty
//! ranges return empty bytes without touching the backend, and negative
//! offsets are resolved by the caller before reaching a strategy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, VfsError};

/// Cold byte-range reader supplied by the owning filesystem.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Read `[start, end)`. Implementations short-read past EOF.
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes>;

    /// Total object size, when the backend can answer cheaply.
    async fn total_size(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// A byte-range cache fronting a [`RangeFetcher`].
#[async_trait]
pub trait ReadCache: Send {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes>;

    /// Strategy name as used in `cache_type`.
    fn name(&self) -> &'static str;

    /// Release held resources. Further fetches pass through cold.
    fn close(&mut self) {}
}

/// Per-strategy parameters.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Max resident blocks for the block strategies.
    pub max_blocks: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { max_blocks: 32 }
    }
}

/// Construct a strategy by name.
///
/// Known names: `none`, `readahead`, `bytes`, `mmap`, `block`
/// (alias `blockcache`), `background`, `first`.
pub fn make_cache(
    name: &str,
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    options: &CacheOptions,
) -> Result<Box<dyn ReadCache>> {
    Ok(match name {
        "none" => Box::new(NoCache { fetcher, size }),
        "readahead" => Box::new(ReadAheadCache::new(fetcher, size, block_size)),
        "bytes" => Box::new(BytesCache::new(fetcher, size, block_size)),
        "mmap" => Box::new(MmapCache::new(fetcher, size, block_size)?),
        "block" | "blockcache" => Box::new(BlockCache::new(
            fetcher,
            size,
            block_size,
            options.max_blocks,
        )),
        "background" => Box::new(BackgroundBlockCache::new(
            fetcher,
            size,
            block_size,
            options.max_blocks,
        )),
        "first" => Box::new(FirstChunkCache::new(fetcher, size, block_size)),
        other => {
            return Err(VfsError::Backend(format!(
                "unknown cache strategy {other:?}"
            )))
        }
    })
}

/// Clamp a request against a known size. Returns `None` for a request
/// that must yield empty bytes without any backend call.
fn clamp(start: u64, end: u64, size: Option<u64>) -> Option<(u64, u64)> {
    if end <= start {
        return None;
    }
    let end = match size {
        Some(s) => end.min(s),
        None => end,
    };
    if let Some(s) = size {
        if start >= s {
            return None;
        }
    }
    (start < end).then_some((start, end))
}

// ---------------------------------------------------------------------------
// Passthrough

/// No caching; every request goes straight to the backend.
pub struct NoCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
}

#[async_trait]
impl ReadCache for NoCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        match clamp(start, end, self.size) {
            Some((s, e)) => self.fetcher.fetch_range(s, e).await,
            None => Ok(Bytes::new()),
        }
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

// ---------------------------------------------------------------------------
// ReadAhead

/// One contiguous window; refetched wholesale on any miss.
///
/// Suited to forward scans: sequential readers pay one backend request
/// per `block_size` bytes.
pub struct ReadAheadCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    window_start: u64,
    window: Bytes,
}

impl ReadAheadCache {
    pub fn new(fetcher: Arc<dyn RangeFetcher>, size: Option<u64>, block_size: usize) -> Self {
        Self {
            fetcher,
            size,
            block_size,
            window_start: 0,
            window: Bytes::new(),
        }
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }
}

#[async_trait]
impl ReadCache for ReadAheadCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };
        if start >= self.window_start && end <= self.window_end() {
            let lo = (start - self.window_start) as usize;
            let hi = (end - self.window_start) as usize;
            return Ok(self.window.slice(lo..hi));
        }
        let want = (end - start).max(self.block_size as u64);
        let fetch_end = match self.size {
            Some(s) => (start + want).min(s),
            None => start + want,
        };
        self.window = self.fetcher.fetch_range(start, fetch_end).await?;
        self.window_start = start;
        let hi = ((end - start) as usize).min(self.window.len());
        Ok(self.window.slice(0..hi))
    }

    fn name(&self) -> &'static str {
        "readahead"
    }

    fn close(&mut self) {
        self.window = Bytes::new();
    }
}

// ---------------------------------------------------------------------------
// Bytes

/// A single growing buffer extended while access stays near-sequential,
/// reset when a request lands far away.
pub struct BytesCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    buf_start: u64,
    buf: Vec<u8>,
}

impl BytesCache {
    pub fn new(fetcher: Arc<dyn RangeFetcher>, size: Option<u64>, block_size: usize) -> Self {
        Self {
            fetcher,
            size,
            block_size,
            buf_start: 0,
            buf: Vec::new(),
        }
    }

    fn buf_end(&self) -> u64 {
        self.buf_start + self.buf.len() as u64
    }
}

#[async_trait]
impl ReadCache for BytesCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };

        let contiguous = !self.buf.is_empty() && start >= self.buf_start && start <= self.buf_end();
        if contiguous {
            if end > self.buf_end() {
                let grow_to = match self.size {
                    Some(s) => end.max(self.buf_end() + self.block_size as u64).min(s),
                    None => end,
                };
                let tail = self.fetcher.fetch_range(self.buf_end(), grow_to).await?;
                self.buf.extend_from_slice(&tail);
            }
        } else {
            let fetch_end = match self.size {
                Some(s) => end.max(start + self.block_size as u64).min(s),
                None => end,
            };
            let fresh = self.fetcher.fetch_range(start, fetch_end).await?;
            self.buf_start = start;
            self.buf = fresh.to_vec();
        }

        let lo = (start - self.buf_start) as usize;
        let hi = ((end - self.buf_start) as usize).min(self.buf.len());
        if lo >= hi {
            return Ok(Bytes::new());
        }
        Ok(Bytes::copy_from_slice(&self.buf[lo..hi]))
    }

    fn name(&self) -> &'static str {
        "bytes"
    }

    fn close(&mut self) {
        self.buf = Vec::new();
    }
}

// ---------------------------------------------------------------------------
// Block (LRU)

/// Shared block map used by the block strategies.
struct BlockMap {
    blocks: HashMap<usize, Bytes>,
    // Usage order, least-recently-used first.
    order: VecDeque<usize>,
    max_blocks: usize,
}

impl BlockMap {
    fn new(max_blocks: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            order: VecDeque::new(),
            max_blocks: max_blocks.max(1),
        }
    }

    fn get(&mut self, idx: usize) -> Option<Bytes> {
        let data = self.blocks.get(&idx)?.clone();
        self.order.retain(|i| *i != idx);
        self.order.push_back(idx);
        Some(data)
    }

    fn put(&mut self, idx: usize, data: Bytes) {
        if self.blocks.insert(idx, data).is_none() {
            self.order.push_back(idx);
        }
        while self.blocks.len() > self.max_blocks {
            let Some(victim) = self.order.pop_front() else {
                break;
            };
            self.blocks.remove(&victim);
        }
    }

    fn contains(&self, idx: usize) -> bool {
        self.blocks.contains_key(&idx)
    }
}

/// Fixed-size aligned blocks with LRU eviction.
pub struct BlockCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    map: Arc<Mutex<BlockMap>>,
}

impl BlockCache {
    pub fn new(
        fetcher: Arc<dyn RangeFetcher>,
        size: Option<u64>,
        block_size: usize,
        max_blocks: usize,
    ) -> Self {
        Self {
            fetcher,
            size,
            block_size,
            map: Arc::new(Mutex::new(BlockMap::new(max_blocks))),
        }
    }

    /// Number of blocks currently resident.
    pub fn populated_blocks(&self) -> usize {
        self.map.lock().blocks.len()
    }

    async fn ensure_size(&mut self) -> Result<u64> {
        if let Some(s) = self.size {
            return Ok(s);
        }
        match self.fetcher.total_size().await? {
            Some(s) => {
                self.size = Some(s);
                Ok(s)
            }
            None => Err(VfsError::InvalidRange(
                "block cache requires a known size".to_string(),
            )),
        }
    }

    async fn load_block(
        fetcher: &Arc<dyn RangeFetcher>,
        map: &Arc<Mutex<BlockMap>>,
        idx: usize,
        block_size: usize,
        size: u64,
    ) -> Result<Bytes> {
        if let Some(hit) = map.lock().get(idx) {
            return Ok(hit);
        }
        let start = idx as u64 * block_size as u64;
        let end = (start + block_size as u64).min(size);
        let data = fetcher.fetch_range(start, end).await?;
        map.lock().put(idx, data.clone());
        Ok(data)
    }

    async fn read_assembled(&mut self, start: u64, end: u64) -> Result<Bytes> {
        let size = self.ensure_size().await?;
        let Some((start, end)) = clamp(start, end, Some(size)) else {
            return Ok(Bytes::new());
        };
        let bs = self.block_size as u64;
        let first = (start / bs) as usize;
        let last = ((end - 1) / bs) as usize;

        let mut out = Vec::with_capacity((end - start) as usize);
        for idx in first..=last {
            let block =
                Self::load_block(&self.fetcher, &self.map, idx, self.block_size, size).await?;
            let block_start = idx as u64 * bs;
            let lo = start.saturating_sub(block_start) as usize;
            let hi = ((end - block_start).min(block.len() as u64)) as usize;
            if lo < hi {
                out.extend_from_slice(&block[lo..hi]);
            }
        }
        Ok(Bytes::from(out))
    }
}

#[async_trait]
impl ReadCache for BlockCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        self.read_assembled(start, end).await
    }

    fn name(&self) -> &'static str {
        "block"
    }
}

// ---------------------------------------------------------------------------
// BackgroundBlock

/// Block cache that speculatively prefetches the block after the one just
/// served, on a background task. Never blocks the caller on the prefetch.
pub struct BackgroundBlockCache {
    inner: BlockCache,
    in_flight: Arc<Mutex<HashSet<usize>>>,
}

impl BackgroundBlockCache {
    pub fn new(
        fetcher: Arc<dyn RangeFetcher>,
        size: Option<u64>,
        block_size: usize,
        max_blocks: usize,
    ) -> Self {
        Self {
            inner: BlockCache::new(fetcher, size, block_size, max_blocks),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn spawn_prefetch(&self, idx: usize, size: u64) {
        let bs = self.inner.block_size as u64;
        if idx as u64 * bs >= size {
            return;
        }
        {
            let mut in_flight = self.in_flight.lock();
            if self.inner.map.lock().contains(idx) || !in_flight.insert(idx) {
                return;
            }
        }
        let fetcher = Arc::clone(&self.inner.fetcher);
        let map = Arc::clone(&self.inner.map);
        let in_flight = Arc::clone(&self.in_flight);
        let block_size = self.inner.block_size;
        tokio::spawn(async move {
            // Best-effort: a failed prefetch just means a cold read later.
            let _ = BlockCache::load_block(&fetcher, &map, idx, block_size, size).await;
            in_flight.lock().remove(&idx);
        });
    }
}

#[async_trait]
impl ReadCache for BackgroundBlockCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        let out = self.inner.read_assembled(start, end).await?;
        if let Some(size) = self.inner.size {
            if end > start {
                let last = ((end - 1) / self.inner.block_size as u64) as usize;
                self.spawn_prefetch(last + 1, size);
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "background"
    }
}

// ---------------------------------------------------------------------------
// FirstChunk

/// Caches only block zero, where most formats keep their headers.
pub struct FirstChunkCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    first: Option<Bytes>,
}

impl FirstChunkCache {
    pub fn new(fetcher: Arc<dyn RangeFetcher>, size: Option<u64>, block_size: usize) -> Self {
        Self {
            fetcher,
            size,
            block_size,
            first: None,
        }
    }
}

#[async_trait]
impl ReadCache for FirstChunkCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };
        let bs = self.block_size as u64;
        if start >= bs {
            return self.fetcher.fetch_range(start, end).await;
        }

        if self.first.is_none() {
            let chunk_end = match self.size {
                Some(s) => bs.min(s),
                None => bs,
            };
            self.first = Some(self.fetcher.fetch_range(0, chunk_end).await?);
        }
        let first = self.first.as_ref().unwrap();

        let lo = start as usize;
        let hi = (end.min(first.len() as u64)) as usize;
        let head = if lo < hi {
            first.slice(lo..hi)
        } else {
            Bytes::new()
        };

        if end <= first.len() as u64 {
            return Ok(head);
        }
        // Straddles the cached chunk: stitch the cold tail on.
        let tail = self
            .fetcher
            .fetch_range(first.len() as u64, end)
            .await?;
        let mut out = Vec::with_capacity(head.len() + tail.len());
        out.extend_from_slice(&head);
        out.extend_from_slice(&tail);
        Ok(Bytes::from(out))
    }

    fn name(&self) -> &'static str {
        "first"
    }

    fn close(&mut self) {
        self.first = None;
    }
}

// ---------------------------------------------------------------------------
// Mmap

/// Sparse local spill file; pages of `block_size` are fetched on demand
/// and written into the mapping. Bytes already present bypass the backend.
pub struct MmapCache {
    fetcher: Arc<dyn RangeFetcher>,
    size: Option<u64>,
    block_size: usize,
    state: Option<MmapState>,
}

struct MmapState {
    map: memmap2::MmapMut,
    // The file keeps the mapping's backing storage alive.
    _file: std::fs::File,
    fetched: HashSet<usize>,
}

impl MmapCache {
    pub fn new(
        fetcher: Arc<dyn RangeFetcher>,
        size: Option<u64>,
        block_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            size,
            block_size,
            state: None,
        })
    }

    async fn ensure_state(&mut self) -> Result<(&mut MmapState, u64)> {
        if self.size.is_none() {
            self.size = self.fetcher.total_size().await?;
        }
        let size = self.size.ok_or_else(|| {
            VfsError::InvalidRange("mmap cache requires a known size".to_string())
        })?;
        if self.state.is_none() {
            let file = tempfile::tempfile()?;
            file.set_len(size.max(1))?;
            // Safety: the anonymous temp file is exclusively owned by this
            // cache for the life of the mapping.
            let map = unsafe { memmap2::MmapMut::map_mut(&file)? };
            self.state = Some(MmapState {
                map,
                _file: file,
                fetched: HashSet::new(),
            });
        }
        Ok((self.state.as_mut().unwrap(), size))
    }
}

#[async_trait]
impl ReadCache for MmapCache {
    async fn fetch(&mut self, start: u64, end: u64) -> Result<Bytes> {
        if end <= start {
            return Ok(Bytes::new());
        }
        let block_size = self.block_size as u64;
        let fetcher = Arc::clone(&self.fetcher);
        let (state, size) = self.ensure_state().await?;
        let Some((start, end)) = clamp(start, end, Some(size)) else {
            return Ok(Bytes::new());
        };

        let first = (start / block_size) as usize;
        let last = ((end - 1) / block_size) as usize;
        for idx in first..=last {
            if state.fetched.contains(&idx) {
                continue;
            }
            let lo = idx as u64 * block_size;
            let hi = (lo + block_size).min(size);
            let data = fetcher.fetch_range(lo, hi).await?;
            let dst = &mut state.map[lo as usize..lo as usize + data.len()];
            dst.copy_from_slice(&data);
            state.fetched.insert(idx);
        }
        Ok(Bytes::copy_from_slice(
            &state.map[start as usize..end as usize],
        ))
    }

    fn name(&self) -> &'static str {
        "mmap"
    }

    fn close(&mut self) {
        if let Some(state) = self.state.take() {
            let _ = state.map.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher over an in-memory payload that counts backend calls.
    struct CountingFetcher {
        data: Bytes,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(data: impl Into<Bytes>) -> Arc<Self> {
            Arc::new(Self {
                data: data.into(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RangeFetcher for CountingFetcher {
        async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let len = self.data.len() as u64;
            let s = start.min(len) as usize;
            let e = end.min(len) as usize;
            Ok(self.data.slice(s..e))
        }

        async fn total_size(&self) -> Result<Option<u64>> {
            Ok(Some(self.data.len() as u64))
        }
    }

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    /// Any strategy must reproduce the underlying bytes for any read plan.
    async fn check_strategy(name: &str) {
        let data = payload(1000);
        let fetcher = CountingFetcher::new(data.clone());
        let mut cache = make_cache(
            name,
            fetcher.clone(),
            Some(1000),
            64,
            &CacheOptions::default(),
        )
        .unwrap();

        // Sequential, overlapping, backward, straddling EOF.
        let plans: &[(u64, u64)] = &[
            (0, 10),
            (10, 100),
            (50, 150),
            (900, 1100),
            (0, 1000),
            (999, 1000),
            (500, 500),
        ];
        for &(s, e) in plans {
            let got = cache.fetch(s, e).await.unwrap();
            let lo = (s as usize).min(1000);
            let hi = (e as usize).min(1000);
            assert_eq!(&got[..], &data[lo..hi], "{name} range {s}..{e}");
        }
    }

    #[tokio::test]
    async fn all_strategies_reproduce_bytes() {
        for name in ["none", "readahead", "bytes", "block", "background", "first", "mmap"] {
            check_strategy(name).await;
        }
    }

    #[tokio::test]
    async fn empty_range_never_hits_backend() {
        let fetcher = CountingFetcher::new(payload(100));
        for name in ["none", "readahead", "bytes", "block", "first"] {
            let mut cache = make_cache(
                name,
                fetcher.clone(),
                Some(100),
                16,
                &CacheOptions::default(),
            )
            .unwrap();
            assert!(cache.fetch(10, 10).await.unwrap().is_empty());
            assert!(cache.fetch(20, 5).await.unwrap().is_empty());
            assert!(cache.fetch(500, 600).await.unwrap().is_empty());
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn readahead_serves_forward_scan_from_window() {
        let fetcher = CountingFetcher::new(payload(256));
        let mut cache = ReadAheadCache::new(fetcher.clone(), Some(256), 128);
        for start in (0..128).step_by(16) {
            cache.fetch(start, start + 16).await.unwrap();
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn block_cache_fetches_each_block_once() {
        let fetcher = CountingFetcher::new(payload(256));
        let mut cache = BlockCache::new(fetcher.clone(), Some(256), 64, 32);
        cache.fetch(0, 70).await.unwrap();
        assert_eq!(cache.populated_blocks(), 2);
        assert_eq!(fetcher.calls(), 2);
        cache.fetch(10, 60).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn block_cache_evicts_lru() {
        let fetcher = CountingFetcher::new(payload(256));
        let mut cache = BlockCache::new(fetcher.clone(), Some(256), 64, 2);
        cache.fetch(0, 64).await.unwrap(); // block 0
        cache.fetch(64, 128).await.unwrap(); // block 1
        cache.fetch(128, 192).await.unwrap(); // block 2, evicts 0
        assert_eq!(cache.populated_blocks(), 2);
        cache.fetch(0, 64).await.unwrap(); // refetch block 0
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn first_chunk_only_caches_header() {
        let fetcher = CountingFetcher::new(payload(256));
        let mut cache = FirstChunkCache::new(fetcher.clone(), Some(256), 64);
        cache.fetch(0, 10).await.unwrap();
        cache.fetch(5, 20).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        cache.fetch(200, 210).await.unwrap();
        cache.fetch(200, 210).await.unwrap();
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn background_prefetch_warms_next_block() {
        let fetcher = CountingFetcher::new(payload(512));
        let mut cache = BackgroundBlockCache::new(fetcher.clone(), Some(512), 64, 32);
        cache.fetch(0, 64).await.unwrap();
        // Wait for the speculative fetch of block 1 to land.
        for _ in 0..50 {
            if cache.inner.populated_blocks() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let calls_before = fetcher.calls();
        cache.fetch(64, 128).await.unwrap();
        assert_eq!(fetcher.calls(), calls_before);
    }

    #[tokio::test]
    async fn mmap_pages_in_blocks_once() {
        let data = payload(300);
        let fetcher = CountingFetcher::new(data.clone());
        let mut cache = MmapCache::new(fetcher.clone(), Some(300), 100).unwrap();
        assert_eq!(&cache.fetch(0, 150).await.unwrap()[..], &data[0..150]);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(&cache.fetch(50, 150).await.unwrap()[..], &data[50..150]);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(&cache.fetch(250, 400).await.unwrap()[..], &data[250..300]);
    }
}
