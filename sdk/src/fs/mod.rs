//! The abstract filesystem contract.
//!
//! Backends implement the small primitive set (`info`, `ls`, `cat_file`,
//! `pipe_file`, `mkdir`, `rmdir`, `rm_file`) and inherit the full derived
//! surface: traversal, globbing, bulk transfers, the copy family, and the
//! open/mapping/transaction entry points. Wrappers compose over an inner
//! `Arc<dyn Filesystem>`.

pub mod cached;
pub mod dirfs;
pub mod local;
pub mod memory;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use cached::{BlockCacheFs, CachePolicy, SimpleCacheFs, WholeFileCacheFs};
pub use dirfs::DirFs;
pub use local::LocalFs;
pub use memory::MemoryFs;

use crate::asyn;
use crate::cache::{make_cache, CacheOptions, RangeFetcher};
use crate::config;
use crate::dircache::DirCache;
use crate::error::{Result, VfsError};
use crate::file::{BufferedReader, BufferedWriter, ChunkUploader, UploadMode};
use crate::glob;
use crate::path;
use crate::transaction::TransactionState;
use crate::url;

/// Entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Link,
    Other,
}

/// The unit returned by `info` and detailed `ls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path within the filesystem.
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    /// Size in bytes. `None` for directories and for streamed objects
    /// whose length the backend cannot know up front.
    pub size: Option<u64>,
    /// Creation time, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    /// Modification time, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    /// Opaque backend checksum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Backend-specific extras.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, file_type: FileType, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            file_type,
            size,
            created: None,
            modified: None,
            checksum: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Capability flags a backend advertises instead of an all-or-nothing type.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Open-for-append is available.
    pub supports_append: bool,
    /// Directories exist on their own (not only as prefixes with children).
    pub supports_empty_directories: bool,
    /// All mutation operations fail with `ReadOnly`.
    pub read_only: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_append: false,
            supports_empty_directories: true,
            read_only: false,
        }
    }
}

/// Failure policy for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// First failure cancels the remaining siblings and is returned.
    Raise,
    /// Failed entries are dropped silently.
    Omit,
    /// Failed entries carry their error in the result map.
    Return,
}

/// Options for the copy family.
#[derive(Clone, Default)]
pub struct CopyOptions {
    /// Descend into directory sources. A directory source with
    /// `recursive = false` is a no-op, not an error.
    pub recursive: bool,
    /// Cap on recursion depth below each source.
    pub max_depth: Option<usize>,
    /// Create missing intermediate directories. `None` defers to the
    /// process configuration.
    pub auto_mkdir: Option<bool>,
    /// Progress sink for bulk transfers.
    pub callback: Option<Arc<dyn crate::callbacks::Callback>>,
}

impl std::fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOptions")
            .field("recursive", &self.recursive)
            .field("max_depth", &self.max_depth)
            .field("auto_mkdir", &self.auto_mkdir)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl CopyOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }
}

/// One level of a `walk`: the directory, its child directory names, and
/// its child file names (basenames).
pub type WalkLevel = (String, Vec<String>, Vec<String>);

/// The filesystem contract.
///
/// Primitives are the async leaf operations; everything else has a default
/// derivation that a variant may override for efficiency.
#[async_trait]
pub trait Filesystem: Send + Sync + 'static {
    // -- identity ----------------------------------------------------------

    /// Primary protocol name, as registered.
    fn protocol(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// The listing cache, for backends that keep one.
    fn dircache(&self) -> Option<&DirCache> {
        None
    }

    /// The transaction slot, for backends that support deferred commit.
    fn transactions(&self) -> Option<&TransactionState> {
        None
    }

    /// Remove one recognized scheme prefix, yielding the in-FS path.
    fn strip_protocol(&self, p: &str) -> String {
        url::strip_protocol(p)
    }

    /// Inverse of [`strip_protocol`](Self::strip_protocol).
    fn unstrip_protocol(&self, p: &str) -> String {
        url::unstrip_protocol(p, self.protocol())
    }

    // -- primitives --------------------------------------------------------

    /// Entry metadata, or `NotFound`.
    async fn info(&self, p: &str) -> Result<FileEntry>;

    /// Direct children of a directory, deduplicated. Listing a file path
    /// yields that single entry. Order is unspecified but stable within a
    /// call.
    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>>;

    /// Ranged read. Negative offsets count from the end and require the
    /// size to be known; an `end` past EOF short-reads.
    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes>;

    /// Single-shot whole-object write (best-effort atomic).
    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()>;

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, p: &str) -> Result<()>;

    /// Remove a single file.
    async fn rm_file(&self, p: &str) -> Result<()>;

    // -- optional primitives ----------------------------------------------

    /// Same-FS fast-path copy.
    async fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        let data = self.cat_file(src, None, None).await?;
        self.pipe_file(dst, data).await
    }

    /// Download one object to the local disk.
    async fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        let data = self.cat_file(rpath, None, None).await?;
        tokio::fs::write(lpath, &data)
            .await
            .map_err(|e| crate::error::io_error_at(e, &lpath.display().to_string()))
    }

    /// Upload one local file.
    async fn put_file(&self, lpath: &Path, rpath: &str) -> Result<()> {
        let data = tokio::fs::read(lpath)
            .await
            .map_err(|e| crate::error::io_error_at(e, &lpath.display().to_string()))?;
        self.pipe_file(rpath, Bytes::from(data)).await
    }

    /// Begin a multipart upload. Backends without one report
    /// `Unsupported` and writers fall back to `pipe_file`.
    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let _ = (p, mode);
        Err(VfsError::Unsupported("multipart upload"))
    }

    /// Presigned URL for out-of-band access.
    async fn sign(&self, p: &str, expiration_secs: u64) -> Result<String> {
        let _ = (p, expiration_secs);
        Err(VfsError::Unsupported("signing"))
    }

    /// Opaque change detector. The default hashes the entry metadata, so
    /// it changes whenever size or mtime does.
    async fn checksum(&self, p: &str) -> Result<String> {
        let entry = self.info(p).await?;
        if let Some(c) = entry.checksum {
            return Ok(c);
        }
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(entry.name.as_bytes());
        hasher.update(entry.size.unwrap_or(0).to_le_bytes());
        hasher.update(entry.modified.unwrap_or(0).to_le_bytes());
        Ok(hex::encode(&hasher.finalize()[..16]))
    }

    /// Create an empty file, or refresh the mtime of an existing one
    /// where the backend can.
    async fn touch(&self, p: &str, truncate: bool) -> Result<()> {
        if truncate || !self.exists(p).await? {
            self.pipe_file(p, Bytes::new()).await
        } else {
            Ok(())
        }
    }

    /// Drop cached listings for `p` (all of them when `None`).
    fn invalidate_cache(&self, p: Option<&str>) {
        if let Some(cache) = self.dircache() {
            match p {
                Some(p) => cache.invalidate(p),
                None => cache.clear(),
            }
        }
    }

    // -- derived metadata --------------------------------------------------

    async fn exists(&self, p: &str) -> Result<bool> {
        match self.info(p).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn isfile(&self, p: &str) -> Result<bool> {
        match self.info(p).await {
            Ok(entry) => Ok(entry.is_file()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn isdir(&self, p: &str) -> Result<bool> {
        match self.info(p).await {
            Ok(entry) => Ok(entry.is_dir()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, p: &str) -> Result<Option<u64>> {
        Ok(self.info(p).await?.size)
    }

    async fn modified(&self, p: &str) -> Result<Option<i64>> {
        Ok(self.info(p).await?.modified)
    }

    async fn created(&self, p: &str) -> Result<Option<i64>> {
        Ok(self.info(p).await?.created)
    }

    /// Child names only.
    async fn ls_names(&self, p: &str) -> Result<Vec<String>> {
        Ok(self.ls(p).await?.into_iter().map(|e| e.name).collect())
    }

    /// Like [`ls`](Self::ls), bypassing any cached listing.
    async fn ls_refresh(&self, p: &str) -> Result<Vec<FileEntry>> {
        self.invalidate_cache(Some(&self.strip_protocol(p)));
        self.ls(p).await
    }

    // -- traversal ---------------------------------------------------------

    /// Walk the tree from `p`, one [`WalkLevel`] per directory.
    ///
    /// Top-down by default; `max_depth` counts levels below `p` (1 lists
    /// only `p` itself). Listing errors under `OnError::Omit` skip the
    /// directory.
    async fn walk(
        &self,
        p: &str,
        max_depth: Option<usize>,
        top_down: bool,
        on_error: OnError,
    ) -> Result<Vec<WalkLevel>> {
        let root = self.strip_protocol(p);
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((root, 1usize));

        while let Some((dir, level)) = queue.pop_front() {
            let entries = match self.ls(&dir).await {
                Ok(entries) => entries,
                Err(e) => match on_error {
                    OnError::Raise => return Err(e),
                    _ => continue,
                },
            };
            let mut dirs = Vec::new();
            let mut files = Vec::new();
            for entry in entries {
                let base = path::basename(&entry.name).to_string();
                if entry.is_dir() {
                    dirs.push(base);
                } else {
                    files.push(base);
                }
            }
            dirs.sort();
            files.sort();

            let descend = max_depth.map_or(true, |d| level < d);
            if descend {
                for d in &dirs {
                    queue.push_back((path::join(&dir, d), level + 1));
                }
            }
            out.push((dir, dirs, files));
        }

        if !top_down {
            out.reverse();
        }
        Ok(out)
    }

    /// Flat list of file paths under `p`, deterministically sorted.
    /// A file path lists as itself.
    async fn find(&self, p: &str, max_depth: Option<usize>) -> Result<Vec<String>> {
        let root = self.strip_protocol(p);
        match self.info(&root).await {
            Ok(entry) if entry.is_file() => return Ok(vec![root]),
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        let mut out = Vec::new();
        for (dir, _, files) in self.walk(&root, max_depth, true, OnError::Omit).await? {
            for f in files {
                out.push(path::join(&dir, &f));
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Like [`find`](Self::find) with full entries.
    async fn find_detail(&self, p: &str, max_depth: Option<usize>) -> Result<Vec<FileEntry>> {
        let paths = self.find(p, max_depth).await?;
        let futs: Vec<_> = paths.iter().map(|p| self.info(p)).collect();
        let batch = config::config().batch_size(None, false);
        asyn::try_gather(futs, batch).await
    }

    /// Total bytes under `p`.
    async fn du(&self, p: &str, max_depth: Option<usize>) -> Result<u64> {
        Ok(self
            .find_detail(p, max_depth)
            .await?
            .iter()
            .filter_map(|e| e.size)
            .sum())
    }

    /// Per-file byte counts under `p`.
    async fn du_by_path(&self, p: &str, max_depth: Option<usize>) -> Result<BTreeMap<String, u64>> {
        Ok(self
            .find_detail(p, max_depth)
            .await?
            .into_iter()
            .map(|e| (e.name, e.size.unwrap_or(0)))
            .collect())
    }

    /// Paths of files matching a glob pattern, sorted.
    ///
    /// `*`, `?` and bracket classes never cross `/`; `**` greedily does.
    /// A pattern without wildcards returns the path itself when it exists.
    async fn glob(&self, pattern: &str, max_depth: Option<usize>) -> Result<Vec<String>> {
        let pattern = self.strip_protocol(pattern);
        if !glob::has_magic(&pattern) {
            return Ok(if self.exists(&pattern).await? {
                vec![pattern]
            } else {
                Vec::new()
            });
        }
        let root = glob::literal_root(&pattern);
        let depth = match (max_depth, glob::required_depth(&pattern)) {
            (Some(m), Some(r)) => Some(m.min(r)),
            (Some(m), None) => Some(m),
            (None, r) => r,
        };
        let matcher = glob::compile(&pattern)?;
        let mut hits: Vec<String> = self
            .find(&root, depth)
            .await?
            .into_iter()
            .filter(|p| matcher.matches(p))
            .collect();
        hits.sort();
        Ok(hits)
    }

    /// Expand a mixed list of literal paths, globs and directories into
    /// concrete file paths (directories require `recursive`).
    async fn expand_path(
        &self,
        paths: &[&str],
        recursive: bool,
        max_depth: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for p in paths {
            let stripped = self.strip_protocol(p);
            if glob::has_magic(&stripped) {
                out.extend(self.glob(&stripped, max_depth).await?);
            } else if recursive && self.isdir(&stripped).await? {
                out.extend(self.find(&stripped, max_depth).await?);
            } else if self.exists(&stripped).await? {
                out.push(stripped);
            } else {
                return Err(VfsError::NotFound(stripped));
            }
        }
        out.dedup();
        Ok(out)
    }

    // -- bulk reads --------------------------------------------------------

    /// Bulk whole-object read. Per-path results preserve input order even
    /// though execution overlaps.
    async fn cat(
        &self,
        paths: &[&str],
        on_error: OnError,
    ) -> Result<Vec<(String, Result<Bytes>)>> {
        let stripped: Vec<String> = paths.iter().map(|p| self.strip_protocol(p)).collect();
        let futs: Vec<_> = stripped
            .iter()
            .map(|p| self.cat_file(p, None, None))
            .collect();
        let batch = config::config().batch_size(None, false);
        match on_error {
            // Short-circuit so the first failure cancels in-flight siblings.
            OnError::Raise => {
                let values = asyn::try_gather(futs, batch).await?;
                Ok(stripped.into_iter().zip(values.into_iter().map(Ok)).collect())
            }
            _ => {
                let results = asyn::gather(futs, batch).await;
                collect_bulk(stripped, results, on_error)
            }
        }
    }

    /// Bulk ranged read; `starts`/`ends` parallel `paths`.
    async fn cat_ranges(
        &self,
        paths: &[&str],
        starts: &[i64],
        ends: &[i64],
    ) -> Result<Vec<Bytes>> {
        if paths.len() != starts.len() || paths.len() != ends.len() {
            return Err(VfsError::InvalidRange(
                "cat_ranges requires equal-length path/start/end lists".to_string(),
            ));
        }
        let futs: Vec<_> = paths
            .iter()
            .zip(starts.iter().zip(ends))
            .map(|(p, (s, e))| self.cat_file(p, Some(*s), Some(*e)))
            .collect();
        let batch = config::config().batch_size(None, false);
        asyn::try_gather(futs, batch).await
    }

    /// First `n` bytes.
    async fn head(&self, p: &str, n: u64) -> Result<Bytes> {
        self.cat_file(p, Some(0), Some(n as i64)).await
    }

    /// Last `n` bytes.
    async fn tail(&self, p: &str, n: u64) -> Result<Bytes> {
        self.cat_file(p, Some(-(n as i64)), None).await
    }

    /// Read `length` bytes at `offset`, aligned outward to `delimiter`
    /// boundaries when one is given (the block then starts just after a
    /// delimiter and ends just after one, or at EOF).
    async fn read_block(
        &self,
        p: &str,
        offset: u64,
        length: u64,
        delimiter: Option<u8>,
    ) -> Result<Bytes> {
        let Some(delim) = delimiter else {
            return self.cat_file(p, Some(offset as i64), Some((offset + length) as i64)).await;
        };
        let size = self
            .size(p)
            .await?
            .ok_or_else(|| VfsError::InvalidRange(format!("unknown size for {p}")))?;

        let start = if offset == 0 {
            0
        } else {
            // Scan forward from `offset` for the next delimiter.
            let window = self
                .cat_file(p, Some(offset as i64), None)
                .await?;
            match window.iter().position(|b| *b == delim) {
                Some(i) => offset + i as u64 + 1,
                None => return Ok(Bytes::new()),
            }
        };
        let mut end = (start + length).min(size);
        if end < size {
            let window = self.cat_file(p, Some(end as i64), None).await?;
            end = match window.iter().position(|b| *b == delim) {
                Some(i) => end + i as u64 + 1,
                None => size,
            };
        }
        self.cat_file(p, Some(start as i64), Some(end as i64)).await
    }

    // -- bulk writes -------------------------------------------------------

    /// Bulk whole-object write.
    async fn pipe(&self, items: Vec<(String, Bytes)>) -> Result<()> {
        let futs: Vec<_> = items
            .iter()
            .map(|(p, data)| self.pipe_file(p, data.clone()))
            .collect();
        let batch = config::config().batch_size(None, false);
        asyn::try_gather(futs, batch).await?;
        Ok(())
    }

    /// Remove files and directories.
    ///
    /// With `recursive`, directory arguments are expanded; contained files
    /// go first, directories deepest-first after. `max_depth = 1` removes
    /// only direct children.
    async fn rm(&self, paths: &[&str], recursive: bool, max_depth: Option<usize>) -> Result<()> {
        let expanded = self.expand_path(paths, recursive, max_depth).await?;

        let futs: Vec<_> = expanded.iter().map(|p| self.rm_file(p)).collect();
        let batch = config::config().batch_size(None, false);
        asyn::try_gather(futs, batch).await?;

        if recursive {
            // Empty the directory skeletons bottom-up.
            for p in paths {
                let root = self.strip_protocol(p);
                if !self.isdir(&root).await? {
                    continue;
                }
                let mut dirs: Vec<String> = Vec::new();
                for (dir, subdirs, _) in self
                    .walk(&root, max_depth, true, OnError::Omit)
                    .await?
                {
                    for d in subdirs {
                        dirs.push(path::join(&dir, &d));
                    }
                }
                dirs.sort_by_key(|d| std::cmp::Reverse(path::depth(d)));
                for d in dirs {
                    match self.rmdir(&d).await {
                        Ok(()) => {}
                        // Depth-capped removal leaves non-empty parents.
                        Err(VfsError::NotEmpty(_)) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                if max_depth.is_none() {
                    match self.rmdir(&root).await {
                        Ok(()) => {}
                        Err(VfsError::NotEmpty(_)) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    // -- copy family -------------------------------------------------------

    /// Copy within this filesystem, with POSIX `cp` semantics extended by
    /// glob sources and optional parent auto-creation.
    async fn copy(&self, src: &str, dst: &str, opts: &CopyOptions) -> Result<()> {
        let auto_mkdir = opts
            .auto_mkdir
            .unwrap_or_else(|| config::config().auto_mkdir);
        let src_trailing = src.len() > 1 && src.ends_with('/');
        let dst_trailing = dst.len() > 1 && dst.ends_with('/');
        let src_p = self.strip_protocol(src);
        let dst_p = self.strip_protocol(dst);

        if glob::has_magic(&src_p) {
            return self
                .copy_glob(&src_p, &dst_p, opts, auto_mkdir)
                .await;
        }

        if self.isdir(&src_p).await? {
            if !opts.recursive {
                return Ok(());
            }
            return self
                .copy_tree(&src_p, src_trailing, &dst_p, opts.max_depth)
                .await;
        }

        // Single file.
        let target = if dst_trailing || self.isdir(&dst_p).await? {
            if !self.isdir(&dst_p).await? {
                if auto_mkdir || dst_trailing {
                    self.mkdir(&dst_p, true).await?;
                } else {
                    return Err(VfsError::ParentMissing(dst_p));
                }
            }
            path::join(&dst_p, path::basename(&src_p))
        } else {
            dst_p
        };
        let parent = path::parent(&target);
        if !self.isdir(&parent).await? {
            if auto_mkdir {
                self.mkdir(&parent, true).await?;
            } else {
                return Err(VfsError::ParentMissing(parent));
            }
        }
        self.cp_file(&src_p, &target).await
    }

    /// Copy each glob match under `dst`. Relative structure is preserved
    /// iff the pattern ends in `/**` and depth is unbounded; otherwise
    /// matches flatten to their basenames.
    async fn copy_glob(
        &self,
        pattern: &str,
        dst: &str,
        opts: &CopyOptions,
        auto_mkdir: bool,
    ) -> Result<()> {
        let matches = self.glob(pattern, opts.max_depth).await?;
        if matches.is_empty() {
            return Ok(());
        }
        if !self.isdir(dst).await? {
            if auto_mkdir {
                self.mkdir(dst, true).await?;
            } else {
                return Err(VfsError::ParentMissing(dst.to_string()));
            }
        }
        let flatten = !(pattern.ends_with("/**") && opts.max_depth.is_none());
        let root = glob::literal_root(pattern);
        let targets = path::copy_targets(&matches, &root, dst, true, flatten);
        for (m, t) in matches.iter().zip(&targets) {
            let parent = path::parent(t);
            if !self.isdir(&parent).await? {
                self.mkdir(&parent, true).await?;
            }
            self.cp_file(m, t).await?;
        }
        Ok(())
    }

    /// Copy a directory tree. A trailing slash on the source copies the
    /// contents only; without one the directory itself lands under `dst`.
    async fn copy_tree(
        &self,
        src: &str,
        src_trailing: bool,
        dst: &str,
        max_depth: Option<usize>,
    ) -> Result<()> {
        let dst_exists = self.isdir(dst).await?;
        let source_root = if src_trailing || !dst_exists {
            src.to_string()
        } else {
            path::parent(src)
        };
        if !dst_exists {
            self.mkdir(dst, true).await?;
        }
        let files = self.find(src, max_depth).await?;
        let targets = path::copy_targets(&files, &source_root, dst, true, false);
        for (f, t) in files.iter().zip(&targets) {
            let parent = path::parent(t);
            if !self.isdir(&parent).await? {
                self.mkdir(&parent, true).await?;
            }
            self.cp_file(f, t).await?;
        }
        Ok(())
    }

    /// Copy several sources under a directory destination.
    async fn copy_many(&self, srcs: &[&str], dst: &str, opts: &CopyOptions) -> Result<()> {
        let dst_dir = if dst.ends_with('/') {
            dst.to_string()
        } else {
            format!("{dst}/")
        };
        for src in srcs {
            let src = src.trim_end_matches('/');
            self.copy(src, &dst_dir, opts).await?;
        }
        Ok(())
    }

    /// Move: copy then remove the source. Backends with a native rename
    /// should override.
    async fn mv(&self, src: &str, dst: &str, opts: &CopyOptions) -> Result<()> {
        self.copy(src, dst, opts).await?;
        let src_p = self.strip_protocol(src);
        if self.isdir(&src_p).await? {
            if opts.recursive {
                self.rm(&[&src_p], true, None).await?;
            }
        } else {
            self.rm_file(&src_p).await?;
        }
        Ok(())
    }

    /// Download to local disk. Local parent directories are always
    /// created; trailing-slash semantics mirror [`copy`](Self::copy).
    async fn get(&self, rpath: &str, lpath: &Path, opts: &CopyOptions) -> Result<()> {
        let src_trailing = rpath.len() > 1 && rpath.ends_with('/');
        let src_p = self.strip_protocol(rpath);

        let sources = if glob::has_magic(&src_p) {
            self.glob(&src_p, opts.max_depth).await?
        } else if self.isdir(&src_p).await? {
            if !opts.recursive {
                return Ok(());
            }
            self.find(&src_p, opts.max_depth).await?
        } else {
            vec![src_p.clone()]
        };

        let single_file = sources.len() == 1
            && sources[0] == src_p
            && !lpath.is_dir()
            && !lpath.to_string_lossy().ends_with('/');
        if single_file {
            if let Some(parent) = lpath.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            return self.get_file(&sources[0], lpath).await;
        }

        let source_root = if glob::has_magic(&src_p) {
            glob::literal_root(&src_p)
        } else if src_trailing || !lpath.is_dir() {
            src_p.clone()
        } else {
            path::parent(&src_p)
        };
        if let Some(cb) = &opts.callback {
            cb.set_size(sources.len() as u64);
        }
        for src in &sources {
            let rel = path::relative_to(src, &source_root).unwrap_or(path::basename(src));
            let target: PathBuf = lpath.join(rel);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.get_file(src, &target).await?;
            if let Some(cb) = &opts.callback {
                cb.relative_update(1);
            }
        }
        Ok(())
    }

    /// Upload from local disk; the mirror of [`get`](Self::get).
    async fn put(&self, lpath: &Path, rpath: &str, opts: &CopyOptions) -> Result<()> {
        let auto_mkdir = opts.auto_mkdir.unwrap_or(true);
        let dst_trailing = rpath.len() > 1 && rpath.ends_with('/');
        let dst_p = self.strip_protocol(rpath);

        if lpath.is_dir() {
            if !opts.recursive {
                return Ok(());
            }
            let src_trailing = lpath.to_string_lossy().ends_with('/');
            let files = local_find(lpath).await?;
            let base: PathBuf = if src_trailing || !self.isdir(&dst_p).await? {
                lpath.to_path_buf()
            } else {
                lpath.parent().map(Path::to_path_buf).unwrap_or_default()
            };
            if !self.isdir(&dst_p).await? {
                self.mkdir(&dst_p, true).await?;
            }
            if let Some(cb) = &opts.callback {
                cb.set_size(files.len() as u64);
            }
            for f in files {
                let rel = f.strip_prefix(&base).unwrap_or(&f);
                let target = path::join(&dst_p, &rel.to_string_lossy());
                let parent = path::parent(&target);
                if !self.isdir(&parent).await? {
                    self.mkdir(&parent, true).await?;
                }
                self.put_file(&f, &target).await?;
                if let Some(cb) = &opts.callback {
                    cb.relative_update(1);
                }
            }
            return Ok(());
        }

        let target = if dst_trailing || self.isdir(&dst_p).await? {
            if !self.isdir(&dst_p).await? {
                self.mkdir(&dst_p, true).await?;
            }
            let base = lpath
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| VfsError::InvalidPath(lpath.display().to_string()))?;
            path::join(&dst_p, &base)
        } else {
            dst_p
        };
        let parent = path::parent(&target);
        if !self.isdir(&parent).await? {
            if auto_mkdir {
                self.mkdir(&parent, true).await?;
            } else {
                return Err(VfsError::ParentMissing(parent));
            }
        }
        self.put_file(lpath, &target).await
    }
}

/// Apply an [`OnError`] policy to ordered bulk results.
fn collect_bulk<T>(
    keys: Vec<String>,
    results: Vec<Result<T>>,
    on_error: OnError,
) -> Result<Vec<(String, Result<T>)>> {
    let mut out = Vec::with_capacity(keys.len());
    for (key, result) in keys.into_iter().zip(results) {
        match result {
            Ok(v) => out.push((key, Ok(v))),
            Err(e) => match on_error {
                OnError::Raise => return Err(e),
                OnError::Omit => {}
                OnError::Return => out.push((key, Err(e))),
            },
        }
    }
    Ok(out)
}

/// Recursively list the files under a local directory.
async fn local_find(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| crate::error::io_error_at(e, &dir.display().to_string()))?;
        while let Some(entry) = entries.next_entry().await? {
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                stack.push(entry.path());
            } else {
                out.push(entry.path());
            }
        }
    }
    out.sort();
    Ok(out)
}

// ---------------------------------------------------------------------------
// Arc-level helpers

/// How to open a buffered file.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Read-buffer strategy name; `None` takes the configured default.
    pub cache_type: Option<String>,
    pub cache_options: CacheOptions,
    /// Block size for reads and for write-side accumulation.
    pub block_size: Option<usize>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cache_type: None,
            cache_options: CacheOptions::default(),
            block_size: None,
        }
    }
}

/// Range fetcher over a filesystem path, the cold side of every read
/// strategy.
pub struct FsRangeFetcher {
    fs: Arc<dyn Filesystem>,
    path: String,
}

#[async_trait]
impl RangeFetcher for FsRangeFetcher {
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
        self.fs
            .cat_file(&self.path, Some(start as i64), Some(end as i64))
            .await
    }

    async fn total_size(&self) -> Result<Option<u64>> {
        self.fs.size(&self.path).await
    }
}

/// Operations needing a shared handle to the filesystem (open file
/// handles keep a reference back to it).
#[async_trait]
pub trait FilesystemExt {
    /// Open for buffered random-access reading.
    async fn open_read(&self, p: &str, opts: &OpenOptions) -> Result<BufferedReader>;

    /// Open for buffered block-accumulating writing.
    async fn open_write(&self, p: &str, opts: &OpenOptions) -> Result<BufferedWriter>;

    /// Open for append; fails unless the backend supports it.
    async fn open_append(&self, p: &str, opts: &OpenOptions) -> Result<BufferedWriter>;

    /// Begin a transaction on this instance. The guard cancels on drop
    /// unless completed, so an early return inside the region rolls the
    /// deferred writes back.
    fn transaction(&self) -> Result<crate::transaction::TransactionGuard>;

    /// Mapping view over the subtree at `root`.
    async fn get_mapper(&self, root: &str, create: bool) -> Result<crate::mapping::FsMap>;
}

#[async_trait]
impl FilesystemExt for Arc<dyn Filesystem> {
    async fn open_read(&self, p: &str, opts: &OpenOptions) -> Result<BufferedReader> {
        let p = self.strip_protocol(p);
        let entry = self.info(&p).await?;
        if entry.is_dir() {
            return Err(VfsError::IsADirectory(p));
        }
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(FsRangeFetcher {
            fs: Arc::clone(self),
            path: p.clone(),
        });
        let cfg = config::config();
        let cache_name = opts.cache_type.clone().unwrap_or(cfg.cache_type);
        let block_size = opts.block_size.unwrap_or(config::DEFAULT_BLOCK_SIZE);
        let cache = make_cache(
            &cache_name,
            fetcher,
            entry.size,
            block_size,
            &opts.cache_options,
        )?;
        Ok(BufferedReader::new(p, cache, entry.size))
    }

    async fn open_write(&self, p: &str, opts: &OpenOptions) -> Result<BufferedWriter> {
        open_writer(self, p, opts, UploadMode::Overwrite).await
    }

    async fn open_append(&self, p: &str, opts: &OpenOptions) -> Result<BufferedWriter> {
        if !self.capabilities().supports_append {
            return Err(VfsError::Unsupported("append"));
        }
        open_writer(self, p, opts, UploadMode::Append).await
    }

    fn transaction(&self) -> Result<crate::transaction::TransactionGuard> {
        crate::transaction::TransactionGuard::begin(Arc::clone(self))
    }

    async fn get_mapper(&self, root: &str, create: bool) -> Result<crate::mapping::FsMap> {
        crate::mapping::FsMap::new(Arc::clone(self), root, create).await
    }
}

async fn open_writer(
    fs: &Arc<dyn Filesystem>,
    p: &str,
    opts: &OpenOptions,
    mode: UploadMode,
) -> Result<BufferedWriter> {
    if fs.capabilities().read_only {
        return Err(VfsError::ReadOnly(p.to_string()));
    }
    let p = fs.strip_protocol(p);
    let deferred = fs.transactions().map(|t| t.is_active()).unwrap_or(false);
    let block_size = opts.block_size.unwrap_or(config::DEFAULT_BLOCK_SIZE);
    Ok(BufferedWriter::new(
        Arc::clone(fs),
        p,
        block_size,
        mode,
        deferred,
    ))
}
