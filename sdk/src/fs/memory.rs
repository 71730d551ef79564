//! In-memory filesystem.
//!
//! The reference backend: a flat map of canonical path to payload plus a
//! set of explicit directory markers. Directories also exist implicitly
//! as prefixes with children, the way object stores emulate them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{Capabilities, FileEntry, FileType, Filesystem};
use crate::dircache::DirCache;
use crate::error::{Result, VfsError};
use crate::file::{ChunkUploader, UploadMode};
use crate::path;
use crate::transaction::TransactionState;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct FileObject {
    data: Bytes,
    created: i64,
    modified: i64,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, FileObject>,
    dirs: BTreeSet<String>,
}

impl State {
    /// A path is a directory if marked explicitly or if anything lives
    /// beneath it.
    fn is_dir(&self, p: &str) -> bool {
        if p == "/" || self.dirs.contains(p) {
            return true;
        }
        let prefix = format!("{p}/");
        self.files.range(p.to_string()..).any(|(k, _)| k.starts_with(&prefix))
            || self.dirs.range(p.to_string()..).any(|k| k.starts_with(&prefix))
    }
}

/// A filesystem held entirely in process memory.
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
    // Shared so detached uploaders can invalidate listings on commit.
    dircache: Arc<DirCache>,
    transactions: TransactionState,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            dircache: Arc::new(DirCache::from_config()),
            transactions: TransactionState::new(),
        }
    }

    /// Shared handle, the form every caller-facing API works with.
    pub fn arc() -> Arc<dyn Filesystem> {
        Arc::new(Self::new())
    }

    fn entry_for(state: &State, p: &str) -> Option<FileEntry> {
        if let Some(obj) = state.files.get(p) {
            let mut entry = FileEntry::new(p, FileType::File, Some(obj.data.len() as u64));
            entry.created = Some(obj.created);
            entry.modified = Some(obj.modified);
            return Some(entry);
        }
        if state.is_dir(p) {
            return Some(FileEntry::new(p, FileType::Directory, None));
        }
        None
    }
}

#[async_trait]
impl Filesystem for MemoryFs {
    fn protocol(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_append: true,
            supports_empty_directories: true,
            read_only: false,
        }
    }

    fn dircache(&self) -> Option<&DirCache> {
        Some(&self.dircache)
    }

    fn transactions(&self) -> Option<&TransactionState> {
        Some(&self.transactions)
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let state = self.state.lock();
        Self::entry_for(&state, &p).ok_or(VfsError::NotFound(p))
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        if let Some(cached) = self.dircache.get(&p) {
            return Ok(cached);
        }

        let entries = {
            let state = self.state.lock();
            if state.files.contains_key(&p) {
                return Ok(vec![Self::entry_for(&state, &p).expect("file present")]);
            }
            if !state.is_dir(&p) {
                return Err(VfsError::NotFound(p));
            }

            let prefix = if p == "/" { "/".to_string() } else { format!("{p}/") };
            let mut children: BTreeSet<String> = BTreeSet::new();
            for name in state
                .files
                .keys()
                .chain(state.dirs.iter())
                .filter(|k| k.starts_with(&prefix) && k.len() > prefix.len())
            {
                let rest = &name[prefix.len()..];
                let child = match rest.find('/') {
                    Some(idx) => &rest[..idx],
                    None => rest,
                };
                children.insert(path::join(&p, child));
            }
            children
                .into_iter()
                .map(|c| Self::entry_for(&state, &c).expect("child present"))
                .collect::<Vec<_>>()
        };

        self.dircache.put(&p, entries.clone());
        Ok(entries)
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let state = self.state.lock();
        let obj = state.files.get(&p).ok_or_else(|| {
            if state.is_dir(&p) {
                VfsError::IsADirectory(p.clone())
            } else {
                VfsError::NotFound(p.clone())
            }
        })?;
        let (s, e) = path::resolve_range(obj.data.len() as u64, start, end)?;
        Ok(obj.data.slice(s as usize..e as usize))
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        if p == "/" {
            return Err(VfsError::InvalidPath(p));
        }
        {
            let mut state = self.state.lock();
            let parent = path::parent(&p);
            if !state.is_dir(&parent) {
                return Err(VfsError::ParentMissing(parent));
            }
            if state.is_dir(&p) {
                return Err(VfsError::IsADirectory(p));
            }
            let now = now_epoch();
            let created = state.files.get(&p).map(|f| f.created).unwrap_or(now);
            state.files.insert(
                p.clone(),
                FileObject {
                    data,
                    created,
                    modified: now,
                },
            );
        }
        self.dircache.invalidate(&p);
        Ok(())
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        if p == "/" {
            return Ok(());
        }
        {
            let mut state = self.state.lock();
            if state.files.contains_key(&p) {
                return Err(VfsError::AlreadyExists(p));
            }
            if state.dirs.contains(&p) {
                if create_parents {
                    // mkdir -p semantics: an existing directory is fine.
                    return Ok(());
                }
                return Err(VfsError::AlreadyExists(p));
            }
            let parent = path::parent(&p);
            if !state.is_dir(&parent) {
                if !create_parents {
                    return Err(VfsError::ParentMissing(parent));
                }
                for ancestor in path::ancestors(&p) {
                    if ancestor != "/" {
                        state.dirs.insert(ancestor);
                    }
                }
            }
            state.dirs.insert(p.clone());
        }
        self.dircache.invalidate(&p);
        Ok(())
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        if p == "/" {
            return Ok(());
        }
        {
            let mut state = self.state.lock();
            if state.files.contains_key(&p) {
                return Err(VfsError::NotADirectory(p));
            }
            let prefix = format!("{p}/");
            let has_children = state.files.keys().any(|k| k.starts_with(&prefix))
                || state.dirs.iter().any(|k| k.starts_with(&prefix));
            if has_children {
                return Err(VfsError::NotEmpty(p));
            }
            if !state.dirs.remove(&p) {
                return Err(VfsError::NotFound(p));
            }
        }
        self.dircache.invalidate(&p);
        Ok(())
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        {
            let mut state = self.state.lock();
            if state.files.remove(&p).is_none() {
                if state.is_dir(&p) {
                    return Err(VfsError::IsADirectory(p));
                }
                return Err(VfsError::NotFound(p));
            }
        }
        self.dircache.invalidate(&p);
        Ok(())
    }

    async fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        let src = path::canonicalize(&self.strip_protocol(src))?;
        let dst = path::canonicalize(&self.strip_protocol(dst))?;
        {
            let mut state = self.state.lock();
            let obj = state
                .files
                .get(&src)
                .cloned()
                .ok_or_else(|| VfsError::NotFound(src.clone()))?;
            let parent = path::parent(&dst);
            if !state.is_dir(&parent) {
                return Err(VfsError::ParentMissing(parent));
            }
            if state.is_dir(&dst) {
                return Err(VfsError::IsADirectory(dst));
            }
            state.files.insert(
                dst.clone(),
                FileObject {
                    modified: now_epoch(),
                    ..obj
                },
            );
        }
        self.dircache.invalidate(&dst);
        Ok(())
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        {
            let state = self.state.lock();
            let parent = path::parent(&p);
            if !state.is_dir(&parent) {
                return Err(VfsError::ParentMissing(parent));
            }
        }
        Ok(Box::new(MemoryUploader {
            state: Arc::clone(&self.state),
            path: p,
            mode,
            staging: Vec::new(),
            cache: Arc::clone(&self.dircache),
        }))
    }
}

struct MemoryUploader {
    state: Arc<Mutex<State>>,
    path: String,
    mode: UploadMode,
    staging: Vec<u8>,
    cache: Arc<DirCache>,
}

#[async_trait]
impl ChunkUploader for MemoryUploader {
    async fn upload_chunk(&mut self, _index: usize, data: Bytes, is_final: bool) -> Result<()> {
        self.staging.extend_from_slice(&data);
        if !is_final {
            return Ok(());
        }
        let mut state = self.state.lock();
        let now = now_epoch();
        let staged = std::mem::take(&mut self.staging);
        let (data, created) = match (self.mode, state.files.get(&self.path)) {
            (UploadMode::Append, Some(existing)) => {
                let mut combined = existing.data.to_vec();
                combined.extend_from_slice(&staged);
                (Bytes::from(combined), existing.created)
            }
            (_, existing) => (
                Bytes::from(staged),
                existing.map(|f| f.created).unwrap_or(now),
            ),
        };
        state.files.insert(
            self.path.clone(),
            FileObject {
                data,
                created,
                modified: now,
            },
        );
        drop(state);
        self.cache.invalidate(&self.path);
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.staging.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{CopyOptions, FilesystemExt, OnError, OpenOptions};

    async fn fixture() -> Arc<dyn Filesystem> {
        let fs = MemoryFs::arc();
        fs.mkdir("/root/b/d", true).await.unwrap();
        fs.pipe_file("/root/a.txt", Bytes::from_static(b"alpha")).await.unwrap();
        fs.pipe_file("/root/b/c.txt", Bytes::from_static(b"charlie")).await.unwrap();
        fs.pipe_file("/root/b/d/e.txt", Bytes::from_static(b"echo")).await.unwrap();
        fs
    }

    #[tokio::test]
    async fn pipe_cat_round_trip_including_empty() {
        let fs = MemoryFs::arc();
        for payload in [&b""[..], b"x", b"hello world"] {
            fs.pipe_file("/f", Bytes::copy_from_slice(payload)).await.unwrap();
            assert_eq!(&fs.cat_file("/f", None, None).await.unwrap()[..], payload);
        }
    }

    #[tokio::test]
    async fn zero_byte_files_exist_with_zero_size() {
        let fs = MemoryFs::arc();
        fs.touch("/empty", true).await.unwrap();
        assert!(fs.exists("/empty").await.unwrap());
        assert_eq!(fs.size("/empty").await.unwrap(), Some(0));
        assert!(fs.cat_file("/empty", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn info_size_matches_cat_len() {
        let fs = fixture().await;
        for p in ["/root/a.txt", "/root/b/c.txt", "/root/b/d/e.txt"] {
            let info = fs.info(p).await.unwrap();
            let data = fs.cat_file(p, None, None).await.unwrap();
            assert_eq!(info.size, Some(data.len() as u64));
        }
    }

    #[tokio::test]
    async fn reads_straddling_eof_short_read() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/f", Bytes::from_static(b"0123456789")).await.unwrap();
        let got = fs.cat_file("/f", Some(8), Some(100)).await.unwrap();
        assert_eq!(&got[..], b"89");
        let beyond = fs.cat_file("/f", Some(50), Some(60)).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn negative_offsets_count_from_end() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/f", Bytes::from_static(b"0123456789")).await.unwrap();
        assert_eq!(&fs.cat_file("/f", Some(-3), None).await.unwrap()[..], b"789");
        assert_eq!(&fs.cat_file("/f", Some(0), Some(-5)).await.unwrap()[..], b"01234");
        assert_eq!(&fs.tail("/f", 2).await.unwrap()[..], b"89");
        assert_eq!(&fs.head("/f", 2).await.unwrap()[..], b"01");
    }

    #[tokio::test]
    async fn ls_lists_direct_children_only() {
        let fs = fixture().await;
        let mut names = fs.ls_names("/root").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["/root/a.txt", "/root/b"]);
        // Listing a file yields the file itself.
        let file_ls = fs.ls("/root/a.txt").await.unwrap();
        assert_eq!(file_ls.len(), 1);
        assert_eq!(file_ls[0].name, "/root/a.txt");
    }

    #[tokio::test]
    async fn ls_is_superset_of_walk_level() {
        let fs = fixture().await;
        let ls: BTreeSet<String> = fs.ls_names("/root").await.unwrap().into_iter().collect();
        let walk = fs.walk("/root", Some(1), true, OnError::Raise).await.unwrap();
        let (dir, dirs, files) = &walk[0];
        for name in dirs.iter().chain(files.iter()) {
            assert!(ls.contains(&path::join(dir, name)));
        }
    }

    #[tokio::test]
    async fn walk_respects_depth_and_order() {
        let fs = fixture().await;
        let top = fs.walk("/root", None, true, OnError::Raise).await.unwrap();
        let dirs: Vec<&str> = top.iter().map(|(d, _, _)| d.as_str()).collect();
        assert_eq!(dirs, vec!["/root", "/root/b", "/root/b/d"]);

        let bottom = fs.walk("/root", None, false, OnError::Raise).await.unwrap();
        let dirs: Vec<&str> = bottom.iter().map(|(d, _, _)| d.as_str()).collect();
        assert_eq!(dirs, vec!["/root/b/d", "/root/b", "/root"]);

        let capped = fs.walk("/root", Some(1), true, OnError::Raise).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn find_is_sorted_files_only_no_dupes() {
        let fs = fixture().await;
        let found = fs.find("/root", None).await.unwrap();
        assert_eq!(found, vec!["/root/a.txt", "/root/b/c.txt", "/root/b/d/e.txt"]);
        let again = fs.find("/root", None).await.unwrap();
        assert_eq!(found, again);
        // A file path finds itself.
        assert_eq!(fs.find("/root/a.txt", None).await.unwrap(), vec!["/root/a.txt"]);
    }

    #[tokio::test]
    async fn glob_recursive_collects_all_depths() {
        let fs = fixture().await;
        let hits = fs.glob("/root/**.txt", Some(3)).await.unwrap();
        assert_eq!(hits, vec!["/root/a.txt", "/root/b/c.txt", "/root/b/d/e.txt"]);
    }

    #[tokio::test]
    async fn glob_star_stays_in_directory() {
        let fs = fixture().await;
        let hits = fs.glob("/root/*", None).await.unwrap();
        assert_eq!(hits, vec!["/root/a.txt"]);
        let deep = fs.glob("/root/*/*.txt", None).await.unwrap();
        assert_eq!(deep, vec!["/root/b/c.txt"]);
    }

    #[tokio::test]
    async fn glob_without_magic_is_existence_check() {
        let fs = fixture().await;
        assert_eq!(fs.glob("/root/a.txt", None).await.unwrap(), vec!["/root/a.txt"]);
        assert!(fs.glob("/root/zzz", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn du_sums_sizes() {
        let fs = fixture().await;
        // alpha(5) + charlie(7) + echo(4)
        assert_eq!(fs.du("/root", None).await.unwrap(), 16);
        let per = fs.du_by_path("/root", None).await.unwrap();
        assert_eq!(per["/root/b/c.txt"], 7);
    }

    #[tokio::test]
    async fn bulk_cat_with_omit_drops_missing() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/p1", Bytes::from_static(b"one")).await.unwrap();
        fs.pipe_file("/p2", Bytes::from_static(b"two")).await.unwrap();
        let got = fs.cat(&["/p1", "/missing", "/p2"], OnError::Omit).await.unwrap();
        let keys: Vec<&str> = got.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/p1", "/p2"]);

        let returned = fs.cat(&["/p1", "/missing"], OnError::Return).await.unwrap();
        assert!(returned[1].1.is_err());

        let raised = fs.cat(&["/p1", "/missing"], OnError::Raise).await;
        assert!(matches!(raised, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn copy_file_into_directory_variants() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/f", Bytes::from_static(b"data")).await.unwrap();
        fs.mkdir("/d", false).await.unwrap();

        // file -> existing dir
        fs.copy("/f", "/d/", &CopyOptions::default()).await.unwrap();
        assert!(fs.isfile("/d/f").await.unwrap());

        // file -> exact file path (overwrite)
        fs.pipe_file("/g", Bytes::from_static(b"old")).await.unwrap();
        fs.copy("/f", "/g", &CopyOptions::default()).await.unwrap();
        assert_eq!(&fs.cat_file("/g", None, None).await.unwrap()[..], b"data");

        // file -> new path ending "/" creates the directory
        fs.copy("/f", "/new/", &CopyOptions::default()).await.unwrap();
        assert!(fs.isfile("/new/f").await.unwrap());

        // file -> missing parent without auto_mkdir fails
        let err = fs.copy("/f", "/no/such/place", &CopyOptions::default()).await;
        assert!(matches!(err, Err(VfsError::ParentMissing(_))));

        // ... and succeeds with auto_mkdir
        let opts = CopyOptions { auto_mkdir: Some(true), ..CopyOptions::default() };
        fs.copy("/f", "/no/such/place", &opts).await.unwrap();
        assert!(fs.isfile("/no/such/place").await.unwrap());
    }

    #[tokio::test]
    async fn cp_file_refuses_directory_destination() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/f", Bytes::from_static(b"data")).await.unwrap();
        fs.mkdir("/empty_dir", false).await.unwrap();
        fs.mkdir("/full_dir", false).await.unwrap();
        fs.pipe_file("/full_dir/child", Bytes::from_static(b"c")).await.unwrap();

        assert!(matches!(
            fs.cp_file("/f", "/empty_dir").await,
            Err(VfsError::IsADirectory(_))
        ));
        assert!(matches!(
            fs.cp_file("/f", "/full_dir").await,
            Err(VfsError::IsADirectory(_))
        ));
        // The directory identity is intact afterwards.
        assert!(fs.isdir("/full_dir").await.unwrap());
        assert_eq!(fs.ls_names("/full_dir").await.unwrap(), vec!["/full_dir/child"]);
    }

    #[tokio::test]
    async fn copy_directory_trailing_slash_vs_without() {
        let fs = MemoryFs::arc();
        fs.mkdir("/src/sub", true).await.unwrap();
        fs.pipe_file("/src/f1", Bytes::from_static(b"1")).await.unwrap();
        fs.pipe_file("/src/sub/f2", Bytes::from_static(b"2")).await.unwrap();
        fs.mkdir("/dst", false).await.unwrap();

        fs.copy("/src/", "/dst/", &CopyOptions::recursive()).await.unwrap();
        assert!(fs.isfile("/dst/f1").await.unwrap());
        assert!(fs.isfile("/dst/sub/f2").await.unwrap());

        let fs2 = MemoryFs::arc();
        fs2.mkdir("/src/sub", true).await.unwrap();
        fs2.pipe_file("/src/f1", Bytes::from_static(b"1")).await.unwrap();
        fs2.pipe_file("/src/sub/f2", Bytes::from_static(b"2")).await.unwrap();
        fs2.mkdir("/dst", false).await.unwrap();

        fs2.copy("/src", "/dst/", &CopyOptions::recursive()).await.unwrap();
        assert!(fs2.isfile("/dst/src/f1").await.unwrap());
        assert!(fs2.isfile("/dst/src/sub/f2").await.unwrap());
    }

    #[tokio::test]
    async fn copy_directory_without_recursive_is_noop() {
        let fs = fixture().await;
        fs.mkdir("/dst", false).await.unwrap();
        fs.copy("/root", "/dst/", &CopyOptions::default()).await.unwrap();
        assert!(fs.ls_names("/dst").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_glob_flattens_unless_doublestar() {
        let fs = fixture().await;
        fs.mkdir("/flat", false).await.unwrap();
        fs.copy("/root/*.txt", "/flat/", &CopyOptions::default()).await.unwrap();
        assert_eq!(fs.find("/flat", None).await.unwrap(), vec!["/flat/a.txt"]);

        fs.mkdir("/tree", false).await.unwrap();
        fs.copy("/root/**", "/tree/", &CopyOptions::default()).await.unwrap();
        assert_eq!(
            fs.find("/tree", None).await.unwrap(),
            vec!["/tree/a.txt", "/tree/b/c.txt", "/tree/b/d/e.txt"]
        );
    }

    #[tokio::test]
    async fn copy_many_places_basenames_under_dst() {
        let fs = fixture().await;
        fs.mkdir("/multi", false).await.unwrap();
        fs.copy_many(&["/root/a.txt", "/root/b"], "/multi", &CopyOptions::recursive())
            .await
            .unwrap();
        assert!(fs.isfile("/multi/a.txt").await.unwrap());
        assert!(fs.isfile("/multi/b/c.txt").await.unwrap());
        assert!(fs.isfile("/multi/b/d/e.txt").await.unwrap());
    }

    #[tokio::test]
    async fn mv_copies_then_removes_source() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/a", Bytes::from_static(b"payload")).await.unwrap();
        fs.mv("/a", "/b", &CopyOptions::default()).await.unwrap();
        assert!(!fs.exists("/a").await.unwrap());
        assert_eq!(&fs.cat_file("/b", None, None).await.unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn rm_recursive_and_depth_capped() {
        let fs = fixture().await;
        // max_depth = 1 removes only direct children of /root/b.
        fs.rm(&["/root/b"], true, Some(1)).await.unwrap();
        assert!(!fs.exists("/root/b/c.txt").await.unwrap());
        assert!(fs.exists("/root/b/d/e.txt").await.unwrap());

        fs.rm(&["/root"], true, None).await.unwrap();
        assert!(!fs.exists("/root").await.unwrap());
    }

    #[tokio::test]
    async fn rmdir_requires_empty() {
        let fs = fixture().await;
        assert!(matches!(fs.rmdir("/root/b").await, Err(VfsError::NotEmpty(_))));
        fs.mkdir("/hollow", false).await.unwrap();
        fs.rmdir("/hollow").await.unwrap();
        assert!(!fs.exists("/hollow").await.unwrap());
    }

    #[tokio::test]
    async fn parent_must_exist_for_pipe() {
        let fs = MemoryFs::arc();
        let err = fs.pipe_file("/no/parent/file", Bytes::new()).await;
        assert!(matches!(err, Err(VfsError::ParentMissing(_))));
    }

    #[tokio::test]
    async fn listing_cache_reflects_writes_and_removals() {
        let fs = MemoryFs::arc();
        fs.mkdir("/d", false).await.unwrap();
        assert!(fs.ls_names("/d").await.unwrap().is_empty());
        fs.pipe_file("/d/new", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(fs.ls_names("/d").await.unwrap(), vec!["/d/new"]);
        fs.rm_file("/d/new").await.unwrap();
        assert!(fs.ls_names("/d").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn buffered_write_then_read_any_block_size() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for block_size in [64usize, 1024, 1 << 20] {
            let fs = MemoryFs::arc();
            let opts = OpenOptions { block_size: Some(block_size), ..OpenOptions::default() };
            let mut w = fs.open_write("/blob", &opts).await.unwrap();
            for chunk in payload.chunks(333) {
                w.write(chunk).await.unwrap();
            }
            w.close().await.unwrap();

            let mut r = fs.open_read("/blob", &opts).await.unwrap();
            let back = r.read(-1).await.unwrap();
            assert_eq!(&back[..], &payload[..], "block_size={block_size}");
        }
    }

    #[tokio::test]
    async fn small_write_skips_multipart() {
        let fs = MemoryFs::arc();
        let opts = OpenOptions { block_size: Some(1 << 20), ..OpenOptions::default() };
        let mut w = fs.open_write("/small", &opts).await.unwrap();
        w.write(b"tiny").await.unwrap();
        assert!(!w.upload_started());
        w.close().await.unwrap();
        assert_eq!(&fs.cat_file("/small", None, None).await.unwrap()[..], b"tiny");
    }

    #[tokio::test]
    async fn large_write_streams_blocks() {
        let fs = MemoryFs::arc();
        let opts = OpenOptions { block_size: Some(100), ..OpenOptions::default() };
        let mut w = fs.open_write("/big", &opts).await.unwrap();
        w.write(&[7u8; 450]).await.unwrap();
        assert!(w.upload_started());
        // Not visible until the final chunk lands.
        assert!(!fs.exists("/big").await.unwrap());
        w.close().await.unwrap();
        assert_eq!(fs.size("/big").await.unwrap(), Some(450));
    }

    #[tokio::test]
    async fn aborted_write_leaves_no_trace() {
        let fs = MemoryFs::arc();
        let opts = OpenOptions { block_size: Some(100), ..OpenOptions::default() };
        let mut w = fs.open_write("/doomed", &opts).await.unwrap();
        w.write(&[1u8; 250]).await.unwrap();
        w.abort().await.unwrap();
        assert!(!fs.exists("/doomed").await.unwrap());
        assert!(matches!(w.write(b"more").await, Err(VfsError::Closed)));
    }

    #[tokio::test]
    async fn append_extends_existing() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/log", Bytes::from_static(b"one,")).await.unwrap();
        let mut w = fs.open_append("/log", &OpenOptions::default()).await.unwrap();
        w.write(b"two").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&fs.cat_file("/log", None, None).await.unwrap()[..], b"one,two");
    }

    #[tokio::test]
    async fn transaction_commit_makes_writes_visible_atomically() {
        let fs = MemoryFs::arc();
        let txn = fs.transaction().unwrap();
        let mut w1 = fs.open_write("/t/one", &OpenOptions::default()).await.unwrap();
        // Deferred writes skip the parent check until commit; create it now.
        fs.mkdir("/t", true).await.unwrap();
        w1.write(b"1").await.unwrap();
        w1.close().await.unwrap();
        let mut w2 = fs.open_write("/t/two", &OpenOptions::default()).await.unwrap();
        w2.write(b"2").await.unwrap();
        w2.close().await.unwrap();

        assert!(!fs.exists("/t/one").await.unwrap());
        assert!(!fs.exists("/t/two").await.unwrap());
        let committed = txn.complete().await.unwrap();
        assert_eq!(committed, vec!["/t/one", "/t/two"]);
        assert!(fs.exists("/t/one").await.unwrap());
        assert!(fs.exists("/t/two").await.unwrap());
    }

    #[tokio::test]
    async fn transaction_rollback_on_early_exit() {
        let fs = MemoryFs::arc();

        async fn write_then_fail(fs: &Arc<dyn Filesystem>) -> Result<()> {
            let _txn = fs.transaction()?;
            let mut w = fs.open_write("/x", &OpenOptions::default()).await?;
            w.write(b"hi").await?;
            w.close().await?;
            Err(VfsError::Backend("simulated failure".into()))
            // _txn drops here and cancels the pending commit.
        }

        assert!(write_then_fail(&fs).await.is_err());
        assert!(!fs.exists("/x").await.unwrap());
    }

    #[tokio::test]
    async fn read_block_aligns_to_delimiter() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/rows", Bytes::from_static(b"aaa\nbbb\nccc\nddd")).await.unwrap();
        // From 0, length 5: extends to the delimiter after offset 5.
        let block = fs.read_block("/rows", 0, 5, Some(b'\n')).await.unwrap();
        assert_eq!(&block[..], b"aaa\nbbb\n");
        // From 1: starts after the first delimiter.
        let block = fs.read_block("/rows", 1, 5, Some(b'\n')).await.unwrap();
        assert_eq!(&block[..], b"bbb\nccc\n");
        // Tail block runs to EOF.
        let block = fs.read_block("/rows", 8, 100, Some(b'\n')).await.unwrap();
        assert_eq!(&block[..], b"ccc\nddd");
        // No delimiter: plain ranged read.
        let block = fs.read_block("/rows", 0, 3, None).await.unwrap();
        assert_eq!(&block[..], b"aaa");
    }

    #[tokio::test]
    async fn checksum_changes_with_content() {
        let fs = MemoryFs::arc();
        fs.pipe_file("/c", Bytes::from_static(b"v1")).await.unwrap();
        let first = fs.checksum("/c").await.unwrap();
        fs.pipe_file("/c", Bytes::from_static(b"longer payload")).await.unwrap();
        let second = fs.checksum("/c").await.unwrap();
        assert_ne!(first, second);
    }
}
