//! Local-disk filesystem.
//!
//! Paths map directly onto host paths. Whole-object writes go through a
//! temporary file in the target directory and rename into place, so
//! readers never observe a half-written object.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{Capabilities, FileEntry, FileType, Filesystem};
use crate::error::{io_error_at, Result, VfsError};
use crate::file::{ChunkUploader, UploadMode};
use crate::path;
use crate::transaction::TransactionState;

/// A filesystem over the host disk.
pub struct LocalFs {
    transactions: TransactionState,
    /// Create missing parent directories on write instead of failing.
    auto_mkdir: bool,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFs {
    pub fn new() -> Self {
        Self {
            transactions: TransactionState::new(),
            auto_mkdir: false,
        }
    }

    pub fn with_auto_mkdir(auto_mkdir: bool) -> Self {
        Self {
            transactions: TransactionState::new(),
            auto_mkdir,
        }
    }

    /// Shared handle.
    pub fn arc() -> std::sync::Arc<dyn Filesystem> {
        std::sync::Arc::new(Self::new())
    }

    fn host_path(&self, p: &str) -> PathBuf {
        PathBuf::from(p)
    }

    fn metadata_to_entry(p: &str, metadata: &std::fs::Metadata) -> FileEntry {
        let file_type = if metadata.is_dir() {
            FileType::Directory
        } else if metadata.file_type().is_symlink() {
            FileType::Link
        } else if metadata.is_file() {
            FileType::File
        } else {
            FileType::Other
        };
        let size = (file_type == FileType::File).then(|| metadata.len());
        let mut entry = FileEntry::new(p, file_type, size);
        entry.modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        entry.created = metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        entry
    }

    async fn ensure_parent(&self, p: &str) -> Result<()> {
        let parent = path::parent(p);
        let host = self.host_path(&parent);
        if fs::metadata(&host).await.is_ok() {
            return Ok(());
        }
        if self.auto_mkdir {
            fs::create_dir_all(&host)
                .await
                .map_err(|e| io_error_at(e, &parent))?;
            Ok(())
        } else {
            Err(VfsError::ParentMissing(parent))
        }
    }
}

#[async_trait]
impl Filesystem for LocalFs {
    fn protocol(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_append: true,
            supports_empty_directories: true,
            read_only: false,
        }
    }

    fn transactions(&self) -> Option<&TransactionState> {
        Some(&self.transactions)
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let metadata = fs::symlink_metadata(self.host_path(&p))
            .await
            .map_err(|e| io_error_at(e, &p))?;
        Ok(Self::metadata_to_entry(&p, &metadata))
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let host = self.host_path(&p);
        let metadata = fs::metadata(&host).await.map_err(|e| io_error_at(e, &p))?;
        if !metadata.is_dir() {
            return Ok(vec![Self::metadata_to_entry(&p, &metadata)]);
        }

        let mut dir = fs::read_dir(&host).await.map_err(|e| io_error_at(e, &p))?;
        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(VfsError::Io)? {
            let name = item.file_name();
            let child = path::join(&p, &name.to_string_lossy());
            match item.metadata().await {
                Ok(metadata) => entries.push(Self::metadata_to_entry(&child, &metadata)),
                // Raced with a concurrent delete; skip the ghost.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(VfsError::Io(e)),
            }
        }
        Ok(entries)
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let mut file = fs::File::open(self.host_path(&p))
            .await
            .map_err(|e| io_error_at(e, &p))?;
        let size = file.metadata().await.map_err(VfsError::Io)?.len();
        let (s, e) = path::resolve_range(size, start, end)?;
        if s == e {
            return Ok(Bytes::new());
        }
        file.seek(std::io::SeekFrom::Start(s)).await?;
        let mut buf = vec![0u8; (e - s) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        self.ensure_parent(&p).await?;
        let host = self.host_path(&p);
        let dir = host
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let (tmp, tmp_path) = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| io_error_at(e, &p))?
            .into_parts();
        let mut file = fs::File::from_std(tmp);
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);
        tmp_path
            .persist(&host)
            .map_err(|e| io_error_at(e.error, &p))?;
        Ok(())
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        let host = self.host_path(&p);
        let result = if create_parents {
            fs::create_dir_all(&host).await
        } else {
            fs::create_dir(&host).await
        };
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::ParentMissing(path::parent(&p)),
            _ => io_error_at(e, &p),
        })
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        fs::remove_dir(self.host_path(&p)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::DirectoryNotEmpty {
                VfsError::NotEmpty(p.clone())
            } else {
                io_error_at(e, &p)
            }
        })
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        fs::remove_file(self.host_path(&p))
            .await
            .map_err(|e| io_error_at(e, &p))
    }

    async fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        let src = path::canonicalize(&self.strip_protocol(src))?;
        let dst = path::canonicalize(&self.strip_protocol(dst))?;
        fs::copy(self.host_path(&src), self.host_path(&dst))
            .await
            .map_err(|e| io_error_at(e, &src))?;
        Ok(())
    }

    async fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        let rpath = path::canonicalize(&self.strip_protocol(rpath))?;
        fs::copy(self.host_path(&rpath), lpath)
            .await
            .map_err(|e| io_error_at(e, &rpath))?;
        Ok(())
    }

    async fn put_file(&self, lpath: &Path, rpath: &str) -> Result<()> {
        let rpath = path::canonicalize(&self.strip_protocol(rpath))?;
        self.ensure_parent(&rpath).await?;
        fs::copy(lpath, self.host_path(&rpath))
            .await
            .map_err(|e| io_error_at(e, &lpath.display().to_string()))?;
        Ok(())
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        self.ensure_parent(&p).await?;
        let host = self.host_path(&p);
        match mode {
            UploadMode::Overwrite => {
                let dir = host
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("/"));
                let (tmp, tmp_path) = tempfile::NamedTempFile::new_in(&dir)
                    .map_err(|e| io_error_at(e, &p))?
                    .into_parts();
                Ok(Box::new(LocalUploader {
                    file: Some(fs::File::from_std(tmp)),
                    tmp_path: Some(tmp_path),
                    target: host,
                    display: p,
                }))
            }
            UploadMode::Append => {
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&host)
                    .await
                    .map_err(|e| io_error_at(e, &p))?;
                Ok(Box::new(LocalUploader {
                    file: Some(file),
                    tmp_path: None,
                    target: host,
                    display: p,
                }))
            }
        }
    }

    async fn mv(&self, src: &str, dst: &str, opts: &super::CopyOptions) -> Result<()> {
        let src_p = path::canonicalize(&self.strip_protocol(src))?;
        let dst_p = path::canonicalize(&self.strip_protocol(dst))?;
        // Native rename fast path when the target is an exact destination.
        let dst_is_dir = self.isdir(&dst_p).await?;
        if !dst.ends_with('/') && !dst_is_dir {
            if fs::rename(self.host_path(&src_p), self.host_path(&dst_p))
                .await
                .is_ok()
            {
                return Ok(());
            }
        }
        self.copy(src, dst, opts).await?;
        if self.isdir(&src_p).await? {
            if opts.recursive {
                self.rm(&[src_p.as_str()], true, None).await?;
            }
        } else {
            self.rm_file(&src_p).await?;
        }
        Ok(())
    }
}

/// Chunked writer: overwrite mode lands in a temp file renamed into place
/// on the final chunk, append mode writes straight through.
struct LocalUploader {
    file: Option<fs::File>,
    tmp_path: Option<tempfile::TempPath>,
    target: PathBuf,
    display: String,
}

#[async_trait]
impl ChunkUploader for LocalUploader {
    async fn upload_chunk(&mut self, _index: usize, data: Bytes, is_final: bool) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or(VfsError::Closed)?;
        file.write_all(&data).await?;
        if is_final {
            file.flush().await?;
            self.file = None;
            if let Some(tmp_path) = self.tmp_path.take() {
                tmp_path
                    .persist(&self.target)
                    .map_err(|e| io_error_at(e.error, &self.display))?;
            }
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.file = None;
        // Dropping the TempPath unlinks the partial file.
        self.tmp_path = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{CopyOptions, FilesystemExt, OpenOptions};
    use std::sync::Arc;

    fn vpath(dir: &tempfile::TempDir, rest: &str) -> String {
        format!("{}/{rest}", dir.path().display())
    }

    #[tokio::test]
    async fn pipe_cat_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let p = vpath(&dir, "f.bin");
        fs.pipe_file(&p, Bytes::from_static(b"on disk")).await.unwrap();
        assert_eq!(&fs.cat_file(&p, None, None).await.unwrap()[..], b"on disk");
        assert_eq!(&fs.cat_file(&p, Some(3), Some(-1)).await.unwrap()[..], b"dis");
    }

    #[tokio::test]
    async fn pipe_requires_parent_without_auto_mkdir() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let p = vpath(&dir, "no/such/f");
        assert!(matches!(
            fs.pipe_file(&p, Bytes::new()).await,
            Err(VfsError::ParentMissing(_))
        ));

        let auto: Arc<dyn Filesystem> = Arc::new(LocalFs::with_auto_mkdir(true));
        auto.pipe_file(&p, Bytes::from_static(b"ok")).await.unwrap();
        assert!(auto.isfile(&p).await.unwrap());
    }

    #[tokio::test]
    async fn ls_info_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        fs.mkdir(&vpath(&dir, "sub"), false).await.unwrap();
        fs.pipe_file(&vpath(&dir, "a"), Bytes::from_static(b"1")).await.unwrap();
        fs.pipe_file(&vpath(&dir, "sub/b"), Bytes::from_static(b"22")).await.unwrap();

        let root = dir.path().display().to_string();
        let mut names = fs.ls_names(&root).await.unwrap();
        names.sort();
        assert_eq!(names, vec![vpath(&dir, "a"), vpath(&dir, "sub")]);

        let found = fs.find(&root, None).await.unwrap();
        assert_eq!(found, vec![vpath(&dir, "a"), vpath(&dir, "sub/b")]);

        let info = fs.info(&vpath(&dir, "sub/b")).await.unwrap();
        assert_eq!(info.size, Some(2));
        assert!(info.modified.is_some());
    }

    #[tokio::test]
    async fn file_url_scheme_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let p = vpath(&dir, "schemed");
        fs.pipe_file(&format!("local://{p}"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(fs.exists(&p).await.unwrap());
    }

    #[tokio::test]
    async fn chunked_upload_is_invisible_until_final() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let p = vpath(&dir, "big");
        let opts = OpenOptions { block_size: Some(128), ..OpenOptions::default() };
        let mut w = fs.open_write(&p, &opts).await.unwrap();
        w.write(&[9u8; 300]).await.unwrap();
        assert!(w.upload_started());
        assert!(!fs.exists(&p).await.unwrap());
        w.close().await.unwrap();
        assert_eq!(fs.size(&p).await.unwrap(), Some(300));
    }

    #[tokio::test]
    async fn append_mode_extends() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let p = vpath(&dir, "log");
        fs.pipe_file(&p, Bytes::from_static(b"a")).await.unwrap();
        let mut w = fs.open_append(&p, &OpenOptions::default()).await.unwrap();
        w.write(b"bc").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&fs.cat_file(&p, None, None).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();

        let local = src_dir.path().join("payload");
        tokio::fs::write(&local, b"round trip").await.unwrap();

        let remote = vpath(&dst_dir, "stored");
        fs.put(&local, &remote, &CopyOptions::default()).await.unwrap();

        let back = src_dir.path().join("returned");
        fs.get(&remote, &back, &CopyOptions::default()).await.unwrap();
        assert_eq!(tokio::fs::read(&back).await.unwrap(), b"round trip");
    }

    #[tokio::test]
    async fn mv_renames_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        let a = vpath(&dir, "a");
        let b = vpath(&dir, "b");
        fs.pipe_file(&a, Bytes::from_static(b"move me")).await.unwrap();
        fs.mv(&a, &b, &CopyOptions::default()).await.unwrap();
        assert!(!fs.exists(&a).await.unwrap());
        assert_eq!(&fs.cat_file(&b, None, None).await.unwrap()[..], b"move me");
    }

    #[tokio::test]
    async fn rmdir_nonempty_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn Filesystem> = LocalFs::arc();
        fs.mkdir(&vpath(&dir, "d"), false).await.unwrap();
        fs.pipe_file(&vpath(&dir, "d/f"), Bytes::new()).await.unwrap();
        assert!(fs.rmdir(&vpath(&dir, "d")).await.is_err());
        fs.rm(&[vpath(&dir, "d").as_str()], true, None).await.unwrap();
        assert!(!fs.exists(&vpath(&dir, "d")).await.unwrap());
    }
}
