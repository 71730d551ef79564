//! Blocking façade over the async core.
//!
//! `SyncVfs` mirrors the filesystem surface method-for-method, running
//! each coroutine on the dedicated I/O loop via [`crate::asyn::sync`].
//! Async-native callers skip this layer entirely and await the
//! [`Filesystem`] futures on their own runtime.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::asyn;
use crate::error::{Result, VfsError};
use crate::file::{BufferedReader, BufferedWriter};
use crate::fs::{
    CopyOptions, FileEntry, Filesystem, FilesystemExt, OnError, OpenOptions, WalkLevel,
};

/// Synchronous filesystem handle.
///
/// Safe to share and call from many threads; every call queues into the
/// single I/O loop. An optional timeout caps each call, cancelling the
/// coroutine on expiry.
#[derive(Clone)]
pub struct SyncVfs {
    fs: Arc<dyn Filesystem>,
    timeout: Option<Duration>,
}

impl SyncVfs {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs, timeout: None }
    }

    pub fn with_timeout(fs: Arc<dyn Filesystem>, timeout: Duration) -> Self {
        Self {
            fs,
            timeout: Some(timeout),
        }
    }

    /// The wrapped async filesystem.
    pub fn inner(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        asyn::sync(fut, self.timeout)
    }

    pub fn info(&self, p: &str) -> Result<FileEntry> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.info(&p).await })
    }

    pub fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.ls(&p).await })
    }

    pub fn exists(&self, p: &str) -> Result<bool> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.exists(&p).await })
    }

    pub fn isfile(&self, p: &str) -> Result<bool> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.isfile(&p).await })
    }

    pub fn isdir(&self, p: &str) -> Result<bool> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.isdir(&p).await })
    }

    pub fn size(&self, p: &str) -> Result<Option<u64>> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.size(&p).await })
    }

    pub fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.cat_file(&p, start, end).await })
    }

    pub fn cat(&self, paths: &[&str], on_error: OnError) -> Result<Vec<(String, Result<Bytes>)>> {
        let fs = Arc::clone(&self.fs);
        let paths: Vec<String> = paths.iter().map(|s| s.to_string()).collect();
        self.run(async move {
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            fs.cat(&refs, on_error).await
        })
    }

    pub fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.pipe_file(&p, data).await })
    }

    pub fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.mkdir(&p, create_parents).await })
    }

    pub fn rmdir(&self, p: &str) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.rmdir(&p).await })
    }

    pub fn rm_file(&self, p: &str) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.rm_file(&p).await })
    }

    pub fn rm(&self, paths: &[&str], recursive: bool, max_depth: Option<usize>) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let paths: Vec<String> = paths.iter().map(|s| s.to_string()).collect();
        self.run(async move {
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            fs.rm(&refs, recursive, max_depth).await
        })
    }

    pub fn copy(&self, src: &str, dst: &str, opts: &CopyOptions) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let (src, dst, opts) = (src.to_string(), dst.to_string(), opts.clone());
        self.run(async move { fs.copy(&src, &dst, &opts).await })
    }

    pub fn mv(&self, src: &str, dst: &str, opts: &CopyOptions) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let (src, dst, opts) = (src.to_string(), dst.to_string(), opts.clone());
        self.run(async move { fs.mv(&src, &dst, &opts).await })
    }

    pub fn get(&self, rpath: &str, lpath: &Path, opts: &CopyOptions) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let (rpath, lpath, opts) = (rpath.to_string(), lpath.to_path_buf(), opts.clone());
        self.run(async move { fs.get(&rpath, &lpath, &opts).await })
    }

    pub fn put(&self, lpath: &Path, rpath: &str, opts: &CopyOptions) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let (lpath, rpath, opts) = (lpath.to_path_buf(), rpath.to_string(), opts.clone());
        self.run(async move { fs.put(&lpath, &rpath, &opts).await })
    }

    pub fn glob(&self, pattern: &str, max_depth: Option<usize>) -> Result<Vec<String>> {
        let fs = Arc::clone(&self.fs);
        let pattern = pattern.to_string();
        self.run(async move { fs.glob(&pattern, max_depth).await })
    }

    pub fn find(&self, p: &str, max_depth: Option<usize>) -> Result<Vec<String>> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.find(&p, max_depth).await })
    }

    pub fn walk(
        &self,
        p: &str,
        max_depth: Option<usize>,
        top_down: bool,
        on_error: OnError,
    ) -> Result<Vec<WalkLevel>> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.walk(&p, max_depth, top_down, on_error).await })
    }

    pub fn du(&self, p: &str, max_depth: Option<usize>) -> Result<u64> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.du(&p, max_depth).await })
    }

    pub fn touch(&self, p: &str, truncate: bool) -> Result<()> {
        let fs = Arc::clone(&self.fs);
        let p = p.to_string();
        self.run(async move { fs.touch(&p, truncate).await })
    }

    /// Open for reading as a blocking [`std::io::Read`] + `Seek` stream.
    pub fn open_read(&self, p: &str, opts: &OpenOptions) -> Result<SyncReader> {
        let fs = Arc::clone(&self.fs);
        let (p, opts) = (p.to_string(), opts.clone());
        let reader = self.run(async move { fs.open_read(&p, &opts).await })?;
        Ok(SyncReader {
            inner: Some(reader),
            timeout: self.timeout,
        })
    }

    /// Open for writing as a blocking [`std::io::Write`] stream. Call
    /// [`SyncWriter::close`] to commit.
    pub fn open_write(&self, p: &str, opts: &OpenOptions) -> Result<SyncWriter> {
        let fs = Arc::clone(&self.fs);
        let (p, opts) = (p.to_string(), opts.clone());
        let writer = self.run(async move { fs.open_write(&p, &opts).await })?;
        Ok(SyncWriter {
            inner: Some(writer),
            timeout: self.timeout,
        })
    }
}

/// Blocking reader over a buffered file.
pub struct SyncReader {
    // Taken while a call is in flight on the loop; None afterwards only
    // if the call failed hard.
    inner: Option<BufferedReader>,
    timeout: Option<Duration>,
}

impl SyncReader {
    fn with<T, F, Fut>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(BufferedReader) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = (BufferedReader, Result<T>)> + Send + 'static,
        T: Send + 'static,
    {
        let reader = self.inner.take().ok_or(VfsError::Closed)?;
        let (reader, result) = asyn::sync(
            async move {
                let out = f(reader).await;
                Ok(out)
            },
            self.timeout,
        )?;
        self.inner = Some(reader);
        result
    }

    pub fn tell(&self) -> u64 {
        self.inner.as_ref().map(|r| r.tell()).unwrap_or(0)
    }

    pub fn size(&self) -> Option<u64> {
        self.inner.as_ref().and_then(|r| r.size())
    }

    pub fn close(&mut self) {
        if let Some(mut reader) = self.inner.take() {
            reader.close();
        }
    }
}

impl std::io::Read for SyncReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let want = buf.len() as i64;
        let data = self
            .with(move |mut r| async move {
                let out = r.read(want).await;
                (r, out)
            })
            .map_err(std::io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl std::io::Seek for SyncReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let reader = self.inner.as_mut().ok_or_else(|| {
            std::io::Error::other(VfsError::Closed)
        })?;
        reader.seek(pos).map_err(std::io::Error::other)
    }
}

/// Blocking writer over a buffered file.
pub struct SyncWriter {
    inner: Option<BufferedWriter>,
    timeout: Option<Duration>,
}

impl SyncWriter {
    fn with<T, F, Fut>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(BufferedWriter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = (BufferedWriter, Result<T>)> + Send + 'static,
        T: Send + 'static,
    {
        let writer = self.inner.take().ok_or(VfsError::Closed)?;
        let (writer, result) = asyn::sync(
            async move {
                let out = f(writer).await;
                Ok(out)
            },
            self.timeout,
        )?;
        self.inner = Some(writer);
        result
    }

    /// Flush the tail and commit the object.
    pub fn close(&mut self) -> Result<()> {
        self.with(|mut w| async move {
            let out = w.close().await;
            (w, out)
        })
    }

    /// Cancel the upload, leaving the target untouched.
    pub fn abort(&mut self) -> Result<()> {
        self.with(|mut w| async move {
            let out = w.abort().await;
            (w, out)
        })
    }
}

impl std::io::Write for SyncWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let owned = buf.to_vec();
        self.with(move |mut w| async move {
            let out = w.write(&owned).await;
            (w, out)
        })
        .map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Full blocks stream out as they form; the tail lands at close.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use std::io::{Read, Seek, Write};

    #[test]
    fn sync_surface_round_trip() {
        let vfs = SyncVfs::new(MemoryFs::arc());
        vfs.mkdir("/d", false).unwrap();
        vfs.pipe_file("/d/f", Bytes::from_static(b"hello sync")).unwrap();
        assert!(vfs.exists("/d/f").unwrap());
        assert_eq!(vfs.size("/d/f").unwrap(), Some(10));
        assert_eq!(&vfs.cat_file("/d/f", Some(6), None).unwrap()[..], b"sync");
        assert_eq!(vfs.find("/", None).unwrap(), vec!["/d/f"]);
        vfs.rm(&["/d"], true, None).unwrap();
        assert!(!vfs.exists("/d").unwrap());
    }

    #[test]
    fn sync_streams_implement_std_io() {
        let vfs = SyncVfs::new(MemoryFs::arc());

        let mut w = vfs.open_write("/blob", &OpenOptions::default()).unwrap();
        w.write_all(b"0123456789").unwrap();
        w.close().unwrap();

        let mut r = vfs.open_read("/blob", &OpenOptions::default()).unwrap();
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"0123");
        r.seek(SeekFrom::Start(6)).unwrap();
        let mut rest = String::new();
        r.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "6789");
        r.close();
    }

    #[test]
    fn many_threads_share_the_loop() {
        let vfs = SyncVfs::new(MemoryFs::arc());
        vfs.mkdir("/t", false).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let vfs = vfs.clone();
                std::thread::spawn(move || {
                    let p = format!("/t/f{i}");
                    vfs.pipe_file(&p, Bytes::from(vec![i as u8; 10])).unwrap();
                    vfs.cat_file(&p, None, None).unwrap().len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 10);
        }
        assert_eq!(vfs.find("/t", None).unwrap().len(), 8);
    }
}
