//! Buffered file handles.
//!
//! The read side wraps a [`ReadCache`] strategy over the owning
//! filesystem's range fetcher; seeks never touch the backend. The write
//! side accumulates blocks and commits through the backend's multipart
//! upload, falling back to a single-shot `pipe_file` for payloads smaller
//! than one block.

use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::ReadCache;
use crate::error::{Result, VfsError};
use crate::fs::Filesystem;

/// Handle lifecycle. `Closed` and `Failed` are terminal; any operation on
/// a terminal handle returns [`VfsError::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Open,
    Closing,
    Closed,
    Failed,
}

/// How a write-mode handle lands its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Replace whatever is at the path.
    Overwrite,
    /// Extend the existing object; open fails if the backend cannot.
    Append,
}

/// Backend-side multipart upload in progress.
///
/// Chunks arrive in index order; `is_final` marks the tail (possibly
/// empty). The upload is not visible at its final path until the final
/// chunk lands. `cancel` aborts and leaves nothing behind.
#[async_trait]
pub trait ChunkUploader: Send {
    async fn upload_chunk(&mut self, index: usize, data: Bytes, is_final: bool) -> Result<()>;
    async fn cancel(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Read side

/// Random-access reader with a pluggable byte-range cache.
pub struct BufferedReader {
    path: String,
    cache: Box<dyn ReadCache>,
    size: Option<u64>,
    pos: u64,
    state: FileState,
}

impl BufferedReader {
    pub fn new(path: impl Into<String>, cache: Box<dyn ReadCache>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            cache,
            size,
            pos: 0,
            state: FileState::Open,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Total size, when the backend reported one at open.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Current stream position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn cache_name(&self) -> &'static str {
        self.cache.name()
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            FileState::Open => Ok(()),
            _ => Err(VfsError::Closed),
        }
    }

    /// Reposition the stream. Never touches the backend.
    ///
    /// Seeking from the end requires the size to be known.
    pub fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let target = match whence {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
            SeekFrom::End(d) => {
                let size = self.size.ok_or_else(|| {
                    VfsError::InvalidRange(format!(
                        "seek from end with unknown size: {}",
                        self.path
                    ))
                })?;
                size as i128 + d as i128
            }
        };
        if target < 0 {
            return Err(VfsError::InvalidRange(format!(
                "seek before start of {}",
                self.path
            )));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    /// Read up to `n` bytes from the current position; `-1` reads to EOF.
    /// Short reads past the end are normal, never an error.
    pub async fn read(&mut self, n: i64) -> Result<Bytes> {
        self.check_open()?;
        if n == 0 {
            return Ok(Bytes::new());
        }
        let data = if n < 0 {
            self.read_to_end_from(self.pos).await?
        } else {
            self.cache.fetch(self.pos, self.pos + n as u64).await?
        };
        self.pos += data.len() as u64;
        Ok(data)
    }

    /// Fill `buf` from the current position, returning the byte count.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.read(buf.len() as i64).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn read_to_end_from(&mut self, start: u64) -> Result<Bytes> {
        if let Some(size) = self.size {
            return self.cache.fetch(start, size).await;
        }
        // Unknown size: pull fixed windows until the backend short-reads.
        const WINDOW: u64 = 1 << 20;
        let mut out = Vec::new();
        let mut pos = start;
        loop {
            let chunk = self.cache.fetch(pos, pos + WINDOW).await?;
            let len = chunk.len() as u64;
            out.extend_from_slice(&chunk);
            if len < WINDOW {
                break;
            }
            pos += len;
        }
        Ok(Bytes::from(out))
    }

    pub fn close(&mut self) {
        if self.state == FileState::Open {
            self.cache.close();
            self.state = FileState::Closed;
        }
    }
}

// ---------------------------------------------------------------------------
// Write side

/// What happens to the accumulated bytes at close.
enum CommitPath {
    /// Multipart upload already in flight.
    Chunked(Box<dyn ChunkUploader>),
    /// Nothing sent yet; close decides between `pipe_file` and a deferred
    /// transaction finalizer.
    Pending,
}

/// Block-accumulating writer.
///
/// Bytes below one block stay local; crossing the first block boundary
/// initiates the backend upload and streams full blocks as they complete.
/// `close` flushes the tail; `abort` cancels the upload and leaves the
/// target untouched.
pub struct BufferedWriter {
    fs: Arc<dyn Filesystem>,
    path: String,
    block_size: usize,
    mode: UploadMode,
    buffer: Vec<u8>,
    commit: CommitPath,
    chunk_index: usize,
    bytes_written: u64,
    state: FileState,
    /// Writes inside an active transaction buffer fully and defer the
    /// commit to the transaction queue.
    deferred: bool,
}

impl BufferedWriter {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        path: impl Into<String>,
        block_size: usize,
        mode: UploadMode,
        deferred: bool,
    ) -> Self {
        Self {
            fs,
            path: path.into(),
            block_size: block_size.max(1),
            mode,
            buffer: Vec::new(),
            commit: CommitPath::Pending,
            chunk_index: 0,
            bytes_written: 0,
            state: FileState::Open,
            deferred,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Bytes accepted so far (buffered or uploaded).
    pub fn tell(&self) -> u64 {
        self.bytes_written
    }

    /// True once a multipart upload has been initiated.
    pub fn upload_started(&self) -> bool {
        matches!(self.commit, CommitPath::Chunked(_))
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            FileState::Open => Ok(()),
            _ => Err(VfsError::Closed),
        }
    }

    /// Append bytes, streaming out completed blocks.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        if !self.deferred {
            self.flush_full_blocks().await?;
        }
        Ok(data.len())
    }

    async fn flush_full_blocks(&mut self) -> Result<()> {
        while self.buffer.len() >= self.block_size {
            if matches!(self.commit, CommitPath::Pending) {
                let uploader = self.fs.start_upload(&self.path, self.mode).await?;
                self.commit = CommitPath::Chunked(uploader);
            }
            let rest = self.buffer.split_off(self.block_size);
            let block = std::mem::replace(&mut self.buffer, rest);
            let CommitPath::Chunked(uploader) = &mut self.commit else {
                unreachable!("upload initiated above");
            };
            if let Err(e) = uploader
                .upload_chunk(self.chunk_index, Bytes::from(block), false)
                .await
            {
                self.state = FileState::Failed;
                return Err(e);
            }
            self.chunk_index += 1;
        }
        Ok(())
    }

    /// Shrink the pending payload to `len` bytes.
    ///
    /// Only possible while everything is still local; once blocks have
    /// been uploaded the backend would have to rewrite history.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.check_open()?;
        if self.upload_started() {
            return Err(VfsError::Unsupported(
                "truncate after upload has started",
            ));
        }
        let len = len as usize;
        if len > self.buffer.len() {
            self.buffer.resize(len, 0);
        } else {
            self.buffer.truncate(len);
        }
        self.bytes_written = self.buffer.len() as u64;
        Ok(())
    }

    /// Flush the tail and make the object visible at its final path.
    pub async fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.state = FileState::Closing;
        let tail = std::mem::take(&mut self.buffer);

        let result = match std::mem::replace(&mut self.commit, CommitPath::Pending) {
            CommitPath::Chunked(mut uploader) => {
                uploader
                    .upload_chunk(self.chunk_index, Bytes::from(tail), true)
                    .await
            }
            CommitPath::Pending => {
                let payload = Bytes::from(tail);
                if self.deferred {
                    let fs = Arc::clone(&self.fs);
                    let path = self.path.clone();
                    let mode = self.mode;
                    self.fs
                        .transactions()
                        .ok_or(VfsError::Unsupported("transactions"))
                        .and_then(|txn| {
                            txn.defer(
                                &self.path,
                                Box::new(move || {
                                    Box::pin(async move {
                                        match mode {
                                            UploadMode::Overwrite => {
                                                fs.pipe_file(&path, payload).await
                                            }
                                            UploadMode::Append => {
                                                let mut uploader =
                                                    fs.start_upload(&path, mode).await?;
                                                uploader.upload_chunk(0, payload, true).await
                                            }
                                        }
                                    })
                                }),
                            )
                        })
                } else {
                    match self.mode {
                        UploadMode::Overwrite => {
                            self.fs.pipe_file(&self.path, payload).await
                        }
                        UploadMode::Append => {
                            // Small append still needs the backend's append
                            // path; pipe_file would clobber the prefix.
                            let mut uploader =
                                self.fs.start_upload(&self.path, self.mode).await?;
                            uploader.upload_chunk(0, payload, true).await
                        }
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                self.state = FileState::Closed;
                Ok(())
            }
            Err(e) => {
                self.state = FileState::Failed;
                Err(e)
            }
        }
    }

    /// Abandon the write: cancel any in-flight upload and discard the
    /// buffer. The single-shot fallback never runs on this path.
    pub async fn abort(&mut self) -> Result<()> {
        if matches!(self.state, FileState::Closed | FileState::Failed) {
            return Ok(());
        }
        self.state = FileState::Failed;
        self.buffer.clear();
        if let CommitPath::Chunked(mut uploader) =
            std::mem::replace(&mut self.commit, CommitPath::Pending)
        {
            uploader.cancel().await?;
        }
        Ok(())
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if self.state == FileState::Open && (!self.buffer.is_empty() || self.upload_started()) {
            tracing::warn!(
                path = %self.path,
                "write-mode file dropped without close(); data discarded"
            );
        }
    }
}
