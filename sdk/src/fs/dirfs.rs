//! Directory-prefix wrapper.
//!
//! Chroots an inner filesystem at a subtree: every path through the
//! wrapper is translated under the prefix on the way in and stripped on
//! the way out. Stackable like any other wrapper.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Capabilities, FileEntry, Filesystem};
use crate::error::{Result, VfsError};
use crate::file::{ChunkUploader, UploadMode};
use crate::path;
use crate::transaction::TransactionState;

/// A view of an inner filesystem rooted at `prefix`.
pub struct DirFs {
    inner: Arc<dyn Filesystem>,
    prefix: String,
}

impl DirFs {
    pub fn new(inner: Arc<dyn Filesystem>, prefix: &str) -> Result<Self> {
        let prefix = path::canonicalize(&inner.strip_protocol(prefix))?;
        Ok(Self { inner, prefix })
    }

    pub fn inner(&self) -> &Arc<dyn Filesystem> {
        &self.inner
    }

    fn to_inner(&self, p: &str) -> Result<String> {
        let p = path::canonicalize(&self.strip_protocol(p))?;
        Ok(path::join(&self.prefix, &p))
    }

    fn from_inner(&self, name: &str) -> String {
        match path::relative_to(name, &self.prefix) {
            Some("") | None => "/".to_string(),
            Some(rel) => format!("/{rel}"),
        }
    }

    fn translate_entry(&self, mut entry: FileEntry) -> FileEntry {
        entry.name = self.from_inner(&entry.name);
        entry
    }
}

#[async_trait]
impl Filesystem for DirFs {
    fn protocol(&self) -> &'static str {
        "dir"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn transactions(&self) -> Option<&TransactionState> {
        self.inner.transactions()
    }

    async fn info(&self, p: &str) -> Result<FileEntry> {
        let inner_path = self.to_inner(p)?;
        let entry = self.inner.info(&inner_path).await.map_err(|e| match e {
            VfsError::NotFound(p) => VfsError::NotFound(self.from_inner(&p)),
            other => other,
        })?;
        Ok(self.translate_entry(entry))
    }

    async fn ls(&self, p: &str) -> Result<Vec<FileEntry>> {
        let inner_path = self.to_inner(p)?;
        Ok(self
            .inner
            .ls(&inner_path)
            .await?
            .into_iter()
            .map(|e| self.translate_entry(e))
            .collect())
    }

    async fn cat_file(&self, p: &str, start: Option<i64>, end: Option<i64>) -> Result<Bytes> {
        self.inner.cat_file(&self.to_inner(p)?, start, end).await
    }

    async fn pipe_file(&self, p: &str, data: Bytes) -> Result<()> {
        self.inner.pipe_file(&self.to_inner(p)?, data).await
    }

    async fn mkdir(&self, p: &str, create_parents: bool) -> Result<()> {
        self.inner.mkdir(&self.to_inner(p)?, create_parents).await
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        self.inner.rmdir(&self.to_inner(p)?).await
    }

    async fn rm_file(&self, p: &str) -> Result<()> {
        self.inner.rm_file(&self.to_inner(p)?).await
    }

    async fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        self.inner
            .cp_file(&self.to_inner(src)?, &self.to_inner(dst)?)
            .await
    }

    async fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        self.inner.get_file(&self.to_inner(rpath)?, lpath).await
    }

    async fn put_file(&self, lpath: &Path, rpath: &str) -> Result<()> {
        self.inner.put_file(lpath, &self.to_inner(rpath)?).await
    }

    async fn start_upload(&self, p: &str, mode: UploadMode) -> Result<Box<dyn ChunkUploader>> {
        self.inner.start_upload(&self.to_inner(p)?, mode).await
    }
}
