//! Key-value mapping projection.
//!
//! Views a subtree as a mapping from relative string keys to byte
//! values. Iteration takes an eager snapshot of the tree; mutating while
//! iterating is on the caller.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, VfsError};
use crate::fs::{Filesystem, OnError};
use crate::path;

/// Mapping view over the subtree at `root`.
pub struct FsMap {
    fs: Arc<dyn Filesystem>,
    root: String,
}

impl FsMap {
    /// Create the view, making the root directory when `create` is set.
    pub async fn new(fs: Arc<dyn Filesystem>, root: &str, create: bool) -> Result<Self> {
        let root = path::canonicalize(&fs.strip_protocol(root))?;
        if create && !fs.exists(&root).await? {
            fs.mkdir(&root, true).await?;
        }
        Ok(Self { fs, root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn key_to_path(&self, key: &str) -> Result<String> {
        let key = key.trim_matches('/');
        if key.is_empty() {
            return Err(VfsError::InvalidPath("empty mapping key".to_string()));
        }
        path::canonicalize(&path::join(&self.root, key))
    }

    fn path_to_key(&self, p: &str) -> Option<String> {
        path::relative_to(p, &self.root).map(str::to_string)
    }

    /// Value for `key`; missing keys are `NotFound`.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let p = self.key_to_path(key)?;
        self.fs.cat_file(&p, None, None).await
    }

    /// Store `value` at `key`, creating intermediate directories.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let p = self.key_to_path(key)?;
        let parent = path::parent(&p);
        if !self.fs.isdir(&parent).await? {
            self.fs.mkdir(&parent, true).await?;
        }
        self.fs.pipe_file(&p, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let p = self.key_to_path(key)?;
        self.fs.rm_file(&p).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        let p = self.key_to_path(key)?;
        self.fs.isfile(&p).await
    }

    /// Snapshot of all keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .fs
            .find(&self.root, None)
            .await?
            .iter()
            .filter_map(|p| self.path_to_key(p))
            .collect())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Bulk lookup honoring an error policy.
    pub async fn getitems(
        &self,
        keys: &[&str],
        on_error: OnError,
    ) -> Result<Vec<(String, Result<Bytes>)>> {
        let paths: Vec<String> = keys
            .iter()
            .map(|k| self.key_to_path(k))
            .collect::<Result<_>>()?;
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let fetched = self.fs.cat(&refs, on_error).await?;
        Ok(fetched
            .into_iter()
            .map(|(p, v)| (self.path_to_key(&p).unwrap_or(p), v))
            .collect())
    }

    /// Bulk store.
    pub async fn setitems(&self, items: Vec<(String, Bytes)>) -> Result<()> {
        for (key, value) in items {
            self.set(&key, value).await?;
        }
        Ok(())
    }

    /// Remove every key under the root.
    pub async fn clear(&self) -> Result<()> {
        self.fs.rm(&[self.root.as_str()], true, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::fs::FilesystemExt;

    async fn mapper() -> FsMap {
        let fs = MemoryFs::arc();
        FsMap::new(fs, "/store", true).await.unwrap()
    }

    #[tokio::test]
    async fn set_get_delete() {
        let m = mapper().await;
        m.set("alpha", Bytes::from_static(b"1")).await.unwrap();
        m.set("nested/beta", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(&m.get("alpha").await.unwrap()[..], b"1");
        assert_eq!(&m.get("nested/beta").await.unwrap()[..], b"2");
        assert!(m.contains("alpha").await.unwrap());
        m.delete("alpha").await.unwrap();
        assert!(!m.contains("alpha").await.unwrap());
        assert!(matches!(m.get("alpha").await, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn keys_are_relative_and_sorted() {
        let m = mapper().await;
        m.set("b", Bytes::from_static(b"x")).await.unwrap();
        m.set("a/inner", Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(m.keys().await.unwrap(), vec!["a/inner", "b"]);
        assert_eq!(m.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bulk_get_honors_policy() {
        let m = mapper().await;
        m.set("k1", Bytes::from_static(b"1")).await.unwrap();
        let got = m.getitems(&["k1", "missing"], OnError::Omit).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "k1");
    }

    #[tokio::test]
    async fn clear_empties_the_subtree() {
        let m = mapper().await;
        m.set("x/y", Bytes::from_static(b"v")).await.unwrap();
        m.clear().await.unwrap();
        assert_eq!(m.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ext_constructor() {
        let fs = MemoryFs::arc();
        let m = fs.get_mapper("/kv", true).await.unwrap();
        m.set("key", Bytes::from_static(b"val")).await.unwrap();
        assert!(fs.isfile("/kv/key").await.unwrap());
    }
}
