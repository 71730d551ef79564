//! Open helpers: URL resolution and deferred file handles.
//!
//! `open` resolves a possibly-chained URL to a filesystem and returns an
//! [`OpenFile`], a lightweight description that materializes a real
//! stream on demand. Glob expansion applies in read mode; write mode
//! takes the path literally. Compression layers transparently, inferred
//! from the final suffix unless named.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::RangeFetcher;
use crate::compression;
use crate::error::{Result, VfsError};
use crate::file::{BufferedReader, BufferedWriter};
use crate::fs::{Filesystem, FilesystemExt, OpenOptions, SimpleCacheFs};
use crate::instance;
use crate::url::{self, StorageOptions};

/// Per-protocol options for chained URLs, keyed by protocol name.
pub type ChainOptions = BTreeMap<String, StorageOptions>;

/// Stream mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// Compression selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Compression {
    /// No codec.
    #[default]
    None,
    /// Infer from the path suffix; absent suffix means no codec.
    Infer,
    /// A registered codec by name.
    Named(String),
}

/// Resolve a chained URL to its outermost filesystem and in-FS path.
pub fn url_to_fs(urlpath: &str, options: &ChainOptions) -> Result<(Arc<dyn Filesystem>, String)> {
    let links = url::parse_chain(urlpath, options);
    let outer = url::fold_chain(links);
    let open_path = if outer.path.is_empty() {
        crate::registry::opt_str(&outer.options, "fo").unwrap_or_default()
    } else {
        outer.path.clone()
    };
    let fs = instance::filesystem(&outer.protocol, outer.options)?;
    let stripped = fs.strip_protocol(&open_path);
    Ok((fs, stripped))
}

/// A deferred file handle: everything needed to materialize a stream,
/// without any backend resources held yet.
pub struct OpenFile {
    fs: Arc<dyn Filesystem>,
    path: String,
    mode: OpenMode,
    codec: Option<Arc<dyn compression::Codec>>,
    opts: OpenOptions,
}

impl OpenFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// Full URL naming this handle.
    pub fn url(&self) -> String {
        self.fs.unstrip_protocol(&self.path)
    }

    /// Materialize the stream.
    pub async fn open(&self) -> Result<FileStream> {
        match self.mode {
            OpenMode::Read => {
                let reader = self.fs.open_read(&self.path, &self.opts).await?;
                match &self.codec {
                    None => Ok(FileStream::Read(reader)),
                    Some(codec) => {
                        // Codecs work on whole payloads; decode eagerly and
                        // serve the plaintext from memory.
                        let mut reader = reader;
                        let raw = reader.read(-1).await?;
                        let decoded = codec.decompress(raw)?;
                        let fetcher: Arc<dyn RangeFetcher> =
                            Arc::new(StaticBytes(decoded.clone()));
                        let size = Some(decoded.len() as u64);
                        let cache = crate::cache::make_cache(
                            "none",
                            fetcher,
                            size,
                            1,
                            &self.opts.cache_options,
                        )?;
                        Ok(FileStream::Read(BufferedReader::new(
                            self.path.clone(),
                            cache,
                            size,
                        )))
                    }
                }
            }
            OpenMode::Write | OpenMode::Append => {
                let writer = match self.mode {
                    OpenMode::Write => self.fs.open_write(&self.path, &self.opts).await?,
                    _ => self.fs.open_append(&self.path, &self.opts).await?,
                };
                Ok(FileStream::Write(WriteStream {
                    inner: writer,
                    codec: self.codec.clone(),
                    staged: self.codec.as_ref().map(|_| Vec::new()),
                }))
            }
        }
    }

    /// Convenience: materialize, read everything, close.
    pub async fn read(&self) -> Result<Bytes> {
        match self.open().await? {
            FileStream::Read(mut r) => {
                let data = r.read(-1).await?;
                r.close();
                Ok(data)
            }
            FileStream::Write(_) => Err(VfsError::Unsupported("read on a write-mode handle")),
        }
    }

    /// Convenience: read as UTF-8 text.
    pub async fn read_text(&self) -> Result<String> {
        let raw = self.read().await?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| VfsError::Backend(format!("{} is not valid UTF-8", self.path)))
    }

    /// Convenience: materialize, write the payload, close.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        match self.open().await? {
            FileStream::Write(mut w) => {
                w.write(data).await?;
                w.close().await
            }
            FileStream::Read(_) => Err(VfsError::Unsupported("write on a read-mode handle")),
        }
    }
}

struct StaticBytes(Bytes);

#[async_trait::async_trait]
impl RangeFetcher for StaticBytes {
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let len = self.0.len() as u64;
        let s = start.min(len) as usize;
        let e = end.min(len) as usize;
        Ok(self.0.slice(s..e))
    }

    async fn total_size(&self) -> Result<Option<u64>> {
        Ok(Some(self.0.len() as u64))
    }
}

/// A materialized stream.
pub enum FileStream {
    Read(BufferedReader),
    Write(WriteStream),
}

/// Write stream with optional compression staged in front of the
/// buffered writer.
pub struct WriteStream {
    inner: BufferedWriter,
    codec: Option<Arc<dyn compression::Codec>>,
    staged: Option<Vec<u8>>,
}

impl WriteStream {
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.staged {
            // Compressed payloads must be encoded whole, so stage locally.
            Some(buf) => {
                buf.extend_from_slice(data);
                Ok(data.len())
            }
            None => self.inner.write(data).await,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if let (Some(codec), Some(buf)) = (&self.codec, self.staged.take()) {
            let encoded = codec.compress(Bytes::from(buf))?;
            self.inner.write(&encoded).await?;
        }
        self.inner.close().await
    }

    pub async fn abort(&mut self) -> Result<()> {
        self.staged = None;
        self.inner.abort().await
    }
}

/// Resolve `urlpath` and build a deferred handle.
///
/// In read mode the path may be a glob; the first match opens (use
/// [`open_files`] for all of them). `chain_options` supplies per-protocol
/// options for layered URLs.
pub async fn open(
    urlpath: &str,
    mode: OpenMode,
    compression: Compression,
    chain_options: &ChainOptions,
    opts: &OpenOptions,
) -> Result<OpenFile> {
    let mut files = open_files(urlpath, mode, compression, chain_options, opts).await?;
    match files.len() {
        0 => Err(VfsError::NotFound(urlpath.to_string())),
        _ => Ok(files.remove(0)),
    }
}

/// Plural [`open`]: glob expansion in read mode yields one handle per
/// existing match, ordered; write mode takes the URL as a literal path.
pub async fn open_files(
    urlpath: &str,
    mode: OpenMode,
    compression: Compression,
    chain_options: &ChainOptions,
    opts: &OpenOptions,
) -> Result<Vec<OpenFile>> {
    let (fs, path) = url_to_fs(urlpath, chain_options)?;

    let paths = match mode {
        OpenMode::Read if crate::glob::has_magic(&path) => fs.glob(&path, None).await?,
        _ => vec![path],
    };

    paths
        .into_iter()
        .map(|p| {
            let codec = match &compression {
                Compression::None => None,
                Compression::Infer => compression::infer(&p)
                    .map(|name| compression::get(&name))
                    .transpose()?,
                Compression::Named(name) => Some(compression::get(name)?),
            };
            Ok(OpenFile {
                fs: Arc::clone(&fs),
                path: p,
                mode,
                codec,
                opts: opts.clone(),
            })
        })
        .collect()
}

/// Force materialization on local disk.
///
/// Local targets return their paths directly; anything else is pulled
/// through a whole-file cache wrapper first. The returned paths stay
/// valid as long as the wrapper instance lives, so callers reading them
/// later should hold option-identical URLs (the instance cache keeps the
/// wrapper alive).
pub async fn open_local(urlpath: &str, chain_options: &ChainOptions) -> Result<Vec<PathBuf>> {
    let (fs, path) = url_to_fs(urlpath, chain_options)?;
    let paths = if crate::glob::has_magic(&path) {
        fs.glob(&path, None).await?
    } else {
        vec![path]
    };

    if fs.protocol() == "local" {
        return Ok(paths.into_iter().map(PathBuf::from).collect());
    }

    let cache = SimpleCacheFs::new(fs, None)?;
    let mut out = Vec::with_capacity(paths.len());
    for p in &paths {
        out.push(cache.local_path_of(p).await?);
    }
    // Park the wrapper so its cache directory outlives the returned paths.
    static KEEPALIVE: std::sync::OnceLock<parking_lot::Mutex<Vec<SimpleCacheFs>>> =
        std::sync::OnceLock::new();
    KEEPALIVE
        .get_or_init(|| parking_lot::Mutex::new(Vec::new()))
        .lock()
        .push(cache);
    Ok(out)
}
