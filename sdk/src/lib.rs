//! unifs: a uniform virtual filesystem over heterogeneous byte stores.
//!
//! One path-oriented contract (`ls`, `cat`, `open`, `cp`, `rm`, `glob`,
//! `walk`, `info`) over pluggable backends (memory, local disk, and
//! anything implementing [`fs::Filesystem`]), with stackable wrappers for
//! caching and directory scoping, buffered random-access files, chained
//! URLs, per-filesystem transactions, and a key-value mapping view.
//!
//! ```no_run
//! # async fn demo() -> unifs::Result<()> {
//! use unifs::Filesystem;
//!
//! let (fs, path) = unifs::url_to_fs("memory://data/hello.txt", &Default::default())?;
//! fs.mkdir("/data", true).await?;
//! fs.pipe_file(&path, "hi".into()).await?;
//! assert_eq!(fs.cat_file(&path, None, None).await?, "hi");
//! # Ok(())
//! # }
//! ```
//!
//! Blocking callers use [`SyncVfs`], which funnels every call through one
//! dedicated I/O loop thread; async callers await the trait methods
//! directly on their own runtime.

pub mod asyn;
pub mod cache;
pub mod callbacks;
pub mod compression;
pub mod config;
pub mod dircache;
pub mod error;
pub mod file;
pub mod fs;
pub mod glob;
pub mod instance;
pub mod mapping;
pub mod open;
pub mod path;
pub mod registry;
pub mod sync;
pub mod transaction;
pub mod url;

pub use error::{Result, VfsError};
pub use file::{BufferedReader, BufferedWriter, FileState, UploadMode};
pub use fs::{
    Capabilities, CopyOptions, FileEntry, FileType, Filesystem, FilesystemExt, OnError,
    OpenOptions,
};
pub use instance::filesystem;
pub use mapping::FsMap;
pub use open::{open, open_files, open_local, url_to_fs, ChainOptions, Compression, OpenMode};
pub use sync::SyncVfs;
pub use transaction::{TransactionGuard, TxnStatus};
pub use url::{strip_protocol, unstrip_protocol, StorageOptions};

/// Restore process-global state (registry, instance cache, config) to its
/// built-in defaults. Test isolation hook.
pub fn reset() {
    registry::reset();
    instance::clear();
    config::reset_config();
}
