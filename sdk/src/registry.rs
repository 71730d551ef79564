//! Protocol registry.
//!
//! A process-wide map from protocol name to filesystem factory. Built-in
//! backends and wrappers register at first use; callers add their own
//! with [`register`], which refuses to clobber an existing name unless
//! asked.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{Result, VfsError};
use crate::fs::{
    BlockCacheFs, CachePolicy, DirFs, Filesystem, LocalFs, MemoryFs, SimpleCacheFs,
    WholeFileCacheFs,
};
use crate::url::{self, StorageOptions};

/// Constructs a filesystem from keyword options.
pub type FsFactory = Arc<dyn Fn(StorageOptions) -> Result<Arc<dyn Filesystem>> + Send + Sync>;

struct FactoryEntry {
    factory: FsFactory,
    /// True for names registered as aliases of another protocol.
    alias_of: Option<&'static str>,
}

fn table() -> &'static DashMap<String, FactoryEntry> {
    static TABLE: OnceLock<DashMap<String, FactoryEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let table = DashMap::new();
        install_defaults(&table);
        table
    })
}

fn install_defaults(table: &DashMap<String, FactoryEntry>) {
    let insert = |name: &str, alias_of: Option<&'static str>, factory: FsFactory| {
        table.insert(name.to_string(), FactoryEntry { factory, alias_of });
    };

    let memory: FsFactory = Arc::new(|_opts| Ok(MemoryFs::arc()));
    insert("memory", None, memory);

    let local: FsFactory = Arc::new(|opts| {
        let auto_mkdir = opt_bool(&opts, "auto_mkdir").unwrap_or(false);
        Ok(Arc::new(LocalFs::with_auto_mkdir(auto_mkdir)) as Arc<dyn Filesystem>)
    });
    insert("local", None, local.clone());
    insert("file", Some("local"), local);

    let dir: FsFactory = Arc::new(|opts| {
        let (target, fo) = resolve_target(&opts)?;
        let prefix = opt_str(&opts, "path")
            .or_else(|| fo.map(|f| url::strip_protocol(&f)))
            .ok_or_else(|| {
                VfsError::Backend("dir filesystem requires a `path` or target URL".to_string())
            })?;
        Ok(Arc::new(DirFs::new(target, &prefix)?) as Arc<dyn Filesystem>)
    });
    insert("dir", None, dir);

    let filecache: FsFactory = Arc::new(|opts| {
        let (target, _) = resolve_target(&opts)?;
        let storage = opt_str(&opts, "cache_storage").map(PathBuf::from);
        let policy = if opt_bool(&opts, "check_files").unwrap_or(false) {
            CachePolicy::CheckOnOpen
        } else if let Some(secs) = opt_u64(&opts, "expiry_time") {
            CachePolicy::ExpireAfter(secs)
        } else {
            CachePolicy::NeverCheck
        };
        Ok(Arc::new(WholeFileCacheFs::new(target, storage, policy)?) as Arc<dyn Filesystem>)
    });
    insert("filecache", None, filecache.clone());
    insert("cached", Some("filecache"), filecache);

    let simplecache: FsFactory = Arc::new(|opts| {
        let (target, _) = resolve_target(&opts)?;
        let storage = opt_str(&opts, "cache_storage").map(PathBuf::from);
        Ok(Arc::new(SimpleCacheFs::new(target, storage)?) as Arc<dyn Filesystem>)
    });
    insert("simplecache", None, simplecache);

    let blockcache: FsFactory = Arc::new(|opts| {
        let (target, _) = resolve_target(&opts)?;
        let storage = opt_str(&opts, "cache_storage").map(PathBuf::from);
        let block_size = opt_u64(&opts, "block_size")
            .map(|n| n as usize)
            .unwrap_or(crate::config::DEFAULT_BLOCK_SIZE);
        Ok(Arc::new(BlockCacheFs::new(target, storage, block_size)?) as Arc<dyn Filesystem>)
    });
    insert("blockcache", None, blockcache);
}

/// Resolve a wrapper's inner filesystem from the `target_protocol` /
/// `target_options` / `fo` convention. Returns the inner instance and the
/// raw `fo` URL when present.
fn resolve_target(opts: &StorageOptions) -> Result<(Arc<dyn Filesystem>, Option<String>)> {
    let fo = opt_str(opts, "fo");
    let protocol = opt_str(opts, "target_protocol")
        .or_else(|| fo.as_deref().map(|f| url::protocol_of(f).to_string()))
        .ok_or_else(|| {
            VfsError::Backend("wrapper filesystem requires `target_protocol` or `fo`".to_string())
        })?;
    let target_options = opt_obj(opts, "target_options").unwrap_or_default();
    let target = crate::instance::filesystem(&protocol, target_options)?;
    Ok((target, fo))
}

/// Register a factory for `name`.
///
/// Fails with `AlreadyExists` if the name is taken and `clobber` is
/// false.
pub fn register(name: &str, factory: FsFactory, clobber: bool) -> Result<()> {
    let table = table();
    if !clobber && table.contains_key(name) {
        return Err(VfsError::AlreadyExists(format!("protocol {name:?}")));
    }
    table.insert(
        name.to_string(),
        FactoryEntry {
            factory,
            alias_of: None,
        },
    );
    Ok(())
}

/// Factory for `name`, or `ProtocolUnknown`.
pub fn get(name: &str) -> Result<FsFactory> {
    table()
        .get(name)
        .map(|entry| Arc::clone(&entry.factory))
        .ok_or_else(|| VfsError::ProtocolUnknown(name.to_string()))
}

/// All registered protocol names, aliases included, sorted.
pub fn known() -> Vec<String> {
    let mut names: Vec<String> = table().iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}

/// Registered names excluding aliases. Every compiled-in backend is
/// constructible, so this is `known` minus the alias entries.
pub fn available() -> Vec<String> {
    let mut names: Vec<String> = table()
        .iter()
        .filter(|e| e.value().alias_of.is_none())
        .map(|e| e.key().clone())
        .collect();
    names.sort();
    names
}

/// Restore the built-in table. Test isolation hook.
pub fn reset() {
    let table = table();
    table.clear();
    install_defaults(table);
}

// -- option extraction -------------------------------------------------------

pub(crate) fn opt_bool(opts: &StorageOptions, key: &str) -> Option<bool> {
    opts.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_str(opts: &StorageOptions, key: &str) -> Option<String> {
    opts.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_u64(opts: &StorageOptions, key: &str) -> Option<u64> {
    opts.get(key).and_then(Value::as_u64)
}

pub(crate) fn opt_obj(opts: &StorageOptions, key: &str) -> Option<StorageOptions> {
    opts.get(key)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
