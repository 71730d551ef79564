//! Filesystem instance cache.
//!
//! Instances are keyed by `(protocol, stable token of the construction
//! options)`, so two callers asking for the same backend with equal
//! options share one object, and with it the listing cache, transaction
//! slot, and connection state. Keys that must not affect identity
//! (buffering knobs, cache toggles) are excluded from the token.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::config;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::registry;
use crate::url::StorageOptions;

/// Option keys that never affect instance identity.
const NON_IDENTIFYING: &[&str] = &[
    "skip_instance_cache",
    "cache_type",
    "cache_options",
    "block_size",
    "use_listings_cache",
    "listings_expiry_time",
];

fn cache() -> &'static DashMap<String, Arc<dyn Filesystem>> {
    static CACHE: OnceLock<DashMap<String, Arc<dyn Filesystem>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Stable hash over the protocol and the sorted, identifying option
/// pairs. Equal tokens mean the same instance.
pub fn stable_token(protocol: &str, options: &StorageOptions) -> String {
    let identifying: StorageOptions = options
        .iter()
        .filter(|(k, _)| !NON_IDENTIFYING.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let serialized =
        serde_json::to_string(&identifying).unwrap_or_else(|_| format!("{identifying:?}"));
    let mut hasher = Sha256::new();
    hasher.update(protocol.as_bytes());
    hasher.update([0]);
    hasher.update(serialized.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// The filesystem for `protocol` with the given options, reusing a cached
/// instance when the token matches.
///
/// `skip_instance_cache` (per-call option or process config) bypasses
/// both lookup and insertion.
pub fn filesystem(protocol: &str, options: StorageOptions) -> Result<Arc<dyn Filesystem>> {
    let skip = registry::opt_bool(&options, "skip_instance_cache")
        .unwrap_or_else(|| config::config().skip_instance_cache);

    if skip {
        let factory = registry::get(protocol)?;
        return factory(options);
    }

    let token = stable_token(protocol, &options);
    if let Some(hit) = cache().get(&token) {
        return Ok(Arc::clone(&hit));
    }
    let factory = registry::get(protocol)?;
    let fs = factory(options)?;
    cache().insert(token, Arc::clone(&fs));
    tracing::debug!(protocol, "constructed new filesystem instance");
    Ok(fs)
}

/// Drop every cached instance. Required after `fork`, useful in tests.
pub fn clear() {
    cache().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn opts(pairs: &[(&str, Value)]) -> StorageOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn equal_tokens_share_an_instance() {
        let a = filesystem("memory", StorageOptions::new()).unwrap();
        let b = filesystem("memory", StorageOptions::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn differing_options_differ() {
        let a = filesystem("local", opts(&[("auto_mkdir", Value::from(true))])).unwrap();
        let b = filesystem("local", opts(&[("auto_mkdir", Value::from(false))])).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn non_identifying_keys_do_not_split_instances() {
        let a = filesystem("memory", StorageOptions::new()).unwrap();
        let b = filesystem(
            "memory",
            opts(&[
                ("cache_type", Value::from("block")),
                ("block_size", Value::from(1024)),
            ]),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn skip_instance_cache_bypasses() {
        let a = filesystem("memory", StorageOptions::new()).unwrap();
        let b = filesystem(
            "memory",
            opts(&[("skip_instance_cache", Value::from(true))]),
        )
        .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn token_is_order_insensitive() {
        let t1 = stable_token(
            "x",
            &opts(&[("a", Value::from(1)), ("b", Value::from(2))]),
        );
        let t2 = stable_token(
            "x",
            &opts(&[("b", Value::from(2)), ("a", Value::from(1))]),
        );
        assert_eq!(t1, t2);
    }
}
