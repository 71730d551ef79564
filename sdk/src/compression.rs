//! Compression codec registry.
//!
//! Only the registration contract lives here: codecs are named, mapped to
//! filename suffixes for inference, and applied transparently by the open
//! helpers. Concrete codec implementations are supplied by callers.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Result, VfsError};

/// A whole-payload codec.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;
    fn compress(&self, data: Bytes) -> Result<Bytes>;
    fn decompress(&self, data: Bytes) -> Result<Bytes>;
}

/// Passthrough codec, registered as `"null"`.
pub struct NullCodec;

impl Codec for NullCodec {
    fn name(&self) -> &str {
        "null"
    }

    fn compress(&self, data: Bytes) -> Result<Bytes> {
        Ok(data)
    }

    fn decompress(&self, data: Bytes) -> Result<Bytes> {
        Ok(data)
    }
}

struct Registry {
    codecs: DashMap<String, Arc<dyn Codec>>,
    suffixes: DashMap<String, String>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let r = Registry {
            codecs: DashMap::new(),
            suffixes: DashMap::new(),
        };
        r.codecs.insert("null".to_string(), Arc::new(NullCodec));
        r
    })
}

/// Register a codec under `name`, inferable from the given filename
/// suffixes (without the dot). Fails on a taken name unless `clobber`.
pub fn register(
    name: &str,
    codec: Arc<dyn Codec>,
    suffixes: &[&str],
    clobber: bool,
) -> Result<()> {
    let r = registry();
    if !clobber && r.codecs.contains_key(name) {
        return Err(VfsError::AlreadyExists(format!("compression {name:?}")));
    }
    r.codecs.insert(name.to_string(), codec);
    for suffix in suffixes {
        r.suffixes.insert(suffix.to_string(), name.to_string());
    }
    Ok(())
}

/// Look up a codec by name.
pub fn get(name: &str) -> Result<Arc<dyn Codec>> {
    registry()
        .codecs
        .get(name)
        .map(|c| Arc::clone(&c))
        .ok_or_else(|| VfsError::Backend(format!("compression codec {name:?} not registered")))
}

/// Infer a codec name from a path's final suffix, if one is registered.
pub fn infer(path: &str) -> Option<String> {
    let suffix = path.rsplit('.').next()?;
    registry().suffixes.get(suffix).map(|n| n.clone())
}

/// Registered codec names, sorted.
pub fn known() -> Vec<String> {
    let mut names: Vec<String> = registry().codecs.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Toy codec for exercising the registration contract.
    struct XorCodec;

    impl Codec for XorCodec {
        fn name(&self) -> &str {
            "xor"
        }

        fn compress(&self, data: Bytes) -> Result<Bytes> {
            Ok(data.iter().map(|b| b ^ 0x5a).collect::<Vec<u8>>().into())
        }

        fn decompress(&self, data: Bytes) -> Result<Bytes> {
            self.compress(data)
        }
    }

    #[test]
    fn register_lookup_infer() {
        register("xor", Arc::new(XorCodec), &["xz5a"], false).unwrap();
        assert!(get("xor").is_ok());
        assert_eq!(infer("/data/file.xz5a"), Some("xor".to_string()));
        assert_eq!(infer("/data/file.unregistered"), None);
        assert!(matches!(
            register("xor", Arc::new(XorCodec), &[], false),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(register("xor", Arc::new(XorCodec), &[], true).is_ok());
    }

    #[test]
    fn null_codec_is_identity() {
        let codec = get("null").unwrap();
        let data = Bytes::from_static(b"unchanged");
        assert_eq!(codec.compress(data.clone()).unwrap(), data);
        assert_eq!(codec.decompress(data.clone()).unwrap(), data);
    }
}
