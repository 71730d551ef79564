//! URL parsing: protocol splitting and `::`-chained layering.
//!
//! ```text
//! url      := chain | plain
//! chain    := segment ("::" segment)+
//! segment  := plain | bare_path
//! plain    := protocol "://" path
//! protocol := [A-Za-z][A-Za-z0-9+.-]*
//! ```
//!
//! Chains read outermost-first: `filecache::memory://data/a` is a
//! whole-file cache layered over the memory backend.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::path;

/// Keyword options for one filesystem layer, keyed by option name.
///
/// A `BTreeMap` so the iteration order is stable for instance tokens.
pub type StorageOptions = BTreeMap<String, Value>;

/// One layer of a chained URL, outermost-first.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub protocol: String,
    pub path: String,
    pub options: StorageOptions,
}

/// Protocol used when a bare path carries no scheme.
pub const DEFAULT_PROTOCOL: &str = "local";

/// Split `proto://rest` into its scheme and remainder.
///
/// Returns `(None, url)` when no recognized scheme prefix is present.
/// Windows drive letters (`C:\...`) are not treated as schemes.
pub fn split_protocol(url: &str) -> (Option<&str>, &str) {
    let Some(idx) = url.find("://") else {
        return (None, url);
    };
    let scheme = &url[..idx];
    let mut chars = scheme.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
    if valid {
        (Some(scheme), &url[idx + 3..])
    } else {
        (None, url)
    }
}

/// Remove exactly one recognized scheme prefix and canonicalize.
///
/// Idempotent: stripping an already-stripped path changes nothing beyond
/// normalization.
pub fn strip_protocol(url: &str) -> String {
    let (_, rest) = split_protocol(url);
    path::normalize(rest)
}

/// Inverse of [`strip_protocol`]: add exactly one scheme prefix.
pub fn unstrip_protocol(p: &str, protocol: &str) -> String {
    if split_protocol(p).0.is_some() {
        return p.to_string();
    }
    format!("{protocol}://{p}")
}

/// Protocol of a URL, defaulting to the local filesystem for bare paths.
pub fn protocol_of(url: &str) -> &str {
    let first = url.split("::").next().unwrap_or(url);
    split_protocol(first).0.unwrap_or(DEFAULT_PROTOCOL)
}

/// Decompose a possibly-chained URL into ordered layers, outermost-first.
///
/// `options` is keyed by protocol name; when a protocol appears more than
/// once in the chain, the occurrence can be disambiguated positionally with
/// a `name@index` key (`zip@1` for the second `zip` layer).
pub fn parse_chain(url: &str, options: &BTreeMap<String, StorageOptions>) -> Vec<ChainLink> {
    let segments: Vec<&str> = url.split("::").collect();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    segments
        .iter()
        .map(|segment| {
            let (proto, rest) = match split_protocol(segment) {
                (Some(p), rest) => (Some(p), rest),
                // A bare registered name ("filecache::...") is a wrapper
                // layer with no path of its own.
                (None, rest)
                    if !rest.is_empty()
                        && !rest.contains('/')
                        && crate::registry::get(rest).is_ok() =>
                {
                    (Some(rest), "")
                }
                (None, rest) => (None, rest),
            };
            let protocol = proto.unwrap_or(DEFAULT_PROTOCOL).to_string();
            let occurrence = seen.entry(protocol.clone()).or_insert(0);
            let keyed = options
                .get(&format!("{protocol}@{occurrence}"))
                .or_else(|| options.get(&protocol))
                .cloned()
                .unwrap_or_default();
            *occurrence += 1;
            ChainLink {
                protocol,
                // Wrapper-only segments like "filecache::" keep an empty
                // path; the target URL flows in via chain folding instead.
                path: rest.to_string(),
                options: keyed,
            }
        })
        .collect()
}

/// Fold a parsed chain into the options for the outermost layer.
///
/// Every layer but the innermost receives `target_protocol`,
/// `target_options` and `fo` entries describing the layer beneath it, the
/// convention wrapper filesystem factories resolve their inner target by.
/// Returns the outermost link with its options enriched.
pub fn fold_chain(mut links: Vec<ChainLink>) -> ChainLink {
    let mut inner: Option<ChainLink> = None;
    while let Some(mut link) = links.pop() {
        if let Some(prev) = inner.take() {
            link.options
                .entry("target_protocol".to_string())
                .or_insert(Value::String(prev.protocol.clone()));
            link.options
                .entry("target_options".to_string())
                .or_insert_with(|| {
                    Value::Object(prev.options.clone().into_iter().collect())
                });
            let target_path = if prev.path.is_empty() {
                // A path-less wrapper layer: surface the URL it targets so
                // the open path survives multi-wrapper chains.
                prev.options
                    .get("fo")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            } else {
                unstrip_protocol(&prev.path, &prev.protocol)
            };
            link.options
                .entry("fo".to_string())
                .or_insert(Value::String(target_path));
        }
        inner = Some(link);
    }
    inner.expect("chain has at least one segment")
}
