//! Canonical path handling shared by every backend.
//!
//! Paths are forward-slash separated, rooted at `/`, with no empty
//! segments and no `.`/`..` components. The only path that ends with a
//! slash is the root itself; a trailing slash on user input is either
//! copy-target syntax (handled by the copy family before normalization)
//! or rejected.

use crate::error::{Result, VfsError};

/// Normalize a path to canonical form.
///
/// Leading slash is added if missing, trailing slashes are stripped,
/// `.` components are dropped and `..` components pop their parent.
/// `..` past the root resolves to the root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let mut result: Vec<&str> = Vec::new();
    for component in trimmed.split('/').filter(|s| !s.is_empty()) {
        match component {
            "." => continue,
            ".." => {
                result.pop();
            }
            other => result.push(other),
        }
    }

    if result.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", result.join("/"))
    }
}

/// Normalize, rejecting names that cannot be canonicalized.
///
/// A file name that itself ends in `/` (after an initial strip there are
/// still empty interior segments like `a//`) is disallowed so the
/// trailing-slash copy heuristics stay unambiguous.
pub fn canonicalize(path: &str) -> Result<String> {
    if path.contains("//") && path != "//" {
        return Err(VfsError::InvalidPath(path.to_string()));
    }
    if path.contains('\0') {
        return Err(VfsError::InvalidPath(path.to_string()));
    }
    Ok(normalize(path))
}

/// Parent of a canonical path. The root is its own parent.
pub fn parent(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Final component of a canonical path. Empty for the root.
pub fn basename(path: &str) -> &str {
    if path == "/" {
        return "";
    }
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// All ancestors of a path, nearest first, ending at the root.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = path.to_string();
    while cur != "/" {
        cur = parent(&cur);
        out.push(cur.clone());
    }
    out
}

/// Number of segments below the root. `/` has depth 0, `/a/b` depth 2.
pub fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.matches('/').count()
    }
}

/// Join a canonical directory path and a relative child path.
pub fn join(dir: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        return dir.to_string();
    }
    if dir == "/" {
        format!("/{child}")
    } else {
        format!("{dir}/{child}")
    }
}

/// The part of `path` below `root`, without a leading slash.
///
/// Returns `None` if `path` is not under `root`.
pub fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if root == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// True if `path` equals `root` or sits anywhere beneath it.
pub fn is_under(path: &str, root: &str) -> bool {
    relative_to(path, root).is_some()
}

/// Resolve an optional signed byte range against a known size.
///
/// Negative offsets count from the end. `end` past the size clamps to a
/// short read. Returns `(start, end)` with `start <= end`.
pub fn resolve_range(size: u64, start: Option<i64>, end: Option<i64>) -> Result<(u64, u64)> {
    let resolve = |v: i64| -> u64 {
        if v < 0 {
            size.saturating_sub(v.unsigned_abs())
        } else {
            (v as u64).min(size)
        }
    };
    let s = start.map_or(0, resolve);
    let e = end.map_or(size, resolve);
    if s > e {
        return Err(VfsError::InvalidRange(format!("{s}..{e}")));
    }
    Ok((s, e))
}

/// Whether a signed range needs the total size to be resolved.
pub fn range_needs_size(start: Option<i64>, end: Option<i64>) -> bool {
    start.map_or(false, |v| v < 0) || end.map_or(true, |v| v < 0)
}

/// Derive target paths for a copy of `sources` (all under `source_root`)
/// into `dest`.
///
/// `dest_is_dir` says the destination names a directory (it exists as one,
/// or the caller wrote it with a trailing slash). `flatten` drops the
/// relative structure and places each source's basename directly under
/// `dest`; otherwise the path of each source relative to `source_root`
/// is preserved.
pub fn copy_targets(
    sources: &[String],
    source_root: &str,
    dest: &str,
    dest_is_dir: bool,
    flatten: bool,
) -> Vec<String> {
    if sources.len() == 1 && !dest_is_dir {
        return vec![dest.to_string()];
    }
    sources
        .iter()
        .map(|src| {
            if flatten {
                join(dest, basename(src))
            } else {
                match relative_to(src, source_root) {
                    Some(rel) if !rel.is_empty() => join(dest, rel),
                    _ => join(dest, basename(src)),
                }
            }
        })
        .collect()
}
