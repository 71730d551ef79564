//! Glob pattern compilation.
//!
//! Translates shell-style patterns into anchored regular expressions:
//! `*` and `?` never cross a `/` separator, `**` greedily does, and
//! bracket classes accept both `[!...]` and `[^...]` negation. An
//! unbalanced `[` matches itself literally.

use regex::Regex;

use crate::error::{Result, VfsError};
use crate::path;

/// Characters that make a pattern a pattern.
const MAGIC: &[char] = &['*', '?', '['];

/// True if `pattern` contains any wildcard.
pub fn has_magic(pattern: &str) -> bool {
    pattern.contains(MAGIC)
}

/// Longest literal directory prefix of a pattern.
///
/// `"/data/raw/*.csv"` roots the walk at `/data/raw`; a pattern with a
/// wildcard in its first segment roots at `/`.
pub fn literal_root(pattern: &str) -> String {
    let cut = pattern.find(MAGIC).unwrap_or(pattern.len());
    match pattern[..cut].rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => pattern[..idx].to_string(),
    }
}

/// Compile a glob pattern into an anchored [`Regex`].
pub fn compile(pattern: &str) -> Result<GlobMatcher> {
    let mut re = String::with_capacity(pattern.len() * 2);
    re.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    re.push_str(".*");
                    i += 2;
                } else {
                    re.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                re.push_str("[^/]");
                i += 1;
            }
            '[' => {
                i += translate_class(&chars[i..], &mut re);
            }
            c => {
                push_literal(c, &mut re);
                i += 1;
            }
        }
    }
    re.push('$');
    let regex = Regex::new(&re)
        .map_err(|e| VfsError::InvalidPath(format!("bad glob pattern {pattern:?}: {e}")))?;
    Ok(GlobMatcher { regex })
}

/// Translate a bracket class starting at `chars[0] == '['`.
///
/// Returns the number of pattern characters consumed. An unterminated
/// class consumes one character and emits a literal `[`.
fn translate_class(chars: &[char], re: &mut String) -> usize {
    let mut j = 1;
    if matches!(chars.get(j), Some('!' | '^')) {
        j += 1;
    }
    // A `]` directly after the (possibly negated) opening is literal.
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    if j >= chars.len() {
        re.push_str("\\[");
        return 1;
    }

    re.push('[');
    let mut k = 1;
    if matches!(chars.get(k), Some('!' | '^')) {
        re.push('^');
        k += 1;
    }
    while k < j {
        match chars[k] {
            // Escape everything the regex class syntax treats specially
            // (nested classes, intersections) so glob classes stay literal.
            '\\' | '[' | ']' | '&' | '~' => {
                re.push('\\');
                re.push(chars[k]);
            }
            '^' if k == 1 => re.push_str("\\^"),
            c => re.push(c),
        }
        k += 1;
    }
    re.push(']');
    j + 1
}

fn push_literal(c: char, re: &mut String) {
    if "\\.+()|{}^$".contains(c) {
        re.push('\\');
    }
    re.push(c);
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    pub fn matches(&self, p: &str) -> bool {
        self.regex.is_match(p)
    }
}

/// Depth below the root that a walk serving this pattern must reach.
///
/// `None` for patterns containing `**` (unbounded); otherwise the number
/// of separators past the literal root.
pub fn required_depth(pattern: &str) -> Option<usize> {
    if pattern.contains("**") {
        return None;
    }
    let root = literal_root(pattern);
    let rest = path::relative_to(pattern, &root).unwrap_or(pattern);
    Some(rest.split('/').filter(|s| !s.is_empty()).count())
}
