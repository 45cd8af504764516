//! Import-path parsing for versioned schema imports.
//!
//! Two encodings are recognized:
//!
//! 1. `name@version[/path...]`: the version runs to the first `/` after
//!    the `@` or to the end of the string; a trailing `.proto` is stripped
//!    when no path follows.
//! 2. `name/vX.Y.Z[/path...]`: the second path segment is taken as the
//!    version when it starts with `v` followed by a digit.
//!
//! Anything else (standard-library imports like
//! `google/protobuf/timestamp.proto`) is not a module import and parses to
//! `None`; the resolver skips those silently.

/// Extract `(module, version)` from an import path, or `None` when the
/// path carries no version.
pub fn parse_import(path: &str) -> Option<(String, String)> {
    if let Some(at) = path.find('@') {
        let module = &path[..at];
        let rest = &path[at + 1..];
        let version = match rest.find('/') {
            Some(slash) => &rest[..slash],
            None => rest.strip_suffix(".proto").unwrap_or(rest),
        };
        if module.is_empty() || version.is_empty() {
            return None;
        }
        return Some((module.to_string(), version.to_string()));
    }

    let mut segments = path.split('/');
    let module = segments.next()?;
    let second = segments.next()?;
    if !module.is_empty() && is_version_segment(second) {
        return Some((module.to_string(), second.to_string()));
    }
    None
}

/// A path segment counts as a version only as `v<digit>...`; plain
/// `v`-prefixed words like `vendor` do not.
fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit())
}
