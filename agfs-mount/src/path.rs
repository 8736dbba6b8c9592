//! Path normalization and segment-aware prefix matching.

use agfs_types::{FsError, FsResult};

/// Normalizes an absolute path: collapses repeated and trailing slashes and
/// drops `.` segments. Relative paths and `..` are rejected.
pub fn normalize(path: &str) -> FsResult<String> {
    if !path.starts_with('/') {
        return Err(FsError::invalid_argument(format!("{path}: path must be absolute")));
    }
    let mut out = String::with_capacity(path.len());
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                return Err(FsError::invalid_argument(format!("{path}: '..' is not allowed")));
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// If `path` lies at or under the mount `prefix`, returns the path relative
/// to the mount (always absolute, `/` for the mount root). Both inputs must
/// already be normalized.
///
/// Matching is by whole segments: `/ab` is not under `/a`.
pub fn strip_mount(prefix: &str, path: &str) -> Option<String> {
    if prefix == "/" {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}

/// For a mount strictly below `dir`, the name of the next segment on the way
/// down to it.
pub fn child_toward(dir: &str, mount: &str) -> Option<String> {
    let rest = strip_mount(dir, mount)?;
    let first = rest.trim_start_matches('/').split('/').next()?;
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Last segment of a normalized path, `/` for the root.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) if i + 1 < path.len() => &path[i + 1..],
        _ => "/",
    }
}

/// Parent of a normalized path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}
