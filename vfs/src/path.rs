//! Pure string algebra over canonical `/`-delimited paths.
//!
//! A canonical path is absolute, contains no `.`/`..` components and no
//! trailing slash (except the root itself). The VFS deals exclusively in
//! canonical paths; everything user-supplied goes through [`absolutize`]
//! first.

use crate::Result;
use crate::VfsError;

/// Canonicalizes `input` against `cwd` (itself assumed canonical).
/// `..` above the root stays at the root, as POSIX resolution does.
pub fn absolutize(cwd: &str, input: &str) -> String {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else if input.is_empty() {
        cwd.to_string()
    } else {
        format!("{}/{input}", if cwd == "/" { "" } else { cwd })
    };
    normalize(&joined)
}

/// Collapses `.`/`..`/empty components of an absolute path.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// Requires `path` to be absolute, then normalizes it.
pub fn canonicalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath(path.to_string()));
    }
    Ok(normalize(path))
}

/// Parent directory of a canonical path; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Final component of a canonical path; empty for the root.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a canonical directory and a single component.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits a canonical path into components; the root yields none.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}
