// src/path.rs

//! Archive entry path handling
//!
//! Entry names written into packages are relative, `/`-separated paths.
//! Entry names read back out of packages are untrusted and are sanitized
//! before being joined onto the output directory.

use crate::error::{FormatError, Result};
use std::path::{Component, Path, PathBuf};

/// Sanitize an entry name taken from a package
///
/// - Rejects `..` components
/// - Skips `.` components
/// - Strips leading slashes so the result is relative
/// - Rejects names that are empty after sanitization
pub fn sanitize_entry_name(name: &str) -> Result<PathBuf> {
    let relative = name.trim_start_matches('/');
    let mut normalized = PathBuf::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(FormatError::UnsafeEntryPath(name.to_string()).into());
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(FormatError::UnsafeEntryPath(name.to_string()).into());
    }

    Ok(normalized)
}

/// Join an untrusted entry name onto `root`, guaranteeing the result stays inside it
pub fn safe_join(root: &Path, name: &str) -> Result<PathBuf> {
    Ok(root.join(sanitize_entry_name(name)?))
}

/// Build the entry name for `path` relative to `root`
///
/// Components are joined with `/` regardless of platform so packages are
/// portable.
pub fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
