//! Object key helpers.
//!
//! Keys are `/`-separated, relative, and never contain `..` segments.

use crate::StorageError;

/// Validates that a key cannot escape its adapter root.
///
/// Rejects:
/// - Empty keys
/// - Absolute keys (`/etc`, `\\server\share`, `C:\`)
/// - Parent directory traversal (`..`)
/// - NUL bytes
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }

    if key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "absolute key not allowed: {key}"
        )));
    }

    if key.len() >= 2 && key.as_bytes()[1] == b':' {
        return Err(StorageError::InvalidKey(format!(
            "drive prefix not allowed: {key}"
        )));
    }

    if key.contains('\0') {
        return Err(StorageError::InvalidKey(format!("NUL byte in key: {key:?}")));
    }

    if key.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "parent traversal not allowed: {key}"
        )));
    }

    Ok(())
}

/// Collapses empty and `.` segments. A trailing `/` is preserved.
pub fn normalize_key(key: &str) -> String {
    let trailing = key.ends_with('/') && key.trim_matches('/') != "";
    let mut out = key
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");
    if trailing {
        out.push('/');
    }
    out
}

/// Joins two key fragments with exactly one `/`.
pub fn join_key(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => normalize_key(rel),
        (false, true) => normalize_key(base),
        (false, false) => normalize_key(&format!("{base}/{rel}")),
    }
}

/// Returns the parent "directory" of a key, or `""` at the root.
pub fn parent_key(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Returns the last segment of a key, without any trailing `/`.
pub fn file_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn is_dir_marker(key: &str) -> bool {
    key.ends_with('/')
}
