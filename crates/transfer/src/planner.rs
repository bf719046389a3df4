//! Expands request items into a flat, ordered list of files.

use std::collections::HashSet;

use stevedore_protocol::{ItemKind, TransferItem};
use stevedore_storage::{StorageAdapter, file_name, join_key, normalize_key, parent_key, validate_key};
use tracing::debug;

use crate::error::PlanningError;

/// How source paths map onto the destination root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rooting {
    /// Each item lands relative to its own parent: `docs/a.txt` becomes
    /// `a.txt`, directory `docs/sub` becomes `sub/...`.
    ItemParent,
    /// Paths keep their full shape relative to the source root.
    SourceRoot,
}

/// One file found during planning, before conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Path relative to the destination root.
    pub file: String,
    /// Key in the source adapter.
    pub source_key: String,
    pub size: Option<u64>,
    pub is_dir_marker: bool,
}

fn invalid(path: &str, reason: impl ToString) -> PlanningError {
    PlanningError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn relative_to<'k>(key: &'k str, base: &str) -> Option<&'k str> {
    if base.is_empty() {
        return Some(key);
    }
    key.strip_prefix(base)?.strip_prefix('/')
}

/// Expands `items` (relative to `source_root`) in request order. Directory
/// items are listed recursively. A source object named by several items
/// is planned once.
pub async fn expand(
    source: &dyn StorageAdapter,
    source_root: &str,
    items: &[TransferItem],
    rooting: Rooting,
) -> Result<Vec<PlannedFile>, PlanningError> {
    if items.is_empty() {
        return Err(PlanningError::EmptyItems);
    }
    let source_root = normalize_key(source_root).trim_end_matches('/').to_string();
    if !source_root.is_empty() {
        validate_key(&source_root).map_err(|e| invalid(&source_root, e))?;
    }

    let mut planned = Vec::new();
    let mut seen = HashSet::new();

    for item in items {
        let rel = normalize_key(&item.path).trim_end_matches('/').to_string();
        if !rel.is_empty() {
            validate_key(&rel).map_err(|e| invalid(&item.path, e))?;
        }
        let source_key = join_key(&source_root, &rel);

        match item.kind {
            ItemKind::File => {
                if rel.is_empty() {
                    return Err(invalid(&item.path, "file item needs a path"));
                }
                let file = match rooting {
                    Rooting::ItemParent => file_name(&rel).to_string(),
                    Rooting::SourceRoot => rel.clone(),
                };
                if seen.insert(source_key.clone()) {
                    planned.push(PlannedFile {
                        file,
                        source_key,
                        size: None,
                        is_dir_marker: false,
                    });
                }
            }
            ItemKind::Directory => {
                let entries = source
                    .list(&source_key)
                    .await
                    .map_err(|e| PlanningError::Listing {
                        path: item.path.clone(),
                        source: e,
                    })?;
                let base = match rooting {
                    Rooting::ItemParent => parent_key(&rel).to_string(),
                    Rooting::SourceRoot => String::new(),
                };

                for entry in entries {
                    let Some(under_root) = relative_to(&entry.key, &source_root) else {
                        debug!(key = %entry.key, "listed key outside source root");
                        continue;
                    };
                    let Some(file) = relative_to(under_root, &base) else {
                        debug!(key = %entry.key, "listed key outside item");
                        continue;
                    };
                    if file.is_empty() || !seen.insert(entry.key.clone()) {
                        continue;
                    }
                    planned.push(PlannedFile {
                        file: file.to_string(),
                        source_key: entry.key.clone(),
                        size: if entry.is_dir_marker { Some(0) } else { Some(entry.size) },
                        is_dir_marker: entry.is_dir_marker,
                    });
                }
            }
        }
    }

    Ok(planned)
}
