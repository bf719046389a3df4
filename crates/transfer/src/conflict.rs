//! Destination conflict detection and resolution.

use std::collections::{HashMap, HashSet};

use futures_util::StreamExt;
use stevedore_protocol::ConflictResolution;
use stevedore_storage::{StorageAdapter, StorageError, file_name, is_dir_marker, parent_key};
use tracing::debug;

/// Existence probes kept in flight at once during a check.
const PROBE_CONCURRENCY: usize = 8;

pub const DEFAULT_RENAME_ATTEMPTS: u32 = 1000;

/// Outcome of [`check`]: candidates split by whether they already exist.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub conflicting: Vec<String>,
    pub free: Vec<String>,
}

/// Probes every candidate key against `destination`. Order is preserved
/// within each list.
pub async fn check(
    destination: &dyn StorageAdapter,
    candidates: &[String],
) -> Result<ConflictReport, StorageError> {
    let results: Vec<(String, Result<bool, StorageError>)> = futures_util::stream::iter(candidates.iter().cloned())
        .map(|key: String| async move {
            let exists = destination.exists(&key).await;
            (key, exists)
        })
        .buffered(PROBE_CONCURRENCY)
        .collect()
        .await;

    let mut report = ConflictReport::default();
    for (key, exists) in results {
        if exists? {
            report.conflicting.push(key);
        } else {
            report.free.push(key);
        }
    }
    Ok(report)
}

/// What to do with one planned destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write to this key.
    Write(String),
    /// Rewrite a directory marker that was already there. Cleanup leaves it.
    Reuse(String),
    /// Leave the existing object alone.
    Skip(String),
    /// Another task of the same job already writes this key.
    Duplicate(String),
    /// Could not settle on a key; the task fails with this message.
    Fail(String, String),
}

/// Applies one policy across all files of a job, remembering which keys
/// the job has already claimed.
pub struct ConflictResolver<'a> {
    destination: &'a dyn StorageAdapter,
    policy: ConflictResolution,
    max_attempts: u32,
    claimed: HashSet<String>,
    known: HashMap<String, bool>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(destination: &'a dyn StorageAdapter, policy: ConflictResolution, max_attempts: u32) -> Self {
        Self {
            destination,
            policy,
            max_attempts,
            claimed: HashSet::new(),
            known: HashMap::new(),
        }
    }

    /// Runs existence probes for `keys` concurrently so [`resolve`](Self::resolve)
    /// does not probe them one by one. Probe errors are left for `resolve`
    /// to hit again and report per file.
    pub async fn prefetch(&mut self, keys: &[String]) {
        let destination = self.destination;
        let overwrite = self.policy == ConflictResolution::Overwrite;
        let results: Vec<(String, Result<bool, StorageError>)> = futures_util::stream::iter(keys.iter().cloned())
            .filter(|key: &String| std::future::ready(!overwrite || is_dir_marker(key)))
            .map(|key: String| async move {
                let exists = destination.exists(&key).await;
                (key, exists)
            })
            .buffered(PROBE_CONCURRENCY)
            .collect()
            .await;
        for (key, result) in results {
            if let Ok(exists) = result {
                self.known.insert(key, exists);
            }
        }
    }

    async fn exists(&mut self, key: &str) -> Result<bool, StorageError> {
        if self.claimed.contains(key) {
            return Ok(true);
        }
        if let Some(exists) = self.known.get(key) {
            return Ok(*exists);
        }
        let exists = self.destination.exists(key).await?;
        self.known.insert(key.to_string(), exists);
        Ok(exists)
    }

    pub async fn resolve(&mut self, key: &str) -> Resolution {
        // Markers carry no content and are always rewritten in place.
        if is_dir_marker(key) {
            if self.claimed.contains(key) {
                return Resolution::Duplicate(key.to_string());
            }
            // An unknown state counts as present so cleanup never removes it.
            let existed = self.exists(key).await.unwrap_or(true);
            self.claimed.insert(key.to_string());
            return if existed {
                Resolution::Reuse(key.to_string())
            } else {
                Resolution::Write(key.to_string())
            };
        }

        match self.policy {
            ConflictResolution::Overwrite => {
                if self.claimed.insert(key.to_string()) {
                    Resolution::Write(key.to_string())
                } else {
                    Resolution::Duplicate(key.to_string())
                }
            }
            ConflictResolution::Skip => match self.exists(key).await {
                Ok(true) => Resolution::Skip(key.to_string()),
                Ok(false) => {
                    self.claimed.insert(key.to_string());
                    Resolution::Write(key.to_string())
                }
                Err(e) => Resolution::Fail(key.to_string(), e.to_string()),
            },
            ConflictResolution::Rename => self.rename(key).await,
        }
    }

    async fn rename(&mut self, key: &str) -> Resolution {
        match self.exists(key).await {
            Ok(false) => {
                self.claimed.insert(key.to_string());
                return Resolution::Write(key.to_string());
            }
            Ok(true) => {}
            Err(e) => return Resolution::Fail(key.to_string(), e.to_string()),
        }

        for n in 1..=self.max_attempts {
            let candidate = disambiguate(key, n);
            match self.exists(&candidate).await {
                Ok(false) => {
                    debug!(from = key, to = %candidate, "renamed to avoid conflict");
                    self.claimed.insert(candidate.clone());
                    return Resolution::Write(candidate);
                }
                Ok(true) => {}
                Err(e) => return Resolution::Fail(key.to_string(), e.to_string()),
            }
        }

        Resolution::Fail(
            key.to_string(),
            format!("no free name after {} attempts", self.max_attempts),
        )
    }
}

/// `dir/name.ext` -> `dir/name (n).ext`. Dotfiles without a further
/// extension get the suffix at the end.
pub fn disambiguate(key: &str, n: u32) -> String {
    let name = file_name(key);
    let parent = parent_key(key);

    let renamed = match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{} ({n}){}", &name[..idx], &name[idx..]),
        _ => format!("{name} ({n})"),
    };

    if parent.is_empty() {
        renamed
    } else {
        format!("{parent}/{renamed}")
    }
}
