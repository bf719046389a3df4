//! Tunables for the transfer engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::DEFAULT_RENAME_ATTEMPTS;

/// Engine configuration. Every field has a default, so an empty
/// `[transfer]` table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// File tasks allowed to run at once across all jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bytes handed to the destination per write.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum spacing between progress updates for one task.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// A task fails when its source yields nothing for this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Candidate names tried by the rename policy before giving up.
    #[serde(default = "default_rename_attempts")]
    pub rename_attempts: u32,

    /// How long a finished job stays queryable.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_chunk_size() -> usize {
    256 * 1024
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_rename_attempts() -> u32 {
    DEFAULT_RENAME_ATTEMPTS
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_eviction_interval_secs() -> u64 {
    60
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            progress_interval_ms: default_progress_interval_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            rename_attempts: default_rename_attempts(),
            job_retention_secs: default_job_retention_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}
