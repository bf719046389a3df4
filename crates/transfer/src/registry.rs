//! In-memory store of every job, keyed by job id.
//!
//! All reads return clones taken under the lock, so callers never see a
//! task halfway through an update. Every accepted mutation bumps the job's
//! revision, which the broadcaster uses to drop stale snapshots.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use stevedore_protocol::{ProgressEvent, TaskStatus};
use tracing::{debug, info};

use crate::error::TransferError;
use crate::job::{FileTask, TaskUpdate, TransferJob};

/// A job's progress event tagged with the revision it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub revision: u64,
    pub event: ProgressEvent,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.event.status.is_terminal()
    }
}

/// A destination object that cleanup may need to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub destination_path: String,
    pub status: TaskStatus,
    /// Completed, or opened for writing before the task ended.
    pub written: bool,
}

struct Entry {
    job: TransferJob,
    revision: u64,
}

impl Entry {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            revision: self.revision,
            event: self.job.to_event(),
        }
    }

    /// Bumps the revision and stamps `completed_at` the first time the job
    /// is seen terminal.
    fn touch(&mut self) -> JobSnapshot {
        self.revision += 1;
        if self.job.completed_at.is_none() && self.job.is_terminal() {
            self.job.completed_at = Some(Utc::now());
            info!(
                job_id = %self.job.id,
                status = ?self.job.status(),
                "job finished"
            );
        }
        self.snapshot()
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, job: TransferJob) -> Result<JobSnapshot, TransferError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(TransferError::DuplicateJob(job.id));
        }
        let id = job.id.clone();
        info!(job_id = %id, tasks = job.tasks.len(), "job registered");
        let mut entry = Entry { job, revision: 0 };
        let snapshot = entry.touch();
        jobs.insert(id, entry);
        Ok(snapshot)
    }

    pub fn get(&self, job_id: &str) -> Result<TransferJob, TransferError> {
        self.read()
            .get(job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))
    }

    pub fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, TransferError> {
        self.read()
            .get(job_id)
            .map(Entry::snapshot)
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))
    }

    pub fn task(&self, job_id: &str, index: usize) -> Result<Option<FileTask>, TransferError> {
        self.read()
            .get(job_id)
            .map(|e| e.job.tasks.get(index).cloned())
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))
    }

    /// Applies `update` to one task. Returns `None` when the update was not
    /// legal from the task's current state.
    pub fn update_task(
        &self,
        job_id: &str,
        index: usize,
        update: TaskUpdate,
    ) -> Result<Option<JobSnapshot>, TransferError> {
        let mut jobs = self.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))?;

        let activating = update == TaskUpdate::Activate;
        let Some(task) = entry.job.tasks.get_mut(index) else {
            return Ok(None);
        };
        if !task.apply(update) {
            return Ok(None);
        }
        if task.status == TaskStatus::Failed {
            debug!(
                job_id,
                file = %task.file,
                error = task.error.as_deref().unwrap_or_default(),
                "task failed"
            );
        }
        if activating && entry.job.started_at.is_none() {
            entry.job.started_at = Some(Utc::now());
            info!(job_id, "job admitted");
        }
        Ok(Some(entry.touch()))
    }

    /// Moves every pending task to `cancelled` in one step. Active tasks are
    /// left to finish. Returns how many tasks were cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<(usize, JobSnapshot), TransferError> {
        let mut jobs = self.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))?;

        let cancelled = entry
            .job
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.apply(TaskUpdate::Cancel))
            .filter(|applied| *applied)
            .count();

        let snapshot = if cancelled > 0 {
            entry.touch()
        } else {
            entry.snapshot()
        };
        Ok((cancelled, snapshot))
    }

    /// Reports every task's destination and whether anything was written
    /// there. Never deletes anything itself.
    pub fn list_files_for_cleanup(&self, job_id: &str) -> Result<Vec<CleanupEntry>, TransferError> {
        let jobs = self.read();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))?;
        Ok(entry
            .job
            .tasks
            .iter()
            .map(|t| CleanupEntry {
                destination_path: t.destination_path.clone(),
                status: t.status,
                written: !t.preexisting
                    && (t.status == TaskStatus::Completed
                        || (t.destination_opened && t.status != TaskStatus::Skipped)),
            })
            .collect())
    }

    pub fn evict(&self, job_id: &str) -> Option<TransferJob> {
        let removed = self.write().remove(job_id).map(|e| e.job);
        if removed.is_some() {
            info!(job_id, "job evicted");
        }
        removed
    }

    /// Evicts terminal jobs that finished more than `retention` ago.
    pub fn evict_expired(&self, retention: Duration) -> Vec<String> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Vec::new();
        };

        let mut jobs = self.write();
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, e)| e.job.completed_at.is_some_and(|t| t <= cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
            info!(job_id = %id, "job evicted after retention period");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
