//! Job and task state.
//!
//! A job's status is never stored: [`TransferJob::status`] derives it from
//! the task list every time it is asked.

use chrono::{DateTime, Utc};
use stevedore_protocol::{
    ConflictResolution, FileProgress, FileStatusEntry, JobFilesResponse, JobStatus, LocationRef,
    ProgressEvent, TaskStatus,
};

/// One file's unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTask {
    /// Identity in progress events: destination path relative to the
    /// job's destination root.
    pub file: String,
    /// Key in the source adapter.
    pub source_path: String,
    /// Key in the destination adapter, after conflict resolution.
    pub destination_path: String,
    pub size_bytes: Option<u64>,
    pub loaded_bytes: u64,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub is_dir_marker: bool,
    /// Set once the destination has been opened for writing, so cleanup
    /// can find partially written objects.
    pub destination_opened: bool,
    /// The destination object was there before the job; cleanup keeps it.
    pub preexisting: bool,
}

/// A state change reported for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// `pending -> active`.
    Activate,
    /// The destination write is about to start. `size` is what the source
    /// reported, if anything.
    Opened { size: Option<u64> },
    /// Bytes handed to the destination so far.
    Progress(u64),
    /// `active -> completed` with the final byte count.
    Complete(u64),
    /// `pending|active -> failed`.
    Fail(String),
    /// `pending -> cancelled`.
    Cancel,
}

impl FileTask {
    pub fn new(
        file: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        size_bytes: Option<u64>,
        is_dir_marker: bool,
    ) -> Self {
        Self {
            file: file.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            size_bytes,
            loaded_bytes: 0,
            status: TaskStatus::Pending,
            error: None,
            is_dir_marker,
            destination_opened: false,
            preexisting: false,
        }
    }

    pub fn preexisting(mut self) -> Self {
        self.preexisting = true;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.status = TaskStatus::Skipped;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self
    }

    /// Applies `update` if it is legal from the current state. Returns
    /// `false` when the update was ignored.
    ///
    /// Terminal states never change and `loaded_bytes` never decreases.
    pub fn apply(&mut self, update: TaskUpdate) -> bool {
        match (self.status, update) {
            (TaskStatus::Pending, TaskUpdate::Activate) => {
                self.status = TaskStatus::Active;
                true
            }
            (TaskStatus::Active, TaskUpdate::Opened { size }) => {
                self.destination_opened = true;
                if size.is_some() {
                    self.size_bytes = size;
                }
                true
            }
            (TaskStatus::Active, TaskUpdate::Progress(loaded)) => {
                let loaded = match self.size_bytes {
                    Some(size) => loaded.min(size),
                    None => loaded,
                };
                if loaded <= self.loaded_bytes {
                    return false;
                }
                self.loaded_bytes = loaded;
                true
            }
            (TaskStatus::Active, TaskUpdate::Complete(loaded)) => {
                match self.size_bytes {
                    Some(size) if size != loaded => {
                        self.loaded_bytes = self.loaded_bytes.max(loaded.min(size));
                        self.status = TaskStatus::Failed;
                        self.error = Some(format!("size mismatch: expected {size} bytes, wrote {loaded}"));
                    }
                    _ => {
                        self.size_bytes = Some(loaded);
                        self.loaded_bytes = loaded;
                        self.status = TaskStatus::Completed;
                    }
                }
                true
            }
            (TaskStatus::Pending | TaskStatus::Active, TaskUpdate::Fail(error)) => {
                self.status = TaskStatus::Failed;
                self.error = Some(error);
                true
            }
            (TaskStatus::Pending, TaskUpdate::Cancel) => {
                self.status = TaskStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Fraction done in `0.0..=1.0`.
    fn fraction(&self) -> f64 {
        if self.status.is_terminal() {
            return 1.0;
        }
        match self.size_bytes {
            Some(0) => 0.0,
            Some(size) => self.loaded_bytes as f64 / size as f64,
            None => 0.0,
        }
    }

    pub fn to_progress(&self) -> FileProgress {
        FileProgress {
            file: self.file.clone(),
            loaded: self.loaded_bytes,
            total: self.size_bytes,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// Aggregate root of one transfer request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferJob {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub source: LocationRef,
    pub destination: LocationRef,
    pub conflict_resolution: ConflictResolution,
    pub tasks: Vec<FileTask>,
}

impl TransferJob {
    pub fn new(
        source: LocationRef,
        destination: LocationRef,
        conflict_resolution: ConflictResolution,
        tasks: Vec<FileTask>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            source,
            destination,
            conflict_resolution,
            tasks,
        }
    }

    /// Derived from task states:
    /// - any task pending or active: `queued` until admitted, then `running`
    /// - otherwise `cancelled` if any task was cancelled, `failed` if any
    ///   failed, else `completed`
    pub fn status(&self) -> JobStatus {
        if self.tasks.iter().any(|t| !t.status.is_terminal()) {
            return if self.started_at.is_some() {
                JobStatus::Running
            } else {
                JobStatus::Queued
            };
        }
        if self.tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
            JobStatus::Cancelled
        } else if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Percentage in `0.0..=100.0`. An empty job is done.
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 100.0;
        }
        let sum: f64 = self.tasks.iter().map(FileTask::fraction).sum();
        (sum / self.tasks.len() as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent {
            job_id: self.id.clone(),
            status: self.status(),
            progress: self.progress(),
            files: self.tasks.iter().map(FileTask::to_progress).collect(),
        }
    }

    pub fn to_files(&self) -> JobFilesResponse {
        JobFilesResponse {
            job_id: self.id.clone(),
            status: self.status(),
            files: self
                .tasks
                .iter()
                .map(|t| FileStatusEntry {
                    destination_path: t.destination_path.clone(),
                    status: t.status,
                    error: t.error.clone(),
                })
                .collect(),
        }
    }
}
