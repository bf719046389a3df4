//! Runs file tasks under one global concurrency limit.
//!
//! Every submitted job gets a driver that walks its tasks in order. Before
//! a task starts the driver takes a permit from the shared semaphore, so
//! at most `concurrency` tasks move bytes at once across all jobs. The
//! permit is held until the task reaches a terminal state.
//!
//! A worker pipes the source stream into the destination through a small
//! bounded channel. Bytes are counted as the destination pulls them and a
//! ticker turns the count into coalesced progress updates. The transfer
//! future is never dropped mid-write, so a destination always gets to
//! finish or abort its object.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, StreamExt};
use stevedore_protocol::TaskStatus;
use stevedore_storage::{ByteStream, StorageAdapter, StorageError, empty_stream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::job::{FileTask, TaskUpdate};
use crate::registry::JobRegistry;

/// Chunks buffered between a source and its destination.
const PIPE_DEPTH: usize = 4;

/// Per-task copy settings.
#[derive(Debug, Clone, Copy)]
struct PipeSettings {
    chunk_size: usize,
    progress_interval: Duration,
    idle_timeout: Duration,
}

#[derive(Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
    settings: PipeSettings,
}

impl Scheduler {
    pub fn new(
        config: &TransferConfig,
        registry: Arc<JobRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            registry,
            broadcaster,
            cancels: Arc::new(Mutex::new(HashMap::new())),
            settings: PipeSettings {
                chunk_size: config.chunk_size.max(1),
                progress_interval: config.progress_interval(),
                idle_timeout: config.idle_timeout(),
            },
        }
    }

    fn cancels(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Slots not held by a running task.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Starts driving a registered job. The returned handle resolves once
    /// every task of the job has reached a terminal state.
    pub fn submit(
        &self,
        job_id: &str,
        source: Arc<dyn StorageAdapter>,
        destination: Arc<dyn StorageAdapter>,
    ) -> JoinHandle<()> {
        let cancel = CancellationToken::new();
        self.cancels().insert(job_id.to_string(), cancel.clone());

        let scheduler = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            scheduler.drive(&job_id, source, destination, cancel).await;
            scheduler.cancels().remove(&job_id);
        })
    }

    /// Cancels every pending task of a job. Active tasks finish on their
    /// own. Returns how many tasks were cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<usize, TransferError> {
        let (cancelled, snapshot) = self.registry.cancel(job_id)?;
        self.broadcaster.publish(snapshot);
        if let Some(token) = self.cancels().get(job_id) {
            token.cancel();
        }
        info!(job_id, cancelled, "cancellation accepted");
        Ok(cancelled)
    }

    fn apply(&self, job_id: &str, index: usize, update: TaskUpdate) {
        match self.registry.update_task(job_id, index, update) {
            Ok(Some(snapshot)) => self.broadcaster.publish(snapshot),
            Ok(None) => {}
            Err(e) => debug!(job_id, error = %e, "update for a job that is gone"),
        }
    }

    async fn drive(
        &self,
        job_id: &str,
        source: Arc<dyn StorageAdapter>,
        destination: Arc<dyn StorageAdapter>,
        cancel: CancellationToken,
    ) {
        let count = match self.registry.get(job_id) {
            Ok(job) => job.tasks.len(),
            Err(e) => {
                warn!(job_id, error = %e, "submitted job is not registered");
                return;
            }
        };
        let mut workers = JoinSet::new();

        for index in 0..count {
            match self.registry.task(job_id, index) {
                Ok(Some(task)) if task.status == TaskStatus::Pending => {}
                Ok(_) => continue,
                Err(_) => break,
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Cancellation may have won the race for this task.
            match self.registry.update_task(job_id, index, TaskUpdate::Activate) {
                Ok(Some(snapshot)) => self.broadcaster.publish(snapshot),
                Ok(None) => continue,
                Err(_) => break,
            }

            let worker = self.clone();
            let job_id = job_id.to_string();
            let source = Arc::clone(&source);
            let destination = Arc::clone(&destination);
            workers.spawn(async move {
                worker
                    .run_task(&job_id, index, source.as_ref(), destination.as_ref())
                    .await;
                drop(permit);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(job_id, error = %e, "transfer worker aborted");
            }
        }
    }

    async fn run_task(
        &self,
        job_id: &str,
        index: usize,
        source: &dyn StorageAdapter,
        destination: &dyn StorageAdapter,
    ) {
        let Ok(Some(task)) = self.registry.task(job_id, index) else {
            return;
        };
        debug!(job_id, file = %task.file, "task started");

        let outcome = AssertUnwindSafe(self.pipe(job_id, index, &task, source, destination))
            .catch_unwind()
            .await;
        let update = match outcome {
            Ok(Ok(written)) => {
                debug!(job_id, file = %task.file, bytes = written, "task finished");
                TaskUpdate::Complete(written)
            }
            Ok(Err(message)) => {
                warn!(job_id, file = %task.file, error = %message, "task failed");
                TaskUpdate::Fail(message)
            }
            Err(_) => {
                error!(job_id, file = %task.file, "transfer worker panicked");
                TaskUpdate::Fail("transfer worker panicked".into())
            }
        };
        self.apply(job_id, index, update);
    }

    /// Copies one task's object. Returns the bytes written or the message
    /// the task should fail with.
    async fn pipe(
        &self,
        job_id: &str,
        index: usize,
        task: &FileTask,
        source: &dyn StorageAdapter,
        destination: &dyn StorageAdapter,
    ) -> Result<u64, String> {
        if task.is_dir_marker {
            self.apply(job_id, index, TaskUpdate::Opened { size: Some(0) });
            return destination
                .stream_write(&task.destination_path, empty_stream(), Some(0))
                .await
                .map_err(|e| e.to_string());
        }

        // A failed open leaves the destination untouched.
        let read = source
            .stream_read(&task.source_path)
            .await
            .map_err(|e| e.to_string())?;
        let size = read.size.or(task.size_bytes);
        self.apply(job_id, index, TaskUpdate::Opened { size: read.size });

        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let forwarded = Arc::new(AtomicU64::new(0));
        let settings = self.settings;

        let reader = pump(read.stream, tx, settings.chunk_size, settings.idle_timeout);
        let body = counted(rx, Arc::clone(&forwarded));
        let writer = destination.stream_write(&task.destination_path, body, size);
        let transfer = async { tokio::join!(reader, writer) };
        tokio::pin!(transfer);

        let mut ticker = tokio::time::interval(settings.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reported = 0;

        // Source stalls are bounded inside `pump`, which hands the writer an
        // error so it can run its own abort path. A writer that stops pulling
        // is still finishing its object and is bounded by its adapter.
        let (read_result, write_result) = loop {
            tokio::select! {
                results = &mut transfer => break results,
                _ = ticker.tick() => {
                    let loaded = forwarded.load(Ordering::Relaxed);
                    if loaded > reported {
                        reported = loaded;
                        self.apply(job_id, index, TaskUpdate::Progress(loaded));
                    }
                }
            }
        };

        match (read_result, write_result) {
            (Err(e), _) => Err(e.to_string()),
            (Ok(_), Err(e)) => Err(e.to_string()),
            (Ok(_), Ok(written)) => Ok(written),
        }
    }
}

/// Moves `stream` into `tx` re-chunked to `chunk_size`. A source error is
/// forwarded so the writer aborts, then returned. Stops quietly when the
/// writer hangs up.
async fn pump(
    mut stream: ByteStream,
    tx: mpsc::Sender<Result<Bytes, StorageError>>,
    chunk_size: usize,
    idle_timeout: Duration,
) -> Result<u64, StorageError> {
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut total = 0u64;

    loop {
        let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(StorageError::Idle(idle_timeout))),
        };
        match next {
            Some(Ok(bytes)) => {
                buf.extend_from_slice(&bytes);
                while buf.len() >= chunk_size {
                    let chunk = buf.split_to(chunk_size).freeze();
                    total += chunk.len() as u64;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return Ok(total);
                    }
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(StorageError::Aborted(e.to_string()))).await;
                return Err(e);
            }
            None => break,
        }
    }

    if !buf.is_empty() {
        let chunk = buf.freeze();
        total += chunk.len() as u64;
        let _ = tx.send(Ok(chunk)).await;
    }
    Ok(total)
}

/// Body stream for the destination. Counts bytes as they are pulled.
fn counted(rx: mpsc::Receiver<Result<Bytes, StorageError>>, counter: Arc<AtomicU64>) -> ByteStream {
    Box::pin(futures_util::stream::unfold(rx, move |mut rx| {
        let counter = Arc::clone(&counter);
        async move {
            let item = rx.recv().await?;
            if let Ok(bytes) = &item {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Some((item, rx))
        }
    }))
}
