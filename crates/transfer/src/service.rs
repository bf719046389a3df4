//! Entry point used by the API layer.
//!
//! [`TransferService`] turns requests into jobs: it resolves and probes the
//! locations, expands items into files, settles destination conflicts,
//! registers the job, and hands it to the scheduler. Everything after that
//! is observed through the registry and the broadcaster.

use std::collections::HashSet;
use std::sync::Arc;

use stevedore_protocol::{
    CancelResponse, CheckConflictsRequest, CheckConflictsResponse, CleanupFailure, CleanupResponse,
    ConflictResolution, EndpointType, HuggingFaceImportRequest, JobFilesResponse, LocationRef,
    ProgressEvent, TransferItem, TransferRequest, TransferStarted,
};
use stevedore_storage::{
    HuggingFaceHub, Location, LocationRegistry, StorageAdapter, is_dir_marker, join_key,
    normalize_key, validate_key,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{ProgressBroadcaster, ProgressStream, once_stream, watch_stream};
use crate::config::TransferConfig;
use crate::conflict::{self, ConflictResolver, Resolution};
use crate::error::{PlanningError, TransferError};
use crate::job::{FileTask, TransferJob};
use crate::planner::{self, PlannedFile, Rooting};
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;

pub struct TransferService {
    locations: Arc<LocationRegistry>,
    hub: HuggingFaceHub,
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    scheduler: Scheduler,
    config: TransferConfig,
    base_url: String,
}

/// Source and destination of a job being planned.
struct Endpoints {
    source_ref: LocationRef,
    source: Arc<dyn StorageAdapter>,
    destination_ref: LocationRef,
    destination: Location,
}

impl TransferService {
    /// `base_url` prefixes the stream URLs handed back to clients.
    pub fn new(
        locations: Arc<LocationRegistry>,
        hub: HuggingFaceHub,
        config: TransferConfig,
        base_url: impl Into<String>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let scheduler = Scheduler::new(&config, Arc::clone(&registry), Arc::clone(&broadcaster));
        Self {
            locations,
            hub,
            registry,
            broadcaster,
            scheduler,
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn job_exists(&self, job_id: &str) -> bool {
        self.registry.get(job_id).is_ok()
    }

    // -----------------------------------------------------------------------
    // Job creation
    // -----------------------------------------------------------------------

    fn resolve(&self, location: &LocationRef) -> Result<Location, PlanningError> {
        let found = self
            .locations
            .get(&location.location_id)
            .ok_or_else(|| PlanningError::UnknownLocation(location.location_id.clone()))?;
        if found.kind != location.kind {
            return Err(PlanningError::kind_mismatch(&found.id, found.kind, location.kind));
        }
        Ok(found)
    }

    async fn ensure_available(id: &str, adapter: &dyn StorageAdapter) -> Result<(), PlanningError> {
        match adapter.probe().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PlanningError::Unavailable(id.to_string())),
            Err(e) => {
                debug!(location = id, error = %e, "probe failed");
                Err(PlanningError::Unavailable(id.to_string()))
            }
        }
    }

    async fn endpoints(
        &self,
        source_ref: &LocationRef,
        destination_ref: &LocationRef,
    ) -> Result<Endpoints, PlanningError> {
        let source = self.resolve(source_ref)?;
        let destination = self.resolve(destination_ref)?;
        Self::ensure_available(&source.id, source.adapter.as_ref()).await?;
        Self::ensure_available(&destination.id, destination.adapter.as_ref()).await?;
        Ok(Endpoints {
            source_ref: source_ref.clone(),
            source: source.adapter,
            destination_ref: destination_ref.clone(),
            destination,
        })
    }

    /// Plans and starts a transfer between two configured locations.
    pub async fn start_transfer(&self, request: TransferRequest) -> Result<TransferStarted, TransferError> {
        if request.items.is_empty() {
            return Err(PlanningError::EmptyItems.into());
        }
        let endpoints = self.endpoints(&request.source, &request.destination).await?;
        let planned = planner::expand(
            endpoints.source.as_ref(),
            &request.source.path,
            &request.items,
            Rooting::ItemParent,
        )
        .await?;
        self.launch(endpoints, planned, request.conflict_resolution).await
    }

    /// Imports repository files into a configured location. Repository
    /// paths are kept as they are under the destination path.
    pub async fn import_huggingface(
        &self,
        request: HuggingFaceImportRequest,
    ) -> Result<TransferStarted, TransferError> {
        let repo = self
            .hub
            .repo(&request.repo_id, request.revision.as_deref())
            .map_err(|e| PlanningError::InvalidPath {
                path: request.repo_id.clone(),
                reason: e.to_string(),
            })?;
        let destination = self.resolve(&request.destination)?;
        Self::ensure_available(&request.repo_id, &repo).await?;
        Self::ensure_available(&destination.id, destination.adapter.as_ref()).await?;

        let items: Vec<TransferItem> = if request.files.is_empty() {
            vec![TransferItem::directory("")]
        } else {
            request.files.iter().map(TransferItem::file).collect()
        };
        let source: Arc<dyn StorageAdapter> = Arc::new(repo);
        let planned = planner::expand(source.as_ref(), "", &items, Rooting::SourceRoot).await?;

        let endpoints = Endpoints {
            source_ref: LocationRef {
                kind: EndpointType::HuggingFace,
                location_id: request.repo_id.clone(),
                path: String::new(),
            },
            source,
            destination_ref: request.destination.clone(),
            destination,
        };
        self.launch(endpoints, planned, request.conflict_resolution).await
    }

    async fn launch(
        &self,
        endpoints: Endpoints,
        planned: Vec<PlannedFile>,
        policy: ConflictResolution,
    ) -> Result<TransferStarted, TransferError> {
        let dest_root = destination_root(&endpoints.destination_ref.path)?;
        let destination = endpoints.destination.adapter.as_ref();

        let keys: Vec<String> = planned.iter().map(|p| join_key(&dest_root, &p.file)).collect();
        let mut resolver = ConflictResolver::new(destination, policy, self.config.rename_attempts);
        resolver.prefetch(&keys).await;

        let mut tasks = Vec::with_capacity(planned.len());
        for (file, key) in planned.into_iter().zip(keys) {
            let task = match resolver.resolve(&key).await {
                Resolution::Write(target) => task_for(&file, target, &dest_root),
                Resolution::Reuse(target) => task_for(&file, target, &dest_root).preexisting(),
                Resolution::Skip(target) => task_for(&file, target, &dest_root).skipped(),
                Resolution::Duplicate(target) => {
                    debug!(source = %file.source_key, destination = %target, "duplicate destination dropped");
                    continue;
                }
                Resolution::Fail(target, message) => task_for(&file, target, &dest_root).failed(message),
            };
            tasks.push(task);
        }

        let job = TransferJob::new(endpoints.source_ref, endpoints.destination_ref, policy, tasks);
        let job_id = job.id.clone();
        let snapshot = self.registry.register(job)?;
        self.broadcaster.open(snapshot);
        self.scheduler
            .submit(&job_id, endpoints.source, Arc::clone(&endpoints.destination.adapter));

        Ok(TransferStarted {
            sse_url: format!("{}/transfer/{job_id}/events", self.base_url),
            job_id,
        })
    }

    /// Reports which planned destinations already exist. Nothing is
    /// registered or written.
    pub async fn check_conflicts(
        &self,
        request: CheckConflictsRequest,
    ) -> Result<CheckConflictsResponse, TransferError> {
        if request.items.is_empty() {
            return Err(PlanningError::EmptyItems.into());
        }
        let endpoints = self.endpoints(&request.source, &request.destination).await?;
        let planned = planner::expand(
            endpoints.source.as_ref(),
            &request.source.path,
            &request.items,
            Rooting::ItemParent,
        )
        .await?;

        let dest_root = destination_root(&request.destination.path)?;
        let candidates: Vec<&PlannedFile> = planned.iter().filter(|p| !p.is_dir_marker).collect();
        let keys: Vec<String> = candidates.iter().map(|p| join_key(&dest_root, &p.file)).collect();
        let report = conflict::check(endpoints.destination.adapter.as_ref(), &keys)
            .await
            .map_err(|e| PlanningError::Probe {
                path: request.destination.path.clone(),
                source: e,
            })?;

        let conflicting: HashSet<&str> = report.conflicting.iter().map(String::as_str).collect();
        let mut response = CheckConflictsResponse::default();
        for (file, key) in candidates.into_iter().zip(&keys) {
            if conflicting.contains(key.as_str()) {
                response.conflicts.push(file.file.clone());
            } else {
                response.non_conflicting.push(file.file.clone());
            }
        }
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Job control
    // -----------------------------------------------------------------------

    pub fn cancel(&self, job_id: &str) -> Result<CancelResponse, TransferError> {
        let cancelled_tasks = self.scheduler.cancel(job_id)?;
        let status = self.registry.snapshot(job_id)?.event.status;
        Ok(CancelResponse {
            job_id: job_id.to_string(),
            status,
            cancelled_tasks,
        })
    }

    pub fn files(&self, job_id: &str) -> Result<JobFilesResponse, TransferError> {
        Ok(self.registry.get(job_id)?.to_files())
    }

    pub fn snapshot(&self, job_id: &str) -> Result<ProgressEvent, TransferError> {
        Ok(self.registry.snapshot(job_id)?.event)
    }

    /// Progress stream for a job: the current snapshot, then every change
    /// until the terminal event. A finished job yields its final snapshot
    /// once.
    pub fn subscribe(&self, job_id: &str) -> Result<ProgressStream, TransferError> {
        // The registry is updated before a terminal publish closes the
        // channel, so once the channel is gone the stored snapshot is final.
        if let Some(rx) = self.broadcaster.receiver(job_id) {
            return Ok(watch_stream(rx));
        }
        Ok(once_stream(self.registry.snapshot(job_id)?.event))
    }

    /// Deletes whatever a finished job wrote: completed files and files
    /// the destination had started receiving. Skipped files and files never
    /// opened are left alone.
    pub async fn cleanup(&self, job_id: &str) -> Result<CleanupResponse, TransferError> {
        let job = self.registry.get(job_id)?;
        if !job.is_terminal() {
            return Err(TransferError::JobActive(job_id.to_string()));
        }
        let destination = self
            .locations
            .get(&job.destination.location_id)
            .ok_or_else(|| PlanningError::UnknownLocation(job.destination.location_id.clone()))?;

        let mut entries: Vec<_> = self
            .registry
            .list_files_for_cleanup(job_id)?
            .into_iter()
            .filter(|e| e.written)
            .collect();
        // Directory markers go last so their contents are already gone.
        entries.sort_by_key(|e| is_dir_marker(&e.destination_path));

        let mut response = CleanupResponse::default();
        for entry in entries {
            match destination.adapter.delete(&entry.destination_path).await {
                Ok(()) => response.deleted.push(entry.destination_path),
                Err(e) => {
                    warn!(job_id, path = %entry.destination_path, error = %e, "cleanup delete failed");
                    response.failed.push(CleanupFailure {
                        path: entry.destination_path,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(job_id, deleted = response.deleted.len(), failed = response.failed.len(), "cleanup done");
        Ok(response)
    }

    /// Forgets a job. Open streams end without a further event.
    pub fn evict(&self, job_id: &str) -> bool {
        self.broadcaster.close(job_id);
        self.registry.evict(job_id).is_some()
    }

    /// Periodically evicts jobs that finished longer ago than the
    /// configured retention.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.eviction_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for job_id in service.registry.evict_expired(service.config.job_retention()) {
                            service.broadcaster.close(&job_id);
                            debug!(job_id = %job_id, "job evicted");
                        }
                    }
                }
            }
        })
    }
}

fn destination_root(path: &str) -> Result<String, PlanningError> {
    let root = normalize_key(path).trim_end_matches('/').to_string();
    if !root.is_empty() {
        validate_key(&root).map_err(|e| PlanningError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(root)
}

fn task_for(file: &PlannedFile, destination_key: String, dest_root: &str) -> FileTask {
    let relative = if dest_root.is_empty() {
        destination_key.clone()
    } else {
        destination_key
            .strip_prefix(dest_root)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
            .unwrap_or_else(|| file.file.clone())
    };
    FileTask::new(relative, &file.source_key, destination_key, file.size, file.is_dir_marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryAdapter, wait_until, within};
    use futures_util::StreamExt;
    use stevedore_protocol::{JobStatus, TaskStatus};
    use stevedore_storage::{FsAdapter, HuggingFaceConfig};

    fn loc(id: &str, path: &str) -> LocationRef {
        LocationRef {
            kind: EndpointType::Local,
            location_id: id.into(),
            path: path.into(),
        }
    }

    fn service_with(src: Arc<dyn StorageAdapter>, dst: Arc<dyn StorageAdapter>) -> Arc<TransferService> {
        let mut locations = LocationRegistry::new();
        locations.insert("src", src).unwrap();
        locations.insert("dst", dst).unwrap();
        let hub = HuggingFaceHub::new(&HuggingFaceConfig::default()).unwrap();
        Arc::new(TransferService::new(
            Arc::new(locations),
            hub,
            TransferConfig::default(),
            "http://localhost:8080/",
        ))
    }

    fn request(items: Vec<TransferItem>, policy: ConflictResolution) -> TransferRequest {
        TransferRequest {
            source: loc("src", "docs"),
            destination: loc("dst", "backup"),
            items,
            conflict_resolution: policy,
        }
    }

    async fn finish(service: &TransferService, job_id: &str) -> ProgressEvent {
        let mut events = service.subscribe(job_id).unwrap();
        let mut last = None;
        while let Some(event) = within(events.next()).await {
            last = Some(event);
        }
        last.expect("at least one event")
    }

    #[tokio::test]
    async fn skip_leaves_existing_files_alone() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a.txt", "new a"), ("docs/b.txt", "new b")]));
        let dst = Arc::new(MemoryAdapter::with(&[("backup/a.txt", "old a")]));
        let service = service_with(src.clone(), dst.clone());

        let started = service
            .start_transfer(request(
                vec![TransferItem::file("a.txt"), TransferItem::file("b.txt")],
                ConflictResolution::Skip,
            ))
            .await
            .unwrap();
        assert_eq!(
            started.sse_url,
            format!("http://localhost:8080/transfer/{}/events", started.job_id)
        );

        let last = finish(&service, &started.job_id).await;
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.files[0].status, TaskStatus::Skipped);
        assert_eq!(last.files[0].file, "a.txt");
        assert_eq!(last.files[1].status, TaskStatus::Completed);
        assert_eq!(dst.get("backup/a.txt").as_deref(), Some("old a"));
        assert_eq!(dst.get("backup/b.txt").as_deref(), Some("new b"));
    }

    #[tokio::test]
    async fn rename_picks_unused_names() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a.txt", "new")]));
        let dst = Arc::new(MemoryAdapter::with(&[("backup/a.txt", "old"), ("backup/a (1).txt", "older")]));
        let service = service_with(src.clone(), dst.clone());

        let started = service
            .start_transfer(request(vec![TransferItem::file("a.txt")], ConflictResolution::Rename))
            .await
            .unwrap();
        let last = finish(&service, &started.job_id).await;

        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.files[0].file, "a (2).txt");
        assert_eq!(dst.get("backup/a (2).txt").as_deref(), Some("new"));
        assert_eq!(dst.get("backup/a.txt").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn overwrite_replaces_and_directories_expand() {
        let src = Arc::new(MemoryAdapter::with(&[
            ("docs/x/one.txt", "1"),
            ("docs/x/deep/two.txt", "22"),
        ]));
        let dst = Arc::new(MemoryAdapter::with(&[("backup/x/one.txt", "stale")]));
        let service = service_with(src.clone(), dst.clone());

        let started = service
            .start_transfer(request(vec![TransferItem::directory("x")], ConflictResolution::Overwrite))
            .await
            .unwrap();
        let last = finish(&service, &started.job_id).await;

        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(dst.get("backup/x/one.txt").as_deref(), Some("1"));
        assert_eq!(dst.get("backup/x/deep/two.txt").as_deref(), Some("22"));
    }

    #[tokio::test]
    async fn planning_errors_create_no_job() {
        let src = Arc::new(MemoryAdapter::new());
        let dst = Arc::new(MemoryAdapter::new());
        dst.set_offline(true);
        let service = service_with(src, dst);

        let err = service
            .start_transfer(request(vec![], ConflictResolution::Overwrite))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Planning(PlanningError::EmptyItems)));

        let mut bad = request(vec![TransferItem::file("a")], ConflictResolution::Overwrite);
        bad.source.location_id = "nope".into();
        let err = service.start_transfer(bad).await.unwrap_err();
        assert!(matches!(err, TransferError::Planning(PlanningError::UnknownLocation(_))));

        let mut bad = request(vec![TransferItem::file("a")], ConflictResolution::Overwrite);
        bad.source.kind = EndpointType::S3;
        let err = service.start_transfer(bad).await.unwrap_err();
        assert!(matches!(err, TransferError::Planning(PlanningError::KindMismatch { .. })));

        let err = service
            .start_transfer(request(vec![TransferItem::file("a")], ConflictResolution::Overwrite))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Planning(PlanningError::Unavailable(id)) if id == "dst"));

        assert!(service.registry.is_empty());
    }

    #[tokio::test]
    async fn check_conflicts_reports_relative_paths() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a.txt", "a"), ("docs/b.txt", "b")]));
        let dst = Arc::new(MemoryAdapter::with(&[("backup/a.txt", "old")]));
        let service = service_with(src, dst.clone());

        let response = service
            .check_conflicts(CheckConflictsRequest {
                source: loc("src", "docs"),
                destination: loc("dst", "backup"),
                items: vec![TransferItem::file("a.txt"), TransferItem::file("b.txt")],
            })
            .await
            .unwrap();
        assert_eq!(response.conflicts, vec!["a.txt"]);
        assert_eq!(response.non_conflicting, vec!["b.txt"]);
        assert_eq!(dst.keys(), vec!["backup/a.txt"]);
        assert!(service.registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_reports_pending_count() {
        let files: Vec<String> = (0..4).map(|i| format!("docs/{i}.bin")).collect();
        let objects: Vec<(&str, &str)> = files.iter().map(|f| (f.as_str(), "data")).collect();
        let src = Arc::new(MemoryAdapter::with(&objects));
        let gates: Vec<_> = files.iter().map(|f| src.gate(f)).collect();
        let dst = Arc::new(MemoryAdapter::new());
        let service = service_with(src, dst);

        let started = service
            .start_transfer(request(vec![TransferItem::directory("")], ConflictResolution::Overwrite))
            .await
            .unwrap();
        let job_id = started.job_id;
        wait_until(|| {
            let files = service.files(&job_id).unwrap().files;
            files.iter().filter(|f| f.status == TaskStatus::Active).count() == 2
        })
        .await;

        let response = service.cancel(&job_id).unwrap();
        assert_eq!(response.cancelled_tasks, 2);
        assert_eq!(response.status, JobStatus::Running);

        for gate in &gates {
            gate.add_permits(1);
        }
        let last = finish(&service, &job_id).await;
        assert_eq!(last.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = Arc::new(MemoryAdapter::with(&[
            ("docs/done.txt", "complete"),
            ("docs/partial.txt", "0123456789"),
            ("docs/kept.txt", "source"),
        ]));
        src.break_reads_of("docs/partial.txt");
        std::fs::create_dir_all(dir.path().join("backup")).unwrap();
        std::fs::write(dir.path().join("backup/kept.txt"), "untouched").unwrap();
        let dst: Arc<dyn StorageAdapter> = Arc::new(FsAdapter::new(dir.path()));
        let service = service_with(src, dst);

        let started = service
            .start_transfer(request(
                vec![
                    TransferItem::file("done.txt"),
                    TransferItem::file("partial.txt"),
                    TransferItem::file("kept.txt"),
                ],
                ConflictResolution::Skip,
            ))
            .await
            .unwrap();
        let last = finish(&service, &started.job_id).await;
        assert_eq!(last.status, JobStatus::Failed);

        let response = service.cleanup(&started.job_id).await.unwrap();
        let mut deleted = response.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["backup/done.txt", "backup/partial.txt"]);
        assert!(response.failed.is_empty());
        assert!(!dir.path().join("backup/done.txt").exists());
        assert!(!dir.path().join("backup/partial.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("backup/kept.txt")).unwrap(),
            "untouched"
        );
    }

    #[tokio::test]
    async fn cleanup_keeps_directories_that_were_already_there() {
        let dir = tempfile::tempdir().unwrap();
        let src = Arc::new(MemoryAdapter::with(&[
            ("docs/tree/a.txt", "alpha"),
            ("docs/tree/old/", ""),
            ("docs/tree/new/", ""),
        ]));
        std::fs::create_dir_all(dir.path().join("backup/tree/old")).unwrap();
        let dst: Arc<dyn StorageAdapter> = Arc::new(FsAdapter::new(dir.path()));
        let service = service_with(src, dst);

        let started = service
            .start_transfer(request(vec![TransferItem::directory("tree")], ConflictResolution::Overwrite))
            .await
            .unwrap();
        let last = finish(&service, &started.job_id).await;
        assert_eq!(last.status, JobStatus::Completed);
        assert!(dir.path().join("backup/tree/new").is_dir());

        let response = service.cleanup(&started.job_id).await.unwrap();
        let mut deleted = response.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["backup/tree/a.txt", "backup/tree/new/"]);
        assert!(response.failed.is_empty());
        assert!(dir.path().join("backup/tree/old").is_dir());
        assert!(!dir.path().join("backup/tree/new").exists());
    }

    #[tokio::test]
    async fn cleanup_refuses_running_jobs() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a", "data")]));
        let gate = src.gate("docs/a");
        let dst = Arc::new(MemoryAdapter::new());
        let service = service_with(src, dst);

        let started = service
            .start_transfer(request(vec![TransferItem::file("a")], ConflictResolution::Overwrite))
            .await
            .unwrap();
        let err = service.cleanup(&started.job_id).await.unwrap_err();
        assert!(matches!(err, TransferError::JobActive(_)));

        gate.add_permits(1);
        finish(&service, &started.job_id).await;
    }

    #[tokio::test]
    async fn finished_job_streams_one_event() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a", "data")]));
        let dst = Arc::new(MemoryAdapter::new());
        let service = service_with(src, dst);

        let started = service
            .start_transfer(request(vec![TransferItem::file("a")], ConflictResolution::Overwrite))
            .await
            .unwrap();
        finish(&service, &started.job_id).await;

        let events: Vec<_> = within(service.subscribe(&started.job_id).unwrap().collect()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, JobStatus::Completed);

        assert!(service.evict(&started.job_id));
        assert!(matches!(
            service.subscribe(&started.job_id),
            Err(TransferError::JobNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_subscription_ends_on_the_terminal_event() {
        let src = Arc::new(MemoryAdapter::with(&[("docs/a", "data")]));
        let dst = Arc::new(MemoryAdapter::new());
        let service = service_with(src, dst);

        for _ in 0..200 {
            let started = service
                .start_transfer(request(vec![TransferItem::file("a")], ConflictResolution::Overwrite))
                .await
                .unwrap();
            let last = finish(&service, &started.job_id).await;
            assert_eq!(last.status, JobStatus::Completed);
            assert_eq!(last.progress, 100.0);
        }
    }

    #[tokio::test]
    async fn import_rejects_bad_repo_ids() {
        let dst = Arc::new(MemoryAdapter::new());
        let service = service_with(Arc::new(MemoryAdapter::new()), dst);

        let err = service
            .import_huggingface(HuggingFaceImportRequest {
                repo_id: "../../etc".into(),
                revision: None,
                files: vec![],
                destination: loc("dst", "models"),
                conflict_resolution: ConflictResolution::Overwrite,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Planning(PlanningError::InvalidPath { .. })));
    }

    #[test]
    fn task_paths_are_relative_to_destination_root() {
        let planned = PlannedFile {
            file: "a.txt".into(),
            source_key: "docs/a.txt".into(),
            size: Some(3),
            is_dir_marker: false,
        };
        let task = task_for(&planned, "backup/a (1).txt".into(), "backup");
        assert_eq!(task.file, "a (1).txt");
        assert_eq!(task.destination_path, "backup/a (1).txt");

        let task = task_for(&planned, "a.txt".into(), "");
        assert_eq!(task.file, "a.txt");
    }
}
