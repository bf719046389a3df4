//! In-memory adapter with fault hooks for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use stevedore_protocol::EndpointType;
use stevedore_storage::{
    AdapterFuture, ByteStream, ObjectEntry, ReadStream, StorageAdapter, StorageError, collect_stream,
    is_dir_marker,
};
use tokio::sync::Semaphore;

#[derive(Default)]
struct Hooks {
    fail_writes: HashSet<String>,
    broken_reads: HashSet<String>,
    stalled_reads: HashSet<String>,
    slow_commits: HashMap<String, Duration>,
    gates: HashMap<String, Arc<Semaphore>>,
}

struct OpenRead(Arc<AtomicUsize>);

impl Drop for OpenRead {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MemoryAdapter {
    objects: Mutex<BTreeMap<String, Bytes>>,
    hooks: Mutex<Hooks>,
    offline: AtomicBool,
    open_reads: Arc<AtomicUsize>,
    peak_reads: AtomicUsize,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(objects: &[(&str, &str)]) -> Self {
        let adapter = Self::new();
        for (key, data) in objects {
            adapter.put(key, data);
        }
        adapter
    }

    pub fn put(&self, key: &str, data: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(data.as_bytes()));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Writes to `key` fail before consuming the body.
    pub fn fail_writes_to(&self, key: &str) {
        self.hooks.lock().unwrap().fail_writes.insert(key.to_string());
    }

    /// Reads of `key` yield half the object, then an error.
    pub fn break_reads_of(&self, key: &str) {
        self.hooks.lock().unwrap().broken_reads.insert(key.to_string());
    }

    /// Reads of `key` open but never yield.
    pub fn stall_reads_of(&self, key: &str) {
        self.hooks.lock().unwrap().stalled_reads.insert(key.to_string());
    }

    /// Writes to `key` drain the body, then take `delay` before the object
    /// lands.
    pub fn slow_commit(&self, key: &str, delay: Duration) {
        self.hooks
            .lock()
            .unwrap()
            .slow_commits
            .insert(key.to_string(), delay);
    }

    /// Reads of `key` open, then wait for one permit before yielding.
    pub fn gate(&self, key: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.hooks
            .lock()
            .unwrap()
            .gates
            .insert(key.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Most read streams open at the same time.
    pub fn peak_reads(&self) -> usize {
        self.peak_reads.load(Ordering::SeqCst)
    }
}

impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> EndpointType {
        EndpointType::Local
    }

    fn probe(&self) -> AdapterFuture<'_, bool> {
        Box::pin(async move { Ok(!self.offline.load(Ordering::SeqCst)) })
    }

    fn stream_read<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ReadStream> {
        Box::pin(async move {
            let data = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            let (broken, stalled, gate) = {
                let hooks = self.hooks.lock().unwrap();
                (
                    hooks.broken_reads.contains(key),
                    hooks.stalled_reads.contains(key),
                    hooks.gates.get(key).cloned(),
                )
            };

            let open = self.open_reads.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_reads.fetch_max(open, Ordering::SeqCst);
            let guard = OpenRead(Arc::clone(&self.open_reads));

            let size = data.len() as u64;
            let chunks: Vec<Result<Bytes, StorageError>> = if broken {
                vec![
                    Ok(data.slice(..data.len() / 2)),
                    Err(StorageError::Aborted("connection reset".into())),
                ]
            } else {
                vec![Ok(data)]
            };

            let stream: ByteStream = Box::pin(futures_util::stream::unfold(
                (chunks.into_iter(), gate, stalled, guard),
                |(mut chunks, gate, stalled, guard)| async move {
                    if stalled {
                        std::future::pending::<()>().await;
                    }
                    if let Some(gate) = &gate {
                        gate.acquire().await.ok()?.forget();
                    }
                    let item = chunks.next()?;
                    Some((item, (chunks, None, false, guard)))
                },
            ));
            Ok(ReadStream {
                stream,
                size: Some(size),
            })
        })
    }

    fn stream_write<'a>(
        &'a self,
        key: &'a str,
        body: ByteStream,
        _size: Option<u64>,
    ) -> AdapterFuture<'a, u64> {
        Box::pin(async move {
            let (fail, commit_delay) = {
                let hooks = self.hooks.lock().unwrap();
                (hooks.fail_writes.contains(key), hooks.slow_commits.get(key).copied())
            };
            if fail {
                return Err(StorageError::Api {
                    status: 403,
                    body: "access denied".into(),
                });
            }
            let data = collect_stream(body).await?;
            if let Some(delay) = commit_delay {
                tokio::time::sleep(delay).await;
            }
            let written = data.len() as u64;
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), Bytes::from(data));
            Ok(written)
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> AdapterFuture<'a, Vec<ObjectEntry>> {
        Box::pin(async move {
            let prefix = prefix.trim_end_matches('/');
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .iter()
                .filter(|(key, _)| prefix.is_empty() || key.starts_with(&format!("{prefix}/")))
                .map(|(key, data)| ObjectEntry {
                    key: key.clone(),
                    size: data.len() as u64,
                    is_dir_marker: is_dir_marker(key),
                })
                .collect())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, bool> {
        Box::pin(async move { Ok(self.objects.lock().unwrap().contains_key(key)) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        })
    }
}

/// Polls `cond` until it holds, panicking after a generous deadline.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `fut` with the same deadline as [`wait_until`].
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}
