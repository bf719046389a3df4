//! Fan-out of job progress to live subscribers.
//!
//! Each open job owns one `watch` channel holding its latest snapshot. A
//! new subscriber therefore starts from current progress, and slow
//! subscribers only ever see the newest state. Publishing a terminal
//! snapshot sends it and drops the sender, which ends every stream for
//! that job once the final event has been read.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use stevedore_protocol::ProgressEvent;
use tokio::sync::watch;
use tracing::debug;

use crate::registry::JobSnapshot;

/// A stream of progress events that ends after the terminal event.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<String, watch::Sender<JobSnapshot>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<JobSnapshot>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the channel for a newly registered job. A job that is already
    /// terminal gets no channel; subscribers fall back to the registry.
    pub fn open(&self, snapshot: JobSnapshot) {
        if snapshot.is_terminal() {
            return;
        }
        let job_id = snapshot.event.job_id.clone();
        let (tx, _) = watch::channel(snapshot);
        self.channels().insert(job_id, tx);
    }

    /// Publishes `snapshot` unless a newer one was already sent. A terminal
    /// snapshot closes the job's channel.
    pub fn publish(&self, snapshot: JobSnapshot) {
        let mut channels = self.channels();
        let job_id = snapshot.event.job_id.clone();
        let terminal = snapshot.is_terminal();

        let Some(tx) = channels.get(&job_id) else {
            return;
        };
        let revision = snapshot.revision;
        tx.send_if_modified(|current| {
            if revision > current.revision {
                *current = snapshot;
                true
            } else {
                false
            }
        });

        if terminal {
            channels.remove(&job_id);
            debug!(job_id = %job_id, "progress channel closed");
        }
    }

    /// Drops the job's channel without a final event (eviction).
    pub fn close(&self, job_id: &str) {
        self.channels().remove(job_id);
    }

    /// Receiver for a job that is still running, if any.
    pub fn receiver(&self, job_id: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.channels().get(job_id).map(watch::Sender::subscribe)
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.channels()
            .get(job_id)
            .map(watch::Sender::receiver_count)
            .unwrap_or(0)
    }
}

enum Cursor {
    Current(watch::Receiver<JobSnapshot>),
    Next(watch::Receiver<JobSnapshot>),
    Done,
}

/// Turns a receiver into a stream that yields the current snapshot first,
/// then every change, and ends after a terminal event or when the channel
/// closes.
pub fn watch_stream(rx: watch::Receiver<JobSnapshot>) -> ProgressStream {
    Box::pin(futures_util::stream::unfold(
        Cursor::Current(rx),
        |cursor| async move {
            let mut rx = match cursor {
                Cursor::Current(rx) => rx,
                Cursor::Next(mut rx) => {
                    rx.changed().await.ok()?;
                    rx
                }
                Cursor::Done => return None,
            };
            let event = rx.borrow_and_update().event.clone();
            let next = if event.status.is_terminal() {
                Cursor::Done
            } else {
                Cursor::Next(rx)
            };
            Some((event, next))
        },
    ))
}

/// A stream holding a single event.
pub fn once_stream(event: ProgressEvent) -> ProgressStream {
    Box::pin(futures_util::stream::once(async move { event }))
}
