//! Transfer job engine.
//!
//! A request names a source location, a destination location, and items
//! to copy. The engine expands it into per-file tasks, settles destination
//! conflicts, runs the tasks under a global concurrency limit, and streams
//! progress to any number of subscribers.

mod broadcast;
mod config;
pub mod conflict;
mod error;
mod job;
pub mod planner;
mod registry;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

pub use broadcast::{ProgressBroadcaster, ProgressStream, once_stream, watch_stream};
pub use config::TransferConfig;
pub use conflict::{ConflictReport, ConflictResolver, Resolution};
pub use error::{PlanningError, TransferError};
pub use job::{FileTask, TaskUpdate, TransferJob};
pub use planner::{PlannedFile, Rooting};
pub use registry::{CleanupEntry, JobRegistry, JobSnapshot};
pub use scheduler::Scheduler;
pub use service::TransferService;
