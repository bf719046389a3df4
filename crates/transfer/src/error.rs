//! Error types for the transfer engine.

use stevedore_protocol::EndpointType;
use stevedore_storage::StorageError;

/// Rejections raised while turning a request into a job. No job exists
/// when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("no items to transfer")]
    EmptyItems,

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("location {0} is unavailable")]
    Unavailable(String),

    #[error("location {id} is {actual}, request says {requested}")]
    KindMismatch {
        id: String,
        actual: &'static str,
        requested: &'static str,
    },

    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("listing {path} failed: {source}")]
    Listing {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("checking {path} at destination failed: {source}")]
    Probe {
        path: String,
        #[source]
        source: StorageError,
    },
}

impl PlanningError {
    pub(crate) fn kind_mismatch(id: &str, actual: EndpointType, requested: EndpointType) -> Self {
        Self::KindMismatch {
            id: id.to_string(),
            actual: actual.as_str(),
            requested: requested.as_str(),
        }
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} has not finished")]
    JobActive(String),

    #[error("duplicate job id: {0}")]
    DuplicateJob(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
