//! Wire types for the stevedore HTTP API and progress stream.
//!
//! Every payload serializes as camelCase JSON so browser clients can use
//! the shapes directly.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    CancelResponse, CheckConflictsRequest, CheckConflictsResponse, CleanupFailure,
    CleanupResponse, ErrorResponse, FileProgress, FileStatusEntry, HuggingFaceImportRequest,
    JobFilesResponse, LocationInfo, ObjectInfo, ProgressEvent, TicketRequest, TicketResponse,
    TransferRequest, TransferStarted, UploadResponse,
};
pub use types::{
    ConflictResolution, EndpointType, ItemKind, JobStatus, LocationRef, ResourceType,
    TaskStatus, TransferItem,
};
