use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ConflictResolution, EndpointType, JobStatus, LocationRef, ResourceType, TaskStatus,
    TransferItem,
};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a transfer job (`POST /transfer`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: LocationRef,
    pub destination: LocationRef,
    pub items: Vec<TransferItem>,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
}

/// Previews which items already exist at the destination
/// (`POST /transfer/check-conflicts`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictsRequest {
    pub source: LocationRef,
    pub destination: LocationRef,
    pub items: Vec<TransferItem>,
}

/// Imports files from an external model repository (`POST /import/huggingface`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuggingFaceImportRequest {
    pub repo_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Repository-relative paths; empty imports the whole repository.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    pub destination: LocationRef,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
}

/// Requests a one-time stream ticket (`POST /auth/sse-ticket`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub resource: String,
    pub resource_type: ResourceType,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Returned when a job has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStarted {
    pub job_id: String,
    pub sse_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictsResponse {
    pub conflicts: Vec<String>,
    pub non_conflicting: Vec<String>,
}

/// Result of `DELETE /transfer/:jobId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    /// Tasks moved straight from pending to cancelled by this request.
    pub cancelled_tasks: usize,
}

/// Last-known state of one destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusEntry {
    pub destination_path: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `GET /transfer/:jobId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilesResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub files: Vec<FileStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub path: String,
    pub error: String,
}

/// Result of `POST /transfer/:jobId/cleanup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ticket: String,
    pub sse_url: String,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry.
    pub expires_in: u64,
}

/// A configured location and whether it currently answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub id: String,
    pub kind: EndpointType,
    pub available: bool,
}

/// One object found while browsing a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dir_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub key: String,
    pub bytes_written: u64,
}

/// JSON body attached to every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

// ---------------------------------------------------------------------------
// Progress stream
// ---------------------------------------------------------------------------

/// Per-file entry of a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    pub file: String,
    pub loaded: u64,
    pub total: Option<u64>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot pushed over the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub files: Vec<FileProgress>,
}
