use serde::{Deserialize, Serialize};

/// Backend family of a storage endpoint as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointType {
    #[serde(rename = "local", alias = "filesystem")]
    Local,
    #[serde(rename = "s3", alias = "object")]
    S3,
    /// External model registry (read-only import source).
    #[serde(rename = "huggingface")]
    HuggingFace,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::HuggingFace => "huggingface",
        }
    }
}

/// A location plus a path inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRef {
    #[serde(rename = "type")]
    pub kind: EndpointType,
    pub location_id: String,
    #[serde(default)]
    pub path: String,
}

/// Whether a requested item is a single object or a prefix to expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
}

/// One entry of a transfer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

impl TransferItem {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::Directory,
        }
    }
}

/// Policy applied when a destination path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Overwrite,
    Skip,
    Rename,
}

/// Aggregate state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// State of a single file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }
}

/// What a one-time ticket grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Transfer,
    Upload,
}
