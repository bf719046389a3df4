//! XML bodies exchanged with the object store.

use serde::{Deserialize, Serialize};

use crate::StorageError;

/// `ListObjectsV2` response.
#[derive(Debug, Deserialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListEntry>,
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

pub fn from_str<'de, T: Deserialize<'de>>(xml: &'de str) -> Result<T, StorageError> {
    quick_xml::de::from_str(xml).map_err(|e| StorageError::Xml(e.to_string()))
}

pub fn to_string<T: Serialize>(value: &T) -> Result<String, StorageError> {
    quick_xml::se::to_string(value).map_err(|e| StorageError::Xml(e.to_string()))
}
