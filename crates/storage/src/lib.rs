//! Storage adapters behind one streaming interface.
//!
//! Every backend (local directory, S3-compatible bucket, model registry)
//! implements [`StorageAdapter`]. Callers address objects with
//! `/`-separated relative keys; a key ending in `/` is a directory marker.
//!
//! The transfer engine is written once against the trait and never
//! branches on backend kind.

pub mod fs;
pub mod huggingface;
pub mod key;
pub mod location;
pub mod s3;

#[cfg(test)]
mod test_server;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use stevedore_protocol::EndpointType;

pub use fs::FsAdapter;
pub use huggingface::{HuggingFaceConfig, HuggingFaceHub, HuggingFaceSource};
pub use key::{file_name, is_dir_marker, join_key, normalize_key, parent_key, validate_key};
pub use location::{BackendConfig, Location, LocationConfig, LocationRegistry};
pub use s3::{S3Adapter, S3Config};

/// Read buffer used by adapters that stream from local handles (256 KiB).
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Default connect timeout for HTTP-backed adapters.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A stream of byte chunks flowing out of (or into) an adapter.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// A boxed future returned by adapter methods.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors produced by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("stream aborted: {0}")]
    Aborted(String),

    #[error("no data for {0:?}")]
    Idle(Duration),
}

/// An open read stream and the object size, when the backend reports one.
pub struct ReadStream {
    pub stream: ByteStream,
    pub size: Option<u64>,
}

/// One object found by [`StorageAdapter::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Key relative to the adapter root.
    pub key: String,
    pub size: u64,
    pub is_dir_marker: bool,
}

/// Uniform interface over one storage backend.
///
/// `list` treats its argument as a directory: `""` is the root and
/// `"docs"` and `"docs/"` are equivalent. Listings are recursive and sorted
/// by key.
pub trait StorageAdapter: Send + Sync + 'static {
    /// Backend family, for reporting.
    fn kind(&self) -> EndpointType;

    /// Returns `true` if the backend currently answers.
    fn probe(&self) -> AdapterFuture<'_, bool>;

    /// Opens a read stream for `key`.
    fn stream_read<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ReadStream>;

    /// Writes `body` to `key`, replacing any existing object.
    ///
    /// `size` is the expected length when known. Returns bytes written.
    fn stream_write<'a>(
        &'a self,
        key: &'a str,
        body: ByteStream,
        size: Option<u64>,
    ) -> AdapterFuture<'a, u64>;

    /// Recursively lists every object under `prefix`.
    fn list<'a>(&'a self, prefix: &'a str) -> AdapterFuture<'a, Vec<ObjectEntry>>;

    fn exists<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, bool>;

    /// Deletes `key`. Deleting a missing object succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ()>;
}

/// Builds the shared HTTP client used by the S3 and registry adapters.
///
/// `read_timeout` bounds each wait on the peer, so a wedged backend fails
/// the request instead of holding a worker slot.
pub fn http_client(connect_timeout: Duration, read_timeout: Duration) -> Result<reqwest::Client, StorageError> {
    let client = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .user_agent(concat!("stevedore/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Wraps an in-memory buffer as a single-chunk [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// An empty [`ByteStream`].
pub fn empty_stream() -> ByteStream {
    Box::pin(futures_util::stream::empty())
}

/// Drains a stream into memory. Intended for small payloads and tests.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>, StorageError> {
    use futures_util::StreamExt;

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
