//! S3-compatible object store adapter.
//!
//! Requests are signed with SigV4 over an unsigned payload so bodies can be
//! streamed. Objects up to [`MAX_SINGLE_PUT`] with a known size go up in one
//! `PUT`; everything else uses multipart upload in [`PART_SIZE`] parts.

pub mod sigv4;
pub mod xml;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, ETAG};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use stevedore_protocol::EndpointType;
use tracing::{debug, warn};

use crate::key::{is_dir_marker, join_key, validate_key};
use crate::{
    AdapterFuture, ByteStream, ObjectEntry, ReadStream, StorageAdapter, StorageError, http_client,
};
use sigv4::{CanonicalRequest, Credentials, UNSIGNED_PAYLOAD};

/// Largest object sent with a single `PUT` (5 GiB).
pub const MAX_SINGLE_PUT: u64 = 5 * 1024 * 1024 * 1024;

/// Multipart part size (8 MiB).
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    /// Base URL, e.g. `https://s3.eu-west-1.amazonaws.com` or `http://localhost:9000`.
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// `true` addresses `endpoint/bucket/key`, `false` uses `bucket.endpoint/key`.
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    /// Key prefix that acts as the location root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the peer during a request.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_path_style() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    120
}

pub struct S3Adapter {
    creds: Credentials,
    client: reqwest::Client,
    scheme: String,
    /// `host[:port]` exactly as sent in the `Host` header.
    host: String,
    /// Path of the bucket root, `""` for virtual-host addressing.
    base_path: String,
    prefix: Option<String>,
}

impl S3Adapter {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        let url = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| StorageError::Config(format!("endpoint {}: {e}", config.endpoint)))?;
        let host_name = url
            .host_str()
            .ok_or_else(|| StorageError::Config(format!("endpoint {} has no host", config.endpoint)))?;
        if config.bucket.is_empty() {
            return Err(StorageError::Config("bucket must not be empty".into()));
        }

        let authority = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_string(),
        };
        let endpoint_path = url.path().trim_end_matches('/');

        let (host, base_path) = if config.path_style {
            (
                authority,
                format!("{endpoint_path}/{}", sigv4::encode_component(&config.bucket)),
            )
        } else {
            (format!("{}.{authority}", config.bucket), endpoint_path.to_string())
        };

        let prefix = config
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            creds: Credentials {
                access_key: config.access_key,
                secret_key: config.secret_key,
                region: config.region,
            },
            client: http_client(
                Duration::from_secs(config.connect_timeout_secs),
                Duration::from_secs(config.read_timeout_secs),
            )?,
            scheme: url.scheme().to_string(),
            host,
            base_path,
            prefix,
        })
    }

    /// Maps a location-relative key to the bucket key.
    fn full_key(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(match &self.prefix {
            Some(p) => join_key(p, key),
            None => key.to_string(),
        })
    }

    /// Bucket-level prefix for listing the directory `dir`.
    fn list_prefix(&self, dir: &str) -> Result<String, StorageError> {
        let dir = dir.trim_matches('/');
        if !dir.is_empty() {
            validate_key(dir)?;
        }
        let joined = match &self.prefix {
            Some(p) => join_key(p, dir),
            None => dir.to_string(),
        };
        Ok(if joined.is_empty() {
            joined
        } else {
            format!("{joined}/")
        })
    }

    fn root_prefix(&self) -> String {
        self.prefix
            .as_ref()
            .map(|p| format!("{p}/"))
            .unwrap_or_default()
    }

    fn object_path(&self, full_key: &str) -> String {
        format!("{}/{}", self.base_path, sigv4::encode_path(full_key))
    }

    fn bucket_path(&self) -> String {
        if self.base_path.is_empty() {
            "/".to_string()
        } else {
            self.base_path.clone()
        }
    }

    fn request(&self, method: Method, path: &str, query: &[(String, String)]) -> reqwest::RequestBuilder {
        let now = Utc::now();
        let date = sigv4::amz_date(now);
        let query = sigv4::canonical_query(query);
        let headers = [
            ("host", self.host.clone()),
            ("x-amz-content-sha256", UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date", date.clone()),
        ];
        let auth = sigv4::authorization(
            &self.creds,
            &CanonicalRequest {
                method: method.as_str(),
                path,
                query: &query,
                headers: &headers,
                payload_hash: UNSIGNED_PAYLOAD,
            },
            now,
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        self.client
            .request(method, url)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", date)
            .header(AUTHORIZATION, auth)
    }

    fn entries_from_page(&self, page: xml::ListBucketResult, listing_prefix: &str) -> Vec<ObjectEntry> {
        let root = self.root_prefix();
        page.contents
            .into_iter()
            .filter(|entry| entry.key != listing_prefix)
            .filter_map(|entry| {
                let key = entry.key.strip_prefix(root.as_str())?.to_string();
                let is_dir_marker = is_dir_marker(&key);
                Some(ObjectEntry {
                    key,
                    size: if is_dir_marker { 0 } else { entry.size },
                    is_dir_marker,
                })
            })
            .collect()
    }

    async fn put_single(
        &self,
        path: &str,
        body: ByteStream,
        size: u64,
    ) -> Result<u64, StorageError> {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = counter.clone();
        let body = body.inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                seen.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        });

        let resp = self
            .request(Method::PUT, path, &[])
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check(resp, path).await?;
        Ok(counter.load(Ordering::Relaxed))
    }

    async fn put_bytes(&self, path: &str, data: Bytes) -> Result<u64, StorageError> {
        let len = data.len() as u64;
        let resp = self
            .request(Method::PUT, path, &[])
            .header(CONTENT_LENGTH, len)
            .body(data)
            .send()
            .await?;
        check(resp, path).await?;
        Ok(len)
    }

    async fn put_multipart(&self, path: &str, mut body: ByteStream) -> Result<u64, StorageError> {
        let mut buf = BytesMut::with_capacity(PART_SIZE);
        if fill_part(&mut body, &mut buf).await? {
            return self.put_bytes(path, buf.freeze()).await;
        }

        let resp = self
            .request(Method::POST, path, &[("uploads".into(), String::new())])
            .send()
            .await?;
        let text = check(resp, path).await?.text().await?;
        let upload_id = xml::from_str::<xml::InitiateMultipartUploadResult>(&text)?.upload_id;
        debug!(path, upload_id = %upload_id, "multipart upload started");

        match self.upload_parts(path, &upload_id, body, buf).await {
            Ok(total) => Ok(total),
            Err(e) => {
                self.abort_multipart(path, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        mut body: ByteStream,
        mut buf: BytesMut,
    ) -> Result<u64, StorageError> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut ended = false;

        loop {
            if !buf.is_empty() {
                let part_number = parts.len() as u32 + 1;
                let data = buf.split().freeze();
                total += data.len() as u64;

                let resp = self
                    .request(
                        Method::PUT,
                        path,
                        &[
                            ("partNumber".into(), part_number.to_string()),
                            ("uploadId".into(), upload_id.to_string()),
                        ],
                    )
                    .header(CONTENT_LENGTH, data.len())
                    .body(data)
                    .send()
                    .await?;
                let resp = check(resp, path).await?;
                let etag = resp
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| StorageError::Api {
                        status: resp.status().as_u16(),
                        body: format!("part {part_number} returned no ETag"),
                    })?
                    .to_string();
                parts.push(xml::CompletedPart { part_number, etag });
            }
            if ended {
                break;
            }
            ended = fill_part(&mut body, &mut buf).await?;
        }

        let manifest = xml::to_string(&xml::CompleteMultipartUpload { parts })?;
        let resp = self
            .request(Method::POST, path, &[("uploadId".into(), upload_id.to_string())])
            .body(manifest)
            .send()
            .await?;
        let resp = check(resp, path).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        // Completion can fail after the 200 status line has been sent.
        if text.contains("<Error>") {
            return Err(StorageError::Api { status, body: text });
        }
        Ok(total)
    }

    async fn abort_multipart(&self, path: &str, upload_id: &str) {
        let result = self
            .request(Method::DELETE, path, &[("uploadId".into(), upload_id.to_string())])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(path, upload_id, "multipart upload aborted");
            }
            Ok(resp) => warn!(path, upload_id, status = %resp.status(), "multipart abort rejected"),
            Err(e) => warn!(path, upload_id, error = %e, "multipart abort failed"),
        }
    }
}

/// Reads from `body` until `buf` holds at least one part. Returns `true` if
/// the stream ended first.
async fn fill_part(body: &mut ByteStream, buf: &mut BytesMut) -> Result<bool, StorageError> {
    while buf.len() < PART_SIZE {
        match body.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(what.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Api {
        status: status.as_u16(),
        body,
    })
}

impl StorageAdapter for S3Adapter {
    fn kind(&self) -> EndpointType {
        EndpointType::S3
    }

    fn probe(&self) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            match self.request(Method::HEAD, &self.bucket_path(), &[]).send().await {
                Ok(resp) => Ok(resp.status().is_success()),
                Err(e) => {
                    debug!(host = %self.host, error = %e, "bucket probe failed");
                    Ok(false)
                }
            }
        })
    }

    fn stream_read<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ReadStream> {
        Box::pin(async move {
            let path = self.object_path(&self.full_key(key)?);
            let resp = self.request(Method::GET, &path, &[]).send().await?;
            let resp = check(resp, key).await?;
            let size = resp.content_length();
            let stream = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(StorageError::from));
            Ok(ReadStream {
                stream: Box::pin(stream),
                size,
            })
        })
    }

    fn stream_write<'a>(
        &'a self,
        key: &'a str,
        body: ByteStream,
        size: Option<u64>,
    ) -> AdapterFuture<'a, u64> {
        Box::pin(async move {
            let path = self.object_path(&self.full_key(key)?);

            if is_dir_marker(key) {
                return self.put_bytes(&path, Bytes::new()).await;
            }

            match size {
                Some(size) if size <= MAX_SINGLE_PUT => self.put_single(&path, body, size).await,
                _ => self.put_multipart(&path, body).await,
            }
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> AdapterFuture<'a, Vec<ObjectEntry>> {
        Box::pin(async move {
            let listing_prefix = self.list_prefix(prefix)?;
            let bucket_path = self.bucket_path();
            let mut out = Vec::new();
            let mut token: Option<String> = None;

            loop {
                let mut query = vec![
                    ("list-type".to_string(), "2".to_string()),
                    ("prefix".to_string(), listing_prefix.clone()),
                ];
                if let Some(t) = token.take() {
                    query.push(("continuation-token".to_string(), t));
                }

                let resp = self.request(Method::GET, &bucket_path, &query).send().await?;
                let text = check(resp, &listing_prefix).await?.text().await?;
                let page: xml::ListBucketResult = xml::from_str(&text)?;

                let truncated = page.is_truncated;
                let next = page.next_continuation_token.clone();
                out.extend(self.entries_from_page(page, &listing_prefix));

                match (truncated, next) {
                    (true, Some(next)) => token = Some(next),
                    _ => break,
                }
            }

            out.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(out)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, bool> {
        Box::pin(async move {
            let path = self.object_path(&self.full_key(key)?);
            let resp = self.request(Method::HEAD, &path, &[]).send().await?;
            match check(resp, key).await {
                Ok(_) => Ok(true),
                Err(StorageError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            let path = self.object_path(&self.full_key(key)?);
            let resp = self.request(Method::DELETE, &path, &[]).send().await?;
            match check(resp, key).await {
                Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}
