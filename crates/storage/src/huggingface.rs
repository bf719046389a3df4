//! Read-only source over a HuggingFace-style model repository.
//!
//! Listing walks `GET /api/models/{repo}/tree/{revision}` with
//! `recursive=true`, following `Link: <...>; rel="next"` pagination. File
//! bodies come from `GET /{repo}/resolve/{revision}/{path}`, which usually
//! redirects to a CDN.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::LINK;
use serde::{Deserialize, Serialize};
use stevedore_protocol::EndpointType;
use tracing::debug;

use crate::key::validate_key;
use crate::s3::sigv4::{encode_component, encode_path};
use crate::{
    AdapterFuture, ByteStream, ObjectEntry, ReadStream, StorageAdapter, StorageError, http_client,
};

pub const DEFAULT_REVISION: &str = "main";

/// `[huggingface]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Access token for gated or private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the peer during a request.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://huggingface.co".into()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    120
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

/// Shared client for a model hub; hands out per-repository sources.
#[derive(Clone)]
pub struct HuggingFaceHub {
    client: reqwest::Client,
    endpoint: String,
    origin: reqwest::Url,
    token: Option<String>,
}

impl HuggingFaceHub {
    pub fn new(config: &HuggingFaceConfig) -> Result<Self, StorageError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let origin = reqwest::Url::parse(&endpoint)
            .map_err(|e| StorageError::Config(format!("endpoint {endpoint}: {e}")))?;
        Ok(Self {
            client: http_client(
                Duration::from_secs(config.connect_timeout_secs),
                Duration::from_secs(config.read_timeout_secs),
            )?,
            endpoint,
            origin,
            token: config.token.clone(),
        })
    }

    /// Whether `url` points at this hub's scheme, host and port.
    fn same_origin(&self, url: &str) -> bool {
        reqwest::Url::parse(url).is_ok_and(|u| u.origin() == self.origin.origin())
    }

    /// Opens `repo_id` at `revision` (default [`DEFAULT_REVISION`]).
    pub fn repo(&self, repo_id: &str, revision: Option<&str>) -> Result<HuggingFaceSource, StorageError> {
        validate_repo_id(repo_id)?;
        let revision = revision
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVISION)
            .to_string();
        Ok(HuggingFaceSource {
            hub: self.clone(),
            repo_id: repo_id.to_string(),
            revision,
        })
    }
}

/// Repository ids are `name` or `owner/name`.
fn validate_repo_id(repo_id: &str) -> Result<(), StorageError> {
    let segments: Vec<&str> = repo_id.split('/').collect();
    let valid = (1..=2).contains(&segments.len())
        && segments.iter().all(|s| {
            !s.is_empty()
                && *s != "."
                && *s != ".."
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!("invalid repository id: {repo_id}")))
    }
}

pub struct HuggingFaceSource {
    hub: HuggingFaceHub,
    repo_id: String,
    revision: String,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    size: u64,
}

impl HuggingFaceSource {
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    fn tree_url(&self, dir: &str) -> String {
        let mut url = format!(
            "{}/api/models/{}/tree/{}",
            self.hub.endpoint,
            self.repo_id,
            encode_component(&self.revision)
        );
        if !dir.is_empty() {
            url.push('/');
            url.push_str(&encode_path(dir));
        }
        url.push_str("?recursive=true");
        url
    }

    fn resolve_url(&self, key: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.hub.endpoint,
            self.repo_id,
            encode_component(&self.revision),
            encode_path(key)
        )
    }

    fn revision_url(&self) -> String {
        format!(
            "{}/api/models/{}/revision/{}",
            self.hub.endpoint,
            self.repo_id,
            encode_component(&self.revision)
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorize(self.hub.client.get(url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.hub.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(String::from)
    })
}

fn entries_from_tree(entries: Vec<TreeEntry>) -> Vec<ObjectEntry> {
    entries
        .into_iter()
        .filter(|e| e.kind == "file")
        .map(|e| ObjectEntry {
            size: e.lfs.map(|lfs| lfs.size).unwrap_or(e.size),
            key: e.path,
            is_dir_marker: false,
        })
        .collect()
}

async fn error_for(resp: reqwest::Response, what: &str) -> StorageError {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return StorageError::NotFound(what.to_string());
    }
    StorageError::Api {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    }
}

impl StorageAdapter for HuggingFaceSource {
    fn kind(&self) -> EndpointType {
        EndpointType::HuggingFace
    }

    fn probe(&self) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            match self.get(&self.revision_url()).send().await {
                Ok(resp) => Ok(resp.status().is_success()),
                Err(e) => {
                    debug!(repo = %self.repo_id, error = %e, "repository probe failed");
                    Ok(false)
                }
            }
        })
    }

    fn stream_read<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ReadStream> {
        Box::pin(async move {
            validate_key(key)?;
            let resp = self.get(&self.resolve_url(key)).send().await?;
            if !resp.status().is_success() {
                return Err(error_for(resp, key).await);
            }
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
        _key: &'a str,
        _body: ByteStream,
        _size: Option<u64>,
    ) -> AdapterFuture<'a, u64> {
        Box::pin(async { Err(StorageError::Unsupported("model repositories are read-only")) })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> AdapterFuture<'a, Vec<ObjectEntry>> {
        Box::pin(async move {
            let dir = prefix.trim_matches('/');
            if !dir.is_empty() {
                validate_key(dir)?;
            }

            let mut out = Vec::new();
            let mut next = Some(self.tree_url(dir));
            while let Some(url) = next.take() {
                let resp = self.get(&url).send().await?;
                if !resp.status().is_success() {
                    return Err(error_for(resp, &self.repo_id).await);
                }
                next = resp
                    .headers()
                    .get(LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_link);
                // The bearer token only ever goes to the configured hub.
                if let Some(link) = next.as_deref().filter(|link| !self.hub.same_origin(link)) {
                    return Err(StorageError::Api {
                        status: resp.status().as_u16(),
                        body: format!("pagination link {link} leaves {}", self.hub.endpoint),
                    });
                }
                let page: Vec<TreeEntry> = resp.json().await?;
                out.extend(entries_from_tree(page));
            }

            out.sort_by(|a, b| a.key.cmp(&b.key));
            debug!(repo = %self.repo_id, revision = %self.revision, files = out.len(), "repository listed");
            Ok(out)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, bool> {
        Box::pin(async move {
            validate_key(key)?;
            let resp = self
                .authorize(self.hub.client.head(self.resolve_url(key)))
                .send()
                .await?;
            match resp.status() {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(error_for(resp, key).await),
            }
        })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async { Err(StorageError::Unsupported("model repositories are read-only")) })
    }
}
