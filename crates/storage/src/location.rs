//! Configured storage locations, resolved by id.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stevedore_protocol::{EndpointType, LocationInfo};
use tracing::info;

use crate::fs::FsAdapter;
use crate::s3::{S3Adapter, S3Config};
use crate::{StorageAdapter, StorageError};

/// One `[[locations]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub id: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Filesystem { root: PathBuf },
    S3(S3Config),
}

/// A named endpoint and the adapter serving it.
#[derive(Clone)]
pub struct Location {
    pub id: String,
    pub kind: EndpointType,
    pub adapter: Arc<dyn StorageAdapter>,
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    locations: Vec<Location>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds adapters for every configured location. Ids must be unique.
    pub fn from_config(configs: &[LocationConfig]) -> Result<Self, StorageError> {
        let mut registry = Self::new();
        for config in configs {
            let adapter: Arc<dyn StorageAdapter> = match &config.backend {
                BackendConfig::Filesystem { root } => Arc::new(FsAdapter::new(root.clone())),
                BackendConfig::S3(s3) => Arc::new(S3Adapter::new(s3.clone())?),
            };
            let kind = adapter.kind();
            registry.insert(config.id.clone(), adapter)?;
            info!(id = %config.id, kind = kind.as_str(), "location registered");
        }
        Ok(registry)
    }

    pub fn insert(
        &mut self,
        id: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Result<(), StorageError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StorageError::Config("location id must not be empty".into()));
        }
        if self.get(&id).is_some() {
            return Err(StorageError::Config(format!("duplicate location id: {id}")));
        }
        self.locations.push(Location {
            kind: adapter.kind(),
            id,
            adapter,
        });
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Location> {
        self.locations.iter().find(|l| l.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Lists every location with a live availability probe.
    pub async fn describe(&self) -> Vec<LocationInfo> {
        let probes = self.locations.iter().map(|location| async move {
            let available = location.adapter.probe().await.unwrap_or(false);
            LocationInfo {
                id: location.id.clone(),
                kind: location.kind,
                available,
            }
        });
        futures_util::future::join_all(probes).await
    }
}
