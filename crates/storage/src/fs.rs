//! Local filesystem adapter rooted at a directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use stevedore_protocol::EndpointType;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::key::{is_dir_marker, validate_key};
use crate::{
    AdapterFuture, ByteStream, ObjectEntry, READ_BUFFER_SIZE, ReadStream, StorageAdapter,
    StorageError,
};

/// Serves keys as paths below `root`.
#[derive(Debug, Clone)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key.trim_end_matches('/')))
    }

    fn relative_key(&self, path: &Path) -> Result<String, StorageError> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidKey(format!("{} escapes root", path.display())))?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    async fn walk(&self, start: PathBuf) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut out = Vec::new();

        match tokio::fs::metadata(&start).await {
            Ok(meta) if meta.is_file() => {
                out.push(ObjectEntry {
                    key: self.relative_key(&start)?,
                    size: meta.len(),
                    is_dir_marker: false,
                });
                return Ok(out);
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        }

        let mut stack = vec![start.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            let mut empty = true;

            while let Some(entry) = entries.next_entry().await? {
                empty = false;
                let path = entry.path();
                // Follows symlinks so linked files are listed like regular ones.
                let meta = match tokio::fs::metadata(&path).await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if meta.is_dir() {
                    stack.push(path);
                } else if meta.is_file() {
                    out.push(ObjectEntry {
                        key: self.relative_key(&path)?,
                        size: meta.len(),
                        is_dir_marker: false,
                    });
                }
            }

            if empty && dir != start {
                out.push(ObjectEntry {
                    key: format!("{}/", self.relative_key(&dir)?),
                    size: 0,
                    is_dir_marker: true,
                });
            }
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

impl StorageAdapter for FsAdapter {
    fn kind(&self) -> EndpointType {
        EndpointType::Local
    }

    fn probe(&self) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            Ok(tokio::fs::metadata(&self.root)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false))
        })
    }

    fn stream_read<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ReadStream> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let size = file.metadata().await?.len();
            let stream = ReaderStream::with_capacity(file, READ_BUFFER_SIZE)
                .map(|chunk| chunk.map_err(StorageError::from));
            Ok(ReadStream {
                stream: Box::pin(stream),
                size: Some(size),
            })
        })
    }

    fn stream_write<'a>(
        &'a self,
        key: &'a str,
        mut body: ByteStream,
        _size: Option<u64>,
    ) -> AdapterFuture<'a, u64> {
        Box::pin(async move {
            let path = self.resolve(key)?;

            if is_dir_marker(key) {
                tokio::fs::create_dir_all(&path).await?;
                while let Some(chunk) = body.next().await {
                    chunk?;
                }
                return Ok(0);
            }

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = tokio::fs::File::create(&path).await?;
            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;

            debug!(path = %path.display(), written, "file written");
            Ok(written)
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> AdapterFuture<'a, Vec<ObjectEntry>> {
        Box::pin(async move {
            let start = if prefix.trim_matches('/').is_empty() {
                self.root.clone()
            } else {
                self.resolve(prefix)?
            };
            self.walk(start).await
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, bool> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(!is_dir_marker(key) || meta.is_dir()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            let result = if is_dir_marker(key) {
                tokio::fs::remove_dir(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
