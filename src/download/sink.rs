//! Destination sinks: where downloaded bytes land.
//!
//! The engine only talks to the [`DestinationSink`] trait. [`FsSink`] is the
//! filesystem implementation: bytes are written to `<name>.part` while the
//! download is pending and renamed to `<name>` on finalize.

use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWrite};
use tracing::{debug, instrument};

use super::filename::{
    pending_path, resolve_unique_path, sanitize_filename, sanitize_subdirectory,
};

/// Writable stream into a destination.
pub type DestinationWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque reference to an allocated destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationHandle {
    key: String,
}

impl DestinationHandle {
    /// Wraps a sink-specific key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Sink-specific key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for DestinationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Errors reported by destination sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A destination could not be created.
    #[error("cannot allocate {name} in {subdirectory:?}: {source}")]
    Allocate {
        /// Requested file name.
        name: String,
        /// Requested subdirectory.
        subdirectory: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An operation on an allocated destination failed.
    #[error("{operation} failed for {key}: {source}")]
    Io {
        /// Operation label (`open`, `truncate`, `finalize`, ...).
        operation: &'static str,
        /// Destination key.
        key: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The handle does not belong to this sink.
    #[error("unknown destination {key}")]
    UnknownHandle {
        /// Destination key.
        key: String,
    },
}

impl SinkError {
    fn io(operation: &'static str, handle: &DestinationHandle, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            key: handle.key().to_string(),
            source,
        }
    }
}

/// Storage backend that allocates and exposes writable, resumable destinations.
#[async_trait]
pub trait DestinationSink: Send + Sync + fmt::Debug {
    /// Allocates a named, typed output location.
    async fn allocate(
        &self,
        name: &str,
        mime_type: &str,
        subdirectory: &str,
    ) -> Result<DestinationHandle, SinkError>;

    /// Bytes already stored for the destination (0 when nothing is stored).
    async fn existing_length(&self, handle: &DestinationHandle) -> Result<u64, SinkError>;

    /// Opens the destination for writing at `offset`, keeping earlier bytes.
    async fn open_append(
        &self,
        handle: &DestinationHandle,
        offset: u64,
    ) -> Result<DestinationWriter, SinkError>;

    /// Opens the destination for writing from byte 0, discarding earlier bytes.
    async fn open_overwrite(&self, handle: &DestinationHandle)
    -> Result<DestinationWriter, SinkError>;

    /// Shrinks the destination to `length` bytes.
    async fn truncate_to(&self, handle: &DestinationHandle, length: u64) -> Result<(), SinkError>;

    /// Empties the destination.
    async fn truncate(&self, handle: &DestinationHandle) -> Result<(), SinkError> {
        self.truncate_to(handle, 0).await
    }

    /// Flips the destination from pending to visible.
    async fn finalize(&self, handle: &DestinationHandle) -> Result<(), SinkError>;

    /// Removes the destination, pending or finalized. Missing data is not an error.
    async fn delete(&self, handle: &DestinationHandle) -> Result<(), SinkError>;
}

/// Filesystem sink rooted at a directory.
///
/// A handle's key is the final path relative to the root, e.g. `Downloads/movie.mkv`.
/// Allocating a name whose `.part` file already exists reuses it, so downloads
/// interrupted by a process restart resume from the bytes on disk. A `.part`
/// file held by a live destination of this sink is never handed out twice;
/// destinations stay live until finalized or deleted.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
    live: Arc<DashSet<PathBuf>>,
}

impl FsSink {
    /// Creates a sink writing below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: Arc::new(DashSet::new()),
        }
    }

    /// Root directory of the sink.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final (visible) path of a destination.
    pub fn final_path(&self, handle: &DestinationHandle) -> Result<PathBuf, SinkError> {
        let relative = Path::new(handle.key());
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(SinkError::UnknownHandle {
                key: handle.key().to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// Pending path of a destination (`<final>.part`).
    pub fn pending_path(&self, handle: &DestinationHandle) -> Result<PathBuf, SinkError> {
        self.final_path(handle).map(|path| pending_path(&path))
    }

    /// Claims a final path no live destination and no file on disk uses.
    fn reserve_unique(&self, dir: &Path, name: &str) -> PathBuf {
        loop {
            let candidate = resolve_unique_path(dir, name, |path| self.live.contains(path));
            if self.live.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn release(&self, handle: &DestinationHandle) {
        if let Ok(final_path) = self.final_path(handle) {
            self.live.remove(&final_path);
        }
    }

    fn handle_for(&self, final_path: &Path) -> DestinationHandle {
        let relative = final_path.strip_prefix(&self.root).unwrap_or(final_path);
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        DestinationHandle::new(key)
    }
}

#[async_trait]
impl DestinationSink for FsSink {
    #[instrument(level = "debug", skip(self))]
    async fn allocate(
        &self,
        name: &str,
        mime_type: &str,
        subdirectory: &str,
    ) -> Result<DestinationHandle, SinkError> {
        let allocate_err = |source| SinkError::Allocate {
            name: name.to_string(),
            subdirectory: subdirectory.to_string(),
            source,
        };

        let dir = self.root.join(sanitize_subdirectory(subdirectory));
        tokio::fs::create_dir_all(&dir).await.map_err(allocate_err)?;

        let wanted = dir.join(sanitize_filename(name));
        let leftover = tokio::fs::try_exists(pending_path(&wanted))
            .await
            .unwrap_or(false);
        let final_path = if leftover && self.live.insert(wanted.clone()) {
            debug!(path = %wanted.display(), "reusing pending destination");
            wanted
        } else {
            self.reserve_unique(&dir, name)
        };

        if let Err(e) = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(pending_path(&final_path))
            .await
        {
            self.live.remove(&final_path);
            return Err(allocate_err(e));
        }

        let handle = self.handle_for(&final_path);
        debug!(key = %handle, "destination allocated");
        Ok(handle)
    }

    async fn existing_length(&self, handle: &DestinationHandle) -> Result<u64, SinkError> {
        let path = self.pending_path(handle)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(SinkError::io("stat", handle, e)),
        }
    }

    async fn open_append(
        &self,
        handle: &DestinationHandle,
        offset: u64,
    ) -> Result<DestinationWriter, SinkError> {
        let path = self.pending_path(handle)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| SinkError::io("open", handle, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| SinkError::io("seek", handle, e))?;
        Ok(Box::new(file))
    }

    async fn open_overwrite(
        &self,
        handle: &DestinationHandle,
    ) -> Result<DestinationWriter, SinkError> {
        let path = self.pending_path(handle)?;
        let file = File::create(&path)
            .await
            .map_err(|e| SinkError::io("open", handle, e))?;
        Ok(Box::new(file))
    }

    async fn truncate_to(&self, handle: &DestinationHandle, length: u64) -> Result<(), SinkError> {
        let path = self.pending_path(handle)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| SinkError::io("truncate", handle, e))?;
        file.set_len(length)
            .await
            .map_err(|e| SinkError::io("truncate", handle, e))
    }

    async fn finalize(&self, handle: &DestinationHandle) -> Result<(), SinkError> {
        let pending = self.pending_path(handle)?;
        let final_path = self.final_path(handle)?;
        match tokio::fs::rename(&pending, &final_path).await {
            Ok(()) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && tokio::fs::try_exists(&final_path).await.unwrap_or(false) => {}
            Err(e) => return Err(SinkError::io("finalize", handle, e)),
        }
        self.release(handle);
        Ok(())
    }

    async fn delete(&self, handle: &DestinationHandle) -> Result<(), SinkError> {
        for path in [self.pending_path(handle)?, self.final_path(handle)?] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SinkError::io("delete", handle, e)),
            }
        }
        self.release(handle);
        Ok(())
    }
}
