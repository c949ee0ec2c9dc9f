//! Resumable HTTP download engine.
//!
//! A [`DownloadManager`] keeps a [`TaskRegistry`] of [`DownloadTask`]s and runs
//! each one on a [`Worker`]. Workers negotiate HTTP range resumes, stream the
//! body into a [`DestinationSink`] and report [`DownloadEvent`]s to a single
//! subscriber through the [`EventEmitter`].
//!
//! # Features
//!
//! - Pause, resume and cancel from any task, interrupting in-flight reads
//! - Resume from on-disk length after a restart (`.part` files in [`FsSink`])
//! - `Range` / `If-Range` requests; servers that ignore or shift ranges are handled
//! - Progress events throttled to one per interval (500 ms by default)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resumable_downloader::download::{DownloadManager, DownloadRequest, FsSink};
//! use resumable_downloader::EngineConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(Arc::new(FsSink::new("./downloads")), EngineConfig::default())?;
//! let id = manager.start(DownloadRequest::new("https://example.com/paper.pdf"));
//! manager.pause(&id).await;
//! manager.resume(&id).await;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod events;
mod filename;
mod manager;
mod registry;
pub mod resume;
mod sink;
mod task;
mod worker;

pub use client::HttpClient;
pub use error::{DownloadError, ErrorKind};
pub use events::{DownloadEvent, EventEmitter};
pub use manager::DownloadManager;
pub use registry::{AggregateStatus, TaskRegistry};
pub use sink::{DestinationHandle, DestinationSink, DestinationWriter, FsSink, SinkError};
pub use task::{
    DownloadRequest, DownloadTask, TaskId, TaskPhase, TaskSnapshot, format_bytes,
};
pub use worker::{RunOutcome, Worker};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
