//! Resumable Downloader Library
//!
//! A resumable, pausable, cancelable HTTP download engine. Many downloads run
//! concurrently; partial progress lives in durable storage and is trusted over
//! in-memory state when a download resumes, including after a process restart.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Task registry, download worker, event emitter and control plane
//! - [`config`] - Engine tunables and the optional config file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{EngineConfig, FileConfig, load_file_config};
pub use download::{
    AggregateStatus, DestinationHandle, DestinationSink, DownloadError, DownloadEvent,
    DownloadManager, DownloadRequest, ErrorKind, FsSink, SinkError, TaskId, TaskPhase,
    TaskSnapshot, format_bytes,
};
