//! Download task identity and shared progress state.
//!
//! A [`DownloadTask`] is shared (via `Arc`) between the registry, at most one
//! active worker, and control-plane callers. Flags and counters are atomics;
//! the only writer of progress is the task's own worker.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::constants::{DEFAULT_MIME_TYPE, DEFAULT_SUBDIRECTORY, UNKNOWN_TOTAL};
use super::filename::default_filename_from_url;
use super::resume::Validators;
use super::sink::DestinationHandle;

/// Opaque, unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable request descriptor of a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// Name of the destination file.
    pub file_name: String,
    /// Subdirectory of the destination, relative to the sink root.
    pub subdirectory: String,
    /// MIME type recorded with the destination.
    pub mime_type: String,
    /// Extra request headers sent with every attempt.
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    /// Creates a request with defaults derived from the URL.
    ///
    /// The file name defaults to the URL's last path segment, the subdirectory
    /// to `Downloads` and the MIME type to `application/octet-stream`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            file_name: default_filename_from_url(&url),
            url,
            subdirectory: DEFAULT_SUBDIRECTORY.to_string(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            headers: Vec::new(),
        }
    }

    /// Overrides the destination file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Overrides the destination subdirectory.
    #[must_use]
    pub fn with_subdirectory(mut self, subdirectory: impl Into<String>) -> Self {
        self.subdirectory = subdirectory.into();
        self
    }

    /// Overrides the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Coarse lifecycle position derived from a task's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskPhase {
    /// A worker currently owns the task.
    Running,
    /// Paused by the caller; resumable.
    Paused,
    /// Canceled; about to disappear from the registry.
    Canceled,
    /// Not running and not paused (fresh or after a failure).
    Idle,
}

/// Point-in-time copy of a task's state for presenters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Task identifier.
    pub task_id: TaskId,
    /// Source URL.
    pub url: String,
    /// Destination file name.
    pub file_name: String,
    /// Destination subdirectory.
    pub subdirectory: String,
    /// Bytes written so far.
    pub downloaded_bytes: u64,
    /// Total size, or `-1` when unknown.
    pub total_bytes: i64,
    /// Lifecycle position.
    pub phase: TaskPhase,
}

impl TaskSnapshot {
    /// Completion percentage (0-100), or `None` while the total is unknown.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = u64::try_from(self.total_bytes).ok().filter(|t| *t > 0)?;
        let pct = self.downloaded_bytes.saturating_mul(100) / total;
        Some(u8::try_from(pct.min(100)).unwrap_or(100))
    }

    /// Human-readable progress, e.g. `"1.5 MB / 10.0 MB (15%)"`.
    #[must_use]
    pub fn progress_text(&self) -> String {
        match (u64::try_from(self.total_bytes).ok().filter(|t| *t > 0), self.percent()) {
            (Some(total), Some(pct)) => format!(
                "{} / {} ({pct}%)",
                format_bytes(self.downloaded_bytes),
                format_bytes(total)
            ),
            _ => format_bytes(self.downloaded_bytes),
        }
    }
}

/// Formats a byte count with binary units, one decimal place (`"1.5 MB"`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.1} {}", UNITS[idx])
}

/// Event gate of a task: closes once on completion or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Open,
    Completed,
    Canceled,
}

impl Gate {
    pub(crate) fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// One logical download and its mutable progress record.
#[derive(Debug)]
pub struct DownloadTask {
    id: TaskId,
    request: DownloadRequest,
    destination: OnceLock<DestinationHandle>,
    downloaded: AtomicU64,
    total: AtomicI64,
    validators: Mutex<Validators>,
    paused: AtomicBool,
    canceled: AtomicBool,
    running: AtomicBool,
    interrupt: Mutex<Option<CancellationToken>>,
    gate: AsyncMutex<Gate>,
}

impl DownloadTask {
    /// Creates a task with a freshly generated id.
    #[must_use]
    pub fn new(request: DownloadRequest) -> Self {
        Self::with_id(TaskId::generate(), request)
    }

    /// Creates a task with an explicit id.
    #[must_use]
    pub fn with_id(id: TaskId, request: DownloadRequest) -> Self {
        Self {
            id,
            request,
            destination: OnceLock::new(),
            downloaded: AtomicU64::new(0),
            total: AtomicI64::new(UNKNOWN_TOTAL),
            validators: Mutex::new(Validators::default()),
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            interrupt: Mutex::new(None),
            gate: AsyncMutex::new(Gate::Open),
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Immutable request descriptor.
    #[must_use]
    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Destination handle, once allocated.
    #[must_use]
    pub fn destination(&self) -> Option<&DestinationHandle> {
        self.destination.get()
    }

    /// Assigns the destination handle. The first assignment wins for the
    /// task's lifetime; the effective handle is returned.
    pub(crate) fn assign_destination(&self, handle: DestinationHandle) -> &DestinationHandle {
        self.destination.get_or_init(|| handle)
    }

    /// Bytes written to the destination so far.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    pub(crate) fn set_downloaded_bytes(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn add_downloaded_bytes(&self, bytes: u64) -> u64 {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    /// Total size in bytes, or `-1` while unknown.
    #[must_use]
    pub fn total_bytes(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total_bytes(&self, total: i64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Current resume validators (ETag / Last-Modified).
    #[must_use]
    pub fn validators(&self) -> Validators {
        self.validators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merges validators from a response; absent values keep the previous ones.
    pub(crate) fn update_validators(&self, fresh: Validators) {
        let mut current = self.validators.lock().unwrap_or_else(PoisonError::into_inner);
        current.merge(fresh);
    }

    /// Whether the task is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the task has been canceled. Sticky.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Whether a worker currently owns the task.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Marks the task canceled; returns `true` on the first call only.
    pub(crate) fn mark_canceled(&self) -> bool {
        !self.canceled.swap(true, Ordering::SeqCst)
    }

    /// Claims worker ownership; `false` if another worker already runs.
    pub(crate) fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Installs a fresh interrupt token for a worker run.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.interrupt.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    /// Drops the run's interrupt token and releases worker ownership.
    pub(crate) fn end_run(&self) {
        self.interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Forcibly breaks the active run out of any pending network call.
    pub(crate) fn interrupt(&self) {
        if let Some(token) = self
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.cancel();
        }
    }

    pub(crate) async fn lock_gate(&self) -> AsyncMutexGuard<'_, Gate> {
        self.gate.lock().await
    }

    /// Lifecycle position derived from the flags.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        if self.is_canceled() {
            TaskPhase::Canceled
        } else if self.is_paused() {
            TaskPhase::Paused
        } else if self.is_running() {
            TaskPhase::Running
        } else {
            TaskPhase::Idle
        }
    }

    /// Copies the presenter-relevant state.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            url: self.request.url.clone(),
            file_name: self.request.file_name.clone(),
            subdirectory: self.request.subdirectory.clone(),
            downloaded_bytes: self.downloaded_bytes(),
            total_bytes: self.total_bytes(),
            phase: self.phase(),
        }
    }
}
