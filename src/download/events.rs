//! Lifecycle and progress events, and the single-subscriber emitter.
//!
//! Events serialize as flat maps tagged by `type`, e.g.
//! `{"type":"progress","taskId":"…","downloadedBytes":1024,…}`.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use super::task::{DownloadTask, TaskId};

/// Event produced by the engine for the external observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DownloadEvent {
    /// A destination was allocated and the transfer is starting.
    Started {
        task_id: TaskId,
        file_name: String,
        subdirectory: String,
    },
    /// Bytes written so far. `total_bytes` is `-1` while unknown.
    Progress {
        task_id: TaskId,
        downloaded_bytes: u64,
        total_bytes: i64,
        file_name: String,
        subdirectory: String,
        url: String,
    },
    /// The task stopped on request and can be resumed.
    Paused {
        task_id: TaskId,
        file_name: String,
        subdirectory: String,
    },
    /// A paused or failed task is running again.
    Resumed {
        task_id: TaskId,
        file_name: String,
        subdirectory: String,
    },
    /// The destination is finalized.
    Complete {
        task_id: TaskId,
        downloaded_bytes: u64,
        total_bytes: i64,
        file_name: String,
        subdirectory: String,
        url: String,
    },
    /// The task was canceled and its destination deleted.
    Canceled {
        task_id: TaskId,
        file_name: String,
        subdirectory: String,
    },
    /// The run failed; the task stays addressable for `resume`.
    Error {
        task_id: TaskId,
        message: String,
        file_name: String,
        subdirectory: String,
        url: String,
    },
}

impl DownloadEvent {
    pub(crate) fn started(task: &DownloadTask) -> Self {
        Self::Started {
            task_id: task.id().clone(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
        }
    }

    pub(crate) fn progress(task: &DownloadTask) -> Self {
        Self::Progress {
            task_id: task.id().clone(),
            downloaded_bytes: task.downloaded_bytes(),
            total_bytes: task.total_bytes(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
            url: task.request().url.clone(),
        }
    }

    pub(crate) fn paused(task: &DownloadTask) -> Self {
        Self::Paused {
            task_id: task.id().clone(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
        }
    }

    pub(crate) fn resumed(task: &DownloadTask) -> Self {
        Self::Resumed {
            task_id: task.id().clone(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
        }
    }

    pub(crate) fn complete(task: &DownloadTask) -> Self {
        Self::Complete {
            task_id: task.id().clone(),
            downloaded_bytes: task.downloaded_bytes(),
            total_bytes: task.total_bytes(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
            url: task.request().url.clone(),
        }
    }

    pub(crate) fn canceled(task: &DownloadTask) -> Self {
        Self::Canceled {
            task_id: task.id().clone(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
        }
    }

    pub(crate) fn error(task: &DownloadTask, message: impl Into<String>) -> Self {
        Self::Error {
            task_id: task.id().clone(),
            message: message.into(),
            file_name: task.request().file_name.clone(),
            subdirectory: task.request().subdirectory.clone(),
            url: task.request().url.clone(),
        }
    }

    /// Task the event belongs to.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Started { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Paused { task_id, .. }
            | Self::Resumed { task_id, .. }
            | Self::Complete { task_id, .. }
            | Self::Canceled { task_id, .. }
            | Self::Error { task_id, .. } => task_id,
        }
    }

    /// Wire name of the event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Complete { .. } => "complete",
            Self::Canceled { .. } => "canceled",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends a worker run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Paused { .. } | Self::Complete { .. } | Self::Canceled { .. } | Self::Error { .. }
        )
    }
}

/// Delivers events to at most one subscriber.
///
/// Attaching replaces the previous subscriber. Events emitted while nobody is
/// attached are dropped, not buffered. Emission never blocks and may happen from
/// any task.
#[derive(Debug, Default)]
pub struct EventEmitter {
    subscriber: Mutex<Option<mpsc::UnboundedSender<DownloadEvent>>>,
}

impl EventEmitter {
    /// Creates an emitter with no subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new subscriber, detaching any previous one.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Detaches the current subscriber, if any.
    pub fn detach(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a live subscriber is attached.
    #[must_use]
    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Sends an event to the subscriber, or drops it.
    pub fn emit(&self, event: DownloadEvent) {
        let mut guard = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            trace!(kind = event.kind(), task_id = %event.task_id(), "no subscriber, event dropped");
            return;
        };
        if tx.send(event).is_err() {
            // Receiver was dropped without detach.
            guard.take();
        }
    }
}
