//! Control plane: start, pause, resume and cancel downloads by task id.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::client::HttpClient;
use super::error::DownloadError;
use super::events::{DownloadEvent, EventEmitter};
use super::registry::{AggregateStatus, TaskRegistry};
use super::sink::DestinationSink;
use super::task::{DownloadRequest, DownloadTask, TaskId, TaskSnapshot};
use super::worker::Worker;
use crate::config::EngineConfig;

/// Manages many independent downloads.
///
/// Every run executes on its own tokio task, so all methods must be called
/// from within a tokio runtime. Commands are safe to race against active runs.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use resumable_downloader::{DownloadManager, DownloadRequest, EngineConfig, FsSink};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = DownloadManager::new(Arc::new(FsSink::new("/tmp/rdown")), EngineConfig::default())?;
/// let mut events = manager.subscribe();
/// let id = manager.start(DownloadRequest::new("https://example.com/movie.mkv"));
/// while let Some(event) = events.recv().await {
///     if event.is_terminal() && event.task_id() == &id {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DownloadManager {
    registry: Arc<TaskRegistry>,
    emitter: Arc<EventEmitter>,
    worker: Worker,
}

impl DownloadManager {
    /// Creates a manager writing into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Unknown`] if the HTTP client cannot be built.
    pub fn new(
        sink: Arc<dyn DestinationSink>,
        config: EngineConfig,
    ) -> Result<Self, DownloadError> {
        let registry = Arc::new(TaskRegistry::new());
        let emitter = Arc::new(EventEmitter::new());
        let worker = Worker::new(
            HttpClient::new(&config)?,
            sink,
            Arc::clone(&registry),
            Arc::clone(&emitter),
            &config,
        );
        Ok(Self {
            registry,
            emitter,
            worker,
        })
    }

    /// Registers a new task and starts its first run in the background.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub fn start(&self, request: DownloadRequest) -> TaskId {
        let task = Arc::new(DownloadTask::new(request));
        let id = task.id().clone();
        self.registry.insert(Arc::clone(&task));
        if task.try_claim() {
            self.spawn(task);
        }
        info!(task_id = %id, "download started");
        id
    }

    /// Pauses a task. Returns `false` if the id is unknown.
    pub async fn pause(&self, id: &TaskId) -> bool {
        let Some(task) = self.registry.get(id) else {
            debug!(task_id = %id, "pause ignored, unknown task");
            return false;
        };
        self.worker.pause(&task).await;
        true
    }

    /// Starts a new run for a paused or failed task.
    ///
    /// Returns `false` if the id is unknown or a run is already active.
    pub async fn resume(&self, id: &TaskId) -> bool {
        let Some(task) = self.registry.get(id) else {
            debug!(task_id = %id, "resume ignored, unknown task");
            return false;
        };
        if !self.worker.claim_for_resume(&task).await {
            debug!(task_id = %id, "resume ignored, task running or canceled");
            return false;
        }
        self.spawn(task);
        true
    }

    /// Cancels a task, deleting its destination.
    ///
    /// Returns `false` if the id is unknown or the download already completed.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let Some(task) = self.registry.get(id) else {
            debug!(task_id = %id, "cancel ignored, unknown task");
            return false;
        };
        self.worker.cancel(&task).await
    }

    /// Pauses every registered task.
    pub async fn pause_all(&self) {
        for task in self.registry.snapshot() {
            self.worker.pause(&task).await;
        }
    }

    /// Snapshot of one task, or `None` if it is not registered.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.registry.get(id).map(|task| task.snapshot())
    }

    /// Snapshots of all registered tasks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.registry
            .snapshot()
            .iter()
            .map(|task| task.snapshot())
            .collect()
    }

    /// Aggregate counts for a presenter.
    #[must_use]
    pub fn status(&self) -> AggregateStatus {
        self.registry.status()
    }

    /// Attaches the single event subscriber, replacing any previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        self.emitter.attach()
    }

    /// Detaches the event subscriber.
    pub fn unsubscribe(&self) {
        self.emitter.detach();
    }

    fn spawn(&self, task: Arc<DownloadTask>) {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            let outcome = worker.run_claimed(task).await;
            debug!(?outcome, "worker run finished");
        });
    }
}
