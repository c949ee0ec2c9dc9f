//! Concurrent task registry and aggregate status.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use super::task::{DownloadTask, TaskId, TaskPhase};

/// Concurrent map from task id to shared task state.
///
/// Safe to use from workers and control-plane callers at the same time.
/// No ordering is kept across tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Arc<DownloadTask>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task, replacing any task with the same id.
    pub fn insert(&self, task: Arc<DownloadTask>) {
        self.tasks.insert(task.id().clone(), task);
    }

    /// Looks up a task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Arc<DownloadTask>> {
        self.tasks.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes a task, returning it if it was present.
    pub fn remove(&self, id: &TaskId) -> Option<Arc<DownloadTask>> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    /// Whether the id is registered.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Copies the current set of tasks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<DownloadTask>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Aggregate counts over the registered, non-canceled tasks.
    #[must_use]
    pub fn status(&self) -> AggregateStatus {
        AggregateStatus::from_phases(self.snapshot().iter().map(|task| task.phase()))
    }
}

/// Summary counts driving an external presenter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStatus {
    /// Registered tasks that are not canceled.
    pub active: usize,
    /// Paused tasks.
    pub paused: usize,
    /// Everything active and not paused.
    pub running: usize,
}

impl AggregateStatus {
    fn from_phases(phases: impl Iterator<Item = TaskPhase>) -> Self {
        let (active, paused) = phases
            .filter(|phase| *phase != TaskPhase::Canceled)
            .fold((0, 0), |(active, paused), phase| {
                (active + 1, paused + usize::from(phase == TaskPhase::Paused))
            });
        Self {
            active,
            paused,
            running: active - paused,
        }
    }

    /// One-line summary, e.g. `"2 running, 1 paused"`.
    #[must_use]
    pub fn summary_text(&self) -> String {
        match (self.running, self.paused) {
            (0, 0) => "No active downloads".to_string(),
            (0, paused) => format!("{paused} paused"),
            (running, 0) => format!("{running} running"),
            (running, paused) => format!("{running} running, {paused} paused"),
        }
    }
}
