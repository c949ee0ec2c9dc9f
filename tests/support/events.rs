//! Event collection helpers.

use std::time::Duration;

use resumable_downloader::{DownloadEvent, TaskId};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(30);

/// Receives events until `stop` matches one (inclusive). Panics on timeout.
pub async fn collect_until(
    rx: &mut UnboundedReceiver<DownloadEvent>,
    mut stop: impl FnMut(&DownloadEvent) -> bool,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    let finished = tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;
    assert!(
        matches!(finished, Ok(true)),
        "stopped waiting for events; saw {seen:#?}"
    );
    seen
}

/// Receives events until the task emits `kind`.
pub async fn collect_until_kind(
    rx: &mut UnboundedReceiver<DownloadEvent>,
    id: &TaskId,
    kind: &str,
) -> Vec<DownloadEvent> {
    collect_until(rx, |event| event.task_id() == id && event.kind() == kind).await
}

/// Byte counts of the progress events in `events`.
pub fn progress_bytes(events: &[DownloadEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::Progress {
                downloaded_bytes, ..
            } => Some(*downloaded_bytes),
            _ => None,
        })
        .collect()
}

pub fn assert_non_decreasing(values: &[u64]) {
    assert!(
        values.windows(2).all(|pair| pair[0] <= pair[1]),
        "byte counts went backwards: {values:?}"
    );
}

pub fn kinds(events: &[DownloadEvent]) -> Vec<&'static str> {
    events.iter().map(DownloadEvent::kind).collect()
}
