//! Per-task download state machine.
//!
//! One run goes `Connecting → StreamingCopy → {Completed | Paused | Canceled | Failed}`.
//! Terminal decisions are taken while holding the task's event gate, so the
//! control plane and the worker never both report the same transition and the
//! terminal event is always the last one a run emits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::MutexGuard;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, content_length, content_range, response_validators};
use super::error::DownloadError;
use super::events::{DownloadEvent, EventEmitter};
use super::registry::TaskRegistry;
use super::resume::{ResumeAction, classify_response, derive_total};
use super::sink::{DestinationHandle, DestinationSink, DestinationWriter};
use super::task::{DownloadTask, Gate};
use crate::config::EngineConfig;

/// How a worker run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Destination finalized, task removed from the registry.
    Completed,
    /// Stopped on request; the task stays registered and resumable.
    Paused,
    /// Destination deleted, task removed from the registry.
    Canceled,
    /// Run failed; the task stays registered for a manual resume.
    Failed(DownloadError),
    /// Another worker already owns the task; nothing was done.
    AlreadyRunning,
}

/// How the transfer phase stopped, before terminal handling.
enum Transfer {
    Finished,
    Interrupted,
}

/// Executes download runs. Cheap to clone; all clones share the same collaborators.
#[derive(Debug, Clone)]
pub struct Worker {
    client: HttpClient,
    sink: Arc<dyn DestinationSink>,
    registry: Arc<TaskRegistry>,
    emitter: Arc<EventEmitter>,
    chunk_size: usize,
    progress_interval: Duration,
}

impl Worker {
    /// Creates a worker over shared collaborators.
    #[must_use]
    pub fn new(
        client: HttpClient,
        sink: Arc<dyn DestinationSink>,
        registry: Arc<TaskRegistry>,
        emitter: Arc<EventEmitter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            client,
            sink,
            registry,
            emitter,
            chunk_size: config.chunk_size.max(1),
            progress_interval: config.progress_interval,
        }
    }

    /// Runs `task` until it completes, pauses, is canceled or fails.
    ///
    /// Returns [`RunOutcome::AlreadyRunning`] immediately if another run owns the task.
    pub async fn run(&self, task: Arc<DownloadTask>) -> RunOutcome {
        if !task.try_claim() {
            debug!(task_id = %task.id(), "worker already running");
            return RunOutcome::AlreadyRunning;
        }
        self.run_claimed(task).await
    }

    /// Runs a task whose ownership the caller already claimed.
    #[instrument(level = "debug", skip_all, fields(task_id = %task.id()))]
    pub(crate) async fn run_claimed(&self, task: Arc<DownloadTask>) -> RunOutcome {
        let token = task.begin_run();
        let result = if is_interrupted(&task) {
            Ok(Transfer::Interrupted)
        } else {
            self.transfer(&task, &token).await
        };
        self.finish(&task, result).await
    }

    async fn transfer(
        &self,
        task: &DownloadTask,
        token: &CancellationToken,
    ) -> Result<Transfer, DownloadError> {
        let handle = self.ensure_destination(task).await?;
        let on_disk = self
            .sink
            .existing_length(&handle)
            .await
            .map_err(|e| DownloadError::destination(handle.key(), e))?;
        if on_disk != task.downloaded_bytes() {
            debug!(memory = task.downloaded_bytes(), on_disk, "reconciled with destination");
        }
        task.set_downloaded_bytes(on_disk);
        if is_interrupted(task) {
            return Ok(Transfer::Interrupted);
        }

        let url = task.request().url.as_str();
        let offset = on_disk;
        let if_range = task.validators().if_range_value();
        let sent = tokio::select! {
            biased;
            () = token.cancelled() => None,
            sent = self.client.send_download_request(task.request(), offset, if_range.as_deref()) => Some(sent),
        };
        let Some(response) = sent.transpose()? else {
            return Ok(Transfer::Interrupted);
        };

        let status = response.status().as_u16();
        let range = content_range(response.headers());
        let action = classify_response(status, offset, range);
        debug!(status, offset, ?range, ?action, "response classified");

        let body_offset = match action {
            ResumeAction::Reject { status } => {
                return Err(DownloadError::http_status(url, status));
            }
            ResumeAction::AlreadyComplete => {
                drop(response);
                self.settle_already_complete(task, &handle).await?;
                return Ok(Transfer::Finished);
            }
            ResumeAction::Gap {
                server_start,
                local,
            } => {
                drop(response);
                self.restart_from_zero(task, &handle).await?;
                return Err(DownloadError::unknown(format!(
                    "server resumed at byte {server_start}, local data ends at {local}"
                )));
            }
            ResumeAction::Fresh => 0,
            ResumeAction::Continue => offset,
            ResumeAction::Restart => {
                info!(offset, "server ignored range, restarting from zero");
                self.restart_from_zero(task, &handle).await?;
                0
            }
            ResumeAction::Rewind { offset: start } => {
                info!(local = offset, server = start, "server resumed earlier, rewinding");
                self.sink
                    .truncate_to(&handle, start)
                    .await
                    .map_err(|e| DownloadError::destination(handle.key(), e))?;
                task.set_downloaded_bytes(start);
                start
            }
        };

        task.set_total_bytes(derive_total(
            task.total_bytes(),
            range,
            content_length(response.headers()),
            body_offset,
        ));
        task.update_validators(response_validators(response.headers()));

        let writer = if body_offset > 0 {
            self.sink.open_append(&handle, body_offset).await
        } else {
            self.sink.open_overwrite(&handle).await
        }
        .map_err(|e| DownloadError::destination(handle.key(), e))?;

        self.copy_body(task, token, &handle, response, writer).await
    }

    async fn copy_body(
        &self,
        task: &DownloadTask,
        token: &CancellationToken,
        handle: &DestinationHandle,
        response: reqwest::Response,
        writer: DestinationWriter,
    ) -> Result<Transfer, DownloadError> {
        let url = task.request().url.as_str();
        let mut writer = BufWriter::with_capacity(self.chunk_size, writer);
        let mut body = StreamReader::new(Box::pin(
            response.bytes_stream().map_err(std::io::Error::other),
        ));
        let mut buf = vec![0u8; self.chunk_size];

        self.emit_gated(task, DownloadEvent::progress(task)).await;
        let mut last_progress = Instant::now();

        loop {
            if task.is_canceled() {
                return Ok(Transfer::Interrupted);
            }
            if task.is_paused() {
                flush(&mut writer, handle).await?;
                return Ok(Transfer::Interrupted);
            }

            let read = tokio::select! {
                biased;
                () = token.cancelled() => None,
                read = body.read(&mut buf) => Some(read),
            };
            let Some(read) = read else {
                if !task.is_canceled() {
                    flush(&mut writer, handle).await?;
                }
                return Ok(Transfer::Interrupted);
            };
            let n = read.map_err(|e| DownloadError::body_read(url, e))?;
            if n == 0 {
                break;
            }

            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| DownloadError::io(handle.key(), e))?;
            task.add_downloaded_bytes(n as u64);

            if last_progress.elapsed() >= self.progress_interval {
                self.emit_gated(task, DownloadEvent::progress(task)).await;
                last_progress = Instant::now();
            }
        }

        flush(&mut writer, handle).await?;
        Ok(Transfer::Finished)
    }

    async fn ensure_destination(
        &self,
        task: &DownloadTask,
    ) -> Result<DestinationHandle, DownloadError> {
        if let Some(handle) = task.destination() {
            return Ok(handle.clone());
        }
        let request = task.request();
        let allocated = self
            .sink
            .allocate(&request.file_name, &request.mime_type, &request.subdirectory)
            .await
            .map_err(|e| DownloadError::destination(&request.file_name, e))?;
        let handle = task.assign_destination(allocated).clone();
        info!(destination = %handle, "destination allocated");
        self.emit_gated(task, DownloadEvent::started(task)).await;
        Ok(handle)
    }

    async fn restart_from_zero(
        &self,
        task: &DownloadTask,
        handle: &DestinationHandle,
    ) -> Result<(), DownloadError> {
        self.sink
            .truncate(handle)
            .await
            .map_err(|e| DownloadError::destination(handle.key(), e))?;
        task.set_downloaded_bytes(0);
        Ok(())
    }

    /// A 416 on resume: everything is already on disk.
    async fn settle_already_complete(
        &self,
        task: &DownloadTask,
        handle: &DestinationHandle,
    ) -> Result<(), DownloadError> {
        let downloaded = task.downloaded_bytes();
        match u64::try_from(task.total_bytes()).ok().filter(|t| *t > 0) {
            Some(total) if downloaded > total => {
                self.sink
                    .truncate_to(handle, total)
                    .await
                    .map_err(|e| DownloadError::destination(handle.key(), e))?;
                task.set_downloaded_bytes(total);
            }
            Some(total) => task.set_downloaded_bytes(total),
            None => task.set_total_bytes(i64::try_from(downloaded).unwrap_or(i64::MAX)),
        }
        info!(bytes = task.downloaded_bytes(), "range not satisfiable, already complete");
        Ok(())
    }

    async fn finish(
        &self,
        task: &Arc<DownloadTask>,
        result: Result<Transfer, DownloadError>,
    ) -> RunOutcome {
        let mut gate = task.lock_gate().await;

        let outcome = if task.is_canceled() || !gate.is_open() {
            self.cancel_locked(task, &mut gate).await;
            RunOutcome::Canceled
        } else {
            match result {
                Ok(Transfer::Finished) => match self.complete_locked(task, &mut gate).await {
                    Ok(()) => RunOutcome::Completed,
                    Err(error) => self.fail_locked(task, error),
                },
                Ok(Transfer::Interrupted) => {
                    task.set_paused(true);
                    self.pause_locked(task)
                }
                Err(error) if task.is_paused() => {
                    debug!(%error, "failure while pausing, reported as pause");
                    self.pause_locked(task)
                }
                Err(error) => self.fail_locked(task, error),
            }
        };

        task.end_run();
        drop(gate);
        outcome
    }

    async fn complete_locked(
        &self,
        task: &DownloadTask,
        gate: &mut MutexGuard<'_, Gate>,
    ) -> Result<(), DownloadError> {
        let handle = task
            .destination()
            .cloned()
            .ok_or_else(|| DownloadError::unknown("completed without a destination"))?;
        self.sink
            .finalize(&handle)
            .await
            .map_err(|e| DownloadError::destination(handle.key(), e))?;

        let downloaded = task.downloaded_bytes();
        if task.total_bytes() <= 0 {
            task.set_total_bytes(i64::try_from(downloaded).unwrap_or(i64::MAX));
        }
        **gate = Gate::Completed;
        self.registry.remove(task.id());
        info!(bytes = downloaded, destination = %handle, "download complete");
        self.emitter.emit(DownloadEvent::complete(task));
        Ok(())
    }

    fn pause_locked(&self, task: &DownloadTask) -> RunOutcome {
        info!(bytes = task.downloaded_bytes(), "download paused");
        self.emitter.emit(DownloadEvent::paused(task));
        RunOutcome::Paused
    }

    fn fail_locked(&self, task: &DownloadTask, error: DownloadError) -> RunOutcome {
        warn!(kind = %error.kind(), %error, bytes = task.downloaded_bytes(), "download failed");
        self.emitter.emit(DownloadEvent::error(task, error.to_string()));
        RunOutcome::Failed(error)
    }

    /// Deletes the destination, drops the task and reports the cancellation once.
    ///
    /// A completed task is left alone.
    async fn cancel_locked(
        &self,
        task: &DownloadTask,
        gate: &mut MutexGuard<'_, Gate>,
    ) -> bool {
        if **gate == Gate::Completed {
            debug!(task_id = %task.id(), "cancel ignored, already complete");
            return false;
        }
        if let Some(handle) = task.destination()
            && let Err(error) = self.sink.delete(handle).await
        {
            warn!(task_id = %task.id(), %error, "failed to delete canceled destination");
        }
        self.registry.remove(task.id());
        if gate.is_open() {
            **gate = Gate::Canceled;
            info!(task_id = %task.id(), "download canceled");
            self.emitter.emit(DownloadEvent::canceled(task));
        }
        true
    }

    /// Marks `task` paused and breaks its run out of any pending I/O.
    ///
    /// When no run is active the paused event is emitted here.
    pub(crate) async fn pause(&self, task: &DownloadTask) {
        let gate = task.lock_gate().await;
        if !gate.is_open() {
            return;
        }
        let was_paused = task.is_paused();
        task.set_paused(true);
        if task.is_running() {
            task.interrupt();
        } else if !was_paused {
            self.pause_locked(task);
        }
    }

    /// Claims `task` for a new run, announcing the resume.
    ///
    /// Returns `false` when the task is already running or no longer resumable.
    pub(crate) async fn claim_for_resume(&self, task: &DownloadTask) -> bool {
        let gate = task.lock_gate().await;
        if !gate.is_open() || task.is_canceled() || !task.try_claim() {
            return false;
        }
        task.set_paused(false);
        info!(task_id = %task.id(), "download resumed");
        self.emitter.emit(DownloadEvent::resumed(task));
        true
    }

    /// Cancels `task` from the control plane.
    ///
    /// Returns `false` when the task already completed; its destination is kept.
    pub(crate) async fn cancel(&self, task: &DownloadTask) -> bool {
        let mut gate = task.lock_gate().await;
        if *gate == Gate::Completed {
            return false;
        }
        task.mark_canceled();
        task.interrupt();
        self.cancel_locked(task, &mut gate).await
    }

    async fn emit_gated(&self, task: &DownloadTask, event: DownloadEvent) {
        let gate = task.lock_gate().await;
        if gate.is_open() {
            self.emitter.emit(event);
        }
    }
}

fn is_interrupted(task: &DownloadTask) -> bool {
    task.is_canceled() || task.is_paused()
}

async fn flush(
    writer: &mut BufWriter<DestinationWriter>,
    handle: &DestinationHandle,
) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(handle.key(), e))
}
