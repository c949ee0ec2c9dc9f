//! Presenters for engine events: progress bars, JSON lines, or nothing.

use std::collections::HashMap;
use std::io::Write;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use resumable_downloader::{DownloadEvent, TaskId, format_bytes};

const BAR_TEMPLATE: &str =
    "{msg:30!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:30!} {bytes} {bytes_per_sec}";

/// Renders events for the terminal.
pub(crate) enum Presenter {
    /// One progress bar per task.
    Bars {
        multi: MultiProgress,
        bars: HashMap<TaskId, ProgressBar>,
    },
    /// One JSON object per line on stdout.
    Json,
    /// No output.
    Silent,
}

impl Presenter {
    pub(crate) fn new(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Silent
        } else {
            Self::Bars {
                multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
                bars: HashMap::new(),
            }
        }
    }

    pub(crate) fn handle(&mut self, event: &DownloadEvent) {
        match self {
            Self::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    let mut stdout = std::io::stdout().lock();
                    let _ = writeln!(stdout, "{line}");
                    let _ = stdout.flush();
                }
            }
            Self::Silent => {}
            Self::Bars { multi, bars } => update_bar(multi, bars, event),
        }
    }
}

fn update_bar(
    multi: &MultiProgress,
    bars: &mut HashMap<TaskId, ProgressBar>,
    event: &DownloadEvent,
) {
    let bar = bars
        .entry(event.task_id().clone())
        .or_insert_with(|| multi.add(new_bar()));

    match event {
        DownloadEvent::Started { file_name, .. } | DownloadEvent::Resumed { file_name, .. } => {
            bar.set_message(file_name.clone());
        }
        DownloadEvent::Progress {
            downloaded_bytes,
            total_bytes,
            file_name,
            ..
        } => {
            bar.set_message(file_name.clone());
            apply_total(bar, *total_bytes);
            bar.set_position(*downloaded_bytes);
        }
        DownloadEvent::Paused { file_name, .. } => {
            bar.abandon_with_message(format!("{file_name} paused"));
        }
        DownloadEvent::Complete {
            downloaded_bytes,
            total_bytes,
            file_name,
            ..
        } => {
            apply_total(bar, *total_bytes);
            bar.set_position(*downloaded_bytes);
            bar.finish_with_message(format!("{file_name} done ({})", format_bytes(*downloaded_bytes)));
        }
        DownloadEvent::Canceled { file_name, .. } => {
            bar.abandon_with_message(format!("{file_name} canceled"));
        }
        DownloadEvent::Error {
            file_name, message, ..
        } => {
            bar.abandon_with_message(format!("{file_name} failed: {message}"));
        }
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::no_length();
    bar.set_style(
        ProgressStyle::with_template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

fn apply_total(bar: &ProgressBar, total_bytes: i64) {
    let Some(total) = u64::try_from(total_bytes).ok().filter(|t| *t > 0) else {
        return;
    };
    if bar.length() != Some(total) {
        bar.set_length(total);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }
}
