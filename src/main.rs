//! CLI entry point for the resumable downloader.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use resumable_downloader::download::constants::DEFAULT_SUBDIRECTORY;
use resumable_downloader::{
    DownloadEvent, DownloadManager, DownloadRequest, EngineConfig, FsSink, load_file_config,
};
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::Args;
use progress::Presenter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = load_file_config(args.config.as_deref())?;
    let mut config = EngineConfig::default().merged_with(&file_config);
    if let Some(secs) = args.connect_timeout {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.read_timeout {
        config = config.with_read_timeout(Duration::from_secs(secs));
    }

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let subdirectory = args
        .subdirectory
        .clone()
        .or_else(|| file_config.subdirectory.clone())
        .unwrap_or_else(|| DEFAULT_SUBDIRECTORY.to_string());

    let manager = DownloadManager::new(Arc::new(FsSink::new(&output_dir)), config)
        .context("Failed to initialize download engine")?;
    let mut events = manager.subscribe();

    let mut pending = HashSet::new();
    for (index, url) in args.urls.iter().enumerate() {
        let mut request = DownloadRequest::new(url.as_str()).with_subdirectory(subdirectory.as_str());
        if let Some(name) = args.names.get(index) {
            request = request.with_file_name(name.as_str());
        }
        if let Some(mime_type) = &args.mime_type {
            request = request.with_mime_type(mime_type.as_str());
        }
        for (name, value) in &args.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        pending.insert(manager.start(request));
    }
    if args.names.len() > args.urls.len() {
        warn!(
            names = args.names.len(),
            urls = args.urls.len(),
            "more names than URLs, extra names ignored"
        );
    }
    info!(
        downloads = pending.len(),
        output_dir = %output_dir.display(),
        "Downloads started"
    );

    let mut presenter = Presenter::new(args.json, args.quiet);
    let (mut completed, mut paused, mut failed, mut canceled) = (0usize, 0usize, 0usize, 0usize);
    let mut interrupted = false;

    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                presenter.handle(&event);
                if !event.is_terminal() {
                    continue;
                }
                match &event {
                    DownloadEvent::Complete { .. } => completed += 1,
                    DownloadEvent::Paused { .. } => paused += 1,
                    DownloadEvent::Canceled { .. } => canceled += 1,
                    DownloadEvent::Error { message, url, .. } => {
                        warn!(url = %url, error = %message, "Download failed");
                        failed += 1;
                    }
                    _ => {}
                }
                pending.remove(event.task_id());
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(error) = signal {
                    warn!(%error, "Failed to listen for Ctrl-C");
                    continue;
                }
                info!("Interrupted, pausing downloads (run again to resume)");
                manager.pause_all().await;
            }
        }
    }

    info!(
        completed,
        paused,
        failed,
        canceled,
        status = %manager.status().summary_text(),
        "Downloads finished"
    );

    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
