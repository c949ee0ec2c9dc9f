//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files over HTTP with pause, resume and cancel.
///
/// Partial downloads are kept as `<name>.part` next to the final file; running
/// the same command again resumes from the bytes already on disk. Ctrl-C
/// pauses every download.
#[derive(Parser, Debug)]
#[command(name = "rdown")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Root directory for downloads (default: config file, then current directory)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Subdirectory below the output directory (default: config file, then "Downloads")
    #[arg(short = 's', long, value_name = "NAME")]
    pub subdirectory: Option<String>,

    /// File name for the URL in the same position (repeatable)
    #[arg(short = 'n', long = "name", value_name = "FILE")]
    pub names: Vec<String>,

    /// MIME type recorded for every download
    #[arg(short = 'm', long, value_name = "TYPE")]
    pub mime_type: Option<String>,

    /// Extra request header, e.g. "Authorization: Bearer x" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Print events as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Config file path (default: $XDG_CONFIG_HOME/rdown/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
