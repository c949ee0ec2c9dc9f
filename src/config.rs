//! Engine configuration and the optional config file.
//!
//! [`EngineConfig`] carries the per-attempt knobs of the download engine.
//! [`FileConfig`] is read from `config.toml` (simple `key = value` lines) and
//! supplies defaults the CLI flags can override.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::download::constants::{
    CHUNK_SIZE, CONNECT_TIMEOUT_SECS, PROGRESS_INTERVAL, READ_TIMEOUT_SECS,
};
use crate::user_agent;

/// Tunables of the download engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Connect timeout per attempt.
    pub connect_timeout: Duration,
    /// Maximum idle time between body reads.
    pub read_timeout: Duration,
    /// Size of one body read and of the write buffer.
    pub chunk_size: usize,
    /// Minimum time between two progress events of one task.
    pub progress_interval: Duration,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            chunk_size: CHUNK_SIZE,
            progress_interval: PROGRESS_INTERVAL,
            user_agent: user_agent::default_download_user_agent(),
        }
    }
}

impl EngineConfig {
    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the chunk size (at least one byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the minimum interval between progress events.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the User-Agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Applies the values a config file sets.
    #[must_use]
    pub fn merged_with(mut self, file: &FileConfig) -> Self {
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.read_timeout_secs {
            self.read_timeout = Duration::from_secs(secs);
        }
        if let Some(kib) = file.chunk_size_kib {
            self.chunk_size = kib.saturating_mul(1024);
        }
        if let Some(ms) = file.progress_interval_ms {
            self.progress_interval = Duration::from_millis(ms);
        }
        self
    }
}

/// Values read from the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Root directory of the filesystem sink.
    pub output_dir: Option<PathBuf>,
    /// Default destination subdirectory.
    pub subdirectory: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Chunk size in KiB.
    pub chunk_size_kib: Option<usize>,
    /// Progress interval in milliseconds.
    pub progress_interval_ms: Option<u64>,
}

impl FileConfig {
    /// Validates values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 3600)?;
        validate_range(
            "chunk_size_kib",
            self.chunk_size_kib.map(|kib| kib as u64),
            1,
            16 * 1024,
        )?;
        validate_range("progress_interval_ms", self.progress_interval_ms, 0, 60_000)?;
        if let Some(subdirectory) = &self.subdirectory
            && subdirectory.split(['/', '\\']).any(|segment| segment == "..")
        {
            bail!("Invalid config value for `subdirectory`: {subdirectory:?} must not contain `..`");
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/rdown/config.toml`
/// 2. `$HOME/.config/rdown/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("rdown").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("rdown")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `path`, or the default path when `None`.
///
/// A missing file yields an empty config; a malformed one is an error.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path
        .map(Path::to_path_buf)
        .or_else(resolve_default_config_path)
    else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses config file contents.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "subdirectory" => {
                cfg.subdirectory = Some(parse_string_literal(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "chunk_size_kib" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.chunk_size_kib = Some(
                    usize::try_from(parsed)
                        .map_err(|_| anyhow::anyhow!("chunk_size_kib out of range for usize"))?,
                );
            }
            "progress_interval_ms" => {
                cfg.progress_interval_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.read_timeout, Duration::from_secs(15));
        assert_eq!(config.chunk_size, 256 * 1024);
        assert_eq!(config.progress_interval, Duration::from_millis(500));
        assert!(config.user_agent.starts_with("rdown/"));
    }

    #[test]
    fn test_engine_config_builders() {
        let config = EngineConfig::default()
            .with_connect_timeout(Duration::from_secs(2))
            .with_read_timeout(Duration::from_secs(3))
            .with_chunk_size(0)
            .with_progress_interval(Duration::ZERO)
            .with_user_agent("test/1.0");
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.progress_interval, Duration::ZERO);
        assert_eq!(config.user_agent, "test/1.0");
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "/data/downloads"
subdirectory = "Debrify"   # shown in the tray
connect_timeout_secs = 5
read_timeout_secs = 30
chunk_size_kib = 64
progress_interval_ms = 250
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/data/downloads")));
        assert_eq!(cfg.subdirectory.as_deref(), Some("Debrify"));
        assert_eq!(cfg.connect_timeout_secs, Some(5));
        assert_eq!(cfg.read_timeout_secs, Some(30));
        assert_eq!(cfg.chunk_size_kib, Some(64));
        assert_eq!(cfg.progress_interval_ms, Some(250));

        let engine = EngineConfig::default().merged_with(&cfg);
        assert_eq!(engine.connect_timeout, Duration::from_secs(5));
        assert_eq!(engine.read_timeout, Duration::from_secs(30));
        assert_eq!(engine.chunk_size, 64 * 1024);
        assert_eq!(engine.progress_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_values() {
        let err = parse_config_str("connect_timeout_secs = 0").expect_err("0 is below range");
        assert!(err.to_string().contains("connect_timeout_secs"));

        let err = parse_config_str("chunk_size_kib = 0").expect_err("0 is below range");
        assert!(err.to_string().contains("chunk_size_kib"));

        let err = parse_config_str("progress_interval_ms = 60001").expect_err("above range");
        assert!(err.to_string().contains("progress_interval_ms"));
    }

    #[test]
    fn test_parse_config_rejects_traversing_subdirectory() {
        let err = parse_config_str(r#"subdirectory = "../etc""#).expect_err("traversal");
        assert!(err.to_string().contains("subdirectory"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_strings_and_bad_syntax() {
        let err = parse_config_str("output_dir = /tmp").expect_err("unquoted");
        assert!(err.to_string().contains("output_dir"));

        let err = parse_config_str("just words").expect_err("no equals sign");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("concurrency = 4").expect_err("unknown key");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_keeps_hash_inside_strings() {
        let cfg = parse_config_str(r#"subdirectory = "Season #1""#).unwrap();
        assert_eq!(cfg.subdirectory.as_deref(), Some("Season #1"));
    }

    #[test]
    fn test_load_file_config_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cfg = load_file_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, FileConfig::default());
    }

    #[test]
    fn test_load_file_config_reports_path_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "read_timeout_secs = -1\n").unwrap();
        let err = load_file_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
