//! Constants for the download module (timeouts, chunking, progress cadence, defaults).

use std::time::Duration;

/// Default HTTP connect timeout (15 seconds), fixed per attempt.
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default HTTP read timeout (15 seconds between body reads), fixed per attempt.
pub const READ_TIMEOUT_SECS: u64 = 15;

/// Size of each body read and of the destination write buffer (256 KiB).
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Minimum interval between two progress events of the same task.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// File name used when neither the caller nor the URL provides one.
pub const DEFAULT_FILE_NAME: &str = "download";

/// Subdirectory used when the caller does not name one.
pub const DEFAULT_SUBDIRECTORY: &str = "Downloads";

/// MIME type used when the caller does not name one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Suffix marking a destination that has not been finalized yet.
pub const PENDING_SUFFIX: &str = ".part";

/// Sentinel for an unknown total size.
pub const UNKNOWN_TOTAL: i64 = -1;
