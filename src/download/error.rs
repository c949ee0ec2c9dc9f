//! Error types for the download module.
//!
//! Every failure of a worker run is reported through one of these variants.
//! Pause and cancel are control transitions, not errors, and never appear here.

use std::fmt;

use thiserror::Error;

/// Coarse failure classes reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The destination could not be allocated, opened, truncated or finalized.
    Destination,
    /// The server answered outside the accepted 200-206 band.
    HttpStatus,
    /// Connect, read or write failure, including timeouts.
    Network,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Destination => "destination",
            Self::HttpStatus => "http_status",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can end a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The destination sink refused an operation.
    #[error("destination error for {name}: {reason}")]
    Destination {
        /// File name (or destination key) involved.
        name: String,
        /// Human-readable reason from the sink.
        reason: String,
    },

    /// HTTP response code outside 200-206 (416 on resume is handled, not reported).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Connection-level failure while sending the request.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The response body stream broke off.
    #[error("connection lost while reading {url}: {source}")]
    BodyRead {
        /// The URL being read.
        url: String,
        /// The underlying stream error.
        #[source]
        source: std::io::Error,
    },

    /// Writing downloaded bytes to the destination failed.
    #[error("IO error writing to {destination}: {source}")]
    Io {
        /// The destination key being written.
        destination: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The request URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Catch-all for unexpected failures.
    #[error("{message}")]
    Unknown {
        /// Description of what went wrong.
        message: String,
    },
}

impl DownloadError {
    /// Creates a destination error.
    pub fn destination(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Destination {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a body-read error, promoting wrapped client timeouts.
    pub fn body_read(url: impl Into<String>, source: std::io::Error) -> Self {
        let timed_out = source.kind() == std::io::ErrorKind::TimedOut
            || source
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout);
        if timed_out {
            Self::Timeout { url: url.into() }
        } else {
            Self::BodyRead {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a destination write error.
    pub fn io(destination: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            destination: destination.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a catch-all error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Destination { .. } => ErrorKind::Destination,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
            Self::Network { .. } | Self::Timeout { .. } | Self::BodyRead { .. } | Self::Io { .. } => {
                ErrorKind::Network
            }
            Self::InvalidUrl { .. } | Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs context
// (url or destination) the source errors do not carry.
