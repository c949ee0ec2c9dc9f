//! Range-resume negotiation rules.
//!
//! Pure functions deciding what a response means for local progress: continue
//! appending, restart from zero, rewind to the server's offset, or treat the
//! download as already complete. No I/O happens here.

use std::sync::LazyLock;

use regex::Regex;

use super::constants::UNKNOWN_TOTAL;

static CONTENT_RANGE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*bytes\s+(\d+)\s*-\s*(\d+)\s*/\s*(\d+|\*)\s*$").ok()
});

/// Parsed `Content-Range: bytes <start>-<end>/<total|*>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset of the body.
    pub start: u64,
    /// Last byte offset of the body (inclusive).
    pub end: u64,
    /// Full resource length, `None` for `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parses a `Content-Range` header value; `None` when malformed.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let captures = CONTENT_RANGE_RE.as_ref()?.captures(header)?;
        let start = captures.get(1)?.as_str().parse().ok()?;
        let end = captures.get(2)?.as_str().parse().ok()?;
        let total = match captures.get(3)?.as_str() {
            "*" => None,
            digits => Some(digits.parse().ok()?),
        };
        Some(Self { start, end, total })
    }
}

/// Resume validators captured from earlier responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// `ETag` response header.
    pub etag: Option<String>,
    /// `Last-Modified` response header.
    pub last_modified: Option<String>,
}

impl Validators {
    /// Replaces each validator the fresh set supplies; keeps the rest.
    pub fn merge(&mut self, fresh: Validators) {
        if fresh.etag.is_some() {
            self.etag = fresh.etag;
        }
        if fresh.last_modified.is_some() {
            self.last_modified = fresh.last_modified;
        }
    }

    /// Value for an `If-Range` request header.
    ///
    /// Prefers a strong ETag; weak ETags are not allowed in `If-Range`.
    /// Falls back to `Last-Modified` when it is a valid HTTP-date.
    #[must_use]
    pub fn if_range_value(&self) -> Option<String> {
        if let Some(etag) = self.etag.as_deref().map(str::trim)
            && !etag.is_empty()
            && !etag.starts_with("W/")
        {
            return Some(etag.to_string());
        }
        self.last_modified
            .as_deref()
            .map(str::trim)
            .filter(|value| httpdate::parse_http_date(value).is_ok())
            .map(str::to_string)
    }
}

/// What the worker must do with local progress after classifying a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Nothing to reconcile: write from byte 0.
    Fresh,
    /// Server sent the full body although we asked for a range: truncate to zero.
    Restart,
    /// Server honored the range at our offset: append.
    Continue,
    /// Server resumed at an earlier offset: truncate to it, then append.
    Rewind {
        /// Offset the server resumed at.
        offset: u64,
    },
    /// Server resumed past our local data; appending would leave a gap.
    Gap {
        /// Offset the server resumed at.
        server_start: u64,
        /// Length of local data.
        local: u64,
    },
    /// Requested range starts at or beyond the end: nothing left to fetch.
    AlreadyComplete,
    /// Status outside the accepted band.
    Reject {
        /// Offending status code.
        status: u16,
    },
}

/// Classifies a response given the offset we asked to resume from.
#[must_use]
pub fn classify_response(
    status: u16,
    local_offset: u64,
    content_range: Option<ContentRange>,
) -> ResumeAction {
    let resuming = local_offset > 0;

    if resuming && status == 416 {
        return ResumeAction::AlreadyComplete;
    }
    if !(200..=206).contains(&status) {
        return ResumeAction::Reject { status };
    }
    if status != 206 {
        return if resuming {
            ResumeAction::Restart
        } else {
            ResumeAction::Fresh
        };
    }

    let Some(range) = content_range else {
        return if resuming {
            ResumeAction::Continue
        } else {
            ResumeAction::Fresh
        };
    };

    match range.start {
        start if start == local_offset => {
            if resuming {
                ResumeAction::Continue
            } else {
                ResumeAction::Fresh
            }
        }
        0 => ResumeAction::Restart,
        start if start < local_offset => ResumeAction::Rewind { offset: start },
        start => ResumeAction::Gap {
            server_start: start,
            local: local_offset,
        },
    }
}

/// Total size after a response, given the current total and the offset
/// the body starts at.
///
/// A numeric `Content-Range` total always wins. Otherwise an unknown total
/// is derived from the declared body length (`offset + length` when the body
/// continues local data); a known total is kept.
#[must_use]
pub fn derive_total(
    current_total: i64,
    content_range: Option<ContentRange>,
    declared_length: Option<u64>,
    body_offset: u64,
) -> i64 {
    if let Some(total) = content_range
        .and_then(|range| range.total)
        .and_then(|total| i64::try_from(total).ok())
        .filter(|total| *total > 0)
    {
        return total;
    }
    if current_total > 0 {
        return current_total;
    }
    declared_length
        .map(|length| body_offset.saturating_add(length))
        .and_then(|total| i64::try_from(total).ok())
        .unwrap_or(UNKNOWN_TOTAL)
}
