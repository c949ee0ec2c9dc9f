//! HTTP client wrapper issuing resumable GET requests.
//!
//! The client is built once and shared by all workers so connections are pooled.
//! It only sends requests and reads headers; classifying the response against
//! local progress is left to [`super::resume`].

use reqwest::header::{
    CONTENT_LENGTH, CONTENT_RANGE, ETAG, HeaderMap, HeaderName, HeaderValue, IF_RANGE,
    LAST_MODIFIED, RANGE,
};
use reqwest::{Client, Response};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::DownloadError;
use super::resume::{ContentRange, Validators};
use super::task::DownloadRequest;
use crate::config::EngineConfig;

/// HTTP client for range-resumable downloads.
///
/// Redirects are followed. Decompression is off, so `Content-Length` and
/// `Content-Range` always count raw bytes on the wire.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with the configured timeouts and User-Agent.
    ///
    /// The read timeout bounds each wait for body data, not the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Unknown`] if the underlying client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(config: &EngineConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Sends the GET for a download attempt.
    ///
    /// Adds `Range: bytes=<offset>-` when `offset > 0`, plus `If-Range` when a
    /// validator is given. The response is returned whatever its status.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] when the URL does not parse as http(s)
    /// - [`DownloadError::Timeout`] / [`DownloadError::Network`] when the request fails
    #[instrument(skip(self, request, if_range), fields(url = %request.url))]
    pub async fn send_download_request(
        &self,
        request: &DownloadRequest,
        offset: u64,
        if_range: Option<&str>,
    ) -> Result<Response, DownloadError> {
        let url = parse_http_url(&request.url)?;
        let mut builder = self.client.get(url).headers(request_headers(&request.headers));
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={offset}-"));
            if let Some(validator) = if_range {
                builder = builder.header(IF_RANGE, validator);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DownloadError::network(&request.url, e))?;
        debug!(
            status = response.status().as_u16(),
            offset, "response received"
        );
        Ok(response)
    }
}

fn parse_http_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|_| DownloadError::invalid_url(raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(raw));
    }
    Ok(url)
}

fn request_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => warn!(header = %name, "skipping invalid request header"),
        }
    }
    map
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Parsed `Content-Range` of a response.
#[must_use]
pub(crate) fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    header_str(headers, &CONTENT_RANGE).and_then(ContentRange::parse)
}

/// Declared body length of a response.
#[must_use]
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, &CONTENT_LENGTH).and_then(|value| value.parse().ok())
}

/// Validators a response supplies.
#[must_use]
pub(crate) fn response_validators(headers: &HeaderMap) -> Validators {
    Validators {
        etag: header_str(headers, &ETAG).map(str::to_string),
        last_modified: header_str(headers, &LAST_MODIFIED).map(str::to_string),
    }
}
