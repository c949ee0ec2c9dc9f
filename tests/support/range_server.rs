//! Minimal HTTP/1.1 file server that dribbles bodies out slowly.
//!
//! Unlike wiremock, bodies are written in small pieces with a delay between
//! them, so tests can pause or cancel a transfer while it is in flight.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::socket_guard::should_skip_socket_bound_test;

/// Behavior knobs of the server.
#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// Answer `Range: bytes=N-` with 206/416; otherwise always send 200 with the full body.
    pub honor_ranges: bool,
    /// Bytes written per piece.
    pub piece_size: usize,
    /// Pause after each piece.
    pub piece_delay: Duration,
    /// Stop sending, keeping the connection open, once this many body bytes are out.
    pub stall_after: Option<usize>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            honor_ranges: true,
            piece_size: 64 * 1024,
            piece_delay: Duration::from_millis(5),
            stall_after: None,
        }
    }
}

/// One request as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub range: Option<String>,
    pub if_range: Option<String>,
}

struct State {
    resources: HashMap<String, Vec<u8>>,
    options: RangeServerOptions,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct RangeServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl RangeServer {
    /// Starts serving `resources` (path, body). `None` when sockets are unavailable.
    pub async fn start(
        resources: Vec<(&str, Vec<u8>)>,
        options: RangeServerOptions,
    ) -> Option<Self> {
        if should_skip_socket_bound_test() {
            return None;
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        let state = Arc::new(State {
            resources: resources
                .into_iter()
                .map(|(path, body)| (path.to_string(), body))
                .collect(),
            options,
            requests: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Some(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<State>) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 || head.len() > 64 * 1024 {
            return Ok(());
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let range = headers.get("range").cloned();
    state.requests.lock().unwrap().push(RecordedRequest {
        path: path.clone(),
        range: range.clone(),
        if_range: headers.get("if-range").cloned(),
    });

    let Some(body) = state.resources.get(&path) else {
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return stream.shutdown().await;
    };
    let len = body.len();
    let start = range
        .as_deref()
        .filter(|_| state.options.honor_ranges)
        .and_then(|value| value.strip_prefix("bytes="))
        .and_then(|value| value.strip_suffix('-'))
        .and_then(|value| value.parse::<usize>().ok());

    let (status, content_range, slice) = match start {
        Some(start) if start >= len => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{len}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            stream.write_all(response.as_bytes()).await?;
            return stream.shutdown().await;
        }
        Some(start) => (
            "206 Partial Content",
            format!("Content-Range: bytes {start}-{}/{len}\r\n", len - 1),
            &body[start..],
        ),
        None => ("200 OK", String::new(), &body[..]),
    };

    let response_head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{content_range}ETag: \"v1\"\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
        slice.len()
    );
    stream.write_all(response_head.as_bytes()).await?;
    let mut sent = 0;
    for piece in slice.chunks(state.options.piece_size.max(1)) {
        stream.write_all(piece).await?;
        stream.flush().await?;
        sent += piece.len();
        if state.options.stall_after.is_some_and(|limit| sent >= limit) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(state.options.piece_delay).await;
    }
    stream.shutdown().await
}

/// Deterministic test payload of `len` bytes, distinct per `seed`.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_add(seed.wrapping_mul(31)))
        .collect()
}
