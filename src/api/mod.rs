//! Relay HTTP surface.
//!
//! - `GET /video_feed`: `multipart/x-mixed-replace` MJPEG restream
//! - `GET /detect_human/`: `{"human_detected": bool}`
//! - `GET /frame.jpg`: latest frame as a single JPEG (204 when none yet)
//! - `GET /health`
//!
//! Each accepted connection is served on its own thread and only ever reads
//! snapshots from the shared stores, so a slow client cannot stall ingestion
//! or another client.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{DetectionState, LatestFrameStore};
use crate::pipeline::frame_interval;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Part emission rate per `/video_feed` client.
    pub target_fps: u32,
    /// Wait between store polls while no frame exists yet.
    pub empty_retry: Duration,
    /// A client that cannot accept a part within this window is dropped.
    pub write_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            target_fps: 30,
            empty_retry: Duration::from_millis(20),
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    active_clients: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Connections currently held by a client thread.
    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::SeqCst)
    }

    /// Stop accepting, end every client stream and wait for all threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    store: Arc<LatestFrameStore>,
    detection: Arc<DetectionState>,
}

struct ServerContext {
    cfg: ApiConfig,
    store: Arc<LatestFrameStore>,
    detection: Arc<DetectionState>,
    shutdown: Arc<AtomicBool>,
    active_clients: Arc<AtomicUsize>,
}

/// Counts a client thread as active for as long as it lives.
struct ClientGuard(Arc<AtomicUsize>);

impl ClientGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Serialize)]
struct DetectionStatus {
    human_detected: bool,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        store: Arc<LatestFrameStore>,
        detection: Arc<DetectionState>,
    ) -> Self {
        Self {
            cfg,
            store,
            detection,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let active_clients = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(ServerContext {
            cfg: self.cfg,
            store: self.store,
            detection: self.detection,
            shutdown: shutdown.clone(),
            active_clients: active_clients.clone(),
        });
        let join = std::thread::Builder::new()
            .name("relay-api".into())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("relay api stopped: {:#}", err);
                }
            })
            .context("spawn api thread")?;

        Ok(ApiHandle {
            addr,
            shutdown,
            active_clients,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    let mut clients: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                clients.retain(|client| !client.is_finished());
                let client_ctx = ctx.clone();
                let guard = ClientGuard::enter(&ctx.active_clients);
                let spawned = std::thread::Builder::new()
                    .name(format!("relay-client-{}", peer))
                    .spawn(move || {
                        let _guard = guard;
                        if let Err(err) = handle_connection(stream, &client_ctx) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(handle) => clients.push(handle),
                    Err(err) => log::warn!("could not spawn client thread for {}: {}", peer, err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => break Err(err.into()),
        }
    };

    for client in clients {
        let _ = client.join();
    }
    result
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    // Accepted sockets can inherit the listener's non-blocking flag on some platforms.
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(ctx.cfg.write_timeout))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/video_feed" => {
            log::debug!(
                "video client connected: agent={}",
                request.header("user-agent").unwrap_or("-")
            );
            stream_video(&mut stream, ctx)
        }
        "/detect_human/" | "/detect_human" => {
            let status = DetectionStatus {
                human_detected: ctx.detection.get(),
            };
            let payload = serde_json::to_vec(&status)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/frame.jpg" => match ctx.store.read() {
            Some(frame) => write_response(&mut stream, 200, "image/jpeg", frame.jpeg()),
            None => write_response(&mut stream, 204, "image/jpeg", &[]),
        },
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Serve the multipart restream until the client goes away or the server stops.
fn stream_video(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={boundary}\r\nCache-Control: no-cache\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        boundary = MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let interval = frame_interval(ctx.cfg.target_fps);
    let mut parts = 0u64;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let frame = match ctx.store.read() {
            Some(frame) if !frame.is_empty() => frame,
            _ => {
                if client_disconnected(stream) {
                    log::debug!("video client left before the first frame");
                    return Ok(());
                }
                std::thread::sleep(ctx.cfg.empty_retry);
                continue;
            }
        };
        if let Err(err) = stream.write_all(&multipart_part(frame.jpeg())) {
            log::debug!("video client disconnected after {} parts: {}", parts, err);
            return Ok(());
        }
        parts += 1;
        std::thread::sleep(interval);
    }
    Ok(())
}

/// Non-blocking check for a peer that closed (or reset) the connection.
///
/// Only meaningful while nothing is being written: a write failure is the
/// disconnect signal once parts are flowing.
fn client_disconnected(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut peeked = [0u8; 1];
    let gone = match stream.peek(&mut peeked) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
        ),
    };
    gone || stream.set_nonblocking(false).is_err()
}

/// One multipart section: delimiter, part header, JPEG bytes, trailing CRLF.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(MJPEG_BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
