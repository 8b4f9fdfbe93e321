//! HTTP/MJPEG stream server.
//!
//! Routes:
//! - `/`           index page
//! - `/video`      annotated MJPEG stream
//! - `/video_raw`  raw MJPEG stream, no overlay
//! - `/snapshot`   writes a raw + annotated JPEG pair, answers with the file names
//! - `/health`     "ok"
//! - `/config`     effective configuration as JSON
//!
//! The capture loop publishes into a [`FrameHub`]; every client thread waits
//! on the hub for a frame newer than the last one it sent.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::frame::encode_jpeg;
use crate::presence::Presence;
use crate::snapshot::SnapshotSink;

const MAX_REQUEST_BYTES: usize = 8 * 1024;
const BOUNDARY: &str = "frame";
const CLIENT_WAIT: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// One rendered frame as served to clients.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub seq: u64,
    pub raw: Arc<RgbImage>,
    pub annotated: Arc<RgbImage>,
    pub annotated_jpeg: Arc<Vec<u8>>,
    pub count: usize,
    pub presence: Presence,
}

#[derive(Default)]
struct HubState {
    latest: Option<Arc<PublishedFrame>>,
    closed: bool,
}

/// Latest-frame publication point shared by the capture loop and clients.
#[derive(Default)]
pub struct FrameHub {
    state: Mutex<HubState>,
    fresh: Condvar,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: PublishedFrame) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.latest = Some(Arc::new(frame));
        drop(state);
        self.fresh.notify_all();
    }

    pub fn latest(&self) -> Option<Arc<PublishedFrame>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.latest.clone()
    }

    /// Block until a frame with `seq > after` is published, the hub closes,
    /// or `timeout` passes.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<PublishedFrame>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let (state, _) = self
            .fresh
            .wait_timeout_while(state, timeout, |s| {
                !s.closed && s.latest.as_ref().map_or(true, |f| f.seq <= after)
            })
            .unwrap_or_else(|p| p.into_inner());
        state.latest.as_ref().filter(|f| f.seq > after).cloned()
    }

    /// Wake every waiting client and make further waits return immediately.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.closed = true;
        drop(state);
        self.fresh.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).closed
    }
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    /// Pre-rendered body for `/config`.
    pub config_json: Arc<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            jpeg_quality: 80,
            config_json: Arc::new("{}".to_string()),
        }
    }
}

#[derive(Serialize)]
struct ConfigDocument<'a> {
    detector: &'a str,
    model_path: Option<&'a Path>,
    config: &'a ServiceConfig,
}

impl StreamConfig {
    /// Listen settings and the `/config` body for a running service.
    pub fn for_service(
        cfg: &ServiceConfig,
        detector: &str,
        model_path: Option<&Path>,
    ) -> Result<Self> {
        let body = serde_json::to_string_pretty(&ConfigDocument {
            detector,
            model_path,
            config: cfg,
        })
        .context("failed to render /config document")?;
        Ok(Self {
            addr: cfg.addr.clone(),
            jpeg_quality: cfg.jpeg_quality,
            config_json: Arc::new(body),
        })
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    hub: Arc<FrameHub>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.hub.close();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHub")
            .field("latest_seq", &self.latest().map(|frame| frame.seq))
            .finish()
    }
}

pub struct StreamServer {
    cfg: StreamConfig,
    hub: Arc<FrameHub>,
    snapshots: SnapshotSink,
}

#[derive(Clone)]
struct ClientContext {
    cfg: StreamConfig,
    hub: Arc<FrameHub>,
    snapshots: SnapshotSink,
    shutdown: Arc<AtomicBool>,
}

impl StreamServer {
    pub fn new(cfg: StreamConfig, hub: Arc<FrameHub>, snapshots: SnapshotSink) -> Self {
        Self {
            cfg,
            hub,
            snapshots,
        }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = ClientContext {
            cfg: self.cfg,
            hub: Arc::clone(&self.hub),
            snapshots: self.snapshots,
            shutdown: Arc::clone(&shutdown),
        };
        let join = std::thread::Builder::new()
            .name("boxwatch-http".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, ctx) {
                    log::error!("stream server stopped: {}", err);
                }
            })
            .context("failed to spawn stream server thread")?;

        Ok(StreamHandle {
            addr,
            shutdown,
            hub: self.hub,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, ctx: ClientContext) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let client = ctx.clone();
                let spawned = std::thread::Builder::new()
                    .name("boxwatch-client".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &client) {
                            log::debug!("client {} closed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not serve client {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ClientContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_text_response(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/health" => write_text_response(&mut stream, 200, "ok"),
        "/config" => write_response(
            &mut stream,
            200,
            "application/json",
            ctx.cfg.config_json.as_bytes(),
        ),
        "/snapshot" => serve_snapshot(&mut stream, ctx),
        "/video" => serve_mjpeg(&mut stream, ctx, |frame| Ok(Arc::clone(&frame.annotated_jpeg))),
        "/video_raw" => {
            let quality = ctx.cfg.jpeg_quality;
            serve_mjpeg(&mut stream, ctx, move |frame| {
                encode_jpeg(&frame.raw, quality).map(Arc::new)
            })
        }
        _ => write_text_response(&mut stream, 404, "not found"),
    }
}

#[derive(Serialize)]
struct SnapshotReply<'a> {
    raw: &'a str,
    annotated: &'a str,
    count: usize,
    frame_seq: u64,
}

fn serve_snapshot(stream: &mut TcpStream, ctx: &ClientContext) -> Result<()> {
    let Some(frame) = ctx.hub.latest() else {
        return write_text_response(stream, 503, "no frame captured yet");
    };
    match ctx
        .snapshots
        .save(&frame.raw, &frame.annotated, frame.count, frame.seq)
    {
        Ok(record) => {
            let raw = file_name(&record.raw);
            let annotated = file_name(&record.annotated);
            let payload = serde_json::to_vec(&SnapshotReply {
                raw: &raw,
                annotated: &annotated,
                count: record.count,
                frame_seq: record.frame_seq,
            })?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(err) => {
            log::warn!("snapshot failed: {:#}", err);
            write_text_response(stream, 500, "snapshot failed")
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn serve_mjpeg<F>(stream: &mut TcpStream, ctx: &ClientContext, body: F) -> Result<()>
where
    F: Fn(&PublishedFrame) -> Result<Arc<Vec<u8>>>,
{
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut last_seq = 0;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let Some(frame) = ctx.hub.wait_newer(last_seq, CLIENT_WAIT) else {
            if ctx.hub.is_closed() {
                break;
            }
            continue;
        };
        last_seq = frame.seq;
        let jpeg = match body(&frame) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::debug!("skipping frame {} for client: {:#}", frame.seq, err);
                continue;
            }
        };
        write_part(stream, &jpeg)?;
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
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
    if headers
        .get("content-length")
        .is_some_and(|len| len.trim() != "0")
    {
        return Err(anyhow!("request bodies are not accepted"));
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_text_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "text/plain; charset=utf-8", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
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
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><title>boxwatch</title></head>
<body style="background:#111;color:#eee;font-family:sans-serif">
<h1>boxwatch</h1>
<p><img src="/video" alt="annotated stream"></p>
<p>
<a href="/video_raw">raw stream</a> |
<a href="/snapshot">save snapshot</a> |
<a href="/config">config</a> |
<a href="/health">health</a>
</p>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn published(seq: u64) -> PublishedFrame {
        let img = Arc::new(RgbImage::new(4, 4));
        PublishedFrame {
            seq,
            raw: Arc::clone(&img),
            annotated: img,
            annotated_jpeg: Arc::new(vec![0xFF, 0xD8]),
            count: 0,
            presence: Presence::Absent,
        }
    }

    #[test]
    fn wait_newer_returns_published_frame() {
        let hub = FrameHub::new();
        hub.publish(published(3));
        let frame = hub.wait_newer(2, Duration::from_millis(10)).unwrap();
        assert_eq!(frame.seq, 3);
    }

    #[test]
    fn wait_newer_times_out_without_fresh_frame() {
        let hub = FrameHub::new();
        hub.publish(published(3));
        let start = Instant::now();
        assert!(hub.wait_newer(3, Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn publish_wakes_waiting_client() {
        let hub = Arc::new(FrameHub::new());
        let waiter = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || hub.wait_newer(0, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        hub.publish(published(1));
        let frame = waiter.join().unwrap();
        assert_eq!(frame.map(|f| f.seq), Some(1));
    }

    #[test]
    fn config_document_names_detector_and_model() -> Result<()> {
        let cfg = ServiceConfig::default();
        let stream = StreamConfig::for_service(&cfg, "neural", Some(Path::new("models/a.onnx")))?;
        let doc: serde_json::Value = serde_json::from_str(&stream.config_json)?;
        assert_eq!(doc["detector"], "neural");
        assert_eq!(doc["model_path"], "models/a.onnx");
        assert_eq!(doc["config"]["jpeg_quality"], 80);
        assert_eq!(stream.addr, cfg.addr);
        Ok(())
    }

    #[test]
    fn close_releases_waiters() {
        let hub = FrameHub::new();
        hub.close();
        let start = Instant::now();
        assert!(hub.wait_newer(0, Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(hub.is_closed());
    }
}
