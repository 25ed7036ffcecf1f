// Minimal HTTP/1.1 server, std only.
// Endpoints: GET /api/v1/products?ids=..., GET /health/live, GET /health/ready
use anyhow::{bail, Context, Result};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::handler::{GetByIdsHandler, GetByIdsOutcome, GetByIdsRequest};
use super::problem::{Problem, PROBLEM_CONTENT_TYPE};
use super::{ProductCache, SnapshotOrigin};

const ACCEPT_POLL_SLEEP: Duration = Duration::from_millis(5);
const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_BYTES: u64 = 8 * 1024;
const PRODUCTS_PATH: &str = "/api/v1/products";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub max_ids: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5080,
            max_connections: 32,
            read_timeout: Duration::from_secs(10),
            max_ids: super::handler::DEFAULT_MAX_IDS,
        }
    }
}

#[derive(Debug, Serialize)]
struct LiveResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyResponse {
    status: &'static str,
    origin: SnapshotOrigin,
    records: usize,
    etag: String,
    loaded_at: String,
    watching: bool,
}

// ── HTTP parsing helpers ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    query: Option<String>,
    headers: HashMap<String, String>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Read one line, refusing lines longer than [`MAX_LINE_BYTES`].
fn read_bounded_line(reader: &mut impl BufRead, what: &str) -> Result<String> {
    let mut line = String::new();
    let n = reader
        .by_ref()
        .take(MAX_LINE_BYTES + 1)
        .read_line(&mut line)
        .with_context(|| format!("Failed to read {what}"))?;
    if n as u64 > MAX_LINE_BYTES {
        bail!("{what} exceeds {MAX_LINE_BYTES} bytes");
    }
    Ok(line)
}

fn parse_request(stream: impl Read) -> Result<Request> {
    let mut reader = BufReader::new(stream);

    let request_line = read_bounded_line(&mut reader, "request line")?;
    if request_line.is_empty() {
        return Err(std::io::Error::from(ErrorKind::UnexpectedEof))
            .context("Connection closed before request line");
    }
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        bail!("Malformed request line: {}", request_line.trim());
    }
    let method = parts[0].to_uppercase();
    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (parts[1].to_string(), None),
    };

    let mut headers = HashMap::new();
    for _ in 0..MAX_HEADER_LINES {
        let line = read_bounded_line(&mut reader, "header line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Request {
                method,
                path,
                query,
                headers,
            });
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    bail!("Too many header lines (max {MAX_HEADER_LINES})")
}

/// Collect `ids` query values. Repeated keys and comma-separated values both work;
/// `+` is a space and `%XX` is decoded after splitting, so `%2C` stays inside an id.
fn query_ids(query: Option<&str>) -> Vec<String> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key) == "ids").then_some(value)
        })
        .flat_map(|value| value.split(','))
        .map(decode)
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

struct Response {
    status: u16,
    content_type: Option<&'static str>,
    etag: Option<String>,
    body: String,
}

impl Response {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: Some("application/json"),
            etag: None,
            body,
        }
    }

    fn problem(problem: Problem) -> Self {
        Self {
            status: problem.status,
            content_type: Some(PROBLEM_CONTENT_TYPE),
            etag: None,
            body: problem.to_json(),
        }
    }
}

fn write_response(stream: &TcpStream, resp: &Response) -> Result<()> {
    let status_text = match resp.status {
        200 => "OK",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let mut head = format!("HTTP/1.1 {} {status_text}\r\n", resp.status);
    if let Some(ct) = resp.content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    if let Some(etag) = &resp.etag {
        head.push_str(&format!("ETag: {etag}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        resp.body.len()
    ));
    let mut w = stream;
    w.write_all(head.as_bytes())
        .and_then(|_| w.write_all(resp.body.as_bytes()))
        .context("Failed to write HTTP response")?;
    Ok(())
}

// ── Endpoint handlers ─────────────────────────────────────────────────────────

struct ServerContext {
    cache: Arc<ProductCache>,
    max_ids: usize,
}

fn handle_products(
    req: &Request,
    ctx: &ServerContext,
    cancel: &CancellationToken,
    trace_id: &str,
) -> Option<Response> {
    let mut get = GetByIdsRequest::new(query_ids(req.query.as_deref()));
    get.if_none_match = req.header("if-none-match").map(str::to_string);

    let outcome = GetByIdsHandler::new(ctx.cache.as_ref(), ctx.max_ids).handle(&get, cancel);
    let resp = match outcome {
        GetByIdsOutcome::Ok { body, etag } => match serde_json::to_string(&body) {
            Ok(json) => Response {
                etag: Some(etag),
                ..Response::json(200, json)
            },
            Err(e) => {
                tracing::error!(error = %e, trace_id, "products.get serialization failed");
                Response::problem(Problem::unhandled(Some(trace_id)))
            }
        },
        GetByIdsOutcome::NotModified { etag } => Response {
            status: 304,
            content_type: None,
            etag: Some(etag),
            body: String::new(),
        },
        GetByIdsOutcome::BadRequest { detail } => Response::problem(Problem::new(
            400,
            "Validation Failed",
            &detail,
            Some(trace_id),
        )),
        GetByIdsOutcome::NotFound => Response::problem(Problem::new(
            404,
            "Not Found",
            "No products found for the given ids.",
            Some(trace_id),
        )),
        GetByIdsOutcome::Cancelled => return None,
    };
    Some(resp)
}

fn handle_live() -> Result<String> {
    serde_json::to_string(&LiveResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
    .context("Failed to serialize live response")
}

fn handle_ready(cache: &ProductCache) -> Result<(u16, String)> {
    let status = cache.status();
    let ready = status.origin == SnapshotOrigin::Loaded;
    let body = serde_json::to_string(&ReadyResponse {
        status: if ready { "ok" } else { "degraded" },
        origin: status.origin,
        records: status.records,
        etag: status.etag,
        loaded_at: status.loaded_at,
        watching: status.watching,
    })
    .context("Failed to serialize ready response")?;
    Ok((if ready { 200 } else { 503 }, body))
}

fn route(
    req: &Request,
    ctx: &ServerContext,
    cancel: &CancellationToken,
    trace_id: &str,
) -> Option<Response> {
    if req.method != "GET" {
        return Some(Response::problem(Problem::new(
            405,
            "Method Not Allowed",
            "Only GET is supported.",
            Some(trace_id),
        )));
    }
    let resp = match req.path.trim_end_matches('/') {
        PRODUCTS_PATH => return handle_products(req, ctx, cancel, trace_id),
        "/health/live" => match handle_live() {
            Ok(body) => Response::json(200, body),
            Err(e) => {
                tracing::error!(error = %e, trace_id, "health.live failed");
                Response::problem(Problem::unhandled(Some(trace_id)))
            }
        },
        "/health/ready" => match handle_ready(&ctx.cache) {
            Ok((status, body)) => Response::json(status, body),
            Err(e) => {
                tracing::error!(error = %e, trace_id, "health.ready failed");
                Response::problem(Problem::unhandled(Some(trace_id)))
            }
        },
        _ => Response::problem(Problem::new(
            404,
            "Not Found",
            "Available: GET /api/v1/products?ids=..., GET /health/live, GET /health/ready",
            Some(trace_id),
        )),
    };
    Some(resp)
}

// ── Connection handler ────────────────────────────────────────────────────────

/// True when the client has already hung up. A closed read side counts as gone.
fn peer_gone(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    let gone = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() != ErrorKind::WouldBlock,
    };
    stream.set_nonblocking(false).ok();
    gone
}

fn handle_connection(
    stream: TcpStream,
    ctx: &ServerContext,
    cancel: &CancellationToken,
    read_timeout: Duration,
    trace_id: &str,
) {
    stream.set_read_timeout(Some(read_timeout)).ok();

    let req = match parse_request(&stream) {
        Ok(r) => r,
        Err(e) if e.downcast_ref::<std::io::Error>().is_some() => {
            tracing::debug!(error = %e, trace_id, "http read failed, connection cancelled");
            cancel.cancel();
            return;
        }
        Err(e) => {
            tracing::debug!(error = %e, trace_id, "http parse error");
            let problem = Problem::new(400, "Bad Request", &e.to_string(), Some(trace_id));
            let _ = write_response(&stream, &Response::problem(problem));
            return;
        }
    };

    if peer_gone(&stream) {
        cancel.cancel();
    }
    let Some(resp) = route(&req, ctx, cancel, trace_id) else {
        tracing::debug!(trace_id, "request cancelled, no response written");
        return;
    };
    tracing::info!(
        method = %req.method,
        path = %req.path,
        status = resp.status,
        trace_id,
        "http request"
    );
    if let Err(e) = write_response(&stream, &resp) {
        tracing::debug!(error = %e, trace_id, "http write failed");
    }
}

// ── Public entry point ────────────────────────────────────────────────────────

pub fn bind(opts: &ServerOptions) -> Result<TcpListener> {
    let addr = format!("{}:{}", opts.host, opts.port);
    TcpListener::bind(&addr).with_context(|| format!("Failed to bind to {addr}"))
}

/// Accept connections until `shutdown` is cancelled. One thread per connection,
/// at most `max_connections` at a time. Each connection gets a child token, so
/// shutdown also cancels requests still in flight.
pub fn serve(
    listener: TcpListener,
    cache: Arc<ProductCache>,
    opts: &ServerOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    listener
        .set_nonblocking(true)
        .context("Failed to set non-blocking mode")?;
    let local: Option<SocketAddr> = listener.local_addr().ok();

    let ctx = Arc::new(ServerContext {
        cache,
        max_ids: opts.max_ids,
    });
    let active = Arc::new(AtomicUsize::new(0));
    let next_trace = AtomicU64::new(1);

    if let Some(addr) = local {
        tracing::info!(%addr, "catalog.serve listening");
    }

    while !shutdown.is_cancelled() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let in_flight = active.fetch_add(1, Ordering::Relaxed);
                if in_flight >= opts.max_connections {
                    active.fetch_sub(1, Ordering::Relaxed);
                    tracing::warn!(%peer, "catalog.serve connection limit reached, dropping");
                    continue;
                }
                // accepted sockets inherit non-blocking on some platforms
                stream.set_nonblocking(false).ok();
                let trace_id = format!("{:016x}", next_trace.fetch_add(1, Ordering::Relaxed));
                let ctx = Arc::clone(&ctx);
                let active = Arc::clone(&active);
                let read_timeout = opts.read_timeout;
                let cancel = shutdown.child_token();
                std::thread::spawn(move || {
                    handle_connection(stream, &ctx, &cancel, read_timeout, &trace_id);
                    active.fetch_sub(1, Ordering::Relaxed);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_SLEEP);
            }
            Err(e) => {
                tracing::warn!(error = %e, "catalog.serve accept error");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
    tracing::info!("catalog.serve stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
