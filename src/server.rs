//! HTTP request boundary
//!
//! Minimal HTTP/1.1 front end: one request per connection, JSON
//! bodies, permissive CORS. Routes:
//!
//! - `GET /` and `GET /static/*` serve the dashboard assets
//! - `GET /obu` waits for the next awareness message and reports it
//! - `GET /rsu` reports the configured DENM field, or `-1` when none is pending
//! - `POST /start_attack` runs a forged DENM burst to completion
//!
//! A handler is dropped as soon as its client disconnects, so an abandoned
//! `/obu` never consumes a message nobody will read.

use crate::attack_sim::orchestrator::AttackOrchestrator;
use crate::attack_sim::AttackVariant;
use crate::error::{AttackError, ServerError};
use crate::freshness::{MessageBuffers, ReadPolicy};
use crate::types::{flatten_fields, lookup_path};
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Sub-cause code reported when no DENM is pending
pub const NO_SUB_CAUSE: i64 = -1;
pub const VEHICLE_ID: &str = "OBU-001";
pub const VEHICLE_TYPE: &str = "auto";

const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADER_LINES: usize = 100;

/// Everything the handlers share
pub struct AppState {
    pub buffers: Arc<MessageBuffers>,
    pub orchestrator: Arc<AttackOrchestrator>,
    /// Dot path of the DENM field reported by `/rsu`
    pub sub_cause_path: String,
    pub read_policy: ReadPolicy,
    /// Dashboard asset directory, `None` disables `/` and `/static/*`
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str, body: &[u8]) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            body: body.to_vec(),
        }
    }

    /// Path without the query string
    fn route_path(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }
}

/// Raw file contents served from the asset directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Value>,
    pub file: Option<StaticFile>,
}

impl HttpResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            file: None,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: None,
            file: None,
        }
    }

    pub fn file(content_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            status: 200,
            body: None,
            file: Some(StaticFile {
                content_type,
                bytes,
            }),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (content_type, body) = match (&self.file, &self.body) {
            (Some(file), _) => (Some(file.content_type), file.bytes.clone()),
            (None, Some(json)) => (Some("application/json"), json.to_string().into_bytes()),
            (None, None) => (None, Vec::new()),
        };

        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        if let Some(content_type) = content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        head.push_str("Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n");
        head.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&body);
        bytes
    }
}

/// Dispatch a parsed request
pub async fn route(state: &AppState, req: &HttpRequest) -> HttpResponse {
    match (req.method.as_str(), req.route_path()) {
        ("GET", "/") => dashboard_asset(state, "index.html").await,
        ("GET", path) if path.starts_with("/static/") => {
            dashboard_asset(state, &path["/static/".len()..]).await
        }
        ("GET", "/obu") => obu(state).await,
        ("GET", "/rsu") => rsu(state),
        ("POST", "/start_attack") => start_attack(state, &req.body).await,
        ("OPTIONS", _) => HttpResponse::empty(204),
        (_, "/obu" | "/rsu" | "/start_attack") => {
            HttpResponse::json(405, json!({ "msg": "method not allowed" }))
        }
        _ => HttpResponse::json(404, json!({ "msg": "not found" })),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Resolve a request path inside the asset directory; `None` if it would escape it
fn asset_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

async fn dashboard_asset(state: &AppState, relative: &str) -> HttpResponse {
    let not_found = || HttpResponse::json(404, json!({ "msg": "not found" }));
    let Some(path) = state
        .static_dir
        .as_deref()
        .and_then(|root| asset_path(root, relative))
    else {
        return not_found();
    };

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return not_found(),
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => HttpResponse::file(content_type(&path), bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => not_found(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read dashboard asset");
            HttpResponse::json(500, json!({ "msg": "cannot read asset" }))
        }
    }
}

async fn obu(state: &AppState) -> HttpResponse {
    let Some(cam) = state.read_policy.read(&state.buffers.cam).await else {
        return HttpResponse::json(404, json!({ "msg": "not available data" }));
    };

    HttpResponse::json(
        200,
        json!({
            "msg": "ok",
            "vehicle_id": VEHICLE_ID,
            "lat": cam.lat_degrees(),
            "lon": cam.lon_degrees(),
            "vehicle_type": VEHICLE_TYPE,
            "speed": cam.speed_value,
            "heading": cam.heading_value,
        }),
    )
}

fn rsu(state: &AppState) -> HttpResponse {
    let sub_cause_code = state
        .buffers
        .denm
        .try_consume()
        .and_then(|denm| {
            let fields = flatten_fields(&denm);
            lookup_path(&fields, &state.sub_cause_path).cloned()
        })
        .unwrap_or_else(|| Value::from(NO_SUB_CAUSE));

    HttpResponse::json(200, json!({ "sub_cause_code": sub_cause_code }))
}

/// `attack_id` from the request body; absent means no attack
fn parse_attack_id(body: &[u8]) -> Result<i64, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    match value.get("attack_id") {
        None | Some(Value::Null) => Ok(AttackVariant::NoAttack.id()),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("attack_id {} out of range", n)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("attack_id `{}` is not an integer", s)),
        Some(other) => Err(format!("attack_id {} is not an integer", other)),
    }
}

async fn start_attack(state: &AppState, body: &[u8]) -> HttpResponse {
    let attack_id = match parse_attack_id(body) {
        Ok(id) => id,
        Err(reason) => return HttpResponse::json(400, json!({ "msg": reason })),
    };
    let variant = AttackVariant::from_id(attack_id);
    info!(attack_id, %variant, "attack requested");

    match state.orchestrator.run(variant).await {
        Ok(_) => HttpResponse::json(201, json!({ "msg": "ok" })),
        Err(AttackError::PositionUnavailable) => {
            HttpResponse::json(404, json!({ "msg": "not available data" }))
        }
        Err(e) => {
            warn!(%variant, error = %e, "attack failed");
            HttpResponse::json(500, json!({ "msg": e.to_string() }))
        }
    }
}

/// Read one request. `Ok(None)` if the peer closed before sending anything.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<HttpRequest>, ServerError> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_ascii_uppercase(), path.to_string()),
        _ => return Err(ServerError::BadRequest(format!("request line `{}`", line.trim()))),
    };

    let mut content_length = 0usize;
    let mut chunked = false;
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| {
                    ServerError::BadRequest(format!("content-length `{}`", value.trim()))
                })?;
            } else if name.trim().eq_ignore_ascii_case("transfer-encoding") {
                chunked = value.to_ascii_lowercase().contains("chunked");
            }
        }
    }

    let body = if chunked {
        read_chunked_body(reader).await?
    } else {
        if content_length > MAX_BODY_BYTES {
            return Err(ServerError::BadRequest(format!(
                "body of {} bytes exceeds limit",
                content_length
            )));
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        body
    };

    Ok(Some(HttpRequest { method, path, body }))
}

/// Decode a `Transfer-Encoding: chunked` body, trailers are discarded
async fn read_chunked_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ServerError> {
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ServerError::BadRequest("chunked body ended early".to_string()));
        }
        let size_field = line.trim().split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| ServerError::BadRequest(format!("chunk size `{}`", size_field)))?;
        if size == 0 {
            break;
        }
        if size > MAX_BODY_BYTES - body.len() {
            return Err(ServerError::BadRequest("chunked body exceeds limit".to_string()));
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        line.clear();
        reader.read_line(&mut line).await?;
        if !line.trim().is_empty() {
            return Err(ServerError::BadRequest("missing chunk terminator".to_string()));
        }
    }

    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim_end().is_empty() {
            break;
        }
    }
    Ok(body)
}

/// Resolves once the peer has closed the connection. Bytes sent after the
/// request are discarded.
async fn peer_closed<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut scratch = [0u8; 512];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

async fn handle_connection(socket: TcpStream, state: Arc<AppState>) -> Result<(), ServerError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let response = match read_request(&mut reader).await {
        Ok(Some(req)) => {
            let response = tokio::select! {
                response = route(&state, &req) => response,
                _ = peer_closed(&mut reader) => {
                    info!(method = %req.method, path = %req.path, "client gone, request abandoned");
                    return Ok(());
                }
            };
            info!(method = %req.method, path = %req.path, status = response.status, "request");
            response
        }
        Ok(None) => return Ok(()),
        Err(ServerError::BadRequest(reason)) => {
            debug!(%reason, "rejecting malformed request");
            HttpResponse::json(400, json!({ "msg": reason }))
        }
        Err(e) => return Err(e),
    };

    write_half.write_all(&response.to_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept connections forever, one task per connection
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "request boundary listening");
    }

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, state).await {
                debug!(%peer, error = %e, "connection error");
            }
        });
    }
}
