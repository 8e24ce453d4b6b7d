//! HTTP request surface.
//!
//! A single-threaded HTTP/1.1 listener mapping routes onto processor
//! lifecycle calls:
//!
//! - `POST /scan-shelf?shelf_id&use_simulation&save&publish`
//! - `POST /start-realtime/{shelf_id}?interval&save&publish`
//! - `POST /stop-realtime/{shelf_id}`
//! - `GET /realtime-status`
//! - `GET /latest-scan/{shelf_id}`
//! - `GET /health`
//!
//! Requests are served one at a time; a single-shot scan holds the listener
//! for its duration.

mod registry;

pub use registry::{ProcessorRegistry, RegistryError};

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::scan::{
    scan_interval, simulate_scan, ProcessorParts, ProcessorStatus, ScanOrchestrator,
    ScanSettings, MAX_SCAN_INTERVAL,
};
use crate::sink::ResultSinks;

const MAX_REQUEST_BYTES: usize = 8192;

/// What a caller asked a processor to be built with.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorRequest {
    pub shelf_id: String,
    pub interval: Duration,
    pub save: bool,
    pub publish: bool,
    /// Continuous processors render overlays; single-shot scans do not.
    pub visualize: bool,
}

/// Builds the collaborators for one processor.
pub type PartsFactory = dyn Fn(&ProcessorRequest) -> Result<ProcessorParts> + Send + Sync;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub default_shelf_id: String,
    /// Template for new processors; `interval` is the default interval.
    pub scan_settings: ScanSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            default_shelf_id: "shelf_A1".to_string(),
            scan_settings: ScanSettings::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
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
    registry: Arc<ProcessorRegistry>,
    factory: Arc<PartsFactory>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, registry: Arc<ProcessorRegistry>, factory: Arc<PartsFactory>) -> Self {
        Self {
            cfg,
            registry,
            factory,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &self, &shutdown_thread) {
                    log::error!("api stopped: {}", err);
                }
            })?;
        log::info!("api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }

    fn route(&self, request: &HttpRequest) -> Response {
        let segments: Vec<&str> = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["health"]) => self.health(),
            ("GET", ["realtime-status"]) => self.realtime_status(),
            ("GET", ["latest-scan", shelf_id]) => self.latest_scan(shelf_id),
            ("POST", ["scan-shelf"]) => self.scan_shelf(request),
            ("POST", ["start-realtime", shelf_id]) => self.start_realtime(shelf_id, request),
            ("POST", ["stop-realtime", shelf_id]) => self.stop_realtime(shelf_id),
            (_, ["health"])
            | (_, ["realtime-status"])
            | (_, ["latest-scan", _])
            | (_, ["scan-shelf"])
            | (_, ["start-realtime", _])
            | (_, ["stop-realtime", _]) => Response::error(405, "method_not_allowed"),
            _ => Response::error(404, "not_found"),
        }
    }

    fn health(&self) -> Response {
        Response::json(
            200,
            json!({
                "status": "ok",
                "active_processors": self.registry.len(),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    fn realtime_status(&self) -> Response {
        let processors: BTreeMap<String, RealtimeEntry> = self
            .registry
            .status()
            .into_iter()
            .map(|(shelf_id, status)| (shelf_id, RealtimeEntry::from(status)))
            .collect();
        let count = processors.len();
        Response::json(200, json!({ "processors": processors, "count": count }))
    }

    fn latest_scan(&self, shelf_id: &str) -> Response {
        let Some(processor) = self.registry.get(shelf_id) else {
            return Response::detail(404, format!("no processor for {}", shelf_id));
        };
        match processor.last_report() {
            Some(report) => Response::json(200, json!(report.to_record())),
            None => Response::detail(404, format!("no scan available for {}", shelf_id)),
        }
    }

    fn scan_shelf(&self, request: &HttpRequest) -> Response {
        let params = match ScanParams::from_query(&request.query, &self.cfg.default_shelf_id) {
            Ok(params) => params,
            Err(e) => return Response::detail(400, e.to_string()),
        };
        let processor_request = ProcessorRequest {
            shelf_id: params.shelf_id.clone(),
            interval: self.cfg.scan_settings.interval,
            save: params.save,
            publish: params.publish,
            visualize: false,
        };
        let parts = match (self.factory)(&processor_request) {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("{}: cannot build scan pipeline: {:#}", params.shelf_id, e);
                return Response::detail(500, format!("scan setup failed: {:#}", e));
            }
        };

        let report = if params.use_simulation {
            let report = simulate_scan(&params.shelf_id, &mut rand::thread_rng());
            ResultSinks::new(parts.sinks).deliver(&report);
            report
        } else {
            let processor =
                match ScanOrchestrator::new(&params.shelf_id, parts, self.cfg.scan_settings) {
                    Ok(processor) => processor,
                    Err(e) => {
                        log::error!("{}: cannot open scan pipeline: {}", params.shelf_id, e);
                        return Response::detail(500, format!("scan setup failed: {}", e));
                    }
                };
            let scanned = processor.perform_scan(&params.shelf_id);
            if let Ok(report) = &scanned {
                processor.deliver(report);
            }
            processor.close();
            match scanned {
                Ok(report) => report,
                Err(e) => {
                    log::error!("{}: single scan failed: {}", params.shelf_id, e);
                    return Response::detail(500, format!("scan failed: {}", e));
                }
            }
        };
        Response::json(200, json!(report.to_record()))
    }

    fn start_realtime(&self, shelf_id: &str, request: &HttpRequest) -> Response {
        let params = match RealtimeParams::from_query(
            &request.query,
            self.cfg.scan_settings.interval,
        ) {
            Ok(params) => params,
            Err(e) => return Response::detail(400, e.to_string()),
        };

        if !self.registry.release_stopped(shelf_id) {
            return Response::json(
                200,
                json!({
                    "status": "already_running",
                    "message": format!("continuous processing already active for {}", shelf_id),
                }),
            );
        }

        let processor_request = ProcessorRequest {
            shelf_id: shelf_id.to_string(),
            interval: params.interval,
            save: params.save,
            publish: params.publish,
            visualize: true,
        };
        let started = (self.factory)(&processor_request).and_then(|parts| {
            let settings = ScanSettings {
                interval: params.interval,
                ..self.cfg.scan_settings
            };
            let processor = ScanOrchestrator::new(shelf_id, parts, settings)?;
            processor.start()?;
            self.registry.insert(processor)?;
            Ok(())
        });
        match started {
            Ok(()) => Response::json(
                200,
                json!({
                    "status": "started",
                    "message": format!(
                        "continuous processing started for {} every {} s",
                        shelf_id,
                        params.interval.as_secs_f64()
                    ),
                    "saving": params.save,
                    "publishing": params.publish,
                }),
            ),
            Err(e) => {
                log::error!("{}: failed to start continuous processing: {:#}", shelf_id, e);
                Response::detail(500, format!("failed to start processing: {:#}", e))
            }
        }
    }

    fn stop_realtime(&self, shelf_id: &str) -> Response {
        let Some(processor) = self.registry.get(shelf_id) else {
            return Response::json(
                200,
                json!({
                    "status": "not_found",
                    "message": format!("no active processing for {}", shelf_id),
                }),
            );
        };
        if !self.registry.is_running(shelf_id) {
            return Response::json(
                200,
                json!({
                    "status": "not_running",
                    "message": format!("processing for {} is already stopped", shelf_id),
                }),
            );
        }
        processor.stop();
        Response::json(
            200,
            json!({
                "status": "stopped",
                "message": format!("continuous processing stopped for {}", shelf_id),
            }),
        )
    }
}

#[derive(Serialize)]
struct RealtimeEntry {
    running: bool,
    last_update: Option<String>,
    #[serde(flatten)]
    status: ProcessorStatus,
}

impl From<ProcessorStatus> for RealtimeEntry {
    fn from(status: ProcessorStatus) -> Self {
        Self {
            running: status.state == crate::scan::ProcessorState::Running,
            last_update: status.last_scan.as_ref().map(|r| r.timestamp.clone()),
            status,
        }
    }
}

#[derive(Debug, PartialEq)]
struct ScanParams {
    shelf_id: String,
    use_simulation: bool,
    save: bool,
    publish: bool,
}

impl ScanParams {
    fn from_query(query: &HashMap<String, String>, default_shelf_id: &str) -> Result<Self> {
        let shelf_id = match query.get("shelf_id") {
            Some(id) if id.trim().is_empty() => return Err(anyhow!("shelf_id must not be empty")),
            Some(id) => id.trim().to_string(),
            None => default_shelf_id.to_string(),
        };
        Ok(Self {
            shelf_id,
            use_simulation: query_bool(query, "use_simulation", false)?,
            save: query_bool(query, "save", true)?,
            publish: query_bool(query, "publish", false)?,
        })
    }
}

#[derive(Debug, PartialEq)]
struct RealtimeParams {
    interval: Duration,
    save: bool,
    publish: bool,
}

impl RealtimeParams {
    fn from_query(query: &HashMap<String, String>, default_interval: Duration) -> Result<Self> {
        let interval = match query.get("interval") {
            Some(raw) => {
                let secs: f64 = raw
                    .parse()
                    .map_err(|_| anyhow!("interval must be a number of seconds"))?;
                scan_interval(secs).ok_or_else(|| {
                    anyhow!(
                        "interval must be greater than zero and at most {} s",
                        MAX_SCAN_INTERVAL.as_secs()
                    )
                })?
            }
            None => default_interval,
        };
        Ok(Self {
            interval,
            save: query_bool(query, "save", true)?,
            publish: query_bool(query, "publish", true)?,
        })
    }
}

fn query_bool(query: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match query.get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{} must be a boolean", key)),
        },
    }
}

fn run_api(listener: TcpListener, server: &ApiServer, shutdown: &AtomicBool) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server) {
                    log::warn!("api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            Response::error(400, "bad_request").write_to(&mut stream)?;
            return Err(err);
        }
    };
    log::debug!("api: {} {}", request.method, request.path);
    server.route(&request).write_to(&mut stream)
}

struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string().into_bytes(),
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self::json(status, json!({ "error": code }))
    }

    fn detail(status: u16, detail: String) -> Self {
        Self::json(status, json!({ "detail": detail }))
    }

    fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        write_response(stream, self.status, "application/json", &self.body)
    }
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
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: percent_decode(path),
        query,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
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
    query: HashMap<String, String>,
}
