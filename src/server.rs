//! Request Dispatcher, Worker Pool & Listener
//!
//! `Dispatcher` holds the pure request-resolution logic (§4.7) and is
//! testable against in-memory readers/writers. `serve` wraps it in the
//! blocking thread-pool/listener model described in §5: a dedicated accept
//! loop hands connections to a fixed-size pool over a channel; each worker
//! thread owns one connection end to end.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::context::{Cookie, ResponseContext, Sink};
use crate::http::{
    self, default_mime_table, parse_query, split_path_and_query, HttpMethod, HttpVersion,
    RequestLine,
};
use crate::script::{interpreter::Interpreter, parser};
use crate::session::{extract_host, extract_sid_from_cookie_header, SessionRegistry};
use crate::workers::WorkerRegistry;

/// Accept timeout per §5: short enough that `stop()` is noticed promptly
/// without busy-polling the listener.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STATIC_CHUNK_SIZE: usize = 8192;

/// A protocol-level failure that short-circuits straight to a fixed error
/// response, bypassing `ResponseContext` entirely.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("bad request")]
    BadRequest,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("http version not supported")]
    VersionNotSupported,
}

impl DispatchError {
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            DispatchError::BadRequest => (400, "Bad Request"),
            DispatchError::MethodNotAllowed => (405, "Method Not Allowed"),
            DispatchError::Forbidden => (403, "Forbidden"),
            DispatchError::NotFound => (404, "Not Found"),
            DispatchError::VersionNotSupported => (505, "HTTP Version Not Supported"),
        }
    }
}

/// Read the request line and headers from a buffered reader, up through the
/// blank line that terminates the head. No body is ever read (§1 Non-goals).
pub fn read_request_head<R: BufRead>(reader: &mut R) -> Result<RequestLine, DispatchError> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|_| DispatchError::BadRequest)?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            break;
        }
        lines.push(trimmed);
    }
    if lines.is_empty() {
        return Err(DispatchError::BadRequest);
    }

    let parts: Vec<&str> = lines[0].split(' ').collect();
    if parts.len() != 3 {
        return Err(DispatchError::BadRequest);
    }
    let method = HttpMethod::parse(parts[0]);
    let raw_path = parts[1];

    if !matches!(method, HttpMethod::Get) {
        return Err(DispatchError::MethodNotAllowed);
    }

    let version = HttpVersion::parse(parts[2]).ok_or(DispatchError::VersionNotSupported)?;

    let (path, query) = split_path_and_query(raw_path).ok_or(DispatchError::BadRequest)?;

    let mut headers = HashMap::new();
    for line in &lines[1..] {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    Ok(RequestLine {
        method,
        path: path.to_string(),
        query: parse_query(query),
        version,
        headers,
    })
}

/// Join a request path onto a canonical root without ever escaping it —
/// `..` segments pop the accumulated stack but never go above the root.
fn safe_join(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut stack: Vec<&str> = Vec::new();
    for piece in request_path.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return None;
                }
            }
            other => stack.push(other),
        }
    }
    Some(stack.into_iter().fold(root.to_path_buf(), |acc, p| acc.join(p)))
}

pub struct Dispatcher {
    config: ServerConfig,
    canonical_root: PathBuf,
    mime_table: HashMap<String, String>,
    workers: WorkerRegistry,
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(
        config: ServerConfig,
        workers: WorkerRegistry,
        sessions: Arc<SessionRegistry>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.document_root).ok();
        let canonical_root = std::fs::canonicalize(&config.document_root)?;
        let mut mime_table: HashMap<String, String> = default_mime_table()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        mime_table.extend(config.mime_overrides.clone());
        Ok(Self {
            config,
            canonical_root,
            mime_table,
            workers,
            sessions,
        })
    }

    fn mime_for_extension(&self, ext: &str) -> String {
        self.mime_table
            .get(ext)
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// Run the full §4.7 resolution order for one already-parsed request,
    /// writing either a fixed error body directly to `sink` or a full
    /// response through a `ResponseContext`.
    pub fn dispatch(&self, req: RequestLine, mut sink: Sink) {
        match self.dispatch_inner(&req, &mut sink) {
            Ok(()) => {}
            Err(e) => {
                let (code, text) = e.status();
                warn!(path = %req.path, code, "dispatch error");
                let _ = sink.write_all(&http::render_error_response(code, text));
            }
        }
    }

    fn dispatch_inner(&self, req: &RequestLine, sink: &mut Sink) -> Result<(), DispatchError> {
        let cookie_header = req.headers.get("cookie").map(String::as_str);
        let host_header = req.headers.get("host").map(String::as_str).unwrap_or("");
        let presented_sid = cookie_header.and_then(extract_sid_from_cookie_header);
        let resolution = self.sessions.resolve(presented_sid.as_deref());
        let host = extract_host(host_header);

        let params: HashMap<String, Option<String>> = req.query.clone();

        if req.path == "/" {
            let mut ctx = ResponseContext::new(
                std::mem::replace(sink, Box::new(std::io::sink())),
                params,
                resolution.persistent.clone(),
            );
            if resolution.is_new {
                add_session_cookie(&mut ctx, &resolution.sid, &host, self.config.session_timeout_secs);
            }
            let _ = ctx.set_mime_type("text/html");
            let _ = ctx.write_str(
                "<html><head><meta http-equiv=\"refresh\" content=\"0; url=index.html\"></head></html>",
            );
            *sink = ctx.into_sink();
            return Ok(());
        }

        if let Some(identifier) = self.config.workers.get(&req.path).cloned() {
            return self.dispatch_worker(&identifier, params, &resolution, &host, sink);
        }

        if let Some(rest) = req.path.strip_prefix("/ext/") {
            return self.dispatch_worker(rest, params, &resolution, &host, sink);
        }

        let target = safe_join(&self.canonical_root, &req.path).ok_or(DispatchError::Forbidden)?;
        if !target.starts_with(&self.canonical_root) {
            return Err(DispatchError::Forbidden);
        }

        let metadata = std::fs::metadata(&target).map_err(|_| DispatchError::NotFound)?;
        if !metadata.is_file() {
            return Err(DispatchError::NotFound);
        }

        let is_script = target
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("smscr"))
            .unwrap_or(false);

        if is_script {
            self.dispatch_script(&target, params, &resolution, &host, sink)
        } else {
            self.dispatch_static_file(&target, metadata.len(), params, &resolution, &host, sink)
        }
    }

    fn dispatch_worker(
        &self,
        identifier: &str,
        params: HashMap<String, Option<String>>,
        resolution: &crate::session::SessionResolution,
        host: &str,
        sink: &mut Sink,
    ) -> Result<(), DispatchError> {
        let worker = self.workers.get(identifier).ok_or(DispatchError::NotFound)?;
        let mut ctx = ResponseContext::new(
            std::mem::replace(sink, Box::new(std::io::sink())),
            params,
            resolution.persistent.clone(),
        );
        if resolution.is_new {
            add_session_cookie(&mut ctx, &resolution.sid, host, self.config.session_timeout_secs);
        }
        if worker.process(&mut ctx).is_err() {
            error!(identifier, "worker failed mid-response");
        }
        *sink = ctx.into_sink();
        Ok(())
    }

    fn dispatch_script(
        &self,
        path: &Path,
        params: HashMap<String, Option<String>>,
        resolution: &crate::session::SessionResolution,
        host: &str,
        sink: &mut Sink,
    ) -> Result<(), DispatchError> {
        let source = std::fs::read_to_string(path).map_err(|_| DispatchError::NotFound)?;
        let tree = match parser::parse(&source) {
            Ok(t) => t,
            Err(e) => {
                // A malformed script aborts the request outright, distinct
                // from the dispatcher's protocol-level 4xx/5xx short-circuit
                // (reserved for request-line/method/version/path failures)
                // and from a runtime interpreter failure, which still emits
                // whatever partial output it managed. No response is
                // fabricated here; the connection is simply closed.
                error!(?e, path = %path.display(), "script parse error, aborting request");
                return Ok(());
            }
        };
        let mut ctx = ResponseContext::new(
            std::mem::replace(sink, Box::new(std::io::sink())),
            params,
            resolution.persistent.clone(),
        );
        if resolution.is_new {
            add_session_cookie(&mut ctx, &resolution.sid, host, self.config.session_timeout_secs);
        }
        let mut interp = Interpreter::new();
        if let Err(e) = interp.run(&tree, &mut ctx) {
            error!(?e, "script interpretation error");
        }
        *sink = ctx.into_sink();
        Ok(())
    }

    fn dispatch_static_file(
        &self,
        path: &Path,
        len: u64,
        params: HashMap<String, Option<String>>,
        resolution: &crate::session::SessionResolution,
        host: &str,
        sink: &mut Sink,
    ) -> Result<(), DispatchError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mime = self.mime_for_extension(ext);
        let mut file = std::fs::File::open(path).map_err(|_| DispatchError::NotFound)?;

        let mut ctx = ResponseContext::new(
            std::mem::replace(sink, Box::new(std::io::sink())),
            params,
            resolution.persistent.clone(),
        );
        if resolution.is_new {
            add_session_cookie(&mut ctx, &resolution.sid, host, self.config.session_timeout_secs);
        }
        let _ = ctx.set_mime_type(mime);
        let _ = ctx.set_content_length(len);

        let mut buf = [0u8; STATIC_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).map_err(|_| DispatchError::NotFound)?;
            if n == 0 {
                break;
            }
            let _ = ctx.write_bytes(&buf[..n]);
        }
        *sink = ctx.into_sink();
        Ok(())
    }
}

fn add_session_cookie<W: Write>(
    ctx: &mut ResponseContext<W>,
    sid: &str,
    host: &str,
    timeout_secs: u64,
) {
    let mut cookie = Cookie::new("sid", sid);
    cookie.domain = Some(host.to_string());
    cookie.path = Some("/".to_string());
    cookie.max_age = Some(timeout_secs as i64);
    cookie.http_only = true;
    let _ = ctx.add_cookie(cookie);
}

/// Accept loop + fixed-size worker pool. Blocks the calling thread until
/// `shutdown` is observed.
pub fn serve(
    dispatcher: Arc<Dispatcher>,
    bind_addr: &str,
    worker_threads: usize,
    session_timeout_secs: u64,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    info!(addr = bind_addr, worker_threads, "listening");

    let (tx, rx) = bounded::<TcpStream>(worker_threads * 4);

    let mut handles = Vec::new();
    for id in 0..worker_threads {
        let rx = rx.clone();
        let dispatcher = dispatcher.clone();
        handles.push(std::thread::spawn(move || {
            loop {
                match rx.recv_timeout(ACCEPT_POLL_INTERVAL) {
                    Ok(stream) => handle_connection(&dispatcher, stream, session_timeout_secs),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!(worker = id, "pool worker exiting");
        }));
    }

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!(?e, "accept failed");
            }
        }
    }

    drop(tx);
    for h in handles {
        let _ = h.join();
    }
    info!("listener stopped");
    Ok(())
}

fn handle_connection(dispatcher: &Dispatcher, stream: TcpStream, session_timeout_secs: u64) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(session_timeout_secs * 1000)));
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(?e, "failed to clone connection for writing");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    match read_request_head(&mut reader) {
        Ok(req) => dispatcher.dispatch(req, Box::new(write_half)),
        Err(e) => {
            let (code, text) = e.status();
            let _ = (write_half).write_all(&http::render_error_response(code, text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use crate::workers::WorkerRegistry;
    use std::io::Cursor;

    fn dispatcher(doc_root: &Path) -> Dispatcher {
        let mut config = ServerConfig::default();
        config.document_root = doc_root.to_path_buf();
        Dispatcher::new(config, WorkerRegistry::with_demo_workers(), Arc::new(SessionRegistry::new(1800)))
            .unwrap()
    }

    fn parse_head(raw: &str) -> RequestLine {
        let mut reader = BufReader::new(Cursor::new(raw.as_bytes()));
        read_request_head(&mut reader).unwrap()
    }

    #[test]
    fn root_path_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        let out = sink.text();
        assert!(out.contains("HTTP/1.1 200"));
        assert!(out.contains("index.html"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /nope.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn path_escape_is_403() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /../../etc/passwd HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().starts_with("HTTP/1.1 403"));
    }

    #[test]
    fn static_file_is_served_with_content_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hi.txt"), b"hello world").unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /hi.txt HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        let out = sink.text();
        assert!(out.contains("Content-Length: 11"));
        assert!(out.ends_with("hello world"));
    }

    #[test]
    fn smscr_file_is_interpreted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.smscr"), "{$= 1 1 + $}").unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /page.smscr HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().ends_with("2"));
    }

    #[test]
    fn malformed_script_aborts_without_fabricating_a_response() {
        let dir = tempfile::tempdir().unwrap();
        // Unclosed FOR: a parse failure, not a missing file.
        std::fs::write(dir.path().join("broken.smscr"), "{$ FOR i 1 10 $}").unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /broken.smscr HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn post_method_is_405() {
        let mut reader = BufReader::new(Cursor::new(b"POST / HTTP/1.1\r\n\r\n" as &[u8]));
        assert!(matches!(
            read_request_head(&mut reader),
            Err(DispatchError::MethodNotAllowed)
        ));
    }

    #[test]
    fn bad_version_is_505() {
        let mut reader = BufReader::new(Cursor::new(b"GET / HTTP/2\r\n\r\n" as &[u8]));
        assert!(matches!(
            read_request_head(&mut reader),
            Err(DispatchError::VersionNotSupported)
        ));
    }

    #[test]
    fn registered_worker_path_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.document_root = dir.path().to_path_buf();
        config.workers.insert("/hello".to_string(), "echo".to_string());
        let d = Dispatcher::new(config, WorkerRegistry::with_demo_workers(), Arc::new(SessionRegistry::new(1800))).unwrap();
        let req = parse_head("GET /hello?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().contains("x=1"));
    }

    #[test]
    fn ext_prefix_resolves_dynamic_worker() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /ext/echo HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().starts_with("HTTP/1.1 200"));
    }

    #[test]
    fn new_session_sets_cookie() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hi.txt"), b"x").unwrap();
        let d = dispatcher(dir.path());
        let req = parse_head("GET /hi.txt HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let sink = RecordingSink::new();
        d.dispatch(req, Box::new(sink.clone()));
        assert!(sink.text().contains("Set-Cookie: sid="));
    }
}
