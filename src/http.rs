//! HTTP wire types
//!
//! Minimal request-line parsing, the built-in MIME table, and the fixed
//! short HTML bodies used for 4xx/5xx error responses. No keep-alive, no
//! chunked transfer, no bodies — `GET` only, per the Non-goals.

use std::collections::HashMap;

/// An HTTP method as read off the request line. Only `Get` is ever dispatched
/// successfully; anything else is rejected with 405.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Other(String),
}

impl HttpMethod {
    pub fn parse(s: &str) -> Self {
        if s == "GET" {
            HttpMethod::Get
        } else {
            HttpMethod::Other(s.to_string())
        }
    }
}

/// The request's declared HTTP version. Only 1.0 and 1.1 are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }
}

/// The parsed request line plus headers, prior to session resolution.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, Option<String>>,
    pub version: HttpVersion,
    pub headers: HashMap<String, String>,
}

/// Split `path?query` into the two parts. Fails if more than one `?` is
/// present.
pub fn split_path_and_query(raw: &str) -> Option<(&str, &str)> {
    let mut parts = raw.splitn(3, '?');
    let path = parts.next().unwrap_or("");
    let query = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return None;
    }
    Some((path, query))
}

/// Parse a `k=v(&k=v)*` query string. A key with no `=` maps to `None`.
/// Duplicate keys keep the last occurrence.
pub fn parse_query(query: &str) -> HashMap<String, Option<String>> {
    let mut out = HashMap::new();
    if query.is_empty() {
        return out;
    }
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => {
                out.insert(k.to_string(), Some(v.to_string()));
            }
            None => {
                out.insert(pair.to_string(), None);
            }
        }
    }
    out
}

/// Built-in extension → MIME type table, consulted before a server-supplied
/// `server.mimeConfig` override and before the `application/octet-stream`
/// fallback.
pub fn default_mime_table() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("html", "text/html"),
        ("htm", "text/html"),
        ("css", "text/css"),
        ("js", "text/javascript"),
        ("json", "application/json"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("txt", "text/plain"),
        ("ico", "image/x-icon"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
    ])
}

/// Render a self-contained 4xx/5xx HTML body, emitted directly to the socket
/// rather than through a `ResponseContext`.
pub fn error_html_body(code: u16, text: &str) -> String {
    format!(
        "<html><head><title>{code} {text}</title></head><body><h1>{code} {text}</h1></body></html>"
    )
}

/// Render a full raw HTTP response for an error condition — status line,
/// headers, and body — with no `ResponseContext` involved.
pub fn render_error_response(code: u16, text: &str) -> Vec<u8> {
    let body = error_html_body(code, text);
    let head = format!(
        "HTTP/1.1 {code} {text}\r\nContent-Type: text/html; charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut out = head.into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}
