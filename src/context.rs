//! Response Context
//!
//! Buffers a response's header-affecting state (status, MIME type, encoding,
//! cookies) until the first byte is written, at which point headers are
//! emitted once and the context locks against further mutation.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::ServerError;

/// An outgoing `Set-Cookie` entry.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            max_age: None,
            http_only: false,
        }
    }

    fn render(&self) -> String {
        let mut s = format!("{}={}", self.name, self.value);
        if let Some(d) = &self.domain {
            s.push_str(&format!("; Domain={}", d));
        }
        if let Some(p) = &self.path {
            s.push_str(&format!("; Path={}", p));
        }
        if let Some(m) = self.max_age {
            s.push_str(&format!("; Max-Age={}", m));
        }
        if self.http_only {
            s.push_str("; HttpOnly");
        }
        s
    }
}

/// The persistent (session-scoped) parameter store is a concurrent map
/// shared between the request-in-flight and any other worker touching the
/// same session, so it is not behind the context's own lock.
pub type PersistentParams = Arc<DashMap<String, String>>;

/// The byte sink a live `ResponseContext` writes through: a `TcpStream` in
/// production, boxed so the dispatcher and the `Worker` contract don't need
/// to be generic over the concrete connection type.
pub type Sink = Box<dyn Write + Send>;

/// Per-request response state and output sink. `W` is the underlying byte
/// sink — a `TcpStream` in production, a `Vec<u8>` in tests.
pub struct ResponseContext<W: Write> {
    sink: W,
    encoding: String,
    status_code: u16,
    status_text: String,
    mime_type: String,
    content_length: Option<u64>,
    cookies: Vec<Cookie>,
    header_generated: bool,

    params: HashMap<String, Option<String>>,
    persistent: PersistentParams,
    temporary: HashMap<String, String>,
}

impl<W: Write> ResponseContext<W> {
    pub fn new(sink: W, params: HashMap<String, Option<String>>, persistent: PersistentParams) -> Self {
        Self {
            sink,
            encoding: "UTF-8".to_string(),
            status_code: 200,
            status_text: "OK".to_string(),
            mime_type: "text/html".to_string(),
            content_length: None,
            cookies: Vec::new(),
            header_generated: false,
            params,
            persistent,
            temporary: HashMap::new(),
        }
    }

    fn check_unlocked(&self) -> Result<(), ServerError> {
        if self.header_generated {
            Err(ServerError::ContextLocked)
        } else {
            Ok(())
        }
    }

    pub fn set_encoding(&mut self, encoding: impl Into<String>) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.encoding = encoding.into();
        Ok(())
    }

    pub fn set_status_code(&mut self, code: u16) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.status_code = code;
        Ok(())
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.status_text = text.into();
        Ok(())
    }

    pub fn set_mime_type(&mut self, mime: impl Into<String>) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.mime_type = mime.into();
        Ok(())
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn set_content_length(&mut self, len: u64) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.content_length = Some(len);
        Ok(())
    }

    pub fn add_cookie(&mut self, cookie: Cookie) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.cookies.push(cookie);
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_deref())
    }

    pub fn get_parameter_names(&self) -> Vec<&str> {
        self.params.keys().map(String::as_str).collect()
    }

    pub fn get_persistent_parameter(&self, name: &str, default: &str) -> String {
        self.persistent
            .get(name)
            .map(|v| v.clone())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set_persistent_parameter(&mut self, name: &str, value: &str) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.persistent.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_persistent_parameter(&mut self, name: &str) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.persistent.remove(name);
        Ok(())
    }

    pub fn get_temporary_parameter(&self, name: &str, default: &str) -> String {
        self.temporary
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set_temporary_parameter(&mut self, name: &str, value: &str) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.temporary.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_temporary_parameter(&mut self, name: &str) -> Result<(), ServerError> {
        self.check_unlocked()?;
        self.temporary.remove(name);
        Ok(())
    }

    fn emit_header_if_needed(&mut self) -> Result<(), ServerError> {
        if self.header_generated {
            return Ok(());
        }
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);
        if self.mime_type.starts_with("text/") {
            head.push_str(&format!(
                "Content-Type: {}; charset={}\r\n",
                self.mime_type, self.encoding
            ));
        } else {
            head.push_str(&format!("Content-Type: {}\r\n", self.mime_type));
        }
        if let Some(len) = self.content_length {
            head.push_str(&format!("Content-Length: {}\r\n", len));
        }
        for cookie in &self.cookies {
            head.push_str(&format!("Set-Cookie: {}\r\n", cookie.render()));
        }
        head.push_str("\r\n");
        self.sink.write_all(head.as_bytes())?;
        self.header_generated = true;
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), ServerError> {
        self.emit_header_if_needed()?;
        self.sink.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ServerError> {
        self.emit_header_if_needed()?;
        self.sink.write_all(bytes)?;
        Ok(())
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}
