//! Configuration glue
//!
//! Only the set of recognized configuration keys and their effects is in
//! scope — not a file format. `ServerConfig::from_keys` is the contract;
//! `ServerConfig::from_toml_file` is one convenience loader built on top of
//! it for the demo binary.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Recognized configuration keys, per §6. A key that is absent keeps its
/// built-in default.
pub const KEY_ADDRESS: &str = "server.address";
pub const KEY_PORT: &str = "server.port";
pub const KEY_WORKER_THREADS: &str = "server.workerThreads";
pub const KEY_SESSION_TIMEOUT: &str = "session.timeout";
pub const KEY_DOCUMENT_ROOT: &str = "server.documentRoot";
pub const KEY_MIME_CONFIG: &str = "server.mimeConfig";
pub const KEY_WORKERS: &str = "server.workers";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub worker_threads: usize,
    pub session_timeout_secs: u64,
    pub document_root: PathBuf,
    /// Extension → MIME type overrides, layered on top of the built-in table.
    pub mime_overrides: HashMap<String, String>,
    /// URL path → worker identifier.
    pub workers: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            worker_threads: 8,
            session_timeout_secs: 1800,
            document_root: PathBuf::from("./public"),
            mime_overrides: HashMap::new(),
            workers: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Build a config from the recognized key set, falling back to defaults
    /// for anything absent. `mime_config` and `workers_config`, when
    /// present, are the already-loaded `ext=type` / `path=identifier` maps
    /// (loading the referenced files is the caller's concern — see
    /// `load_mapping_file`). `server.mimeConfig` / `server.workers`, when
    /// present in `keys`, are themselves taken as paths to `ext=type` /
    /// `path=identifier` mapping files and loaded the same way; entries in
    /// the explicit `mime_config` / `workers_config` arguments take
    /// precedence over (are layered on top of) whatever those files loaded,
    /// mirroring the CLI-wins-over-file precedence the demo binary uses.
    pub fn from_keys(
        keys: &HashMap<String, String>,
        mime_config: HashMap<String, String>,
        workers_config: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = ServerConfig::default();
        if let Some(v) = keys.get(KEY_ADDRESS) {
            cfg.address = v.clone();
        }
        if let Some(v) = keys.get(KEY_PORT) {
            cfg.port = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: KEY_PORT.to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = keys.get(KEY_WORKER_THREADS) {
            cfg.worker_threads = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: KEY_WORKER_THREADS.to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = keys.get(KEY_SESSION_TIMEOUT) {
            cfg.session_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: KEY_SESSION_TIMEOUT.to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = keys.get(KEY_DOCUMENT_ROOT) {
            cfg.document_root = PathBuf::from(v);
        }

        let mut mime_overrides = match keys.get(KEY_MIME_CONFIG) {
            Some(path) => load_mapping_file(std::path::Path::new(path))?,
            None => HashMap::new(),
        };
        mime_overrides.extend(mime_config);

        let mut workers = match keys.get(KEY_WORKERS) {
            Some(path) => load_mapping_file(std::path::Path::new(path))?,
            None => HashMap::new(),
        };
        workers.extend(workers_config);

        cfg.mime_overrides = mime_overrides;
        cfg.workers = workers;
        Ok(cfg)
    }

    /// Load the demo TOML config format (ambient, not part of the keyset
    /// contract) and merge in any `[mime]` / `[workers]` tables it carries.
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawTomlConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut keys = HashMap::new();
        if let Some(v) = raw.server.as_ref().and_then(|s| s.address.clone()) {
            keys.insert(KEY_ADDRESS.to_string(), v);
        }
        if let Some(v) = raw.server.as_ref().and_then(|s| s.port) {
            keys.insert(KEY_PORT.to_string(), v.to_string());
        }
        if let Some(v) = raw.server.as_ref().and_then(|s| s.worker_threads) {
            keys.insert(KEY_WORKER_THREADS.to_string(), v.to_string());
        }
        if let Some(v) = raw.server.as_ref().and_then(|s| s.document_root.clone()) {
            keys.insert(KEY_DOCUMENT_ROOT.to_string(), v);
        }
        if let Some(v) = raw.session.as_ref().and_then(|s| s.timeout) {
            keys.insert(KEY_SESSION_TIMEOUT.to_string(), v.to_string());
        }

        Self::from_keys(
            &keys,
            raw.mime.unwrap_or_default(),
            raw.workers.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawTomlConfig {
    server: Option<RawServerSection>,
    session: Option<RawSessionSection>,
    mime: Option<HashMap<String, String>>,
    workers: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawServerSection {
    address: Option<String>,
    port: Option<u16>,
    #[serde(rename = "workerThreads")]
    worker_threads: Option<usize>,
    #[serde(rename = "documentRoot")]
    document_root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSessionSection {
    timeout: Option<u64>,
}

/// Parse a simple `key=value` mapping file — used for both
/// `server.mimeConfig` (`ext=type`) and `server.workers` (`path=identifier`).
/// Blank lines and lines starting with `#` are ignored.
pub fn load_mapping_file(path: &std::path::Path) -> Result<HashMap<String, String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_keys_absent() {
        let cfg = ServerConfig::from_keys(&HashMap::new(), HashMap::new(), HashMap::new()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.worker_threads, 8);
        assert_eq!(cfg.session_timeout_secs, 1800);
    }

    #[test]
    fn overrides_from_keys() {
        let mut keys = HashMap::new();
        keys.insert(KEY_PORT.to_string(), "9090".to_string());
        keys.insert(KEY_WORKER_THREADS.to_string(), "4".to_string());
        let cfg = ServerConfig::from_keys(&keys, HashMap::new(), HashMap::new()).unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.worker_threads, 4);
    }

    #[test]
    fn bad_port_value_fails() {
        let mut keys = HashMap::new();
        keys.insert(KEY_PORT.to_string(), "not-a-port".to_string());
        assert!(ServerConfig::from_keys(&keys, HashMap::new(), HashMap::new()).is_err());
    }

    #[test]
    fn mapping_file_parses_key_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mime.conf");
        std::fs::write(&path, "# comment\nsvg=image/svg+xml\n\nwebp=image/webp\n").unwrap();
        let map = load_mapping_file(&path).unwrap();
        assert_eq!(map.get("svg").unwrap(), "image/svg+xml");
        assert_eq!(map.get("webp").unwrap(), "image/webp");
    }

    #[test]
    fn mime_config_and_workers_keys_load_referenced_files() {
        let dir = tempfile::tempdir().unwrap();
        let mime_path = dir.path().join("mime.conf");
        std::fs::write(&mime_path, "svg=image/svg+xml\n").unwrap();
        let workers_path = dir.path().join("workers.conf");
        std::fs::write(&workers_path, "/api=apiWorker\n").unwrap();

        let mut keys = HashMap::new();
        keys.insert(KEY_MIME_CONFIG.to_string(), mime_path.display().to_string());
        keys.insert(KEY_WORKERS.to_string(), workers_path.display().to_string());

        let cfg = ServerConfig::from_keys(&keys, HashMap::new(), HashMap::new()).unwrap();
        assert_eq!(cfg.mime_overrides.get("svg").unwrap(), "image/svg+xml");
        assert_eq!(cfg.workers.get("/api").unwrap(), "apiWorker");
    }

    #[test]
    fn explicit_mime_config_arg_overrides_keyed_file() {
        let dir = tempfile::tempdir().unwrap();
        let mime_path = dir.path().join("mime.conf");
        std::fs::write(&mime_path, "svg=image/svg+xml\n").unwrap();

        let mut keys = HashMap::new();
        keys.insert(KEY_MIME_CONFIG.to_string(), mime_path.display().to_string());

        let mut explicit = HashMap::new();
        explicit.insert("svg".to_string(), "image/svg+custom".to_string());

        let cfg = ServerConfig::from_keys(&keys, explicit, HashMap::new()).unwrap();
        assert_eq!(cfg.mime_overrides.get("svg").unwrap(), "image/svg+custom");
    }
}
