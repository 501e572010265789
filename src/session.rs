//! Session Registry
//!
//! Mints 20-character uppercase SIDs, tracks per-session expiry, and
//! periodically sweeps expired entries. SID mint/refresh is serialized by a
//! single mutex; each session's persistent parameter map is a `DashMap`, safe
//! for concurrent access from the request-in-flight without holding that
//! mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::Rng;
use tracing::{info, warn};

use crate::context::PersistentParams;

const SID_LEN: usize = 20;
const SID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A single session's bookkeeping: its deadline and persistent store.
struct SessionEntry {
    deadline_ms: u128,
    persistent: PersistentParams,
}

/// The process-wide session table.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    timeout_secs: u64,
}

/// Outcome of resolving a request's session: the SID to use and, if a fresh
/// one was minted, the cookie attributes the dispatcher must set.
pub struct SessionResolution {
    pub sid: String,
    pub persistent: PersistentParams,
    pub is_new: bool,
}

impl SessionRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout_secs,
        }
    }

    fn mint_sid() -> String {
        let mut rng = rand::thread_rng();
        (0..SID_LEN)
            .map(|_| SID_ALPHABET[rng.gen_range(0..SID_ALPHABET.len())] as char)
            .collect()
    }

    fn now_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    /// Look up (or mint, or refresh) the session for an incoming SID. The
    /// whole lookup/create/refresh step is one critical section so a racing
    /// concurrent request with the same missing/stale SID can't mint twice.
    pub fn resolve(&self, presented_sid: Option<&str>) -> SessionResolution {
        let now = Self::now_ms();
        let mut sessions = self.sessions.lock().unwrap();

        if let Some(sid) = presented_sid {
            if let Some(entry) = sessions.get_mut(sid) {
                if entry.deadline_ms > now {
                    entry.deadline_ms = now + (self.timeout_secs as u128) * 1000;
                    return SessionResolution {
                        sid: sid.to_string(),
                        persistent: entry.persistent.clone(),
                        is_new: false,
                    };
                }
                info!(sid = %sid, "session expired, minting replacement");
                sessions.remove(sid);
            }
        }

        let mut new_sid = Self::mint_sid();
        while sessions.contains_key(&new_sid) {
            new_sid = Self::mint_sid();
        }
        let persistent: PersistentParams = Arc::new(DashMap::new());
        sessions.insert(
            new_sid.clone(),
            SessionEntry {
                deadline_ms: now + (self.timeout_secs as u128) * 1000,
                persistent: persistent.clone(),
            },
        );
        SessionResolution {
            sid: new_sid,
            persistent,
            is_new: true,
        }
    }

    /// Remove all sessions whose deadline has passed. Fire-and-forget: any
    /// individual failure is logged and the next tick retries from scratch.
    pub fn sweep(&self) {
        let now = Self::now_ms();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.deadline_ms > now);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "session sweep");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// Run the sweep on a fixed period in a dedicated background thread, exiting
/// cleanly once `shutdown` is observed.
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    period: Duration,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        use std::sync::atomic::Ordering;
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(period);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            registry.sweep();
        }
        warn!("session sweeper exiting");
    })
}

/// Extract the `sid` cookie value from a raw `Cookie:` header, stripping
/// surrounding quotes.
pub fn extract_sid_from_cookie_header(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("sid=") {
            let v = rest.trim_matches('"');
            return Some(v.to_string());
        }
    }
    None
}

/// Extract just the host from a `Host:` header, stripping a trailing port.
pub fn extract_host(header: &str) -> String {
    header.split(':').next().unwrap_or(header).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_new_sid_when_absent() {
        let reg = SessionRegistry::new(60);
        let r = reg.resolve(None);
        assert_eq!(r.sid.len(), SID_LEN);
        assert!(r.sid.chars().all(|c| c.is_ascii_uppercase()));
        assert!(r.is_new);
    }

    #[test]
    fn reuses_live_session() {
        let reg = SessionRegistry::new(60);
        let first = reg.resolve(None);
        first.persistent.insert("k".to_string(), "v".to_string());
        let second = reg.resolve(Some(&first.sid));
        assert!(!second.is_new);
        assert_eq!(second.sid, first.sid);
        assert_eq!(second.persistent.get("k").unwrap().clone(), "v");
    }

    #[test]
    fn expired_session_gets_replaced() {
        let reg = SessionRegistry::new(0);
        let first = reg.resolve(None);
        std::thread::sleep(Duration::from_millis(5));
        let second = reg.resolve(Some(&first.sid));
        assert!(second.is_new);
        assert_ne!(second.sid, first.sid);
    }

    #[test]
    fn sweep_removes_expired_only() {
        let reg = SessionRegistry::new(0);
        reg.resolve(None);
        std::thread::sleep(Duration::from_millis(5));
        reg.sweep();
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn cookie_header_extraction() {
        assert_eq!(
            extract_sid_from_cookie_header("foo=bar; sid=\"ABC\"; baz=qux"),
            Some("ABC".to_string())
        );
        assert_eq!(extract_sid_from_cookie_header("foo=bar"), None);
    }

    #[test]
    fn host_header_strips_port() {
        assert_eq!(extract_host("example.com:8080"), "example.com");
        assert_eq!(extract_host("example.com"), "example.com");
    }
}
