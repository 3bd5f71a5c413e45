//! Process-wide front-end state shared by all responders.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gantry_core::buffer::{BufferPool, GcodeReplyStack};
use gantry_core::constants::{HTTP_SESSION_TIMEOUT, MAX_HTTP_SESSIONS};
use gantry_core::http::SessionTable;
use gantry_core::machine::MachineBackend;

/// Front-end configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Directory static files are served from.
    pub web_dir: PathBuf,
    /// Root for uploads, downloads, and the file-management commands.
    pub storage_dir: PathBuf,
    /// When set, every response carries `Access-Control-Allow-Origin`.
    pub cors_site: Option<String>,
    /// Idle timeout for sessions and uploads.
    pub session_timeout: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            web_dir: PathBuf::from("www"),
            storage_dir: PathBuf::from("storage"),
            cors_site: None,
            session_timeout: HTTP_SESSION_TIMEOUT,
        }
    }
}

/// Shared front-end state: the session table, the G-code reply stack,
/// and the output buffer pool, handed to each responder at construction.
///
/// Lock order is always sessions before reply.
pub struct WebState {
    pub config: WebConfig,
    pub machine: Arc<dyn MachineBackend>,
    pub pool: BufferPool,
    pub sessions: Mutex<SessionTable>,
    pub reply: Mutex<GcodeReplyStack>,
}

impl WebState {
    pub fn new(config: WebConfig, machine: Arc<dyn MachineBackend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            machine,
            pool: BufferPool::default(),
            sessions: Mutex::new(SessionTable::new()),
            reply: Mutex::new(GcodeReplyStack::new()),
        })
    }

    /// Store a G-code reply for the HTTP sessions to fetch. Dropped when
    /// nobody is connected, so pool buffers cannot leak into a reply no
    /// one will read.
    pub fn handle_gcode_reply(&self, text: &str) {
        let sessions = self.sessions.lock().unwrap();
        if sessions.is_empty() {
            return;
        }
        drop(sessions);
        self.reply.lock().unwrap().append(&self.pool, text);
    }

    /// Periodic sweep: drop idle sessions and, when clients timed out,
    /// let the reply stack account for them.
    pub fn check_sessions(&self, now: Instant) {
        let (removed, remaining) = {
            let mut sessions = self.sessions.lock().unwrap();
            let removed = sessions.check_sessions(now, self.config.session_timeout);
            (removed, sessions.len())
        };
        if removed > 0 {
            self.reply.lock().unwrap().note_timed_out(removed, remaining);
        }
    }

    /// One-line state summary.
    pub fn diagnostics(&self) -> String {
        format!(
            "HTTP sessions: {} of {}, free buffers: {}, reply seq: {}",
            self.sessions.lock().unwrap().len(),
            MAX_HTTP_SESSIONS,
            self.pool.free_buffers(),
            self.reply.lock().unwrap().seq(),
        )
    }
}
