use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::error;

use crate::access::Authorization;
use crate::request::RequestId;
use crate::session::{SessionSnapshot, SessionState};

/// Runtime status written by the daemon to `<data dir>/Luma/status.toml`.
/// Front ends read this file (read-only) to display session state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current capture session state.
    pub state: SessionState,
    /// Whether the physical trigger is subscribed and will fire captures.
    pub trigger_armed: bool,
    pub authorization: Authorization,
    /// Captures issued but not yet resolved.
    pub pending_captures: usize,
    pub captures_stored: u64,
    /// Captures that failed in hardware, timed out, or were rejected by the sink.
    pub captures_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_id: Option<String>,
    /// RFC 3339 timestamp of the most recently stored artifact, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_timestamp: Option<String>,
    /// Human-readable description of the most recent error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new(authorization: Authorization) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: SessionState::Uninitialized,
            trigger_armed: false,
            authorization,
            pending_captures: 0,
            captures_stored: 0,
            captures_failed: 0,
            last_capture_id: None,
            last_capture_timestamp: None,
            error: None,
        }
    }

    /// Mirrors a published session snapshot.  A snapshot without an error
    /// leaves any earlier capture error in place.
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot) {
        self.state = snapshot.state;
        self.pending_captures = snapshot.pending;
        if let Some(e) = &snapshot.error {
            self.error = Some(e.to_string());
        }
    }

    pub fn record_stored(&mut self, id: RequestId) {
        self.captures_stored += 1;
        self.last_capture_id = Some(id.to_string());
        self.last_capture_timestamp = Some(chrono::Local::now().to_rfc3339());
        self.error = None;
    }

    pub fn record_failure(&mut self, message: String) {
        self.captures_failed += 1;
        self.error = Some(message);
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write never stops the daemon.
pub fn write_status(path: &Path, status: &SessionStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("failed to write status file: {e}");
            }
        }
        Err(e) => error!("failed to serialize status: {e}"),
    }
}
