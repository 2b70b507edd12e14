/// Capture requests and the live-request arena owned by the session context.
///
/// A [`CaptureRequest`] tracks one capture from the moment the session accepts
/// it until the hardware reports a terminal result.  Requests are stored in
/// [`LiveRequests`] keyed by [`RequestId`]; resolving a request removes it, so a
/// second completion for the same id finds nothing and is ignored.
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::session::CaptureError;

/// Unique identity of a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in artifact file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque image blob produced by the capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub data: Vec<u8>,
    /// File extension the sink should use when persisting the blob.
    pub extension: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Pending,
    Succeeded(Artifact),
    Failed(CaptureError),
}

#[derive(Debug)]
pub struct CaptureRequest {
    pub id: RequestId,
    /// Wall-clock issuance time, reported to the UI.
    pub issued_at: DateTime<Local>,
    /// Monotonic issuance time, used for the pending timeout.
    issued_instant: Instant,
    pub state: RequestState,
}

impl CaptureRequest {
    pub fn new(now: Instant) -> Self {
        Self {
            id: RequestId::new(),
            issued_at: Local::now(),
            issued_instant: now,
            state: RequestState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RequestState::Pending)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_instant)
    }
}

/// Arena of in-flight capture requests.
#[derive(Debug, Default)]
pub struct LiveRequests {
    entries: HashMap<RequestId, CaptureRequest>,
}

impl LiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request and returns its id.
    pub fn insert(&mut self, request: CaptureRequest) -> RequestId {
        let id = request.id;
        self.entries.insert(id, request);
        id
    }

    /// Removes the request and records its terminal state.
    ///
    /// Returns `None` when `id` is not live (already resolved, expired, or
    /// never issued).
    pub fn resolve(
        &mut self,
        id: RequestId,
        result: Result<Artifact, CaptureError>,
    ) -> Option<CaptureRequest> {
        let mut request = self.entries.remove(&id)?;
        request.state = match result {
            Ok(artifact) => RequestState::Succeeded(artifact),
            Err(e) => RequestState::Failed(e),
        };
        Some(request)
    }

    /// Removes every request older than `timeout`, failing each with
    /// [`CaptureError::TimedOut`].  Returned in issuance order.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<CaptureRequest> {
        let stale: Vec<RequestId> = self
            .entries
            .values()
            .filter(|r| r.is_pending() && r.age(now) >= timeout)
            .map(|r| r.id)
            .collect();

        let mut expired: Vec<CaptureRequest> = stale
            .into_iter()
            .filter_map(|id| self.resolve(id, Err(CaptureError::TimedOut)))
            .collect();
        expired.sort_by_key(|r| r.issued_instant);
        expired
    }

    #[cfg(test)]
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
