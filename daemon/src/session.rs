/// Device capture session.
///
/// A [`DeviceSessionManager`] is a cheap, cloneable handle to a single tokio
/// task that owns the hardware session: its state machine, the selected
/// device and output, and the live [`CaptureRequest`] arena.  Every public
/// operation enqueues a command and returns immediately; the task applies
/// commands in FIFO order, so a configure always commits or fails before any
/// start/stop/capture enqueued after it is looked at.
///
/// State is published through a `watch` channel as [`SessionSnapshot`]s.
/// Capture outcomes and sink results are reported as [`DaemonEvent`]s.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{CameraPosition, Lens};
use crate::event::DaemonEvent;
use crate::request::{Artifact, CaptureRequest, LiveRequests, RequestId, RequestState};
use crate::sink::{ArtifactSink, SinkError};

/// How often the session context looks for requests past their timeout.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Configuring,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("no {position:?} {lens:?} camera with still-image output is available")]
    DeviceUnavailable { position: CameraPosition, lens: Lens },

    #[error("capture stream failed to start: {0}")]
    StreamStart(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("hardware reported an error: {0}")]
    Hardware(String),

    #[error("no completion arrived within the pending timeout")]
    TimedOut,

    #[error("hardware layer released the request without completing it")]
    Dropped,
}

/// Read-only view of the session published to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Number of captures issued but not yet resolved.
    pub pending: usize,
    pub error: Option<SessionError>,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self { state: SessionState::Uninitialized, pending: 0, error: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequirements {
    pub position: CameraPosition,
    pub lens: Lens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    StillImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub position: CameraPosition,
    pub lens: Lens,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandle {
    pub id: String,
    pub kind: OutputKind,
}

/// The hardware layer.  All methods are called from the session task only.
pub trait CaptureBackend: Send + 'static {
    fn select_device(&mut self, requirements: &DeviceRequirements) -> Option<DeviceHandle>;

    fn attach_output(&mut self, device: &DeviceHandle, kind: OutputKind) -> Option<OutputHandle>;

    fn start_stream(&mut self) -> anyhow::Result<()>;

    fn stop_stream(&mut self);

    /// Begins a capture.  The backend must eventually resolve `completion`,
    /// from any thread; dropping it unresolved fails the request.
    fn submit(&mut self, completion: CaptureCompletion);
}

enum SessionCommand {
    Configure,
    Start,
    Stop,
    Capture,
    Completed {
        id: RequestId,
        result: Result<Artifact, CaptureError>,
    },
    Shutdown,
    #[cfg(test)]
    Barrier(tokio::sync::oneshot::Sender<()>),
    #[cfg(test)]
    History(tokio::sync::oneshot::Sender<Vec<SessionState>>),
}

/// One-shot completion callback for a single capture request.
///
/// Resolving consumes the handle, so a request can be completed at most once.
pub struct CaptureCompletion {
    id: RequestId,
    tx: Option<mpsc::UnboundedSender<SessionCommand>>,
}

impl CaptureCompletion {
    fn new(id: RequestId, tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { id, tx: Some(tx) }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn succeed(self, artifact: Artifact) {
        self.finish(Ok(artifact));
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.finish(Err(CaptureError::Hardware(reason.into())));
    }

    fn finish(mut self, result: Result<Artifact, CaptureError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SessionCommand::Completed { id: self.id, result });
        }
    }
}

impl Drop for CaptureCompletion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SessionCommand::Completed {
                id: self.id,
                result: Err(CaptureError::Dropped),
            });
        }
    }
}

/// Handle to the session task.  Safe to clone and call from any thread.
#[derive(Clone)]
pub struct DeviceSessionManager {
    tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<SessionSnapshot>,
}

impl DeviceSessionManager {
    /// Spawns the session task on the current tokio runtime.
    ///
    /// The task exits after [`shutdown`](Self::shutdown), or once every
    /// handle and every outstanding [`CaptureCompletion`] has been dropped.
    pub fn spawn<B: CaptureBackend>(
        backend: B,
        requirements: DeviceRequirements,
        pending_timeout: Duration,
        sink: Arc<dyn ArtifactSink>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::initial());

        let worker = SessionWorker {
            backend,
            requirements,
            pending_timeout,
            state: SessionState::Uninitialized,
            configured: false,
            device: None,
            output: None,
            live: LiveRequests::new(),
            error: None,
            self_tx: tx.downgrade(),
            state_tx,
            sink,
            events,
            #[cfg(test)]
            history: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(rx));

        (Self { tx, state_rx }, handle)
    }

    /// Selects the device and output and starts streaming.  Only the first
    /// call has any effect; a failure is terminal.
    pub fn configure_if_needed(&self) {
        self.send(SessionCommand::Configure);
    }

    pub fn start(&self) {
        self.send(SessionCommand::Start);
    }

    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    /// Requests one capture.  Ignored unless the session is running.
    pub fn capture(&self) {
        self.send(SessionCommand::Capture);
    }

    /// Stops the stream and ends the session task.
    pub fn shutdown(&self) {
        self.send(SessionCommand::Shutdown);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    fn send(&self, cmd: SessionCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("session task has exited; command dropped");
        }
    }

    /// Resolves once every command sent before it has been processed.
    #[cfg(test)]
    pub(crate) async fn settle(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionCommand::Barrier(tx));
        let _ = rx.await;
    }

    /// Every state the task has moved through, in order, after prior commands.
    #[cfg(test)]
    async fn history(&self) -> Vec<SessionState> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionCommand::History(tx));
        rx.await.unwrap_or_default()
    }
}

struct SessionWorker<B> {
    backend: B,
    requirements: DeviceRequirements,
    pending_timeout: Duration,
    state: SessionState,
    configured: bool,
    device: Option<DeviceHandle>,
    output: Option<OutputHandle>,
    live: LiveRequests,
    error: Option<SessionError>,
    /// Weak so the task can end once all external handles are gone.
    self_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    state_tx: watch::Sender<SessionSnapshot>,
    sink: Arc<dyn ArtifactSink>,
    events: mpsc::Sender<DaemonEvent>,
    #[cfg(test)]
    history: Vec<SessionState>,
}

impl<B: CaptureBackend> SessionWorker<B> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut sweep = interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd).await {
                        break;
                    }
                }
                _ = sweep.tick() => self.expire_stale().await,
            }
        }

        if self.state == SessionState::Running {
            self.backend.stop_stream();
            self.set_state(SessionState::Stopped);
        }
        if !self.live.is_empty() {
            warn!(pending = self.live.len(), "session ended with captures still pending");
        }
        debug!("session task exited");
    }

    /// Applies one command.  Returns `false` when the task should exit.
    async fn handle(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Configure => self.configure(),
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => self.stop(),
            SessionCommand::Capture => self.capture(),
            SessionCommand::Completed { id, result } => self.complete(id, result).await,
            SessionCommand::Shutdown => return false,
            #[cfg(test)]
            SessionCommand::Barrier(done) => {
                let _ = done.send(());
            }
            #[cfg(test)]
            SessionCommand::History(reply) => {
                let _ = reply.send(self.history.clone());
            }
        }
        true
    }

    fn configure(&mut self) {
        if self.configured {
            debug!(state = ?self.state, "configure ignored; session already configured");
            return;
        }
        self.configured = true;
        self.set_state(SessionState::Configuring);

        let unavailable = SessionError::DeviceUnavailable {
            position: self.requirements.position,
            lens: self.requirements.lens,
        };
        let Some(device) = self.backend.select_device(&self.requirements) else {
            return self.fail(unavailable);
        };
        let Some(output) = self.backend.attach_output(&device, OutputKind::StillImage) else {
            return self.fail(unavailable);
        };
        info!(device = %device.id, output = %output.id, "session configured");
        self.device = Some(device);
        self.output = Some(output);

        match self.backend.start_stream() {
            Ok(()) => self.set_state(SessionState::Running),
            Err(e) => self.fail(SessionError::StreamStart(format!("{e:#}"))),
        }
    }

    fn start(&mut self) {
        match self.state {
            SessionState::Stopped => match self.backend.start_stream() {
                Ok(()) => {
                    self.error = None;
                    self.set_state(SessionState::Running);
                }
                Err(e) => {
                    warn!("failed to restart stream: {e:#}");
                    self.error = Some(SessionError::StreamStart(format!("{e:#}")));
                    self.publish();
                }
            },
            state => debug!(?state, "start ignored"),
        }
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Running => {
                self.backend.stop_stream();
                self.set_state(SessionState::Stopped);
            }
            state => debug!(?state, "stop ignored"),
        }
    }

    fn capture(&mut self) {
        if self.state != SessionState::Running {
            debug!(state = ?self.state, "capture ignored; session not running");
            return;
        }
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let id = self.live.insert(CaptureRequest::new(Instant::now()));
        info!(request = %id, pending = self.live.len(), "capture submitted");
        self.publish();
        self.backend.submit(CaptureCompletion::new(id, tx));
    }

    async fn complete(&mut self, id: RequestId, result: Result<Artifact, CaptureError>) {
        let Some(request) = self.live.resolve(id, result) else {
            debug!(request = %id, "completion for a request that is no longer live; ignored");
            return;
        };
        debug!(
            request = %id,
            issued = %request.issued_at.format("%H:%M:%S%.3f"),
            elapsed_ms = request.age(Instant::now()).as_millis() as u64,
            "capture resolved"
        );
        self.publish();
        self.dispatch(request).await;
    }

    async fn expire_stale(&mut self) {
        let expired = self.live.expire(Instant::now(), self.pending_timeout);
        if expired.is_empty() {
            return;
        }
        self.publish();
        for request in expired {
            self.dispatch(request).await;
        }
    }

    /// Routes a resolved request: artifacts go to the sink off the session
    /// task, failures are reported directly.
    ///
    /// Borrows mutably so the future stays `Send` for backends that are not `Sync`.
    async fn dispatch(&mut self, request: CaptureRequest) {
        let id = request.id;
        match request.state {
            RequestState::Succeeded(artifact) => {
                let sink = Arc::clone(&self.sink);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let stored = tokio::task::spawn_blocking(move || sink.store(id, &artifact)).await;
                    let event = match stored {
                        Ok(Ok(())) => DaemonEvent::ArtifactStored { id },
                        Ok(Err(error)) => {
                            warn!(request = %id, "sink rejected artifact: {error}");
                            DaemonEvent::SinkFailed { id, error }
                        }
                        Err(e) => {
                            error!(request = %id, "sink task failed: {e}");
                            DaemonEvent::SinkFailed {
                                id,
                                error: SinkError::Rejected(format!("sink task failed: {e}")),
                            }
                        }
                    };
                    let _ = events.send(event).await;
                });
            }
            RequestState::Failed(reason) => {
                warn!(request = %id, "capture failed: {reason}");
                let _ = self.events.send(DaemonEvent::CaptureFailed { id, reason }).await;
            }
            RequestState::Pending => {}
        }
    }

    fn fail(&mut self, err: SessionError) {
        error!("session unavailable: {err}");
        self.error = Some(err);
        self.set_state(SessionState::Failed);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, "session state changed");
            self.state = state;
            #[cfg(test)]
            self.history.push(state);
        }
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(SessionSnapshot {
            state: self.state,
            pending: self.live.len(),
            error: self.error.clone(),
        });
    }
}
