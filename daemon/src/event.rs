use crate::config::Config;
use crate::request::RequestId;
use crate::session::{CaptureError, SessionSnapshot};
use crate::sink::SinkError;

/// Host-process lifecycle transitions, as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundEvent {
    DidBecomeActive,
    WillResignActive,
    DidEnterBackground,
}

#[derive(Debug)]
pub enum DaemonEvent {
    /// The host process changed foreground state.
    Lifecycle(ForegroundEvent),
    /// The user answered the camera permission prompt.
    AccessDecision(bool),
    /// The access gate's authorization callback fired.
    AuthorizationResolved(bool),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The physical button produced an accepted trigger.
    TriggerFired,
    /// The trigger monitor gained or lost its signal subscription.
    TriggerArmed(bool),
    /// The on-screen shutter was pressed.
    CaptureRequested,
    StartRequested,
    StopRequested,
    /// The session published a new snapshot.
    SessionChanged(SessionSnapshot),
    /// A capture completed and its artifact was handed to the sink.
    ArtifactStored { id: RequestId },
    /// A capture resolved with an error; the sink was not invoked.
    CaptureFailed { id: RequestId, reason: CaptureError },
    /// The capture succeeded but the sink rejected the artifact.
    SinkFailed { id: RequestId, error: SinkError },
    StatusRequested,
    /// Ctrl+C or `quit`; the daemon should stop the session and exit.
    Shutdown,
}
