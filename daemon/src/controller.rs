/// Event-loop policy.
///
/// [`Controller`] owns the session, trigger and access-gate handles and
/// decides what each [`DaemonEvent`] does to them:
///   - the session is configured only once camera access is granted, and
///     only while the host is in the foreground;
///   - resigning active disarms the trigger, entering the background also
///     stops the session;
///   - revoking access stops the session.
///
/// Every state-affecting event is mirrored into `status.toml`.
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::access::{AccessGate, Authorization, PromptAccessGate};
use crate::event::{DaemonEvent, ForegroundEvent};
use crate::session::DeviceSessionManager;
use crate::sink::DirectorySink;
use crate::status::{self, SessionStatus};
use crate::trigger::TriggerHandle;

pub struct Controller {
    session: DeviceSessionManager,
    monitor: TriggerHandle,
    gate: PromptAccessGate,
    sink: Arc<DirectorySink>,
    events: mpsc::Sender<DaemonEvent>,
    status: SessionStatus,
    status_path: PathBuf,
    foreground: bool,
}

impl Controller {
    pub fn new(
        session: DeviceSessionManager,
        monitor: TriggerHandle,
        gate: PromptAccessGate,
        sink: Arc<DirectorySink>,
        events: mpsc::Sender<DaemonEvent>,
        status_path: PathBuf,
    ) -> Self {
        let initial = SessionStatus::new(gate.current_authorization());
        status::write_status(&status_path, &initial);
        Self { session, monitor, gate, sink, events, status: initial, status_path, foreground: false }
    }

    /// Treats the process as foreground-active and acts on the initial
    /// camera authorization.
    pub fn begin(&mut self) {
        self.handle(DaemonEvent::Lifecycle(ForegroundEvent::DidBecomeActive));

        match self.gate.current_authorization() {
            Authorization::Granted => self.session.configure_if_needed(),
            Authorization::Undetermined => {
                info!("camera access undetermined; answer with `grant` or `deny`");
                let tx = self.events.clone();
                self.gate.request_authorization(Box::new(move |granted| {
                    tokio::spawn(async move {
                        let _ = tx.send(DaemonEvent::AuthorizationResolved(granted)).await;
                    });
                }));
            }
            Authorization::Denied => {
                self.status.error = Some("camera access denied".to_string());
                self.write_status();
            }
        }
    }

    /// Applies one event.  Returns `false` once the daemon should shut down.
    pub fn handle(&mut self, event: DaemonEvent) -> bool {
        match event {
            DaemonEvent::Lifecycle(ForegroundEvent::DidBecomeActive) => {
                info!("became active");
                self.foreground = true;
                self.monitor.foreground_active();
                if self.gate.current_authorization() == Authorization::Granted {
                    self.session.configure_if_needed();
                    self.session.start();
                }
            }

            DaemonEvent::Lifecycle(ForegroundEvent::WillResignActive) => {
                info!("resigning active");
                self.foreground = false;
                self.monitor.background_or_inactive();
            }

            DaemonEvent::Lifecycle(ForegroundEvent::DidEnterBackground) => {
                info!("entered background");
                self.foreground = false;
                self.monitor.background_or_inactive();
                self.session.stop();
            }

            DaemonEvent::AccessDecision(granted) => {
                // A pending prompt hears the answer through its callback; a
                // later change of mind is applied here.
                let prompted = self.gate.current_authorization() == Authorization::Undetermined;
                self.gate.resolve(granted);
                if !prompted {
                    self.apply_authorization(granted);
                }
            }

            DaemonEvent::AuthorizationResolved(granted) => self.apply_authorization(granted),

            DaemonEvent::ConfigReloaded(new_config) => {
                info!("config reloaded");
                // Device selection and timeouts are fixed once the session is configured.
                self.monitor.reconfigure(new_config.trigger);
                self.sink.set_dir(new_config.output.resolved_artifact_dir());
            }

            DaemonEvent::TriggerArmed(armed) => {
                self.status.trigger_armed = armed;
                self.write_status();
            }

            DaemonEvent::TriggerFired => {
                info!("trigger fired");
                self.session.capture();
            }

            DaemonEvent::CaptureRequested => self.session.capture(),
            DaemonEvent::StartRequested => self.session.start(),
            DaemonEvent::StopRequested => self.session.stop(),

            DaemonEvent::SessionChanged(snapshot) => {
                self.status.apply_snapshot(&snapshot);
                self.write_status();
            }

            DaemonEvent::ArtifactStored { id } => {
                self.status.record_stored(id);
                self.write_status();
            }

            DaemonEvent::CaptureFailed { id, reason } => {
                self.status.record_failure(format!("capture {} failed: {reason}", id.short()));
                self.write_status();
            }

            DaemonEvent::SinkFailed { id, error } => {
                self.status.record_failure(format!("capture {} not stored: {error}", id.short()));
                self.write_status();
            }

            DaemonEvent::StatusRequested => match toml::to_string_pretty(&self.status) {
                Ok(s) => println!("{s}"),
                Err(e) => warn!("failed to render status: {e}"),
            },

            DaemonEvent::Shutdown => {
                info!("shutting down");
                return false;
            }
        }
        true
    }

    /// Stops the trigger and the session, waits for both tasks and writes
    /// the final status.  Drop the event receiver first so that no task is
    /// left blocked on a full channel.
    pub async fn shutdown(mut self, session_task: JoinHandle<()>, monitor_task: JoinHandle<()>) {
        self.monitor.stop();
        self.session.shutdown();
        if let Err(e) = session_task.await {
            error!("session task panicked: {e}");
        }
        if let Err(e) = monitor_task.await {
            error!("trigger task panicked: {e}");
        }

        self.status.apply_snapshot(&self.session.snapshot());
        self.status.trigger_armed = false;
        self.status.pending_captures = 0;
        self.write_status();
    }

    fn apply_authorization(&mut self, granted: bool) {
        self.status.authorization = self.gate.current_authorization();
        if granted {
            info!("camera access granted");
            self.status.error = None;
            if self.foreground {
                self.session.configure_if_needed();
                self.session.start();
            }
        } else {
            warn!("camera access denied");
            self.session.stop();
            self.status.error = Some("camera access denied".to_string());
        }
        self.write_status();
    }

    fn write_status(&self) {
        status::write_status(&self.status_path, &self.status);
    }
}

/// Spawns a task that re-posts every change of `rx` as an event.  Ends when
/// the publisher or the event loop goes away.
pub fn forward<T, F>(mut rx: watch::Receiver<T>, tx: mpsc::Sender<DaemonEvent>, wrap: F) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> DaemonEvent + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            if tx.send(wrap(value)).await.is_err() {
                break;
            }
        }
    })
}
