/// Physical-button trigger built on an output-level signal.
///
/// The device's side buttons change a system output level that we can both
/// observe and write.  [`TriggerMonitor`] subscribes to that level while the
/// host is in the foreground, treats each explicit change as a press, and
/// writes the level back to a mid-range baseline after every accepted press so
/// the next press is detectable in either direction.
///
/// Raw notifications pass through [`SignalFeedbackGuard`] (our own baseline
/// write echoes back as a change) and then [`TriggerDebouncer`] (one press
/// yields several notifications) before the capture callback fires.
///
/// The monitor itself is synchronous; [`spawn`] runs it on a tokio task and
/// returns a [`TriggerHandle`] for lifecycle control.
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TriggerConfig;
use crate::debounce::TriggerDebouncer;
use crate::feedback::SignalFeedbackGuard;

/// Why the platform says the level changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    /// A user action or an explicit write.
    Explicit,
    /// Output device switched (headphones plugged, etc.).
    RouteChange,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    /// Subscription that produced the event; stale ones are discarded.
    pub generation: u64,
    pub level: f32,
    pub reason: ChangeReason,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger signal unavailable: {0}")]
    SubscriptionUnavailable(String),

    #[error("failed to write signal level: {0}")]
    WriteFailed(String),
}

/// Sending half given to a [`LevelSignal`] on subscribe.
#[derive(Debug, Clone)]
pub struct SignalSender {
    generation: u64,
    tx: mpsc::UnboundedSender<SignalEvent>,
}

impl SignalSender {
    /// Reports a level change.  Returns `false` once the monitor is gone.
    pub fn notify(&self, level: f32, reason: ChangeReason) -> bool {
        self.tx
            .send(SignalEvent { generation: self.generation, level, reason })
            .is_ok()
    }
}

/// The shared external level.  Only the trigger monitor touches it.
pub trait LevelSignal: Send + 'static {
    /// Acquires the underlying resource and starts delivering changes to `sender`.
    fn subscribe(&mut self, sender: SignalSender) -> Result<(), TriggerError>;

    /// Stops delivery and releases the resource.  No-op when not subscribed.
    fn unsubscribe(&mut self);

    fn write_level(&mut self, level: f32) -> Result<(), TriggerError>;
}

pub type CaptureCallback = Box<dyn FnMut() + Send>;

pub struct TriggerMonitor<S> {
    signal: S,
    enabled: bool,
    baseline: f32,
    guard: SignalFeedbackGuard,
    debouncer: TriggerDebouncer,
    generation: u64,
    /// Generation of the live subscription, if any.
    active: Option<u64>,
    last_level: Option<f32>,
    /// Whether the host is in the foreground, independent of `enabled`.
    foreground: bool,
    armed_tx: watch::Sender<bool>,
    raw_tx: mpsc::UnboundedSender<SignalEvent>,
    on_capture: CaptureCallback,
}

impl<S: LevelSignal> TriggerMonitor<S> {
    pub fn new(
        signal: S,
        config: &TriggerConfig,
        raw_tx: mpsc::UnboundedSender<SignalEvent>,
        on_capture: CaptureCallback,
    ) -> Self {
        Self {
            signal,
            enabled: config.enabled,
            baseline: config.effective_baseline(),
            guard: SignalFeedbackGuard::new(config.self_write_window()),
            debouncer: TriggerDebouncer::new(config.debounce_interval()),
            generation: 0,
            active: None,
            last_level: None,
            foreground: false,
            armed_tx: watch::channel(false).0,
            raw_tx,
            on_capture,
        }
    }

    /// Follows whether a subscription is live, i.e. whether presses can fire.
    pub fn armed(&self) -> watch::Receiver<bool> {
        self.armed_tx.subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn last_level(&self) -> Option<f32> {
        self.last_level
    }

    /// (Re)establishes the subscription and resets the level to baseline.
    pub fn on_foreground_active(&mut self, now: Instant) {
        self.foreground = true;
        self.teardown();
        if !self.enabled {
            debug!("button trigger disabled; not subscribing");
            return;
        }

        self.generation += 1;
        let sender = SignalSender { generation: self.generation, tx: self.raw_tx.clone() };
        match self.signal.subscribe(sender) {
            Ok(()) => {
                self.active = Some(self.generation);
                info!(baseline = self.baseline, "button trigger armed");
                self.armed_tx.send_replace(true);
                self.reset_to_baseline(now);
            }
            Err(e) => warn!("button capture unavailable until next foreground: {e}"),
        }
    }

    pub fn on_background_or_inactive(&mut self) {
        self.foreground = false;
        self.teardown();
    }

    /// Handles one raw notification.  Returns `true` when it fired a capture.
    pub fn on_raw_signal_changed(&mut self, event: SignalEvent, now: Instant) -> bool {
        if self.active != Some(event.generation) {
            debug!(generation = event.generation, "event from stale subscription discarded");
            return false;
        }
        let previous = self.last_level.replace(event.level);

        if self.guard.is_self_induced(now) {
            debug!(level = event.level, "self-induced level change discarded");
            return false;
        }
        if event.reason != ChangeReason::Explicit {
            debug!(reason = ?event.reason, "non-explicit level change ignored");
            return false;
        }
        if !self.debouncer.accept(now) {
            debug!(level = event.level, "press inside debounce window ignored");
            return false;
        }

        info!(level = event.level, ?previous, "button press accepted");
        (self.on_capture)();
        self.reset_to_baseline(now);
        true
    }

    /// Applies new timings and baseline.  Disabling disarms immediately;
    /// re-enabling while in the foreground arms again at `now`.
    pub fn apply_config(&mut self, config: &TriggerConfig, now: Instant) {
        let was_enabled = self.enabled;
        self.enabled = config.enabled;
        self.baseline = config.effective_baseline();
        self.guard.set_window(config.self_write_window());
        self.debouncer.set_min_interval(config.debounce_interval());
        if !self.enabled {
            self.teardown();
        } else if !was_enabled && self.foreground {
            self.on_foreground_active(now);
        }
    }

    fn reset_to_baseline(&mut self, now: Instant) {
        self.guard.begin_self_write(now);
        if let Err(e) = self.signal.write_level(self.baseline) {
            warn!("{e}");
        }
    }

    fn teardown(&mut self) {
        if self.active.take().is_some() {
            self.signal.unsubscribe();
            info!("button trigger disarmed");
        }
        self.guard.clear();
        self.armed_tx.send_replace(false);
    }
}

enum MonitorCommand {
    ForegroundActive,
    BackgroundOrInactive,
    Reconfigure(TriggerConfig),
    Stop,
}

/// Control handle for a spawned monitor task.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
    armed: watch::Receiver<bool>,
}

impl TriggerHandle {
    pub fn foreground_active(&self) {
        let _ = self.tx.send(MonitorCommand::ForegroundActive);
    }

    pub fn background_or_inactive(&self) {
        let _ = self.tx.send(MonitorCommand::BackgroundOrInactive);
    }

    pub fn reconfigure(&self, config: TriggerConfig) {
        let _ = self.tx.send(MonitorCommand::Reconfigure(config));
    }

    pub fn armed(&self) -> watch::Receiver<bool> {
        self.armed.clone()
    }

    /// Disarms the trigger and ends the monitor task.
    pub fn stop(&self) {
        let _ = self.tx.send(MonitorCommand::Stop);
    }
}

/// Runs a [`TriggerMonitor`] on its own task.  Lifecycle commands and raw
/// signal notifications are handled in arrival order on that task.
pub fn spawn<S: LevelSignal>(
    signal: S,
    config: &TriggerConfig,
    on_capture: CaptureCallback,
) -> (TriggerHandle, JoinHandle<()>) {
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let monitor = TriggerMonitor::new(signal, config, raw_tx, on_capture);
    let armed = monitor.armed();
    let task = tokio::spawn(run(monitor, rx, raw_rx));
    (TriggerHandle { tx, armed }, task)
}

async fn run<S: LevelSignal>(
    mut monitor: TriggerMonitor<S>,
    mut control_rx: mpsc::UnboundedReceiver<MonitorCommand>,
    mut raw_rx: mpsc::UnboundedReceiver<SignalEvent>,
) {
    loop {
        tokio::select! {
            cmd = control_rx.recv() => match cmd {
                Some(MonitorCommand::ForegroundActive) => monitor.on_foreground_active(Instant::now()),
                Some(MonitorCommand::BackgroundOrInactive) => monitor.on_background_or_inactive(),
                Some(MonitorCommand::Reconfigure(config)) => monitor.apply_config(&config, Instant::now()),
                Some(MonitorCommand::Stop) | None => break,
            },
            Some(event) = raw_rx.recv() => {
                monitor.on_raw_signal_changed(event, Instant::now());
            }
        }
    }
    monitor.on_background_or_inactive();
    debug!("trigger monitor exited");
}
