/// Suppression of self-induced level changes.
///
/// After every accepted trigger the monitor writes the baseline level back to
/// the signal, and that write comes back as a level-change notification.  The
/// guard marks a short window during which any observed change is attributed
/// to our own write.  The window closes on its own after a fixed delay so a
/// lost echo can never lock the trigger out permanently.
use std::time::{Duration, Instant};

pub const DEFAULT_SELF_WRITE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Idle,
    SelfWritePending { until: Instant },
}

#[derive(Debug, Clone)]
pub struct SignalFeedbackGuard {
    window: Duration,
    state: GuardState,
}

impl SignalFeedbackGuard {
    pub fn new(window: Duration) -> Self {
        Self { window, state: GuardState::Idle }
    }

    /// Opens the self-write window starting at `now`.  Calling it again while a
    /// window is open restarts the window.
    pub fn begin_self_write(&mut self, now: Instant) {
        self.state = GuardState::SelfWritePending { until: now + self.window };
    }

    /// Closes the window immediately.
    pub fn clear(&mut self) {
        self.state = GuardState::Idle;
    }

    /// Whether a change observed at `now` should be attributed to our own
    /// write.  Falls back to `Idle` once the window has elapsed.
    pub fn is_self_induced(&mut self, now: Instant) -> bool {
        match self.state {
            GuardState::SelfWritePending { until } if now < until => true,
            GuardState::SelfWritePending { .. } => {
                self.state = GuardState::Idle;
                false
            }
            GuardState::Idle => false,
        }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }
}

impl Default for SignalFeedbackGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_WRITE_WINDOW)
    }
}
