/// Minimum-spacing filter for raw trigger events.
///
/// One physical press of a side button usually produces several level-change
/// notifications within a few milliseconds.  Only the first one inside each
/// window counts as a trigger.
use std::time::{Duration, Instant};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(140);

#[derive(Debug, Clone)]
pub struct TriggerDebouncer {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl TriggerDebouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_accepted: None }
    }

    /// Returns `true` and records `now` when at least `min_interval` has
    /// elapsed since the last accepted event (or none was accepted yet).
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    #[cfg(test)]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for TriggerDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn single_isolated_event_fires_once() {
        let mut d = TriggerDebouncer::default();
        assert!(d.accept(Instant::now()));
    }

    #[test]
    fn events_inside_window_are_dropped() {
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::default();
        assert!(d.accept(t0));
        assert!(!d.accept(t0 + ms(1)));
        assert!(!d.accept(t0 + ms(139)));
    }

    #[test]
    fn event_exactly_at_interval_fires() {
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::default();
        assert!(d.accept(t0));
        assert!(d.accept(t0 + ms(140)));
    }

    #[test]
    fn burst_at_0_50_200_fires_twice() {
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::default();
        let fired: Vec<bool> = [0, 50, 200].iter().map(|&t| d.accept(t0 + ms(t))).collect();
        assert_eq!(fired, vec![true, false, true]);
    }

    #[test]
    fn rejected_events_do_not_extend_window() {
        // A steady 100ms stream: the window is measured from the last
        // *accepted* event, so every other event gets through.
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::default();
        let fired: Vec<u64> = (0..6)
            .map(|i| i * 100)
            .filter(|&t| d.accept(t0 + ms(t)))
            .collect();
        assert_eq!(fired, vec![0, 200, 400]);
    }

    #[test]
    fn no_two_accepts_closer_than_interval() {
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::new(ms(75));
        let accepted: Vec<u64> = (0..100u64)
            .map(|i| i * 13)
            .filter(|&t| d.accept(t0 + ms(t)))
            .collect();
        for pair in accepted.windows(2) {
            assert!(pair[1] - pair[0] >= 75, "{pair:?} closer than window");
        }
    }

    #[test]
    fn set_min_interval_applies_to_next_event() {
        let t0 = Instant::now();
        let mut d = TriggerDebouncer::default();
        assert!(d.accept(t0));
        d.set_min_interval(ms(20));
        assert_eq!(d.min_interval(), ms(20));
        assert!(d.accept(t0 + ms(25)));
    }
}
