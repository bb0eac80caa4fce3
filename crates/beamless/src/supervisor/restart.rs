//! Restart intensity tracking.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Timestamps of the restarts within the trailing period.
///
/// A restart is recorded first and compared after: the restart that pushes
/// the count above `max_restarts` is refused.
#[derive(Debug, Clone)]
pub struct RestartWindow {
    max_restarts: u32,
    period: Duration,
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    /// A window allowing `max_restarts` restarts in any `period`.
    pub fn new(max_restarts: u32, period: Duration) -> Self {
        Self {
            max_restarts,
            period,
            restarts: VecDeque::new(),
        }
    }

    /// Records a restart at `now`. Returns `false` when the restarts less
    /// than `period` old now exceed `max_restarts`.
    ///
    /// `now` must not go backwards between calls.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.restarts.front() {
            if now.duration_since(oldest) < self.period {
                break;
            }
            self.restarts.pop_front();
        }
        self.restarts.push_back(now);
        self.restarts.len() <= self.max_restarts as usize
    }

    /// Restarts currently inside the window, as of the last `record`.
    pub fn len(&self) -> usize {
        self.restarts.len()
    }

    /// Whether no restart is inside the window.
    pub fn is_empty(&self) -> bool {
        self.restarts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn the_restart_past_the_limit_is_refused() {
        let start = Instant::now();
        let mut window = RestartWindow::new(3, Duration::from_secs(10));
        let at = |ms| start + Duration::from_millis(ms);

        assert!(window.record(at(0)));
        assert!(window.record(at(100)));
        assert!(window.record(at(200)));
        assert!(!window.record(at(300)));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn old_restarts_fall_out_of_the_window() {
        let start = Instant::now();
        let mut window = RestartWindow::new(1, Duration::from_secs(1));

        assert!(window.record(start));
        assert!(window.record(start + Duration::from_secs(1)));
        assert!(!window.record(start + Duration::from_millis(1500)));
    }

    #[test]
    fn zero_restarts_refuses_the_first() {
        let mut window = RestartWindow::new(0, Duration::from_secs(5));
        assert!(!window.record(Instant::now()));
    }

    proptest! {
        #[test]
        fn record_matches_a_count_over_the_trailing_period(
            max in 0u32..6,
            period_ms in 1u64..500,
            gaps in proptest::collection::vec(0u64..200, 1..60),
        ) {
            let start = Instant::now();
            let period = Duration::from_millis(period_ms);
            let mut window = RestartWindow::new(max, period);
            let mut history = Vec::new();
            let mut offset = 0;

            for gap in gaps {
                offset += gap;
                let now = start + Duration::from_millis(offset);
                history.push(now);
                let recent = history
                    .iter()
                    .filter(|&&t| now.duration_since(t) < period)
                    .count();
                prop_assert_eq!(window.record(now), recent <= max as usize);
                prop_assert_eq!(window.len(), recent);
            }
        }
    }
}
