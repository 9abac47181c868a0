//! Tick cadence
//!
//! The cadence only decides how often entries are re-evaluated. The
//! evaluation itself reads the wall clock, so skipped or delayed ticks never
//! change the outcome.

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Periodic wall-clock sampler
pub struct Countdown {
    interval: Interval,
    ticks: u64,
}

impl Countdown {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        // A stalled process catches up with a single tick, not a burst
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, ticks: 0 }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next tick and return the current wall-clock time
    pub async fn tick(&mut self) -> DateTime<Local> {
        self.interval.tick().await;
        self.ticks += 1;
        timelock_util::now()
    }

    /// Ticks delivered so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Decides when the full document is republished regardless of changes
#[derive(Debug, Clone)]
pub struct RepublishSchedule {
    every: Option<u32>,
    since_last: u32,
}

impl RepublishSchedule {
    pub fn new(every: Option<u32>) -> Self {
        Self {
            every,
            since_last: 0,
        }
    }

    /// Count one tick; true when a republish is due
    pub fn on_tick(&mut self) -> bool {
        let Some(every) = self.every else {
            return false;
        };
        self.since_last += 1;
        if self.since_last >= every {
            self.since_last = 0;
            true
        } else {
            false
        }
    }

    /// A publish happened anyway; restart the count
    pub fn reset(&mut self) {
        self.since_last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn countdown_ticks_at_period() {
        let mut countdown = Countdown::new(Duration::from_millis(20));
        assert_eq!(countdown.period(), Duration::from_millis(20));

        // First tick completes immediately
        countdown.tick().await;
        let before = std::time::Instant::now();
        countdown.tick().await;
        assert!(before.elapsed() >= Duration::from_millis(10));
        assert_eq!(countdown.ticks(), 2);
    }

    #[test]
    fn republish_every_n_ticks() {
        let mut schedule = RepublishSchedule::new(Some(3));
        let due: Vec<bool> = (0..6).map(|_| schedule.on_tick()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn republish_reset_and_disabled() {
        let mut schedule = RepublishSchedule::new(Some(2));
        schedule.on_tick();
        schedule.reset();
        assert!(!schedule.on_tick());
        assert!(schedule.on_tick());

        let mut never = RepublishSchedule::new(None);
        assert!((0..10).all(|_| !never.on_tick()));
    }
}
