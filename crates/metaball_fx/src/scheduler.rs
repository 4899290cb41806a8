//! Accumulator-driven tick cadence.
//!
//! The host calls [`Cadence::poll`] once per frame with its variable frame time. The cadence
//! fires when enough time has accumulated for one simulation tick.
use crate::events::SkipReason;

/// What a unit did on one call to its `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The unit is not placed or not enabled.
    Inactive,
    /// The cadence has not accumulated a full interval yet.
    NotDue,
    /// The tick ran but did no density or mesh work; the mesh was cleared.
    Skipped(SkipReason),
    /// A fresh mesh was produced.
    Updated { triangles: usize },
    /// The compute device failed; the channel was reset and the mesh cleared.
    DeviceFailed,
}

impl TickOutcome {
    pub fn ran(&self) -> bool {
        !matches!(self, TickOutcome::Inactive | TickOutcome::NotDue)
    }
}

/// Fires at most once per poll, every `interval` seconds of accumulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct Cadence {
    interval: f32,
    elapsed: f32,
    period: f32,
    fires: u64,
}

impl Cadence {
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            elapsed: 0.0,
            period: 0.0,
            fires: 0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Takes effect from the next poll. Accumulated time is kept.
    pub fn set_interval(&mut self, interval: f32) {
        self.interval = interval.max(0.0);
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Seconds covered by the most recent fire.
    pub fn period(&self) -> f32 {
        self.period
    }

    pub fn fires(&self) -> u64 {
        self.fires
    }

    /// Forgets accumulated time.
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }

    /// Makes the next poll fire regardless of accumulated time.
    pub fn trigger(&mut self) {
        self.elapsed = self.elapsed.max(self.interval);
    }

    pub fn poll(&mut self, dt: f32) -> bool {
        self.elapsed += dt.max(0.0);
        if self.elapsed < self.interval {
            return false;
        }
        self.period = self.elapsed;
        // Drop whole missed intervals instead of queueing catch-up ticks.
        self.elapsed = if self.interval > 0.0 {
            (self.elapsed - self.interval) % self.interval
        } else {
            0.0
        };
        self.fires += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_interval_has_accumulated() {
        let mut cadence = Cadence::new(0.1);
        assert!(!cadence.poll(0.04));
        assert!(!cadence.poll(0.04));
        assert!(cadence.poll(0.04));
        assert!((cadence.period() - 0.12).abs() < 1e-6);
        assert!((cadence.elapsed() - 0.02).abs() < 1e-6);
        assert_eq!(cadence.fires(), 1);
    }

    #[test]
    fn long_frames_fire_only_once() {
        let mut cadence = Cadence::new(0.1);
        assert!(cadence.poll(1.05));
        assert!(!cadence.poll(0.0));
        assert!(cadence.elapsed() < 0.1);
    }

    #[test]
    fn interval_changes_apply_to_next_poll() {
        let mut cadence = Cadence::new(1.0);
        assert!(!cadence.poll(0.3));
        cadence.set_interval(0.2);
        assert!(cadence.poll(0.0));
    }

    #[test]
    fn zero_interval_fires_every_poll() {
        let mut cadence = Cadence::new(0.0);
        assert!(cadence.poll(0.0));
        assert!(cadence.poll(0.016));
    }

    #[test]
    fn trigger_forces_next_poll() {
        let mut cadence = Cadence::new(5.0);
        cadence.trigger();
        assert!(cadence.poll(0.0));
    }
}
