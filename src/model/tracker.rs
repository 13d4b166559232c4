//! Per-driver speed estimation from completion samples
//!
//! A discrete derivative: the distance covered between two completion
//! samples divided by the whole seconds between them. It is only as accurate
//! as the sampling interval.

use std::collections::HashMap;
use tokio::time::Instant;

use super::units::{Distance, Speed};

#[derive(Debug, Clone, Copy)]
struct Sample {
    completion_pct: f64,
    at: Instant,
    speed: Option<Speed>,
}

#[derive(Debug, Default)]
pub struct SpeedTracker {
    samples: HashMap<u64, Sample>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion sample and return the current speed estimate.
    ///
    /// Samples less than a whole second apart keep the previous estimate.
    /// A completion that goes backwards (a new race) restarts the driver.
    pub fn observe(
        &mut self,
        driver_id: u64,
        completion_pct: f64,
        at: Instant,
        track_length: Distance,
        laps: u32,
    ) -> Option<Speed> {
        if !completion_pct.is_finite() {
            return self.last(driver_id);
        }
        let Some(prev) = self.samples.get(&driver_id).copied() else {
            self.samples.insert(driver_id, Sample { completion_pct, at, speed: None });
            return None;
        };

        let delta = completion_pct - prev.completion_pct;
        if delta < 0.0 {
            self.samples.insert(driver_id, Sample { completion_pct, at, speed: None });
            return None;
        }
        let secs = at.saturating_duration_since(prev.at).as_secs() as i64;
        if secs < 1 {
            return prev.speed;
        }

        let speed = track_length
            .scale(laps as f64 * delta / 100.0)
            .and_then(|d| Speed::new(d, secs))
            .ok();
        self.samples.insert(driver_id, Sample { completion_pct, at, speed });
        speed
    }

    /// Last estimate for a driver
    pub fn last(&self, driver_id: u64) -> Option<Speed> {
        self.samples.get(&driver_id).and_then(|s| s.speed)
    }

    pub fn forget(&mut self, driver_id: u64) {
        self.samples.remove(&driver_id);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn estimates_from_completion_delta() {
        let mut t = SpeedTracker::new();
        let track = Distance::from_miles(2.0).unwrap();
        let t0 = Instant::now();
        assert!(t.observe(1, 10.0, t0, track, 5).is_none());
        // 1% of 10 miles in one second = 360 mph
        let s = t.observe(1, 11.0, t0 + Duration::from_secs(1), track, 5).unwrap();
        assert!((s.mph() - 360.0).abs() < 1e-9);
    }

    #[test]
    fn sub_second_samples_keep_the_previous_estimate() {
        let mut t = SpeedTracker::new();
        let track = Distance::from_miles(1.0).unwrap();
        let t0 = Instant::now();
        t.observe(1, 0.0, t0, track, 1);
        assert!(t.observe(1, 0.5, t0 + Duration::from_millis(400), track, 1).is_none());
        let first = t.observe(1, 1.0, t0 + Duration::from_secs(2), track, 1).unwrap();
        let again = t.observe(1, 1.2, t0 + Duration::from_millis(2500), track, 1).unwrap();
        assert_eq!(first, again);
        assert_eq!(t.last(1), Some(first));
    }

    #[test]
    fn completion_going_backwards_resets() {
        let mut t = SpeedTracker::new();
        let track = Distance::from_miles(1.0).unwrap();
        let t0 = Instant::now();
        t.observe(1, 50.0, t0, track, 1);
        assert!(t.observe(1, 60.0, t0 + Duration::from_secs(1), track, 1).is_some());
        assert!(t.observe(1, 0.0, t0 + Duration::from_secs(2), track, 1).is_none());
        assert!(t.last(1).is_none());
    }

    #[test]
    fn drivers_are_tracked_independently() {
        let mut t = SpeedTracker::new();
        let track = Distance::from_miles(1.0).unwrap();
        let t0 = Instant::now();
        t.observe(1, 0.0, t0, track, 1);
        t.observe(2, 0.0, t0, track, 1);
        t.observe(1, 1.0, t0 + Duration::from_secs(1), track, 1);
        assert!(t.last(1).is_some());
        assert!(t.last(2).is_none());
        t.forget(1);
        assert_eq!(t.len(), 1);
    }
}
