//! Time intervals and interval sets.
//!
//! Used by tagged plugins to describe the exposure window over which a
//! time-varying model is averaged.

use mf_core::{Error, Result};

/// A half-open-in-spirit `[start, stop]` interval of the independent
/// variable. `stop == start` is allowed (zero duration).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInterval {
    start: f64,
    stop: f64,
}

impl TimeInterval {
    /// Create an interval, rejecting `stop < start` and non-finite edges.
    pub fn new(start: f64, stop: f64) -> Result<Self> {
        if !start.is_finite() || !stop.is_finite() {
            return Err(Error::Validation(format!(
                "time interval edges must be finite, got ({start}, {stop})"
            )));
        }
        if stop < start {
            return Err(Error::Validation(format!(
                "time interval stop {stop} before start {start}"
            )));
        }
        Ok(Self { start, stop })
    }

    /// Interval start.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Interval stop.
    pub fn stop(&self) -> f64 {
        self.stop
    }

    /// Interval duration.
    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    /// Interval mid point.
    pub fn mid_point(&self) -> f64 {
        0.5 * (self.start + self.stop)
    }

    /// A copy shifted by `dt` (negative shifts left).
    pub fn shift(&self, dt: f64) -> Self {
        Self { start: self.start + dt, stop: self.stop + dt }
    }

    /// Whether `t` lies inside the interval (edges inclusive).
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.stop
    }

    /// Whether two intervals overlap (shared edges count).
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start <= other.stop && other.start <= self.stop
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "time interval {} - {} (duration: {})", self.start, self.stop, self.duration())
    }
}

/// An ordered set of time intervals.
#[derive(Debug, Clone, Default)]
pub struct TimeIntervalSet {
    intervals: Vec<TimeInterval>,
}

impl TimeIntervalSet {
    /// Create a set from intervals, kept in the given order.
    pub fn new(intervals: Vec<TimeInterval>) -> Self {
        Self { intervals }
    }

    /// Access the intervals.
    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The minimum of the start times.
    pub fn absolute_start(&self) -> Option<f64> {
        self.intervals.iter().map(|i| i.start).reduce(f64::min)
    }

    /// The maximum of the stop times.
    pub fn absolute_stop(&self) -> Option<f64> {
        self.intervals.iter().map(|i| i.stop).reduce(f64::max)
    }

    /// Mid point of each interval.
    pub fn mid_points(&self) -> Vec<f64> {
        self.intervals.iter().map(|i| i.mid_point()).collect()
    }

    /// Whether consecutive intervals join exactly (stop_k == start_{k+1}).
    pub fn is_contiguous(&self) -> bool {
        self.intervals.windows(2).all(|w| w[0].stop == w[1].start)
    }

    /// Edges of a contiguous set: `n + 1` values.
    ///
    /// Returns an error if the set is empty or not contiguous.
    pub fn edges(&self) -> Result<Vec<f64>> {
        if self.intervals.is_empty() {
            return Err(Error::Validation("cannot take edges of an empty interval set".into()));
        }
        if !self.is_contiguous() {
            return Err(Error::Validation(
                "cannot take edges of a non-contiguous interval set".into(),
            ));
        }
        let mut edges = Vec::with_capacity(self.intervals.len() + 1);
        edges.push(self.intervals[0].start);
        edges.extend(self.intervals.iter().map(|i| i.stop));
        Ok(edges)
    }

    /// A copy with every interval shifted by `dt`.
    pub fn shift(&self, dt: f64) -> Self {
        Self { intervals: self.intervals.iter().map(|i| i.shift(dt)).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_basics() {
        let iv = TimeInterval::new(-1.0, 3.0).unwrap();
        assert_eq!(iv.duration(), 4.0);
        assert_eq!(iv.mid_point(), 1.0);
        assert!(iv.contains(0.0));
        assert!(!iv.contains(3.5));

        let shifted = iv.shift(2.0);
        assert_eq!(shifted.start(), 1.0);
        assert_eq!(shifted.stop(), 5.0);
    }

    #[test]
    fn test_interval_rejects_reversed_edges() {
        assert!(TimeInterval::new(1.0, 0.0).is_err());
        assert!(TimeInterval::new(f64::NAN, 1.0).is_err());
        assert!(TimeInterval::new(0.0, f64::INFINITY).is_err());
        // Zero duration is fine.
        assert!(TimeInterval::new(2.0, 2.0).is_ok());
    }

    #[test]
    fn test_overlaps() {
        let a = TimeInterval::new(0.0, 2.0).unwrap();
        let b = TimeInterval::new(1.0, 3.0).unwrap();
        let c = TimeInterval::new(2.0, 4.0).unwrap();
        let d = TimeInterval::new(5.0, 6.0).unwrap();
        assert!(a.overlaps(&b));
        assert!(a.overlaps(&c)); // shared edge
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn test_interval_set_edges() {
        let set = TimeIntervalSet::new(vec![
            TimeInterval::new(0.0, 1.0).unwrap(),
            TimeInterval::new(1.0, 2.5).unwrap(),
            TimeInterval::new(2.5, 4.0).unwrap(),
        ]);
        assert!(set.is_contiguous());
        assert_eq!(set.edges().unwrap(), vec![0.0, 1.0, 2.5, 4.0]);
        assert_eq!(set.absolute_start(), Some(0.0));
        assert_eq!(set.absolute_stop(), Some(4.0));
        assert_eq!(set.mid_points(), vec![0.5, 1.75, 3.25]);

        let gappy = TimeIntervalSet::new(vec![
            TimeInterval::new(0.0, 1.0).unwrap(),
            TimeInterval::new(2.0, 3.0).unwrap(),
        ]);
        assert!(!gappy.is_contiguous());
        assert!(gappy.edges().is_err());
        assert!(TimeIntervalSet::default().edges().is_err());
    }

    #[test]
    fn test_interval_set_shift() {
        let set = TimeIntervalSet::new(vec![
            TimeInterval::new(0.0, 1.0).unwrap(),
            TimeInterval::new(1.0, 2.0).unwrap(),
        ]);
        let shifted = set.shift(-0.5);
        assert_eq!(shifted.absolute_start(), Some(-0.5));
        assert_eq!(shifted.absolute_stop(), Some(1.5));
    }
}
