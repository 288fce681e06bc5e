//! Simulated time for the discrete-event kernel.
//!
//! Time advances only when the scheduler dispatches an event, never from
//! wall-clock observation. Values are finite, non-negative reals.

use std::cmp::Ordering;

/// A point on the simulated clock.
///
/// Wraps an `f64` but is totally ordered (via [`f64::total_cmp`]) so it can
/// key the scheduler's heap. Constructors keep the value finite and
/// non-negative.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimTime(f64);

impl SimTime {
    /// The zero-point of simulated time.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Create a new `SimTime`. Negative, NaN and infinite inputs clamp to zero.
    #[inline]
    pub fn new(t: f64) -> Self {
        if t.is_finite() && t > 0.0 {
            SimTime(t)
        } else {
            SimTime(0.0)
        }
    }

    /// Return the raw value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Advance time by `delay`.
    /// Returns `None` when `delay` is negative or the sum is not finite.
    #[inline]
    pub fn advance(self, delay: f64) -> Option<SimTime> {
        if !(delay >= 0.0) {
            return None;
        }
        let t = self.0 + delay;
        t.is_finite().then_some(SimTime(t))
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: SimTime) -> bool {
        self < other
    }

    /// Elapsed time between `other` and `self`.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: SimTime) -> Option<f64> {
        (self >= other).then(|| self.0 - other.0)
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<SimTime> for f64 {
    fn from(t: SimTime) -> f64 {
        t.0
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(SimTime::ZERO.as_f64(), 0.0);
    }

    #[test]
    fn test_ordering() {
        let t1 = SimTime::new(1.5);
        let t2 = SimTime::new(2.0);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_advance() {
        let t = SimTime::new(4.0);
        assert_eq!(t.advance(2.5), Some(SimTime::new(6.5)));
        assert_eq!(t.advance(0.0), Some(t));
    }

    #[test]
    fn test_advance_rejects_bad_delays() {
        let t = SimTime::new(4.0);
        assert!(t.advance(-1.0).is_none());
        assert!(t.advance(f64::NAN).is_none());
        assert!(t.advance(f64::INFINITY).is_none());
    }

    #[test]
    fn test_new_clamps() {
        assert_eq!(SimTime::new(-3.0), SimTime::ZERO);
        assert_eq!(SimTime::new(f64::NAN), SimTime::ZERO);
        assert_eq!(SimTime::new(-0.0), SimTime::ZERO);
    }

    #[test]
    fn test_duration_since() {
        let t1 = SimTime::new(4.0);
        let t2 = SimTime::new(10.0);
        assert_eq!(t2.duration_since(t1), Some(6.0));
        assert_eq!(t1.duration_since(t2), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SimTime::new(42.0)), "T=42");
        assert_eq!(format!("{}", SimTime::new(0.5)), "T=0.5");
    }
}
