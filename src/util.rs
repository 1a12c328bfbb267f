//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

/// The distance below which two positions are considered equal, in m.
pub const POSITION_EPS: f64 = 0.1;

/// An interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq)]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd> Interval<T> {
    /// Returns true if the two closed intervals share at least one point.
    pub fn intersects(&self, other: &Self) -> bool {
        self.max >= other.min && other.max >= self.min
    }

    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Interval<f64> {
    /// Widens the interval by `amount` on both sides.
    pub fn widen(&self, amount: f64) -> Self {
        Self {
            min: self.min - amount,
            max: self.max + amount,
        }
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

/// The time needed to cover `distance` at a constant `speed`, in s.
/// Infinite when the speed is not positive.
pub fn travel_time(distance: f64, speed: f64) -> f64 {
    if speed > 0.0 {
        distance / speed
    } else {
        f64::INFINITY
    }
}

/// Divides `num` by `denom`, returning -1 instead of a non-finite value.
pub fn ratio_or_sentinel(num: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        -1.0
    } else {
        num / denom
    }
}
