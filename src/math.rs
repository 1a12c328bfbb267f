//! Lane geometry.

use cgmath::prelude::*;
use cgmath::{Point2, Vector2};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 2D point
pub type Point2d = Point2<f64>;

/// A 2D vector
pub type Vector2d = Vector2<f64>;

/// A piecewise linear curve, used as a lane's centre line.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polyline {
    /// The vertices.
    points: Vec<Point2d>,
    /// The distance along the curve at each vertex.
    offsets: Vec<f64>,
}

impl Polyline {
    /// Creates a polyline through the given points.
    pub fn new(points: Vec<Point2d>) -> Self {
        let mut offsets = Vec::with_capacity(points.len());
        let mut acc = 0.0;
        for (idx, point) in points.iter().enumerate() {
            if idx > 0 {
                acc += points[idx - 1].distance(*point);
            }
            offsets.push(acc);
        }
        Self { points, offsets }
    }

    /// The length of the curve in m.
    pub fn length(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    /// Returns true if the curve has fewer than two points.
    pub fn is_empty(&self) -> bool {
        self.points.len() < 2
    }

    /// Samples the curve at the given distance from its start,
    /// returning the point and the unit tangent.
    /// Distances outside the curve are clamped to its ends.
    pub fn sample(&self, offset: f64) -> Option<(Point2d, Vector2d)> {
        if self.is_empty() {
            return None;
        }
        let offset = offset.clamp(0.0, self.length());
        let seg = self
            .offsets
            .windows(2)
            .position(|w| offset <= w[1])
            .unwrap_or(self.points.len() - 2);
        let (a, b) = (self.points[seg], self.points[seg + 1]);
        let seg_len = self.offsets[seg + 1] - self.offsets[seg];
        let dir = b - a;
        if seg_len <= 0.0 {
            return Some((a, Vector2d::zero()));
        }
        let t = (offset - self.offsets[seg]) / seg_len;
        Some((a + dir * t, dir / seg_len))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn sample_polyline() {
        let line = Polyline::new(vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(10.0, 0.0),
            Point2d::new(10.0, 10.0),
        ]);
        assert_approx_eq!(line.length(), 20.0);

        let (p, dir) = line.sample(15.0).unwrap();
        assert_approx_eq!(p.x, 10.0);
        assert_approx_eq!(p.y, 5.0);
        assert_approx_eq!(dir.y, 1.0);

        let (p, _) = line.sample(-3.0).unwrap();
        assert_approx_eq!(p.x, 0.0);
        assert!(Polyline::new(vec![]).sample(0.0).is_none());
    }
}
