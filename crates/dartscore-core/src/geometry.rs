//! 2D line helpers used by the triangulation stage.

use nalgebra::{Matrix2, Point2, SymmetricEigen, Vector2};
use serde::{Deserialize, Serialize};

/// Infinite 2D line through `point` with unit `direction`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line2 {
    pub point: Point2<f64>,
    pub direction: Vector2<f64>,
}

impl Line2 {
    /// Line through two points. `None` when the points coincide.
    pub fn through(a: Point2<f64>, b: Point2<f64>) -> Option<Self> {
        let d = b - a;
        let n = d.norm();
        if !n.is_finite() || n < 1e-12 {
            return None;
        }
        Some(Self {
            point: a,
            direction: d / n,
        })
    }

    /// Unsigned perpendicular distance from `p` to the line.
    #[inline]
    pub fn distance(&self, p: Point2<f64>) -> f64 {
        cross(self.direction, p - self.point).abs()
    }

    /// Signed position of the foot of `p` along the direction.
    #[inline]
    pub fn along(&self, p: Point2<f64>) -> f64 {
        self.direction.dot(&(p - self.point))
    }

    #[inline]
    pub fn at(&self, t: f64) -> Point2<f64> {
        self.point + self.direction * t
    }
}

/// z-component of the 2D cross product.
#[inline]
pub fn cross(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Closed-form intersection of the lines `p1p2` and `p3p4`.
///
/// Returns `None` when the denominator is below `eps` (parallel or
/// degenerate segments).
pub fn intersect_segments_as_lines(
    p1: Point2<f64>,
    p2: Point2<f64>,
    p3: Point2<f64>,
    p4: Point2<f64>,
    eps: f64,
) -> Option<Point2<f64>> {
    let denom = (p1.x - p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x - p4.x);
    if !denom.is_finite() || denom.abs() < eps {
        return None;
    }
    let t = ((p1.x - p3.x) * (p3.y - p4.y) - (p1.y - p3.y) * (p3.x - p4.x)) / denom;
    Some(p1 + (p2 - p1) * t)
}

/// Intersection of two lines given in point/direction form.
///
/// `min_sin` bounds `|d1 × d2|`; with unit directions this is the sine of the
/// angle between the lines.
pub fn intersect_lines(a: &Line2, b: &Line2, min_sin: f64) -> Option<Point2<f64>> {
    let denom = cross(a.direction, b.direction);
    if !denom.is_finite() || denom.abs() < min_sin {
        return None;
    }
    let t = cross(b.point - a.point, b.direction) / denom;
    Some(a.at(t))
}

/// Total-least-squares line through a point cloud.
///
/// Returns the fitted line and the RMS perpendicular spread of the samples.
pub fn fit_line(points: &[Point2<f64>]) -> Option<(Line2, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords)
        / n;

    let mut cov = Matrix2::<f64>::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = SymmetricEigen::new(cov);
    let (major, minor) = if eig.eigenvalues[0] >= eig.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let direction: Vector2<f64> = eig.eigenvectors.column(major).into_owned();
    let norm = direction.norm();
    if !norm.is_finite() || norm < 1e-12 || eig.eigenvalues[major] <= 0.0 {
        return None;
    }
    let spread = eig.eigenvalues[minor].max(0.0).sqrt();
    Some((
        Line2 {
            point: Point2::from(centroid),
            direction: direction / norm,
        },
        spread,
    ))
}

/// Weighted least-squares point closest to a set of lines.
///
/// Minimises `Σ wᵢ · dist(p, lineᵢ)²`. `None` when the normal matrix is
/// singular (all lines parallel).
pub fn closest_point_to_lines(lines: &[(Line2, f64)]) -> Option<Point2<f64>> {
    let mut a = Matrix2::<f64>::zeros();
    let mut b = Vector2::<f64>::zeros();
    for (line, w) in lines {
        let d = line.direction;
        let proj = Matrix2::identity() - d * d.transpose();
        a += proj * *w;
        b += proj * line.point.coords * *w;
    }
    if a.determinant().abs() < 1e-12 {
        return None;
    }
    let p = a.lu().solve(&b)?;
    Some(Point2::from(p))
}

/// Weighted median: the smallest value whose cumulative weight reaches half
/// of the total.
pub fn weighted_median(samples: &[(f64, f64)]) -> Option<f64> {
    let mut sorted: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    let mut acc = 0.0;
    for (v, w) in &sorted {
        acc += w;
        if acc >= total * 0.5 {
            return Some(*v);
        }
    }
    sorted.last().map(|(v, _)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn point_direction_form_matches_closed_form() {
        let p1 = Point2::new(-0.4, 0.9);
        let p2 = Point2::new(0.3, -0.2);
        let p3 = Point2::new(0.8, 0.7);
        let p4 = Point2::new(-0.5, -0.1);

        let a = Line2::through(p1, p2).unwrap();
        let b = Line2::through(p3, p4).unwrap();
        let x = intersect_lines(&a, &b, 1e-9).unwrap();
        let y = intersect_segments_as_lines(p1, p2, p3, p4, 1e-12).unwrap();
        assert_relative_eq!(x.x, y.x, epsilon = 1e-12);
        assert_relative_eq!(x.y, y.y, epsilon = 1e-12);
        assert!(a.distance(x) < 1e-12 && b.distance(x) < 1e-12);
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let a = Line2::through(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)).unwrap();
        let b = Line2::through(Point2::new(0.0, 0.5), Point2::new(2.0, 2.5)).unwrap();
        assert!(intersect_lines(&a, &b, 1e-9).is_none());
    }

    #[test]
    fn fit_line_recovers_direction() {
        let pts: Vec<_> = (0..10)
            .map(|i| Point2::new(1.0 + i as f64 * 0.3, 2.0 - i as f64 * 0.6))
            .collect();
        let (line, spread) = fit_line(&pts).unwrap();
        assert!(spread < 1e-9);
        let expected = Vector2::new(0.3, -0.6).normalize();
        assert_relative_eq!(cross(line.direction, expected).abs(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn closest_point_of_concurrent_lines_is_their_meeting_point() {
        let target = Point2::new(0.2, -0.35);
        let lines: Vec<(Line2, f64)> = [10.0_f64, 70.0, 140.0]
            .iter()
            .map(|deg| {
                let d = Vector2::new(deg.to_radians().cos(), deg.to_radians().sin());
                (
                    Line2 {
                        point: target - d * 0.5,
                        direction: d,
                    },
                    1.0,
                )
            })
            .collect();
        let p = closest_point_to_lines(&lines).unwrap();
        assert_relative_eq!(p.x, target.x, epsilon = 1e-9);
        assert_relative_eq!(p.y, target.y, epsilon = 1e-9);
    }

    #[test]
    fn weighted_median_respects_weights() {
        assert_eq!(weighted_median(&[(1.0, 1.0), (2.0, 1.0), (3.0, 1.0)]), Some(2.0));
        assert_eq!(weighted_median(&[(1.0, 0.1), (2.0, 0.1), (3.0, 5.0)]), Some(3.0));
        assert_eq!(weighted_median(&[]), None);
    }
}
