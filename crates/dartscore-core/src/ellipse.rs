use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Ring ellipse in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EllipseParams {
    pub center: Point2<f64>,
    /// Semi-axis along the rotated local x axis.
    pub semi_x: f64,
    /// Semi-axis along the rotated local y axis.
    pub semi_y: f64,
    /// Rotation of the local x axis from the image +x axis, degrees.
    pub rotation_deg: f64,
}

impl EllipseParams {
    /// Build from full axis lengths (OpenCV `RotatedRect` convention).
    pub fn from_full_axes(center: Point2<f64>, width: f64, height: f64, rotation_deg: f64) -> Self {
        Self {
            center,
            semi_x: width * 0.5,
            semi_y: height * 0.5,
            rotation_deg,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.center.x.is_finite()
            && self.center.y.is_finite()
            && self.rotation_deg.is_finite()
            && self.semi_x.is_finite()
            && self.semi_y.is_finite()
            && self.semi_x > 0.0
            && self.semi_y > 0.0
    }

    /// Distance along the ray `origin + t·(cos θ, sin θ)` to the ellipse.
    ///
    /// Takes the nearest positive root, so an origin inside the ellipse hits
    /// the far side exactly once.
    pub fn ray_distance(&self, origin: Point2<f64>, angle_rad: f64) -> Option<f64> {
        let (sin_r, cos_r) = self.rotation_deg.to_radians().sin_cos();
        let dir = Vector2::new(angle_rad.cos(), angle_rad.sin());

        let o = origin - self.center;
        let u0 = o.x * cos_r + o.y * sin_r;
        let v0 = -o.x * sin_r + o.y * cos_r;
        let du = dir.x * cos_r + dir.y * sin_r;
        let dv = -dir.x * sin_r + dir.y * cos_r;

        let a2 = self.semi_x * self.semi_x;
        let b2 = self.semi_y * self.semi_y;
        let qa = du * du / a2 + dv * dv / b2;
        let qb = 2.0 * (u0 * du / a2 + v0 * dv / b2);
        let qc = u0 * u0 / a2 + v0 * v0 / b2 - 1.0;
        let disc = qb * qb - 4.0 * qa * qc;
        if !disc.is_finite() || disc < 0.0 || qa <= 0.0 {
            return None;
        }

        let sq = disc.sqrt();
        let t1 = (-qb - sq) / (2.0 * qa);
        let t2 = (-qb + sq) / (2.0 * qa);
        [t1, t2].into_iter().filter(|t| *t > 0.0).reduce(f64::min)
    }

    /// Point where the ray from `origin` at `angle_rad` meets the ellipse.
    pub fn ray_point(&self, origin: Point2<f64>, angle_rad: f64) -> Option<Point2<f64>> {
        let t = self.ray_distance(origin, angle_rad)?;
        Some(origin + Vector2::new(angle_rad.cos(), angle_rad.sin()) * t)
    }
}
