//! Ideal affine cameras for tests, benches and demos.
//!
//! An affine view maps every board circle onto an exact ellipse and every
//! ray from the board center onto a ray from the pixel center, so the
//! calibration it produces is self-consistent to machine precision.

use std::f64::consts::TAU;

use dartscore_core::{Ring, SEGMENT_ORDER, WEDGE_DEG};
use nalgebra::{Matrix2, Point2, SymmetricEigen, Vector2};

use crate::camera::SEGMENT_COUNT;
use crate::raw::{RawCameraCalibration, RawEllipse};

/// Pixel = `center + A · board`, with `A = scale · [[1, skew], [0, -1]]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticCamera {
    pub id: String,
    pub center: Point2<f64>,
    /// Pixels per normalised board unit.
    pub scale: f64,
    /// Horizontal shear, pixels of x per pixel of y.
    pub skew: f64,
    pub segment_20_index: usize,
}

impl SyntheticCamera {
    pub fn new(id: impl Into<String>, center: Point2<f64>, scale: f64) -> Self {
        Self {
            id: id.into(),
            center,
            scale,
            skew: 0.0,
            segment_20_index: 0,
        }
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_segment_20_index(mut self, index: usize) -> Self {
        self.segment_20_index = index % SEGMENT_COUNT;
        self
    }

    fn linear(&self) -> Matrix2<f64> {
        Matrix2::new(1.0, self.skew, 0.0, -1.0) * self.scale
    }

    pub fn board_to_pixel(&self, board: Point2<f64>) -> Point2<f64> {
        self.center + self.linear() * board.coords
    }

    pub fn pixel_to_board(&self, pixel: Point2<f64>) -> Point2<f64> {
        let y = (self.center.y - pixel.y) / self.scale;
        let x = (pixel.x - self.center.x) / self.scale - self.skew * y;
        Point2::new(x, y)
    }

    /// Image of the board circle of normalised radius `r`.
    fn ring_ellipse(&self, r: f64) -> RawEllipse {
        let a = self.linear() * r;
        let shape = a * a.transpose();
        let eig = SymmetricEigen::new(shape);
        let major: Vector2<f64> = eig.eigenvectors.column(0).into_owned();
        RawEllipse::Nested(
            [self.center.x, self.center.y],
            [
                2.0 * eig.eigenvalues[0].max(0.0).sqrt(),
                2.0 * eig.eigenvalues[1].max(0.0).sqrt(),
            ],
            major.y.atan2(major.x).to_degrees(),
        )
    }

    /// Pixel angle of wedge boundary `i`.
    fn boundary_angle(&self, i: usize) -> f64 {
        let wedge = (i + SEGMENT_COUNT - self.segment_20_index) % SEGMENT_COUNT;
        let board_deg = wedge as f64 * WEDGE_DEG - WEDGE_DEG * 0.5;
        let dir = dartscore_core::from_polar(1.0, board_deg);
        let px = self.linear() * dir.coords;
        px.y.atan2(px.x).rem_euclid(TAU)
    }

    /// Calibration entry this camera would produce.
    pub fn raw(&self) -> RawCameraCalibration {
        let mut raw = RawCameraCalibration {
            center: [self.center.x, self.center.y],
            segment_angles: (0..SEGMENT_COUNT).map(|i| self.boundary_angle(i)).collect(),
            segment_20_index: self.segment_20_index as i64,
            ..Default::default()
        };
        for ring in Ring::ALL {
            raw.set_ring(ring, Some(self.ring_ellipse(ring.normalized_radius())));
        }
        raw
    }

    /// Segment number whose wedge is opened by boundary `i`.
    pub fn segment_after_boundary(&self, i: usize) -> u8 {
        SEGMENT_ORDER[(i + SEGMENT_COUNT - self.segment_20_index) % SEGMENT_COUNT]
    }
}

/// Three cameras viewing the board from different sides.
pub fn three_camera_rig() -> Vec<SyntheticCamera> {
    vec![
        SyntheticCamera::new("cam0", Point2::new(640.0, 360.0), 310.0).with_skew(0.15),
        SyntheticCamera::new("cam1", Point2::new(600.0, 380.0), 280.0)
            .with_skew(-0.2)
            .with_segment_20_index(6),
        SyntheticCamera::new("cam2", Point2::new(660.0, 340.0), 295.0)
            .with_skew(0.05)
            .with_segment_20_index(13),
    ]
}

/// Calibration document for a set of synthetic cameras.
pub fn calibration_document(cameras: &[SyntheticCamera]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = cameras
        .iter()
        .filter_map(|c| {
            serde_json::to_value(c.raw())
                .ok()
                .map(|v| (c.id.clone(), v))
        })
        .collect();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ring_ellipse_passes_through_board_circle_images() {
        let cam = SyntheticCamera::new("cam0", Point2::new(100.0, 200.0), 250.0).with_skew(0.3);
        let ellipse = cam.ring_ellipse(0.6).to_params();
        for deg in [0.0, 37.0, 145.0, 260.0] {
            let px = cam.board_to_pixel(dartscore_core::from_polar(0.6, deg));
            let d = px - cam.center;
            let t = ellipse
                .ray_distance(cam.center, d.y.atan2(d.x))
                .expect("ray hits");
            assert_relative_eq!(t, d.norm(), epsilon = 1e-9);
        }
    }

    #[test]
    fn pixel_to_board_inverts_board_to_pixel() {
        let cam = SyntheticCamera::new("cam0", Point2::new(10.0, 20.0), 123.0).with_skew(-0.4);
        let b = Point2::new(0.31, -0.77);
        let back = cam.pixel_to_board(cam.board_to_pixel(b));
        assert_relative_eq!(back.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, b.y, epsilon = 1e-12);
    }

    #[test]
    fn rig_document_is_keyed_by_camera() {
        let doc = calibration_document(&three_camera_rig());
        let obj = doc.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("cam1"));
        assert_eq!(obj["cam1"]["segment_20_index"], 6);
    }
}
