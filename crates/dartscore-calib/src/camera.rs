//! Validated per-camera calibration and its cached pixel-to-board spline.

use std::f64::consts::TAU;

use dartscore_core::{
    from_polar, score_for, EllipseParams, Ring, ThinPlateSpline, Zone, BULL_RADIUS_MM,
    BULL_SEGMENT, DOUBLE_INNER_RADIUS_MM, DOUBLE_OUTER_RADIUS_MM, SEGMENT_ORDER,
    TRIPLE_INNER_RADIUS_MM, TRIPLE_OUTER_RADIUS_MM, WEDGE_DEG,
};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::raw::{RawCameraCalibration, RawEllipse};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Number of wedge boundaries in the angle table.
pub const SEGMENT_COUNT: usize = 20;

/// Options for building the pixel-to-board spline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    /// Add interpolated rings in the two wide single beds.
    pub mid_ring_control_points: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            mid_ring_control_points: true,
        }
    }
}

/// Interpolated rings between (inner ring, outer ring) pairs, with their
/// board radius in millimetres.
const MID_RINGS: [(Ring, Ring, f64); 2] = [
    (
        Ring::Bull,
        Ring::InnerTriple,
        (BULL_RADIUS_MM + TRIPLE_INNER_RADIUS_MM) * 0.5,
    ),
    (
        Ring::OuterTriple,
        Ring::InnerDouble,
        (TRIPLE_OUTER_RADIUS_MM + DOUBLE_INNER_RADIUS_MM) * 0.5,
    ),
];

/// A pixel/board correspondence used to fit the spline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub pixel: Point2<f64>,
    pub board: Point2<f64>,
}

/// Per-camera classification of a pixel tip against the camera's own rings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraVote {
    pub segment: u8,
    pub multiplier: u8,
    pub score: u16,
    pub zone: Zone,
    /// Angular distance to the closest wedge boundary, degrees.
    pub boundary_distance_deg: f64,
}

impl CameraVote {
    fn from_zone(segment: u8, zone: Zone, boundary_distance_deg: f64) -> Self {
        let multiplier = zone.multiplier();
        Self {
            segment,
            multiplier,
            score: score_for(segment, multiplier),
            zone,
            boundary_distance_deg,
        }
    }

    fn miss() -> Self {
        Self::from_zone(0, Zone::Miss, 0.0)
    }
}

/// Ring ellipses and angle table of one camera, validated but without a
/// fitted transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraGeometry {
    pub id: String,
    pub center: Point2<f64>,
    /// Indexed in [`Ring::ALL`] order.
    pub rings: [EllipseParams; 6],
    /// Boundary angles in radians, normalised to `[0, 2π)`.
    pub segment_angles: [f64; SEGMENT_COUNT],
    pub segment_20_index: usize,
}

fn normalize_rad(a: f64) -> f64 {
    let w = a.rem_euclid(TAU);
    if w >= TAU {
        0.0
    } else {
        w
    }
}

/// Counter-wrapped gap from `a` to `b`, in `(0, 2π]`.
fn forward_gap(a: f64, b: f64) -> f64 {
    let d = normalize_rad(b - a);
    if d <= 0.0 {
        TAU
    } else {
        d
    }
}

impl CameraGeometry {
    /// Validate one camera's raw entry.
    pub fn from_raw(id: &str, raw: &RawCameraCalibration) -> Result<Self, CalibrationError> {
        let camera = || id.to_string();

        let center = Point2::new(raw.center[0], raw.center[1]);
        if !(center.x.is_finite() && center.y.is_finite()) {
            return Err(CalibrationError::NonFinite {
                camera: camera(),
                field: "center",
            });
        }

        let mut rings = [EllipseParams::from_full_axes(center, 1.0, 1.0, 0.0); 6];
        for (slot, ring) in rings.iter_mut().zip(Ring::ALL) {
            let raw_ring = raw.ring(ring).ok_or_else(|| CalibrationError::MissingRing {
                camera: camera(),
                ring,
            })?;
            let params = raw_ring.to_params();
            if !params.is_valid() {
                return Err(CalibrationError::InvalidRing {
                    camera: camera(),
                    ring,
                });
            }
            *slot = params;
        }

        if raw.segment_angles.len() < SEGMENT_COUNT {
            return Err(CalibrationError::ShortAngleTable {
                camera: camera(),
                got: raw.segment_angles.len(),
            });
        }
        if raw.segment_angles.len() > SEGMENT_COUNT {
            debug!(
                "camera {id}: ignoring {} extra angle table entries",
                raw.segment_angles.len() - SEGMENT_COUNT
            );
        }
        let mut segment_angles = [0.0; SEGMENT_COUNT];
        for (dst, src) in segment_angles.iter_mut().zip(&raw.segment_angles) {
            if !src.is_finite() {
                return Err(CalibrationError::NonFinite {
                    camera: camera(),
                    field: "segment_angles",
                });
            }
            *dst = normalize_rad(*src);
        }

        // Monotonic around the circle means exactly one non-increasing step,
        // counting the step from the last entry back to the first.
        let wraps = (0..SEGMENT_COUNT)
            .filter(|&i| segment_angles[(i + 1) % SEGMENT_COUNT] <= segment_angles[i])
            .count();
        if wraps != 1 {
            return Err(CalibrationError::NonMonotonicAngles {
                camera: camera(),
                wraps,
            });
        }

        if !(0..SEGMENT_COUNT as i64).contains(&raw.segment_20_index) {
            return Err(CalibrationError::Segment20OutOfRange {
                camera: camera(),
                index: raw.segment_20_index,
            });
        }

        Ok(Self {
            id: id.to_string(),
            center,
            rings,
            segment_angles,
            segment_20_index: raw.segment_20_index as usize,
        })
    }

    pub fn ring(&self, ring: Ring) -> &EllipseParams {
        &self.rings[ring as usize]
    }

    /// Board wedge index (into `SEGMENT_ORDER`) of the wedge opened by
    /// boundary `i`.
    #[inline]
    pub fn board_wedge(&self, i: usize) -> usize {
        (i + SEGMENT_COUNT - self.segment_20_index) % SEGMENT_COUNT
    }

    /// Pixel angle halfway between boundary `i` and the next one.
    fn mid_angle(&self, i: usize) -> f64 {
        let a = self.segment_angles[i];
        let b = self.segment_angles[(i + 1) % SEGMENT_COUNT];
        normalize_rad(a + forward_gap(a, b) * 0.5)
    }

    /// `(pixel angle, clockwise board angle in degrees)` for the 20 boundaries
    /// and the 20 wedge midpoints.
    fn sample_angles(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        (0..SEGMENT_COUNT).flat_map(move |i| {
            let wedge = self.board_wedge(i) as f64 * WEDGE_DEG;
            [
                (self.segment_angles[i], wedge - WEDGE_DEG * 0.5),
                (self.mid_angle(i), wedge),
            ]
        })
    }

    /// Pixel/board correspondences for the spline fit.
    ///
    /// Rays that miss a ring ellipse are skipped, so the count may fall short
    /// of the nominal 40 per ring.
    pub fn control_points(&self, options: &TransformOptions) -> Vec<ControlPoint> {
        let mut out = Vec::with_capacity(Ring::ALL.len() * 40 + MID_RINGS.len() * 40 + 1);

        for ring in Ring::ALL {
            let ellipse = self.ring(ring);
            let radius = ring.normalized_radius();
            for (px_angle, board_deg) in self.sample_angles() {
                if let Some(pixel) = ellipse.ray_point(self.center, px_angle) {
                    out.push(ControlPoint {
                        pixel,
                        board: from_polar(radius, board_deg),
                    });
                }
            }
        }

        if options.mid_ring_control_points {
            for (inner, outer, radius_mm) in MID_RINGS {
                let radius = radius_mm / DOUBLE_OUTER_RADIUS_MM;
                for (px_angle, board_deg) in self.sample_angles() {
                    let a = self.ring(inner).ray_point(self.center, px_angle);
                    let b = self.ring(outer).ray_point(self.center, px_angle);
                    if let (Some(a), Some(b)) = (a, b) {
                        out.push(ControlPoint {
                            pixel: nalgebra::center(&a, &b),
                            board: from_polar(radius, board_deg),
                        });
                    }
                }
            }
        }

        out.push(ControlPoint {
            pixel: self.center,
            board: Point2::origin(),
        });
        out
    }

    /// Fit the pixel-to-board spline.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, options), fields(camera = %self.id)))]
    pub fn build_transform(
        &self,
        options: &TransformOptions,
    ) -> Result<ThinPlateSpline, CalibrationError> {
        let points = self.control_points(options);
        let (src, dst): (Vec<_>, Vec<_>) = points.iter().map(|c| (c.pixel, c.board)).unzip();
        ThinPlateSpline::fit(&src, &dst).map_err(|source| CalibrationError::TransformUnavailable {
            camera: self.id.clone(),
            source,
        })
    }

    /// Index of the boundary opening the wedge that contains `angle`.
    fn wedge_at(&self, angle: f64) -> usize {
        let angle = normalize_rad(angle);
        (0..SEGMENT_COUNT)
            .find(|&i| {
                let lo = self.segment_angles[i];
                let hi = self.segment_angles[(i + 1) % SEGMENT_COUNT];
                if lo <= hi {
                    angle >= lo && angle < hi
                } else {
                    angle >= lo || angle < hi
                }
            })
            // the table is monotonic, so some wedge always contains the angle
            .unwrap_or(0)
    }

    /// Classify a pixel tip against this camera's ellipses and angle table.
    pub fn vote(&self, tip: Point2<f64>) -> CameraVote {
        let offset = tip - self.center;
        let dist = offset.norm();
        let angle = offset.y.atan2(offset.x);
        let reach = |ring: Ring| {
            self.ring(ring)
                .ray_distance(self.center, angle)
                .unwrap_or(0.0)
        };

        if dist <= reach(Ring::Bullseye) {
            return CameraVote::from_zone(BULL_SEGMENT, Zone::InnerBull, WEDGE_DEG * 0.5);
        }
        if dist <= reach(Ring::Bull) {
            return CameraVote::from_zone(BULL_SEGMENT, Zone::OuterBull, WEDGE_DEG * 0.5);
        }
        if dist > reach(Ring::OuterDouble) {
            return CameraVote::miss();
        }

        let i = self.wedge_at(angle);
        let segment = SEGMENT_ORDER[self.board_wedge(i)];
        let to_lo = angular_distance(angle, self.segment_angles[i]);
        let to_hi = angular_distance(angle, self.segment_angles[(i + 1) % SEGMENT_COUNT]);
        let boundary_distance_deg = to_lo.min(to_hi).to_degrees();

        let zone = if dist >= reach(Ring::InnerTriple) && dist <= reach(Ring::OuterTriple) {
            Zone::Triple
        } else if dist >= reach(Ring::InnerDouble) {
            Zone::Double
        } else if dist < reach(Ring::InnerTriple) {
            Zone::SingleInner
        } else {
            Zone::SingleOuter
        };
        CameraVote::from_zone(segment, zone, boundary_distance_deg)
    }

    /// Serialise back into the on-disk shape.
    pub fn to_raw(&self) -> RawCameraCalibration {
        let mut raw = RawCameraCalibration {
            center: [self.center.x, self.center.y],
            segment_angles: self.segment_angles.to_vec(),
            segment_20_index: self.segment_20_index as i64,
            ..Default::default()
        };
        for ring in Ring::ALL {
            raw.set_ring(ring, Some(RawEllipse::from(self.ring(ring))));
        }
        raw
    }
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let d = normalize_rad(a - b);
    d.min(TAU - d)
}

/// A usable camera: validated geometry plus the spline fitted at load.
#[derive(Clone, Debug)]
pub struct CameraCalibration {
    geometry: CameraGeometry,
    transform: ThinPlateSpline,
}

impl CameraCalibration {
    /// Validate a raw entry and fit its transform.
    pub fn load(
        id: &str,
        raw: &RawCameraCalibration,
        options: &TransformOptions,
    ) -> Result<Self, CalibrationError> {
        let geometry = CameraGeometry::from_raw(id, raw)?;
        let transform = geometry.build_transform(options)?;
        debug!(
            "camera {id}: spline fitted on {} control points",
            transform.control_point_count()
        );
        Ok(Self {
            geometry,
            transform,
        })
    }

    pub fn id(&self) -> &str {
        &self.geometry.id
    }

    pub fn geometry(&self) -> &CameraGeometry {
        &self.geometry
    }

    pub fn spline(&self) -> &ThinPlateSpline {
        &self.transform
    }

    /// Pixel to normalised board coordinates.
    #[inline]
    pub fn transform(&self, pixel: Point2<f64>) -> Point2<f64> {
        self.transform.transform(pixel)
    }

    /// Normalised board to pixel coordinates.
    pub fn untransform(&self, board: Point2<f64>) -> Option<Point2<f64>> {
        self.transform.untransform(board)
    }

    #[inline]
    pub fn vote(&self, tip: Point2<f64>) -> CameraVote {
        self.geometry.vote(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticCamera;
    use approx::assert_relative_eq;
    use dartscore_core::{to_polar, wedge_index};

    fn camera() -> SyntheticCamera {
        SyntheticCamera::new("cam0", Point2::new(640.0, 360.0), 300.0).with_skew(0.12)
    }

    #[test]
    fn control_point_count_with_and_without_mid_rings() {
        let geom = CameraGeometry::from_raw("cam0", &camera().raw()).unwrap();
        assert_eq!(geom.control_points(&TransformOptions::default()).len(), 6 * 40 + 2 * 40 + 1);
        let plain = TransformOptions {
            mid_ring_control_points: false,
        };
        assert_eq!(geom.control_points(&plain).len(), 6 * 40 + 1);
    }

    #[test]
    fn transform_matches_the_synthetic_board() {
        let cam = camera();
        let cal = CameraCalibration::load("cam0", &cam.raw(), &TransformOptions::default()).unwrap();
        for (r, deg) in [(0.0, 0.0), (0.3, 40.0), (0.61, 200.0), (0.97, 311.0), (0.5, 359.0)] {
            let board = from_polar(r, deg);
            let got = cal.transform(cam.board_to_pixel(board));
            assert_relative_eq!(got.x, board.x, epsilon = 1e-6);
            assert_relative_eq!(got.y, board.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn untransform_round_trips_inside_the_hull() {
        let cal =
            CameraCalibration::load("cam0", &camera().raw(), &TransformOptions::default()).unwrap();
        for (r, deg) in [(0.05, 10.0), (0.4, 123.0), (0.8, 250.0), (0.99, 5.0)] {
            let p = from_polar(r, deg);
            let px = cal.untransform(p).expect("converges");
            let back = cal.transform(px);
            assert_relative_eq!(back.x, p.x, epsilon = 1e-8);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn vote_agrees_with_board_space_scoring() {
        let cam = camera().with_segment_20_index(7);
        let geom = CameraGeometry::from_raw("cam0", &cam.raw()).unwrap();
        for (r, deg) in [
            (0.02, 100.0),
            (0.07, 100.0),
            (0.3, 4.0),
            (0.6, 95.0),
            (0.8, 181.0),
            (0.98, 275.0),
            (1.1, 30.0),
        ] {
            let board = from_polar(r, deg);
            let vote = geom.vote(cam.board_to_pixel(board));
            let (radius, angle) = to_polar(board);
            let zone = Zone::from_radius(radius);
            assert_eq!(vote.zone, zone, "r={r} deg={deg}");
            match zone {
                Zone::Miss => assert_eq!(vote.segment, 0),
                z if z.is_bull() => assert_eq!(vote.segment, BULL_SEGMENT),
                _ => assert_eq!(vote.segment, SEGMENT_ORDER[wedge_index(angle)]),
            }
        }
    }

    #[test]
    fn validation_excludes_bad_entries() {
        let mut raw = camera().raw();
        raw.inner_triple_ellipse = None;
        assert!(matches!(
            CameraGeometry::from_raw("cam0", &raw),
            Err(CalibrationError::MissingRing {
                ring: Ring::InnerTriple,
                ..
            })
        ));

        let mut raw = camera().raw();
        raw.segment_angles.truncate(12);
        assert!(matches!(
            CameraGeometry::from_raw("cam0", &raw),
            Err(CalibrationError::ShortAngleTable { got: 12, .. })
        ));

        let mut raw = camera().raw();
        raw.segment_angles.swap(3, 11);
        assert!(matches!(
            CameraGeometry::from_raw("cam0", &raw),
            Err(CalibrationError::NonMonotonicAngles { .. })
        ));

        let mut raw = camera().raw();
        raw.segment_20_index = 20;
        assert!(matches!(
            CameraGeometry::from_raw("cam0", &raw),
            Err(CalibrationError::Segment20OutOfRange { index: 20, .. })
        ));

        let mut raw = camera().raw();
        raw.center[1] = f64::NAN;
        assert!(matches!(
            CameraGeometry::from_raw("cam0", &raw),
            Err(CalibrationError::NonFinite { field: "center", .. })
        ));
    }

    #[test]
    fn raw_round_trip_preserves_geometry() {
        let geom = CameraGeometry::from_raw("cam0", &camera().raw()).unwrap();
        let again = CameraGeometry::from_raw("cam0", &geom.to_raw()).unwrap();
        assert_eq!(geom, again);
    }
}
