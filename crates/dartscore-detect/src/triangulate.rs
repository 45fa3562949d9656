//! Camera lines in board space and their intersections.

use std::collections::BTreeMap;

use dartscore_calib::{CalibrationSet, CameraCalibration};
use dartscore_core::{closest_point_to_lines, fit_line, intersect_lines, Line2};
use log::debug;
use nalgebra::{Point2, Vector2};

use crate::config::TriangulationParams;
use crate::types::{CameraId, CameraRay, Exclusion, ThrowInput, TipDetection};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Intersection of two cameras' board lines.
#[derive(Clone, Debug, PartialEq)]
pub struct PairIntersection {
    pub a: CameraId,
    pub b: CameraId,
    pub point: Point2<f64>,
}

/// Board-space geometry of one throw.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Triangulation {
    /// Usable cameras, sorted by id.
    pub rays: Vec<CameraRay>,
    pub pairs: Vec<PairIntersection>,
    /// Least-squares point of all lines, with three or more cameras.
    pub tri: Option<Point2<f64>>,
    pub excluded: BTreeMap<CameraId, Exclusion>,
}

impl Triangulation {
    /// Best multi-camera landing estimate: the joint point, else the mean of
    /// the pair intersections.
    pub fn estimate(&self) -> Option<Point2<f64>> {
        if self.tri.is_some() || self.pairs.is_empty() {
            return self.tri;
        }
        let sum = self
            .pairs
            .iter()
            .fold(Vector2::zeros(), |acc, p| acc + p.point.coords);
        Some(Point2::from(sum / self.pairs.len() as f64))
    }
}

/// Why a detection cannot be used, if it cannot.
fn screen(det: &TipDetection, params: &TriangulationParams) -> Option<Exclusion> {
    if !det.reliable {
        Some(Exclusion::Unreliable)
    } else if !det.is_finite() {
        Some(Exclusion::NonFinite)
    } else if det.quality < params.quality_floor {
        Some(Exclusion::BelowQualityFloor {
            quality: det.quality,
        })
    } else {
        None
    }
}

/// Warp a camera's shaft into board space and fit a line through it.
///
/// Samples run from the far end of the shaft to the tip so the fit sees the
/// spline's curvature along the whole visible length.
pub fn camera_ray(
    cal: &CameraCalibration,
    det: &TipDetection,
    samples: usize,
) -> Option<CameraRay> {
    let start = det.line_start;
    // fall back to the reported line end when the tip sits on the start point
    let end = if (det.tip - start).norm() > 1e-9 {
        det.tip
    } else {
        det.line_end
    };
    let n = samples.max(2);
    let warped: Vec<Point2<f64>> = (0..n)
        .map(|i| {
            let t = i as f64 / (n - 1) as f64;
            cal.transform(start + (end - start) * t)
        })
        .collect();
    if warped.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return None;
    }

    let (mut line, spread) = fit_line(&warped)?;
    let origin = warped[0];
    let tip = cal.transform(det.tip);
    if line.direction.dot(&(tip - origin)) < 0.0 {
        line.direction = -line.direction;
    }
    // anchor the line at the foot of the tip so `along` reads from the tip
    line.point = line.at(line.along(tip));

    Some(CameraRay {
        camera: det.camera.clone(),
        line,
        origin,
        tip,
        quality: det.quality,
        spread,
        vote: cal.vote(det.tip),
    })
}

/// Map every usable detection into board space and intersect the lines.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(detections = input.detections.len())))]
pub fn triangulate(
    calibration: &CalibrationSet,
    input: &ThrowInput,
    params: &TriangulationParams,
) -> Triangulation {
    let mut out = Triangulation::default();
    let mut rays: BTreeMap<CameraId, CameraRay> = BTreeMap::new();

    for det in &input.detections {
        let camera = &det.camera;
        if rays.contains_key(camera) || out.excluded.contains_key(camera) {
            debug!("camera {camera}: duplicate detection ignored");
            out.excluded.entry(camera.clone()).or_insert(Exclusion::Duplicate);
            continue;
        }
        let Some(cal) = calibration.get(camera.as_str()) else {
            out.excluded.insert(camera.clone(), Exclusion::NotCalibrated);
            continue;
        };
        if let Some(reason) = screen(det, params) {
            debug!("camera {camera}: excluded ({reason:?})");
            out.excluded.insert(camera.clone(), reason);
            continue;
        }
        match camera_ray(cal, det, params.line_samples) {
            Some(ray) => {
                rays.insert(camera.clone(), ray);
            }
            None => {
                out.excluded.insert(camera.clone(), Exclusion::DegenerateLine);
            }
        }
    }
    out.rays = rays.into_values().collect();

    if out.rays.len() >= 2 {
        for (i, a) in out.rays.iter().enumerate() {
            for b in &out.rays[i + 1..] {
                let Some(point) = intersect_lines(&a.line, &b.line, params.parallel_epsilon) else {
                    debug!("pair {}/{}: near-parallel, dropped", a.camera, b.camera);
                    continue;
                };
                if point.coords.norm() > params.max_candidate_radius {
                    debug!("pair {}/{}: intersection off the board, dropped", a.camera, b.camera);
                    continue;
                }
                out.pairs.push(PairIntersection {
                    a: a.camera.clone(),
                    b: b.camera.clone(),
                    point,
                });
            }
        }
    }

    if out.rays.len() >= 3 {
        let weighted: Vec<(Line2, f64)> = out
            .rays
            .iter()
            .map(|r| (r.line, r.quality.max(1e-3)))
            .collect();
        out.tri = closest_point_to_lines(&weighted)
            .filter(|p| p.coords.norm() <= params.max_candidate_radius);
    }

    debug!(
        "triangulated {} rays, {} pairs, joint point {}",
        out.rays.len(),
        out.pairs.len(),
        if out.tri.is_some() { "found" } else { "absent" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dartscore_calib::synthetic::{calibration_document, three_camera_rig, SyntheticCamera};
    use dartscore_calib::TransformOptions;
    use dartscore_core::{from_polar, intersect_segments_as_lines};

    fn rig() -> CalibrationSet {
        let doc = calibration_document(&three_camera_rig());
        CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap()
    }

    /// Detection of a dart landing at `tip` whose shaft leans along `lean`.
    fn detection(cam: &SyntheticCamera, tip: Point2<f64>, lean: Vector2<f64>) -> TipDetection {
        TipDetection::new(
            cam.id.as_str(),
            cam.board_to_pixel(tip + lean),
            cam.board_to_pixel(tip),
            0.9,
        )
    }

    #[test]
    fn estimate_falls_back_to_the_pair_mean() {
        let pair = |a: &str, b: &str, x: f64, y: f64| PairIntersection {
            a: a.into(),
            b: b.into(),
            point: Point2::new(x, y),
        };
        let mut tri = Triangulation {
            pairs: vec![
                pair("cam0", "cam1", 0.2, 0.4),
                pair("cam0", "cam2", 0.3, 0.5),
                pair("cam1", "cam2", 0.4, 0.3),
            ],
            ..Default::default()
        };
        // joint point filtered out, e.g. beyond the candidate radius
        let mean = tri.estimate().unwrap();
        assert_relative_eq!(mean.x, 0.3, epsilon = 1e-12);
        assert_relative_eq!(mean.y, 0.4, epsilon = 1e-12);

        tri.tri = Some(Point2::new(0.1, 0.1));
        assert_eq!(tri.estimate(), Some(Point2::new(0.1, 0.1)));

        tri.pairs.truncate(1);
        tri.tri = None;
        assert_eq!(tri.estimate(), Some(Point2::new(0.2, 0.4)));
        assert_eq!(Triangulation::default().estimate(), None);
    }

    #[test]
    fn pair_intersection_matches_closed_form() {
        let set = rig();
        let cams = three_camera_rig();
        let tip = from_polar(0.45, 70.0);
        let input = ThrowInput::new(vec![
            detection(&cams[0], tip, Vector2::new(0.0, -0.3)),
            detection(&cams[1], tip, Vector2::new(0.25, 0.2)),
        ]);
        let tri = triangulate(&set, &input, &TriangulationParams::default());
        assert_eq!(tri.rays.len(), 2);
        assert_eq!(tri.pairs.len(), 1);
        assert!(tri.tri.is_none());

        let (a, b) = (&tri.rays[0], &tri.rays[1]);
        let closed = intersect_segments_as_lines(a.origin, a.tip, b.origin, b.tip, 1e-12).unwrap();
        let got = tri.pairs[0].point;
        assert_relative_eq!(got.x, closed.x, epsilon = 1e-8);
        assert_relative_eq!(got.y, closed.y, epsilon = 1e-8);
        assert_relative_eq!(got.x, tip.x, epsilon = 1e-6);
        assert_relative_eq!(got.y, tip.y, epsilon = 1e-6);
        assert_eq!(tri.estimate(), Some(got));
    }

    #[test]
    fn rays_point_toward_the_tip() {
        let set = rig();
        let cams = three_camera_rig();
        let tip = from_polar(0.3, 200.0);
        let det = detection(&cams[2], tip, Vector2::new(0.2, 0.1));
        let ray = camera_ray(set.get("cam2").unwrap(), &det, 21).unwrap();
        assert!(ray.line.direction.dot(&(ray.tip - ray.origin)) > 0.0);
        assert!(ray.spread < 1e-9);
        assert_relative_eq!(ray.tip.x, tip.x, epsilon = 1e-6);
    }

    #[test]
    fn unreliable_and_weak_cameras_are_excluded() {
        let set = rig();
        let cams = three_camera_rig();
        let tip = from_polar(0.6, 10.0);
        let mut weak = detection(&cams[2], tip, Vector2::new(-0.2, 0.2));
        weak.quality = 0.05;
        let input = ThrowInput::new(vec![
            detection(&cams[0], tip, Vector2::new(0.0, -0.3)),
            detection(&cams[1], tip, Vector2::new(0.3, 0.0)).unreliable(),
            weak,
            TipDetection::new("cam9", Point2::new(1.0, 1.0), Point2::new(2.0, 2.0), 1.0),
        ]);
        let tri = triangulate(&set, &input, &TriangulationParams::default());
        assert_eq!(tri.rays.len(), 1);
        assert!(tri.pairs.is_empty());
        assert_eq!(tri.excluded[&CameraId::from("cam1")], Exclusion::Unreliable);
        assert!(matches!(
            tri.excluded[&CameraId::from("cam2")],
            Exclusion::BelowQualityFloor { .. }
        ));
        assert_eq!(tri.excluded[&CameraId::from("cam9")], Exclusion::NotCalibrated);
    }

    #[test]
    fn parallel_lines_are_dropped() {
        let set = rig();
        let cams = three_camera_rig();
        let lean = Vector2::new(0.0, 0.4);
        let input = ThrowInput::new(vec![
            detection(&cams[0], from_polar(0.3, 90.0), lean),
            detection(&cams[1], from_polar(0.3, 270.0), lean),
        ]);
        let tri = triangulate(&set, &input, &TriangulationParams::default());
        assert_eq!(tri.rays.len(), 2);
        assert!(tri.pairs.is_empty());
        assert_eq!(tri.estimate(), None);
    }

    #[test]
    fn three_cameras_give_a_joint_point() {
        let set = rig();
        let cams = three_camera_rig();
        let tip = from_polar(0.97, 123.0);
        let input = ThrowInput::new(vec![
            detection(&cams[0], tip, Vector2::new(0.0, -0.3)),
            detection(&cams[1], tip, Vector2::new(0.3, 0.1)),
            detection(&cams[2], tip, Vector2::new(-0.25, 0.15)),
        ]);
        let tri = triangulate(&set, &input, &TriangulationParams::default());
        assert_eq!(tri.pairs.len(), 3);
        let joint = tri.tri.unwrap();
        assert_relative_eq!(joint.x, tip.x, epsilon = 1e-6);
        assert_relative_eq!(joint.y, tip.y, epsilon = 1e-6);
    }
}
