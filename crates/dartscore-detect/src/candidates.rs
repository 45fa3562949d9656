//! Candidate landing points and their evidence features.
//!
//! Every valid pair intersection, the joint point and every single-camera
//! tip are kept side by side; choosing among them is left to the scorer.

use std::collections::BTreeMap;

use dartscore_core::{ring_boundary_distance, weighted_median};
use nalgebra::Point2;

use crate::config::CandidateParams;
use crate::triangulate::Triangulation;
use crate::types::{CameraRay, Candidate, CandidateFeatures, CandidateKind, CandidateSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Builds and annotates the candidate set of a throw.
#[derive(Clone, Debug)]
pub struct CandidateGenerator<'a> {
    params: &'a CandidateParams,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(params: &'a CandidateParams) -> Self {
        Self { params }
    }

    /// Enumerate candidates in a fixed order: joint point, pairs, singles.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(rays = tri.rays.len())))]
    pub fn generate(&self, tri: Triangulation) -> CandidateSet {
        let estimate = tri.estimate();
        let mut candidates = Vec::new();

        if let Some(p) = tri.tri {
            candidates.push(Candidate::new(CandidateKind::Tri, p));
        }
        if self.params.enable_pairs {
            candidates.extend(tri.pairs.iter().map(|pair| {
                Candidate::new(CandidateKind::Pair(pair.a.clone(), pair.b.clone()), pair.point)
            }));
        }
        // singles stay in when nothing else would be left
        if self.params.enable_singles || candidates.is_empty() {
            candidates.extend(
                tri.rays
                    .iter()
                    .map(|ray| Candidate::new(CandidateKind::Single(ray.camera.clone()), ray.tip)),
            );
        }

        let mut set = CandidateSet {
            candidates,
            rays: tri.rays,
            estimate,
            excluded: tri.excluded,
        };
        self.annotate(&mut set);
        set
    }

    /// Recompute every candidate's features from its current point.
    pub fn annotate(&self, set: &mut CandidateSet) {
        let CandidateSet {
            candidates,
            rays,
            estimate,
            ..
        } = set;
        for c in candidates.iter_mut() {
            c.features = features(&c.kind, c.point, rays, *estimate, self.params);
        }
    }
}

/// `true` when the shaft of `ray` points at `p` within `tol_deg`.
fn axis_supports(ray: &CameraRay, p: Point2<f64>, tol_deg: f64) -> bool {
    let to_p = p - ray.origin;
    let n = to_p.norm();
    if n < 1e-12 {
        return false;
    }
    let cos = (ray.line.direction.dot(&to_p) / n).clamp(-1.0, 1.0);
    cos.acos().to_degrees() <= tol_deg
}

fn features(
    kind: &CandidateKind,
    p: Point2<f64>,
    rays: &[CameraRay],
    estimate: Option<Point2<f64>>,
    params: &CandidateParams,
) -> CandidateFeatures {
    let residuals: BTreeMap<_, _> = rays
        .iter()
        .map(|r| (r.camera.clone(), r.line.distance(p)))
        .collect();

    let samples: Vec<(f64, f64)> = rays
        .iter()
        .map(|r| (residuals[&r.camera], r.quality.max(1e-6)))
        .collect();
    let weighted_median_residual = weighted_median(&samples).unwrap_or(0.0);

    let inliers: Vec<&CameraRay> = rays
        .iter()
        .filter(|r| residuals[&r.camera] < params.inlier_threshold)
        .collect();
    let quality_inlier_sum = inliers.iter().map(|r| r.quality).sum();
    let quality_inlier_max = inliers.iter().map(|r| r.quality).fold(0.0, f64::max);

    let axis_support = rays
        .iter()
        .filter(|r| axis_supports(r, p, params.axis_tolerance_deg))
        .count();

    let involved: Vec<&CameraRay> = match kind {
        CandidateKind::Single(cam) => rays.iter().filter(|r| &r.camera == cam).collect(),
        CandidateKind::Pair(a, b) => rays
            .iter()
            .filter(|r| &r.camera == a || &r.camera == b)
            .collect(),
        CandidateKind::Tri => rays.iter().collect(),
    };
    let tip_error = involved.iter().map(|r| (p - r.tip).norm()).sum();

    let radius = p.coords.norm();
    let radial_delta = estimate.map_or(0.0, |e| (radius - e.coords.norm()).abs());

    CandidateFeatures {
        weighted_median_residual,
        inlier_count: inliers.len(),
        axis_support,
        quality_inlier_sum,
        quality_inlier_max,
        cameras_used: involved.len(),
        radial_delta,
        ring_boundary_distance: ring_boundary_distance(radius),
        tip_error,
        residuals,
    }
}
