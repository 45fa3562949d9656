//! Wedge re-selection from angular uncertainty.
//!
//! A scored point close to a wedge boundary may sit on the wrong side of
//! it. The per-camera tip angles give a centre and a spread; a Gaussian
//! with those parameters is integrated over the scored wedge and its two
//! neighbours, and a neighbour that is clearly more likely takes over.
//! Radius, ring and multiplier are never touched.

use std::f64::consts::FRAC_1_SQRT_2;

use dartscore_core::{boundary_distance_deg, wedge_index, wrap_deg, SEGMENT_ORDER, WEDGE_DEG};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::AngularParams;

/// Floor for the primary wedge's probability in the margin ratio.
const PROB_EPS: f64 = 1e-6;

/// Why a wedge was or was not reconsidered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WedgeDecision {
    Disabled,
    NotNearBoundary,
    TooFewCameras,
    CameraDisagreement,
    SigmaTooLow,
    SigmaTooHigh,
    KeepPrimary,
    Switched,
}

/// Outcome of [`refine_wedge`]. `wedge` indexes [`SEGMENT_ORDER`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WedgeRefinement {
    pub decision: WedgeDecision,
    pub primary: usize,
    pub wedge: usize,
    pub mean_deg: f64,
    pub sigma_deg: f64,
    pub spread_deg: f64,
    /// Probability mass of the left neighbour, the primary and the right
    /// neighbour.
    pub probabilities: [f64; 3],
}

impl WedgeRefinement {
    fn skipped(decision: WedgeDecision, primary: usize) -> Self {
        Self {
            decision,
            primary,
            wedge: primary,
            mean_deg: f64::NAN,
            sigma_deg: f64::NAN,
            spread_deg: f64::NAN,
            probabilities: [0.0; 3],
        }
    }

    pub fn switched(&self) -> bool {
        self.decision == WedgeDecision::Switched
    }

    pub fn segment(&self) -> u8 {
        SEGMENT_ORDER[self.wedge]
    }
}

/// Signed `a - b` in `(-180, 180]` degrees.
fn angle_diff(a: f64, b: f64) -> f64 {
    let d = wrap_deg(a - b);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

fn circular_mean(angles: &[f64]) -> f64 {
    let (s, c) = angles.iter().fold((0.0, 0.0), |(s, c), a| {
        let r = a.to_radians();
        (s + r.sin(), c + r.cos())
    });
    wrap_deg(s.atan2(c).to_degrees())
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A: [f64; 5] = [
        0.254_829_592,
        -0.284_496_736,
        1.421_413_741,
        -1.453_152_027,
        1.061_405_429,
    ];
    let t = 1.0 / (1.0 + P * x.abs());
    let poly = A.iter().rev().fold(0.0, |acc, a| acc * t + a) * t;
    let y = 1.0 - poly * (-x * x).exp();
    y.copysign(x)
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z * FRAC_1_SQRT_2))
}

/// Probability mass of `N(mean, sigma)` over a wedge, with the wedge
/// unwrapped next to the mean.
fn wedge_probability(wedge: usize, mean_deg: f64, sigma_deg: f64) -> f64 {
    let centre = wedge as f64 * WEDGE_DEG;
    let offset = angle_diff(centre, mean_deg);
    let lo = (offset - WEDGE_DEG * 0.5) / sigma_deg;
    let hi = (offset + WEDGE_DEG * 0.5) / sigma_deg;
    (normal_cdf(hi) - normal_cdf(lo)).max(0.0)
}

/// Reconsider the wedge of a point scored at `angle_deg`, given every usable
/// camera's own tip angle.
pub fn refine_wedge(angle_deg: f64, camera_angles: &[f64], params: &AngularParams) -> WedgeRefinement {
    let primary = wedge_index(angle_deg);
    if !params.enabled {
        return WedgeRefinement::skipped(WedgeDecision::Disabled, primary);
    }
    if boundary_distance_deg(angle_deg) > params.near_boundary_deg {
        return WedgeRefinement::skipped(WedgeDecision::NotNearBoundary, primary);
    }
    if camera_angles.len() < 2 {
        return WedgeRefinement::skipped(WedgeDecision::TooFewCameras, primary);
    }

    let mut spread_deg: f64 = 0.0;
    for (i, a) in camera_angles.iter().enumerate() {
        for b in &camera_angles[i + 1..] {
            spread_deg = spread_deg.max(angle_diff(*a, *b).abs());
        }
    }
    let mean_deg = circular_mean(camera_angles);
    let var = camera_angles
        .iter()
        .map(|a| angle_diff(*a, mean_deg).powi(2))
        .sum::<f64>()
        / camera_angles.len() as f64;
    let sigma_deg = var.sqrt();
    let skip = |decision: WedgeDecision| WedgeRefinement {
        decision,
        mean_deg,
        sigma_deg,
        spread_deg,
        ..WedgeRefinement::skipped(decision, primary)
    };
    if spread_deg > params.max_camera_spread_deg {
        return skip(WedgeDecision::CameraDisagreement);
    }
    if sigma_deg < params.min_sigma_deg {
        return skip(WedgeDecision::SigmaTooLow);
    }
    if sigma_deg > params.max_sigma_deg {
        return skip(WedgeDecision::SigmaTooHigh);
    }

    let n = SEGMENT_ORDER.len();
    let wedges = [(primary + n - 1) % n, primary, (primary + 1) % n];
    let probabilities = wedges.map(|w| wedge_probability(w, mean_deg, sigma_deg));
    let p_primary = probabilities[1];
    let (best, p_best) = [0, 2]
        .into_iter()
        .map(|i| (wedges[i], probabilities[i]))
        .fold((primary, p_primary), |best, cand| if cand.1 > best.1 { cand } else { best });

    let ratio = p_best / p_primary.max(PROB_EPS);
    let switch = best != primary && ratio >= params.prob_margin;
    if switch {
        debug!(
            "wedge {} -> {} (mean {mean_deg:.2}, sigma {sigma_deg:.2}, ratio {ratio:.2})",
            SEGMENT_ORDER[primary], SEGMENT_ORDER[best]
        );
    }
    WedgeRefinement {
        decision: if switch {
            WedgeDecision::Switched
        } else {
            WedgeDecision::KeepPrimary
        },
        primary,
        wedge: if switch { best } else { primary },
        mean_deg,
        sigma_deg,
        spread_deg,
        probabilities,
    }
}
