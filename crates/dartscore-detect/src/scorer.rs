//! Weighted robust scoring of candidates and winner selection.

use std::cmp::Ordering;

use dartscore_core::{to_polar, wedge_distance, wedge_index, Ring};
use log::debug;

use crate::config::ScoringParams;
use crate::types::{Candidate, CandidateSet, NormalizedFeatures, ScoredCandidate};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Scores closer than this are treated as equal.
const SCORE_TIE: f64 = 1e-12;
/// Wedges a winner may stray from the multi-camera estimate.
const MAX_WEDGE_STEP: usize = 1;

/// Index of the winner within `scored`, plus every candidate's score.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub winner: usize,
    pub scored: Vec<ScoredCandidate>,
}

impl Selection {
    pub fn winner(&self) -> &ScoredCandidate {
        &self.scored[self.winner]
    }
}

#[derive(Clone, Debug)]
pub struct RobustScorer<'a> {
    params: &'a ScoringParams,
}

fn ratio(n: usize, of: usize) -> f64 {
    if of == 0 {
        0.0
    } else {
        (n as f64 / of as f64).min(1.0)
    }
}

impl<'a> RobustScorer<'a> {
    pub fn new(params: &'a ScoringParams) -> Self {
        Self { params }
    }

    /// Map a candidate's raw features to `[0, 1]`, higher is better.
    pub fn normalize(&self, c: &Candidate, usable: usize) -> NormalizedFeatures {
        let f = &c.features;
        let p = self.params;
        let quality = if usable == 0 {
            0.0
        } else {
            (f.quality_inlier_sum / usable as f64).clamp(0.0, 1.0)
        };
        NormalizedFeatures {
            residual: 1.0 - (f.weighted_median_residual / p.residual_scale).min(1.0),
            inlier: ratio(f.inlier_count, usable),
            axis: ratio(f.axis_support, usable),
            quality,
            boundary: (f.ring_boundary_distance / p.boundary_scale).min(1.0),
            radial_delta: 1.0 - (f.radial_delta / p.radial_delta_scale).min(1.0),
            cameras: ratio(f.cameras_used, usable),
        }
    }

    /// Linear weighted sum of the normalised features.
    pub fn score(&self, n: &NormalizedFeatures) -> f64 {
        let w = &self.params.weights;
        w.residual * n.residual
            + w.inlier * n.inlier
            + w.axis * n.axis
            + w.quality * n.quality
            + w.boundary * n.boundary
            + w.radial_delta * n.radial_delta
            + w.cameras * n.cameras
    }

    /// `score / Σ weights`, in `[0, 1]`.
    pub fn confidence(&self, score: f64) -> f64 {
        let total = self.params.weights.sum();
        if total > 0.0 {
            (score / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Score every candidate and pick the winner, `None` for an empty set.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(candidates = set.candidates.len())))]
    pub fn select(&self, set: &CandidateSet) -> Option<Selection> {
        let usable = set.usable_cameras();
        let scored: Vec<ScoredCandidate> = set
            .candidates
            .iter()
            .map(|c| {
                let normalized = self.normalize(c, usable);
                ScoredCandidate {
                    candidate: c.clone(),
                    normalized,
                    score: self.score(&normalized),
                }
            })
            .collect();

        let winner = if self.params.use_whrs {
            (0..scored.len()).reduce(|best, i| {
                if beats(&scored[i], &scored[best]) {
                    i
                } else {
                    best
                }
            })?
        } else {
            (0..scored.len()).min_by(|&a, &b| {
                lowest_error_key(&scored[a].candidate)
                    .partial_cmp(&lowest_error_key(&scored[b].candidate))
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            })?
        };
        debug!(
            "winner {} (score {:.4}) of {} candidates",
            scored[winner].candidate.tag(),
            scored[winner].score,
            scored.len()
        );
        Some(Selection { winner, scored })
    }

    /// Pull a winner that strays more than one wedge from the multi-camera
    /// estimate back to the multi-camera candidate nearest that estimate.
    ///
    /// Positions inside the bull have no wedge and are left alone. Returns
    /// `true` when the winner changed.
    pub fn guard_wedge(&self, set: &CandidateSet, selection: &mut Selection) -> bool {
        if !self.params.wedge_guard {
            return false;
        }
        let Some(estimate) = set.estimate else {
            return false;
        };
        let bull = Ring::Bull.normalized_radius();
        let (radius, angle) = to_polar(estimate);
        let winner = &selection.winner().candidate;
        if radius <= bull || winner.radius <= bull {
            return false;
        }
        let step = wedge_distance(wedge_index(winner.angle_deg), wedge_index(angle));
        if step <= MAX_WEDGE_STEP {
            return false;
        }
        let fallback = selection
            .scored
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.candidate.kind.is_single())
            .min_by(|(_, a), (_, b)| {
                let da = (a.candidate.point - estimate).norm();
                let db = (b.candidate.point - estimate).norm();
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            })
            .map(|(i, _)| i);
        match fallback {
            Some(i) if i != selection.winner => {
                debug!(
                    "{} is {step} wedges from the estimate, falling back to {}",
                    winner.tag(),
                    selection.scored[i].candidate.tag()
                );
                selection.winner = i;
                true
            }
            _ => false,
        }
    }
}

/// `true` when `a` should replace the current best `b`. Earlier candidates
/// win full ties.
fn beats(a: &ScoredCandidate, b: &ScoredCandidate) -> bool {
    if (a.score - b.score).abs() > SCORE_TIE {
        return a.score > b.score;
    }
    let (fa, fb) = (&a.candidate.features, &b.candidate.features);
    if fa.cameras_used != fb.cameras_used {
        return fa.cameras_used > fb.cameras_used;
    }
    fa.weighted_median_residual < fb.weighted_median_residual
}

/// Selection key without the weighted score: multi-camera candidates
/// first, then lowest mean tip distance.
fn lowest_error_key(c: &Candidate) -> (bool, f64) {
    let f = &c.features;
    (
        c.kind.is_single(),
        f.tip_error / f.cameras_used.max(1) as f64,
    )
}

/// Multiplier backed by at least two votes with no equal rival.
pub fn majority_multiplier(votes: impl IntoIterator<Item = u8>) -> Option<u8> {
    let mut counts = [0usize; 4];
    for m in votes {
        if (1..=3).contains(&m) {
            counts[m as usize] += 1;
        }
    }
    let best = (1..=3).max_by_key(|&m| counts[m])?;
    let top = counts[best];
    let unique = (1..=3).filter(|&m| counts[m] == top).count() == 1;
    (top >= 2 && unique).then_some(best as u8)
}
