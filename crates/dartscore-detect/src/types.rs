//! Per-throw data contracts shared by every detection stage.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use dartscore_core::{ring_boundary_distance, to_polar, Line2, Zone};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

pub use dartscore_calib::CameraVote;

/// Camera identifier as used in the calibration document (`"cam0"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for CameraId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

fn default_reliable() -> bool {
    true
}

/// One camera's view of a dart, as produced by the vision front-end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TipDetection {
    pub camera: CameraId,
    /// Far end of the shaft, pixels.
    pub line_start: Point2<f64>,
    /// Shaft end toward the tip, pixels.
    pub line_end: Point2<f64>,
    /// Refined tip, pixels.
    pub tip: Point2<f64>,
    /// Tip before refinement, if the front-end reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tip: Option<Point2<f64>>,
    /// Mask quality in `[0, 1]`.
    pub quality: f64,
    #[serde(default = "default_reliable")]
    pub reliable: bool,
    /// Perpendicular residual of the shaft line fit, pixels.
    #[serde(default)]
    pub residual_px: f64,
}

impl TipDetection {
    /// A reliable detection with the shaft running from `line_start` to `tip`.
    pub fn new(
        camera: impl Into<CameraId>,
        line_start: Point2<f64>,
        tip: Point2<f64>,
        quality: f64,
    ) -> Self {
        Self {
            camera: camera.into(),
            line_start,
            line_end: tip,
            tip,
            raw_tip: None,
            quality,
            reliable: true,
            residual_px: 0.0,
        }
    }

    pub fn unreliable(mut self) -> Self {
        self.reliable = false;
        self
    }

    pub fn is_finite(&self) -> bool {
        [self.line_start, self.line_end, self.tip]
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite())
            && self.quality.is_finite()
    }
}

/// All detections for one throw.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrowInput {
    pub detections: Vec<TipDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dart_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
}

impl ThrowInput {
    pub fn new(detections: Vec<TipDetection>) -> Self {
        Self {
            detections,
            ..Default::default()
        }
    }
}

/// Why a camera did not take part in a throw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Exclusion {
    NotCalibrated,
    Unreliable,
    BelowQualityFloor { quality: f64 },
    NonFinite,
    DegenerateLine,
    Duplicate,
}

/// A usable camera's shaft mapped into board space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraRay {
    pub camera: CameraId,
    /// Fitted board line, direction pointing toward the tip.
    pub line: Line2,
    /// Warped far end of the shaft.
    pub origin: Point2<f64>,
    /// Warped tip.
    pub tip: Point2<f64>,
    pub quality: f64,
    /// RMS spread of the warped samples about the fitted line.
    pub spread: f64,
    /// Classification of the pixel tip against this camera's own rings.
    pub vote: CameraVote,
}

/// Where a candidate landing point came from.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Single(CameraId),
    Pair(CameraId, CameraId),
    Tri,
}

impl CandidateKind {
    /// Method tag reported with the result.
    pub fn tag(&self) -> String {
        self.to_string()
    }

    pub fn is_single(&self) -> bool {
        matches!(self, CandidateKind::Single(_))
    }

    pub fn single_camera(&self) -> Option<&CameraId> {
        match self {
            CandidateKind::Single(cam) => Some(cam),
            _ => None,
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::Single(cam) => write!(f, "single_{cam}"),
            CandidateKind::Pair(a, b) => write!(f, "pair_{a}_{b}"),
            CandidateKind::Tri => f.write_str("tri"),
        }
    }
}

/// Evidence attached to a candidate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFeatures {
    /// Perpendicular distance to each usable camera's board line.
    pub residuals: BTreeMap<CameraId, f64>,
    /// Quality-weighted median of `residuals`.
    pub weighted_median_residual: f64,
    pub inlier_count: usize,
    pub axis_support: usize,
    pub quality_inlier_sum: f64,
    pub quality_inlier_max: f64,
    pub cameras_used: usize,
    /// `|r - r_best|` against the multi-camera estimate, 0 without one.
    pub radial_delta: f64,
    pub ring_boundary_distance: f64,
    /// Summed distance to the warped tips of the cameras that built it.
    pub tip_error: f64,
}

impl CandidateFeatures {
    pub fn total_residual(&self) -> f64 {
        self.residuals.values().sum()
    }
}

/// A hypothesised landing point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub point: Point2<f64>,
    pub radius: f64,
    /// Clockwise from the top, degrees.
    pub angle_deg: f64,
    pub features: CandidateFeatures,
    /// Set once a bias correction moved the point.
    #[serde(default)]
    pub bias_corrected: bool,
}

impl Candidate {
    pub fn new(kind: CandidateKind, point: Point2<f64>) -> Self {
        let mut c = Self {
            kind,
            point,
            radius: 0.0,
            angle_deg: 0.0,
            features: CandidateFeatures::default(),
            bias_corrected: false,
        };
        c.move_to(point);
        c
    }

    /// Move the candidate and refresh its polar form.
    pub fn move_to(&mut self, point: Point2<f64>) {
        let (radius, angle_deg) = to_polar(point);
        self.point = point;
        self.radius = radius;
        self.angle_deg = angle_deg;
        self.features.ring_boundary_distance = ring_boundary_distance(radius);
    }

    pub fn tag(&self) -> String {
        self.kind.tag()
    }
}

/// Request-owned working set for one throw.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    pub rays: Vec<CameraRay>,
    /// Best multi-camera estimate, if at least two cameras intersect.
    pub estimate: Option<Point2<f64>>,
    pub excluded: BTreeMap<CameraId, Exclusion>,
}

impl CandidateSet {
    pub fn usable_cameras(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn has_multi_camera(&self) -> bool {
        self.candidates.iter().any(|c| !c.kind.is_single())
    }
}

/// Candidate features mapped to `[0, 1]`, higher is better.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatures {
    pub residual: f64,
    pub inlier: f64,
    pub axis: f64,
    pub quality: f64,
    pub boundary: f64,
    pub radial_delta: f64,
    pub cameras: f64,
}

/// A candidate together with its robust score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub normalized: NormalizedFeatures,
    pub score: f64,
}

/// Raw inputs and intermediate state, kept apart from the scoring fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionDiagnostics {
    pub detections: Vec<TipDetection>,
    pub rays: Vec<CameraRay>,
    pub excluded: BTreeMap<CameraId, Exclusion>,
    pub estimate: Option<Point2<f64>>,
    pub candidates: Vec<ScoredCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dart_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
}

/// Final answer for one throw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub segment: u8,
    pub multiplier: u8,
    pub score: u16,
    pub zone: Zone,
    /// Tag of the winning candidate (`tri`, `pair_a_b`, `single_a`).
    pub method: String,
    pub confidence: f64,
    pub total_error: f64,
    pub per_camera: BTreeMap<CameraId, CameraVote>,
    pub coords: Point2<f64>,
    pub radius: f64,
    pub angle_deg: f64,
    pub boundary_distance_deg: f64,
    pub multiplier_overridden: bool,
    pub miss_overridden: bool,
    /// The winner strayed too far from the multi-camera estimate and was
    /// replaced.
    #[serde(default)]
    pub wedge_guarded: bool,
    /// The segment was re-selected from the per-camera angle spread.
    #[serde(default)]
    pub wedge_refined: bool,
    pub candidates_considered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DetectionDiagnostics>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDetectionReason {
    NoDetections,
    NoUsableCamera,
    NoCandidates,
}

impl fmt::Display for NoDetectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoDetectionReason::NoDetections => "no detections",
            NoDetectionReason::NoUsableCamera => "no usable camera",
            NoDetectionReason::NoCandidates => "no candidate landing point",
        };
        f.write_str(s)
    }
}

/// Result of [`crate::DartDetector::detect`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThrowOutcome {
    Detected(DetectionResult),
    NoDetection { reason: NoDetectionReason },
}

impl ThrowOutcome {
    pub fn detection(&self) -> Option<&DetectionResult> {
        match self {
            ThrowOutcome::Detected(r) => Some(r),
            ThrowOutcome::NoDetection { .. } => None,
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detection().is_some()
    }
}
