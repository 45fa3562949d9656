//! Detector configuration and the typed runtime flag registry.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use dartscore_calib::TransformOptions;
use log::info;
use serde::{Deserialize, Serialize};

use crate::bias::BiasMode;
use crate::error::{ConfigError, DetectIoError};

/// Which cameras take part and how their lines are mapped to the board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationParams {
    /// Detections with a mask quality below this are ignored.
    pub quality_floor: f64,
    /// Points sampled along each pixel line before warping.
    pub line_samples: usize,
    /// Minimum `|d1 × d2|` for two board lines to be intersected.
    pub parallel_epsilon: f64,
    /// Intersections farther from the center than this are dropped.
    pub max_candidate_radius: f64,
}

impl Default for TriangulationParams {
    fn default() -> Self {
        Self {
            quality_floor: 0.10,
            line_samples: 21,
            parallel_epsilon: 1e-3,
            max_candidate_radius: 1.3,
        }
    }
}

/// Candidate enumeration and feature thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateParams {
    pub enable_pairs: bool,
    pub enable_singles: bool,
    /// Residual below which a camera counts as an inlier, board units.
    pub inlier_threshold: f64,
    /// Tolerance between a shaft direction and the direction to the
    /// candidate, degrees.
    pub axis_tolerance_deg: f64,
}

impl Default for CandidateParams {
    fn default() -> Self {
        Self {
            enable_pairs: true,
            enable_singles: true,
            inlier_threshold: 0.015,
            axis_tolerance_deg: 3.0,
        }
    }
}

/// Per-camera bias-field correction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasParams {
    pub enabled: bool,
    pub mode: BiasMode,
    pub max_angle_correction_deg: f64,
    pub max_radius_correction: f64,
    /// Learn-mode gate: largest radial disagreement with the multi-camera
    /// estimate that is still logged.
    pub learn_max_radial_delta: f64,
    /// Learn-mode gate: largest wedge disagreement that is still logged.
    pub learn_max_wedge_distance: usize,
}

impl Default for BiasParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: BiasMode::Disabled,
            max_angle_correction_deg: 2.0,
            max_radius_correction: 0.05,
            learn_max_radial_delta: 0.1,
            learn_max_wedge_distance: 1,
        }
    }
}

impl BiasParams {
    /// Mode in effect once the master switch is taken into account.
    pub fn effective_mode(&self) -> BiasMode {
        if self.enabled {
            self.mode
        } else {
            BiasMode::Disabled
        }
    }
}

/// Feature weights of the robust score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhrsWeights {
    pub residual: f64,
    pub inlier: f64,
    pub axis: f64,
    pub quality: f64,
    pub boundary: f64,
    pub radial_delta: f64,
    pub cameras: f64,
}

impl Default for WhrsWeights {
    fn default() -> Self {
        Self {
            residual: 0.30,
            inlier: 0.15,
            axis: 0.20,
            quality: 0.10,
            boundary: 0.10,
            radial_delta: 0.10,
            cameras: 0.05,
        }
    }
}

impl WhrsWeights {
    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    pub fn as_array(&self) -> [f64; 7] {
        [
            self.residual,
            self.inlier,
            self.axis,
            self.quality,
            self.boundary,
            self.radial_delta,
            self.cameras,
        ]
    }
}

/// Winner selection and the post-selection overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub use_whrs: bool,
    pub weights: WhrsWeights,
    /// Residual at which the residual feature reaches zero.
    pub residual_scale: f64,
    /// Ring distance at which the boundary feature saturates.
    pub boundary_scale: f64,
    /// Radial delta at which the radial feature reaches zero.
    pub radial_delta_scale: f64,
    pub multiplier_vote: bool,
    pub miss_override: bool,
    /// Fall back to the multi-camera estimate when the winner lands more
    /// than one wedge away from it.
    pub wedge_guard: bool,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            use_whrs: true,
            weights: WhrsWeights::default(),
            residual_scale: 0.05,
            boundary_scale: 0.02,
            radial_delta_scale: 0.05,
            multiplier_vote: true,
            miss_override: true,
            wedge_guard: true,
        }
    }
}

/// Wedge re-selection from the spread of the per-camera tip angles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngularParams {
    pub enabled: bool,
    /// Only angles this close to a wedge boundary are reconsidered, degrees.
    pub near_boundary_deg: f64,
    pub min_sigma_deg: f64,
    pub max_sigma_deg: f64,
    /// Cameras whose tip angles differ by more than this disagree too much
    /// to be trusted, degrees.
    pub max_camera_spread_deg: f64,
    /// A neighbour must be this many times as likely as the scored wedge.
    pub prob_margin: f64,
}

impl Default for AngularParams {
    fn default() -> Self {
        Self {
            enabled: false,
            near_boundary_deg: 2.0,
            min_sigma_deg: 0.6,
            max_sigma_deg: 6.0,
            max_camera_spread_deg: 10.0,
            prob_margin: 1.10,
        }
    }
}

/// Full detector configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub transform: TransformOptions,
    pub triangulation: TriangulationParams,
    pub candidates: CandidateParams,
    pub bias: BiasParams,
    pub scoring: ScoringParams,
    pub angular: AngularParams,
    pub emit_diagnostics: bool,
}

fn check(ok: bool, field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, reason })
    }
}

impl DetectorConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.triangulation;
        check(
            (0.0..=1.0).contains(&t.quality_floor),
            "triangulation.quality_floor",
            "must be in [0, 1]",
        )?;
        check(t.line_samples >= 2, "triangulation.line_samples", "must be at least 2")?;
        check(
            t.parallel_epsilon > 0.0 && t.parallel_epsilon < 1.0,
            "triangulation.parallel_epsilon",
            "must be in (0, 1)",
        )?;
        check(
            t.max_candidate_radius > 0.0,
            "triangulation.max_candidate_radius",
            "must be positive",
        )?;

        let c = &self.candidates;
        check(c.inlier_threshold > 0.0, "candidates.inlier_threshold", "must be positive")?;
        check(
            (0.0..=90.0).contains(&c.axis_tolerance_deg),
            "candidates.axis_tolerance_deg",
            "must be in [0, 90]",
        )?;

        let b = &self.bias;
        check(
            b.max_angle_correction_deg >= 0.0,
            "bias.max_angle_correction_deg",
            "must not be negative",
        )?;
        check(
            b.max_radius_correction >= 0.0,
            "bias.max_radius_correction",
            "must not be negative",
        )?;

        let s = &self.scoring;
        check(
            s.weights.as_array().iter().all(|w| w.is_finite() && *w >= 0.0),
            "scoring.weights",
            "must be finite and non-negative",
        )?;
        check(s.weights.sum() > 0.0, "scoring.weights", "must not all be zero")?;
        check(
            s.residual_scale > 0.0 && s.boundary_scale > 0.0 && s.radial_delta_scale > 0.0,
            "scoring",
            "feature scales must be positive",
        )?;

        let a = &self.angular;
        check(
            (0.0..=9.0).contains(&a.near_boundary_deg),
            "angular.near_boundary_deg",
            "must be in [0, 9]",
        )?;
        check(
            a.min_sigma_deg > 0.0 && a.max_sigma_deg >= a.min_sigma_deg,
            "angular",
            "sigma bounds must be positive and ordered",
        )?;
        check(a.prob_margin >= 1.0, "angular.prob_margin", "must be at least 1")?;
        Ok(())
    }

    /// Load and validate a JSON config.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DetectIoError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DetectIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Current value of a flag in its integer encoding.
    pub fn get_flag(&self, flag: Flag) -> i64 {
        let hundredths = |v: f64| (v * 100.0).round() as i64;
        let b = |v: bool| v as i64;
        match flag {
            Flag::UseMidRingControlPoints => b(self.transform.mid_ring_control_points),
            Flag::QualityFloor => hundredths(self.triangulation.quality_floor),
            Flag::HhsEnablePairCandidates => b(self.candidates.enable_pairs),
            Flag::HhsEnableSingleCameraCandidates => b(self.candidates.enable_singles),
            Flag::HhsR1 => (self.candidates.inlier_threshold * 10_000.0).round() as i64,
            Flag::HhsAxisToleranceDeg => self.candidates.axis_tolerance_deg.round() as i64,
            Flag::UseCameraBiasFieldCorrection => b(self.bias.enabled),
            Flag::CbfcMode => self.bias.mode.code(),
            Flag::UseWhrs => b(self.scoring.use_whrs),
            Flag::WhrsWR => hundredths(self.scoring.weights.residual),
            Flag::WhrsWI => hundredths(self.scoring.weights.inlier),
            Flag::WhrsWA => hundredths(self.scoring.weights.axis),
            Flag::WhrsWQ => hundredths(self.scoring.weights.quality),
            Flag::WhrsWB => hundredths(self.scoring.weights.boundary),
            Flag::WhrsWD => hundredths(self.scoring.weights.radial_delta),
            Flag::WhrsWC => hundredths(self.scoring.weights.cameras),
            Flag::UseMultiplierVote => b(self.scoring.multiplier_vote),
            Flag::UseMissOverride => b(self.scoring.miss_override),
            Flag::HhsWedgeGuard => b(self.scoring.wedge_guard),
            Flag::UseAup => b(self.angular.enabled),
            Flag::EmitDiagnostics => b(self.emit_diagnostics),
        }
    }

    /// Apply one flag. The config is unchanged on error.
    pub fn set_flag(&mut self, flag: Flag, value: i64) -> Result<(), ConfigError> {
        let invalid = |reason: &'static str| ConfigError::InvalidValue {
            flag,
            value,
            reason,
        };
        let boolean = || match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(invalid("expected 0 or 1")),
        };
        let percent = || {
            if (0..=100).contains(&value) {
                Ok(value as f64 / 100.0)
            } else {
                Err(invalid("expected hundredths in 0..=100"))
            }
        };

        let mut next = self.clone();
        match flag {
            Flag::UseMidRingControlPoints => next.transform.mid_ring_control_points = boolean()?,
            Flag::QualityFloor => next.triangulation.quality_floor = percent()?,
            Flag::HhsEnablePairCandidates => next.candidates.enable_pairs = boolean()?,
            Flag::HhsEnableSingleCameraCandidates => next.candidates.enable_singles = boolean()?,
            Flag::HhsR1 => {
                if !(1..=10_000).contains(&value) {
                    return Err(invalid("expected ten-thousandths in 1..=10000"));
                }
                next.candidates.inlier_threshold = value as f64 / 10_000.0;
            }
            Flag::HhsAxisToleranceDeg => {
                if !(0..=90).contains(&value) {
                    return Err(invalid("expected degrees in 0..=90"));
                }
                next.candidates.axis_tolerance_deg = value as f64;
            }
            Flag::UseCameraBiasFieldCorrection => next.bias.enabled = boolean()?,
            Flag::CbfcMode => {
                next.bias.mode =
                    BiasMode::from_code(value).ok_or_else(|| invalid("expected 0, 1 or 2"))?;
            }
            Flag::UseWhrs => next.scoring.use_whrs = boolean()?,
            Flag::WhrsWR => next.scoring.weights.residual = percent()?,
            Flag::WhrsWI => next.scoring.weights.inlier = percent()?,
            Flag::WhrsWA => next.scoring.weights.axis = percent()?,
            Flag::WhrsWQ => next.scoring.weights.quality = percent()?,
            Flag::WhrsWB => next.scoring.weights.boundary = percent()?,
            Flag::WhrsWD => next.scoring.weights.radial_delta = percent()?,
            Flag::WhrsWC => next.scoring.weights.cameras = percent()?,
            Flag::UseMultiplierVote => next.scoring.multiplier_vote = boolean()?,
            Flag::UseMissOverride => next.scoring.miss_override = boolean()?,
            Flag::HhsWedgeGuard => next.scoring.wedge_guard = boolean()?,
            Flag::UseAup => next.angular.enabled = boolean()?,
            Flag::EmitDiagnostics => next.emit_diagnostics = boolean()?,
        }
        next.validate()
            .map_err(|_| invalid("leaves the configuration invalid"))?;
        *self = next;
        Ok(())
    }
}

/// Every runtime flag the detector recognises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Flag {
    UseMidRingControlPoints,
    QualityFloor,
    HhsEnablePairCandidates,
    HhsEnableSingleCameraCandidates,
    HhsR1,
    HhsAxisToleranceDeg,
    UseCameraBiasFieldCorrection,
    CbfcMode,
    UseWhrs,
    WhrsWR,
    WhrsWI,
    WhrsWA,
    WhrsWQ,
    WhrsWB,
    WhrsWD,
    WhrsWC,
    UseMultiplierVote,
    UseMissOverride,
    HhsWedgeGuard,
    UseAup,
    EmitDiagnostics,
}

impl Flag {
    pub const ALL: [Flag; 21] = [
        Flag::UseMidRingControlPoints,
        Flag::QualityFloor,
        Flag::HhsEnablePairCandidates,
        Flag::HhsEnableSingleCameraCandidates,
        Flag::HhsR1,
        Flag::HhsAxisToleranceDeg,
        Flag::UseCameraBiasFieldCorrection,
        Flag::CbfcMode,
        Flag::UseWhrs,
        Flag::WhrsWR,
        Flag::WhrsWI,
        Flag::WhrsWA,
        Flag::WhrsWQ,
        Flag::WhrsWB,
        Flag::WhrsWD,
        Flag::WhrsWC,
        Flag::UseMultiplierVote,
        Flag::UseMissOverride,
        Flag::HhsWedgeGuard,
        Flag::UseAup,
        Flag::EmitDiagnostics,
    ];

    /// External flag name.
    pub fn name(self) -> &'static str {
        match self {
            Flag::UseMidRingControlPoints => "UseMidRingControlPoints",
            Flag::QualityFloor => "QualityFloor",
            Flag::HhsEnablePairCandidates => "HHS_EnablePairCandidates",
            Flag::HhsEnableSingleCameraCandidates => "HHS_EnableSingleCameraCandidates",
            Flag::HhsR1 => "HHS_R1",
            Flag::HhsAxisToleranceDeg => "HHS_AxisToleranceDeg",
            Flag::UseCameraBiasFieldCorrection => "UseCameraBiasFieldCorrection",
            Flag::CbfcMode => "CBFC_Mode",
            Flag::UseWhrs => "UseWHRS",
            Flag::WhrsWR => "WHRS_wR",
            Flag::WhrsWI => "WHRS_wI",
            Flag::WhrsWA => "WHRS_wA",
            Flag::WhrsWQ => "WHRS_wQ",
            Flag::WhrsWB => "WHRS_wB",
            Flag::WhrsWD => "WHRS_wD",
            Flag::WhrsWC => "WHRS_wC",
            Flag::UseMultiplierVote => "UseMultiplierVote",
            Flag::UseMissOverride => "UseMissOverride",
            Flag::HhsWedgeGuard => "HHS_WedgeGuard",
            Flag::UseAup => "UseAUP",
            Flag::EmitDiagnostics => "EmitDiagnostics",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Flag::UseMidRingControlPoints => "interpolated rings in the spline fit (refits calibration)",
            Flag::QualityFloor => "minimum mask quality, hundredths",
            Flag::HhsEnablePairCandidates => "emit pairwise intersection candidates",
            Flag::HhsEnableSingleCameraCandidates => "emit single-camera candidates",
            Flag::HhsR1 => "inlier residual threshold, ten-thousandths of board radius",
            Flag::HhsAxisToleranceDeg => "shaft axis support tolerance, degrees",
            Flag::UseCameraBiasFieldCorrection => "master switch for bias correction",
            Flag::CbfcMode => "bias correction mode: 0 disabled, 1 learn, 2 apply",
            Flag::UseWhrs => "robust weighted scoring (0 selects by lowest tip error)",
            Flag::WhrsWR => "residual weight, hundredths",
            Flag::WhrsWI => "inlier ratio weight, hundredths",
            Flag::WhrsWA => "axis support weight, hundredths",
            Flag::WhrsWQ => "quality weight, hundredths",
            Flag::WhrsWB => "ring boundary distance weight, hundredths",
            Flag::WhrsWD => "radial delta weight, hundredths",
            Flag::WhrsWC => "camera count weight, hundredths",
            Flag::UseMultiplierVote => "majority vote multiplier override",
            Flag::UseMissOverride => "turn edge doubles into misses when tips leave the board",
            Flag::HhsWedgeGuard => "keep the winner within one wedge of the multi-camera estimate",
            Flag::UseAup => "re-select near-boundary wedges from camera angle spread",
            Flag::EmitDiagnostics => "attach diagnostics to every result",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Flag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| ConfigError::UnknownFlag(s.to_string()))
    }
}

/// Shared, swappable configuration.
///
/// Each throw works on an `Arc` snapshot, so a flag change never affects a
/// throw already in flight.
#[derive(Debug)]
pub struct ConfigRegistry {
    current: RwLock<Arc<DetectorConfig>>,
}

impl ConfigRegistry {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn snapshot(&self) -> Arc<DetectorConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, config: DetectorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }

    /// Set a flag by name and return the config now in effect.
    pub fn set_flag(&self, name: &str, value: i64) -> Result<Arc<DetectorConfig>, ConfigError> {
        let flag: Flag = name.parse()?;
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = DetectorConfig::clone(&guard);
        next.set_flag(flag, value)?;
        info!("flag {flag} = {value}");
        *guard = Arc::new(next);
        Ok(guard.clone())
    }

    pub fn get_flag(&self, name: &str) -> Result<i64, ConfigError> {
        let flag: Flag = name.parse()?;
        Ok(self.snapshot().get_flag(flag))
    }

    /// `(flag, value)` for every recognised flag.
    pub fn flags(&self) -> Vec<(Flag, i64)> {
        let config = self.snapshot();
        Flag::ALL.iter().map(|&f| (f, config.get_flag(f))).collect()
    }
}
