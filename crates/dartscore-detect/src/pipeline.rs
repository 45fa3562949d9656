//! The end-to-end throw detector.

use std::path::Path;
use std::sync::Arc;

use dartscore_calib::{CalibrationSet, CalibrationStore, CameraStatus};
use dartscore_core::{to_polar, Zone};
use log::{debug, info, warn};

use crate::angular::refine_wedge;
use crate::bias::{BiasCorrector, BiasMap, BiasMode};
use crate::candidates::CandidateGenerator;
use crate::config::{ConfigRegistry, DetectorConfig, Flag, ScoringParams};
use crate::error::DetectorError;
use crate::score::BoardScore;
use crate::scorer::{majority_multiplier, RobustScorer};
use crate::triangulate::triangulate;
use crate::types::{
    CameraRay, DetectionDiagnostics, DetectionResult, NoDetectionReason, ThrowInput, ThrowOutcome,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Tip radius beyond which a camera says the dart left the board.
const MISS_RADIUS: f64 = 1.0;
/// Tip radius beyond which a camera sees the dart at the very edge.
const EDGE_RADIUS: f64 = 0.95;

/// Multi-camera dart detector.
///
/// Calibration, configuration and the bias map are each shared behind a
/// copy-and-swap lock. [`DartDetector::detect`] snapshots all three on entry
/// and runs without holding any lock, so it can be called from many threads
/// while the control surface changes underneath.
#[derive(Debug)]
pub struct DartDetector {
    calibration: CalibrationStore,
    config: ConfigRegistry,
    bias: BiasCorrector,
}

impl DartDetector {
    /// Validate `config` and refit `calibration` if it was built with other
    /// transform options.
    pub fn new(calibration: CalibrationSet, config: DetectorConfig) -> Result<Self, DetectorError> {
        let calibration = if calibration.options() == &config.transform {
            calibration
        } else {
            calibration.rebuild(&config.transform)?
        };
        for (id, err) in calibration.excluded() {
            warn!("camera {id} excluded: {err}");
        }
        info!(
            "detector ready with {} calibrated cameras",
            calibration.usable_count()
        );
        Ok(Self {
            calibration: CalibrationStore::new(calibration),
            config: ConfigRegistry::new(config)?,
            bias: BiasCorrector::default(),
        })
    }

    /// Load the calibration document at `path` with `config`'s transform
    /// options.
    pub fn from_calibration_file(
        path: impl AsRef<Path>,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        let set = CalibrationSet::load_json(path, &config.transform)?;
        Self::new(set, config)
    }

    pub fn calibration(&self) -> Arc<CalibrationSet> {
        self.calibration.snapshot()
    }

    pub fn calibration_status(&self) -> Vec<CameraStatus> {
        self.calibration.snapshot().status()
    }

    /// Fit a new calibration document and swap it in. Throws already
    /// running finish on the previous set.
    pub fn reload_calibration(
        &self,
        doc: &serde_json::Value,
    ) -> Result<Arc<CalibrationSet>, DetectorError> {
        let options = self.config.snapshot().transform;
        Ok(self.calibration.reload(doc, &options)?)
    }

    pub fn config(&self) -> Arc<DetectorConfig> {
        self.config.snapshot()
    }

    /// Replace the whole configuration, refitting calibration when the
    /// transform options change.
    pub fn replace_config(&self, config: DetectorConfig) -> Result<(), DetectorError> {
        config.validate()?;
        if self.calibration.snapshot().options() != &config.transform {
            self.calibration.rebuild(&config.transform)?;
        }
        self.config.replace(config)?;
        Ok(())
    }

    /// Set a runtime flag by its external name.
    ///
    /// Only the named flag changes; flags set concurrently from other
    /// threads are kept.
    pub fn set_flag(&self, name: &str, value: i64) -> Result<(), DetectorError> {
        let flag: Flag = name.parse()?;
        if flag == Flag::UseMidRingControlPoints {
            let mut next = DetectorConfig::clone(&self.config.snapshot());
            next.set_flag(flag, value)?;
            if self.calibration.snapshot().options() != &next.transform {
                self.calibration.rebuild(&next.transform)?;
                info!("calibration refitted for {flag} = {value}");
            }
        }
        self.config.set_flag(name, value)?;
        Ok(())
    }

    pub fn get_flag(&self, name: &str) -> Result<i64, DetectorError> {
        Ok(self.config.get_flag(name)?)
    }

    pub fn flags(&self) -> Vec<(Flag, i64)> {
        self.config.flags()
    }

    pub fn set_bias_map(&self, map: BiasMap) {
        self.bias.set_bias_map(map);
    }

    pub fn load_bias_map(&self, path: impl AsRef<Path>) -> Result<Arc<BiasMap>, DetectorError> {
        Ok(self.bias.load_bias_map(path)?)
    }

    pub fn bias(&self) -> &BiasCorrector {
        &self.bias
    }

    /// Append buffered learn-mode observations to `path`.
    pub fn flush_learn_log(&self, path: impl AsRef<Path>) -> Result<usize, DetectorError> {
        Ok(self.bias.flush(path)?)
    }

    /// Score one throw.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(detections = input.detections.len())))]
    pub fn detect(&self, input: &ThrowInput) -> ThrowOutcome {
        if input.detections.is_empty() {
            return ThrowOutcome::NoDetection {
                reason: NoDetectionReason::NoDetections,
            };
        }
        let calibration = self.calibration.snapshot();
        let config = self.config.snapshot();

        let tri = triangulate(&calibration, input, &config.triangulation);
        if tri.rays.is_empty() {
            debug!("no usable camera among {} detections", input.detections.len());
            return ThrowOutcome::NoDetection {
                reason: NoDetectionReason::NoUsableCamera,
            };
        }

        let generator = CandidateGenerator::new(&config.candidates);
        let mut set = generator.generate(tri);
        match config.bias.effective_mode() {
            BiasMode::Disabled => {}
            BiasMode::Learn => {
                self.bias.learn(&set, &config.bias);
            }
            BiasMode::Apply => {
                let map = self.bias.map_snapshot();
                if BiasCorrector::apply(&mut set, &map, &config.bias) > 0 {
                    generator.annotate(&mut set);
                }
            }
        }

        let scorer = RobustScorer::new(&config.scoring);
        let Some(mut selection) = scorer.select(&set) else {
            return ThrowOutcome::NoDetection {
                reason: NoDetectionReason::NoCandidates,
            };
        };
        let wedge_guarded = scorer.guard_wedge(&set, &mut selection);
        let winner = selection.winner();
        let candidate = &winner.candidate;

        let mut board = BoardScore::from_point(candidate.point);
        let miss_overridden = miss_override(&config.scoring, board, &set.rays);
        if miss_overridden {
            debug!("double at r {:.4} overridden to a miss", board.radius);
            board = board.into_miss();
        }
        let mut multiplier_overridden = false;
        if config.scoring.multiplier_vote && board.zone != Zone::Miss {
            if let Some(m) = majority_multiplier(set.rays.iter().map(|r| r.vote.multiplier)) {
                if m != board.multiplier {
                    debug!("camera majority overrides multiplier {} -> {m}", board.multiplier);
                    board = board.with_multiplier(m);
                    multiplier_overridden = true;
                }
            }
        }
        let mut wedge_refined = false;
        if !board.zone.is_bull() && board.zone != Zone::Miss {
            let angles: Vec<f64> = set.rays.iter().map(|r| to_polar(r.tip).1).collect();
            let refinement = refine_wedge(board.angle_deg, &angles, &config.angular);
            if refinement.switched() {
                board = board.with_wedge(refinement.wedge);
                wedge_refined = true;
            }
        }

        let result = DetectionResult {
            segment: board.segment,
            multiplier: board.multiplier,
            score: board.score,
            zone: board.zone,
            method: candidate.tag(),
            confidence: scorer.confidence(winner.score),
            total_error: candidate.features.total_residual(),
            per_camera: set
                .rays
                .iter()
                .map(|r| (r.camera.clone(), r.vote))
                .collect(),
            coords: candidate.point,
            radius: board.radius,
            angle_deg: board.angle_deg,
            boundary_distance_deg: board.boundary_distance_deg,
            multiplier_overridden,
            miss_overridden,
            wedge_guarded,
            wedge_refined,
            candidates_considered: selection.scored.len(),
            diagnostics: None,
        };
        debug!(
            "throw scored {} ({}x{}) via {}",
            result.score, result.segment, result.multiplier, result.method
        );

        let diagnostics = config.emit_diagnostics.then(|| DetectionDiagnostics {
            detections: input.detections.clone(),
            rays: set.rays,
            excluded: set.excluded,
            estimate: set.estimate,
            candidates: selection.scored,
            dart_number: input.dart_number,
            board_id: input.board_id.clone(),
        });
        ThrowOutcome::Detected(DetectionResult {
            diagnostics,
            ..result
        })
    }
}

/// A double is really a bounce-out when one tip is off the board and
/// another sits at its very edge.
fn miss_override(params: &ScoringParams, board: BoardScore, rays: &[CameraRay]) -> bool {
    if !params.miss_override || board.zone != Zone::Double {
        return false;
    }
    let radii = || rays.iter().map(|r| r.tip.coords.norm());
    radii().filter(|&r| r > MISS_RADIUS).count() >= 1
        && radii().filter(|&r| r > EDGE_RADIUS).count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use dartscore_calib::synthetic::{calibration_document, three_camera_rig};
    use dartscore_calib::TransformOptions;
    use dartscore_core::from_polar;
    use nalgebra::Vector2;

    fn assert_send_sync<T: Send + Sync>() {}

    fn detector() -> DartDetector {
        let doc = calibration_document(&three_camera_rig());
        let set = CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap();
        DartDetector::new(set, DetectorConfig::default()).unwrap()
    }

    fn consistent_throw(tip: nalgebra::Point2<f64>) -> ThrowInput {
        let leans = [
            Vector2::new(0.0, -0.3),
            Vector2::new(0.3, 0.1),
            Vector2::new(-0.25, 0.15),
        ];
        let detections = three_camera_rig()
            .iter()
            .zip(leans)
            .map(|(cam, lean)| {
                crate::types::TipDetection::new(
                    cam.id.as_str(),
                    cam.board_to_pixel(tip + lean),
                    cam.board_to_pixel(tip),
                    0.85,
                )
            })
            .collect();
        ThrowInput::new(detections)
    }

    #[test]
    fn detector_is_shareable() {
        assert_send_sync::<DartDetector>();
    }

    #[test]
    fn clean_throw_scores_its_wedge() {
        let d = detector();
        let out = d.detect(&consistent_throw(from_polar(0.75, 36.0)));
        let r = out.detection().unwrap();
        assert_eq!((r.segment, r.multiplier, r.score), (18, 1, 18));
        assert!(!r.method.starts_with("single_"));
        assert!(r.confidence > 0.9);
        assert!(r.total_error < 1e-6);
        assert_eq!(r.per_camera.len(), 3);
        assert!(r.diagnostics.is_none());
    }

    #[test]
    fn empty_throw_is_not_an_error() {
        let d = detector();
        assert_eq!(
            d.detect(&ThrowInput::default()),
            ThrowOutcome::NoDetection {
                reason: NoDetectionReason::NoDetections
            }
        );
        let mut input = consistent_throw(from_polar(0.5, 0.0));
        for det in &mut input.detections {
            det.reliable = false;
        }
        assert_eq!(
            d.detect(&input),
            ThrowOutcome::NoDetection {
                reason: NoDetectionReason::NoUsableCamera
            }
        );
    }

    #[test]
    fn diagnostics_follow_the_flag() {
        let d = detector();
        d.set_flag("EmitDiagnostics", 1).unwrap();
        let mut input = consistent_throw(from_polar(0.3, 200.0));
        input.dart_number = Some(2);
        let out = d.detect(&input);
        let diag = out.detection().unwrap().diagnostics.as_ref().unwrap();
        assert_eq!(diag.rays.len(), 3);
        assert_eq!(diag.candidates.len(), 7);
        assert_eq!(diag.dart_number, Some(2));
    }

    #[test]
    fn mid_ring_flag_refits_calibration() {
        let d = detector();
        let before = d.calibration();
        d.set_flag("UseMidRingControlPoints", 0).unwrap();
        let after = d.calibration();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!after.options().mid_ring_control_points);
        assert_eq!(d.get_flag("UseMidRingControlPoints").unwrap(), 0);
        let cam = after.get("cam0").unwrap();
        assert_eq!(cam.spline().control_point_count(), 241);
    }

    #[test]
    fn refit_flag_keeps_concurrent_flag_changes() {
        let d = detector();
        std::thread::scope(|s| {
            s.spawn(|| {
                for v in [0, 1, 0] {
                    d.set_flag("UseMidRingControlPoints", v).unwrap();
                }
            });
            s.spawn(|| {
                for name in ["EmitDiagnostics", "UseAUP", "HHS_EnablePairCandidates"] {
                    let v = (name != "HHS_EnablePairCandidates") as i64;
                    d.set_flag(name, v).unwrap();
                }
            });
        });
        let config = d.config();
        assert!(config.emit_diagnostics);
        assert!(config.angular.enabled);
        assert!(!config.candidates.enable_pairs);
        assert!(!config.transform.mid_ring_control_points);
    }

    #[test]
    fn miss_override_needs_an_off_board_tip() {
        let params = ScoringParams::default();
        let ray = |r: f64| {
            let tip = from_polar(r, 0.0);
            CameraRay {
                camera: "cam".into(),
                line: dartscore_core::Line2 {
                    point: tip,
                    direction: Vector2::y(),
                },
                origin: tip,
                tip,
                quality: 1.0,
                spread: 0.0,
                vote: dartscore_calib::CameraVote {
                    segment: 20,
                    multiplier: 2,
                    score: 40,
                    zone: Zone::Double,
                    boundary_distance_deg: 9.0,
                },
            }
        };
        let double = BoardScore::from_polar(0.99, 0.0);
        assert!(miss_override(&params, double, &[ray(1.02), ray(0.96), ray(0.9)]));
        assert!(!miss_override(&params, double, &[ray(1.02), ray(0.9), ray(0.9)]));
        assert!(!miss_override(&params, double, &[ray(0.99), ray(0.98), ray(0.97)]));
        let triple = BoardScore::from_polar(0.6, 0.0);
        assert!(!miss_override(&params, triple, &[ray(1.02), ray(1.01)]));
    }
}
