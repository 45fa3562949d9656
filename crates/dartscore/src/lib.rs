//! Multi-camera dart scoring.
//!
//! This crate bundles the `dartscore-*` crates behind one dependency and
//! adds the session helpers used by the `dartscore` command-line tool
//! (feature `cli`).
//!
//! ## Quickstart
//!
//! ```no_run
//! use dartscore::{open_detector, SessionOptions};
//!
//! # fn main() -> Result<(), dartscore::Error> {
//! let options = SessionOptions::new("calibration.json").with_flag("UseWHRS", 1);
//! let detector = open_detector(&options)?;
//! for throw in dartscore::detect::io::load_throws("throw.json")?.into_vec() {
//!     if let Some(hit) = detector.detect(&throw).detection() {
//!         println!("{} ({}x{}) via {}", hit.score, hit.segment, hit.multiplier, hit.method);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `dartscore::core`: board constants, polar helpers, line fitting, the
//!   thin-plate spline.
//! - `dartscore::calib`: per-camera calibration loading and the shared
//!   calibration store.
//! - `dartscore::detect`: triangulation, candidates, bias correction,
//!   robust scoring and [`DartDetector`].

use std::path::{Path, PathBuf};

pub use dartscore_calib as calib;
pub use dartscore_core as core;
pub use dartscore_detect as detect;

pub use dartscore_calib::{CalibrationSet, CameraStatus, TransformOptions};
pub use dartscore_core::{Zone, SEGMENT_ORDER};
pub use dartscore_detect::{
    BiasMap, BiasMode, DartDetector, DetectionResult, DetectorConfig, Flag, ThrowInput,
    ThrowOutcome, TipDetection,
};
pub use nalgebra::Point2;

use dartscore_calib::CalibrationLoadError;
use dartscore_detect::{BiasMapError, ConfigError, DetectIoError, DetectorError};
use log::info;

/// Any failure surfaced by the facade helpers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("calibration: {0}")]
    Calibration(#[from] CalibrationLoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bias map: {0}")]
    BiasMap(#[from] BiasMapError),
    #[error(transparent)]
    Io(#[from] DetectIoError),
    #[error("invalid flag assignment {0:?}, expected NAME=VALUE")]
    FlagSyntax(String),
}

impl From<DetectorError> for Error {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::Config(e) => Error::Config(e),
            DetectorError::Calibration(e) => Error::Calibration(e),
            DetectorError::BiasMap(e) => Error::BiasMap(e),
        }
    }
}

/// Parse a `NAME=VALUE` flag assignment.
pub fn parse_flag_assignment(s: &str) -> Result<(String, i64), Error> {
    let syntax = || Error::FlagSyntax(s.to_string());
    let (name, value) = s.split_once('=').ok_or_else(syntax)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(syntax());
    }
    let value = value.trim().parse::<i64>().map_err(|_| syntax())?;
    Ok((name.to_string(), value))
}

/// Everything needed to stand up a detector from files.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub calibration: PathBuf,
    pub config: Option<PathBuf>,
    pub bias_map: Option<PathBuf>,
    /// Applied in order after the config file.
    pub flags: Vec<(String, i64)>,
}

impl SessionOptions {
    pub fn new(calibration: impl Into<PathBuf>) -> Self {
        Self {
            calibration: calibration.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = Some(path.into());
        self
    }

    pub fn with_bias_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.bias_map = Some(path.into());
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: i64) -> Self {
        self.flags.push((name.into(), value));
        self
    }
}

/// Load the configuration named by `options` and apply its flag overrides,
/// without touching calibration.
pub fn resolve_config(options: &SessionOptions) -> Result<DetectorConfig, Error> {
    let mut config = match &options.config {
        Some(path) => DetectorConfig::load_json(path)?,
        None => DetectorConfig::default(),
    };
    for (name, value) in &options.flags {
        let flag: Flag = name.parse()?;
        config.set_flag(flag, *value)?;
    }
    Ok(config)
}

/// Build a detector from a calibration file, an optional config file, an
/// optional bias map and flag overrides.
pub fn open_detector(options: &SessionOptions) -> Result<DartDetector, Error> {
    let config = resolve_config(options)?;
    let detector = DartDetector::from_calibration_file(&options.calibration, config)?;
    if let Some(path) = &options.bias_map {
        let map = detector.load_bias_map(path)?;
        info!("bias map {} loaded ({} entries)", path.display(), map.len());
    }
    Ok(detector)
}

/// Per-camera usable/excluded report for a calibration file.
pub fn check_calibration(
    path: impl AsRef<Path>,
    options: &TransformOptions,
) -> Result<Vec<CameraStatus>, Error> {
    Ok(CalibrationSet::load_json(path, options)?.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dartscore_calib::synthetic::{calibration_document, three_camera_rig};

    #[test]
    fn flag_assignments_parse() {
        assert_eq!(
            parse_flag_assignment("WHRS_wR=45").unwrap(),
            ("WHRS_wR".to_string(), 45)
        );
        assert_eq!(
            parse_flag_assignment(" CBFC_Mode = 2 ").unwrap(),
            ("CBFC_Mode".to_string(), 2)
        );
        for bad in ["WHRS_wR", "=1", "UseWHRS=yes", "UseWHRS=0.5"] {
            assert!(
                matches!(parse_flag_assignment(bad), Err(Error::FlagSyntax(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn session_applies_flags_over_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let calibration = dir.path().join("calibration.json");
        std::fs::write(
            &calibration,
            calibration_document(&three_camera_rig()).to_string(),
        )
        .unwrap();
        let config_path = dir.path().join("config.json");
        let mut config = DetectorConfig::default();
        config.scoring.weights.residual = 0.4;
        config.write_json(&config_path).unwrap();

        let options = SessionOptions::new(&calibration)
            .with_config(&config_path)
            .with_flag("UseWHRS", 0);
        let detector = open_detector(&options).unwrap();
        let active = detector.config();
        assert!(!active.scoring.use_whrs);
        assert!((active.scoring.weights.residual - 0.4).abs() < 1e-12);
        assert_eq!(detector.calibration().usable_count(), 3);

        let bad = SessionOptions::new(&calibration).with_flag("NoSuchFlag", 1);
        assert!(matches!(open_detector(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn calibration_report_lists_every_camera() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut doc = calibration_document(&three_camera_rig());
        doc["cam1"]["segment_20_index"] = serde_json::json!(40);
        std::fs::write(&path, doc.to_string()).unwrap();

        let report = check_calibration(&path, &TransformOptions::default()).unwrap();
        assert_eq!(report.len(), 3);
        assert!(!report[1].usable);
        assert!(report[1].error.is_some());
        assert!(report[0].usable && report[2].usable);
    }
}
