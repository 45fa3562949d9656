use crate::config::Flag;

/// Errors from the configuration registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown flag {0:?}")]
    UnknownFlag(String),
    #[error("invalid value {value} for {flag}: {reason}")]
    InvalidValue {
        flag: Flag,
        value: i64,
        reason: &'static str,
    },
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors loading or writing a bias map or the learn log.
#[derive(thiserror::Error, Debug)]
pub enum BiasMapError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("bias map entry for {camera} has bucket ({radius_bucket}, {angle_bucket}) outside the {radius_buckets}x{angle_buckets} grid")]
    BucketOutOfRange {
        camera: String,
        radius_bucket: usize,
        angle_bucket: usize,
        radius_buckets: usize,
        angle_buckets: usize,
    },
    #[error("bias map grid must have at least one radius and one angle bucket")]
    EmptyGrid,
}

/// Errors reading or writing detector JSON files.
#[derive(thiserror::Error, Debug)]
pub enum DetectIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from the detector's control surface.
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Calibration(#[from] dartscore_calib::CalibrationLoadError),
    #[error(transparent)]
    BiasMap(#[from] BiasMapError),
}
