use dartscore_core::{Ring, TpsError};

/// Why a single camera was excluded at load time.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("camera {camera}: malformed calibration: {message}")]
    Malformed { camera: String, message: String },
    #[error("camera {camera}: missing {} ring ellipse", .ring.calibration_key())]
    MissingRing { camera: String, ring: Ring },
    #[error("camera {camera}: invalid {} ring ellipse", .ring.calibration_key())]
    InvalidRing { camera: String, ring: Ring },
    #[error("camera {camera}: angle table has {got} entries, need 20")]
    ShortAngleTable { camera: String, got: usize },
    #[error("camera {camera}: angle table wraps {wraps} times around the circle")]
    NonMonotonicAngles { camera: String, wraps: usize },
    #[error("camera {camera}: non-finite value in {field}")]
    NonFinite { camera: String, field: &'static str },
    #[error("camera {camera}: segment-20 index {index} out of range")]
    Segment20OutOfRange { camera: String, index: i64 },
    #[error("camera {camera}: pixel-to-board transform unavailable: {source}")]
    TransformUnavailable {
        camera: String,
        #[source]
        source: TpsError,
    },
}

impl CalibrationError {
    pub fn camera(&self) -> &str {
        match self {
            CalibrationError::Malformed { camera, .. }
            | CalibrationError::MissingRing { camera, .. }
            | CalibrationError::InvalidRing { camera, .. }
            | CalibrationError::ShortAngleTable { camera, .. }
            | CalibrationError::NonMonotonicAngles { camera, .. }
            | CalibrationError::NonFinite { camera, .. }
            | CalibrationError::Segment20OutOfRange { camera, .. }
            | CalibrationError::TransformUnavailable { camera, .. } => camera,
        }
    }
}

/// Failure to read a calibration document as a whole.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("calibration document must be a JSON object keyed by camera id")]
    NotAnObject,
    #[error("calibration document contains no cameras")]
    Empty,
}
