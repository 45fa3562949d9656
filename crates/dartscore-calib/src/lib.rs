//! Per-camera dartboard calibration.
//!
//! A calibration document is a JSON object keyed by camera id. Each entry
//! carries the board center in pixels, six ring ellipses and a 20-entry
//! table of wedge boundary angles. Loading validates each camera on its own
//! and fits a thin-plate spline from pixels to normalised board coordinates
//! once; detection only evaluates it.
//!
//! ```no_run
//! use dartscore_calib::{CalibrationStore, TransformOptions};
//!
//! let store = CalibrationStore::load_json("calibration.json", &TransformOptions::default())?;
//! let set = store.snapshot();
//! for camera in set.cameras() {
//!     println!("{} ready", camera.id());
//! }
//! # Ok::<(), dartscore_calib::CalibrationLoadError>(())
//! ```

mod camera;
mod error;
mod raw;
mod store;
pub mod synthetic;

pub use camera::{
    CameraCalibration, CameraGeometry, CameraVote, ControlPoint, TransformOptions, SEGMENT_COUNT,
};
pub use error::{CalibrationError, CalibrationLoadError};
pub use raw::{RawCameraCalibration, RawEllipse};
pub use store::{CalibrationSet, CalibrationStore, CameraStatus};
