//! Landing-point estimation and scoring for multi-camera dart detection.
//!
//! For each throw the vision front-end reports, per camera, the shaft line
//! and refined tip in pixels. This crate maps those lines onto the board,
//! intersects them, and keeps every plausible landing point as a candidate:
//! - `triangulate`: camera lines in board space, pairwise and joint
//!   intersections.
//! - `candidates`: candidate enumeration with residual, inlier, axis and
//!   boundary evidence.
//! - `bias`: per-camera bias-field learning and correction of
//!   single-camera candidates.
//! - `scorer`: weighted robust scoring, the wedge guard and the majority
//!   multiplier vote.
//! - `angular`: optional wedge re-selection near boundaries from the spread
//!   of per-camera tip angles.
//! - `score`: board position to segment, multiplier and score.
//!
//! [`DartDetector`] ties the stages together behind swappable calibration,
//! configuration and bias state.
//!
//! ```no_run
//! use dartscore_detect::{io, DartDetector, DetectorConfig};
//!
//! let detector = DartDetector::from_calibration_file("calibration.json", DetectorConfig::default())?;
//! for throw in io::load_throws("throw.json")?.into_vec() {
//!     println!("{:?}", detector.detect(&throw));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod angular;
pub mod bias;
pub mod candidates;
pub mod config;
mod error;
pub mod io;
mod pipeline;
pub mod score;
pub mod scorer;
pub mod triangulate;
mod types;

pub use bias::{BiasCorrector, BiasMap, BiasMode, BiasObservation, BiasVector};
pub use angular::{WedgeDecision, WedgeRefinement};
pub use config::{
    AngularParams, BiasParams, CandidateParams, ConfigRegistry, DetectorConfig, Flag, ScoringParams,
    TriangulationParams, WhrsWeights,
};
pub use error::{BiasMapError, ConfigError, DetectIoError, DetectorError};
pub use pipeline::DartDetector;
pub use score::BoardScore;
pub use types::*;
