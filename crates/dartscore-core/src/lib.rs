//! Board geometry and planar warps for multi-camera dart scoring.
//!
//! Everything here is purely geometric: board constants and polar helpers,
//! 2D line fitting and intersection, ellipse ray casting, a DLT homography
//! and the thin-plate spline used to map camera pixels onto the board.

mod board;
mod ellipse;
mod geometry;
mod homography;
mod logger;
mod tps;

pub use board::{
    boundary_distance_deg, clockwise_angle_deg, from_polar, ring_boundary_distance, score_for,
    to_polar, wedge_distance, wedge_index, wrap_deg, Ring, Zone, BULLSEYE_RADIUS_MM,
    BULL_RADIUS_MM, BULL_SEGMENT, DOUBLE_INNER_RADIUS_MM, DOUBLE_OUTER_RADIUS_MM, SEGMENT_ORDER,
    TRIPLE_INNER_RADIUS_MM, TRIPLE_OUTER_RADIUS_MM, WEDGE_DEG,
};
pub use ellipse::EllipseParams;
pub use geometry::{
    closest_point_to_lines, cross, fit_line, intersect_lines, intersect_segments_as_lines,
    weighted_median, Line2,
};
pub use homography::{estimate_homography, Homography};
pub use tps::{ThinPlateSpline, TpsError, MIN_CONTROL_POINTS};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, verbosity_level};
