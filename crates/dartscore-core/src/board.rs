//! Standard dartboard geometry in board-normalised coordinates.
//!
//! Board space has the center at the origin, `+y` toward the 20 segment and
//! the outer edge of the double ring at radius `1.0`. Angles are measured
//! clockwise from the top, in degrees, in `[0, 360)`.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Outer edge of the double ring, in millimetres.
pub const DOUBLE_OUTER_RADIUS_MM: f64 = 170.0;
pub const DOUBLE_INNER_RADIUS_MM: f64 = 162.0;
pub const TRIPLE_OUTER_RADIUS_MM: f64 = 107.0;
pub const TRIPLE_INNER_RADIUS_MM: f64 = 99.0;
pub const BULL_RADIUS_MM: f64 = 15.9;
pub const BULLSEYE_RADIUS_MM: f64 = 6.35;

/// Segment numbers clockwise from the top.
pub const SEGMENT_ORDER: [u8; 20] = [
    20, 1, 18, 4, 13, 6, 10, 15, 2, 17, 3, 19, 7, 16, 8, 11, 14, 9, 12, 5,
];

/// Angular width of one wedge, degrees.
pub const WEDGE_DEG: f64 = 18.0;

/// Segment number reported for both bull rings.
pub const BULL_SEGMENT: u8 = 25;

/// One of the six calibrated scoring circles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ring {
    Bullseye,
    Bull,
    InnerTriple,
    OuterTriple,
    InnerDouble,
    OuterDouble,
}

impl Ring {
    /// All rings, inside out.
    pub const ALL: [Ring; 6] = [
        Ring::Bullseye,
        Ring::Bull,
        Ring::InnerTriple,
        Ring::OuterTriple,
        Ring::InnerDouble,
        Ring::OuterDouble,
    ];

    /// Radius in millimetres on a standard board.
    pub fn radius_mm(self) -> f64 {
        match self {
            Ring::Bullseye => BULLSEYE_RADIUS_MM,
            Ring::Bull => BULL_RADIUS_MM,
            Ring::InnerTriple => TRIPLE_INNER_RADIUS_MM,
            Ring::OuterTriple => TRIPLE_OUTER_RADIUS_MM,
            Ring::InnerDouble => DOUBLE_INNER_RADIUS_MM,
            Ring::OuterDouble => DOUBLE_OUTER_RADIUS_MM,
        }
    }

    /// Radius normalised by the outer double radius.
    #[inline]
    pub fn normalized_radius(self) -> f64 {
        self.radius_mm() / DOUBLE_OUTER_RADIUS_MM
    }

    /// Key used by the calibration JSON (`"<ring>_ellipse"`).
    pub fn calibration_key(self) -> &'static str {
        match self {
            Ring::Bullseye => "bullseye_ellipse",
            Ring::Bull => "bull_ellipse",
            Ring::InnerTriple => "inner_triple_ellipse",
            Ring::OuterTriple => "outer_triple_ellipse",
            Ring::InnerDouble => "inner_double_ellipse",
            Ring::OuterDouble => "outer_double_ellipse",
        }
    }
}

/// Scoring zone of a board position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    InnerBull,
    OuterBull,
    SingleInner,
    Triple,
    SingleOuter,
    Double,
    Miss,
}

impl Zone {
    /// Multiplier applied to the segment number (0 for a miss).
    pub fn multiplier(self) -> u8 {
        match self {
            Zone::InnerBull | Zone::Double => 2,
            Zone::Triple => 3,
            Zone::OuterBull | Zone::SingleInner | Zone::SingleOuter => 1,
            Zone::Miss => 0,
        }
    }

    /// Zone for a normalised radius.
    pub fn from_radius(r: f64) -> Zone {
        if r <= Ring::Bullseye.normalized_radius() {
            Zone::InnerBull
        } else if r <= Ring::Bull.normalized_radius() {
            Zone::OuterBull
        } else if r > Ring::OuterDouble.normalized_radius() {
            Zone::Miss
        } else if r >= Ring::InnerDouble.normalized_radius() {
            Zone::Double
        } else if r >= Ring::InnerTriple.normalized_radius()
            && r <= Ring::OuterTriple.normalized_radius()
        {
            Zone::Triple
        } else if r < Ring::InnerTriple.normalized_radius() {
            Zone::SingleInner
        } else {
            Zone::SingleOuter
        }
    }

    #[inline]
    pub fn is_bull(self) -> bool {
        matches!(self, Zone::InnerBull | Zone::OuterBull)
    }
}

/// Score for a segment number and multiplier.
///
/// Segment 25 is the bull: multiplier 2 scores 50, anything else 25.
pub fn score_for(segment: u8, multiplier: u8) -> u16 {
    if segment == BULL_SEGMENT {
        if multiplier == 2 {
            50
        } else {
            25
        }
    } else {
        segment as u16 * multiplier as u16
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
#[inline]
pub fn wrap_deg(deg: f64) -> f64 {
    let w = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if w >= 360.0 {
        0.0
    } else {
        w
    }
}

/// Clockwise angle from the top, degrees in `[0, 360)`.
#[inline]
pub fn clockwise_angle_deg(p: Point2<f64>) -> f64 {
    wrap_deg(p.x.atan2(p.y).to_degrees())
}

/// `(radius, clockwise angle in degrees)` of a board point.
#[inline]
pub fn to_polar(p: Point2<f64>) -> (f64, f64) {
    (p.coords.norm(), clockwise_angle_deg(p))
}

/// Inverse of [`to_polar`].
#[inline]
pub fn from_polar(radius: f64, angle_deg: f64) -> Point2<f64> {
    let a = angle_deg.to_radians();
    Point2::new(radius * a.sin(), radius * a.cos())
}

/// Wedge index into [`SEGMENT_ORDER`] for a clockwise angle.
#[inline]
pub fn wedge_index(angle_deg: f64) -> usize {
    let shifted = wrap_deg(angle_deg + WEDGE_DEG * 0.5);
    ((shifted / WEDGE_DEG) as usize) % SEGMENT_ORDER.len()
}

/// Number of wedges between two indices, the short way round.
#[inline]
pub fn wedge_distance(a: usize, b: usize) -> usize {
    let n = SEGMENT_ORDER.len();
    let d = (a + n - b % n) % n;
    d.min(n - d)
}

/// Angular distance in degrees to the nearest wedge boundary.
#[inline]
pub fn boundary_distance_deg(angle_deg: f64) -> f64 {
    let within = wrap_deg(angle_deg + WEDGE_DEG * 0.5) % WEDGE_DEG;
    within.min(WEDGE_DEG - within)
}

/// Distance from a normalised radius to the closest ring circle.
pub fn ring_boundary_distance(r: f64) -> f64 {
    Ring::ALL
        .iter()
        .map(|ring| (r - ring.normalized_radius()).abs())
        .fold(f64::INFINITY, f64::min)
}
