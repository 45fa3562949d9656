//! Board position to dartboard score.

use dartscore_core::{
    boundary_distance_deg, score_for, to_polar, wedge_index, Ring, Zone, BULL_SEGMENT,
    SEGMENT_ORDER,
};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Scored board position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardScore {
    /// Segment number, 25 for either bull, 0 for a miss.
    pub segment: u8,
    pub multiplier: u8,
    pub score: u16,
    pub zone: Zone,
    pub radius: f64,
    pub angle_deg: f64,
    pub boundary_distance_deg: f64,
}

impl BoardScore {
    /// Score a normalised board point.
    pub fn from_point(p: Point2<f64>) -> Self {
        let (radius, angle_deg) = to_polar(p);
        Self::from_polar(radius, angle_deg)
    }

    pub fn from_polar(radius: f64, angle_deg: f64) -> Self {
        let zone = Zone::from_radius(radius);
        let segment = match zone {
            Zone::Miss => 0,
            z if z.is_bull() => BULL_SEGMENT,
            _ => SEGMENT_ORDER[wedge_index(angle_deg)],
        };
        let multiplier = zone.multiplier();
        Self {
            segment,
            multiplier,
            score: score_for(segment, multiplier),
            zone,
            radius,
            angle_deg,
            boundary_distance_deg: boundary_distance_deg(angle_deg),
        }
    }

    /// Same position, scored as a miss.
    pub fn into_miss(self) -> Self {
        Self {
            segment: 0,
            multiplier: 0,
            score: 0,
            zone: Zone::Miss,
            ..self
        }
    }

    /// Same segment with a different multiplier. Misses are returned as is.
    pub fn with_multiplier(self, multiplier: u8) -> Self {
        if self.zone == Zone::Miss {
            return self;
        }
        Self {
            multiplier,
            score: score_for(self.segment, multiplier),
            zone: zone_for(self.segment, multiplier, self.radius),
            ..self
        }
    }

    /// Same ring, scored in another wedge. Bulls and misses have no wedge
    /// and are returned as is.
    pub fn with_wedge(self, wedge: usize) -> Self {
        if self.zone == Zone::Miss || self.zone.is_bull() {
            return self;
        }
        let segment = SEGMENT_ORDER[wedge % SEGMENT_ORDER.len()];
        Self {
            segment,
            score: score_for(segment, self.multiplier),
            ..self
        }
    }
}

/// Zone implied by a segment and multiplier, using the radius only to tell
/// the two single areas apart.
pub fn zone_for(segment: u8, multiplier: u8, radius: f64) -> Zone {
    if segment == BULL_SEGMENT {
        return if multiplier == 2 {
            Zone::InnerBull
        } else {
            Zone::OuterBull
        };
    }
    match multiplier {
        0 => Zone::Miss,
        2 => Zone::Double,
        3 => Zone::Triple,
        _ if radius < Ring::InnerTriple.normalized_radius() => Zone::SingleInner,
        _ => Zone::SingleOuter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dartscore_core::from_polar;

    #[test]
    fn scores_across_the_board() {
        let s = BoardScore::from_point(from_polar(0.6, 0.0));
        assert_eq!((s.segment, s.multiplier, s.score), (20, 3, 60));
        assert_eq!(s.zone, Zone::Triple);

        let s = BoardScore::from_point(from_polar(0.97, 90.0));
        assert_eq!((s.segment, s.multiplier, s.score), (6, 2, 12));

        let s = BoardScore::from_point(from_polar(0.8, 270.0));
        assert_eq!((s.segment, s.score, s.zone), (11, 11, Zone::SingleOuter));

        let s = BoardScore::from_point(from_polar(0.02, 200.0));
        assert_eq!((s.segment, s.score, s.zone), (25, 50, Zone::InnerBull));

        let s = BoardScore::from_point(from_polar(0.06, 10.0));
        assert_eq!((s.segment, s.score, s.zone), (25, 25, Zone::OuterBull));

        let s = BoardScore::from_point(from_polar(1.01, 45.0));
        assert_eq!((s.segment, s.multiplier, s.score), (0, 0, 0));
        assert_eq!(s.zone, Zone::Miss);
    }

    #[test]
    fn wedge_edges_follow_the_half_wedge_offset() {
        assert_eq!(BoardScore::from_polar(0.5, 8.9).segment, 20);
        assert_eq!(BoardScore::from_polar(0.5, 9.1).segment, 1);
        assert_eq!(BoardScore::from_polar(0.5, 351.1).segment, 20);
        assert_eq!(BoardScore::from_polar(0.5, 350.9).segment, 5);
        assert!((BoardScore::from_polar(0.5, 8.0).boundary_distance_deg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn multiplier_override_rescores() {
        let single = BoardScore::from_polar(0.55, 18.0);
        assert_eq!((single.segment, single.multiplier), (1, 1));
        let tripled = single.with_multiplier(3);
        assert_eq!((tripled.score, tripled.zone), (3, Zone::Triple));
        assert_eq!(single.with_multiplier(1).zone, Zone::SingleInner);

        let bull = BoardScore::from_polar(0.05, 0.0);
        assert_eq!(bull.with_multiplier(2).score, 50);
        assert_eq!(bull.with_multiplier(3).score, 25);

        let miss = BoardScore::from_polar(1.2, 0.0);
        assert_eq!(miss.with_multiplier(3), miss);
    }

    #[test]
    fn wedge_override_keeps_the_ring() {
        let double = BoardScore::from_polar(0.97, 8.6);
        let moved = double.with_wedge(1);
        assert_eq!((moved.segment, moved.multiplier, moved.score), (1, 2, 2));
        assert_eq!(moved.zone, Zone::Double);
        assert_eq!(moved.angle_deg, 8.6);

        let bull = BoardScore::from_polar(0.05, 8.6);
        assert_eq!(bull.with_wedge(1), bull);
        let miss = BoardScore::from_polar(1.2, 8.6);
        assert_eq!(miss.with_wedge(1), miss);
    }

    #[test]
    fn miss_keeps_the_position() {
        let s = BoardScore::from_polar(0.99, 100.0).into_miss();
        assert_eq!((s.segment, s.multiplier, s.score), (0, 0, 0));
        assert_eq!(s.radius, 0.99);
    }
}
