//! Serde shapes of the calibration document.

use dartscore_core::{EllipseParams, Ring};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Ring ellipse as stored on disk. Axes are full lengths, rotation in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEllipse {
    /// `[[cx, cy], [width, height], rotation]`
    Nested([f64; 2], [f64; 2], f64),
    /// `[cx, cy, width, height, rotation]`
    Flat([f64; 5]),
    /// `{"center": [cx, cy], "axes": [width, height], "rotation_deg": r}`
    Object {
        center: [f64; 2],
        axes: [f64; 2],
        #[serde(alias = "angle", alias = "rotation")]
        rotation_deg: f64,
    },
}

impl RawEllipse {
    pub fn to_params(&self) -> EllipseParams {
        let (c, axes, rot) = match self {
            RawEllipse::Nested(c, axes, rot) => (*c, *axes, *rot),
            RawEllipse::Flat([cx, cy, w, h, rot]) => ([*cx, *cy], [*w, *h], *rot),
            RawEllipse::Object {
                center,
                axes,
                rotation_deg,
            } => (*center, *axes, *rotation_deg),
        };
        EllipseParams::from_full_axes(Point2::new(c[0], c[1]), axes[0], axes[1], rot)
    }
}

impl From<&EllipseParams> for RawEllipse {
    fn from(e: &EllipseParams) -> Self {
        RawEllipse::Nested(
            [e.center.x, e.center.y],
            [e.semi_x * 2.0, e.semi_y * 2.0],
            e.rotation_deg,
        )
    }
}

/// One camera's entry in the calibration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCameraCalibration {
    pub center: [f64; 2],
    /// Pixel angles (radians) of the 20 wedge boundaries, in image order.
    pub segment_angles: Vec<f64>,
    /// Index of the boundary that opens the 20 wedge.
    #[serde(default)]
    pub segment_20_index: i64,
    #[serde(default)]
    pub bullseye_ellipse: Option<RawEllipse>,
    #[serde(default)]
    pub bull_ellipse: Option<RawEllipse>,
    #[serde(default)]
    pub inner_triple_ellipse: Option<RawEllipse>,
    #[serde(default)]
    pub outer_triple_ellipse: Option<RawEllipse>,
    #[serde(default)]
    pub inner_double_ellipse: Option<RawEllipse>,
    #[serde(default)]
    pub outer_double_ellipse: Option<RawEllipse>,
}

impl RawCameraCalibration {
    pub fn ring(&self, ring: Ring) -> Option<&RawEllipse> {
        match ring {
            Ring::Bullseye => self.bullseye_ellipse.as_ref(),
            Ring::Bull => self.bull_ellipse.as_ref(),
            Ring::InnerTriple => self.inner_triple_ellipse.as_ref(),
            Ring::OuterTriple => self.outer_triple_ellipse.as_ref(),
            Ring::InnerDouble => self.inner_double_ellipse.as_ref(),
            Ring::OuterDouble => self.outer_double_ellipse.as_ref(),
        }
    }

    pub fn set_ring(&mut self, ring: Ring, ellipse: Option<RawEllipse>) {
        let slot = match ring {
            Ring::Bullseye => &mut self.bullseye_ellipse,
            Ring::Bull => &mut self.bull_ellipse,
            Ring::InnerTriple => &mut self.inner_triple_ellipse,
            Ring::OuterTriple => &mut self.outer_triple_ellipse,
            Ring::InnerDouble => &mut self.inner_double_ellipse,
            Ring::OuterDouble => &mut self.outer_double_ellipse,
        };
        *slot = ellipse;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ellipse_layouts_parse_to_the_same_params() {
        let nested: RawEllipse = serde_json::from_str("[[320.5, 240.0], [200.0, 150.0], 12.5]").unwrap();
        let flat: RawEllipse = serde_json::from_str("[320.5, 240.0, 200.0, 150.0, 12.5]").unwrap();
        let object: RawEllipse = serde_json::from_str(
            r#"{"center": [320.5, 240.0], "axes": [200.0, 150.0], "angle": 12.5}"#,
        )
        .unwrap();

        let p = nested.to_params();
        assert_eq!(p, flat.to_params());
        assert_eq!(p, object.to_params());
        assert_eq!(p.semi_x, 100.0);
        assert_eq!(p.semi_y, 75.0);
    }

    #[test]
    fn missing_rings_deserialize_as_none() {
        let raw: RawCameraCalibration = serde_json::from_str(
            r#"{"center": [1, 2], "segment_angles": [0.1, 0.2], "bull_ellipse": null}"#,
        )
        .unwrap();
        assert!(raw.ring(Ring::Bull).is_none());
        assert!(raw.ring(Ring::OuterDouble).is_none());
        assert_eq!(raw.segment_20_index, 0);
    }
}
