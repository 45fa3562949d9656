//! Thin-plate spline warp between two planes.
//!
//! The spline interpolates a set of control-point pairs exactly and
//! minimises bending energy in between. It is fitted once and then evaluated
//! per point; the inverse direction is solved numerically.

use nalgebra::{DMatrix, DVector, Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::homography::{estimate_homography, Homography};

/// Minimum number of control points accepted by [`ThinPlateSpline::fit`].
pub const MIN_CONTROL_POINTS: usize = 24;

const NEWTON_MAX_ITERS: usize = 30;
const NEWTON_TOL: f64 = 1e-11;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TpsError {
    #[error("need at least {needed} control points, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("source and target point counts differ ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("non-finite control point at index {0}")]
    NonFinite(usize),
    #[error("spline system is singular")]
    Singular,
}

/// Radial basis `U(r) = r² log r`, written in terms of `r²`.
#[inline]
fn kernel(r2: f64) -> f64 {
    if r2 <= 0.0 {
        0.0
    } else {
        0.5 * r2 * r2.ln()
    }
}

/// Fitted spline mapping source points onto target points.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinPlateSpline {
    /// Source control points, normalised.
    nodes: Vec<Point2<f64>>,
    /// Kernel weights, one row per node, columns `(x, y)`.
    weights: Vec<Vector2<f64>>,
    /// Affine part: `a0 + a1·x + a2·y` per output coordinate.
    affine: [Vector2<f64>; 3],
    /// Source normalisation `(p - offset) * scale`.
    offset: Vector2<f64>,
    scale: f64,
    /// Target → source homography used to seed the inverse.
    inverse_seed: Homography,
}

impl ThinPlateSpline {
    /// Fit the spline `src[i] -> dst[i]`.
    pub fn fit(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Self, TpsError> {
        if src.len() != dst.len() {
            return Err(TpsError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        if src.len() < MIN_CONTROL_POINTS {
            return Err(TpsError::TooFewPoints {
                needed: MIN_CONTROL_POINTS,
                got: src.len(),
            });
        }
        if let Some(i) = src
            .iter()
            .zip(dst)
            .position(|(s, d)| !(s.x.is_finite() && s.y.is_finite() && d.x.is_finite() && d.y.is_finite()))
        {
            return Err(TpsError::NonFinite(i));
        }

        // condition the system: centroid at the origin, mean radius 1
        let n = src.len();
        let offset = src.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n as f64;
        let mean_dist = src.iter().map(|p| (p.coords - offset).norm()).sum::<f64>() / n as f64;
        if mean_dist < 1e-12 {
            return Err(TpsError::Singular);
        }
        let scale = 1.0 / mean_dist;
        let nodes: Vec<Point2<f64>> = src
            .iter()
            .map(|p| Point2::from((p.coords - offset) * scale))
            .collect();

        let m = n + 3;
        let mut l = DMatrix::<f64>::zeros(m, m);
        for i in 0..n {
            for j in (i + 1)..n {
                let k = kernel((nodes[i] - nodes[j]).norm_squared());
                l[(i, j)] = k;
                l[(j, i)] = k;
            }
            let p = nodes[i];
            for (c, v) in [1.0, p.x, p.y].into_iter().enumerate() {
                l[(i, n + c)] = v;
                l[(n + c, i)] = v;
            }
        }

        let mut rhs = DMatrix::<f64>::zeros(m, 2);
        for (i, d) in dst.iter().enumerate() {
            rhs[(i, 0)] = d.x;
            rhs[(i, 1)] = d.y;
        }

        let lu = l.lu();
        if !lu.is_invertible() {
            return Err(TpsError::Singular);
        }
        let sol = lu.solve(&rhs).ok_or(TpsError::Singular)?;
        if sol.iter().any(|v| !v.is_finite()) {
            return Err(TpsError::Singular);
        }

        let weights = (0..n)
            .map(|i| Vector2::new(sol[(i, 0)], sol[(i, 1)]))
            .collect();
        let affine = [
            Vector2::new(sol[(n, 0)], sol[(n, 1)]),
            Vector2::new(sol[(n + 1, 0)], sol[(n + 1, 1)]),
            Vector2::new(sol[(n + 2, 0)], sol[(n + 2, 1)]),
        ];
        let inverse_seed = estimate_homography(dst, src).ok_or(TpsError::Singular)?;

        Ok(Self {
            nodes,
            weights,
            affine,
            offset,
            scale,
            inverse_seed,
        })
    }

    pub fn control_point_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn normalize(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::from((p.coords - self.offset) * self.scale)
    }

    /// Map a source point to the target plane.
    pub fn transform(&self, p: Point2<f64>) -> Point2<f64> {
        let q = self.normalize(p);
        let mut out = self.affine[0] + self.affine[1] * q.x + self.affine[2] * q.y;
        for (&node, w) in self.nodes.iter().zip(&self.weights) {
            out += w * kernel((q - node).norm_squared());
        }
        Point2::from(out)
    }

    /// Jacobian `∂target/∂source` at `p`.
    pub fn jacobian(&self, p: Point2<f64>) -> Matrix2<f64> {
        let q = self.normalize(p);
        // columns: derivative with respect to normalised x and y
        let mut jx = self.affine[1];
        let mut jy = self.affine[2];
        for (&node, w) in self.nodes.iter().zip(&self.weights) {
            let d = q - node;
            let r2 = d.norm_squared();
            if r2 <= 0.0 {
                continue;
            }
            // dU/dx = dx · (log r² + 1) for U = ½ r² log r²
            let g = r2.ln() + 1.0;
            jx += w * (d.x * g);
            jy += w * (d.y * g);
        }
        Matrix2::from_columns(&[jx, jy]) * self.scale
    }

    /// Solve `transform(p) = target` for `p`.
    ///
    /// Seeds Newton's method with a homography fitted to the control points.
    /// Returns `None` if the iteration diverges or hits a singular Jacobian.
    pub fn untransform(&self, target: Point2<f64>) -> Option<Point2<f64>> {
        let mut p = self.inverse_seed.apply(target);
        if !(p.x.is_finite() && p.y.is_finite()) {
            return None;
        }
        for _ in 0..NEWTON_MAX_ITERS {
            let residual = target - self.transform(p);
            if residual.norm() < NEWTON_TOL {
                return Some(p);
            }
            let step = self.jacobian(p).try_inverse()? * residual;
            p += step;
            if !(p.x.is_finite() && p.y.is_finite()) {
                return None;
            }
        }
        let residual = (target - self.transform(p)).norm();
        (residual < 1e-6).then_some(p)
    }

    /// Kernel weights per output coordinate. Both vanish for an affine warp.
    pub fn bending_weights(&self) -> (DVector<f64>, DVector<f64>) {
        let xs = DVector::from_iterator(self.weights.len(), self.weights.iter().map(|w| w.x));
        let ys = DVector::from_iterator(self.weights.len(), self.weights.iter().map(|w| w.y));
        (xs, ys)
    }
}
