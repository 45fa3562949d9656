//! Per-camera bias-field correction of single-camera candidates.
//!
//! In learn mode, single-camera tips that agree with the multi-camera
//! estimate are buffered as observations and flushed to a JSON-lines log.
//! In apply mode, each single-camera candidate is shifted by the polar
//! correction stored for its camera and board bucket.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dartscore_core::{from_polar, to_polar, wedge_distance, wedge_index, wrap_deg};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BiasParams;
use crate::error::BiasMapError;
use crate::types::{CameraId, CandidateKind, CandidateSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// What the corrector does with single-camera candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    #[default]
    Disabled,
    Learn,
    Apply,
}

impl BiasMode {
    /// Integer encoding used by the `CBFC_Mode` flag.
    pub fn code(self) -> i64 {
        match self {
            BiasMode::Disabled => 0,
            BiasMode::Learn => 1,
            BiasMode::Apply => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BiasMode::Disabled),
            1 => Some(BiasMode::Learn),
            2 => Some(BiasMode::Apply),
            _ => None,
        }
    }
}

/// Polar offset of a camera's tips from the true landing point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasVector {
    #[serde(default)]
    pub d_radius: f64,
    #[serde(default)]
    pub d_angle_deg: f64,
}

impl BiasVector {
    /// Limit each component to its magnitude bound.
    pub fn clamped(self, max_radius: f64, max_angle_deg: f64) -> Self {
        Self {
            d_radius: self.d_radius.clamp(-max_radius, max_radius),
            d_angle_deg: self.d_angle_deg.clamp(-max_angle_deg, max_angle_deg),
        }
    }
}

pub const DEFAULT_RADIUS_BUCKETS: usize = 6;
pub const DEFAULT_ANGLE_BUCKETS: usize = 20;

/// Legacy grid cells smaller than this carry no correction.
const LEGACY_ZERO: f64 = 1e-3;

/// One populated cell of a [`BiasMapFile`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasEntry {
    pub cam: CameraId,
    pub r_bin: usize,
    pub a_bin: usize,
    #[serde(flatten)]
    pub vector: BiasVector,
}

/// On-disk shape of a [`BiasMap`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasMapFile {
    pub radius_buckets: usize,
    pub angle_buckets: usize,
    #[serde(default)]
    pub entries: Vec<BiasEntry>,
}

/// Sparse correction table keyed by camera and polar bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "BiasMapFile", try_from = "BiasMapFile")]
pub struct BiasMap {
    radius_buckets: usize,
    angle_buckets: usize,
    entries: BTreeMap<(CameraId, usize, usize), BiasVector>,
}

impl Default for BiasMap {
    fn default() -> Self {
        Self {
            radius_buckets: DEFAULT_RADIUS_BUCKETS,
            angle_buckets: DEFAULT_ANGLE_BUCKETS,
            entries: BTreeMap::new(),
        }
    }
}

impl From<BiasMap> for BiasMapFile {
    fn from(map: BiasMap) -> Self {
        Self {
            radius_buckets: map.radius_buckets,
            angle_buckets: map.angle_buckets,
            entries: map
                .entries
                .into_iter()
                .map(|((cam, r_bin, a_bin), vector)| BiasEntry {
                    cam,
                    r_bin,
                    a_bin,
                    vector,
                })
                .collect(),
        }
    }
}

impl TryFrom<BiasMapFile> for BiasMap {
    type Error = BiasMapError;

    fn try_from(file: BiasMapFile) -> Result<Self, Self::Error> {
        let mut map = BiasMap::with_grid(file.radius_buckets, file.angle_buckets)?;
        for e in file.entries {
            map.insert(e.cam, e.r_bin, e.a_bin, e.vector)?;
        }
        Ok(map)
    }
}

impl BiasMap {
    pub fn with_grid(radius_buckets: usize, angle_buckets: usize) -> Result<Self, BiasMapError> {
        if radius_buckets == 0 || angle_buckets == 0 {
            return Err(BiasMapError::EmptyGrid);
        }
        Ok(Self {
            radius_buckets,
            angle_buckets,
            entries: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(radius bucket, angle bucket)` of a polar position, both clamped
    /// into the grid.
    pub fn bucket(&self, radius: f64, angle_deg: f64) -> (usize, usize) {
        let clamp = |v: f64, n: usize| (v.floor().max(0.0) as usize).min(n - 1);
        let wedge = 360.0 / self.angle_buckets as f64;
        (
            clamp(radius * self.radius_buckets as f64, self.radius_buckets),
            clamp(wrap_deg(angle_deg) / wedge, self.angle_buckets),
        )
    }

    pub fn get(&self, camera: &CameraId, r_bin: usize, a_bin: usize) -> Option<BiasVector> {
        self.entries.get(&(camera.clone(), r_bin, a_bin)).copied()
    }

    /// Correction for a camera's tip at a polar position, if one is stored.
    pub fn lookup(&self, camera: &CameraId, radius: f64, angle_deg: f64) -> Option<BiasVector> {
        let (r_bin, a_bin) = self.bucket(radius, angle_deg);
        self.get(camera, r_bin, a_bin)
    }

    pub fn insert(
        &mut self,
        camera: impl Into<CameraId>,
        r_bin: usize,
        a_bin: usize,
        vector: BiasVector,
    ) -> Result<(), BiasMapError> {
        let camera = camera.into();
        if r_bin >= self.radius_buckets || a_bin >= self.angle_buckets {
            return Err(BiasMapError::BucketOutOfRange {
                camera: camera.0,
                radius_bucket: r_bin,
                angle_bucket: a_bin,
                radius_buckets: self.radius_buckets,
                angle_buckets: self.angle_buckets,
            });
        }
        self.entries.insert((camera, r_bin, a_bin), vector);
        Ok(())
    }

    /// Parse either the sparse entry list or a legacy dense angle grid.
    pub fn from_json_str(json: &str) -> Result<Self, BiasMapError> {
        let value: Value = serde_json::from_str(json)?;
        if value.get("entries").is_some() || value.get("radius_buckets").is_some() {
            return Ok(serde_json::from_value(value)?);
        }
        Self::from_legacy(&value)
    }

    /// `{"cam0": [[d_angle; 20]; 6], ...}`: angle-only corrections per
    /// radius band and wedge.
    ///
    /// Legacy grids count wedges clockwise from 9 o'clock, a quarter turn
    /// short of the top, so column `k` lands in bucket `(k + 3n/4) mod n`.
    fn from_legacy(value: &Value) -> Result<Self, BiasMapError> {
        let mut map = BiasMap::default();
        let Some(cameras) = value.as_object() else {
            return Ok(map);
        };
        for (cam, grid) in cameras {
            let Some(rows) = grid.as_array() else {
                debug!("legacy bias map: {cam} is not a grid, skipped");
                continue;
            };
            for (r_bin, row) in rows.iter().enumerate() {
                let Some(cells) = row.as_array() else { continue };
                for (a_bin, cell) in cells.iter().enumerate() {
                    let Some(d_angle_deg) = cell.as_f64() else { continue };
                    if d_angle_deg.abs() < LEGACY_ZERO {
                        continue;
                    }
                    let vector = BiasVector {
                        d_radius: 0.0,
                        d_angle_deg,
                    };
                    let n = map.angle_buckets;
                    let bucket = if a_bin < n { (a_bin + n * 3 / 4) % n } else { a_bin };
                    map.insert(cam.as_str(), r_bin, bucket, vector)?;
                }
            }
        }
        Ok(map)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, BiasMapError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), BiasMapError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// One learn-mode record: a camera's single tip in board polar form, with
/// the multi-camera reference it agreed with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasObservation {
    pub cam: CameraId,
    pub r: f64,
    pub theta: f64,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_y: Option<f64>,
}

/// Shared bias map plus the learn-mode buffer.
#[derive(Debug, Default)]
pub struct BiasCorrector {
    map: RwLock<Arc<BiasMap>>,
    learn: Mutex<Vec<BiasObservation>>,
}

impl BiasCorrector {
    pub fn new(map: BiasMap) -> Self {
        Self {
            map: RwLock::new(Arc::new(map)),
            learn: Mutex::default(),
        }
    }

    pub fn set_bias_map(&self, map: BiasMap) {
        info!("bias map replaced ({} entries)", map.len());
        *self.map.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
    }

    /// Load a map from disk and swap it in. The current map stays on error.
    pub fn load_bias_map(&self, path: impl AsRef<Path>) -> Result<Arc<BiasMap>, BiasMapError> {
        let map = BiasMap::load_json(path)?;
        self.set_bias_map(map);
        Ok(self.map_snapshot())
    }

    pub fn map_snapshot(&self) -> Arc<BiasMap> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shift every single-camera candidate that has a stored correction.
    ///
    /// Returns the number of candidates moved. Features are left stale; the
    /// caller re-annotates the set.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn apply(set: &mut CandidateSet, map: &BiasMap, params: &BiasParams) -> usize {
        let mut moved = 0;
        for c in set.candidates.iter_mut() {
            let CandidateKind::Single(cam) = &c.kind else {
                continue;
            };
            let Some(raw) = map.lookup(cam, c.radius, c.angle_deg) else {
                continue;
            };
            let v = raw.clamped(params.max_radius_correction, params.max_angle_correction_deg);
            if v != raw {
                warn!(
                    "{cam}: bias correction ({:.4}, {:.3}°) clamped to ({:.4}, {:.3}°)",
                    raw.d_radius, raw.d_angle_deg, v.d_radius, v.d_angle_deg
                );
            }
            let radius = (c.radius - v.d_radius).max(0.0);
            let angle = wrap_deg(c.angle_deg - v.d_angle_deg);
            debug!(
                "{cam}: bias moved candidate r {:.4} -> {radius:.4}, θ {:.2} -> {angle:.2}",
                c.radius, c.angle_deg
            );
            c.move_to(from_polar(radius, angle));
            c.bias_corrected = true;
            moved += 1;
        }
        moved
    }

    /// Buffer observations from single candidates that agree with the
    /// multi-camera estimate. Returns the number buffered.
    pub fn learn(&self, set: &CandidateSet, params: &BiasParams) -> usize {
        let reference = set.estimate.map(|p| (p, to_polar(p)));
        let observations: Vec<BiasObservation> = set
            .candidates
            .iter()
            .filter_map(|c| {
                let cam = c.kind.single_camera()?;
                if let Some((_, (r_ref, a_ref))) = reference {
                    let radial = (c.radius - r_ref).abs();
                    let wedges = wedge_distance(wedge_index(c.angle_deg), wedge_index(a_ref));
                    if radial > params.learn_max_radial_delta
                        || wedges > params.learn_max_wedge_distance
                    {
                        debug!("{cam}: conflicts with the multi-camera estimate, not learned");
                        return None;
                    }
                }
                Some(BiasObservation {
                    cam: cam.clone(),
                    r: c.radius,
                    theta: c.angle_deg,
                    x: c.point.x,
                    y: c.point.y,
                    ref_x: reference.map(|(p, _)| p.x),
                    ref_y: reference.map(|(p, _)| p.y),
                })
            })
            .collect();

        let n = observations.len();
        if n > 0 {
            self.learn
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(observations);
        }
        n
    }

    pub fn pending(&self) -> usize {
        self.learn.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Append buffered observations to `path` as JSON lines and clear the
    /// buffer. On error the observations are kept for the next flush.
    pub fn flush(&self, path: impl AsRef<Path>) -> Result<usize, BiasMapError> {
        let taken = mem::take(&mut *self.learn.lock().unwrap_or_else(PoisonError::into_inner));
        if taken.is_empty() {
            return Ok(0);
        }
        match write_lines(path.as_ref(), &taken) {
            Ok(()) => {
                info!("flushed {} bias observations to {}", taken.len(), path.as_ref().display());
                Ok(taken.len())
            }
            Err(e) => {
                let mut guard = self.learn.lock().unwrap_or_else(PoisonError::into_inner);
                let newer = mem::replace(&mut *guard, taken);
                guard.extend(newer);
                Err(e)
            }
        }
    }
}

fn write_lines(path: &Path, observations: &[BiasObservation]) -> Result<(), BiasMapError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut out = BufWriter::new(file);
    for obs in observations {
        serde_json::to_writer(&mut out, obs)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candidate;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn single(cam: &str, r: f64, angle: f64) -> Candidate {
        Candidate::new(CandidateKind::Single(cam.into()), from_polar(r, angle))
    }

    fn apply_params() -> BiasParams {
        BiasParams {
            enabled: true,
            mode: BiasMode::Apply,
            ..BiasParams::default()
        }
    }

    #[test]
    fn buckets_clamp_into_the_grid() {
        let map = BiasMap::default();
        assert_eq!(map.bucket(0.0, 0.0), (0, 0));
        assert_eq!(map.bucket(0.55, 95.0), (3, 5));
        assert_eq!(map.bucket(1.2, 359.9), (5, 19));
        assert_eq!(map.bucket(-0.1, -1.0), (0, 19));
    }

    #[test]
    fn apply_shifts_only_singles_with_a_bucket() {
        let mut map = BiasMap::default();
        map.insert(
            "cam1",
            3,
            5,
            BiasVector {
                d_radius: 0.01,
                d_angle_deg: 1.0,
            },
        )
        .unwrap();

        let mut set = CandidateSet {
            candidates: vec![
                Candidate::new(CandidateKind::Tri, from_polar(0.55, 95.0)),
                single("cam1", 0.55, 95.0),
                single("cam2", 0.55, 95.0),
                single("cam1", 0.2, 95.0),
            ],
            ..CandidateSet::default()
        };
        let before = set.clone();
        assert_eq!(BiasCorrector::apply(&mut set, &map, &apply_params()), 1);

        let moved = &set.candidates[1];
        assert!(moved.bias_corrected);
        assert_relative_eq!(moved.radius, 0.54, epsilon = 1e-12);
        assert_relative_eq!(moved.angle_deg, 94.0, epsilon = 1e-9);
        assert_eq!(set.candidates[0], before.candidates[0]);
        assert_eq!(set.candidates[2], before.candidates[2]);
        assert_eq!(set.candidates[3], before.candidates[3]);
    }

    #[test]
    fn corrections_are_clamped() {
        let mut map = BiasMap::default();
        map.insert(
            "cam0",
            0,
            0,
            BiasVector {
                d_radius: 0.5,
                d_angle_deg: -10.0,
            },
        )
        .unwrap();
        let mut set = CandidateSet {
            candidates: vec![single("cam0", 0.1, 1.0)],
            ..CandidateSet::default()
        };
        BiasCorrector::apply(&mut set, &map, &apply_params());
        let c = &set.candidates[0];
        assert_relative_eq!(c.radius, 0.05, epsilon = 1e-12);
        assert_relative_eq!(c.angle_deg, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn sparse_map_round_trips_through_disk() {
        let mut map = BiasMap::default();
        map.insert(
            "cam0",
            2,
            7,
            BiasVector {
                d_radius: -0.004,
                d_angle_deg: 0.3,
            },
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bias.json");
        map.write_json(&path).unwrap();
        assert_eq!(BiasMap::load_json(&path).unwrap(), map);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"r_bin\": 2"));
    }

    #[test]
    fn out_of_grid_entries_are_rejected() {
        let json = r#"{"radius_buckets": 6, "angle_buckets": 20,
            "entries": [{"cam": "cam0", "r_bin": 6, "a_bin": 0, "d_angle_deg": 1.0}]}"#;
        assert!(BiasMap::from_json_str(json).is_err());
        let empty = r#"{"radius_buckets": 0, "angle_buckets": 20}"#;
        assert!(BiasMap::from_json_str(empty).is_err());
    }

    #[test]
    fn legacy_grid_loads_angle_corrections() {
        let mut rows = vec![vec![0.0; 20]; 6];
        rows[2][4] = 0.75;
        rows[5][19] = 0.0004;
        let json = serde_json::json!({ "cam0": rows, "note": "hand tuned" }).to_string();
        let map = BiasMap::from_json_str(&json).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.get(&"cam0".into(), 2, 4).is_none());
        let v = map.get(&"cam0".into(), 2, 19).unwrap();
        assert_eq!(v.d_radius, 0.0);
        assert_relative_eq!(v.d_angle_deg, 0.75);
    }

    #[test]
    fn legacy_columns_start_at_nine_o_clock() {
        let mut rows = vec![vec![0.0; 20]; 6];
        rows[3][0] = 1.5;
        let json = serde_json::json!({ "cam1": rows }).to_string();
        let map = BiasMap::from_json_str(&json).unwrap();
        let cam = CameraId::from("cam1");
        // column 0 is the wedge around 270 degrees clockwise from the top
        assert!(map.lookup(&cam, 0.55, 279.0).is_some());
        assert!(map.lookup(&cam, 0.55, 9.0).is_none());
        assert!(map.lookup(&cam, 0.55, 99.0).is_none());
    }

    #[test]
    fn legacy_grid_wider_than_the_buckets_is_rejected() {
        let mut rows = vec![vec![0.0; 21]; 6];
        rows[0][20] = 1.0;
        let json = serde_json::json!({ "cam0": rows }).to_string();
        assert!(BiasMap::from_json_str(&json).is_err());
    }

    #[test]
    fn learn_keeps_only_agreeing_singles() {
        let corrector = BiasCorrector::default();
        let params = BiasParams {
            enabled: true,
            mode: BiasMode::Learn,
            ..BiasParams::default()
        };
        let set = CandidateSet {
            candidates: vec![
                single("cam0", 0.52, 40.0),
                single("cam1", 0.80, 40.0),
                single("cam2", 0.50, 120.0),
            ],
            estimate: Some(from_polar(0.5, 40.0)),
            ..CandidateSet::default()
        };
        assert_eq!(corrector.learn(&set, &params), 1);
        assert_eq!(corrector.pending(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learn.jsonl");
        assert_eq!(corrector.flush(&path).unwrap(), 1);
        assert_eq!(corrector.pending(), 0);
        assert_eq!(corrector.flush(&path).unwrap(), 0);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let obs: BiasObservation = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(obs.cam.as_str(), "cam0");
        assert_relative_eq!(obs.r, 0.52, epsilon = 1e-12);
        assert!(obs.ref_x.is_some());
    }

    #[test]
    fn failed_flush_keeps_the_buffer() {
        let corrector = BiasCorrector::default();
        let set = CandidateSet {
            candidates: vec![Candidate::new(
                CandidateKind::Single("cam0".into()),
                Point2::new(0.1, 0.2),
            )],
            ..CandidateSet::default()
        };
        corrector.learn(&set, &BiasParams::default());
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("learn.jsonl");
        assert!(corrector.flush(&missing).is_err());
        assert_eq!(corrector.pending(), 1);
    }

    #[test]
    fn swapped_maps_do_not_affect_held_snapshots() {
        let corrector = BiasCorrector::default();
        let held = corrector.map_snapshot();
        let mut map = BiasMap::default();
        map.insert("cam0", 0, 0, BiasVector::default()).unwrap();
        corrector.set_bias_map(map);
        assert!(held.is_empty());
        assert_eq!(corrector.map_snapshot().len(), 1);
    }
}
