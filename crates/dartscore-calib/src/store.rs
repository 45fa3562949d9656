//! Calibration sets and the copy-and-swap store shared with detection.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};
use serde::Serialize;

use crate::camera::{CameraCalibration, TransformOptions};
use crate::error::{CalibrationError, CalibrationLoadError};
use crate::raw::RawCameraCalibration;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Cameras that loaded and cameras that were excluded, for one session.
#[derive(Clone, Debug)]
pub struct CalibrationSet {
    cameras: BTreeMap<String, CameraCalibration>,
    excluded: BTreeMap<String, CalibrationError>,
    options: TransformOptions,
    source: serde_json::Value,
}

/// Per-camera load outcome, as reported by `check-calibration`.
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub camera: String,
    pub usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_points: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CalibrationSet {
    /// Build a set from a parsed document.
    ///
    /// Every camera is parsed and fitted independently; a bad entry only
    /// excludes that camera.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    pub fn from_value(
        doc: &serde_json::Value,
        options: &TransformOptions,
    ) -> Result<Self, CalibrationLoadError> {
        let entries = doc.as_object().ok_or(CalibrationLoadError::NotAnObject)?;
        if entries.is_empty() {
            return Err(CalibrationLoadError::Empty);
        }

        let mut cameras = BTreeMap::new();
        let mut excluded = BTreeMap::new();
        for (id, entry) in entries {
            let loaded = serde_json::from_value::<RawCameraCalibration>(entry.clone())
                .map_err(|e| CalibrationError::Malformed {
                    camera: id.clone(),
                    message: e.to_string(),
                })
                .and_then(|raw| CameraCalibration::load(id, &raw, options));
            match loaded {
                Ok(cal) => {
                    cameras.insert(id.clone(), cal);
                }
                Err(err) => {
                    warn!("excluding camera: {err}");
                    excluded.insert(id.clone(), err);
                }
            }
        }

        info!(
            "calibration loaded: {} usable, {} excluded",
            cameras.len(),
            excluded.len()
        );
        Ok(Self {
            cameras,
            excluded,
            options: *options,
            source: doc.clone(),
        })
    }

    pub fn from_json_str(
        json: &str,
        options: &TransformOptions,
    ) -> Result<Self, CalibrationLoadError> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(&doc, options)
    }

    /// Load a calibration document from disk.
    pub fn load_json(
        path: impl AsRef<Path>,
        options: &TransformOptions,
    ) -> Result<Self, CalibrationLoadError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw, options)
    }

    /// Refit every camera from the same document with new options.
    pub fn rebuild(&self, options: &TransformOptions) -> Result<Self, CalibrationLoadError> {
        Self::from_value(&self.source, options)
    }

    pub fn get(&self, camera: &str) -> Option<&CameraCalibration> {
        self.cameras.get(camera)
    }

    /// Usable cameras in id order.
    pub fn cameras(&self) -> impl Iterator<Item = &CameraCalibration> {
        self.cameras.values()
    }

    pub fn excluded(&self) -> &BTreeMap<String, CalibrationError> {
        &self.excluded
    }

    pub fn usable_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn status(&self) -> Vec<CameraStatus> {
        let usable = self.cameras.values().map(|c| CameraStatus {
            camera: c.id().to_string(),
            usable: true,
            control_points: Some(c.spline().control_point_count()),
            error: None,
        });
        let excluded = self.excluded.iter().map(|(id, err)| CameraStatus {
            camera: id.clone(),
            usable: false,
            control_points: None,
            error: Some(err.to_string()),
        });
        let mut all: Vec<CameraStatus> = usable.chain(excluded).collect();
        all.sort_by(|a, b| a.camera.cmp(&b.camera));
        all
    }
}

/// Shared handle to the active calibration set.
///
/// Readers take an `Arc` snapshot and never block a reload for longer than
/// the pointer swap.
#[derive(Debug)]
pub struct CalibrationStore {
    current: RwLock<Arc<CalibrationSet>>,
}

impl CalibrationStore {
    pub fn new(set: CalibrationSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn load_json(
        path: impl AsRef<Path>,
        options: &TransformOptions,
    ) -> Result<Self, CalibrationLoadError> {
        Ok(Self::new(CalibrationSet::load_json(path, options)?))
    }

    pub fn snapshot(&self) -> Arc<CalibrationSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a fully built set and return the previous one.
    pub fn replace(&self, set: CalibrationSet) -> Arc<CalibrationSet> {
        let next = Arc::new(set);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    /// Parse and fit a new document off-lock, then swap it in.
    ///
    /// On error the active set is left untouched.
    pub fn reload(
        &self,
        doc: &serde_json::Value,
        options: &TransformOptions,
    ) -> Result<Arc<CalibrationSet>, CalibrationLoadError> {
        let set = CalibrationSet::from_value(doc, options)?;
        self.replace(set);
        info!("calibration reloaded");
        Ok(self.snapshot())
    }

    /// Refit the active document with new transform options.
    pub fn rebuild(&self, options: &TransformOptions) -> Result<Arc<CalibrationSet>, CalibrationLoadError> {
        let set = self.snapshot().rebuild(options)?;
        self.replace(set);
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{calibration_document, three_camera_rig};
    use std::io::Write;

    #[test]
    fn bad_camera_is_excluded_and_others_load() {
        let mut doc = calibration_document(&three_camera_rig());
        doc["cam1"]["bull_ellipse"] = serde_json::Value::Null;
        doc["cam2"]["segment_angles"] = serde_json::json!([0.1, 0.2, 0.3]);

        let set = CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap();
        assert_eq!(set.usable_count(), 1);
        assert!(set.get("cam0").is_some());
        assert!(matches!(set.excluded()["cam1"], CalibrationError::MissingRing { .. }));
        assert!(matches!(
            set.excluded()["cam2"],
            CalibrationError::ShortAngleTable { got: 3, .. }
        ));

        let status = set.status();
        assert_eq!(status.len(), 3);
        assert!(status[0].usable && !status[1].usable && !status[2].usable);
    }

    #[test]
    fn malformed_entry_is_reported_per_camera() {
        let mut doc = calibration_document(&three_camera_rig());
        doc["cam0"] = serde_json::json!("not a camera");
        let set = CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap();
        assert_eq!(set.usable_count(), 2);
        assert!(matches!(set.excluded()["cam0"], CalibrationError::Malformed { .. }));
    }

    #[test]
    fn non_object_documents_fail_whole() {
        let err = CalibrationSet::from_json_str("[1, 2, 3]", &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, CalibrationLoadError::NotAnObject));
        let err = CalibrationSet::from_json_str("{}", &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, CalibrationLoadError::Empty));
    }

    #[test]
    fn store_loads_from_disk_and_swaps() {
        let doc = calibration_document(&three_camera_rig());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&doc).unwrap()).unwrap();

        let store = CalibrationStore::load_json(file.path(), &TransformOptions::default()).unwrap();
        let before = store.snapshot();
        assert_eq!(before.usable_count(), 3);

        let mut smaller = doc.clone();
        smaller.as_object_mut().unwrap().remove("cam2");
        store.reload(&smaller, &TransformOptions::default()).unwrap();

        // the old snapshot is unaffected by the swap
        assert_eq!(before.usable_count(), 3);
        assert_eq!(store.snapshot().usable_count(), 2);

        assert!(store.reload(&serde_json::json!(42), &TransformOptions::default()).is_err());
        assert_eq!(store.snapshot().usable_count(), 2);
    }

    #[test]
    fn rebuild_changes_the_control_point_count() {
        let doc = calibration_document(&three_camera_rig());
        let store = CalibrationStore::new(
            CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap(),
        );
        let full = store.snapshot().get("cam0").unwrap().spline().control_point_count();
        let plain = TransformOptions {
            mid_ring_control_points: false,
        };
        let rebuilt = store.rebuild(&plain).unwrap();
        let reduced = rebuilt.get("cam0").unwrap().spline().control_point_count();
        assert_eq!(full - reduced, 80);
        assert!(!rebuilt.options().mid_ring_control_points);
    }
}
