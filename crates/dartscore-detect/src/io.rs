//! JSON helpers for throw files.
//!
//! A throw file holds either one [`ThrowInput`] object or an array of them;
//! outcomes are written back in the same shape.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DetectIoError;
use crate::types::{ThrowInput, ThrowOutcome};

/// One value or a list of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Batch<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        match self {
            Batch::One(_) => 1,
            Batch::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to every element, keeping the shape.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Batch<U> {
        match self {
            Batch::One(t) => Batch::One(f(t)),
            Batch::Many(v) => Batch::Many(v.into_iter().map(f).collect()),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Batch::One(t) => vec![t],
            Batch::Many(v) => v,
        }
    }
}

pub type ThrowBatch = Batch<ThrowInput>;
pub type OutcomeBatch = Batch<ThrowOutcome>;

pub fn parse_throws(json: &str) -> Result<ThrowBatch, DetectIoError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_throws(path: impl AsRef<Path>) -> Result<ThrowBatch, DetectIoError> {
    parse_throws(&fs::read_to_string(path)?)
}

/// Write outcomes as pretty JSON followed by a newline.
pub fn write_outcomes(mut out: impl Write, outcomes: &OutcomeBatch) -> Result<(), DetectIoError> {
    serde_json::to_writer_pretty(&mut out, outcomes)?;
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoDetectionReason;

    const ONE: &str = r#"{"detections": [{"camera": "cam0", "line_start": [0, 0],
        "line_end": [1, 1], "tip": [1, 1], "quality": 0.5}], "dart_number": 1}"#;

    #[test]
    fn single_and_list_inputs_parse() {
        let one = parse_throws(ONE).unwrap();
        assert!(matches!(&one, Batch::One(t) if t.dart_number == Some(1)));

        let many = parse_throws(&format!("[{ONE}, {ONE}]")).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(parse_throws("[]").unwrap().len(), 0);
    }

    #[test]
    fn outcomes_keep_the_input_shape() {
        let outcomes = parse_throws(ONE).unwrap().map(|_| ThrowOutcome::NoDetection {
            reason: NoDetectionReason::NoUsableCamera,
        });
        let mut buf = Vec::new();
        write_outcomes(&mut buf, &outcomes).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["status"], "no_detection");
        assert!(buf.ends_with(b"\n"));
    }
}
