//! Error taxonomy for score conversion.
//!
//! Schema, meter and pitch errors are fatal to the conversion in progress and
//! carry enough detail (track, measure, numbers) for a caller to retry or to
//! show a human. Unknown key names, percussion sounds and accompaniment
//! styles never surface here; see [`crate::validate::fallbacks`].

use std::fmt;

/// One measure whose event durations do not add up to the meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterMismatch {
    pub track: String,
    pub measure: u32,
    pub expected: u32,
    pub actual: u32,
}

impl fmt::Display for MeterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "track {} measure {}: sum={}, expected={}",
            self.track, self.measure, self.actual, self.expected
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("schema violation at {path}: {message}")]
    SchemaViolation { path: String, message: String },

    #[error("invalid measure durations: {}", join_mismatches(.0))]
    Meter(Vec<MeterMismatch>),

    #[error("invalid pitch: {pitch:?}")]
    PitchSyntax { pitch: String },

    #[error("invalid arrangement config {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("MIDI encoding failed: {0}")]
    Midi(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScoreError>;

impl ScoreError {
    pub(crate) fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        ScoreError::SchemaViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        ScoreError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn join_mismatches(items: &[MeterMismatch]) -> String {
    items
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_error_lists_every_measure() {
        let err = ScoreError::Meter(vec![
            MeterMismatch { track: "melody".into(), measure: 1, expected: 32, actual: 36 },
            MeterMismatch { track: "bass".into(), measure: 3, expected: 24, actual: 28 },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("track melody measure 1: sum=36, expected=32"));
        assert!(msg.contains("track bass measure 3: sum=28, expected=24"));
    }
}
