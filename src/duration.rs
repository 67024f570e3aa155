//! Rhythmic arithmetic shared by both emitters.
//!
//! Everything is counted in integer divisions, 8 per quarter note. Both the
//! MusicXML and the MIDI emitter go through [`dotted`] so the two artifacts
//! can never disagree about how long an event is.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

/// Divisions per quarter note, published in every MusicXML `<divisions>`.
pub const DIVISIONS_PER_QUARTER: u32 = 8;

/// Canonical note values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteValue {
    #[serde(rename = "whole")]
    Whole,
    #[serde(rename = "half")]
    Half,
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "eighth")]
    Eighth,
    #[serde(rename = "16th")]
    Sixteenth,
    #[serde(rename = "32nd")]
    ThirtySecond,
}

impl NoteValue {
    /// Largest first; the order rest padding walks.
    pub const ALL: [NoteValue; 6] = [
        NoteValue::Whole,
        NoteValue::Half,
        NoteValue::Quarter,
        NoteValue::Eighth,
        NoteValue::Sixteenth,
        NoteValue::ThirtySecond,
    ];

    pub fn divisions(self) -> u32 {
        match self {
            NoteValue::Whole => 32,
            NoteValue::Half => 16,
            NoteValue::Quarter => 8,
            NoteValue::Eighth => 4,
            NoteValue::Sixteenth => 2,
            NoteValue::ThirtySecond => 1,
        }
    }

    /// Name as written in score JSON and in MusicXML `<type>`.
    pub fn name(self) -> &'static str {
        match self {
            NoteValue::Whole => "whole",
            NoteValue::Half => "half",
            NoteValue::Quarter => "quarter",
            NoteValue::Eighth => "eighth",
            NoteValue::Sixteenth => "16th",
            NoteValue::ThirtySecond => "32nd",
        }
    }

    pub fn from_name(name: &str) -> Option<NoteValue> {
        NoteValue::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Note value and dot count that spell exactly `divs`, if any.
    /// Undotted spellings win over dotted ones.
    pub fn spell(divs: u32) -> Option<(NoteValue, u8)> {
        for dots in 0..=2u8 {
            for value in NoteValue::ALL {
                if dotted(value.divisions(), dots) == divs {
                    return Some((value, dots));
                }
            }
        }
        None
    }
}

/// Scale a base duration by its dots: 1 dot ×1.5, 2 dots ×1.75, rounded.
pub fn dotted(base: u32, dots: u8) -> u32 {
    match dots {
        0 => base,
        1 => (base as f64 * 1.5).round() as u32,
        _ => (base as f64 * 1.75).round() as u32,
    }
}

/// Duration of a note value with dots, in divisions.
pub fn event_divisions(value: NoteValue, dots: u8) -> u32 {
    dotted(value.divisions(), dots)
}

/// Largest accepted time-signature numerator.
pub const MAX_BEATS: u32 = 32;
/// Largest accepted time-signature denominator.
pub const MAX_BEAT_TYPE: u32 = 32;

/// A parsed `N/D` time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats: u32,
    pub beat_type: u32,
}

impl TimeSignature {
    pub fn parse(text: &str) -> Result<TimeSignature> {
        let bad = || ScoreError::schema("meta.timeSignature", format!("expected N/D, got {text:?}"));
        let (n, d) = text.trim().split_once('/').ok_or_else(bad)?;
        let beats: u32 = n.trim().parse().map_err(|_| bad())?;
        let beat_type: u32 = d.trim().parse().map_err(|_| bad())?;
        if !(1..=MAX_BEATS).contains(&beats) || !beat_type.is_power_of_two() || beat_type > MAX_BEAT_TYPE {
            return Err(ScoreError::schema(
                "meta.timeSignature",
                format!("expected 1-{MAX_BEATS} beats over a power of two up to {MAX_BEAT_TYPE}, got {text:?}"),
            ));
        }
        Ok(TimeSignature { beats, beat_type })
    }

    /// Divisions one measure must hold: `round(N * 8 * 4 / D)`.
    pub fn measure_divisions(&self) -> u32 {
        let factor = 4.0 / self.beat_type as f64;
        (self.beats as f64 * DIVISIONS_PER_QUARTER as f64 * factor).round() as u32
    }
}

/// Shorthand for `TimeSignature::parse(ts)?.measure_divisions()`.
pub fn measure_target_divisions(time_signature: &str) -> Result<u32> {
    Ok(TimeSignature::parse(time_signature)?.measure_divisions())
}

/// Greedy rest values (largest first) covering exactly `deficit` divisions.
pub fn rest_fill(mut deficit: u32) -> Vec<NoteValue> {
    let mut out = Vec::new();
    for value in NoteValue::ALL {
        while deficit >= value.divisions() {
            out.push(value);
            deficit -= value.divisions();
        }
        if deficit == 0 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_values() {
        assert_eq!(NoteValue::Quarter.divisions(), 8);
        assert_eq!(NoteValue::Eighth.divisions(), 4);
        assert_eq!(NoteValue::Half.divisions(), 16);
        assert_eq!(NoteValue::Whole.divisions(), 32);
        assert_eq!(NoteValue::ThirtySecond.divisions(), 1);
    }

    #[test]
    fn dots_round_to_nearest() {
        assert_eq!(dotted(8, 1), 12);
        assert_eq!(dotted(8, 2), 14);
        assert_eq!(dotted(1, 1), 2); // 1.5 rounds half away from zero
        assert_eq!(dotted(2, 2), 4); // 3.5
        assert_eq!(dotted(32, 2), 56);
        for value in NoteValue::ALL {
            let base = value.divisions();
            assert_eq!(dotted(base, 1), (base as f64 * 1.5).round() as u32);
            assert_eq!(dotted(base, 2), (base as f64 * 1.75).round() as u32);
        }
    }

    #[test]
    fn meter_targets() {
        assert_eq!(measure_target_divisions("4/4").unwrap(), 32);
        assert_eq!(measure_target_divisions("3/4").unwrap(), 24);
        assert_eq!(measure_target_divisions("6/8").unwrap(), 24);
        assert_eq!(measure_target_divisions("2/2").unwrap(), 32);
        assert_eq!(measure_target_divisions("5/4").unwrap(), 40);
        assert_eq!(measure_target_divisions("7/8").unwrap(), 28);
        for (n, d) in [(1, 4), (2, 4), (3, 8), (9, 8), (12, 8), (3, 2), (5, 16)] {
            let ts = TimeSignature { beats: n, beat_type: d };
            assert_eq!(ts.measure_divisions(), (n as f64 * 32.0 / d as f64).round() as u32);
        }
    }

    #[test]
    fn bad_time_signatures_are_schema_errors() {
        for text in ["", "4", "4/0", "0/4", "x/4", "4/4/4", "4294967295/1", "33/4", "4/3", "4/64"] {
            assert!(
                matches!(TimeSignature::parse(text), Err(ScoreError::SchemaViolation { .. })),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn rest_fill_is_greedy() {
        assert_eq!(
            rest_fill(24),
            vec![NoteValue::Half, NoteValue::Quarter]
        );
        assert_eq!(
            rest_fill(31),
            vec![
                NoteValue::Half,
                NoteValue::Quarter,
                NoteValue::Eighth,
                NoteValue::Sixteenth,
                NoteValue::ThirtySecond,
            ]
        );
        assert_eq!(rest_fill(64), vec![NoteValue::Whole, NoteValue::Whole]);
        assert!(rest_fill(0).is_empty());
    }

    #[test]
    fn spell_prefers_plain_values() {
        assert_eq!(NoteValue::spell(8), Some((NoteValue::Quarter, 0)));
        assert_eq!(NoteValue::spell(12), Some((NoteValue::Quarter, 1)));
        assert_eq!(NoteValue::spell(14), Some((NoteValue::Quarter, 2)));
        assert_eq!(NoteValue::spell(20), None);
    }
}
