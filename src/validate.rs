//! Meter validation, rest padding and the fallback report.

use std::fmt;

use serde::Serialize;

use crate::config::{ArrangeConfig, Style};
use crate::error::{MeterMismatch, Result, ScoreError};
use crate::import::MAX_MEASURE_NUMBER;
use crate::model::{Event, RestNote, Score};
use crate::{midi, musicxml};

/// Append greedy rests to every measure that is short of the meter.
///
/// Overfull measures are left alone; [`check_meters`] reports them.
/// Returns the number of measures that were padded.
pub fn pad_measures(score: &mut Score) -> Result<usize> {
    let target = score.measure_divisions()?;
    let mut padded = 0;
    for track in &mut score.tracks {
        for measure in &mut track.measures {
            let sum = measure.total_divisions();
            if sum >= target {
                continue;
            }
            let fill = crate::duration::rest_fill(target - sum);
            tracing::debug!(
                track = %track.name,
                measure = measure.number,
                deficit = target - sum,
                rests = fill.len(),
                "padding short measure"
            );
            measure
                .events
                .extend(fill.into_iter().map(|v| Event::Rest(RestNote::new(v))));
            padded += 1;
        }
    }
    Ok(padded)
}

/// Every measure whose duration sum differs from the meter.
pub fn meter_mismatches(score: &Score) -> Result<Vec<MeterMismatch>> {
    let target = score.measure_divisions()?;
    let mut out = Vec::new();
    for track in &score.tracks {
        for measure in &track.measures {
            let actual = measure.total_divisions();
            if actual != target {
                out.push(MeterMismatch {
                    track: track.name.clone(),
                    measure: measure.number,
                    expected: target,
                    actual,
                });
            }
        }
    }
    Ok(out)
}

/// Fail with [`ScoreError::Meter`] listing every mismatched measure.
pub fn check_meters(score: &Score) -> Result<()> {
    let mismatches = meter_mismatches(score)?;
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(ScoreError::Meter(mismatches))
    }
}

/// Reject measure numbers above [`MAX_MEASURE_NUMBER`], which would put
/// events past the end of any timeline the emitters can build.
pub fn check_measure_numbers(score: &Score) -> Result<()> {
    for (ti, track) in score.tracks.iter().enumerate() {
        for (mi, measure) in track.measures.iter().enumerate() {
            if !(1..=MAX_MEASURE_NUMBER).contains(&measure.number) {
                return Err(ScoreError::schema(
                    format!("tracks[{ti}].measures[{mi}].number"),
                    format!("expected 1-{MAX_MEASURE_NUMBER}, got {}", measure.number),
                ));
            }
        }
    }
    Ok(())
}

/// Pad, then check. The score handed to the emitters always comes out of here.
pub fn prepare(mut score: Score) -> Result<Score> {
    check_measure_numbers(&score)?;
    pad_measures(&mut score)?;
    check_meters(&score)?;
    Ok(score)
}

// ═══════════════════════════════════════════════════════════════════════
// Fallback report
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FallbackKind {
    Key,
    PercussionSound,
    Style,
}

/// A name that was not recognised and the value used instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fallback {
    pub kind: FallbackKind,
    /// Where the name appeared, e.g. `meta.key` or `drums measure 3`
    pub location: String,
    pub value: String,
    pub resolved: String,
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {:?} {:?} at {}, using {}",
            self.kind, self.value, self.location, self.resolved
        )
    }
}

/// List every unknown key, percussion sound and style the emitters and the
/// generator will silently replace with a default. Each distinct name is
/// reported once, at its first occurrence.
pub fn fallbacks(score: &Score, config: &ArrangeConfig) -> Vec<Fallback> {
    let mut out = Vec::new();

    if musicxml::key_signature(&score.meta.key).is_none() {
        out.push(Fallback {
            kind: FallbackKind::Key,
            location: "meta.key".into(),
            value: score.meta.key.clone(),
            resolved: "fifths 0, major".into(),
        });
    }

    let mut seen: Vec<&str> = Vec::new();
    for (index, track) in score.tracks.iter().enumerate() {
        if !track.is_percussion(index) {
            continue;
        }
        for measure in &track.measures {
            for note in measure.events.iter().flat_map(Event::notes) {
                if midi::percussion_key(&note.pitch).is_some() || seen.contains(&note.pitch.as_str()) {
                    continue;
                }
                seen.push(&note.pitch);
                out.push(Fallback {
                    kind: FallbackKind::PercussionSound,
                    location: format!("{} measure {}", track.name, measure.number),
                    value: note.pitch.clone(),
                    resolved: format!("key {}", midi::DEFAULT_PERCUSSION_KEY),
                });
            }
        }
    }

    if config.accompaniment.enabled {
        if let Style::Unknown(name) = &config.accompaniment.style {
            out.push(Fallback {
                kind: FallbackKind::Style,
                location: "accompaniment.style".into(),
                value: name.clone(),
                resolved: Style::PopRock.to_string(),
            });
        }
    }

    out
}
