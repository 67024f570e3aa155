//! Non-destructive overlay composition.
//!
//! Generated parts live in [`OverlayTrack`]s beside an owned copy of the
//! score. Overlay events are positioned explicitly (`at_divs` inside a
//! measure) instead of sequentially, so patterns may leave gaps or overlap.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::accompaniment::{self, PatternContext};
use crate::config::{ArrangeConfig, Style};
use crate::duration::NoteValue;
use crate::error::Result;
use crate::model::{PitchNote, RestNote, Score};
use crate::rng::XorShift32;

/// One positioned overlay event. An event without notes is a rest.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEvent {
    pub at_divs: u32,
    pub dur_divs: u32,
    pub notes: Vec<PitchNote>,
}

impl OverlayEvent {
    pub fn notes(at_divs: u32, dur_divs: u32, notes: Vec<PitchNote>) -> Self {
        Self { at_divs, dur_divs, notes }
    }

    pub fn rest(at_divs: u32, dur_divs: u32) -> Self {
        Self { at_divs, dur_divs, notes: Vec::new() }
    }

    pub fn is_rest(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn end_divs(&self) -> u32 {
        self.at_divs + self.dur_divs
    }
}

impl Serialize for OverlayEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OverlayEvent", 3)?;
        state.serialize_field("atDivs", &self.at_divs)?;
        state.serialize_field("durDivs", &self.dur_divs)?;
        if self.is_rest() {
            let (dur, dots) = NoteValue::spell(self.dur_divs).unwrap_or((NoteValue::ThirtySecond, 0));
            state.serialize_field("notes", &RestNote { dur, dots })?;
        } else {
            state.serialize_field("notes", &self.notes)?;
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayMeasure {
    pub number: u32,
    pub events: Vec<OverlayEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayMetadata {
    pub pattern: String,
}

/// A generated part.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayTrack {
    pub track_name: String,
    pub measures: Vec<OverlayMeasure>,
    pub metadata: OverlayMetadata,
}

impl OverlayTrack {
    pub fn new(name: &str, pattern: &str, measures: Vec<OverlayMeasure>) -> Self {
        Self {
            track_name: name.to_string(),
            measures,
            metadata: OverlayMetadata { pattern: pattern.to_string() },
        }
    }

    /// Overlays named like a drum part play percussion.
    pub fn is_percussion(&self) -> bool {
        self.track_name.to_lowercase().contains("drum")
    }

    pub fn note_count(&self) -> usize {
        self.measures
            .iter()
            .flat_map(|m| m.events.iter())
            .map(|e| e.notes.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrangeAnnotations {
    pub style: Style,
    pub seed: u32,
    pub density: f64,
    pub complexity: f64,
}

/// A score copy plus everything generated for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrangedResult {
    pub base: Score,
    pub overlays: Vec<OverlayTrack>,
    pub annotations: ArrangeAnnotations,
}

/// Generate accompaniment overlays for `score`.
///
/// The result owns a copy of the score; the input is never modified. With
/// accompaniment disabled the overlay list is empty.
pub fn arrange(score: &Score, cfg: &ArrangeConfig) -> Result<ArrangedResult> {
    let base = score.clone();
    let acc = &cfg.accompaniment;
    let annotations = ArrangeAnnotations {
        style: acc.style.clone(),
        seed: cfg.seed,
        density: acc.density,
        complexity: acc.complexity,
    };

    if !acc.enabled {
        return Ok(ArrangedResult { base, overlays: Vec::new(), annotations });
    }
    crate::validate::check_measure_numbers(&base)?;

    let harmony = base.harmony_by_measure();
    let ctx = PatternContext {
        measure_divs: base.measure_divisions()?,
        measure_count: base.max_measure_number(),
        harmony: &harmony,
        density: acc.density,
        complexity: acc.complexity,
    };
    let mut rng = XorShift32::new(cfg.seed);
    let overlays = accompaniment::generate(&acc.style, &ctx, &mut rng);

    tracing::debug!(
        style = %acc.style,
        overlays = overlays.len(),
        measures = ctx.measure_count,
        "accompaniment generated"
    );

    Ok(ArrangedResult { base, overlays, annotations })
}
