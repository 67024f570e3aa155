//! End-to-end pipeline: candidate text (or a deterministic fallback) to
//! MusicXML and MIDI artifacts.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ArrangeConfig, EmitOptions};
use crate::duration::{rest_fill, NoteValue, DIVISIONS_PER_QUARTER};
use crate::error::{Result, ScoreError};
use crate::import;
use crate::model::*;
use crate::overlay::{self, OverlayTrack};
use crate::validate::{self, Fallback};
use crate::{midi, musicxml};

/// Fallback scores are never longer than this.
pub const MAX_FALLBACK_MEASURES: u32 = 8;

/// Instrument roles a composition request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Melody,
    Chords,
    Bass,
    Drums,
    Pad,
    Strings,
}

impl Instrument {
    pub fn name(self) -> &'static str {
        match self {
            Instrument::Melody => "melody",
            Instrument::Chords => "chords",
            Instrument::Bass => "bass",
            Instrument::Drums => "drums",
            Instrument::Pad => "pad",
            Instrument::Strings => "strings",
        }
    }

    fn clef(self) -> Clef {
        match self {
            Instrument::Bass => Clef::Bass,
            Instrument::Drums => Clef::Percussion,
            _ => Clef::Treble,
        }
    }

    /// Pitch repeated by the fallback score; drums only rest.
    fn fallback_pitch(self) -> Option<&'static str> {
        match self {
            Instrument::Bass => Some("C2"),
            Instrument::Melody => Some("E4"),
            Instrument::Drums => None,
            _ => Some("C4"),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthRequest {
    pub measures: u32,
}

/// What the caller asked to be composed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRequest {
    pub title: String,
    pub style: String,
    #[serde(rename = "tempoBPM")]
    pub tempo_bpm: u32,
    pub time_signature: String,
    pub key: String,
    pub length: LengthRequest,
    pub instrumentation: Vec<Instrument>,
    #[serde(default)]
    pub arrange: ArrangeConfig,
    #[serde(flatten)]
    pub emit: EmitOptions,
}

impl CompositionRequest {
    pub fn validate(&self) -> Result<()> {
        if !(30..=300).contains(&self.tempo_bpm) {
            return Err(ScoreError::config("tempoBPM", format!("{} is outside [30, 300]", self.tempo_bpm)));
        }
        if !(1..=64).contains(&self.length.measures) {
            return Err(ScoreError::config(
                "length.measures",
                format!("{} is outside [1, 64]", self.length.measures),
            ));
        }
        if self.instrumentation.is_empty() {
            return Err(ScoreError::config("instrumentation", "at least one instrument is required"));
        }
        crate::duration::TimeSignature::parse(&self.time_signature)?;
        self.arrange.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fallback score
// ═══════════════════════════════════════════════════════════════════════

/// A minimal valid score for `request`, used when no usable candidate exists.
///
/// At most [`MAX_FALLBACK_MEASURES`] measures. Pitched parts repeat quarter
/// notes on one pitch per instrument; drums rest. Every measure fills the
/// meter exactly.
pub fn fallback_score(request: &CompositionRequest) -> Result<Score> {
    let measure_divs = crate::duration::measure_target_divisions(&request.time_signature)?;
    let count = request.length.measures.clamp(1, MAX_FALLBACK_MEASURES);

    let tracks = request
        .instrumentation
        .iter()
        .map(|&instrument| Track {
            name: instrument.name().to_string(),
            clef: instrument.clef(),
            midi: None,
            measures: (1..=count)
                .map(|number| Measure {
                    number,
                    harmony: Vec::new(),
                    events: fallback_bar(instrument.fallback_pitch(), measure_divs),
                })
                .collect(),
        })
        .collect();

    Ok(Score {
        meta: Meta {
            title: request.title.clone(),
            style: request.style.clone(),
            tempo_bpm: request.tempo_bpm,
            time_signature: request.time_signature.clone(),
            key: request.key.clone(),
            length: Some(LengthHint { measures: Some(count) }),
        },
        tracks,
        transpositions: BTreeMap::new(),
    })
}

fn fallback_bar(pitch: Option<&str>, measure_divs: u32) -> Vec<Event> {
    let mut events = Vec::new();
    let mut remaining = measure_divs;
    if let Some(pitch) = pitch {
        while remaining >= DIVISIONS_PER_QUARTER {
            events.push(Event::Note(PitchNote::new(pitch, NoteValue::Quarter)));
            remaining -= DIVISIONS_PER_QUARTER;
        }
    }
    events.extend(rest_fill(remaining).into_iter().map(|v| Event::Rest(RestNote::new(v))));
    events
}

// ═══════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════

/// Everything produced for one score.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub musicxml: String,
    pub midi: Vec<u8>,
    pub overlays: Vec<OverlayTrack>,
    /// Unknown names resolved to defaults, for the caller to log
    pub fallbacks: Vec<Fallback>,
    /// Whether the deterministic fallback score replaced the candidate
    pub used_fallback_score: bool,
}

impl Artifacts {
    /// `{ "musicxml": ..., "midiB64": ... }`
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "musicxml": self.musicxml,
            "midiB64": STANDARD.encode(&self.midi),
        })
    }
}

/// Pad, check, arrange and emit a parsed score.
pub fn render(score: Score, cfg: &ArrangeConfig, emit: &EmitOptions) -> Result<Artifacts> {
    cfg.validate()?;
    let score = validate::prepare(score)?;
    let fallbacks = validate::fallbacks(&score, cfg);

    let arranged = overlay::arrange(&score, cfg)?;
    let xml_overlays: &[OverlayTrack] =
        if emit.include_overlays_in_musicxml { &arranged.overlays } else { &[] };
    let midi_overlays: &[OverlayTrack] =
        if emit.include_overlays_in_midi { &arranged.overlays } else { &[] };

    let musicxml = musicxml::score_to_musicxml(&arranged.base, xml_overlays)?;
    let midi = midi::score_to_midi(&arranged.base, Some(cfg), midi_overlays)?;

    tracing::debug!(
        musicxml_bytes = musicxml.len(),
        midi_bytes = midi.len(),
        overlays = arranged.overlays.len(),
        "artifacts rendered"
    );

    Ok(Artifacts {
        musicxml,
        midi,
        overlays: arranged.overlays,
        fallbacks,
        used_fallback_score: false,
    })
}

/// Turn candidate text into artifacts for `request`.
///
/// Text with no recognisable JSON (or no text at all) is replaced by
/// [`fallback_score`]. A candidate that is JSON but does not parse as a
/// score is an error.
pub fn compose(candidate: Option<&str>, request: &CompositionRequest) -> Result<Artifacts> {
    request.validate()?;

    let extracted = candidate.and_then(import::extract_json).map(import::coerce_candidate);
    let (score, used_fallback_score) = match extracted {
        Some(value) => (import::parse_score(&import::normalize_candidate(value))?, false),
        None => {
            tracing::debug!(title = %request.title, "no candidate JSON, using fallback score");
            (fallback_score(request)?, true)
        }
    };

    let mut artifacts = render(score, &request.arrange, &request.emit)?;
    artifacts.used_fallback_score = used_fallback_score;
    Ok(artifacts)
}
