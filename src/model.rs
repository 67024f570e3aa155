//! Data model for a symbolic, instrument-agnostic score.
//!
//! A score is built once per request by [`crate::import::parse_score`] and is
//! immutable afterwards, apart from the rest padding applied by
//! [`crate::validate::pad_measures`].

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::duration::{event_divisions, NoteValue, TimeSignature};
use crate::error::Result;

/// Channel every percussion track is routed to.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// A complete score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub meta: Meta,
    pub tracks: Vec<Track>,
    /// Written transposition per track name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub transpositions: BTreeMap<String, Transposition>,
}

/// Global score properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub title: String,
    pub style: String,
    /// Tempo in quarter notes per minute (30–300)
    #[serde(rename = "tempoBPM")]
    pub tempo_bpm: u32,
    /// Time signature as written, e.g. "3/4"
    pub time_signature: String,
    /// Key name, e.g. "Bb major"
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measures: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transposition {
    pub chromatic: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub octave_change: Option<i32>,
}

/// One instrument line. Tracks are identified by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub name: String,
    pub clef: Clef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi: Option<MidiHints>,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Clef {
    Treble,
    Bass,
    Percussion,
}

impl Clef {
    pub fn from_name(name: &str) -> Option<Clef> {
        match name {
            "treble" => Some(Clef::Treble),
            "bass" => Some(Clef::Bass),
            "percussion" => Some(Clef::Percussion),
            _ => None,
        }
    }
}

/// Playback hints supplied with a track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiHints {
    pub channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percussion: Option<bool>,
}

/// A single measure. Events are sequential; absolute positions are derived
/// by summing durations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    /// 1-based, unique per track
    pub number: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub harmony: Vec<HarmonyMark>,
    pub events: Vec<Event>,
}

/// A chord symbol attached to a beat of a measure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarmonyMark {
    /// 1-based beat (quarter notes) within the measure
    pub beat: f64,
    pub chord: String,
}

/// One measure event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Note(PitchNote),
    Rest(RestNote),
    /// Two or more notes sounding together; the first one's duration governs.
    Chord(Vec<PitchNote>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchNote {
    /// Spelled pitch ("C#4"), or a sound name on percussion tracks ("Snare")
    pub pitch: String,
    pub dur: NoteValue,
    #[serde(skip_serializing_if = "is_zero")]
    pub dots: u8,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tie_start: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tie_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestNote {
    pub dur: NoteValue,
    pub dots: u8,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

impl Serialize for RestNote {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.dots > 0 { 3 } else { 2 };
        let mut state = serializer.serialize_struct("RestNote", fields)?;
        state.serialize_field("rest", &true)?;
        state.serialize_field("dur", &self.dur)?;
        if self.dots > 0 {
            state.serialize_field("dots", &self.dots)?;
        }
        state.end()
    }
}

impl PitchNote {
    pub fn new(pitch: impl Into<String>, dur: NoteValue) -> Self {
        Self {
            pitch: pitch.into(),
            dur,
            dots: 0,
            tie_start: false,
            tie_stop: false,
            velocity: None,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn divisions(&self) -> u32 {
        event_divisions(self.dur, self.dots)
    }
}

impl RestNote {
    pub fn new(dur: NoteValue) -> Self {
        Self { dur, dots: 0 }
    }

    pub fn divisions(&self) -> u32 {
        event_divisions(self.dur, self.dots)
    }
}

impl Event {
    /// Time this event advances the measure cursor by.
    pub fn divisions(&self) -> u32 {
        match self {
            Event::Note(n) => n.divisions(),
            Event::Rest(r) => r.divisions(),
            Event::Chord(notes) => notes.first().map_or(0, PitchNote::divisions),
        }
    }

    /// Sounding notes of this event (none for a rest).
    pub fn notes(&self) -> &[PitchNote] {
        match self {
            Event::Note(n) => std::slice::from_ref(n),
            Event::Rest(_) => &[],
            Event::Chord(notes) => notes,
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, Event::Rest(_))
    }
}

impl Measure {
    /// Sum of event durations, chords counted once.
    pub fn total_divisions(&self) -> u32 {
        self.events.iter().map(Event::divisions).sum()
    }
}

impl Track {
    /// Whether this track plays on the percussion channel.
    pub fn is_percussion(&self, index: usize) -> bool {
        self.clef == Clef::Percussion
            || self.midi.as_ref().and_then(|m| m.percussion) == Some(true)
            || self.requested_channel(index) == PERCUSSION_CHANNEL
    }

    /// MIDI channel: the hinted channel or the track index, clamped to 0–15,
    /// forced to 9 for percussion.
    pub fn channel(&self, index: usize) -> u8 {
        if self.is_percussion(index) {
            PERCUSSION_CHANNEL
        } else {
            self.requested_channel(index)
        }
    }

    fn requested_channel(&self, index: usize) -> u8 {
        match &self.midi {
            Some(hints) => hints.channel.min(15),
            None => index.min(15) as u8,
        }
    }

    pub fn program(&self) -> Option<u8> {
        self.midi.as_ref().and_then(|m| m.program)
    }
}

impl Score {
    pub fn time_signature(&self) -> Result<TimeSignature> {
        TimeSignature::parse(&self.meta.time_signature)
    }

    /// Divisions every measure of this score must hold.
    pub fn measure_divisions(&self) -> Result<u32> {
        Ok(self.time_signature()?.measure_divisions())
    }

    /// Highest measure number across all tracks.
    pub fn max_measure_number(&self) -> u32 {
        self.tracks
            .iter()
            .flat_map(|t| t.measures.iter().map(|m| m.number))
            .max()
            .unwrap_or(0)
    }

    /// Harmony annotations per measure number, gathered across tracks in
    /// track order and sorted by beat.
    pub fn harmony_by_measure(&self) -> BTreeMap<u32, Vec<HarmonyMark>> {
        let mut map: BTreeMap<u32, Vec<HarmonyMark>> = BTreeMap::new();
        for track in &self.tracks {
            for measure in &track.measures {
                if measure.harmony.is_empty() {
                    continue;
                }
                map.entry(measure.number)
                    .or_default()
                    .extend(measure.harmony.iter().cloned());
            }
        }
        for marks in map.values_mut() {
            marks.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        }
        map
    }

    /// Total number of sounding notes (chord members counted individually).
    pub fn note_count(&self) -> usize {
        self.tracks
            .iter()
            .flat_map(|t| t.measures.iter())
            .flat_map(|m| m.events.iter())
            .map(|e| e.notes().len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(clef: Clef, midi: Option<MidiHints>) -> Track {
        Track { name: "t".into(), clef, midi, measures: Vec::new() }
    }

    #[test]
    fn channel_defaults_to_index_clamped() {
        assert_eq!(track(Clef::Treble, None).channel(3), 3);
        assert_eq!(track(Clef::Treble, None).channel(20), 15);
        let hinted = MidiHints { channel: 4, program: Some(33), percussion: None };
        assert_eq!(track(Clef::Bass, Some(hinted)).channel(0), 4);
    }

    #[test]
    fn percussion_forces_channel_nine() {
        assert_eq!(track(Clef::Percussion, None).channel(2), 9);
        let hinted = MidiHints { channel: 3, program: None, percussion: Some(true) };
        assert_eq!(track(Clef::Treble, Some(hinted)).channel(0), 9);
        // channel 9 by index also means percussion
        assert!(track(Clef::Treble, None).is_percussion(9));
    }

    #[test]
    fn chord_counts_once() {
        let m = Measure {
            number: 1,
            harmony: Vec::new(),
            events: vec![
                Event::Note(PitchNote::new("C4", NoteValue::Quarter)),
                Event::Chord(vec![
                    PitchNote::new("C4", NoteValue::Quarter),
                    PitchNote::new("E4", NoteValue::Half),
                ]),
                Event::Rest(RestNote::new(NoteValue::Half)),
            ],
        };
        assert_eq!(m.total_divisions(), 8 + 8 + 16);
    }

    #[test]
    fn events_serialize_in_wire_shape() {
        let events = vec![
            Event::Note(PitchNote::new("C4", NoteValue::Quarter)),
            Event::Rest(RestNote { dur: NoteValue::Eighth, dots: 1 }),
            Event::Chord(vec![
                PitchNote::new("C4", NoteValue::Half),
                PitchNote::new("E4", NoteValue::Half),
            ]),
        ];
        let json = serde_json::to_value(&events).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "pitch": "C4", "dur": "quarter" },
                { "rest": true, "dur": "eighth", "dots": 1 },
                [ { "pitch": "C4", "dur": "half" }, { "pitch": "E4", "dur": "half" } ]
            ])
        );
    }
}
