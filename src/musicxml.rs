//! MusicXML 3.1 partwise emission.
//!
//! Every part uses 8 divisions per quarter and the same dotted-duration rule
//! as the MIDI emitter. Score tracks become parts `P1..Pn`; overlays follow
//! as `Pn+1..`, each padded with rests so every part has the same measures.

use crate::accompaniment::parse_chord_symbol;
use crate::duration::{rest_fill, NoteValue, TimeSignature, DIVISIONS_PER_QUARTER};
use crate::error::Result;
use crate::model::{Clef, Event, HarmonyMark, PitchNote, Score, Track, Transposition};
use crate::overlay::{OverlayEvent, OverlayTrack};
use crate::pitch::Pitch;

const DOCTYPE: &str = r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#;

/// Fifths and mode for the named keys; anything else is C major.
const KEY_TABLE: [(&str, i32, &str); 30] = [
    ("C major", 0, "major"),
    ("G major", 1, "major"),
    ("D major", 2, "major"),
    ("A major", 3, "major"),
    ("E major", 4, "major"),
    ("B major", 5, "major"),
    ("F# major", 6, "major"),
    ("C# major", 7, "major"),
    ("F major", -1, "major"),
    ("Bb major", -2, "major"),
    ("Eb major", -3, "major"),
    ("Ab major", -4, "major"),
    ("Db major", -5, "major"),
    ("Gb major", -6, "major"),
    ("Cb major", -7, "major"),
    ("A minor", 0, "minor"),
    ("E minor", 1, "minor"),
    ("B minor", 2, "minor"),
    ("F# minor", 3, "minor"),
    ("C# minor", 4, "minor"),
    ("G# minor", 5, "minor"),
    ("D# minor", 6, "minor"),
    ("A# minor", 7, "minor"),
    ("D minor", -1, "minor"),
    ("G minor", -2, "minor"),
    ("C minor", -3, "minor"),
    ("F minor", -4, "minor"),
    ("Bb minor", -5, "minor"),
    ("Eb minor", -6, "minor"),
    ("Ab minor", -7, "minor"),
];

/// `(fifths, mode)` for a key name, if it is in the table.
pub fn key_signature(key: &str) -> Option<(i32, &'static str)> {
    KEY_TABLE
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, fifths, mode)| (*fifths, *mode))
}

/// MusicXML `<kind>` value for a chord quality suffix.
pub fn harmony_kind(quality: &str) -> &'static str {
    match quality {
        "" | "maj" | "M" => "major",
        "m" | "min" | "-" => "minor",
        "7" => "dominant",
        "maj7" | "M7" | "Δ" | "Δ7" => "major-seventh",
        "m7" | "min7" | "-7" => "minor-seventh",
        "dim" | "o" => "diminished",
        "dim7" | "o7" => "diminished-seventh",
        "m7b5" | "ø" | "ø7" => "half-diminished",
        "aug" | "+" => "augmented",
        "sus4" | "sus" => "suspended-fourth",
        "sus2" => "suspended-second",
        "6" => "major-sixth",
        "m6" => "minor-sixth",
        "9" => "dominant-ninth",
        "maj9" => "major-ninth",
        "m9" => "minor-ninth",
        _ => "other",
    }
}

fn clef_sign(clef: Clef) -> (&'static str, u8) {
    match clef {
        Clef::Treble => ("G", 2),
        Clef::Bass => ("F", 4),
        Clef::Percussion => ("percussion", 2),
    }
}

/// Staff position used to draw a percussion sound.
fn percussion_display(name: &str) -> (char, i32) {
    if let Ok(p) = Pitch::parse(name) {
        return (p.step, p.octave);
    }
    match name {
        "Kick" => ('F', 4),
        "Snare" => ('C', 5),
        "HiHat" | "ClosedHiHat" | "OpenHiHat" => ('G', 5),
        "Ride" => ('F', 5),
        "Tom" => ('E', 5),
        _ => ('C', 5),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// XmlWriter
// ═══════════════════════════════════════════════════════════════════════

/// Indented XML accumulator.
struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn new() -> Self {
        let mut out = String::with_capacity(16 * 1024);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        out.push('\n');
        out.push_str(DOCTYPE);
        out.push('\n');
        Self { out, depth: 0 }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn tag(&mut self, name: &str, attrs: &[(&str, &str)], self_closing: bool) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        for (k, v) in attrs {
            self.out.push_str(&format!(r#" {}="{}""#, k, escape(v)));
        }
        self.out.push_str(if self_closing { "/>\n" } else { ">\n" });
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.tag(name, attrs, false);
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str(&format!("</{}>\n", name));
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.tag(name, attrs, true);
    }

    fn leaf(&mut self, name: &str, text: impl std::fmt::Display) {
        self.indent();
        let text = escape(&text.to_string());
        self.out.push_str(&format!("<{name}>{text}</{name}>\n"));
    }

    fn finish(self) -> String {
        self.out
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ═══════════════════════════════════════════════════════════════════════
// Emission
// ═══════════════════════════════════════════════════════════════════════

struct PartHeader<'a> {
    clef: Clef,
    transposition: Option<&'a Transposition>,
}

struct Emitter<'a> {
    w: XmlWriter,
    score: &'a Score,
    time: TimeSignature,
    measure_divs: u32,
}

/// Render a score (plus optional overlays) as a MusicXML 3.1 partwise
/// document. Fails only on a malformed pitch in a pitched part.
pub fn score_to_musicxml(score: &Score, overlays: &[OverlayTrack]) -> Result<String> {
    crate::validate::check_measure_numbers(score)?;
    let time = score.time_signature()?;
    let mut e = Emitter {
        w: XmlWriter::new(),
        score,
        time,
        measure_divs: time.measure_divisions(),
    };

    e.w.open("score-partwise", &[("version", "3.1")]);
    e.w.open("work", &[]);
    e.w.leaf("work-title", &score.meta.title);
    e.w.close("work");

    e.w.open("part-list", &[]);
    for (i, track) in score.tracks.iter().enumerate() {
        e.score_part(i + 1, &track.name);
    }
    for (i, ov) in overlays.iter().enumerate() {
        let name = format!("{} ({})", ov.track_name, ov.metadata.pattern);
        e.score_part(score.tracks.len() + i + 1, &name);
    }
    e.w.close("part-list");

    for (i, track) in score.tracks.iter().enumerate() {
        e.track_part(i, track)?;
    }
    for (i, ov) in overlays.iter().enumerate() {
        e.overlay_part(score.tracks.len() + i + 1, ov)?;
    }

    e.w.close("score-partwise");
    let xml = e.w.finish();
    tracing::debug!(
        parts = score.tracks.len() + overlays.len(),
        bytes = xml.len(),
        "musicxml emitted"
    );
    Ok(xml)
}

impl Emitter<'_> {
    fn score_part(&mut self, n: usize, name: &str) {
        let id = format!("P{n}");
        self.w.open("score-part", &[("id", &id)]);
        self.w.leaf("part-name", name);
        self.w.close("score-part");
    }

    fn attributes(&mut self, header: &PartHeader) {
        let (fifths, mode) = key_signature(&self.score.meta.key).unwrap_or((0, "major"));
        let (sign, line) = clef_sign(header.clef);

        self.w.open("attributes", &[]);
        self.w.leaf("divisions", DIVISIONS_PER_QUARTER);
        self.w.open("key", &[]);
        self.w.leaf("fifths", fifths);
        self.w.leaf("mode", mode);
        self.w.close("key");
        self.w.open("time", &[]);
        self.w.leaf("beats", self.time.beats);
        self.w.leaf("beat-type", self.time.beat_type);
        self.w.close("time");
        self.w.open("clef", &[]);
        self.w.leaf("sign", sign);
        self.w.leaf("line", line);
        self.w.close("clef");
        if let Some(t) = header.transposition {
            self.w.open("transpose", &[]);
            self.w.leaf("chromatic", t.chromatic);
            if let Some(oct) = t.octave_change {
                self.w.leaf("octave-change", oct);
            }
            self.w.close("transpose");
        }
        self.w.close("attributes");
    }

    fn open_measure(&mut self, number: u32, header: Option<&PartHeader>) {
        let n = number.to_string();
        self.w.open("measure", &[("number", &n)]);
        if let Some(h) = header {
            self.attributes(h);
        }
        let tempo = self.score.meta.tempo_bpm.to_string();
        self.w.empty("sound", &[("tempo", &tempo)]);
    }

    fn harmony(&mut self, mark: &HarmonyMark) -> Result<()> {
        let chord = parse_chord_symbol(&mark.chord);
        let root = Pitch::parse(&format!("{}4", chord.root))?;
        self.w.open("harmony", &[]);
        self.w.open("root", &[]);
        self.w.leaf("root-step", root.step);
        if root.alter != 0 {
            self.w.leaf("root-alter", root.alter);
        }
        self.w.close("root");
        self.w.indent();
        self.w.out.push_str(&format!(
            "<kind text=\"{}\">{}</kind>\n",
            escape(&mark.chord),
            harmony_kind(&chord.quality)
        ));
        let offset = ((mark.beat - 1.0) * DIVISIONS_PER_QUARTER as f64).round() as i64;
        if offset > 0 {
            self.w.leaf("offset", offset);
        }
        self.w.close("harmony");
        Ok(())
    }

    /// One `<note>`. `duration` overrides the note's own length (chord
    /// members and overlay events).
    fn note(&mut self, n: &PitchNote, duration: u32, in_chord: bool, percussion: bool) -> Result<()> {
        self.w.open("note", &[]);
        if in_chord {
            self.w.empty("chord", &[]);
        }
        if percussion {
            let (step, octave) = percussion_display(&n.pitch);
            self.w.open("unpitched", &[]);
            self.w.leaf("display-step", step);
            self.w.leaf("display-octave", octave);
            self.w.close("unpitched");
        } else {
            let p = Pitch::parse(&n.pitch)?;
            self.w.open("pitch", &[]);
            self.w.leaf("step", p.step);
            if p.alter != 0 {
                self.w.leaf("alter", p.alter);
            }
            self.w.leaf("octave", p.octave);
            self.w.close("pitch");
        }
        self.w.leaf("duration", duration);
        if n.tie_stop {
            self.w.empty("tie", &[("type", "stop")]);
        }
        if n.tie_start {
            self.w.empty("tie", &[("type", "start")]);
        }
        self.w.leaf("type", n.dur.name());
        for _ in 0..n.dots {
            self.w.empty("dot", &[]);
        }
        if n.tie_start || n.tie_stop {
            self.w.open("notations", &[]);
            if n.tie_stop {
                self.w.empty("tied", &[("type", "stop")]);
            }
            if n.tie_start {
                self.w.empty("tied", &[("type", "start")]);
            }
            self.w.close("notations");
        }
        self.w.close("note");
        Ok(())
    }

    fn rest(&mut self, value: NoteValue, dots: u8, duration: u32) {
        self.w.open("note", &[]);
        self.w.empty("rest", &[]);
        self.w.leaf("duration", duration);
        self.w.leaf("type", value.name());
        for _ in 0..dots {
            self.w.empty("dot", &[]);
        }
        self.w.close("note");
    }

    fn rests(&mut self, divs: u32) {
        for value in rest_fill(divs) {
            self.rest(value, 0, value.divisions());
        }
    }

    fn track_part(&mut self, index: usize, track: &Track) -> Result<()> {
        let id = format!("P{}", index + 1);
        let percussion = track.is_percussion(index);
        let header = PartHeader {
            clef: if percussion { Clef::Percussion } else { track.clef },
            transposition: self.score.transpositions.get(&track.name),
        };

        self.w.open("part", &[("id", &id)]);
        for (mi, measure) in track.measures.iter().enumerate() {
            self.open_measure(measure.number, (mi == 0).then_some(&header));
            for mark in &measure.harmony {
                self.harmony(mark)?;
            }
            for event in &measure.events {
                match event {
                    Event::Rest(r) => self.rest(r.dur, r.dots, r.divisions()),
                    Event::Note(n) => self.note(n, n.divisions(), false, percussion)?,
                    Event::Chord(notes) => {
                        let duration = event.divisions();
                        for (i, n) in notes.iter().enumerate() {
                            self.note(n, duration, i > 0, percussion)?;
                        }
                    }
                }
            }
            self.w.close("measure");
        }
        self.w.close("part");
        Ok(())
    }

    fn overlay_part(&mut self, n: usize, overlay: &OverlayTrack) -> Result<()> {
        let id = format!("P{n}");
        let percussion = overlay.is_percussion();
        let header = PartHeader {
            clef: if percussion { Clef::Percussion } else { Clef::Treble },
            transposition: None,
        };
        let last = overlay
            .measures
            .iter()
            .map(|m| m.number)
            .max()
            .unwrap_or(0)
            .max(self.score.max_measure_number());

        self.w.open("part", &[("id", &id)]);
        for number in 1..=last {
            self.open_measure(number, (number == 1).then_some(&header));
            let mut events: Vec<&OverlayEvent> = overlay
                .measures
                .iter()
                .filter(|m| m.number == number)
                .flat_map(|m| m.events.iter())
                .collect();
            events.sort_by_key(|e| e.at_divs);
            self.overlay_measure(&events, percussion)?;
            self.w.close("measure");
        }
        self.w.close("part");
        Ok(())
    }

    /// Lay positioned events on a sequential staff: gaps become rests,
    /// overlaps rewind with `<backup>`, and the measure is filled to the meter.
    fn overlay_measure(&mut self, events: &[&OverlayEvent], percussion: bool) -> Result<()> {
        let mut cursor = 0u32;
        let mut furthest = 0u32;
        for ev in events {
            if ev.at_divs > cursor {
                self.rests(ev.at_divs - cursor);
            } else if ev.at_divs < cursor {
                self.w.open("backup", &[]);
                self.w.leaf("duration", cursor - ev.at_divs);
                self.w.close("backup");
            }
            if ev.is_rest() {
                let (value, dots) = NoteValue::spell(ev.dur_divs).unwrap_or((NoteValue::ThirtySecond, 0));
                self.rest(value, dots, ev.dur_divs);
            } else {
                for (i, n) in ev.notes.iter().enumerate() {
                    self.note(n, ev.dur_divs, i > 0, percussion)?;
                }
            }
            cursor = ev.end_divs();
            furthest = furthest.max(cursor);
        }
        if furthest > cursor {
            self.w.open("forward", &[]);
            self.w.leaf("duration", furthest - cursor);
            self.w.close("forward");
            cursor = furthest;
        }
        if cursor < self.measure_divs {
            self.rests(self.measure_divs - cursor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn one_measure(events: Vec<Event>) -> Score {
        Score {
            meta: Meta {
                title: "Tiny & Co".into(),
                style: "test".into(),
                tempo_bpm: 100,
                time_signature: "4/4".into(),
                key: "Bb major".into(),
                length: None,
            },
            tracks: vec![Track {
                name: "melody".into(),
                clef: Clef::Treble,
                midi: None,
                measures: vec![Measure {
                    number: 1,
                    harmony: vec![HarmonyMark { beat: 3.0, chord: "Ebmaj7".into() }],
                    events,
                }],
            }],
            transpositions: BTreeMap::new(),
        }
    }

    #[test]
    fn key_table_lookups() {
        assert_eq!(key_signature("Bb major"), Some((-2, "major")));
        assert_eq!(key_signature("F# minor"), Some((3, "minor")));
        assert_eq!(key_signature("H major"), None);
    }

    #[test]
    fn harmony_kinds() {
        assert_eq!(harmony_kind("maj7"), "major-seventh");
        assert_eq!(harmony_kind("m7"), "minor-seventh");
        assert_eq!(harmony_kind(""), "major");
        assert_eq!(harmony_kind("7#11"), "other");
    }

    #[test]
    fn writes_header_attributes_and_notes() {
        let mut tied = PitchNote::new("F#4", NoteValue::Half);
        tied.dots = 1;
        tied.tie_start = true;
        let score = one_measure(vec![
            Event::Note(tied),
            Event::Rest(RestNote::new(NoteValue::Quarter)),
        ]);
        let xml = score_to_musicxml(&score, &[]).unwrap();

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(DOCTYPE));
        assert!(xml.contains(r#"<score-partwise version="3.1">"#));
        assert!(xml.contains("<work-title>Tiny &amp; Co</work-title>"));
        assert!(xml.contains("<divisions>8</divisions>"));
        assert!(xml.contains("<fifths>-2</fifths>"));
        assert!(xml.contains(r#"<sound tempo="100"/>"#));
        assert!(xml.contains("<alter>1</alter>"));
        assert!(xml.contains("<duration>24</duration>"));
        assert!(xml.contains(r#"<tied type="start"/>"#));
        assert!(xml.contains(r#"<kind text="Ebmaj7">major-seventh</kind>"#));
        assert!(xml.contains("<root-alter>-1</root-alter>"));
        assert!(xml.contains("<offset>16</offset>"));
        assert_eq!(xml.matches("<dot/>").count(), 1);
    }

    #[test]
    fn chord_members_share_duration() {
        let score = one_measure(vec![
            Event::Chord(vec![
                PitchNote::new("C4", NoteValue::Whole),
                PitchNote::new("E4", NoteValue::Half),
            ]),
        ]);
        let xml = score_to_musicxml(&score, &[]).unwrap();
        assert_eq!(xml.matches("<chord/>").count(), 1);
        assert_eq!(xml.matches("<duration>32</duration>").count(), 2);
    }

    #[test]
    fn bad_pitch_is_fatal() {
        let score = one_measure(vec![Event::Note(PitchNote::new("Hb4", NoteValue::Whole))]);
        assert!(matches!(
            score_to_musicxml(&score, &[]),
            Err(crate::error::ScoreError::PitchSyntax { .. })
        ));
    }

    #[test]
    fn overlay_gaps_and_overlaps_fill_the_measure() {
        let score = one_measure(vec![Event::Note(PitchNote::new("C4", NoteValue::Whole))]);
        let overlay = OverlayTrack::new(
            "chords-gen",
            "test",
            vec![crate::overlay::OverlayMeasure {
                number: 1,
                events: vec![
                    OverlayEvent::notes(8, 8, vec![PitchNote::new("E4", NoteValue::Quarter)]),
                    OverlayEvent::notes(10, 2, vec![PitchNote::new("G4", NoteValue::Sixteenth)]),
                ],
            }],
        );
        let xml = score_to_musicxml(&score, &[overlay]).unwrap();
        assert!(xml.contains("<part-name>chords-gen (test)</part-name>"));
        assert!(xml.contains(r#"<part id="P2">"#));
        // quarter rest for 0..8, back up 6 for the overlap, forward to 16, rest to 32
        let p2 = &xml[xml.find(r#"<part id="P2">"#).unwrap()..];
        assert!(p2.contains("<backup>"));
        assert!(p2.contains("<forward>"));
        assert!(p2.contains("<rest/>"));
    }

    #[test]
    fn percussion_parts_use_unpitched_notes() {
        let mut score = one_measure(vec![Event::Note(PitchNote::new("Snare", NoteValue::Whole))]);
        score.tracks[0].clef = Clef::Percussion;
        let xml = score_to_musicxml(&score, &[]).unwrap();
        assert!(xml.contains("<sign>percussion</sign>"));
        assert!(xml.contains("<display-step>C</display-step>"));
        assert!(!xml.contains("<pitch>"));
    }
}
