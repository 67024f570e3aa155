//! Accompaniment overlay generation: walking bass, shell voicings, comping
//! and drum patterns.
//!
//! Generators read the score's harmony annotations (one chord per hit, taken
//! from the last annotation at or before the hit's beat) and write new
//! overlay tracks; they never touch the score itself. All randomness goes
//! through the caller's [`XorShift32`].

use std::collections::BTreeMap;

use crate::config::Style;
use crate::duration::{NoteValue, DIVISIONS_PER_QUARTER};
use crate::model::{HarmonyMark, PitchNote};
use crate::overlay::{OverlayEvent, OverlayMeasure, OverlayTrack};
use crate::pitch::Pitch;
use crate::rng::XorShift32;

/// Chord used for measures without harmony.
pub const DEFAULT_CHORD: &str = "C7";

pub const BASS_TRACK: &str = "bass-gen";
pub const CHORDS_TRACK: &str = "chords-gen";
pub const DRUMS_TRACK: &str = "drums-gen";

const EIGHTH: u32 = DIVISIONS_PER_QUARTER / 2;
const SIXTEENTH: u32 = DIVISIONS_PER_QUARTER / 4;
const HALF: u32 = DIVISIONS_PER_QUARTER * 2;

// ═══════════════════════════════════════════════════════════════════════
// Chord symbols
// ═══════════════════════════════════════════════════════════════════════

/// A chord symbol split into root and quality suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordSymbol {
    /// Root spelling, e.g. "Bb"
    pub root: String,
    /// Everything after the root, e.g. "m7b5"
    pub quality: String,
}

impl ChordSymbol {
    /// Root as a pitch class (0 = C).
    pub fn root_class(&self) -> i32 {
        let base: i32 = match self.root.chars().next() {
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => 0,
        };
        let alter = match self.root.chars().nth(1) {
            Some('#') => 1,
            Some('b') => -1,
            _ => 0,
        };
        (base + alter).rem_euclid(12)
    }

    fn is_minor(&self) -> bool {
        self.quality.contains('m') && !self.quality.contains("maj")
    }

    /// Third above the root: minor for `m` qualities, else major.
    pub fn third(&self) -> i32 {
        self.root_class() + if self.is_minor() { 3 } else { 4 }
    }

    /// Seventh above the root: major for `maj7`, else minor.
    pub fn seventh(&self) -> i32 {
        self.root_class() + if self.quality.contains("maj7") { 11 } else { 10 }
    }

    pub fn ninth(&self) -> i32 {
        self.root_class() + 14
    }
}

/// Split a symbol at `^[A-G](#|b)?`. Anything unparseable is C with an
/// empty quality.
pub fn parse_chord_symbol(symbol: &str) -> ChordSymbol {
    let mut chars = symbol.char_indices();
    let Some((_, 'A'..='G')) = chars.next() else {
        return ChordSymbol { root: "C".into(), quality: String::new() };
    };
    let root_len = match chars.next() {
        Some((_, '#' | 'b')) => 2,
        _ => 1,
    };
    ChordSymbol {
        root: symbol[..root_len].to_string(),
        quality: symbol[root_len..].to_string(),
    }
}

/// The candidate closest to `target` in semitones; the first wins ties.
pub fn nearest_voicing(target: i32, candidates: &[i32]) -> Option<i32> {
    let mut best: Option<i32> = None;
    for &c in candidates {
        match best {
            Some(b) if (c - target).abs() >= (b - target).abs() => {}
            _ => best = Some(c),
        }
    }
    best
}

// ═══════════════════════════════════════════════════════════════════════
// Pattern context
// ═══════════════════════════════════════════════════════════════════════

/// Everything a generator reads.
#[derive(Debug, Clone)]
pub struct PatternContext<'a> {
    /// Divisions per measure
    pub measure_divs: u32,
    /// Measures to generate, numbered 1..=count
    pub measure_count: u32,
    pub harmony: &'a BTreeMap<u32, Vec<HarmonyMark>>,
    pub density: f64,
    pub complexity: f64,
}

impl PatternContext<'_> {
    /// Chord sounding at `at_divs` in measure `number`.
    pub fn chord_at(&self, number: u32, at_divs: u32) -> ChordSymbol {
        let beat = 1.0 + at_divs as f64 / DIVISIONS_PER_QUARTER as f64;
        let symbol = self
            .harmony
            .get(&number)
            .and_then(|marks| {
                marks
                    .iter()
                    .rev()
                    .find(|m| m.beat <= beat)
                    .or_else(|| marks.first())
            })
            .map_or(DEFAULT_CHORD, |m| m.chord.as_str());
        parse_chord_symbol(symbol)
    }

    fn measures(&self) -> impl Iterator<Item = u32> {
        1..=self.measure_count.max(1)
    }

    /// Onsets of a fixed template that fall inside the measure.
    fn onsets<'t>(&self, template: &'t [u32]) -> impl Iterator<Item = u32> + 't {
        let limit = self.measure_divs;
        template.iter().copied().filter(move |&at| at < limit)
    }

    /// Clip a duration so the event ends by the barline.
    fn clip(&self, at: u32, dur: u32) -> u32 {
        dur.min(self.measure_divs.saturating_sub(at)).max(1)
    }
}

fn note(midi: i32, dur_divs: u32) -> PitchNote {
    let (dur, dots) = spelled(dur_divs);
    let mut n = PitchNote::new(Pitch::name_for_midi(midi), dur);
    n.dots = dots;
    n
}

fn sound(name: &str, dur_divs: u32, velocity: u8) -> PitchNote {
    let (dur, dots) = spelled(dur_divs);
    let mut n = PitchNote::new(name, dur).with_velocity(velocity);
    n.dots = dots;
    n
}

/// Exact spelling when there is one, else the largest value that fits.
fn spelled(divs: u32) -> (NoteValue, u8) {
    NoteValue::spell(divs).unwrap_or_else(|| {
        let value = NoteValue::ALL
            .into_iter()
            .find(|v| v.divisions() <= divs)
            .unwrap_or(NoteValue::ThirtySecond);
        (value, 0)
    })
}

/// Fold events that start together with the same length into one chord.
fn merge_simultaneous(mut events: Vec<OverlayEvent>) -> Vec<OverlayEvent> {
    events.sort_by_key(|e| e.at_divs);
    let mut out: Vec<OverlayEvent> = Vec::with_capacity(events.len());
    for ev in events {
        match out.last_mut() {
            Some(prev) if prev.at_divs == ev.at_divs && prev.dur_divs == ev.dur_divs => {
                prev.notes.extend(ev.notes);
            }
            _ => out.push(ev),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Bass
// ═══════════════════════════════════════════════════════════════════════

/// Walking bass: one quarter per slot, starting from the first measure's
/// chord root in the bass register and moving up a fourth each measure.
/// With complexity above 0.4 the last slot becomes an approach tone a
/// whole step above or a half step below.
pub fn walking_bass(ctx: &PatternContext, rng: &mut XorShift32) -> OverlayTrack {
    let step = DIVISIONS_PER_QUARTER;
    let mut root = ctx.chord_at(1, 0).root_class() + 24;
    let mut measures = Vec::new();

    for number in ctx.measures() {
        let mut events = Vec::new();
        let mut at = 0;
        while at < ctx.measure_divs {
            let mut midi = root;
            if ctx.complexity > 0.4 && at + step >= ctx.measure_divs {
                midi += if rng.next_unit() > 0.5 { 2 } else { -1 };
            }
            let dur = ctx.clip(at, step);
            events.push(OverlayEvent::notes(at, dur, vec![note(midi, dur)]));
            at += step;
        }
        measures.push(OverlayMeasure { number, events });

        root = 24 + (root - 24 + 5).rem_euclid(24);
    }

    OverlayTrack::new(BASS_TRACK, "walking", measures)
}

/// Root, fifth, octave, fifth on the quarters, following the harmony.
pub fn root_fifth_bass(ctx: &PatternContext) -> OverlayTrack {
    const STEPS: [i32; 4] = [0, 7, 12, 7];
    let step = DIVISIONS_PER_QUARTER;
    let measures = ctx
        .measures()
        .map(|number| {
            let mut events = Vec::new();
            let mut at = 0;
            let mut slot = 0;
            while at < ctx.measure_divs {
                let root = 36 + ctx.chord_at(number, at).root_class();
                let dur = ctx.clip(at, step);
                events.push(OverlayEvent::notes(at, dur, vec![note(root + STEPS[slot % 4], dur)]));
                at += step;
                slot += 1;
            }
            OverlayMeasure { number, events }
        })
        .collect();
    OverlayTrack::new(BASS_TRACK, "root-5", measures)
}

/// Root on the downbeat, fifth on the "and" of two.
pub fn tumbao_bass(ctx: &PatternContext) -> OverlayTrack {
    let measures = ctx
        .measures()
        .map(|number| {
            let mut events = Vec::new();
            for (at, dur, interval) in [(0, DIVISIONS_PER_QUARTER, 0), (12, EIGHTH, 7)] {
                if at >= ctx.measure_divs {
                    continue;
                }
                let root = 36 + ctx.chord_at(number, at).root_class();
                let dur = ctx.clip(at, dur);
                events.push(OverlayEvent::notes(at, dur, vec![note(root + interval, dur)]));
            }
            OverlayMeasure { number, events }
        })
        .collect();
    OverlayTrack::new(BASS_TRACK, "tumbao-lite", measures)
}

// ═══════════════════════════════════════════════════════════════════════
// Chords
// ═══════════════════════════════════════════════════════════════════════

/// Voice-led shell voicing generator shared by the comping patterns.
struct ShellVoicer {
    last_top: i32,
    complexity: f64,
}

impl ShellVoicer {
    /// Voicings sit at `12 * OCTAVE + pitch class`, MIDI 48 to 59.
    const OCTAVE: i32 = 4;

    fn new(complexity: f64) -> Self {
        Self { last_top: 60, complexity }
    }

    /// Third and seventh (plus ninth when complex), arranged so the
    /// candidate nearest the previous top voice is on top.
    fn voice(&mut self, chord: &ChordSymbol) -> Vec<i32> {
        let base = 12 * Self::OCTAVE;
        let mut notes = vec![
            base + chord.third().rem_euclid(12),
            base + chord.seventh().rem_euclid(12),
        ];
        if self.complexity > 0.6 {
            notes.push(base + chord.ninth().rem_euclid(12));
        }

        let Some(top) = nearest_voicing(self.last_top, &notes) else {
            return notes;
        };
        self.last_top = top;
        for n in &mut notes {
            if *n > top {
                *n -= 12;
            }
        }
        notes.sort_unstable();
        notes
    }

    fn hit(&mut self, chord: &ChordSymbol, at: u32, dur: u32, velocity: Option<u8>) -> OverlayEvent {
        let notes = self
            .voice(chord)
            .into_iter()
            .map(|m| {
                let n = note(m, dur);
                match velocity {
                    Some(v) => n.with_velocity(v),
                    None => n,
                }
            })
            .collect();
        OverlayEvent::notes(at, dur, notes)
    }
}

/// Shell voicings on the "and" of one and three, with a 16th anticipation
/// before each hit when density is above 0.6.
pub fn shell_voicings(ctx: &PatternContext) -> OverlayTrack {
    let mut voicer = ShellVoicer::new(ctx.complexity);
    let measures = ctx
        .measures()
        .map(|number| {
            let mut events = Vec::new();
            for at in ctx.onsets(&[HALF / 2, 3 * HALF / 2]) {
                let chord = ctx.chord_at(number, at);
                let hit = voicer.hit(&chord, at, ctx.clip(at, EIGHTH), None);
                if ctx.density > 0.6 && at >= SIXTEENTH {
                    let mut anticipation = hit.clone();
                    anticipation.at_divs = at - SIXTEENTH;
                    anticipation.dur_divs = SIXTEENTH;
                    for n in &mut anticipation.notes {
                        n.dur = NoteValue::Sixteenth;
                        n.dots = 0;
                    }
                    events.push(anticipation);
                }
                events.push(hit);
            }
            OverlayMeasure { number, events }
        })
        .collect();
    OverlayTrack::new(CHORDS_TRACK, "shell-voicings", measures)
}

/// Straight eighths; with complexity above 0.5 every eighth splits into a
/// 16th hit and a softer 16th push.
pub fn eighth_comping(ctx: &PatternContext) -> OverlayTrack {
    let mut voicer = ShellVoicer::new(ctx.complexity);
    let pushes = ctx.complexity > 0.5;
    let measures = ctx
        .measures()
        .map(|number| {
            let mut events = Vec::new();
            let mut at = 0;
            while at < ctx.measure_divs {
                let chord = ctx.chord_at(number, at);
                let main_dur = if pushes { SIXTEENTH } else { EIGHTH };
                events.push(voicer.hit(&chord, at, ctx.clip(at, main_dur), Some(90)));
                if pushes && at + SIXTEENTH < ctx.measure_divs {
                    let push_at = at + SIXTEENTH;
                    events.push(voicer.hit(&chord, push_at, ctx.clip(push_at, SIXTEENTH), Some(80)));
                }
                at += EIGHTH;
            }
            OverlayMeasure { number, events }
        })
        .collect();
    OverlayTrack::new(CHORDS_TRACK, "eighths", measures)
}

/// Long chord on the downbeat and a 16th anticipation before beat four.
pub fn anticipation_comping(ctx: &PatternContext) -> OverlayTrack {
    let mut voicer = ShellVoicer::new(ctx.complexity);
    let measures = ctx
        .measures()
        .map(|number| {
            let events = [(0, HALF), (HALF + 6, SIXTEENTH)]
                .into_iter()
                .filter(|(at, _)| *at < ctx.measure_divs)
                .map(|(at, dur)| {
                    let chord = ctx.chord_at(number, at);
                    voicer.hit(&chord, at, ctx.clip(at, dur), Some(90))
                })
                .collect();
            OverlayMeasure { number, events }
        })
        .collect();
    OverlayTrack::new(CHORDS_TRACK, "anticipations", measures)
}

// ═══════════════════════════════════════════════════════════════════════
// Drums
// ═══════════════════════════════════════════════════════════════════════

/// Ride on every eighth, hi-hat on two and four.
pub fn swing_drums(ctx: &PatternContext) -> OverlayTrack {
    let measures = ctx
        .measures()
        .map(|number| {
            let mut hits = Vec::new();
            let mut at = 0;
            while at < ctx.measure_divs {
                let dur = ctx.clip(at, SIXTEENTH);
                hits.push(OverlayEvent::notes(at, dur, vec![sound("Ride", dur, 90)]));
                at += EIGHTH;
            }
            for at in ctx.onsets(&[HALF / 2, 3 * HALF / 2]) {
                let dur = ctx.clip(at, SIXTEENTH);
                hits.push(OverlayEvent::notes(at, dur, vec![sound("HiHat", dur, 100)]));
            }
            OverlayMeasure { number, events: merge_simultaneous(hits) }
        })
        .collect();
    OverlayTrack::new(DRUMS_TRACK, "swing-ride", measures)
}

/// Hi-hat eighths, kick on one and three, snare on two and four.
pub fn rock_drums(ctx: &PatternContext) -> OverlayTrack {
    let measures = ctx
        .measures()
        .map(|number| {
            let mut hits = Vec::new();
            let mut at = 0;
            while at < ctx.measure_divs {
                let dur = ctx.clip(at, SIXTEENTH);
                hits.push(OverlayEvent::notes(at, dur, vec![sound("HiHat", dur, 80)]));
                at += EIGHTH;
            }
            for at in ctx.onsets(&[0, HALF]) {
                let dur = ctx.clip(at, SIXTEENTH);
                hits.push(OverlayEvent::notes(at, dur, vec![sound("Kick", dur, 100)]));
            }
            for at in ctx.onsets(&[HALF / 2, 3 * HALF / 2]) {
                let dur = ctx.clip(at, SIXTEENTH);
                hits.push(OverlayEvent::notes(at, dur, vec![sound("Snare", dur, 110)]));
            }
            OverlayMeasure { number, events: merge_simultaneous(hits) }
        })
        .collect();
    OverlayTrack::new(DRUMS_TRACK, "rock-beat", measures)
}

// ═══════════════════════════════════════════════════════════════════════
// Style dispatch
// ═══════════════════════════════════════════════════════════════════════

/// Overlays for a style. `ballad`, `latin` and unknown names play like
/// pop-rock; `none` produces nothing.
pub fn generate(style: &Style, ctx: &PatternContext, rng: &mut XorShift32) -> Vec<OverlayTrack> {
    match style {
        Style::None => Vec::new(),
        Style::JazzSwing => vec![walking_bass(ctx, rng), shell_voicings(ctx), swing_drums(ctx)],
        Style::Bossa => vec![tumbao_bass(ctx), anticipation_comping(ctx)],
        Style::PopRock | Style::Ballad | Style::Latin | Style::Unknown(_) => {
            vec![root_fifth_bass(ctx), eighth_comping(ctx), rock_drums(ctx)]
        }
    }
}
