//! Standard MIDI File emission.
//!
//! Produces an SMF Type 1 with one track per score track followed by one
//! track per overlay. The first track also carries the global tempo and time
//! signature. Without timing transforms the score is walked directly;
//! otherwise note positions come from [`crate::timing`] and the humanize
//! offsets are turned into ticks here, at the score tempo.

use std::collections::BTreeMap;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};

use crate::config::ArrangeConfig;
use crate::error::{Result, ScoreError};
use crate::model::{Event, Score, PERCUSSION_CHANNEL};
use crate::overlay::OverlayTrack;
use crate::pitch::{pitch_to_midi, Pitch};
use crate::timemap::Timeline;
use crate::timing;

/// Ticks per quarter note in our MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

/// Velocity for notes without one when the score is walked directly.
pub const DEFAULT_DIRECT_VELOCITY: u8 = 100;

/// Key used for percussion names that are not in the drum map.
pub const DEFAULT_PERCUSSION_KEY: u8 = 36;

const DRUM_MAP: [(&str, u8); 7] = [
    ("Kick", 36),
    ("Snare", 38),
    ("HiHat", 42),
    ("ClosedHiHat", 42),
    ("OpenHiHat", 46),
    ("Ride", 51),
    ("Tom", 45),
];

/// General MIDI key for a percussion sound name. A spelled pitch is taken
/// as the key itself.
pub fn percussion_key(name: &str) -> Option<u8> {
    DRUM_MAP
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, key)| *key)
        .or_else(|| {
            Pitch::parse(name)
                .ok()
                .map(|p| p.to_midi())
                .filter(|k| (0..=127).contains(k))
                .map(|k| k as u8)
        })
}

/// Program number guessed from a track name.
pub fn guess_program(track_name: &str) -> u8 {
    let n = track_name.to_lowercase();
    if n.contains("bass") {
        33
    } else if n.contains("sax") {
        66
    } else if n.contains("string") {
        48
    } else if n.contains("pad") {
        89
    } else {
        0
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Track building
// ═══════════════════════════════════════════════════════════════════════

/// Sort rank for events sharing a tick: meta, program, note-off, note-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Meta,
    Program,
    Off,
    On,
}

/// A MIDI event at an absolute tick.
#[derive(Debug, Clone)]
struct MidiEvent<'a> {
    tick: u32,
    rank: Rank,
    kind: TrackEventKind<'a>,
}

/// Collects one track's events and resolves ties.
///
/// A note with `tie_stop` continuing an open tie on the same key is not
/// retriggered; a note with `tie_start` is not released. An open tie is
/// released when its key is struck again without `tie_stop`, or at the end
/// of the track where its last note ends.
struct TrackBuilder<'a> {
    channel: u4,
    percussion: bool,
    events: Vec<MidiEvent<'a>>,
    open_ties: BTreeMap<u8, u32>,
}

struct NoteSpan<'n> {
    pitch: &'n str,
    start: u32,
    end: u32,
    velocity: u8,
    tie_start: bool,
    tie_stop: bool,
}

impl<'a> TrackBuilder<'a> {
    fn new(name: &'a str, channel: u8, program: Option<u8>) -> Self {
        let channel = u4::new(channel.min(15));
        let mut events = vec![MidiEvent {
            tick: 0,
            rank: Rank::Meta,
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        }];
        let percussion = channel.as_int() == PERCUSSION_CHANNEL;
        if let (Some(program), false) = (program, percussion) {
            events.push(MidiEvent {
                tick: 0,
                rank: Rank::Program,
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange { program: u7::new(program.min(127)) },
                },
            });
        }
        Self { channel, percussion, events, open_ties: BTreeMap::new() }
    }

    fn meta(&mut self, message: MetaMessage<'a>) {
        self.events.push(MidiEvent { tick: 0, rank: Rank::Meta, kind: TrackEventKind::Meta(message) });
    }

    fn key_for(&self, pitch: &str) -> Result<u8> {
        if self.percussion {
            return Ok(percussion_key(pitch).unwrap_or(DEFAULT_PERCUSSION_KEY));
        }
        Ok(pitch_to_midi(pitch)?.clamp(0, 127) as u8)
    }

    fn note(&mut self, span: NoteSpan) -> Result<()> {
        let key = self.key_for(span.pitch)?;
        let continues_tie = span.tie_stop && self.open_ties.contains_key(&key);
        if !continues_tie {
            // A tie that is never stopped ends before the key is struck again.
            if let Some(end) = self.open_ties.remove(&key) {
                self.push_off(key, end.min(span.start));
            }
            self.push_on(key, span.start, span.velocity);
        }
        if span.tie_start {
            self.open_ties.insert(key, span.end);
        } else {
            self.open_ties.remove(&key);
            self.push_off(key, span.end);
        }
        Ok(())
    }

    fn push_on(&mut self, key: u8, tick: u32, velocity: u8) {
        self.events.push(MidiEvent {
            tick,
            rank: Rank::On,
            kind: TrackEventKind::Midi {
                channel: self.channel,
                message: MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(velocity.clamp(1, 127)) },
            },
        });
    }

    fn push_off(&mut self, key: u8, tick: u32) {
        self.events.push(MidiEvent {
            tick,
            rank: Rank::Off,
            kind: TrackEventKind::Midi {
                channel: self.channel,
                message: MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) },
            },
        });
    }

    /// Sort, convert to delta times and terminate the track.
    fn finish(mut self) -> Track<'a> {
        let dangling = std::mem::take(&mut self.open_ties);
        for (key, end) in dangling {
            self.push_off(key, end);
        }

        self.events.sort_by_key(|e| (e.tick, e.rank));
        let mut track = Vec::with_capacity(self.events.len() + 1);
        let mut prev_tick = 0u32;
        for e in self.events {
            track.push(TrackEvent { delta: u28::new(e.tick.saturating_sub(prev_tick)), kind: e.kind });
            prev_tick = e.tick;
        }
        track.push(TrackEvent { delta: u28::new(0), kind: TrackEventKind::Meta(MetaMessage::EndOfTrack) });
        track
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Encode `score` and `overlays` as a Standard MIDI File.
///
/// `arrange` selects the path: `None`, or a config with quantize, humanize
/// and accompaniment all disabled, walks the score directly.
pub fn score_to_midi(
    score: &Score,
    arrange: Option<&ArrangeConfig>,
    overlays: &[OverlayTrack],
) -> Result<Vec<u8>> {
    let timeline = Timeline::for_score(score, TICKS_PER_QUARTER)?;
    let time = score.time_signature()?;

    let mut builders: Vec<TrackBuilder> = score
        .tracks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let program = t.program().unwrap_or_else(|| guess_program(&t.name));
            TrackBuilder::new(&t.name, t.channel(i), Some(program))
        })
        .collect();

    match arrange.filter(|cfg| cfg.transforms_requested()) {
        None => direct_notes(score, &timeline, &mut builders)?,
        Some(cfg) => transformed_notes(score, cfg, &timeline, &mut builders)?,
    }

    let base_count = score.tracks.len();
    for (i, ov) in overlays.iter().enumerate() {
        let channel = if ov.is_percussion() {
            PERCUSSION_CHANNEL
        } else {
            match (base_count + i).min(15) as u8 {
                PERCUSSION_CHANNEL => PERCUSSION_CHANNEL + 1,
                ch => ch,
            }
        };
        let mut builder = TrackBuilder::new(&ov.track_name, channel, Some(guess_program(&ov.track_name)));
        overlay_notes(ov, &timeline, &mut builder)?;
        builders.push(builder);
    }

    if let Some(first) = builders.first_mut() {
        let us_per_quarter = 60_000_000 / timeline.tempo_bpm.max(1);
        first.meta(MetaMessage::Tempo(u24::new(us_per_quarter)));
        let denom_pow = if time.beat_type.is_power_of_two() { time.beat_type.trailing_zeros() } else { 2 };
        first.meta(MetaMessage::TimeSignature(time.beats.min(255) as u8, denom_pow as u8, 24, 8));
    }

    let smf = Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        },
        tracks: builders.into_iter().map(TrackBuilder::finish).collect(),
    };

    let mut out = Vec::new();
    smf.write(&mut out)
        .map_err(|e| ScoreError::Midi(format!("failed to write MIDI: {e}")))?;
    tracing::debug!(tracks = smf.tracks.len(), bytes = out.len(), "midi emitted");
    Ok(out)
}

/// Sequential walk: every event starts where the previous one ended.
fn direct_notes(score: &Score, timeline: &Timeline, builders: &mut [TrackBuilder]) -> Result<()> {
    for (track, builder) in score.tracks.iter().zip(builders.iter_mut()) {
        for measure in &track.measures {
            let mut cursor = timeline.measure_offset(measure.number)?;
            for event in &measure.events {
                let divs = event.divisions();
                let start = timeline.divs_to_ticks(cursor);
                let end = timeline.divs_to_ticks(cursor + divs);
                if !matches!(event, Event::Rest(_)) {
                    for n in event.notes() {
                        builder.note(NoteSpan {
                            pitch: &n.pitch,
                            start,
                            end,
                            velocity: n.velocity.unwrap_or(DEFAULT_DIRECT_VELOCITY),
                            tie_start: n.tie_start,
                            tie_stop: n.tie_stop,
                        })?;
                    }
                }
                cursor += divs;
            }
        }
    }
    Ok(())
}

fn transformed_notes(
    score: &Score,
    cfg: &ArrangeConfig,
    timeline: &Timeline,
    builders: &mut [TrackBuilder],
) -> Result<()> {
    let result = timing::humanize_and_quantize(score, cfg);
    for ev in &result.events {
        let Some(builder) = builders.get_mut(ev.track_index) else {
            continue;
        };
        let offset = timeline.measure_offset(ev.measure_number)?;
        let start = timeline.absolute_tick(offset, ev.start_divs, ev.timing_offset_ms);
        let end = start + timeline.divs_to_ticks(ev.dur_divs);
        for n in &ev.notes {
            builder.note(NoteSpan {
                pitch: &n.pitch,
                start,
                end,
                velocity: n.velocity,
                tie_start: n.tie_start,
                tie_stop: n.tie_stop,
            })?;
        }
    }
    Ok(())
}

fn overlay_notes(overlay: &OverlayTrack, timeline: &Timeline, builder: &mut TrackBuilder) -> Result<()> {
    for measure in &overlay.measures {
        let offset = timeline.measure_offset(measure.number)?;
        for ev in &measure.events {
            let start = timeline.divs_to_ticks(offset + ev.at_divs);
            let end = timeline.divs_to_ticks(offset + ev.end_divs());
            for n in &ev.notes {
                builder.note(NoteSpan {
                    pitch: &n.pitch,
                    start,
                    end,
                    velocity: n.velocity.unwrap_or(DEFAULT_DIRECT_VELOCITY),
                    tie_start: n.tie_start,
                    tie_stop: n.tie_stop,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(track: &Track) -> Vec<(u32, bool, u8)> {
        let mut tick = 0;
        let mut out = Vec::new();
        for e in track {
            tick += e.delta.as_int();
            if let TrackEventKind::Midi { message, .. } = e.kind {
                match message {
                    MidiMessage::NoteOn { key, .. } => out.push((tick, true, key.as_int())),
                    MidiMessage::NoteOff { key, .. } => out.push((tick, false, key.as_int())),
                    _ => {}
                }
            }
        }
        out
    }

    #[test]
    fn drum_names_and_programs() {
        assert_eq!(percussion_key("Ride"), Some(51));
        assert_eq!(percussion_key("ClosedHiHat"), Some(42));
        assert_eq!(percussion_key("D2"), Some(38));
        assert_eq!(percussion_key("Cowbell"), None);
        assert_eq!(guess_program("Walking Bass"), 33);
        assert_eq!(guess_program("strings"), 48);
        assert_eq!(guess_program("melody"), 0);
    }

    #[test]
    fn ties_sustain_across_notes() {
        let mut b = TrackBuilder::new("t", 0, None);
        let span = |start, end, tie_start, tie_stop| NoteSpan {
            pitch: "C4",
            start,
            end,
            velocity: 90,
            tie_start,
            tie_stop,
        };
        b.note(span(0, 480, true, false)).unwrap();
        b.note(span(480, 960, true, true)).unwrap();
        b.note(span(960, 1440, false, true)).unwrap();
        let track = b.finish();
        assert_eq!(notes(&track), vec![(0, true, 60), (1440, false, 60)]);
    }

    #[test]
    fn dangling_tie_is_released() {
        let mut b = TrackBuilder::new("t", 0, None);
        b.note(NoteSpan { pitch: "E4", start: 0, end: 240, velocity: 90, tie_start: true, tie_stop: false })
            .unwrap();
        assert_eq!(notes(&b.finish()), vec![(0, true, 64), (240, false, 64)]);
    }

    #[test]
    fn unstopped_tie_is_released_before_restrike() {
        let mut b = TrackBuilder::new("t", 0, None);
        b.note(NoteSpan { pitch: "C4", start: 0, end: 960, velocity: 90, tie_start: true, tie_stop: false })
            .unwrap();
        b.note(NoteSpan { pitch: "C4", start: 960, end: 1920, velocity: 90, tie_start: false, tie_stop: false })
            .unwrap();
        assert_eq!(
            notes(&b.finish()),
            vec![(0, true, 60), (960, false, 60), (960, true, 60), (1920, false, 60)]
        );
    }

    #[test]
    fn note_off_sorts_before_note_on() {
        let mut b = TrackBuilder::new("t", 0, None);
        let plain = |start, end| NoteSpan { pitch: "G4", start, end, velocity: 90, tie_start: false, tie_stop: false };
        b.note(plain(480, 960)).unwrap();
        b.note(plain(0, 480)).unwrap();
        assert_eq!(
            notes(&b.finish()),
            vec![(0, true, 67), (480, false, 67), (480, true, 67), (960, false, 67)]
        );
    }

    #[test]
    fn percussion_channel_skips_program_change() {
        let b = TrackBuilder::new("drums", 9, Some(0));
        let track = b.finish();
        assert!(!track.iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Midi { message: MidiMessage::ProgramChange { .. }, .. }
        )));
    }
}
