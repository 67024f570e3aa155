//! Integration tests for MIDI output: file structure, channels, programs,
//! tempo and the tick placement of transformed and overlay events.

use midly::num::u15;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use pretty_assertions::assert_eq;
use scorearrange::midi::TICKS_PER_QUARTER;
use scorearrange::timemap::{generate_timemap, total_duration_ms};
use scorearrange::{arrange, import, score_to_midi, ArrangeConfig, Score, Style};

/// Write bytes under `test_output/`, creating it if needed.
fn write_test_output(name: &str, data: &[u8]) {
    let dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_output");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), data).unwrap();
}

fn trio() -> Score {
    import::score_from_text(
        r#"{
          "meta": { "title": "Trio", "style": "pop", "tempoBPM": 90, "timeSignature": "3/4", "key": "G major" },
          "tracks": [
            { "name": "alto sax", "clef": "treble", "measures": [
              { "number": 1, "events": [
                { "pitch": "B4", "dur": "half", "velocity": 70 },
                { "pitch": "D5", "dur": "quarter", "tieStart": true } ] },
              { "number": 2, "events": [
                { "pitch": "D5", "dur": "half", "tieStop": true },
                { "rest": true, "dur": "quarter" } ] }
            ] },
            { "name": "bass", "clef": "bass", "midi": { "channel": 4, "program": 35 }, "measures": [
              { "number": 1, "events": [{ "pitch": "G2", "dur": "half", "dots": 1 }] },
              { "number": 2, "events": [{ "pitch": "D2", "dur": "half", "dots": 1 }] }
            ] },
            { "name": "kit", "clef": "percussion", "measures": [
              { "number": 1, "events": [
                { "pitch": "Kick", "dur": "quarter" },
                { "pitch": "Snare", "dur": "quarter" },
                { "pitch": "Tambourine", "dur": "quarter" } ] },
              { "number": 2, "events": [{ "rest": true, "dur": "half", "dots": 1 }] }
            ] }
          ]
        }"#,
    )
    .unwrap()
}

/// (tick, channel, key, velocity) for every note-on of a track.
fn note_ons(smf: &Smf, track: usize) -> Vec<(u32, u8, u8, u8)> {
    let mut tick = 0;
    let mut out = Vec::new();
    for e in &smf.tracks[track] {
        tick += e.delta.as_int();
        if let TrackEventKind::Midi { channel, message: MidiMessage::NoteOn { key, vel } } = e.kind {
            out.push((tick, channel.as_int(), key.as_int(), vel.as_int()));
        }
    }
    out
}

/// (tick, is_on, key) for every note-on and note-off of a track.
fn note_edges(smf: &Smf, track: usize) -> Vec<(u32, bool, u8)> {
    let mut tick = 0;
    let mut out = Vec::new();
    for e in &smf.tracks[track] {
        tick += e.delta.as_int();
        match e.kind {
            TrackEventKind::Midi { message: MidiMessage::NoteOn { key, .. }, .. } => out.push((tick, true, key.as_int())),
            TrackEventKind::Midi { message: MidiMessage::NoteOff { key, .. }, .. } => {
                out.push((tick, false, key.as_int()))
            }
            _ => {}
        }
    }
    out
}

fn programs(smf: &Smf) -> Vec<Option<u8>> {
    smf.tracks
        .iter()
        .map(|t| {
            t.iter().find_map(|e| match e.kind {
                TrackEventKind::Midi { message: MidiMessage::ProgramChange { program }, .. } => {
                    Some(program.as_int())
                }
                _ => None,
            })
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Direct path
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn midi_trio_valid_smf() {
    let midi = score_to_midi(&trio(), None, &[]).unwrap();
    let smf = Smf::parse(&midi).unwrap();

    assert_eq!(smf.header.timing, Timing::Metrical(u15::new(TICKS_PER_QUARTER)));
    assert_eq!(smf.tracks.len(), 3);

    let metas: Vec<_> = smf.tracks[0]
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(format!("tempo {}", t.as_int())),
            TrackEventKind::Meta(MetaMessage::TimeSignature(n, d, _, _)) => Some(format!("time {n}/{}", 1 << d)),
            _ => None,
        })
        .collect();
    assert_eq!(metas, vec!["tempo 666666", "time 3/4"]);

    write_test_output("trio.mid", &midi);
    println!("✓ trio MIDI: {} bytes, {} tracks", midi.len(), smf.tracks.len());
}

#[test]
fn midi_trio_notes_channels_and_ties() {
    let midi = score_to_midi(&trio(), Some(&ArrangeConfig::passthrough()), &[]).unwrap();
    let smf = Smf::parse(&midi).unwrap();

    // Tied D5 sounds once; unset velocity defaults to 100.
    assert_eq!(note_ons(&smf, 0), vec![(0, 0, 71, 70), (960, 0, 74, 100)]);
    assert_eq!(note_ons(&smf, 1), vec![(0, 4, 43, 100), (1440, 4, 38, 100)]);
    // Unknown percussion names fall back to the kick.
    assert_eq!(note_ons(&smf, 2), vec![(0, 9, 36, 100), (480, 9, 38, 100), (960, 9, 36, 100)]);

    assert_eq!(programs(&smf), vec![Some(66), Some(35), None]);
}

#[test]
fn midi_restruck_tie_keeps_on_off_balanced() {
    let score = import::score_from_text(
        r#"{
          "meta": { "title": "t", "style": "s", "tempoBPM": 120, "timeSignature": "4/4", "key": "C major" },
          "tracks": [{ "name": "piano", "clef": "treble", "measures": [
            { "number": 1, "events": [
              { "pitch": "C4", "dur": "half", "tieStart": true },
              { "pitch": "C4", "dur": "half" } ] }
          ] }]
        }"#,
    )
    .unwrap();

    for cfg in [None, Some(ArrangeConfig::passthrough())] {
        let midi = score_to_midi(&score, cfg.as_ref(), &[]).unwrap();
        let smf = Smf::parse(&midi).unwrap();
        assert_eq!(
            note_edges(&smf, 0),
            vec![(0, true, 60), (960, false, 60), (960, true, 60), (1920, false, 60)]
        );
    }
    println!("✓ unstopped tie released before the restrike");
}

#[test]
fn midi_rejects_out_of_range_measure_numbers() {
    let mut score = trio();
    score.tracks[0].measures[1].number = 200_000_000;
    assert!(score_to_midi(&score, None, &[]).is_err());
    assert!(score_to_midi(&score, Some(&ArrangeConfig::default()), &[]).is_err());
}

#[test]
fn timemap_follows_tempo_and_meter() {
    let map = generate_timemap(&trio()).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map[1].offset_divs, 24);
    // 3 quarters at 90 BPM
    assert!((map[0].duration_ms - 2000.0).abs() < 1e-9);
    assert!((total_duration_ms(&map) - 4000.0).abs() < 1e-9);
}

// ═══════════════════════════════════════════════════════════════════════
// Engine path and overlays
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn midi_humanized_stays_near_grid() {
    let cfg = ArrangeConfig::default();
    let direct = Smf::parse(&score_to_midi(&trio(), None, &[]).unwrap()).unwrap().tracks.len();
    let midi = score_to_midi(&trio(), Some(&cfg), &[]).unwrap();
    let smf = Smf::parse(&midi).unwrap();
    assert_eq!(smf.tracks.len(), direct);

    // 12 ms at 90 BPM is under 9 ticks.
    let ons = note_ons(&smf, 1);
    assert_eq!(ons.len(), 2);
    assert!(ons[0].0 <= 9);
    assert!(ons[1].0.abs_diff(1440) <= 9, "{ons:?}");

    let again = score_to_midi(&trio(), Some(&cfg), &[]).unwrap();
    assert_eq!(again, midi);
}

#[test]
fn midi_with_generated_accompaniment() {
    let mut cfg = ArrangeConfig::passthrough();
    cfg.accompaniment.enabled = true;
    cfg.accompaniment.style = Style::PopRock;
    let score = trio();
    let arranged = arrange(&score, &cfg).unwrap();
    let midi = score_to_midi(&arranged.base, Some(&cfg), &arranged.overlays).unwrap();
    let smf = Smf::parse(&midi).unwrap();

    assert_eq!(smf.tracks.len(), 3 + arranged.overlays.len());
    let channels: Vec<_> = (3..smf.tracks.len()).map(|t| note_ons(&smf, t)[0].1).collect();
    assert_eq!(channels, vec![3, 4, 9]);

    // Overlay measure 2 starts one 3/4 bar in.
    let drums = note_ons(&smf, 5);
    assert!(drums.iter().any(|(tick, ..)| *tick == 1440));
    assert!(drums.iter().all(|(tick, ..)| *tick < 2880));

    write_test_output("trio_pop.mid", &midi);
    println!("✓ trio with accompaniment: {} tracks", smf.tracks.len());
}
