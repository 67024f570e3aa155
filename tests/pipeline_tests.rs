//! End-to-end tests: fixture JSON through the whole pipeline, with the
//! MusicXML re-read by roxmltree and the MIDI re-read by midly.

use std::path::PathBuf;

use midly::{MidiMessage, Smf, TrackEventKind};
use pretty_assertions::assert_eq;
use roxmltree::{Document, Node, ParsingOptions};
use scorearrange::musicxml_check::{is_likely_musicxml, verify_part_alignment};
use scorearrange::{import, render, render_json, ArrangeConfig, EmitOptions};

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

fn output_dir() -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_output");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn parse_xml(xml: &str) -> Document<'_> {
    let opts = ParsingOptions { allow_dtd: true, ..ParsingOptions::default() };
    Document::parse_with_options(xml, opts).expect("emitted MusicXML must be well-formed")
}

/// Absolute note-on ticks per track.
fn note_on_ticks(smf: &Smf) -> Vec<Vec<u32>> {
    smf.tracks
        .iter()
        .map(|track| {
            let mut tick = 0;
            let mut ons = Vec::new();
            for e in track {
                tick += e.delta.as_int();
                if let TrackEventKind::Midi { message: MidiMessage::NoteOn { vel, .. }, .. } = e.kind {
                    if vel.as_int() > 0 {
                        ons.push(tick);
                    }
                }
            }
            ons
        })
        .collect()
}

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn duration(note: Node) -> u32 {
    child(note, "duration")
        .and_then(|d| d.text())
        .and_then(|t| t.parse().ok())
        .expect("every note has a duration")
}

// ═══════════════════════════════════════════════════════════════════════
// Two-track scenario
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn two_track_scenario() {
    let artifacts =
        render_json(&fixture("two_track.json"), &ArrangeConfig::passthrough(), &EmitOptions::default()).unwrap();

    assert!(is_likely_musicxml(&artifacts.musicxml));
    let doc = parse_xml(&artifacts.musicxml);
    let part_ids: Vec<_> = doc
        .descendants()
        .filter(|n| n.has_tag_name("part"))
        .filter_map(|n| n.attribute("id"))
        .collect();
    assert_eq!(part_ids, vec!["P1", "P2"]);
    assert!(verify_part_alignment(&artifacts.musicxml).unwrap().is_aligned());

    let divisions: Vec<_> = doc
        .descendants()
        .filter(|n| n.has_tag_name("divisions"))
        .filter_map(|n| n.text())
        .collect();
    assert_eq!(divisions, vec!["8", "8"]);

    let smf = Smf::parse(&artifacts.midi).unwrap();
    assert_eq!(smf.tracks.len(), 2);
    let counts: Vec<_> = note_on_ticks(&smf).iter().map(Vec::len).collect();
    assert_eq!(counts, vec![5, 6]);

    std::fs::write(output_dir().join("two_track.mid"), &artifacts.midi).ok();
    std::fs::write(output_dir().join("two_track.musicxml"), &artifacts.musicxml).ok();
    println!("✓ two-track: {} bytes XML, {} bytes MIDI", artifacts.musicxml.len(), artifacts.midi.len());
}

#[test]
fn musicxml_and_midi_agree_per_measure() {
    let score = import::score_from_text(&fixture("two_track.json")).unwrap();
    let artifacts = render(score, &ArrangeConfig::passthrough(), &EmitOptions::default()).unwrap();
    let doc = parse_xml(&artifacts.musicxml);
    let midi_ticks = note_on_ticks(&Smf::parse(&artifacts.midi).unwrap());
    let ticks_per_div = 480 / 8;

    for (pi, part) in doc.descendants().filter(|n| n.has_tag_name("part")).enumerate() {
        let mut xml_ticks = Vec::new();
        for (mi, measure) in part.children().filter(|n| n.has_tag_name("measure")).enumerate() {
            let offset = mi as u32 * 32;
            let mut cursor = 0;
            let mut last_start = 0;
            for note in measure.children().filter(|n| n.has_tag_name("note")) {
                let in_chord = child(note, "chord").is_some();
                let start = if in_chord { last_start } else { cursor };
                if child(note, "rest").is_none() {
                    xml_ticks.push((offset + start) * ticks_per_div);
                }
                if !in_chord {
                    last_start = cursor;
                    cursor += duration(note);
                }
            }
            assert_eq!(cursor, 32, "part {pi} measure {} does not fill 4/4", mi + 1);
        }
        assert_eq!(xml_ticks, midi_ticks[pi], "part {pi}");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Messy candidates and arrangement
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn malformed_candidate_renders_after_repair() {
    let artifacts = render_json(
        &fixture("malformed_candidate.txt"),
        &ArrangeConfig::passthrough(),
        &EmitOptions::default(),
    )
    .unwrap();

    let doc = parse_xml(&artifacts.musicxml);
    let title = doc.descendants().find(|n| n.has_tag_name("work-title")).and_then(|n| n.text());
    assert_eq!(title, Some("Late Bus"));

    let kinds: Vec<_> = doc
        .descendants()
        .filter(|n| n.has_tag_name("harmony"))
        .filter_map(|h| child(h, "root").and_then(|r| child(r, "root-step")).and_then(|s| s.text()))
        .collect();
    assert_eq!(kinds, vec!["F", "B"]);

    // Tied C5 sounds once; the cowbell falls back to the default key.
    let counts: Vec<_> = note_on_ticks(&Smf::parse(&artifacts.midi).unwrap()).iter().map(Vec::len).collect();
    assert_eq!(counts, vec![3, 0, 4]);
    assert_eq!(artifacts.fallbacks.len(), 1);
    assert_eq!(artifacts.fallbacks[0].value, "Cowbell");
}

#[test]
fn jazz_config_adds_overlay_tracks() {
    let config: ArrangeConfig = serde_json::from_str(&fixture("jazz_config.json")).unwrap();
    config.validate().unwrap();
    let emit = EmitOptions { include_overlays_in_musicxml: true, include_overlays_in_midi: true };
    let artifacts = render_json(&fixture("two_track.json"), &config, &emit).unwrap();

    assert_eq!(artifacts.overlays.len(), 3);
    let alignment = verify_part_alignment(&artifacts.musicxml).unwrap();
    assert!(alignment.is_aligned());
    assert_eq!(alignment.parts, vec!["P1", "P2", "P3", "P4", "P5"]);

    let smf = Smf::parse(&artifacts.midi).unwrap();
    assert_eq!(smf.tracks.len(), 5);
    let ticks = note_on_ticks(&smf);
    assert_eq!(ticks[0].len() + ticks[1].len(), 11);
    for (track, overlay) in ticks[2..].iter().zip(&artifacts.overlays) {
        assert_eq!(track.len(), overlay.note_count(), "{}", overlay.track_name);
    }

    let again = render_json(&fixture("two_track.json"), &config, &emit).unwrap();
    assert_eq!(again.midi, artifacts.midi);
    assert_eq!(again.musicxml, artifacts.musicxml);
    std::fs::write(output_dir().join("two_track_jazz.mid"), &artifacts.midi).ok();
}

#[test]
fn overlays_stay_out_of_musicxml_by_default() {
    let config: ArrangeConfig = serde_json::from_str(&fixture("jazz_config.json")).unwrap();
    let artifacts = render_json(&fixture("two_track.json"), &config, &EmitOptions::default()).unwrap();
    let alignment = verify_part_alignment(&artifacts.musicxml).unwrap();
    assert_eq!(alignment.parts.len(), 2);
    assert_eq!(Smf::parse(&artifacts.midi).unwrap().tracks.len(), 5);
}
