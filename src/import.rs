//! Tolerant import of candidate scores.
//!
//! Candidates usually come from a text generator and are often slightly off:
//! wrapped in prose or markdown fences, nested under a `score` key, with meta
//! fields at the top level, `notes` instead of `events`, single notes wrapped
//! in arrays, or chord symbols typed where a pitch should be. This module
//! repairs those shapes on raw JSON and then parses the result into the
//! strict [`Score`] model, reporting anything still wrong as a
//! [`ScoreError::SchemaViolation`] with a JSON path.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use crate::duration::{NoteValue, TimeSignature};
use crate::error::{Result, ScoreError};
use crate::model::*;
use crate::pitch::Pitch;

const META_KEYS: [&str; 6] = ["title", "style", "tempoBPM", "timeSignature", "key", "length"];
const WRAPPER_KEYS: [&str; 4] = ["score", "result", "data", "SymbolicScore"];

/// Highest measure number a score may use; matches the `length.measures` bound.
pub const MAX_MEASURE_NUMBER: u32 = 128;

// ═══════════════════════════════════════════════════════════════════════
// Text → JSON
// ═══════════════════════════════════════════════════════════════════════

/// Pull a JSON value out of free text.
///
/// Tries, in order: the whole text, the first ```` ```json ```` fenced block,
/// and the slice between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text.trim()) {
        return Some(v);
    }

    if let Some(body) = fenced_json_block(text) {
        if let Ok(v) = serde_json::from_str(body) {
            return Some(v);
        }
    }

    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last > first {
        if let Ok(v) = serde_json::from_str(&text[first..=last]) {
            return Some(v);
        }
    }
    None
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    let open = lower.find("```json")?;
    let after_tag = open + "```json".len();
    let body_start = after_tag + text[after_tag..].find('\n')? + 1;
    let body_len = text[body_start..].find("```")?;
    Some(&text[body_start..body_start + body_len])
}

/// Unwrap a score nested under a well-known key (`score`, `result`, `data`,
/// `SymbolicScore`). Values that already look like a score pass through.
pub fn coerce_candidate(raw: Value) -> Value {
    let Value::Object(mut obj) = raw else {
        return raw;
    };
    if looks_like_score(&obj) {
        return Value::Object(obj);
    }
    for key in WRAPPER_KEYS {
        let nested = obj.get(key).and_then(Value::as_object).is_some_and(looks_like_score);
        if nested {
            if let Some(inner) = obj.remove(key) {
                return inner;
            }
        }
    }
    Value::Object(obj)
}

fn looks_like_score(obj: &Map<String, Value>) -> bool {
    obj.contains_key("meta") && obj.contains_key("tracks")
}

// ═══════════════════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════════════════

/// Repair common candidate mistakes in place on raw JSON.
///
/// Rules, applied in this order:
/// 1. Stray top-level meta fields move into `meta` (created with defaults
///    when absent; an existing `meta` keeps its own values).
/// 2. A measure with `notes` but no `events` has the key renamed.
/// 3. A single-element event array whose pitch is a valid spelling is
///    unwrapped into a plain note.
/// 4. A single-element event array whose "pitch" is not a valid spelling is
///    taken as a chord symbol: it becomes a harmony annotation on beat 1 and
///    the event is replaced by a rest of the same duration.
///
/// Anything else is left for [`parse_score`] to accept or reject.
pub fn normalize_candidate(candidate: Value) -> Value {
    let Value::Object(mut obj) = candidate else {
        return candidate;
    };

    hoist_meta(&mut obj);

    if let Some(Value::Array(tracks)) = obj.get_mut("tracks") {
        for track in tracks.iter_mut() {
            let Some(Value::Array(measures)) = track.get_mut("measures") else {
                continue;
            };
            for measure in measures.iter_mut() {
                if let Value::Object(m) = measure {
                    normalize_measure(m);
                }
            }
        }
    }

    Value::Object(obj)
}

fn hoist_meta(obj: &mut Map<String, Value>) {
    let stray: Vec<(String, Value)> = META_KEYS
        .iter()
        .filter_map(|k| obj.remove(*k).map(|v| (k.to_string(), v)))
        .collect();
    if stray.is_empty() {
        return;
    }

    let meta_missing = !matches!(obj.get("meta"), Some(Value::Object(_)));
    if meta_missing {
        let mut meta = Map::new();
        meta.insert("title".into(), Value::from("Untitled"));
        meta.insert("style".into(), Value::from("unknown"));
        meta.insert("tempoBPM".into(), Value::from(120));
        meta.insert("timeSignature".into(), Value::from("4/4"));
        meta.insert("key".into(), Value::from("C major"));
        for (k, v) in stray {
            meta.insert(k, v);
        }
        obj.insert("meta".into(), Value::Object(meta));
    } else if let Some(Value::Object(meta)) = obj.get_mut("meta") {
        for (k, v) in stray {
            meta.entry(k).or_insert(v);
        }
    }
}

fn normalize_measure(m: &mut Map<String, Value>) {
    if !m.get("events").is_some_and(Value::is_array) {
        if let Some(notes @ Value::Array(_)) = m.remove("notes") {
            m.insert("events".into(), notes);
        }
    }

    let Some(Value::Array(events)) = m.remove("events") else {
        return;
    };

    let mut harmony_additions = Vec::new();
    let mut normalized = Vec::with_capacity(events.len());
    for ev in events {
        match singleton_note(&ev) {
            Some(first) => {
                let pitch = first.get("pitch").and_then(Value::as_str).unwrap_or_default();
                if Pitch::is_valid(pitch) {
                    normalized.push(Value::Object(unwrapped_note(first)));
                } else {
                    let mut harmony = Map::new();
                    harmony.insert("beat".into(), Value::from(1));
                    harmony.insert("chord".into(), Value::from(pitch));
                    harmony_additions.push(Value::Object(harmony));
                    normalized.push(Value::Object(rest_like(first)));
                }
            }
            None => normalized.push(ev),
        }
    }
    m.insert("events".into(), Value::Array(normalized));

    if !harmony_additions.is_empty() {
        let harmony = m.entry("harmony").or_insert_with(|| Value::Array(Vec::new()));
        if !harmony.is_array() {
            *harmony = Value::Array(Vec::new());
        }
        if let Value::Array(list) = harmony {
            list.extend(harmony_additions);
        }
    }
}

/// The only element of a one-element array, if it is an object with a string pitch.
fn singleton_note(ev: &Value) -> Option<&Map<String, Value>> {
    match ev.as_array()?.as_slice() {
        [Value::Object(first)] if first.get("pitch").is_some_and(Value::is_string) => Some(first),
        _ => None,
    }
}

fn unwrapped_note(src: &Map<String, Value>) -> Map<String, Value> {
    ["pitch", "dur", "dots", "velocity", "tieStart", "tieStop"]
        .iter()
        .filter_map(|k| src.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn rest_like(src: &Map<String, Value>) -> Map<String, Value> {
    let mut rest = Map::new();
    rest.insert("rest".into(), Value::Bool(true));
    for k in ["dur", "dots"] {
        if let Some(v) = src.get(k) {
            rest.insert(k.into(), v.clone());
        }
    }
    rest
}

// ═══════════════════════════════════════════════════════════════════════
// Strict parse
// ═══════════════════════════════════════════════════════════════════════

/// Parse a (normalized) candidate into the strict score model.
pub fn parse_score(value: &Value) -> Result<Score> {
    let root = as_object(value, "$")?;

    let meta = parse_meta(field(root, "meta", "$")?, "meta")?;

    let tracks_val = field(root, "tracks", "$")?;
    let tracks_arr = as_array(tracks_val, "tracks")?;
    if tracks_arr.is_empty() {
        return Err(ScoreError::schema("tracks", "at least one track is required"));
    }
    let tracks = tracks_arr
        .iter()
        .enumerate()
        .map(|(i, t)| parse_track(t, &format!("tracks[{i}]")))
        .collect::<Result<Vec<_>>>()?;

    let transpositions = match root.get("transpositions") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(v) => parse_transpositions(v)?,
    };

    Ok(Score { meta, tracks, transpositions })
}

/// Extract, coerce, normalize and parse in one go.
pub fn score_from_text(text: &str) -> Result<Score> {
    let raw = extract_json(text)
        .ok_or_else(|| ScoreError::schema("$", "no JSON object found in candidate text"))?;
    parse_score(&normalize_candidate(coerce_candidate(raw)))
}

fn parse_meta(value: &Value, path: &str) -> Result<Meta> {
    let obj = as_object(value, path)?;
    let time_signature = string_field(obj, "timeSignature", path)?;
    TimeSignature::parse(&time_signature)?;

    let length = match obj.get("length") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let lpath = format!("{path}.length");
            let l = as_object(v, &lpath)?;
            let measures = optional_int(l, "measures", &lpath, 1, i64::from(MAX_MEASURE_NUMBER))?.map(|n| n as u32);
            Some(LengthHint { measures })
        }
    };

    Ok(Meta {
        title: string_field(obj, "title", path)?,
        style: string_field(obj, "style", path)?,
        tempo_bpm: int_field(obj, "tempoBPM", path, 30, 300)? as u32,
        time_signature,
        key: string_field(obj, "key", path)?,
        length,
    })
}

fn parse_track(value: &Value, path: &str) -> Result<Track> {
    let obj = as_object(value, path)?;

    let name = string_field(obj, "name", path)?;
    if name.is_empty() {
        return Err(ScoreError::schema(format!("{path}.name"), "must not be empty"));
    }

    let clef_name = string_field(obj, "clef", path)?;
    let clef = Clef::from_name(&clef_name).ok_or_else(|| {
        ScoreError::schema(
            format!("{path}.clef"),
            format!("expected treble, bass or percussion, got {clef_name:?}"),
        )
    })?;

    let midi = match obj.get("midi") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let mpath = format!("{path}.midi");
            let m = as_object(v, &mpath)?;
            Some(MidiHints {
                channel: int_field(m, "channel", &mpath, 0, 15)? as u8,
                program: optional_int(m, "program", &mpath, 0, 127)?.map(|p| p as u8),
                percussion: optional_bool(m, "percussion", &mpath)?,
            })
        }
    };

    let measures_arr = as_array(field(obj, "measures", path)?, &format!("{path}.measures"))?;
    if measures_arr.is_empty() {
        return Err(ScoreError::schema(
            format!("{path}.measures"),
            "at least one measure is required",
        ));
    }
    let mut seen = HashSet::new();
    let mut measures = Vec::with_capacity(measures_arr.len());
    for (i, m) in measures_arr.iter().enumerate() {
        let mpath = format!("{path}.measures[{i}]");
        let measure = parse_measure(m, &mpath)?;
        if !seen.insert(measure.number) {
            return Err(ScoreError::schema(
                format!("{mpath}.number"),
                format!("measure number {} appears twice", measure.number),
            ));
        }
        measures.push(measure);
    }

    Ok(Track { name, clef, midi, measures })
}

fn parse_measure(value: &Value, path: &str) -> Result<Measure> {
    let obj = as_object(value, path)?;
    let number = int_field(obj, "number", path, 1, i64::from(MAX_MEASURE_NUMBER))? as u32;

    let harmony = match obj.get("harmony") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => {
            let hpath = format!("{path}.harmony");
            as_array(v, &hpath)?
                .iter()
                .enumerate()
                .map(|(i, h)| parse_harmony(h, &format!("{hpath}[{i}]")))
                .collect::<Result<Vec<_>>>()?
        }
    };

    let events_path = format!("{path}.events");
    let events_arr = as_array(field(obj, "events", path)?, &events_path)?;
    if events_arr.is_empty() {
        return Err(ScoreError::schema(events_path, "at least one event is required"));
    }
    let events = events_arr
        .iter()
        .enumerate()
        .map(|(i, e)| parse_event(e, &format!("{events_path}[{i}]")))
        .collect::<Result<Vec<_>>>()?;

    Ok(Measure { number, harmony, events })
}

fn parse_harmony(value: &Value, path: &str) -> Result<HarmonyMark> {
    let obj = as_object(value, path)?;
    let beat = field(obj, "beat", path)?
        .as_f64()
        .filter(|b| *b >= 1.0)
        .ok_or_else(|| ScoreError::schema(format!("{path}.beat"), "expected a number >= 1"))?;
    Ok(HarmonyMark {
        beat,
        chord: string_field(obj, "chord", path)?,
    })
}

fn parse_event(value: &Value, path: &str) -> Result<Event> {
    match value {
        Value::Array(items) => {
            if items.len() < 2 {
                return Err(ScoreError::schema(path, "a chord needs at least two notes"));
            }
            let notes = items
                .iter()
                .enumerate()
                .map(|(i, n)| parse_pitch_note(n, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()?;
            Ok(Event::Chord(notes))
        }
        Value::Object(obj) if !obj.contains_key("pitch") && obj.contains_key("rest") => {
            if obj.get("rest") != Some(&Value::Bool(true)) {
                return Err(ScoreError::schema(format!("{path}.rest"), "expected true"));
            }
            Ok(Event::Rest(RestNote {
                dur: note_value(obj, path)?,
                dots: dots(obj, path)?,
            }))
        }
        Value::Object(_) => Ok(Event::Note(parse_pitch_note(value, path)?)),
        _ => Err(ScoreError::schema(path, "expected a note, a rest or an array of notes")),
    }
}

fn parse_pitch_note(value: &Value, path: &str) -> Result<PitchNote> {
    let obj = as_object(value, path)?;
    Ok(PitchNote {
        pitch: string_field(obj, "pitch", path)?,
        dur: note_value(obj, path)?,
        dots: dots(obj, path)?,
        tie_start: optional_bool(obj, "tieStart", path)?.unwrap_or(false),
        tie_stop: optional_bool(obj, "tieStop", path)?.unwrap_or(false),
        velocity: optional_int(obj, "velocity", path, 0, 127)?.map(|v| v as u8),
    })
}

fn parse_transpositions(value: &Value) -> Result<BTreeMap<String, Transposition>> {
    let obj = as_object(value, "transpositions")?;
    let mut out = BTreeMap::new();
    for (name, t) in obj {
        let path = format!("transpositions.{name}");
        let t_obj = as_object(t, &path)?;
        out.insert(
            name.clone(),
            Transposition {
                chromatic: int_field(t_obj, "chromatic", &path, i64::from(i32::MIN), i64::from(i32::MAX))? as i32,
                octave_change: optional_int(t_obj, "octaveChange", &path, i64::from(i32::MIN), i64::from(i32::MAX))?
                    .map(|o| o as i32),
            },
        );
    }
    Ok(out)
}

// ── field helpers ──────────────────────────────────────────────────────

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ScoreError::schema(path, "expected an object"))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ScoreError::schema(path, "expected an array"))
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| ScoreError::schema(format!("{path}.{key}"), "required field is missing"))
}

fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String> {
    field(obj, key, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ScoreError::schema(format!("{path}.{key}"), "expected a string"))
}

/// Integers may arrive as `120` or `120.0`; fractional values are rejected.
fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| f as i64)
    })
}

fn int_field(obj: &Map<String, Value>, key: &str, path: &str, min: i64, max: i64) -> Result<i64> {
    let v = field(obj, key, path)?;
    checked_int(v, &format!("{path}.{key}"), min, max)
}

fn optional_int(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    min: i64,
    max: i64,
) -> Result<Option<i64>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => checked_int(v, &format!("{path}.{key}"), min, max).map(Some),
    }
}

fn checked_int(v: &Value, path: &str, min: i64, max: i64) -> Result<i64> {
    match integer(v) {
        Some(n) if (min..=max).contains(&n) => Ok(n),
        Some(n) => Err(ScoreError::schema(path, format!("{n} is outside [{min}, {max}]"))),
        None => Err(ScoreError::schema(path, "expected an integer")),
    }
}

fn optional_bool(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<bool>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ScoreError::schema(format!("{path}.{key}"), "expected a boolean")),
    }
}

fn note_value(obj: &Map<String, Value>, path: &str) -> Result<NoteValue> {
    let name = string_field(obj, "dur", path)?;
    NoteValue::from_name(&name).ok_or_else(|| {
        ScoreError::schema(
            format!("{path}.dur"),
            format!("expected whole, half, quarter, eighth, 16th or 32nd, got {name:?}"),
        )
    })
}

fn dots(obj: &Map<String, Value>, path: &str) -> Result<u8> {
    Ok(optional_int(obj, "dots", path, 0, 2)?.unwrap_or(0) as u8)
}
