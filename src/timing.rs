//! Timing transforms for MIDI performance: quantization, swing and
//! humanization.
//!
//! Every transform works on measure-relative division positions. The
//! humanization offset stays in milliseconds and is only turned into ticks
//! by the MIDI emitter, which knows the tempo. Randomness comes from one
//! [`XorShift32`] seeded from the config, drawn in a fixed order: for each
//! event the timing offset first, then one velocity draw per note. A rest
//! counts as a single note, so it consumes draws without producing output.

use serde::Serialize;

use crate::config::{ArrangeConfig, HumanizeConfig, QuantizeConfig, VelocityCurve};
use crate::model::{Event, Score};
use crate::rng::XorShift32;

/// Velocity used when a note does not carry one.
pub const DEFAULT_ENGINE_VELOCITY: u8 = 96;

/// One note of a [`TimedEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedNote {
    pub pitch: String,
    pub velocity: u8,
    pub tie_start: bool,
    pub tie_stop: bool,
}

/// A sounding event after transforms.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    pub track_index: usize,
    pub measure_number: u32,
    /// Measure-relative onset after quantize and swing
    pub start_divs: u32,
    /// Untransformed duration
    pub dur_divs: u32,
    /// Integer milliseconds, applied at tick rendering
    pub timing_offset_ms: f64,
    pub notes: Vec<TimedNote>,
}

/// What the engine did, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingAnnotations {
    pub grid_divs: u32,
    pub swing_active: bool,
    pub swing_ratio: f64,
    pub seed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingResult {
    pub events: Vec<TimedEvent>,
    pub annotations: TimingAnnotations,
}

/// Round half up, so `-2.5` becomes `-2` and `2.5` becomes `3`.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Move `start` toward the nearest grid line by `strength`.
pub fn quantize_position(start: u32, grid_divs: u32, strength: f64) -> u32 {
    let grid = grid_divs.max(1) as f64;
    let snapped = (start as f64 / grid).round() * grid;
    lerp(start as f64, snapped, strength).round().max(0.0) as u32
}

/// Swing delay for a position: zero for the first grid unit of each pair,
/// `round((ratio - 0.5) * 2 * grid)` for the second.
pub fn swing_offset(position: u32, grid_divs: u32, ratio: f64) -> i64 {
    let grid = grid_divs.max(1);
    if (position / grid) % 2 == 1 {
        ((ratio - 0.5) * 2.0 * grid as f64).round() as i64
    } else {
        0
    }
}

fn swing_active(quantize: &QuantizeConfig) -> bool {
    quantize.swing.enabled && quantize.grid.swingable()
}

/// Integer millisecond jitter for one event, or zero without humanize.
fn timing_offset(humanize: &HumanizeConfig, rng: &mut XorShift32) -> f64 {
    if humanize.enabled && humanize.timing_jitter_ms > 0.0 {
        let jitter = humanize.timing_jitter_ms;
        round_half_up(rng.range(-jitter, jitter))
    } else {
        0.0
    }
}

/// Apply jitter (when humanizing) and the velocity curve to one note.
fn shape_velocity(base: u8, humanize: &HumanizeConfig, rng: &mut XorShift32) -> u8 {
    let mut vel = base as f64;
    if humanize.enabled && humanize.velocity_jitter > 0.0 {
        let delta = rng.range(-1.0, 1.0) * 127.0 * humanize.velocity_jitter;
        vel = round_half_up(vel + delta).clamp(1.0, 127.0);
    }
    if let Some(curve) = humanize.velocity_curve {
        let p = vel / 127.0;
        let mapped = match curve {
            VelocityCurve::Linear => p,
            other => p.powf(other.exponent()),
        };
        vel = round_half_up(mapped * 127.0).clamp(1.0, 127.0);
    }
    vel as u8
}

/// Run quantize, swing and humanize over every sounding event of `score`.
///
/// Rests consume their timing and velocity draws, then only advance the
/// cursor. The cursor always advances by the base duration, so transforms
/// never accumulate across events.
pub fn humanize_and_quantize(score: &Score, cfg: &ArrangeConfig) -> TimingResult {
    let grid_divs = cfg.quantize.grid.divisions();
    let swing = swing_active(&cfg.quantize);
    let mut rng = XorShift32::new(cfg.seed);
    let mut events = Vec::new();

    for (track_index, track) in score.tracks.iter().enumerate() {
        let swing_track = swing && cfg.quantize.swing.applies_to(&track.name);
        for measure in &track.measures {
            let mut cursor = 0u32;
            for event in &measure.events {
                let base_divs = event.divisions();
                if let Event::Rest(_) = event {
                    timing_offset(&cfg.humanize, &mut rng);
                    shape_velocity(DEFAULT_ENGINE_VELOCITY, &cfg.humanize, &mut rng);
                    cursor += base_divs;
                    continue;
                }

                let mut start = cursor;
                if cfg.quantize.enabled {
                    start = quantize_position(start, grid_divs, cfg.quantize.strength);
                }
                if swing_track {
                    let shifted = start as i64 + swing_offset(start, grid_divs, cfg.quantize.swing.ratio);
                    start = shifted.max(0) as u32;
                }

                let timing_offset_ms = timing_offset(&cfg.humanize, &mut rng);

                let notes = event
                    .notes()
                    .iter()
                    .map(|n| TimedNote {
                        pitch: n.pitch.clone(),
                        velocity: shape_velocity(
                            n.velocity.unwrap_or(DEFAULT_ENGINE_VELOCITY),
                            &cfg.humanize,
                            &mut rng,
                        ),
                        tie_start: n.tie_start,
                        tie_stop: n.tie_stop,
                    })
                    .collect();

                events.push(TimedEvent {
                    track_index,
                    measure_number: measure.number,
                    start_divs: start,
                    dur_divs: base_divs,
                    timing_offset_ms,
                    notes,
                });
                cursor += base_divs;
            }
        }
    }

    tracing::trace!(events = events.len(), grid_divs, swing, "timing transforms applied");

    TimingResult {
        events,
        annotations: TimingAnnotations {
            grid_divs,
            swing_active: swing,
            swing_ratio: if swing { cfg.quantize.swing.ratio } else { 0.5 },
            seed: cfg.seed,
        },
    }
}
