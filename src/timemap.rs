//! Absolute position of every measure, in divisions, ticks and milliseconds.
//!
//! Scores carry a single tempo and meter, so measure `n` starts at
//! `(n - 1) * measure_divisions`. This is the bridge that puts
//! measure-relative engine and overlay events on the global timeline.

use crate::duration::DIVISIONS_PER_QUARTER;
use crate::error::{Result, ScoreError};
use crate::model::Score;

/// Timing information for one measure number.
#[derive(Debug, Clone, PartialEq)]
pub struct TimemapEntry {
    /// 1-based measure number
    pub number: u32,
    /// Start of the measure in divisions from the beginning
    pub offset_divs: u32,
    /// Cumulative start time in milliseconds
    pub timestamp_ms: f64,
    /// Length of the measure in milliseconds
    pub duration_ms: f64,
}

/// Tempo and meter shared by every measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub tempo_bpm: u32,
    pub measure_divs: u32,
    pub ticks_per_quarter: u16,
}

impl Timeline {
    pub fn for_score(score: &Score, ticks_per_quarter: u16) -> Result<Timeline> {
        Ok(Timeline {
            tempo_bpm: score.meta.tempo_bpm,
            measure_divs: score.measure_divisions()?,
            ticks_per_quarter,
        })
    }

    /// Start of measure `number` in divisions.
    pub fn measure_offset(&self, number: u32) -> Result<u32> {
        u64::from(number.saturating_sub(1))
            .checked_mul(u64::from(self.measure_divs))
            .and_then(|divs| u32::try_from(divs).ok())
            .ok_or_else(|| ScoreError::schema("measure.number", format!("measure {number} is out of range")))
    }

    /// `round(divs / 8 * TPQ)`
    pub fn divs_to_ticks(&self, divs: u32) -> u32 {
        (divs as f64 / DIVISIONS_PER_QUARTER as f64 * self.ticks_per_quarter as f64).round() as u32
    }

    /// `round(ms / 60000 * tempo * TPQ)`; negative offsets give negative ticks.
    pub fn ms_to_ticks(&self, ms: f64) -> i64 {
        (ms / 60_000.0 * self.tempo_bpm as f64 * self.ticks_per_quarter as f64).round() as i64
    }

    pub fn divs_to_ms(&self, divs: u32) -> f64 {
        divs as f64 / DIVISIONS_PER_QUARTER as f64 * 60_000.0 / self.tempo_bpm as f64
    }

    /// Absolute tick of a measure-relative position plus a millisecond
    /// offset, clamped at zero.
    pub fn absolute_tick(&self, measure_offset_divs: u32, start_divs: u32, offset_ms: f64) -> u32 {
        let base = self.divs_to_ticks(measure_offset_divs + start_divs) as i64;
        (base + self.ms_to_ticks(offset_ms)).max(0) as u32
    }
}

/// One entry per measure number from 1 to the highest number in the score.
pub fn generate_timemap(score: &Score) -> Result<Vec<TimemapEntry>> {
    // Ticks are irrelevant here; only tempo and meter are read.
    let timeline = Timeline::for_score(score, 480)?;
    let duration_ms = timeline.divs_to_ms(timeline.measure_divs);

    (1..=score.max_measure_number())
        .map(|number| {
            let offset_divs = timeline.measure_offset(number)?;
            Ok(TimemapEntry {
                number,
                offset_divs,
                timestamp_ms: timeline.divs_to_ms(offset_divs),
                duration_ms,
            })
        })
        .collect()
}

/// Total duration of the entire timemap in milliseconds.
pub fn total_duration_ms(timemap: &[TimemapEntry]) -> f64 {
    timemap.last().map_or(0.0, |e| e.timestamp_ms + e.duration_ms)
}
