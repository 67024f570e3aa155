//! Arrangement and emission configuration.
//!
//! All structs deserialize from camelCase JSON with every field optional;
//! missing fields take the documented defaults, so a config file only needs
//! to name what it changes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ScoreError};

pub const DEFAULT_SEED: u32 = 1337;

/// Everything the timing engine and the accompaniment generator read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArrangeConfig {
    pub seed: u32,
    pub quantize: QuantizeConfig,
    pub humanize: HumanizeConfig,
    pub accompaniment: AccompanimentConfig,
}

impl Default for ArrangeConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            quantize: QuantizeConfig::default(),
            humanize: HumanizeConfig::default(),
            accompaniment: AccompanimentConfig::default(),
        }
    }
}

/// Quantization grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grid {
    #[serde(rename = "1/4")]
    Quarter,
    #[serde(rename = "1/8")]
    Eighth,
    #[serde(rename = "1/16")]
    Sixteenth,
    #[serde(rename = "1/32")]
    ThirtySecond,
}

impl Grid {
    /// Grid spacing in divisions.
    pub fn divisions(self) -> u32 {
        match self {
            Grid::Quarter => 8,
            Grid::Eighth => 4,
            Grid::Sixteenth => 2,
            Grid::ThirtySecond => 1,
        }
    }

    /// Swing only makes sense on eighth and sixteenth grids.
    pub fn swingable(self) -> bool {
        matches!(self, Grid::Eighth | Grid::Sixteenth)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuantizeConfig {
    pub enabled: bool,
    pub grid: Grid,
    /// 0 = untouched, 1 = fully on grid
    pub strength: f64,
    pub swing: SwingConfig,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grid: Grid::Eighth,
            strength: 0.7,
            swing: SwingConfig::default(),
        }
    }
}

/// Which tracks swing applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingTarget {
    Melody,
    Chords,
    Bass,
    Drums,
    #[serde(rename = "*")]
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwingConfig {
    pub enabled: bool,
    /// 0.5 = straight, ~0.66 = triplet feel, 0.75 = maximal
    pub ratio: f64,
    pub apply_to: Vec<SwingTarget>,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio: 0.66,
            apply_to: vec![SwingTarget::All],
        }
    }
}

impl SwingConfig {
    /// Whether swing applies to a track, matching roles by name substring.
    pub fn applies_to(&self, track_name: &str) -> bool {
        let name = track_name.to_lowercase();
        self.apply_to.iter().any(|target| match target {
            SwingTarget::All => true,
            SwingTarget::Melody => name.contains("melody"),
            SwingTarget::Chords => name.contains("chord"),
            SwingTarget::Bass => name.contains("bass"),
            SwingTarget::Drums => name.contains("drum"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityCurve {
    Linear,
    #[default]
    Soft,
    Hard,
}

impl VelocityCurve {
    pub fn exponent(self) -> f64 {
        match self {
            VelocityCurve::Linear => 1.0,
            VelocityCurve::Soft => 0.7,
            VelocityCurve::Hard => 1.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HumanizeConfig {
    pub enabled: bool,
    pub timing_jitter_ms: f64,
    pub velocity_jitter: f64,
    pub velocity_curve: Option<VelocityCurve>,
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timing_jitter_ms: 12.0,
            velocity_jitter: 0.12,
            velocity_curve: Some(VelocityCurve::Soft),
        }
    }
}

/// Accompaniment style as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Style {
    JazzSwing,
    PopRock,
    Bossa,
    Ballad,
    Latin,
    None,
    /// Anything else; generated like pop-rock.
    Unknown(String),
}

impl Style {
    pub fn from_name(name: &str) -> Style {
        match name {
            "jazz-swing" => Style::JazzSwing,
            "pop-rock" => Style::PopRock,
            "bossa" => Style::Bossa,
            "ballad" => Style::Ballad,
            "latin" => Style::Latin,
            "none" => Style::None,
            other => Style::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Style::JazzSwing => "jazz-swing",
            Style::PopRock => "pop-rock",
            Style::Bossa => "bossa",
            Style::Ballad => "ballad",
            Style::Latin => "latin",
            Style::None => "none",
            Style::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Style {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Style {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Style::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccompanimentConfig {
    pub enabled: bool,
    pub style: Style,
    pub density: f64,
    pub complexity: f64,
}

impl Default for AccompanimentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            style: Style::None,
            density: 0.5,
            complexity: 0.5,
        }
    }
}

impl ArrangeConfig {
    /// A config with every transform and the accompaniment switched off.
    pub fn passthrough() -> Self {
        let mut cfg = Self::default();
        cfg.quantize.enabled = false;
        cfg.humanize.enabled = false;
        cfg.accompaniment.enabled = false;
        cfg
    }

    /// Whether the MIDI emitter has to go through the timing engine.
    pub fn transforms_requested(&self) -> bool {
        self.quantize.enabled || self.humanize.enabled || self.accompaniment.enabled
    }

    /// Check every numeric range.
    pub fn validate(&self) -> Result<()> {
        check_range("quantize.strength", self.quantize.strength, 0.0, 1.0)?;
        if self.quantize.swing.enabled {
            check_range("quantize.swing.ratio", self.quantize.swing.ratio, 0.55, 0.75)?;
        }
        check_range("humanize.timingJitterMs", self.humanize.timing_jitter_ms, 0.0, 50.0)?;
        check_range("humanize.velocityJitter", self.humanize.velocity_jitter, 0.0, 1.0)?;
        check_range("accompaniment.density", self.accompaniment.density, 0.0, 1.0)?;
        check_range("accompaniment.complexity", self.accompaniment.complexity, 0.0, 1.0)?;
        Ok(())
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ScoreError::config(field, format!("{value} is outside [{min}, {max}]")))
    }
}

/// Which generated overlays each artifact includes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmitOptions {
    #[serde(rename = "includeOverlaysInMusicXML")]
    pub include_overlays_in_musicxml: bool,
    #[serde(rename = "includeOverlaysInMIDI")]
    pub include_overlays_in_midi: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            include_overlays_in_musicxml: false,
            include_overlays_in_midi: true,
        }
    }
}
