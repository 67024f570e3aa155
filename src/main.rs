//! Command-line front end for scorearrange.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use scorearrange::validate::{self, Fallback};
use scorearrange::{import, Artifacts, ArrangeConfig, CompositionRequest, EmitOptions, ScoreError};
use tracing_subscriber::EnvFilter;

/// Symbolic scores to MusicXML and MIDI
#[derive(Parser)]
#[command(name = "scorearrange")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a score (or candidate text containing one) to MusicXML and MIDI
    Render {
        /// Score JSON, or text with a JSON score embedded in it
        input: PathBuf,

        /// ArrangeConfig JSON; missing fields take their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output path without extension (default: the input path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the {musicxml, midiB64} envelope to stdout instead of writing files
        #[arg(long)]
        json: bool,

        /// Add generated overlays to the MusicXML as extra parts
        #[arg(long)]
        overlays_in_musicxml: bool,

        /// Leave generated overlays out of the MIDI file
        #[arg(long)]
        no_overlays_in_midi: bool,
    },

    /// Normalize and validate a score, reporting every meter error
    Check {
        input: PathBuf,
    },

    /// Compose from a CompositionRequest, falling back to a generated score
    Compose {
        /// CompositionRequest JSON
        request: PathBuf,

        /// Candidate text; without it the fallback score is used
        #[arg(long)]
        candidate: Option<PathBuf>,

        /// Output path without extension
        #[arg(short, long, default_value = "composition")]
        output: PathBuf,
    },

    /// Print the deterministic fallback score for a CompositionRequest
    Fallback {
        request: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render { input, config, output, json, overlays_in_musicxml, no_overlays_in_midi } => {
            let text = read(&input)?;
            let config = match config {
                Some(path) => serde_json::from_str(&read(&path)?)
                    .with_context(|| format!("invalid config {}", path.display()))?,
                None => ArrangeConfig::default(),
            };
            let emit = EmitOptions {
                include_overlays_in_musicxml: overlays_in_musicxml,
                include_overlays_in_midi: !no_overlays_in_midi,
            };
            let artifacts = scorearrange::render_json(&text, &config, &emit).map_err(report)?;
            log_fallbacks(&artifacts.fallbacks);
            if json {
                println!("{}", artifacts.to_json());
            } else {
                write_artifacts(&artifacts, output.as_deref().unwrap_or(input.as_path()))?;
            }
        }
        Commands::Check { input } => {
            let score = import::score_from_text(&read(&input)?).map_err(report)?;
            let padded = validate::prepare(score).map_err(report)?;
            log_fallbacks(&validate::fallbacks(&padded, &ArrangeConfig::default()));
            tracing::info!(
                tracks = padded.tracks.len(),
                measures = padded.max_measure_number(),
                notes = padded.note_count(),
                "score is valid"
            );
        }
        Commands::Compose { request, candidate, output } => {
            let request = read_request(&request)?;
            let candidate = candidate.as_deref().map(read).transpose()?;
            let artifacts = scorearrange::compose(candidate.as_deref(), &request).map_err(report)?;
            if artifacts.used_fallback_score {
                tracing::warn!("no usable candidate, rendered the fallback score");
            }
            log_fallbacks(&artifacts.fallbacks);
            write_artifacts(&artifacts, &output)?;
        }
        Commands::Fallback { request } => {
            let score = scorearrange::fallback_score(&read_request(&request)?)?;
            println!("{}", serde_json::to_string_pretty(&score)?);
        }
    }
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_request(path: &Path) -> anyhow::Result<CompositionRequest> {
    let request: CompositionRequest = serde_json::from_str(&read(path)?)
        .with_context(|| format!("invalid composition request {}", path.display()))?;
    request.validate()?;
    Ok(request)
}

fn write_artifacts(artifacts: &Artifacts, stem: &Path) -> anyhow::Result<()> {
    let xml_path = stem.with_extension("musicxml");
    let midi_path = stem.with_extension("mid");
    fs::write(&xml_path, &artifacts.musicxml)
        .with_context(|| format!("failed to write {}", xml_path.display()))?;
    fs::write(&midi_path, &artifacts.midi)
        .with_context(|| format!("failed to write {}", midi_path.display()))?;
    tracing::info!(
        musicxml = %xml_path.display(),
        midi = %midi_path.display(),
        overlays = artifacts.overlays.len(),
        "wrote artifacts"
    );
    Ok(())
}

fn log_fallbacks(fallbacks: &[Fallback]) {
    for f in fallbacks {
        tracing::warn!(kind = ?f.kind, location = %f.location, value = %f.value, resolved = %f.resolved, "unknown name");
    }
}

/// Log each meter mismatch on its own line before failing.
fn report(err: ScoreError) -> anyhow::Error {
    if let ScoreError::Meter(mismatches) = &err {
        for m in mismatches {
            tracing::error!(
                track = %m.track,
                measure = m.measure,
                expected = m.expected,
                actual = m.actual,
                "measure does not fill the meter"
            );
        }
    }
    anyhow::Error::new(err)
}
