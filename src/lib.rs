//! scorearrange: symbolic scores to MusicXML 3.1 and Standard MIDI Files.
//!
//! Scores are imported from (possibly messy) JSON candidates, padded and
//! checked against the meter, optionally quantized, swung and humanized,
//! decorated with generated accompaniment overlays, and emitted as
//! partwise MusicXML plus an SMF Type 1.
//!
//! # Example
//! ```no_run
//! use scorearrange::{render_json, ArrangeConfig, EmitOptions};
//!
//! let json = std::fs::read_to_string("score.json").unwrap();
//! let artifacts = render_json(&json, &ArrangeConfig::default(), &EmitOptions::default()).unwrap();
//! std::fs::write("score.musicxml", &artifacts.musicxml).unwrap();
//! std::fs::write("score.mid", &artifacts.midi).unwrap();
//! ```

pub mod accompaniment;
pub mod compose;
pub mod config;
pub mod duration;
pub mod error;
pub mod import;
pub mod midi;
pub mod model;
pub mod musicxml;
pub mod musicxml_check;
pub mod overlay;
pub mod pitch;
pub mod rng;
pub mod timemap;
pub mod timing;
pub mod validate;

pub use compose::{compose, fallback_score, render, Artifacts, CompositionRequest, Instrument};
pub use config::{ArrangeConfig, EmitOptions, Style};
pub use error::{MeterMismatch, Result, ScoreError};
pub use midi::score_to_midi;
pub use model::*;
pub use musicxml::score_to_musicxml;
pub use overlay::{arrange, ArrangedResult, OverlayTrack};
pub use timing::humanize_and_quantize;

/// Parse candidate JSON text (tolerantly) and render it.
pub fn render_json(text: &str, config: &ArrangeConfig, emit: &EmitOptions) -> Result<Artifacts> {
    render(import::score_from_text(text)?, config, emit)
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI for native hosts (static or dynamic library)
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

fn compose_envelope(request_json: &str, candidate: Option<&str>) -> Result<serde_json::Value> {
    let request: CompositionRequest = serde_json::from_str(request_json)?;
    Ok(compose(candidate, &request)?.to_json())
}

/// Compose from a JSON `CompositionRequest` and optional candidate text.
///
/// Returns `{"musicxml": ..., "midiB64": ...}`, or `{"error": ...}` when the
/// request or candidate is rejected. Null only when `request_json` is null
/// or not UTF-8. The caller must free the result with
/// `scorearrange_free_string`.
///
/// # Safety
/// `request_json` must be a valid null-terminated C string. `candidate` may
/// be null.
#[no_mangle]
pub unsafe extern "C" fn scorearrange_compose_json(
    request_json: *const c_char,
    candidate: *const c_char,
) -> *mut c_char {
    if request_json.is_null() {
        return std::ptr::null_mut();
    }
    let request = match unsafe { CStr::from_ptr(request_json) }.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let candidate = if candidate.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(candidate) }.to_str().ok()
    };

    let body = match compose_envelope(request, candidate) {
        Ok(v) => v.to_string(),
        Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
    };
    CString::new(body).unwrap_or_default().into_raw()
}

/// Free a string previously returned by a scorearrange function.
///
/// # Safety
/// `ptr` must be a string previously returned by a scorearrange function, or null.
#[no_mangle]
pub unsafe extern "C" fn scorearrange_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
