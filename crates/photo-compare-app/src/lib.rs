#![warn(missing_docs)]
//! # photo-compare-app
//!
//! ## Purpose
//! Orchestrates manifest loading, camera negotiation, ghost overlay, capture
//! encoding, navigation and host messaging for one embedded widget.
//!
//! ## Responsibilities
//! - Own every subsystem of a widget instance ([`PhotoWidget`]); no global
//!   state.
//! - Route host commands, user actions and camera outcomes through the
//!   capture state machine and present only changed view models.
//! - Report failures to the host (`photo.error`) and to the user (toast),
//!   and keep a bounded diagnostic log fed by `tracing`.
//! - Provide browser bindings on `wasm32` and a manifest-checking CLI
//!   natively.
//!
//! ## Data flow
//! Launch params + config -> manifest (URL, file, rapport API or parent
//! message) -> state machine view -> camera stream + ghost overlay -> capture
//! encode -> preview/confirm -> host message.
//!
//! ## Ownership and lifetimes
//! The widget owns its subsystems; browser callbacks hold an `Rc` to it.
//! Captured stills are handed to the host by value and dropped on retake or
//! manifest replacement.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`WidgetError`], which maps each
//! variant to at most one host-facing [`ErrorCode`].
//!
//! ## Security and privacy notes
//! - Host traffic is origin pinned; outbound messages never use `*`.
//! - Diagnostic and log text passes through [`redact_sensitive`].
//! - The bearer token is only sent to manifest endpoints.

pub mod diagnostics;
pub mod view;
mod widget;

#[cfg(target_arch = "wasm32")]
pub mod web;

use std::time::{SystemTime, UNIX_EPOCH};

use photo_compare_bridge::BridgeError;
use photo_compare_camera::CameraError;
use photo_compare_config::ConfigError;
use photo_compare_core::{ErrorCode, ReferenceManifest};
use photo_compare_encoder::EncodeError;
use photo_compare_flow::FlowError;
use photo_compare_manifest::ManifestError;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use widget::{CaptureOutcome, PhotoWidget, WidgetDeps};

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("PHOTO_COMPARE_VERSION");

const REDACTED: &str = "<redacted>";
const SECRET_KEYS: [&str; 5] = ["password", "secret", "token", "authorization", "bearer"];

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Redacts secrets and bulky payloads in log-safe output.
///
/// - `key=value` / `key:value` pairs for secret-looking keys lose their value
///   (up to the next `&`, `,` or `;`).
/// - The word after `Bearer` (or after an empty secret value) is dropped.
/// - `data:` URLs keep their media type and report the payload length.
pub fn redact_sensitive(input: &str) -> String {
    let mut words = Vec::new();
    let mut redact_next = false;

    for word in input.split(' ') {
        if redact_next && !word.is_empty() && !word.eq_ignore_ascii_case("bearer") {
            words.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        let (cleaned, value_follows) = redact_word(word);
        redact_next = value_follows || (redact_next && word.is_empty());
        words.push(cleaned);
    }

    words.join(" ")
}

fn redact_word(word: &str) -> (String, bool) {
    if word.eq_ignore_ascii_case("bearer") {
        return (word.to_string(), true);
    }
    if let Some(rest) = word.strip_prefix("data:")
        && let Some(comma) = rest.find(',')
    {
        let payload = rest.len() - comma - 1;
        return (format!("data:{},<{payload} chars>", &rest[..comma]), false);
    }

    let lower = word.to_ascii_lowercase();
    let mut cleaned = String::with_capacity(word.len());
    let mut cursor = 0;
    let mut value_follows = false;

    while let Some(value_start) = find_secret_value(&lower, cursor) {
        let value_end = word[value_start..]
            .find(['&', ',', ';'])
            .map_or(word.len(), |offset| value_start + offset);
        let value = &word[value_start..value_end];
        value_follows = value.is_empty() || value.eq_ignore_ascii_case("bearer");

        cleaned.push_str(&word[cursor..value_start]);
        if !value.is_empty() {
            cleaned.push_str(REDACTED);
        }
        cursor = value_end;
    }
    cleaned.push_str(&word[cursor..]);

    (cleaned, value_follows)
}

/// Byte offset of the first secret value at or after `from`.
fn find_secret_value(lower: &str, from: usize) -> Option<usize> {
    SECRET_KEYS
        .iter()
        .filter_map(|key| {
            lower[from..].match_indices(key).find_map(|(position, _)| {
                let separator = from + position + key.len();
                matches!(lower.as_bytes().get(separator), Some(b'=' | b':'))
                    .then_some(separator + 1)
            })
        })
        .min()
}

/// Wall-clock source for capture timestamps.
pub trait Clock {
    /// Unix epoch milliseconds.
    fn now_ms(&self) -> u64;
}

/// [`Clock`] over [`SystemTime`]. Not available in browsers; see
/// `web::BrowserClock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Formats epoch milliseconds as an RFC 3339 UTC timestamp.
///
/// # Errors
/// Returns [`WidgetError::Timestamp`] when the instant is out of range.
pub fn format_taken_at(epoch_ms: u64) -> Result<String, WidgetError> {
    let nanos = i128::from(epoch_ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|error| WidgetError::Timestamp(error.to_string()))?
        .format(&Rfc3339)
        .map_err(|error| WidgetError::Timestamp(error.to_string()))
}

/// One line per piece: `piece_id | nom | references | steps`.
pub fn summarize_manifest(manifest: &ReferenceManifest) -> Vec<String> {
    manifest
        .pieces()
        .iter()
        .map(|piece| {
            format!(
                "{} | {} | {} reference(s) | {} step(s)",
                piece.piece_id(),
                piece.nom(),
                piece.reference_count(),
                piece.steps().len()
            )
        })
        .collect()
}

/// Widget-level error type.
#[derive(Debug, Error)]
pub enum WidgetError {
    /// Invalid configuration or launch parameters.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Manifest could not be loaded; `code` tells which source failed.
    #[error("manifest error ({code}): {source}")]
    Manifest {
        /// `REF_LOAD_FAILED` or `RAPPORT_LOAD_FAILED`.
        code: ErrorCode,
        /// Underlying failure.
        #[source]
        source: ManifestError,
    },
    /// Camera negotiation failure.
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    /// Snapshot or encode failure.
    #[error("capture error: {0}")]
    Capture(#[from] EncodeError),
    /// Navigation request not valid in the current state.
    #[error("navigation error: {0}")]
    Flow(#[from] FlowError),
    /// Host message failure.
    #[error("host bridge error: {0}")]
    Bridge(#[from] BridgeError),
    /// No manifest has been loaded yet.
    #[error("no manifest loaded")]
    NoManifest,
    /// Capture requested outside the capture view.
    #[error("no reference is being framed")]
    NoCaptureTarget,
    /// Confirmation requested without a previewed capture.
    #[error("no capture awaiting confirmation")]
    NoPendingCapture,
    /// Capture time could not be formatted.
    #[error("invalid capture timestamp: {0}")]
    Timestamp(String),
}

impl WidgetError {
    /// Host-facing error code, when this failure is reportable.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            WidgetError::Manifest { code, .. } => Some(*code),
            WidgetError::Camera(error) => error.code(),
            WidgetError::Capture(error) => error.code(),
            WidgetError::Bridge(error) => error.code(),
            WidgetError::Timestamp(_) => Some(ErrorCode::CaptureFailed),
            WidgetError::Config(_)
            | WidgetError::Flow(_)
            | WidgetError::NoManifest
            | WidgetError::NoCaptureTarget
            | WidgetError::NoPendingCapture => None,
        }
    }
}
