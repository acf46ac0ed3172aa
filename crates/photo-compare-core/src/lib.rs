#![warn(missing_docs)]
//! # photo-compare-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `photo-compare` workspace.
//!
//! ## Responsibilities
//! - Represent a validated reference manifest (pieces and reference photos).
//! - Identify capture slots (`pieceId:refIndex`) independently of wire ids.
//! - Represent captured stills and the stable host-facing error codes.
//!
//! ## Data flow
//! The manifest crate decodes wire JSON and builds a [`ReferenceManifest`]
//! through the validating constructors here. The flow crate reads it to drive
//! navigation, and the encoder emits [`CapturedPhoto`] values keyed by
//! [`SlotKey`].
//!
//! ## Ownership and lifetimes
//! A [`ReferenceManifest`] is immutable once built and is replaced wholesale on
//! reload. Captured photos own their JPEG bytes.
//!
//! ## Error model
//! Structural violations return [`CoreError`] variants. Anything that fails
//! here fails the whole manifest.
//!
//! ## Example
//! ```rust
//! use photo_compare_core::{Piece, ReferenceManifest, ReferencePhoto, SlotKey};
//!
//! let photo = ReferencePhoto::new("https://cdn.example.test/salon-1.jpg").unwrap();
//! let piece = Piece::new("salon", "Salon", vec![photo]).unwrap();
//! let manifest = ReferenceManifest::new("log-1", "rap-1", vec![piece]).unwrap();
//! assert_eq!(manifest.reference_count("salon"), Some(1));
//! assert_eq!(SlotKey::new("salon", 0).to_string(), "salon:0");
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Stable error codes surfaced to the host through `photo.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Manifest missing or invalid.
    RefLoadFailed,
    /// Every camera acquisition strategy was exhausted.
    CameraDenied,
    /// No video input device exists.
    NoCamerasDetected,
    /// Switch chain exhausted and the revert also failed.
    CameraSwitchFailed,
    /// Frame snapshot or encode failure.
    CaptureFailed,
    /// Remote report fetch or parse failure.
    RapportLoadFailed,
}

impl ErrorCode {
    /// Returns the wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RefLoadFailed => "REF_LOAD_FAILED",
            ErrorCode::CameraDenied => "CAMERA_DENIED",
            ErrorCode::NoCamerasDetected => "NO_CAMERAS_DETECTED",
            ErrorCode::CameraSwitchFailed => "CAMERA_SWITCH_FAILED",
            ErrorCode::CaptureFailed => "CAPTURE_FAILED",
            ErrorCode::RapportLoadFailed => "RAPPORT_LOAD_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reference photo the user must reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePhoto {
    url: String,
}

impl ReferencePhoto {
    /// Builds a reference photo from an absolute `http`/`https` URL.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidReferenceUrl`] for anything else.
    pub fn new(url: impl Into<String>) -> Result<Self, CoreError> {
        let url = url.into();
        if !is_http_url(&url) {
            return Err(CoreError::InvalidReferenceUrl(url));
        }
        Ok(Self { url })
    }

    /// Returns the photo URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Inspection step attached to a piece. Display-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Step {
    /// Step identifier.
    pub etape_id: String,
    /// Short task label.
    pub task_name: String,
    /// Optional free-text instruction.
    pub consigne: Option<String>,
    /// Optional picture attached to the step.
    pub checking_picture: Option<String>,
}

/// A room of the property with its ordered reference photos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    piece_id: String,
    nom: String,
    commentaire_ia: Option<String>,
    reference_photos: Vec<ReferencePhoto>,
    steps: Vec<Step>,
}

impl Piece {
    /// Builds a piece with at least one reference photo.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyPieceId`] for a blank id and
    /// [`CoreError::NoReferencePhotos`] when `reference_photos` is empty.
    pub fn new(
        piece_id: impl Into<String>,
        nom: impl Into<String>,
        reference_photos: Vec<ReferencePhoto>,
    ) -> Result<Self, CoreError> {
        let piece_id = piece_id.into();
        if piece_id.trim().is_empty() {
            return Err(CoreError::EmptyPieceId);
        }
        if reference_photos.is_empty() {
            return Err(CoreError::NoReferencePhotos(piece_id));
        }

        Ok(Self {
            piece_id,
            nom: nom.into(),
            commentaire_ia: None,
            reference_photos,
            steps: Vec::new(),
        })
    }

    /// Attaches inspection steps.
    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// Attaches the generated room comment.
    pub fn with_comment(mut self, commentaire_ia: Option<String>) -> Self {
        self.commentaire_ia = commentaire_ia;
        self
    }

    /// Piece identifier.
    pub fn piece_id(&self) -> &str {
        &self.piece_id
    }

    /// Display name.
    pub fn nom(&self) -> &str {
        &self.nom
    }

    /// Generated room comment, when present.
    pub fn commentaire_ia(&self) -> Option<&str> {
        self.commentaire_ia.as_deref()
    }

    /// Ordered reference photos (never empty).
    pub fn reference_photos(&self) -> &[ReferencePhoto] {
        &self.reference_photos
    }

    /// Inspection steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of reference photos.
    pub fn reference_count(&self) -> usize {
        self.reference_photos.len()
    }

    /// Slot keys for every reference of this piece, in order.
    pub fn slots(&self) -> impl Iterator<Item = SlotKey> + '_ {
        (0..self.reference_photos.len()).map(|index| SlotKey::new(self.piece_id.clone(), index))
    }
}

/// Validated reference-photo manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceManifest {
    logement_id: String,
    rapport_id: String,
    pieces: Vec<Piece>,
}

impl ReferenceManifest {
    /// Builds a manifest from validated pieces.
    ///
    /// # Errors
    /// Returns [`CoreError::NoPieces`] for an empty piece list and
    /// [`CoreError::DuplicatePieceId`] when two pieces share an id.
    pub fn new(
        logement_id: impl Into<String>,
        rapport_id: impl Into<String>,
        pieces: Vec<Piece>,
    ) -> Result<Self, CoreError> {
        if pieces.is_empty() {
            return Err(CoreError::NoPieces);
        }

        let mut seen = HashSet::with_capacity(pieces.len());
        for piece in &pieces {
            if !seen.insert(piece.piece_id.as_str()) {
                return Err(CoreError::DuplicatePieceId(piece.piece_id.clone()));
            }
        }

        Ok(Self {
            logement_id: logement_id.into(),
            rapport_id: rapport_id.into(),
            pieces,
        })
    }

    /// Property identifier.
    pub fn logement_id(&self) -> &str {
        &self.logement_id
    }

    /// Report identifier.
    pub fn rapport_id(&self) -> &str {
        &self.rapport_id
    }

    /// Pieces in manifest order (never empty).
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Looks up a piece by id.
    pub fn piece(&self, piece_id: &str) -> Option<&Piece> {
        self.pieces.iter().find(|piece| piece.piece_id == piece_id)
    }

    /// Position of a piece in manifest order.
    pub fn piece_index(&self, piece_id: &str) -> Option<usize> {
        self.pieces.iter().position(|piece| piece.piece_id == piece_id)
    }

    /// Reference count of a piece, or `None` when the piece is unknown.
    pub fn reference_count(&self, piece_id: &str) -> Option<usize> {
        self.piece(piece_id).map(Piece::reference_count)
    }

    /// Reference photo addressed by a slot.
    pub fn reference(&self, slot: &SlotKey) -> Option<&ReferencePhoto> {
        self.piece(&slot.piece_id)
            .and_then(|piece| piece.reference_photos.get(slot.reference_index))
    }

    /// Returns `true` when the slot addresses an existing reference.
    pub fn contains_slot(&self, slot: &SlotKey) -> bool {
        self.reference(slot).is_some()
    }

    /// Total number of reference photos across pieces.
    pub fn total_references(&self) -> usize {
        self.pieces.iter().map(Piece::reference_count).sum()
    }
}

/// Identifies one capture slot: a reference index within a piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    /// Owning piece id.
    pub piece_id: String,
    /// Zero-based reference index within the piece.
    pub reference_index: usize,
}

impl SlotKey {
    /// Creates a slot key.
    pub fn new(piece_id: impl Into<String>, reference_index: usize) -> Self {
        Self {
            piece_id: piece_id.into(),
            reference_index,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.piece_id, self.reference_index)
    }
}

impl FromStr for SlotKey {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // Piece ids may contain ':'; the index is always after the last one.
        let (piece_id, index) = raw
            .rsplit_once(':')
            .ok_or_else(|| CoreError::InvalidSlotKey(raw.to_string()))?;
        if piece_id.is_empty() {
            return Err(CoreError::InvalidSlotKey(raw.to_string()));
        }
        let reference_index = index
            .parse()
            .map_err(|_| CoreError::InvalidSlotKey(raw.to_string()))?;
        Ok(Self::new(piece_id, reference_index))
    }
}

/// Pixel dimensions of an encoded still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

/// One captured still. Owned by the host once confirmed; never persisted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
    /// `data:image/jpeg;base64,...` form of [`CapturedPhoto::jpeg`].
    pub data_url: String,
    /// Capture time in Unix epoch milliseconds.
    pub taken_at_ms: u64,
    /// Output dimensions.
    pub meta: CaptureMeta,
}

impl CapturedPhoto {
    /// Builds a captured photo.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyCapture`] when the JPEG buffer or data URL is
    /// empty, or when either dimension is zero.
    pub fn new(
        jpeg: Vec<u8>,
        data_url: String,
        taken_at_ms: u64,
        meta: CaptureMeta,
    ) -> Result<Self, CoreError> {
        if jpeg.is_empty() || data_url.is_empty() || meta.width == 0 || meta.height == 0 {
            return Err(CoreError::EmptyCapture);
        }
        Ok(Self {
            jpeg,
            data_url,
            taken_at_ms,
            meta,
        })
    }
}

/// Returns `true` for a well-formed absolute `http`/`https` URL with a host.
pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Error type for core model validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Manifest has no pieces.
    #[error("manifest contains no pieces")]
    NoPieces,
    /// Piece id is blank.
    #[error("piece id is empty")]
    EmptyPieceId,
    /// Piece has no reference photos.
    #[error("piece {0} has no reference photos")]
    NoReferencePhotos(String),
    /// Two pieces share one id.
    #[error("duplicate piece id: {0}")]
    DuplicatePieceId(String),
    /// Reference URL is not an absolute http(s) URL.
    #[error("invalid reference url: {0}")]
    InvalidReferenceUrl(String),
    /// Slot key text is malformed.
    #[error("invalid slot key: {0}")]
    InvalidSlotKey(String),
    /// Captured still has no content.
    #[error("captured photo is empty")]
    EmptyCapture,
}

#[cfg(test)]
mod tests {
    //! Unit tests for manifest construction and slot keys.

    use super::*;

    fn photo(name: &str) -> ReferencePhoto {
        ReferencePhoto::new(format!("https://cdn.example.test/{name}.jpg"))
            .expect("fixture url should be valid")
    }

    #[test]
    fn rejects_non_http_reference_urls() {
        assert!(ReferencePhoto::new("ftp://cdn.example.test/a.jpg").is_err());
        assert!(ReferencePhoto::new("data:image/png;base64,AAAA").is_err());
        assert!(ReferencePhoto::new("/relative/a.jpg").is_err());
        assert!(ReferencePhoto::new("http://cdn.example.test/a.jpg").is_ok());
    }

    #[test]
    fn rejects_duplicate_piece_ids() {
        let first = Piece::new("cuisine", "Cuisine", vec![photo("a")]).unwrap();
        let second = Piece::new("cuisine", "Cuisine bis", vec![photo("b")]).unwrap();
        assert_eq!(
            ReferenceManifest::new("l", "r", vec![first, second]),
            Err(CoreError::DuplicatePieceId("cuisine".to_string()))
        );
    }

    #[test]
    fn slot_key_parses_ids_containing_colons() {
        let slot: SlotKey = "etage:1:chambre:2".parse().expect("slot should parse");
        assert_eq!(slot, SlotKey::new("etage:1:chambre", 2));
        assert!("no-index".parse::<SlotKey>().is_err());
        assert!(":3".parse::<SlotKey>().is_err());
    }

    #[test]
    fn error_codes_serialize_in_wire_spelling() {
        let encoded = serde_json::to_string(&ErrorCode::NoCamerasDetected).unwrap();
        assert_eq!(encoded, "\"NO_CAMERAS_DETECTED\"");
        assert_eq!(ErrorCode::RapportLoadFailed.as_str(), "RAPPORT_LOAD_FAILED");
    }
}
