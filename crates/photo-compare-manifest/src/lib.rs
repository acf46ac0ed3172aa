#![warn(missing_docs)]
//! # photo-compare-manifest
//!
//! ## Purpose
//! Decodes, validates, and loads the reference-photo manifest.
//!
//! ## Responsibilities
//! - Mirror the manifest wire format ([`ManifestDocument`]).
//! - Validate fail-closed into a [`ReferenceManifest`].
//! - Fetch manifests from a URL or the report API through an injectable
//!   [`ManifestFetcher`], dropping stale responses by request ticket.
//!
//! ## Data flow
//! Raw JSON (fetch or parent message) -> [`parse_manifest`] /
//! [`parse_manifest_value`] -> [`ReferenceManifest`] handed to the widget.
//!
//! ## Error model
//! Decode failures, structural violations, and transport failures return
//! [`ManifestError`]. A single invalid piece or URL rejects the whole
//! document.

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use photo_compare_config::BearerToken;
use photo_compare_core::{CoreError, Piece, ReferenceManifest, ReferencePhoto, Step};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Manifest document as delivered on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    /// Property identifier.
    pub logement_id: String,
    /// Report identifier.
    pub rapport_id: String,
    /// Rooms to document.
    #[serde(default)]
    pub pieces: Vec<PieceDocument>,
}

/// One room on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceDocument {
    /// Piece identifier.
    pub piece_id: String,
    /// Display name.
    pub nom: String,
    /// Generated room comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commentaire_ia: Option<String>,
    /// Reference photos. Missing and empty are both invalid.
    #[serde(default)]
    pub checkin_pictures: Vec<PictureDocument>,
    /// Inspection steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etapes: Vec<EtapeDocument>,
}

/// One reference picture on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureDocument {
    /// Owning piece id as repeated by the producer.
    #[serde(default)]
    pub piece_id: Option<String>,
    /// Absolute http(s) URL.
    pub url: String,
}

/// One inspection step on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtapeDocument {
    /// Step identifier.
    pub etape_id: String,
    /// Task label.
    pub task_name: String,
    /// Free-text instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consigne: Option<String>,
    /// Picture attached to the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checking_picture: Option<String>,
}

impl ManifestDocument {
    /// Validates the document into a [`ReferenceManifest`].
    ///
    /// # Errors
    /// Returns [`ManifestError::Invalid`] naming the offending piece.
    pub fn into_manifest(self) -> Result<ReferenceManifest, ManifestError> {
        let mut pieces = Vec::with_capacity(self.pieces.len());

        for piece in self.pieces {
            let piece_id = piece.piece_id;
            let invalid = |source: CoreError| ManifestError::Invalid {
                piece: Some(piece_id.clone()),
                source,
            };

            let photos = piece
                .checkin_pictures
                .into_iter()
                .map(|picture| ReferencePhoto::new(picture.url))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?;

            let steps = piece
                .etapes
                .into_iter()
                .map(|etape| Step {
                    etape_id: etape.etape_id,
                    task_name: etape.task_name,
                    consigne: etape.consigne,
                    checking_picture: etape.checking_picture,
                })
                .collect();

            let built = Piece::new(piece_id.clone(), piece.nom, photos)
                .map_err(invalid)?
                .with_comment(piece.commentaire_ia)
                .with_steps(steps);
            pieces.push(built);
        }

        ReferenceManifest::new(self.logement_id, self.rapport_id, pieces)
            .map_err(|source| ManifestError::Invalid { piece: None, source })
    }
}

/// Decodes and validates manifest JSON text.
///
/// # Errors
/// Returns [`ManifestError::Decode`] for malformed JSON and
/// [`ManifestError::Invalid`] for structural violations.
pub fn parse_manifest(raw: &str) -> Result<ReferenceManifest, ManifestError> {
    let document: ManifestDocument = serde_json::from_str(raw).map_err(ManifestError::Decode)?;
    document.into_manifest()
}

/// Decodes and validates an already-parsed JSON value (parent messages).
///
/// # Errors
/// Same as [`parse_manifest`].
pub fn parse_manifest_value(value: serde_json::Value) -> Result<ReferenceManifest, ManifestError> {
    let document: ManifestDocument =
        serde_json::from_value(value).map_err(ManifestError::Decode)?;
    document.into_manifest()
}

/// Picks the manifest for a report from a report API body.
///
/// The body is either one manifest or an array of them. The entry matching
/// `rapport_id` (and `logement_id`, when given) wins. A blank `rapport_id`
/// takes the first entry, and a lone entry naming no report is accepted.
/// Any other entry belongs to another report and is never substituted.
///
/// # Errors
/// Returns [`ManifestError::EmptyRapport`] for an empty array,
/// [`ManifestError::RapportMismatch`] when no entry belongs to the report,
/// plus decode and validation errors of the chosen entry.
pub fn select_rapport_manifest(
    raw: &str,
    rapport_id: &str,
    logement_id: Option<&str>,
) -> Result<ReferenceManifest, ManifestError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(ManifestError::Decode)?;
    let mut documents: Vec<ManifestDocument> = if value.is_array() {
        serde_json::from_value(value).map_err(ManifestError::Decode)?
    } else {
        vec![serde_json::from_value(value).map_err(ManifestError::Decode)?]
    };

    if documents.is_empty() {
        return Err(ManifestError::EmptyRapport(rapport_id.to_string()));
    }

    let matching = documents.iter().position(|document| {
        document.rapport_id == rapport_id
            && logement_id.is_none_or(|logement| document.logement_id == logement)
    });
    let position = match matching {
        Some(position) => position,
        None if rapport_id.trim().is_empty() => 0,
        None if documents.len() == 1 && documents[0].rapport_id.trim().is_empty() => 0,
        None => {
            tracing::warn!(
                stage = "manifest",
                action = "rapport_mismatch",
                rapport_id,
                entries = documents.len()
            );
            return Err(ManifestError::RapportMismatch {
                rapport_id: rapport_id.to_string(),
                logement_id: logement_id.map(str::to_string),
            });
        }
    };

    documents.swap_remove(position).into_manifest()
}

/// Transport failure while fetching a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Non-success HTTP status.
    #[error("http status {0}")]
    Status(u16),
    /// Network-level failure.
    #[error("network failure: {0}")]
    Network(String),
}

/// Abstract text fetcher (browser `fetch`, test doubles).
#[async_trait(?Send)]
pub trait ManifestFetcher {
    /// Fetches the body at `url`, sending the bearer token when present.
    async fn fetch_text(&self, url: &Url, token: Option<&BearerToken>)
    -> Result<String, FetchError>;
}

/// Identifies one manifest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket(u64);

/// Result of a load that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Response belongs to the latest request and validated.
    Loaded(ReferenceManifest),
    /// A newer request (or a parent-delivered manifest) superseded this one.
    Stale,
}

/// Loads manifests and discards responses that arrive out of order.
#[derive(Clone)]
pub struct ManifestLoader {
    fetcher: Rc<dyn ManifestFetcher>,
    latest: Rc<Cell<u64>>,
}

impl ManifestLoader {
    /// Creates a loader over a fetcher.
    pub fn new(fetcher: Rc<dyn ManifestFetcher>) -> Self {
        Self {
            fetcher,
            latest: Rc::new(Cell::new(0)),
        }
    }

    /// Issues a new ticket, superseding every earlier one.
    pub fn begin(&self) -> RequestTicket {
        let next = self.latest.get().wrapping_add(1);
        self.latest.set(next);
        RequestTicket(next)
    }

    /// Supersedes in-flight requests without starting a new one.
    pub fn invalidate(&self) {
        let _ = self.begin();
    }

    /// Returns `true` when `ticket` is still the latest.
    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.latest.get() == ticket.0
    }

    /// Fetches and validates a manifest URL.
    ///
    /// # Errors
    /// Returns [`ManifestError::Fetch`] for transport failures and decode or
    /// validation errors for bad bodies. Stale responses are never errors.
    pub async fn load(
        &self,
        url: &Url,
        token: Option<&BearerToken>,
    ) -> Result<LoadOutcome, ManifestError> {
        let ticket = self.begin();
        tracing::info!(stage = "manifest", action = "fetch", url = %url);

        let fetched = self.fetcher.fetch_text(url, token).await;
        if !self.is_current(ticket) {
            tracing::debug!(stage = "manifest", action = "stale_response", url = %url);
            return Ok(LoadOutcome::Stale);
        }

        let raw = fetched.map_err(ManifestError::Fetch)?;
        parse_manifest(&raw).map(LoadOutcome::Loaded)
    }

    /// Fetches the report manifest list from `{base}/rapports/{rapport_id}`.
    ///
    /// # Errors
    /// Same as [`ManifestLoader::load`], plus [`ManifestError::EmptyRapport`].
    pub async fn load_rapport(
        &self,
        base: &Url,
        rapport_id: &str,
        logement_id: Option<&str>,
        token: Option<&BearerToken>,
    ) -> Result<LoadOutcome, ManifestError> {
        let url = rapport_url(base, rapport_id)?;
        let ticket = self.begin();
        tracing::info!(stage = "manifest", action = "fetch_rapport", rapport_id);

        let fetched = self.fetcher.fetch_text(&url, token).await;
        if !self.is_current(ticket) {
            tracing::debug!(stage = "manifest", action = "stale_rapport", rapport_id);
            return Ok(LoadOutcome::Stale);
        }

        let raw = fetched.map_err(ManifestError::Fetch)?;
        select_rapport_manifest(&raw, rapport_id, logement_id).map(LoadOutcome::Loaded)
    }
}

/// Builds the report endpoint URL under `base`.
///
/// # Errors
/// Returns [`ManifestError::InvalidEndpoint`] for a base that cannot carry a
/// path.
pub fn rapport_url(base: &Url, rapport_id: &str) -> Result<Url, ManifestError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ManifestError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .push("rapports")
        .push(rapport_id);
    Ok(url)
}

/// Manifest decode/validation/load errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// JSON decode failure.
    #[error("manifest decode failure: {0}")]
    Decode(#[source] serde_json::Error),
    /// Structural violation; `piece` names the offending piece when known.
    #[error("manifest rejected (piece {piece:?}): {source}")]
    Invalid {
        /// Offending piece id.
        piece: Option<String>,
        /// Underlying model violation.
        #[source]
        source: CoreError,
    },
    /// Transport failure.
    #[error("manifest fetch failure: {0}")]
    Fetch(#[source] FetchError),
    /// Report API returned no manifests.
    #[error("report {0} contains no manifest")]
    EmptyRapport(String),
    /// Report API answered with manifests of other reports only.
    #[error("no manifest for report {rapport_id} (logement {logement_id:?})")]
    RapportMismatch {
        /// Requested report.
        rapport_id: String,
        /// Requested property, when given.
        logement_id: Option<String>,
    },
    /// Endpoint base URL cannot carry a path.
    #[error("invalid report endpoint: {0}")]
    InvalidEndpoint(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for manifest validation.

    use super::*;

    const VALID: &str = r#"{
        "logement_id": "L1",
        "rapport_id": "R1",
        "pieces": [
            {
                "piece_id": "salon",
                "nom": "Salon",
                "checkin_pictures": [
                    {"piece_id": "salon", "url": "https://cdn.example.test/s1.jpg"},
                    {"piece_id": "salon", "url": "https://cdn.example.test/s2.jpg"}
                ],
                "etapes": [{"etape_id": "e1", "task_name": "Vérifier les fenêtres"}]
            }
        ]
    }"#;

    #[test]
    fn parses_valid_manifest() {
        let manifest = parse_manifest(VALID).expect("manifest should validate");
        assert_eq!(manifest.rapport_id(), "R1");
        assert_eq!(manifest.reference_count("salon"), Some(2));
        assert_eq!(manifest.pieces()[0].steps()[0].task_name, "Vérifier les fenêtres");
    }

    #[test]
    fn one_bad_url_rejects_whole_manifest() {
        let raw = VALID.replace("https://cdn.example.test/s2.jpg", "javascript:alert(1)");
        let error = parse_manifest(&raw).expect_err("manifest should be rejected");
        assert!(matches!(
            error,
            ManifestError::Invalid { piece: Some(ref id), source: CoreError::InvalidReferenceUrl(_) } if id == "salon"
        ));
    }

    #[test]
    fn missing_checkin_pictures_is_rejected() {
        let raw = r#"{"logement_id":"L","rapport_id":"R","pieces":[{"piece_id":"p","nom":"P"}]}"#;
        assert!(matches!(
            parse_manifest(raw),
            Err(ManifestError::Invalid { source: CoreError::NoReferencePhotos(_), .. })
        ));
    }

    #[test]
    fn rapport_selection_prefers_matching_entry() {
        let other = VALID.replace("\"R1\"", "\"R0\"");
        let body = format!("[{other}, {VALID}]");
        let manifest = select_rapport_manifest(&body, "R1", Some("L1")).expect("should select");
        assert_eq!(manifest.rapport_id(), "R1");
    }

    #[test]
    fn rapport_selection_refuses_another_reports_manifest() {
        let error = select_rapport_manifest(VALID, "R9", Some("L9")).expect_err("other report");
        assert!(matches!(
            error,
            ManifestError::RapportMismatch { ref rapport_id, .. } if rapport_id == "R9"
        ));

        let other_logement = format!("[{VALID}]");
        assert!(matches!(
            select_rapport_manifest(&other_logement, "R1", Some("L9")),
            Err(ManifestError::RapportMismatch { .. })
        ));
    }

    #[test]
    fn rapport_selection_accepts_lone_unnamed_entry() {
        let unnamed = VALID.replace("\"R1\"", "\"\"");
        let manifest = select_rapport_manifest(&unnamed, "R1", None).expect("unnamed entry");
        assert_eq!(manifest.rapport_id(), "");
    }

    #[test]
    fn rapport_url_appends_segments() {
        let base = Url::parse("https://api.example.test/v1/").unwrap();
        let url = rapport_url(&base, "R 1").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1/rapports/R%201");
    }
}
