#![warn(missing_docs)]
//! # photo-compare-bridge
//!
//! ## Purpose
//! The `postMessage` contract between the widget and its parent page.
//!
//! ## Responsibilities
//! - Define the closed inbound and outbound message unions (`{ type, payload }`).
//! - Validate inbound payloads at the boundary into [`HostCommand`]s.
//! - Pin the parent origin on the first recognized message and drop traffic
//!   from any other origin.
//! - Address every outbound message to a concrete origin, queueing until one
//!   is known.
//!
//! ## Data flow
//! `message` event -> [`HostBridge::receive`] -> [`HostCommand`] -> widget.
//! Widget event -> [`HostBridge::send`] -> [`HostPort::post`] to the pinned
//! origin.
//!
//! ## Ownership and lifetimes
//! The bridge owns its origin state and outbound queue behind `RefCell`s so
//! the widget can share it between event handlers on one thread.
//!
//! ## Error model
//! Messages from foreign origins are not errors: they are discarded and
//! `receive` returns `Ok(None)`. Recognized messages with bad payloads return
//! [`BridgeError`]; manifest rejections carry `REF_LOAD_FAILED`.
//!
//! ## Security and privacy notes
//! The wildcard target `*` is never used. Tokens from `photo.auth.update` are
//! wrapped in [`BearerToken`] immediately and never logged.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use photo_compare_config::{BearerToken, ConfigError};
use photo_compare_core::{CaptureMeta, ErrorCode, ReferenceManifest};
use photo_compare_manifest::{ManifestError, parse_manifest_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Inbound: parent supplies the manifest.
pub const DATA_PROVIDE: &str = "photo.data.provide";
/// Inbound: parent asks to open a piece.
pub const OPEN_PIECE: &str = "photo.open.piece";
/// Inbound: parent rotates the bearer token.
pub const AUTH_UPDATE: &str = "photo.auth.update";

const INBOUND_TYPES: [&str; 3] = [DATA_PROVIDE, OPEN_PIECE, AUTH_UPDATE];

/// Outbound messages held before an origin is known.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// Inbound wire messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum InboundMessage {
    /// Manifest JSON, validated before use.
    #[serde(rename = "photo.data.provide")]
    DataProvide(Value),
    /// Piece to open.
    #[serde(rename = "photo.open.piece")]
    OpenPiece(OpenPiecePayload),
    /// New bearer token.
    #[serde(rename = "photo.auth.update")]
    AuthUpdate(AuthUpdatePayload),
}

/// Payload of `photo.open.piece`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPiecePayload {
    /// Piece id.
    #[serde(alias = "pieceId")]
    pub piece_id: String,
}

/// Payload of `photo.auth.update`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUpdatePayload {
    /// Raw token.
    pub token: String,
}

impl std::fmt::Debug for AuthUpdatePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthUpdatePayload")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Validated inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Replace the active manifest.
    ProvideManifest(ReferenceManifest),
    /// Open a piece (free mode only; the widget checks existence).
    OpenPiece(String),
    /// Use a new bearer token for later fetches.
    UpdateToken(BearerToken),
}

/// Outbound wire messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OutboundMessage {
    /// Widget booted.
    #[serde(rename = "photo.ready")]
    Ready(ReadyPayload),
    /// No manifest arrived within the grace window.
    #[serde(rename = "photo.data.request")]
    DataRequest(DataRequestPayload),
    /// User opened a piece.
    #[serde(rename = "photo.piece.selected")]
    PieceSelected(PieceSelectedPayload),
    /// Still captured, awaiting confirmation.
    #[serde(rename = "photo.capture.preview")]
    CapturePreview(CapturePreviewPayload),
    /// Still confirmed.
    #[serde(rename = "photo.capture.confirmed")]
    CaptureConfirmed(CaptureConfirmedPayload),
    /// Reportable failure.
    #[serde(rename = "photo.error")]
    Error(ErrorPayload),
}

impl OutboundMessage {
    /// Wire `type` value.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Ready(_) => "photo.ready",
            OutboundMessage::DataRequest(_) => "photo.data.request",
            OutboundMessage::PieceSelected(_) => "photo.piece.selected",
            OutboundMessage::CapturePreview(_) => "photo.capture.preview",
            OutboundMessage::CaptureConfirmed(_) => "photo.capture.confirmed",
            OutboundMessage::Error(_) => "photo.error",
        }
    }

    /// Builds a `photo.error` message.
    pub fn error(code: ErrorCode, message: impl Into<String>, context: Value) -> Self {
        OutboundMessage::Error(ErrorPayload {
            code,
            message: message.into(),
            context,
        })
    }
}

/// Payload of `photo.ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    /// Widget version.
    pub version: String,
    /// Report id from launch params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rapport_id: Option<String>,
    /// Property id from launch params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logement_id: Option<String>,
}

/// Payload of `photo.data.request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestPayload {
    /// Report id from launch params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rapport_id: Option<String>,
    /// Property id from launch params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logement_id: Option<String>,
}

/// Payload of `photo.piece.selected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceSelectedPayload {
    /// Piece id.
    pub piece_id: String,
    /// Piece display name.
    pub nom: String,
}

/// Payload of `photo.capture.preview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePreviewPayload {
    /// Piece id.
    pub piece_id: String,
    /// Reference index within the piece.
    pub reference_index: usize,
    /// JPEG data URL.
    pub data_url: String,
    /// Output dimensions.
    pub meta: CaptureMeta,
}

/// Payload of `photo.capture.confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfirmedPayload {
    /// Piece id.
    pub piece_id: String,
    /// Reference index within the piece.
    pub reference_index: usize,
    /// Unique capture id.
    pub capture_id: String,
    /// RFC 3339 capture time.
    pub taken_at: String,
    /// JPEG data URL.
    pub data_url: String,
    /// Output dimensions.
    pub meta: CaptureMeta,
}

/// Payload of `photo.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default)]
    pub context: Value,
}

/// Outbound transport (`window.parent.postMessage` in the browser).
pub trait HostPort {
    /// Posts `message` to `target_origin`.
    ///
    /// # Errors
    /// Returns [`BridgeError::Post`] when the transport rejects the message.
    fn post(&self, message: &OutboundMessage, target_origin: &str) -> Result<(), BridgeError>;
}

/// Normalizes an origin (`scheme://host[:port]`); `None` for opaque or
/// unparsable origins.
pub fn normalize_origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let origin = url.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}

/// Parent-origin state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OriginGuard {
    hint: Option<String>,
    pinned: Option<String>,
}

impl OriginGuard {
    /// Guard with an optional expected origin.
    ///
    /// # Errors
    /// Returns [`BridgeError::InvalidOrigin`] for a hint that is not a
    /// concrete origin.
    pub fn new(hint: Option<&str>) -> Result<Self, BridgeError> {
        let hint = hint
            .map(|raw| normalize_origin(raw).ok_or_else(|| BridgeError::InvalidOrigin(raw.into())))
            .transpose()?;
        Ok(Self { hint, pinned: None })
    }

    /// Pinned origin.
    pub fn pinned(&self) -> Option<&str> {
        self.pinned.as_deref()
    }

    /// Origin outbound messages go to now: pinned, else the hint.
    pub fn outbound_target(&self) -> Option<&str> {
        self.pinned.as_deref().or(self.hint.as_deref())
    }

    /// Returns `true` when a message from `origin` may be processed.
    pub fn admits(&self, origin: &str) -> bool {
        match (&self.pinned, &self.hint) {
            (Some(pinned), _) => pinned == origin,
            (None, Some(hint)) => hint == origin,
            (None, None) => true,
        }
    }

    /// Pins `origin` if nothing is pinned yet. Returns `true` when it pinned.
    pub fn pin(&mut self, origin: &str) -> bool {
        if self.pinned.is_some() || !self.admits(origin) {
            return false;
        }
        self.pinned = Some(origin.to_string());
        true
    }
}

/// Host message endpoint of one widget instance.
pub struct HostBridge {
    port: Rc<dyn HostPort>,
    guard: RefCell<OriginGuard>,
    queue: RefCell<VecDeque<OutboundMessage>>,
}

impl HostBridge {
    /// Bridge posting through `port`.
    pub fn new(port: Rc<dyn HostPort>, guard: OriginGuard) -> Self {
        Self {
            port,
            guard: RefCell::new(guard),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Pinned parent origin.
    pub fn pinned_origin(&self) -> Option<String> {
        self.guard.borrow().pinned().map(str::to_string)
    }

    /// Messages waiting for an origin.
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Sends `message` to the parent, or queues it until an origin is known.
    ///
    /// # Errors
    /// Returns [`BridgeError::Post`] when the transport fails.
    pub fn send(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        let target = self.guard.borrow().outbound_target().map(str::to_string);
        match target {
            Some(target) => {
                if let Err(error) = self.flush(&target) {
                    self.enqueue(message);
                    return Err(error);
                }
                tracing::debug!(stage = "bridge", action = "post", kind = message.kind(), target = %target);
                self.port.post(&message, &target)
            }
            None => {
                self.enqueue(message);
                Ok(())
            }
        }
    }

    /// Handles one `message` event.
    ///
    /// Returns `Ok(None)` for discarded traffic: foreign or opaque origins and
    /// payloads that are not widget messages. The first recognized message
    /// pins its origin and flushes queued outbound messages there.
    ///
    /// # Errors
    /// Returns [`BridgeError`] for a recognized message whose payload is
    /// invalid; the origin stays pinned.
    pub fn receive(&self, origin: &str, data: &Value) -> Result<Option<HostCommand>, BridgeError> {
        let Some(origin) = normalize_origin(origin) else {
            tracing::debug!(stage = "bridge", action = "discard", reason = "opaque origin");
            return Ok(None);
        };
        if !self.guard.borrow().admits(&origin) {
            tracing::debug!(stage = "bridge", action = "discard", reason = "foreign origin", origin = %origin);
            return Ok(None);
        }

        let Some(kind) = data.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !INBOUND_TYPES.contains(&kind) {
            tracing::debug!(stage = "bridge", action = "discard", reason = "unknown type", kind);
            return Ok(None);
        }

        if self.guard.borrow_mut().pin(&origin) {
            tracing::info!(stage = "bridge", action = "origin_pinned", origin = %origin);
            // Whatever did not go out stays queued; the next send retries it.
            let _ = self.flush(&origin);
        }

        let message: InboundMessage =
            serde_json::from_value(data.clone()).map_err(BridgeError::Envelope)?;
        decode_command(message).map(Some)
    }

    fn enqueue(&self, message: OutboundMessage) {
        let mut queue = self.queue.borrow_mut();
        if queue.len() == OUTBOUND_QUEUE_CAPACITY
            && let Some(dropped) = queue.pop_front()
        {
            tracing::warn!(stage = "bridge", action = "queue_overflow", dropped = dropped.kind());
        }
        tracing::debug!(stage = "bridge", action = "queued", kind = message.kind());
        queue.push_back(message);
    }

    /// Posts queued messages in order. A failed post leaves that message and
    /// everything after it queued for the next send.
    fn flush(&self, origin: &str) -> Result<(), BridgeError> {
        loop {
            let Some(message) = self.queue.borrow_mut().pop_front() else {
                return Ok(());
            };
            if let Err(error) = self.port.post(&message, origin) {
                self.queue.borrow_mut().push_front(message);
                tracing::warn!(
                    stage = "bridge",
                    action = "flush_interrupted",
                    remaining = self.queued(),
                    error = %error
                );
                return Err(error);
            }
        }
    }
}

/// Validates an inbound message into a command.
///
/// # Errors
/// Returns [`BridgeError::Manifest`] for a rejected manifest and
/// [`BridgeError::Token`] for a blank token.
pub fn decode_command(message: InboundMessage) -> Result<HostCommand, BridgeError> {
    match message {
        InboundMessage::DataProvide(payload) => parse_manifest_value(payload)
            .map(HostCommand::ProvideManifest)
            .map_err(BridgeError::Manifest),
        InboundMessage::OpenPiece(payload) => Ok(HostCommand::OpenPiece(payload.piece_id)),
        InboundMessage::AuthUpdate(payload) => BearerToken::new(payload.token)
            .map(HostCommand::UpdateToken)
            .map_err(BridgeError::Token),
    }
}

/// Bridge failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configured origin is not a concrete origin.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),
    /// Recognized type with a malformed envelope.
    #[error("malformed host message: {0}")]
    Envelope(#[source] serde_json::Error),
    /// `photo.data.provide` carried an invalid manifest.
    #[error(transparent)]
    Manifest(ManifestError),
    /// `photo.auth.update` carried an unusable token.
    #[error(transparent)]
    Token(ConfigError),
    /// Transport rejected an outbound message.
    #[error("postMessage failed: {0}")]
    Post(String),
}

impl BridgeError {
    /// Host-facing code, when the failure is reportable.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            BridgeError::Manifest(_) => Some(ErrorCode::RefLoadFailed),
            _ => None,
        }
    }
}
