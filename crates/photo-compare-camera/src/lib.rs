#![warn(missing_docs)]
//! # photo-compare-camera
//!
//! ## Purpose
//! Negotiates a working camera stream, and specifically the right physical
//! camera, on browsers with unreliable `getUserMedia` constraint support.
//!
//! ## Responsibilities
//! - Define backend-agnostic media traits ([`MediaDevices`],
//!   [`MediaStreamHandle`], [`Timer`], [`VideoSink`]).
//! - Run the ordered acquisition strategy chain with per-attempt timeouts.
//! - Switch front/rear cameras with revert-on-failure.
//! - Provide deterministic synthetic devices for tests ([`synthetic`]).
//!
//! ## Data flow
//! Widget requests a facing mode -> [`CameraNegotiator::acquire`] warms up
//! device labels, walks the strategy chain, binds the winning stream to the
//! [`VideoSink`] -> encoder reads the track settings of the active stream.
//!
//! ## Ownership and lifetimes
//! The negotiator owns the single active stream. Streams returned by a
//! backend are owned boxes; stopping is explicit because dropping a browser
//! stream handle does not release the camera. A request abandoned on timeout
//! keeps its [`StreamDelivery`], which stops the stream if one arrives later.
//!
//! ## Error model
//! A failed strategy is recorded as a [`StrategyFailure`] and never surfaced on
//! its own. Only chain exhaustion becomes a [`CameraError`].

mod negotiator;
mod strategy;
pub mod synthetic;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::channel::oneshot;
use photo_compare_core::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use negotiator::{CameraNegotiator, CameraStatus, NegotiatorConfig, SwitchOutcome};
pub use strategy::{
    AcquisitionStrategy, DEFAULT_STRATEGY_CHAIN, StrategyError, StrategyFailure, classify_label,
    first_success,
};

/// Logical camera selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera.
    Environment,
    /// Front camera.
    User,
}

impl FacingMode {
    /// The other camera.
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }

    /// Constraint spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }

    /// Parses the constraint spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "environment" => Some(FacingMode::Environment),
            "user" => Some(FacingMode::User),
            _ => None,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser platform family, used for timing quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// iPhone/iPad (all browsers there share WebKit).
    Ios,
    /// Android.
    Android,
    /// Anything else.
    Desktop,
}

impl Platform {
    /// Classifies a user agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        // iPadOS 13+ reports a desktop Safari UA; "mobile" disambiguates.
        if ua.contains("iphone")
            || ua.contains("ipad")
            || ua.contains("ipod")
            || (ua.contains("macintosh") && ua.contains("mobile"))
        {
            Platform::Ios
        } else if ua.contains("android") {
            Platform::Android
        } else {
            Platform::Desktop
        }
    }

    /// Whether sequential camera requests need a settle delay.
    pub fn needs_warmup_settle(self) -> bool {
        matches!(self, Platform::Ios)
    }
}

/// Media device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Camera.
    VideoInput,
    /// Microphone.
    AudioInput,
    /// Speaker.
    AudioOutput,
}

/// One enumerated media device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    /// Backend device id.
    pub device_id: String,
    /// Human-readable label; empty before any permission grant.
    pub label: String,
    /// Device category.
    pub kind: DeviceKind,
}

impl MediaDeviceInfo {
    /// Returns `true` for cameras.
    pub fn is_video_input(&self) -> bool {
        self.kind == DeviceKind::VideoInput
    }
}

/// Facing-mode constraint form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingConstraint {
    /// `facingMode: { ideal: mode }`.
    Ideal(FacingMode),
    /// `facingMode: mode`.
    Plain(FacingMode),
}

impl FacingConstraint {
    /// Requested facing mode.
    pub fn mode(self) -> FacingMode {
        match self {
            FacingConstraint::Ideal(mode) | FacingConstraint::Plain(mode) => mode,
        }
    }
}

/// Preferred resolution, sent as `ideal` width/height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionHint {
    /// Ideal width.
    pub width: u32,
    /// Ideal height.
    pub height: u32,
}

/// Shape of a constraint set, used for diagnostics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintShape {
    /// Ideal facing plus resolution.
    IdealFacing,
    /// Plain facing plus resolution.
    PlainFacing,
    /// Explicit device id.
    DeviceId,
    /// Plain facing alone.
    BareFacing,
    /// Anything else (`video: true`).
    Unconstrained,
}

/// Video constraints for one `getUserMedia` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoConstraints {
    /// Facing-mode constraint.
    pub facing: Option<FacingConstraint>,
    /// Exact device id.
    pub device_id: Option<String>,
    /// Resolution hint.
    pub resolution: Option<ResolutionHint>,
}

impl VideoConstraints {
    /// Constraints selecting a facing mode.
    pub fn facing(facing: FacingConstraint) -> Self {
        Self {
            facing: Some(facing),
            ..Self::default()
        }
    }

    /// Constraints selecting a device id.
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    /// Adds a resolution hint.
    pub fn with_resolution(mut self, hint: ResolutionHint) -> Self {
        self.resolution = Some(hint);
        self
    }

    /// Classifies the constraint set.
    pub fn shape(&self) -> ConstraintShape {
        match (&self.device_id, self.facing, self.resolution) {
            (Some(_), _, _) => ConstraintShape::DeviceId,
            (None, Some(FacingConstraint::Ideal(_)), _) => ConstraintShape::IdealFacing,
            (None, Some(FacingConstraint::Plain(_)), Some(_)) => ConstraintShape::PlainFacing,
            (None, Some(FacingConstraint::Plain(_)), None) => ConstraintShape::BareFacing,
            (None, None, _) => ConstraintShape::Unconstrained,
        }
    }
}

/// Track lifecycle as reported by `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Producing frames.
    Live,
    /// Stopped.
    Ended,
}

/// Subset of `MediaTrackSettings` the widget relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackSettings {
    /// Reported facing mode; desktop webcams usually report none.
    pub facing_mode: Option<FacingMode>,
    /// Frame width.
    pub width: Option<u32>,
    /// Frame height.
    pub height: Option<u32>,
    /// Source device id.
    pub device_id: Option<String>,
}

/// Handle to an acquired video stream.
pub trait MediaStreamHandle {
    /// Stream id.
    fn id(&self) -> &str;

    /// Settings of the first video track.
    fn settings(&self) -> TrackSettings;

    /// `readyState` of every track.
    fn track_states(&self) -> Vec<TrackState>;

    /// Stops every track.
    fn stop(&self);

    /// Backend-specific access for sinks that need the native object.
    fn as_any(&self) -> &dyn Any;

    /// Returns `true` while any track is live.
    fn is_live(&self) -> bool {
        self.track_states().contains(&TrackState::Live)
    }
}

/// Outcome of one `getUserMedia` request.
pub type StreamResult = Result<Box<dyn MediaStreamHandle>, MediaError>;

/// Camera access backend (`navigator.mediaDevices` or a test double).
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Requests a video stream.
    ///
    /// The caller may drop the returned future before it settles (see
    /// [`with_timeout`]). A stream the backend obtains after that must be
    /// stopped on arrival; [`StreamDelivery`] does this.
    async fn get_user_media(&self, constraints: &VideoConstraints) -> StreamResult;

    /// Lists media devices.
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError>;
}

/// Async delay source (`setTimeout` or a test double).
#[async_trait(?Send)]
pub trait Timer {
    /// Completes after `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Video element the active stream is rendered into.
pub trait VideoSink {
    /// Attaches a stream as the element source.
    fn bind(&self, stream: &dyn MediaStreamHandle);

    /// Detaches the current source.
    fn unbind(&self);
}

/// Races `attempt` against `limit`; expiry becomes [`MediaError::Timeout`].
///
/// Completion wins when both are ready on the same poll.
pub async fn with_timeout<T, F>(
    timer: &dyn Timer,
    limit: Duration,
    attempt: F,
) -> Result<T, MediaError>
where
    F: Future<Output = Result<T, MediaError>>,
{
    let attempt = attempt.fuse();
    let expiry = timer.sleep(limit).fuse();
    futures::pin_mut!(attempt, expiry);

    futures::select_biased! {
        result = attempt => result,
        () = expiry => Err(MediaError::Timeout(limit)),
    }
}

/// Completion side of a media request whose caller may stop waiting.
///
/// The backend keeps this until the underlying request settles, however long
/// that takes. When the matching [`PendingStream`] is gone by then, a
/// delivered stream is stopped instead of leaking a live camera.
pub struct StreamDelivery {
    sender: oneshot::Sender<StreamResult>,
}

impl StreamDelivery {
    /// Creates a connected delivery and pending pair.
    pub fn channel() -> (Self, PendingStream) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, PendingStream { receiver })
    }

    /// Returns `true` once the waiting side was dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_canceled()
    }

    /// Hands `result` to the waiting side.
    ///
    /// Returns `false` when the request had been abandoned; a stream in
    /// `result` is then stopped.
    pub fn complete(self, result: StreamResult) -> bool {
        match self.sender.send(result) {
            Ok(()) => true,
            Err(Ok(stream)) => {
                stream.stop();
                tracing::info!(
                    stage = "camera",
                    action = "late_stream_stopped",
                    stream = stream.id()
                );
                false
            }
            Err(Err(_)) => false,
        }
    }
}

/// Waiting side of a [`StreamDelivery`].
pub struct PendingStream {
    receiver: oneshot::Receiver<StreamResult>,
}

impl Future for PendingStream {
    type Output = StreamResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<StreamResult> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(MediaError::Other("request dropped".to_string())))
        })
    }
}

/// Backend-level failure of one media call (the DOMException family).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// `NotAllowedError` / `SecurityError`.
    #[error("permission denied: {0}")]
    NotAllowed(String),
    /// `NotFoundError`.
    #[error("no matching device: {0}")]
    NotFound(String),
    /// `OverconstrainedError`.
    #[error("constraints not satisfiable: {0}")]
    Overconstrained(String),
    /// `NotReadableError` / `AbortError`.
    #[error("device not readable: {0}")]
    NotReadable(String),
    /// The attempt did not settle in time.
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    /// Anything else.
    #[error("media failure: {0}")]
    Other(String),
}

impl MediaError {
    /// Maps a DOMException name to a variant.
    pub fn from_dom_exception(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "NotAllowedError" | "SecurityError" | "PermissionDeniedError" => {
                MediaError::NotAllowed(message)
            }
            "NotFoundError" | "DevicesNotFoundError" => MediaError::NotFound(message),
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                MediaError::Overconstrained(message)
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => {
                MediaError::NotReadable(message)
            }
            _ => MediaError::Other(format!("{name}: {message}")),
        }
    }
}

/// Terminal camera failures.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Every strategy failed.
    #[error("camera unavailable for {target}: {} strategies failed", .attempts.len())]
    Denied {
        /// Requested facing mode.
        target: FacingMode,
        /// One entry per failed strategy.
        attempts: Vec<StrategyFailure>,
    },
    /// Enumeration lists no camera at all.
    #[error("no camera detected")]
    NoCamerasDetected,
    /// Switch failed and the previous camera could not be restarted.
    #[error("camera switch to {requested} failed and {previous} could not be restored")]
    SwitchFailed {
        /// Requested facing mode.
        requested: FacingMode,
        /// Facing mode that could not be restored.
        previous: FacingMode,
        /// Why the revert failed.
        #[source]
        revert: Box<CameraError>,
    },
    /// Another acquisition or switch is running.
    #[error("camera operation already in progress")]
    Busy,
}

impl CameraError {
    /// Host-facing error code, when this failure is reportable.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CameraError::Denied { .. } => Some(ErrorCode::CameraDenied),
            CameraError::NoCamerasDetected => Some(ErrorCode::NoCamerasDetected),
            CameraError::SwitchFailed { .. } => Some(ErrorCode::CameraSwitchFailed),
            CameraError::Busy => None,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for constraint classification and platform detection.

    use super::*;

    #[test]
    fn constraint_shapes_follow_strategy_forms() {
        let hint = ResolutionHint {
            width: 1920,
            height: 1080,
        };
        let ideal = VideoConstraints::facing(FacingConstraint::Ideal(FacingMode::Environment))
            .with_resolution(hint);
        let plain = VideoConstraints::facing(FacingConstraint::Plain(FacingMode::Environment))
            .with_resolution(hint);
        let bare = VideoConstraints::facing(FacingConstraint::Plain(FacingMode::Environment));

        assert_eq!(ideal.shape(), ConstraintShape::IdealFacing);
        assert_eq!(plain.shape(), ConstraintShape::PlainFacing);
        assert_eq!(bare.shape(), ConstraintShape::BareFacing);
        assert_eq!(VideoConstraints::device("abc").shape(), ConstraintShape::DeviceId);
    }

    #[test]
    fn detects_ios_including_desktop_class_ipad() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
        let ipad = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
        let pixel = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 Chrome/120 Mobile";
        assert_eq!(Platform::from_user_agent(iphone), Platform::Ios);
        assert_eq!(Platform::from_user_agent(ipad), Platform::Ios);
        assert_eq!(Platform::from_user_agent(pixel), Platform::Android);
        assert_eq!(
            Platform::from_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0"),
            Platform::Desktop
        );
    }

    #[test]
    fn maps_dom_exception_names() {
        assert!(matches!(
            MediaError::from_dom_exception("OverconstrainedError", "facingMode"),
            MediaError::Overconstrained(_)
        ));
        assert!(matches!(
            MediaError::from_dom_exception("NotAllowedError", "denied"),
            MediaError::NotAllowed(_)
        ));
    }
}
