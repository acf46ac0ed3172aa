#![warn(missing_docs)]
//! # photo-compare-encoder
//!
//! ## Purpose
//! Turns the current video frame into an upright JPEG still.
//!
//! ## Responsibilities
//! - Read frames at the track's own dimensions through [`FrameSource`].
//! - Resolve the device orientation through a pluggable [`OrientationProvider`].
//! - Rotate quarter-turned frames so stills are upright.
//! - Encode JPEG bytes and the matching `data:` URL.
//! - Refuse overlapping captures of one slot ([`CaptureGate`]).
//!
//! ## Data flow
//! Capture trigger -> [`CaptureGate::try_begin`] -> [`CaptureEncoder::capture`]
//! grabs an [`RgbaFrame`], rotates it, encodes it -> [`CapturedPhoto`] handed
//! to the state machine and the host bridge.
//!
//! ## Ownership and lifetimes
//! Frames and stills own their buffers. The encoder keeps no frame between
//! captures.
//!
//! ## Error model
//! Every failure is an [`EncodeError`]; all but [`EncodeError::SlotPending`]
//! are reported as `CAPTURE_FAILED`.
//!
//! ## Security and privacy notes
//! Pixels never leave the process except through the returned still.

use std::cell::RefCell;
use std::collections::HashSet;

use base64::Engine as _;
use photo_compare_core::{CaptureMeta, CapturedPhoto, CoreError, ErrorCode, SlotKey};
use thiserror::Error;

/// Default JPEG quality (0.85 on the canvas scale).
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Prefix of a JPEG data URL.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// One RGBA frame in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl RgbaFrame {
    /// Validates geometry against the buffer length.
    ///
    /// # Errors
    /// Returns [`EncodeError::EmptyFrame`] for zero dimensions and
    /// [`EncodeError::FrameSize`] when the buffer length does not match.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, EncodeError> {
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame);
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or(EncodeError::Overflow)?;
        if rgba.len() != expected {
            return Err(EncodeError::FrameSize {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Frame width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA bytes.
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        &self.rgba[offset..offset + 4]
    }
}

/// Something a frame can be read from (a `<video>` element in the browser).
pub trait FrameSource {
    /// Width/height from the active track settings, when reported.
    fn track_dimensions(&self) -> Option<(u32, u32)>;

    /// Intrinsic element dimensions, used when the track reports none.
    fn element_dimensions(&self) -> (u32, u32);

    /// Reads the current frame scaled to `width` x `height`.
    ///
    /// # Errors
    /// Returns [`EncodeError::Grab`] when no frame is available.
    fn grab(&self, width: u32, height: u32) -> Result<RgbaFrame, EncodeError>;
}

/// Raw orientation readings, most reliable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrientationSignals {
    /// `screen.orientation.angle`.
    pub screen_angle: Option<i32>,
    /// Legacy `window.orientation`.
    pub legacy_angle: Option<i32>,
    /// Viewport `(width, height)`.
    pub viewport: Option<(u32, u32)>,
}

impl OrientationSignals {
    /// First available angle in precedence order.
    ///
    /// A landscape viewport without any angle reading counts as 90.
    pub fn resolve_angle(&self) -> i32 {
        self.screen_angle
            .or(self.legacy_angle)
            .or_else(|| {
                self.viewport
                    .map(|(width, height)| if width > height { 90 } else { 0 })
            })
            .unwrap_or(0)
    }
}

/// Source of the device rotation angle in degrees.
pub trait OrientationProvider {
    /// Current angle (0, 90, 180, 270 or -90).
    fn angle(&self) -> i32;
}

/// Provider that reads [`OrientationSignals`] from a closure on every call.
pub struct LayeredOrientation<F>
where
    F: Fn() -> OrientationSignals,
{
    read: F,
}

impl<F> LayeredOrientation<F>
where
    F: Fn() -> OrientationSignals,
{
    /// Wraps a signal reader.
    pub fn new(read: F) -> Self {
        Self { read }
    }
}

impl<F> OrientationProvider for LayeredOrientation<F>
where
    F: Fn() -> OrientationSignals,
{
    fn angle(&self) -> i32 {
        (self.read)().resolve_angle()
    }
}

/// Provider returning a constant angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedOrientation(pub i32);

impl OrientationProvider for FixedOrientation {
    fn angle(&self) -> i32 {
        self.0
    }
}

/// Pixel rotation applied before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarterTurn {
    /// Keep as is.
    None,
    /// Rotate 90 degrees clockwise.
    Clockwise,
    /// Rotate 90 degrees counter-clockwise.
    CounterClockwise,
}

impl QuarterTurn {
    /// Rotation compensating a device angle.
    pub fn for_angle(angle: i32) -> Self {
        match angle.rem_euclid(360) {
            90 => QuarterTurn::CounterClockwise,
            270 => QuarterTurn::Clockwise,
            _ => QuarterTurn::None,
        }
    }

    /// Whether output dimensions are the transpose of the input.
    pub fn swaps_dimensions(self) -> bool {
        self != QuarterTurn::None
    }
}

/// Rotates a frame by a quarter turn.
pub fn rotate_frame(frame: &RgbaFrame, turn: QuarterTurn) -> RgbaFrame {
    if turn == QuarterTurn::None {
        return frame.clone();
    }

    let (width, height) = (frame.height, frame.width);
    let mut rgba = Vec::with_capacity(frame.rgba.len());
    for y in 0..height {
        for x in 0..width {
            let (src_x, src_y) = match turn {
                QuarterTurn::Clockwise => (y, frame.height - 1 - x),
                QuarterTurn::CounterClockwise => (frame.width - 1 - y, x),
                QuarterTurn::None => (x, y),
            };
            rgba.extend_from_slice(frame.pixel(src_x, src_y));
        }
    }

    RgbaFrame {
        width,
        height,
        rgba,
    }
}

/// Encodes a frame as baseline JPEG.
///
/// # Errors
/// Returns [`EncodeError::Jpeg`] when the codec fails.
pub fn encode_jpeg(frame: &RgbaFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let rgb: Vec<u8> = frame
        .rgba
        .chunks_exact(4)
        .flat_map(|pixel| pixel[..3].iter().copied())
        .collect();

    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&rgb, frame.width, frame.height, image::ColorType::Rgb8.into())
        .map_err(|error| EncodeError::Jpeg(error.to_string()))?;
    Ok(jpeg)
}

/// `data:image/jpeg;base64,` URL for JPEG bytes.
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + jpeg.len().div_ceil(3) * 4);
    url.push_str(JPEG_DATA_URL_PREFIX);
    base64::engine::general_purpose::STANDARD.encode_string(jpeg, &mut url);
    url
}

/// Produces upright JPEG stills from a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEncoder {
    quality: u8,
}

impl Default for CaptureEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl CaptureEncoder {
    /// Encoder with the given JPEG quality (1..=100).
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Configured quality.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Captures the current frame of `source`.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the source has no frame or encoding fails.
    pub fn capture(
        &self,
        source: &dyn FrameSource,
        orientation: &dyn OrientationProvider,
        taken_at_ms: u64,
    ) -> Result<CapturedPhoto, EncodeError> {
        let (width, height) = source
            .track_dimensions()
            .filter(|(width, height)| *width > 0 && *height > 0)
            .unwrap_or_else(|| source.element_dimensions());
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame);
        }

        let frame = source.grab(width, height)?;
        let angle = orientation.angle();
        let turn = QuarterTurn::for_angle(angle);
        let frame = rotate_frame(&frame, turn);

        let jpeg = encode_jpeg(&frame, self.quality)?;
        let data_url = jpeg_data_url(&jpeg);
        tracing::info!(
            stage = "capture",
            action = "encoded",
            angle,
            width = frame.width,
            height = frame.height,
            bytes = jpeg.len()
        );

        Ok(CapturedPhoto::new(
            jpeg,
            data_url,
            taken_at_ms,
            CaptureMeta {
                width: frame.width,
                height: frame.height,
            },
        )?)
    }
}

/// Tracks slots whose capture is still pending (encoding or awaiting
/// confirmation).
#[derive(Debug, Default)]
pub struct CaptureGate {
    pending: RefCell<HashSet<SlotKey>>,
}

impl CaptureGate {
    /// Marks `slot` pending.
    ///
    /// # Errors
    /// Returns [`EncodeError::SlotPending`] when a capture of `slot` is
    /// already pending.
    pub fn try_begin(&self, slot: &SlotKey) -> Result<(), EncodeError> {
        if self.pending.borrow_mut().insert(slot.clone()) {
            Ok(())
        } else {
            tracing::debug!(stage = "capture", action = "refused", slot = %slot);
            Err(EncodeError::SlotPending(slot.clone()))
        }
    }

    /// Clears the pending mark of `slot`.
    pub fn finish(&self, slot: &SlotKey) {
        self.pending.borrow_mut().remove(slot);
    }

    /// Returns `true` while `slot` is pending.
    pub fn is_pending(&self, slot: &SlotKey) -> bool {
        self.pending.borrow().contains(slot)
    }

    /// Clears every pending mark.
    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }
}

/// Gradient frame source for tests, benchmarks and the native CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticFrameSource {
    /// Reported track dimensions.
    pub track: Option<(u32, u32)>,
    /// Element dimensions.
    pub element: (u32, u32),
}

impl SyntheticFrameSource {
    /// Source whose track reports `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            track: Some((width, height)),
            element: (width, height),
        }
    }
}

impl FrameSource for SyntheticFrameSource {
    fn track_dimensions(&self) -> Option<(u32, u32)> {
        self.track
    }

    fn element_dimensions(&self) -> (u32, u32) {
        self.element
    }

    fn grab(&self, width: u32, height: u32) -> Result<RgbaFrame, EncodeError> {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let red = (x * 255 / width.max(1)) as u8;
                let green = (y * 255 / height.max(1)) as u8;
                rgba.extend_from_slice(&[red, green, 96, 255]);
            }
        }
        RgbaFrame::new(width, height, rgba)
    }
}

/// Capture failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Source has zero dimensions (no frame decoded yet).
    #[error("no video frame available")]
    EmptyFrame,
    /// Buffer length does not match geometry.
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    FrameSize {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
    /// Dimension arithmetic overflowed.
    #[error("frame dimension overflow")]
    Overflow,
    /// Backend could not read a frame.
    #[error("frame grab failed: {0}")]
    Grab(String),
    /// JPEG codec failure.
    #[error("jpeg encoding failed: {0}")]
    Jpeg(String),
    /// A capture of this slot is already pending.
    #[error("capture already pending for slot {0}")]
    SlotPending(SlotKey),
    /// Encoded still failed validation.
    #[error(transparent)]
    Photo(#[from] CoreError),
}

impl EncodeError {
    /// Host-facing code; `None` for refusals that are not failures.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            EncodeError::SlotPending(_) => None,
            _ => Some(ErrorCode::CaptureFailed),
        }
    }
}
