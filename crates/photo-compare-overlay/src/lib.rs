#![warn(missing_docs)]
//! # photo-compare-overlay
//!
//! ## Purpose
//! Geometry and state for the ghost overlay: the reference photo blended over
//! the live feed, the opacity slider, and the framing guides.
//!
//! ## Responsibilities
//! - Map vertical pointer positions to an [`Opacity`] (top of track = 100).
//! - Compute the rendered video box for `object-fit: contain`.
//! - Produce rule-of-thirds and horizon [`GuideLine`]s for that box.
//! - Redraw the [`GuideSurface`] only when the box or guide options change.
//!
//! ## Data flow
//! Pointer events -> [`GhostOverlayRenderer::pointer`] -> opacity applied by the
//! view in the same event. Layout changes -> [`GhostOverlayRenderer::layout`]
//! -> surface resized and guides redrawn.
//!
//! ## Ownership and lifetimes
//! The renderer owns plain values only; the drawing surface is borrowed per
//! call.
//!
//! ## Error model
//! Nothing here fails: out-of-range input is clamped.

use serde::{Deserialize, Serialize};

/// Reference opacity in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opacity(u8);

impl Opacity {
    /// Fully hidden reference.
    pub const TRANSPARENT: Opacity = Opacity(0);
    /// Fully opaque reference.
    pub const OPAQUE: Opacity = Opacity(100);

    /// Clamps `percent` into range.
    pub fn new(percent: i32) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    /// Percent value.
    pub fn percent(self) -> u8 {
        self.0
    }

    /// CSS `opacity` value in `0.0..=1.0`.
    pub fn css_value(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl Default for Opacity {
    fn default() -> Self {
        Self(50)
    }
}

/// Client-space extent of the vertical slider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderTrack {
    /// Top edge.
    pub top: f64,
    /// Height.
    pub height: f64,
}

impl SliderTrack {
    /// Opacity under a pointer at `client_y`.
    pub fn opacity_at(&self, client_y: f64) -> Opacity {
        if self.height <= 0.0 || !client_y.is_finite() {
            return Opacity::default();
        }
        let from_top = ((client_y - self.top) / self.height).clamp(0.0, 1.0);
        Opacity::new(((1.0 - from_top) * 100.0).round() as i32)
    }
}

/// Pointer or touch event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    /// `pointerdown` / `touchstart`.
    Down,
    /// `pointermove` / `touchmove`.
    Move,
    /// `pointerup` / `touchend`.
    Up,
    /// `pointercancel` / `touchcancel`.
    Cancel,
}

/// Drag state of the opacity slider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityControl {
    track: SliderTrack,
    dragging: bool,
}

impl OpacityControl {
    /// Control over `track`.
    pub fn new(track: SliderTrack) -> Self {
        Self {
            track,
            dragging: false,
        }
    }

    /// Updates the track extent after layout.
    pub fn set_track(&mut self, track: SliderTrack) {
        self.track = track;
    }

    /// Returns `true` between down and up.
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Feeds one event; returns the opacity to apply now, if any.
    pub fn handle(&mut self, phase: PointerPhase, client_y: f64) -> Option<Opacity> {
        match phase {
            PointerPhase::Down => {
                self.dragging = true;
                Some(self.track.opacity_at(client_y))
            }
            PointerPhase::Move if self.dragging => Some(self.track.opacity_at(client_y)),
            PointerPhase::Move => None,
            PointerPhase::Up | PointerPhase::Cancel => {
                self.dragging = false;
                None
            }
        }
    }
}

/// Which framing guides are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuideOptions {
    /// Rule-of-thirds grid.
    pub grid: bool,
    /// Horizontal horizon line.
    pub horizon: bool,
}

impl GuideOptions {
    /// Returns `true` when nothing is drawn.
    pub fn is_empty(self) -> bool {
        !self.grid && !self.horizon
    }
}

/// Rectangle the video content occupies inside its element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderBox {
    /// Left offset within the element.
    pub x: f64,
    /// Top offset within the element.
    pub y: f64,
    /// Rendered width.
    pub width: f64,
    /// Rendered height.
    pub height: f64,
}

impl RenderBox {
    /// Box of `intrinsic` video dimensions letterboxed into `container`
    /// (`object-fit: contain`).
    pub fn contain(intrinsic: (u32, u32), container: (f64, f64)) -> Self {
        let (video_width, video_height) = (f64::from(intrinsic.0), f64::from(intrinsic.1));
        let (outer_width, outer_height) = container;
        if video_width <= 0.0 || video_height <= 0.0 || outer_width <= 0.0 || outer_height <= 0.0
        {
            return Self {
                width: outer_width.max(0.0),
                height: outer_height.max(0.0),
                ..Self::default()
            };
        }

        let scale = (outer_width / video_width).min(outer_height / video_height);
        let width = video_width * scale;
        let height = video_height * scale;
        Self {
            x: (outer_width - width) / 2.0,
            y: (outer_height - height) / 2.0,
            width,
            height,
        }
    }

    /// Returns `true` when the box has no area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Guide category, for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideKind {
    /// Rule-of-thirds line.
    Grid,
    /// Horizon line.
    Horizon,
}

/// Line segment in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideLine {
    /// Category.
    pub kind: GuideKind,
    /// Start x.
    pub x1: f64,
    /// Start y.
    pub y1: f64,
    /// End x.
    pub x2: f64,
    /// End y.
    pub y2: f64,
}

/// Guide lines for a surface of `render_box` size. Coordinates are relative
/// to the surface origin.
pub fn guide_lines(render_box: &RenderBox, options: GuideOptions) -> Vec<GuideLine> {
    let (width, height) = (render_box.width, render_box.height);
    let mut lines = Vec::new();
    if render_box.is_empty() {
        return lines;
    }

    if options.grid {
        for third in [1.0, 2.0] {
            let x = width * third / 3.0;
            let y = height * third / 3.0;
            lines.push(GuideLine {
                kind: GuideKind::Grid,
                x1: x,
                y1: 0.0,
                x2: x,
                y2: height,
            });
            lines.push(GuideLine {
                kind: GuideKind::Grid,
                x1: 0.0,
                y1: y,
                x2: width,
                y2: y,
            });
        }
    }
    if options.horizon {
        lines.push(GuideLine {
            kind: GuideKind::Horizon,
            x1: 0.0,
            y1: height / 2.0,
            x2: width,
            y2: height / 2.0,
        });
    }
    lines
}

/// Drawing target for guides (a `<canvas>` in the browser).
pub trait GuideSurface {
    /// Positions and sizes the surface over the video box.
    fn resize(&self, render_box: &RenderBox);

    /// Erases everything.
    fn clear(&self);

    /// Strokes one line.
    fn draw_line(&self, line: &GuideLine);
}

/// Overlay state: reference, opacity, guides and the last drawn box.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostOverlayRenderer {
    reference_url: Option<String>,
    opacity: Opacity,
    control: OpacityControl,
    guides: GuideOptions,
    last_box: Option<RenderBox>,
    dirty: bool,
    redraws: u64,
}

impl GhostOverlayRenderer {
    /// Renderer with default opacity and no guides.
    pub fn new(track: SliderTrack) -> Self {
        Self {
            reference_url: None,
            opacity: Opacity::default(),
            control: OpacityControl::new(track),
            guides: GuideOptions::default(),
            last_box: None,
            dirty: true,
            redraws: 0,
        }
    }

    /// Current reference image URL.
    pub fn reference_url(&self) -> Option<&str> {
        self.reference_url.as_deref()
    }

    /// Shows `url` as the ghost. Returns `true` when it changed.
    pub fn set_reference(&mut self, url: Option<&str>) -> bool {
        if self.reference_url.as_deref() == url {
            return false;
        }
        self.reference_url = url.map(str::to_string);
        true
    }

    /// Current opacity.
    pub fn opacity(&self) -> Opacity {
        self.opacity
    }

    /// Sets opacity directly (keyboard, host).
    pub fn set_opacity(&mut self, opacity: Opacity) {
        self.opacity = opacity;
    }

    /// Updates the slider extent.
    pub fn set_track(&mut self, track: SliderTrack) {
        self.control.set_track(track);
    }

    /// Feeds a slider event. Returns the opacity to apply now.
    pub fn pointer(&mut self, phase: PointerPhase, client_y: f64) -> Option<Opacity> {
        let opacity = self.control.handle(phase, client_y)?;
        self.opacity = opacity;
        Some(opacity)
    }

    /// Current guide options.
    pub fn guides(&self) -> GuideOptions {
        self.guides
    }

    /// Changes guide options; a change forces the next redraw.
    pub fn set_guides(&mut self, guides: GuideOptions) {
        if guides != self.guides {
            self.guides = guides;
            self.dirty = true;
        }
    }

    /// Toggles the grid.
    pub fn toggle_grid(&mut self) {
        self.set_guides(GuideOptions {
            grid: !self.guides.grid,
            ..self.guides
        });
    }

    /// Toggles the horizon line.
    pub fn toggle_horizon(&mut self) {
        self.set_guides(GuideOptions {
            horizon: !self.guides.horizon,
            ..self.guides
        });
    }

    /// Forces the next [`GhostOverlayRenderer::layout`] to redraw (mode
    /// switch, new stream).
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Number of redraws so far.
    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    /// Redraws guides when `render_box` differs from the last drawn box or
    /// state is dirty. Returns `true` when it drew.
    pub fn layout(&mut self, render_box: RenderBox, surface: &dyn GuideSurface) -> bool {
        if !self.dirty && self.last_box == Some(render_box) {
            return false;
        }

        surface.resize(&render_box);
        surface.clear();
        for line in guide_lines(&render_box, self.guides) {
            surface.draw_line(&line);
        }

        tracing::debug!(
            stage = "overlay",
            action = "redraw",
            width = render_box.width,
            height = render_box.height,
            grid = self.guides.grid,
            horizon = self.guides.horizon
        );
        self.last_box = Some(render_box);
        self.dirty = false;
        self.redraws += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for opacity mapping, layout and redraw decisions.

    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct CountingSurface {
        lines: RefCell<Vec<GuideLine>>,
        resizes: RefCell<Vec<RenderBox>>,
    }

    impl GuideSurface for CountingSurface {
        fn resize(&self, render_box: &RenderBox) {
            self.resizes.borrow_mut().push(*render_box);
        }

        fn clear(&self) {
            self.lines.borrow_mut().clear();
        }

        fn draw_line(&self, line: &GuideLine) {
            self.lines.borrow_mut().push(*line);
        }
    }

    fn track() -> SliderTrack {
        SliderTrack {
            top: 100.0,
            height: 200.0,
        }
    }

    #[test]
    fn opacity_clamps_and_defaults_to_half() {
        assert_eq!(Opacity::new(-5), Opacity::TRANSPARENT);
        assert_eq!(Opacity::new(140), Opacity::OPAQUE);
        assert_eq!(Opacity::default().percent(), 50);
        assert!((Opacity::new(25).css_value() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn top_of_track_is_fully_opaque() {
        let track = track();
        assert_eq!(track.opacity_at(100.0), Opacity::OPAQUE);
        assert_eq!(track.opacity_at(300.0), Opacity::TRANSPARENT);
        assert_eq!(track.opacity_at(150.0).percent(), 75);
        assert_eq!(track.opacity_at(-40.0), Opacity::OPAQUE);
    }

    #[test]
    fn moves_only_apply_while_dragging() {
        let mut renderer = GhostOverlayRenderer::new(track());
        assert_eq!(renderer.pointer(PointerPhase::Move, 100.0), None);
        assert_eq!(renderer.opacity(), Opacity::default());

        assert_eq!(
            renderer.pointer(PointerPhase::Down, 250.0),
            Some(Opacity::new(25))
        );
        assert_eq!(
            renderer.pointer(PointerPhase::Move, 120.0),
            Some(Opacity::new(90))
        );
        assert_eq!(renderer.pointer(PointerPhase::Up, 120.0), None);
        assert_eq!(renderer.pointer(PointerPhase::Move, 300.0), None);
        assert_eq!(renderer.opacity(), Opacity::new(90));
    }

    #[test]
    fn contain_letterboxes_video() {
        let pillarbox = RenderBox::contain((640, 480), (800.0, 480.0));
        assert_eq!(
            pillarbox,
            RenderBox {
                x: 80.0,
                y: 0.0,
                width: 640.0,
                height: 480.0
            }
        );

        let letterbox = RenderBox::contain((1920, 1080), (960.0, 960.0));
        assert_eq!(letterbox.width, 960.0);
        assert_eq!(letterbox.height, 540.0);
        assert_eq!(letterbox.y, 210.0);
    }

    #[test]
    fn guide_lines_cover_thirds_and_horizon() {
        let render_box = RenderBox {
            width: 300.0,
            height: 600.0,
            ..RenderBox::default()
        };
        let grid_only = guide_lines(
            &render_box,
            GuideOptions {
                grid: true,
                horizon: false,
            },
        );
        assert_eq!(grid_only.len(), 4);
        assert!(grid_only.iter().any(|line| line.x1 == 100.0 && line.x2 == 100.0));
        assert!(grid_only.iter().any(|line| line.y1 == 400.0 && line.y2 == 400.0));

        let horizon = guide_lines(
            &render_box,
            GuideOptions {
                grid: false,
                horizon: true,
            },
        );
        assert_eq!(horizon.len(), 1);
        assert_eq!(horizon[0].kind, GuideKind::Horizon);
        assert_eq!(horizon[0].y1, 300.0);

        assert!(guide_lines(&render_box, GuideOptions::default()).is_empty());
    }

    #[test]
    fn redraws_only_when_box_or_options_change() {
        let surface = CountingSurface::default();
        let mut renderer = GhostOverlayRenderer::new(track());
        let first = RenderBox::contain((1920, 1080), (400.0, 800.0));

        assert!(renderer.layout(first, &surface));
        assert!(!renderer.layout(first, &surface));

        renderer.toggle_grid();
        assert!(renderer.layout(first, &surface));
        assert_eq!(surface.lines.borrow().len(), 4);

        let rotated = RenderBox::contain((1920, 1080), (800.0, 400.0));
        assert!(renderer.layout(rotated, &surface));
        assert_eq!(surface.resizes.borrow().last(), Some(&rotated));

        renderer.invalidate();
        assert!(renderer.layout(rotated, &surface));
        assert_eq!(renderer.redraws(), 4);
    }

    #[test]
    fn reference_change_is_reported_once() {
        let mut renderer = GhostOverlayRenderer::new(track());
        assert!(renderer.set_reference(Some("https://cdn.example.com/a.jpg")));
        assert!(!renderer.set_reference(Some("https://cdn.example.com/a.jpg")));
        assert_eq!(renderer.reference_url(), Some("https://cdn.example.com/a.jpg"));
        assert!(renderer.set_reference(None));
    }
}
