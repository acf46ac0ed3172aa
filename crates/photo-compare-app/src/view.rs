//! View models projected from the capture state machine.
//!
//! The state machine decides which view is active; this module turns that
//! decision plus widget context (stored captures, pending preview, camera
//! availability) into a plain [`ViewModel`] the browser layer renders.
//! [`ViewPresenter`] forwards a model only when it differs from the last one.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use photo_compare_core::{CapturedPhoto, Piece, SlotKey};
use photo_compare_flow::{CaptureStateMachine, Mode, PieceProgress, View};
use photo_compare_overlay::Opacity;

/// Room card shown in lists and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceTile {
    /// Piece id.
    pub piece_id: String,
    /// Display name.
    pub nom: String,
    /// Inspection note, when present.
    pub commentaire_ia: Option<String>,
    /// Step instructions (`consigne`, falling back to `task_name`).
    pub instructions: Vec<String>,
    /// Captured versus total references.
    pub progress: PieceProgress,
}

/// One reference photo slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTile {
    /// Index within the piece.
    pub index: usize,
    /// Reference image URL.
    pub url: String,
    /// A confirmed capture exists.
    pub captured: bool,
}

/// Position in the guided sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuidedPosition {
    /// Zero-based step.
    pub step: usize,
    /// Number of steps (pieces).
    pub total: usize,
}

/// Everything the browser layer needs to draw one screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewModel {
    /// No manifest yet.
    Loading,
    /// Mode chooser.
    Home {
        /// Overall progress.
        progress: PieceProgress,
        /// Step guided mode was left at; re-entry then needs a reset.
        interrupted_step: Option<usize>,
    },
    /// Free-mode room grid.
    FreeGrid {
        /// Every piece in manifest order.
        pieces: Vec<PieceTile>,
    },
    /// Reference list of one piece.
    PhotoList {
        /// Piece in focus.
        piece: PieceTile,
        /// Its references.
        references: Vec<ReferenceTile>,
        /// Guided position, in guided mode.
        guided: Option<GuidedPosition>,
    },
    /// Live framing of one reference.
    Capture {
        /// Piece in focus.
        piece: PieceTile,
        /// Reference being reproduced.
        reference: ReferenceTile,
        /// Guided position, in guided mode.
        guided: Option<GuidedPosition>,
        /// More than one camera is available.
        can_switch_camera: bool,
        /// Data URL of a capture awaiting confirmation.
        preview: Option<String>,
    },
    /// Side-by-side review of a confirmed capture.
    Review {
        /// Piece in focus.
        piece: PieceTile,
        /// Reference that was captured.
        reference: ReferenceTile,
        /// Data URL of the capture, while the widget still holds it.
        captured: Option<String>,
    },
    /// Guided sequence finished.
    GuidedComplete {
        /// Overall progress.
        progress: PieceProgress,
    },
}

/// Widget state that is not part of the navigation state.
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    /// Confirmed captures still held by the widget.
    pub captures: &'a BTreeMap<SlotKey, CapturedPhoto>,
    /// Slot and data URL of the capture awaiting confirmation.
    pub pending: Option<(&'a SlotKey, &'a str)>,
    /// More than one camera is available.
    pub can_switch_camera: bool,
}

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    /// Informational.
    Info,
    /// Recoverable problem.
    Warning,
    /// Failure reported to the host as well.
    Error,
}

/// Short user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Severity.
    pub level: ToastLevel,
    /// Text.
    pub message: String,
}

impl Toast {
    /// Toast of `level`.
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Rendering surface of the widget (DOM, test double).
pub trait WidgetView {
    /// Draws a full screen.
    fn render(&self, model: &ViewModel);

    /// Shows a toast.
    fn toast(&self, toast: &Toast);

    /// Sets the ghost opacity immediately, outside the render cycle.
    fn apply_opacity(&self, opacity: Opacity);

    /// Measures the live video element, once it is laid out and visible.
    fn measure_stage(&self) -> Option<StageSize> {
        None
    }
}

/// Video element geometry read back from the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSize {
    /// Frame size reported by the video element.
    pub intrinsic: (u32, u32),
    /// Element box in CSS pixels.
    pub container: (f64, f64),
}

/// Projects the machine's current view.
pub fn build_view_model(flow: &CaptureStateMachine, context: &ViewContext<'_>) -> ViewModel {
    let guided = (flow.mode() == Mode::Guided).then(|| GuidedPosition {
        step: flow.state().current_step,
        total: flow.manifest().pieces().len(),
    });

    match flow.view() {
        View::Home => ViewModel::Home {
            progress: flow.overall_progress(),
            interrupted_step: (flow.state().current_step > 0)
                .then_some(flow.state().current_step),
        },
        View::FreeGrid => ViewModel::FreeGrid {
            pieces: flow
                .manifest()
                .pieces()
                .iter()
                .map(|piece| piece_tile(flow, piece))
                .collect(),
        },
        View::PhotoList(piece_id) => match flow.manifest().piece(piece_id) {
            Some(piece) => ViewModel::PhotoList {
                piece: piece_tile(flow, piece),
                references: piece
                    .slots()
                    .filter_map(|slot| reference_tile(flow, &slot))
                    .collect(),
                guided,
            },
            None => ViewModel::Loading,
        },
        View::Capture(slot) => {
            match (flow.manifest().piece(&slot.piece_id), reference_tile(flow, slot)) {
                (Some(piece), Some(reference)) => ViewModel::Capture {
                    piece: piece_tile(flow, piece),
                    reference,
                    guided,
                    can_switch_camera: context.can_switch_camera,
                    preview: context
                        .pending
                        .filter(|(pending, _)| *pending == slot)
                        .map(|(_, data_url)| data_url.to_string()),
                },
                _ => ViewModel::Loading,
            }
        }
        View::Review(slot) => {
            match (flow.manifest().piece(&slot.piece_id), reference_tile(flow, slot)) {
                (Some(piece), Some(reference)) => ViewModel::Review {
                    piece: piece_tile(flow, piece),
                    reference,
                    captured: context
                        .captures
                        .get(slot)
                        .map(|photo| photo.data_url.clone()),
                },
                _ => ViewModel::Loading,
            }
        }
        View::GuidedComplete => ViewModel::GuidedComplete {
            progress: flow.overall_progress(),
        },
    }
}

fn piece_tile(flow: &CaptureStateMachine, piece: &Piece) -> PieceTile {
    PieceTile {
        piece_id: piece.piece_id().to_string(),
        nom: piece.nom().to_string(),
        commentaire_ia: piece.commentaire_ia().map(str::to_string),
        instructions: piece
            .steps()
            .iter()
            .map(|step| step.consigne.clone().unwrap_or_else(|| step.task_name.clone()))
            .collect(),
        progress: flow.progress(piece.piece_id()).unwrap_or(PieceProgress {
            captured: 0,
            total: piece.reference_count(),
        }),
    }
}

fn reference_tile(flow: &CaptureStateMachine, slot: &SlotKey) -> Option<ReferenceTile> {
    flow.manifest().reference(slot).map(|photo| ReferenceTile {
        index: slot.reference_index,
        url: photo.url().to_string(),
        captured: flow.is_captured(slot),
    })
}

/// Forwards view models to a [`WidgetView`], skipping unchanged ones.
pub struct ViewPresenter {
    view: Rc<dyn WidgetView>,
    last: RefCell<Option<ViewModel>>,
}

impl ViewPresenter {
    /// Presenter over `view`.
    pub fn new(view: Rc<dyn WidgetView>) -> Self {
        Self {
            view,
            last: RefCell::new(None),
        }
    }

    /// Renders `model` when it differs from the last one. Returns `true`
    /// when it rendered.
    pub fn present(&self, model: ViewModel) -> bool {
        if self.last.borrow().as_ref() == Some(&model) {
            return false;
        }
        self.view.render(&model);
        *self.last.borrow_mut() = Some(model);
        true
    }

    /// Last rendered model.
    pub fn current(&self) -> Option<ViewModel> {
        self.last.borrow().clone()
    }

    /// Forces the next [`ViewPresenter::present`] to render.
    pub fn invalidate(&self) {
        *self.last.borrow_mut() = None;
    }
}
