#![warn(missing_docs)]
//! # photo-compare-flow
//!
//! ## Purpose
//! Navigation and completion tracking for free and guided capture.
//!
//! ## Responsibilities
//! - Hold [`NavigationState`]: mode, current piece/reference, guided step,
//!   captured slots and completed pieces.
//! - Decide the next [`View`] after every user or host action.
//! - Keep piece completion consistent with captured slots.
//!
//! ## Data flow
//! Widget action -> [`CaptureStateMachine`] operation -> new [`View`] -> view
//! layer renders only when the view model changed.
//!
//! ## Ownership and lifetimes
//! The machine owns its manifest; reloading replaces it wholesale and keeps
//! only captures that still address a reference.
//!
//! ## Error model
//! Actions that do not apply to the current mode or view fail with
//! [`FlowError`] and leave state untouched.

use std::collections::BTreeSet;

use photo_compare_core::{Piece, ReferenceManifest, SlotKey};
use thiserror::Error;

/// Navigation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// User picks pieces from the grid.
    Free,
    /// Sequential walk over pieces in manifest order.
    Guided,
}

/// What the widget shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// Landing screen (free mode).
    Home,
    /// Piece grid (free mode).
    FreeGrid,
    /// Reference list of one piece.
    PhotoList(String),
    /// Live camera framing one reference.
    Capture(SlotKey),
    /// Captured photo next to its reference.
    Review(SlotKey),
    /// Guided sequence finished.
    GuidedComplete,
}

impl View {
    /// Piece the view is about, if any.
    pub fn piece_id(&self) -> Option<&str> {
        match self {
            View::PhotoList(piece_id) => Some(piece_id),
            View::Capture(slot) | View::Review(slot) => Some(&slot.piece_id),
            View::Home | View::FreeGrid | View::GuidedComplete => None,
        }
    }
}

/// Navigation and completion state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    /// Current mode.
    pub mode: Mode,
    /// Piece in focus.
    pub current_piece_id: Option<String>,
    /// Reference in focus within the current piece.
    pub current_reference_index: usize,
    /// Guided step pointer (index into manifest pieces).
    pub current_step: usize,
    /// Pieces whose every reference is captured.
    pub completed_pieces: BTreeSet<String>,
    /// Captured slots.
    pub captured_references: BTreeSet<SlotKey>,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            mode: Mode::Free,
            current_piece_id: None,
            current_reference_index: 0,
            current_step: 0,
            completed_pieces: BTreeSet::new(),
            captured_references: BTreeSet::new(),
        }
    }
}

/// Captured/total counts of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceProgress {
    /// Captured references.
    pub captured: usize,
    /// Reference count.
    pub total: usize,
}

impl PieceProgress {
    /// Returns `true` when every reference is captured.
    pub fn is_complete(&self) -> bool {
        self.captured == self.total
    }
}

/// Free/guided capture state machine.
#[derive(Debug, Clone)]
pub struct CaptureStateMachine {
    manifest: ReferenceManifest,
    state: NavigationState,
    view: View,
}

impl CaptureStateMachine {
    /// Machine on the home view of `manifest`.
    pub fn new(manifest: ReferenceManifest) -> Self {
        Self {
            manifest,
            state: NavigationState::default(),
            view: View::Home,
        }
    }

    /// Active manifest.
    pub fn manifest(&self) -> &ReferenceManifest {
        &self.manifest
    }

    /// Navigation state.
    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    /// Current view.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    /// Returns `true` when `slot` holds a capture.
    pub fn is_captured(&self, slot: &SlotKey) -> bool {
        self.state.captured_references.contains(slot)
    }

    /// Returns `true` when every reference of `piece_id` is captured.
    pub fn is_piece_complete(&self, piece_id: &str) -> bool {
        self.state.completed_pieces.contains(piece_id)
    }

    /// Progress of one piece.
    pub fn progress(&self, piece_id: &str) -> Option<PieceProgress> {
        let piece = self.manifest.piece(piece_id)?;
        Some(self.piece_progress(piece))
    }

    /// Progress summed over every piece.
    pub fn overall_progress(&self) -> PieceProgress {
        self.manifest
            .pieces()
            .iter()
            .map(|piece| self.piece_progress(piece))
            .fold(
                PieceProgress {
                    captured: 0,
                    total: 0,
                },
                |sum, piece| PieceProgress {
                    captured: sum.captured + piece.captured,
                    total: sum.total + piece.total,
                },
            )
    }

    /// Replaces the manifest and returns to the home view in free mode.
    ///
    /// Captures whose slot no longer exists are dropped; completion is
    /// recomputed.
    pub fn replace_manifest(&mut self, manifest: ReferenceManifest) -> View {
        self.manifest = manifest;
        let manifest = &self.manifest;
        self.state
            .captured_references
            .retain(|slot| manifest.contains_slot(slot));
        self.state.completed_pieces = manifest
            .pieces()
            .iter()
            .filter(|piece| piece.slots().all(|slot| self.state.captured_references.contains(&slot)))
            .map(|piece| piece.piece_id().to_string())
            .collect();
        self.state.mode = Mode::Free;
        self.state.current_piece_id = None;
        self.state.current_reference_index = 0;
        self.state.current_step = 0;
        tracing::info!(
            stage = "flow",
            action = "manifest_replaced",
            pieces = self.manifest.pieces().len(),
            kept_captures = self.state.captured_references.len()
        );
        self.set_view(View::Home)
    }

    /// Opens the piece grid.
    ///
    /// # Errors
    /// Returns [`FlowError::GuidedActive`] in guided mode.
    pub fn open_grid(&mut self) -> Result<View, FlowError> {
        self.require_free("open_grid")?;
        Ok(self.set_view(View::FreeGrid))
    }

    /// Opens a piece chosen by the user or the host.
    ///
    /// # Errors
    /// Returns [`FlowError::GuidedActive`] in guided mode and
    /// [`FlowError::UnknownPiece`] when the id is not in the manifest.
    pub fn select_piece(&mut self, piece_id: &str) -> Result<View, FlowError> {
        self.require_free("select_piece")?;
        let index = self
            .manifest
            .piece_index(piece_id)
            .ok_or_else(|| FlowError::UnknownPiece(piece_id.to_string()))?;
        Ok(self.open_piece_at(index))
    }

    /// Enters guided mode at the first step.
    ///
    /// # Errors
    /// Returns [`FlowError::GuidedInProgress`] when guided mode is active or
    /// was left mid-sequence; [`CaptureStateMachine::reset_guided`] restarts
    /// it.
    pub fn start_guided(&mut self) -> Result<View, FlowError> {
        if self.state.mode == Mode::Guided || self.state.current_step > 0 {
            return Err(FlowError::GuidedInProgress);
        }
        self.state.mode = Mode::Guided;
        tracing::info!(stage = "flow", action = "guided_start");
        Ok(self.open_step(0))
    }

    /// Restarts the guided sequence from its first step.
    pub fn reset_guided(&mut self) -> View {
        self.state.mode = Mode::Guided;
        tracing::info!(stage = "flow", action = "guided_reset");
        self.open_step(0)
    }

    /// Leaves guided mode for the home view. The step pointer is kept, so only
    /// [`CaptureStateMachine::reset_guided`] re-enters the sequence.
    pub fn exit_guided(&mut self) -> View {
        self.state.mode = Mode::Free;
        self.state.current_piece_id = None;
        tracing::info!(
            stage = "flow",
            action = "guided_exit",
            step = self.state.current_step
        );
        self.set_view(View::Home)
    }

    /// Guided next: one step forward, no-op on the last step.
    ///
    /// # Errors
    /// Returns [`FlowError::NotGuided`] in free mode.
    pub fn next_step(&mut self) -> Result<View, FlowError> {
        self.require_guided("next_step")?;
        if self.state.current_step >= self.last_step() {
            return Ok(self.view.clone());
        }
        Ok(self.open_step(self.state.current_step + 1))
    }

    /// Guided back: one step back, leaving guided mode from step 0.
    ///
    /// # Errors
    /// Returns [`FlowError::NotGuided`] in free mode.
    pub fn previous_step(&mut self) -> Result<View, FlowError> {
        self.require_guided("previous_step")?;
        if self.state.current_step == 0 {
            return Ok(self.exit_guided());
        }
        Ok(self.open_step(self.state.current_step - 1))
    }

    /// Focuses a reference of the current piece: review when captured,
    /// capture otherwise.
    ///
    /// # Errors
    /// Returns [`FlowError::NoCurrentPiece`] without a piece in focus and
    /// [`FlowError::ReferenceOutOfRange`] for a bad index.
    pub fn select_reference(&mut self, reference_index: usize) -> Result<View, FlowError> {
        let piece_id = self
            .state
            .current_piece_id
            .clone()
            .ok_or(FlowError::NoCurrentPiece)?;
        let slot = SlotKey::new(piece_id, reference_index);
        if !self.manifest.contains_slot(&slot) {
            return Err(FlowError::ReferenceOutOfRange(slot));
        }

        self.state.current_reference_index = reference_index;
        let view = if self.is_captured(&slot) {
            View::Review(slot)
        } else {
            View::Capture(slot)
        };
        Ok(self.set_view(view))
    }

    /// Records a confirmed capture for the slot being framed and advances.
    ///
    /// # Errors
    /// Returns [`FlowError::NotCapturing`] unless the view is
    /// `Capture(slot)`.
    pub fn record_capture(&mut self, slot: &SlotKey) -> Result<View, FlowError> {
        if self.view != View::Capture(slot.clone()) {
            return Err(FlowError::NotCapturing(slot.clone()));
        }

        self.state.captured_references.insert(slot.clone());
        let piece_complete = self.refresh_completion(&slot.piece_id);
        tracing::info!(
            stage = "flow",
            action = "captured",
            slot = %slot,
            piece_complete
        );

        if !piece_complete
            && let Some(next) = self.next_uncaptured(&slot.piece_id, slot.reference_index)
        {
            self.state.current_reference_index = next;
            return Ok(self.set_view(View::Capture(SlotKey::new(slot.piece_id.clone(), next))));
        }

        match self.state.mode {
            Mode::Guided if self.state.current_step >= self.last_step() => {
                tracing::info!(stage = "flow", action = "guided_complete");
                Ok(self.set_view(View::GuidedComplete))
            }
            Mode::Guided => Ok(self.open_step(self.state.current_step + 1)),
            Mode::Free => Ok(self.set_view(View::PhotoList(slot.piece_id.clone()))),
        }
    }

    /// Review "keep": back to framing the same reference, no state change.
    ///
    /// # Errors
    /// Returns [`FlowError::NotReviewing`] outside the review view.
    pub fn keep(&mut self) -> Result<View, FlowError> {
        let slot = self.reviewed_slot()?;
        Ok(self.set_view(View::Capture(slot)))
    }

    /// Review "retake": drops the capture and reopens framing for it.
    ///
    /// # Errors
    /// Returns [`FlowError::NotReviewing`] outside the review view.
    pub fn retake(&mut self) -> Result<View, FlowError> {
        let slot = self.reviewed_slot()?;
        self.state.captured_references.remove(&slot);
        self.state.completed_pieces.remove(&slot.piece_id);
        tracing::info!(stage = "flow", action = "retake", slot = %slot);
        Ok(self.set_view(View::Capture(slot)))
    }

    /// Back navigation from the current view.
    pub fn back(&mut self) -> View {
        match (&self.view, self.state.mode) {
            (View::Home, _) => self.view.clone(),
            (View::FreeGrid, _) => self.set_view(View::Home),
            (View::Review(slot), _) => {
                let slot = slot.clone();
                self.set_view(View::Capture(slot))
            }
            (View::PhotoList(_) | View::Capture(_), Mode::Free) => {
                let view = match self.state.current_piece_id.clone() {
                    Some(piece_id) if matches!(self.view, View::Capture(_)) => {
                        View::PhotoList(piece_id)
                    }
                    _ => View::FreeGrid,
                };
                self.set_view(view)
            }
            (View::PhotoList(_) | View::Capture(_), Mode::Guided) => {
                if self.state.current_step == 0 {
                    self.exit_guided()
                } else {
                    self.open_step(self.state.current_step - 1)
                }
            }
            (View::GuidedComplete, _) => {
                self.state.mode = Mode::Guided;
                self.open_step(self.state.current_step)
            }
        }
    }

    /// Checks the completion invariants.
    ///
    /// # Errors
    /// Returns [`FlowError::InvariantViolated`] describing the first breach.
    pub fn check_invariants(&self) -> Result<(), FlowError> {
        for slot in &self.state.captured_references {
            if !self.manifest.contains_slot(slot) {
                return Err(FlowError::InvariantViolated(format!(
                    "captured slot {slot} is not in the manifest"
                )));
            }
        }
        for piece in self.manifest.pieces() {
            let complete = self.piece_progress(piece).is_complete();
            if complete != self.state.completed_pieces.contains(piece.piece_id()) {
                return Err(FlowError::InvariantViolated(format!(
                    "completion of piece {} disagrees with its captures",
                    piece.piece_id()
                )));
            }
        }
        if self.state.current_step > self.last_step() {
            return Err(FlowError::InvariantViolated(format!(
                "step {} beyond last piece",
                self.state.current_step
            )));
        }
        Ok(())
    }

    fn piece_progress(&self, piece: &Piece) -> PieceProgress {
        PieceProgress {
            captured: piece.slots().filter(|slot| self.is_captured(slot)).count(),
            total: piece.reference_count(),
        }
    }

    fn last_step(&self) -> usize {
        self.manifest.pieces().len().saturating_sub(1)
    }

    fn open_step(&mut self, step: usize) -> View {
        self.state.current_step = step;
        self.open_piece_at(step)
    }

    fn open_piece_at(&mut self, index: usize) -> View {
        let Some(piece) = self.manifest.pieces().get(index) else {
            return self.view.clone();
        };
        let piece_id = piece.piece_id().to_string();
        let first_open = self.next_uncaptured(&piece_id, piece.reference_count());

        self.state.current_piece_id = Some(piece_id.clone());
        let view = match first_open {
            Some(reference_index) => {
                self.state.current_reference_index = reference_index;
                View::Capture(SlotKey::new(piece_id, reference_index))
            }
            None => {
                self.state.current_reference_index = 0;
                View::PhotoList(piece_id)
            }
        };
        self.set_view(view)
    }

    /// First uncaptured reference after `after`, wrapping around. Passing the
    /// reference count searches from index 0.
    fn next_uncaptured(&self, piece_id: &str, after: usize) -> Option<usize> {
        let count = self.manifest.reference_count(piece_id)?;
        (1..=count)
            .map(|offset| (after + offset) % count)
            .find(|index| !self.is_captured(&SlotKey::new(piece_id, *index)))
    }

    fn refresh_completion(&mut self, piece_id: &str) -> bool {
        let complete = self
            .manifest
            .piece(piece_id)
            .is_some_and(|piece| self.piece_progress(piece).is_complete());
        if complete {
            self.state.completed_pieces.insert(piece_id.to_string());
        } else {
            self.state.completed_pieces.remove(piece_id);
        }
        complete
    }

    fn reviewed_slot(&self) -> Result<SlotKey, FlowError> {
        match &self.view {
            View::Review(slot) => Ok(slot.clone()),
            _ => Err(FlowError::NotReviewing),
        }
    }

    fn require_free(&self, action: &'static str) -> Result<(), FlowError> {
        if self.state.mode == Mode::Guided {
            tracing::debug!(stage = "flow", action, "refused in guided mode");
            return Err(FlowError::GuidedActive);
        }
        Ok(())
    }

    fn require_guided(&self, action: &'static str) -> Result<(), FlowError> {
        if self.state.mode != Mode::Guided {
            tracing::debug!(stage = "flow", action, "refused in free mode");
            return Err(FlowError::NotGuided);
        }
        Ok(())
    }

    fn set_view(&mut self, view: View) -> View {
        if view != self.view {
            tracing::debug!(stage = "flow", action = "view", view = ?view);
        }
        self.view = view;
        self.view.clone()
    }
}

/// Rejected navigation actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Action is only available in free mode.
    #[error("action unavailable during guided capture")]
    GuidedActive,
    /// Guided mode is already running.
    #[error("guided capture already in progress; reset to restart")]
    GuidedInProgress,
    /// Action is only available in guided mode.
    #[error("guided capture is not active")]
    NotGuided,
    /// Piece id not in the manifest.
    #[error("unknown piece: {0}")]
    UnknownPiece(String),
    /// Reference index beyond the piece's photos.
    #[error("no reference photo at {0}")]
    ReferenceOutOfRange(SlotKey),
    /// No piece is in focus.
    #[error("no piece selected")]
    NoCurrentPiece,
    /// Capture recorded for a slot that is not being framed.
    #[error("slot {0} is not being captured")]
    NotCapturing(SlotKey),
    /// Keep/retake outside review.
    #[error("no capture under review")]
    NotReviewing,
    /// Completion bookkeeping is inconsistent.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}
