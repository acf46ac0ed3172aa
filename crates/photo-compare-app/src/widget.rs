//! One widget instance: subsystems, event handlers and host reporting.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use photo_compare_bridge::{
    CaptureConfirmedPayload, CapturePreviewPayload, DataRequestPayload, HostBridge, HostCommand,
    HostPort, OriginGuard, OutboundMessage, PieceSelectedPayload, ReadyPayload,
};
use photo_compare_camera::{
    CameraError, CameraNegotiator, DEFAULT_STRATEGY_CHAIN, MediaDevices, NegotiatorConfig,
    Platform, ResolutionHint, SwitchOutcome, Timer, VideoSink,
};
use photo_compare_config::{LaunchParams, ManifestSourceSpec, TokenStore, WidgetConfig};
use photo_compare_core::{CapturedPhoto, ErrorCode, ReferenceManifest, SlotKey};
use photo_compare_encoder::{CaptureEncoder, CaptureGate, FrameSource, OrientationProvider};
use photo_compare_flow::{CaptureStateMachine, FlowError, NavigationState, View};
use photo_compare_manifest::{LoadOutcome, ManifestError, ManifestFetcher, ManifestLoader};
use photo_compare_overlay::{
    GhostOverlayRenderer, GuideOptions, GuideSurface, Opacity, PointerPhase, RenderBox,
    SliderTrack,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::view::{Toast, ToastLevel, ViewContext, ViewModel, ViewPresenter, WidgetView, build_view_model};
use crate::{Clock, WidgetError, app_version, format_taken_at, redact_sensitive};

/// Platform services a widget runs on.
pub struct WidgetDeps {
    /// Camera backend.
    pub devices: Rc<dyn MediaDevices>,
    /// Delay source for timeouts, settle pauses and the data request grace.
    pub timer: Rc<dyn Timer>,
    /// Manifest HTTP client.
    pub fetcher: Rc<dyn ManifestFetcher>,
    /// Parent frame endpoint.
    pub port: Rc<dyn HostPort>,
    /// Rendering surface.
    pub view: Rc<dyn WidgetView>,
    /// Guide canvas.
    pub guides: Rc<dyn GuideSurface>,
    /// Live video frames.
    pub frames: Rc<dyn FrameSource>,
    /// Device orientation.
    pub orientation: Rc<dyn OrientationProvider>,
    /// Capture timestamps.
    pub clock: Rc<dyn Clock>,
    /// Video element streams are bound to.
    pub sink: Option<Rc<dyn VideoSink>>,
    /// Browser family.
    pub platform: Platform,
}

/// Result of a capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Preview sent; waiting for confirm or discard.
    AwaitingConfirmation(SlotKey),
    /// Capture recorded and sent to the host.
    Confirmed {
        /// Captured slot.
        slot: SlotKey,
        /// Id sent in `photo.capture.confirmed`.
        capture_id: String,
        /// View the machine advanced to.
        view: View,
    },
}

struct PendingCapture {
    slot: SlotKey,
    photo: CapturedPhoto,
}

/// The guided photo-capture widget.
///
/// Every handler takes `&self`; browser callbacks share the widget through an
/// `Rc` and no `RefCell` borrow is held across an await.
pub struct PhotoWidget {
    config: WidgetConfig,
    params: LaunchParams,
    camera: CameraNegotiator,
    loader: ManifestLoader,
    bridge: HostBridge,
    encoder: CaptureEncoder,
    gate: CaptureGate,
    tokens: RefCell<TokenStore>,
    flow: RefCell<Option<CaptureStateMachine>>,
    captures: RefCell<BTreeMap<SlotKey, CapturedPhoto>>,
    pending: RefCell<Option<PendingCapture>>,
    overlay: RefCell<GhostOverlayRenderer>,
    render_box: Cell<Option<RenderBox>>,
    presenter: ViewPresenter,
    view: Rc<dyn WidgetView>,
    guides: Rc<dyn GuideSurface>,
    frames: Rc<dyn FrameSource>,
    orientation: Rc<dyn OrientationProvider>,
    clock: Rc<dyn Clock>,
    timer: Rc<dyn Timer>,
}

impl PhotoWidget {
    /// Builds a widget; nothing runs until [`PhotoWidget::start`].
    ///
    /// # Errors
    /// Returns [`WidgetError::Config`] for an invalid config and
    /// [`WidgetError::Bridge`] for an unusable parent-origin hint.
    pub fn new(
        config: WidgetConfig,
        params: LaunchParams,
        deps: WidgetDeps,
    ) -> Result<Self, WidgetError> {
        config.validate()?;
        let guard = OriginGuard::new(config.parent_origin.as_deref())?;

        let negotiator_config = NegotiatorConfig {
            attempt_timeout: config.attempt_timeout(),
            switch_settle: config.switch_settle(),
            warmup_settle: deps
                .platform
                .needs_warmup_settle()
                .then(|| config.ios_warmup_settle()),
            resolution: ResolutionHint {
                width: config.ideal_width,
                height: config.ideal_height,
            },
            strategies: DEFAULT_STRATEGY_CHAIN.to_vec(),
        };
        let camera = CameraNegotiator::new(deps.devices, deps.timer.clone(), negotiator_config);
        if let Some(sink) = deps.sink {
            camera.attach_sink(sink);
        }

        tracing::info!(
            stage = "widget",
            action = "init",
            version = app_version(),
            platform = ?deps.platform,
            source = ?params.manifest_source()
        );

        Ok(Self {
            encoder: CaptureEncoder::new(config.jpeg_quality),
            tokens: RefCell::new(TokenStore::new(params.token.clone())),
            loader: ManifestLoader::new(deps.fetcher),
            bridge: HostBridge::new(deps.port, guard),
            camera,
            gate: CaptureGate::default(),
            flow: RefCell::new(None),
            captures: RefCell::new(BTreeMap::new()),
            pending: RefCell::new(None),
            overlay: RefCell::new(GhostOverlayRenderer::new(SliderTrack {
                top: 0.0,
                height: 0.0,
            })),
            render_box: Cell::new(None),
            presenter: ViewPresenter::new(deps.view.clone()),
            view: deps.view,
            guides: deps.guides,
            frames: deps.frames,
            orientation: deps.orientation,
            clock: deps.clock,
            timer: deps.timer,
            config,
            params,
        })
    }

    /// Announces the widget, loads the manifest from the launch source and
    /// asks the parent for one when none arrived within the grace window.
    pub async fn start(&self) {
        self.send(OutboundMessage::Ready(ReadyPayload {
            version: app_version().to_string(),
            rapport_id: self.params.rapport_id.clone(),
            logement_id: self.params.logement_id.clone(),
        }));
        self.render();

        futures::join!(self.load_from_source(), self.request_data_after_grace());
    }

    /// Loads the manifest from the launch source again.
    ///
    /// # Errors
    /// Returns [`WidgetError::Manifest`] when the fetch or validation fails.
    pub async fn reload(&self) -> Result<(), WidgetError> {
        let result = self.load_initial().await;
        self.reported(result)
    }

    /// Handles one `message` event from `origin`.
    ///
    /// # Errors
    /// Returns the failure that was also reported to the host, if any.
    pub async fn handle_message(&self, origin: &str, data: &Value) -> Result<(), WidgetError> {
        let command = match self.bridge.receive(origin, data) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(error) => return self.reported(Err(error.into())),
        };

        match command {
            HostCommand::ProvideManifest(manifest) => {
                self.loader.invalidate();
                self.apply_manifest(manifest).await;
                Ok(())
            }
            HostCommand::OpenPiece(piece_id) => {
                let result = self
                    .navigate(|flow| flow.select_piece(&piece_id))
                    .await
                    .map(|_| ());
                self.reported(result)
            }
            HostCommand::UpdateToken(token) => {
                let result = self.tokens.borrow_mut().rotate(token.as_str());
                self.reported(result.map_err(WidgetError::from))
            }
        }
    }

    /// Opens the free-mode piece grid.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] in guided mode.
    pub async fn open_grid(&self) -> Result<View, WidgetError> {
        let result = self.navigate(CaptureStateMachine::open_grid).await;
        self.reported(result)
    }

    /// Opens a piece from the grid.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] in guided mode or for an unknown piece.
    pub async fn select_piece(&self, piece_id: &str) -> Result<View, WidgetError> {
        let result = self.navigate(|flow| flow.select_piece(piece_id)).await;
        self.reported(result)
    }

    /// Enters guided mode at the first piece.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] when guided mode is active or was left
    /// mid-sequence.
    pub async fn start_guided(&self) -> Result<View, WidgetError> {
        let result = self.navigate(CaptureStateMachine::start_guided).await;
        self.reported(result)
    }

    /// Restarts guided mode from the first piece.
    ///
    /// # Errors
    /// Returns [`WidgetError::NoManifest`] before a manifest is loaded.
    pub async fn reset_guided(&self) -> Result<View, WidgetError> {
        let result = self.navigate(|flow| Ok(flow.reset_guided())).await;
        self.reported(result)
    }

    /// Leaves guided mode.
    ///
    /// # Errors
    /// Returns [`WidgetError::NoManifest`] before a manifest is loaded.
    pub async fn exit_guided(&self) -> Result<View, WidgetError> {
        let result = self.navigate(|flow| Ok(flow.exit_guided())).await;
        self.reported(result)
    }

    /// Next guided step.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] outside guided mode.
    pub async fn next_step(&self) -> Result<View, WidgetError> {
        let result = self.navigate(CaptureStateMachine::next_step).await;
        self.reported(result)
    }

    /// Previous guided step.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] outside guided mode.
    pub async fn previous_step(&self) -> Result<View, WidgetError> {
        let result = self.navigate(CaptureStateMachine::previous_step).await;
        self.reported(result)
    }

    /// Opens a reference of the piece in focus.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] without a piece or for a bad index.
    pub async fn select_reference(&self, reference_index: usize) -> Result<View, WidgetError> {
        let result = self
            .navigate(|flow| flow.select_reference(reference_index))
            .await;
        self.reported(result)
    }

    /// Review "keep".
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] outside the review view.
    pub async fn keep(&self) -> Result<View, WidgetError> {
        let result = self.navigate(CaptureStateMachine::keep).await;
        self.reported(result)
    }

    /// Review "retake": forgets the capture and reframes the reference.
    ///
    /// # Errors
    /// Returns [`WidgetError::Flow`] outside the review view.
    pub async fn retake(&self) -> Result<View, WidgetError> {
        let result = self
            .navigate(|flow| {
                let view = flow.retake()?;
                if let View::Capture(slot) = &view {
                    self.captures.borrow_mut().remove(slot);
                }
                Ok(view)
            })
            .await;
        self.reported(result)
    }

    /// Back navigation.
    ///
    /// # Errors
    /// Returns [`WidgetError::NoManifest`] before a manifest is loaded.
    pub async fn back(&self) -> Result<View, WidgetError> {
        let result = self.navigate(|flow| Ok(flow.back())).await;
        self.reported(result)
    }

    /// Snapshots the reference being framed.
    ///
    /// With auto-confirm the capture is recorded at once; otherwise a preview
    /// is sent and the capture waits for [`PhotoWidget::confirm_capture`].
    ///
    /// # Errors
    /// Returns [`WidgetError::NoCaptureTarget`] outside the capture view and
    /// [`WidgetError::Capture`] when a capture of the slot is already pending
    /// or the frame cannot be encoded.
    pub async fn capture(&self) -> Result<CaptureOutcome, WidgetError> {
        let result = self.capture_frame().await;
        self.reported(result)
    }

    /// Records the previewed capture and advances.
    ///
    /// # Errors
    /// Returns [`WidgetError::NoPendingCapture`] without a preview.
    pub async fn confirm_capture(&self) -> Result<CaptureOutcome, WidgetError> {
        let result = self.confirm_pending().await;
        self.reported(result)
    }

    /// Drops the previewed capture.
    ///
    /// # Errors
    /// Returns [`WidgetError::NoPendingCapture`] without a preview.
    pub fn discard_capture(&self) -> Result<(), WidgetError> {
        if !self.discard_pending() {
            return Err(WidgetError::NoPendingCapture);
        }
        self.render();
        Ok(())
    }

    /// Switches between front and rear cameras.
    ///
    /// # Errors
    /// Returns [`WidgetError::Camera`] when the switch failed and the previous
    /// camera could not be restored.
    pub async fn switch_camera(&self) -> Result<SwitchOutcome, WidgetError> {
        let result = self.camera.toggle().await.map_err(WidgetError::from);
        if let Ok(SwitchOutcome::Reverted { requested, active }) = &result {
            self.view.toast(&Toast::new(
                ToastLevel::Warning,
                format!("The {requested} camera is unavailable; staying on {active}."),
            ));
        }
        if !self.wants_camera() {
            self.camera.release();
        }
        self.overlay.borrow_mut().invalidate();
        self.relayout();
        self.render();
        self.reported(result)
    }

    /// Feeds an opacity slider event and applies the result immediately.
    pub fn pointer_opacity(&self, phase: PointerPhase, client_y: f64) -> Option<Opacity> {
        let opacity = self.overlay.borrow_mut().pointer(phase, client_y);
        if let Some(opacity) = opacity {
            self.view.apply_opacity(opacity);
        }
        opacity
    }

    /// Sets the ghost opacity directly.
    pub fn set_opacity(&self, opacity: Opacity) {
        self.overlay.borrow_mut().set_opacity(opacity);
        self.view.apply_opacity(opacity);
    }

    /// Updates the slider extent after a resize.
    pub fn set_slider_track(&self, track: SliderTrack) {
        self.overlay.borrow_mut().set_track(track);
    }

    /// Toggles the rule-of-thirds grid.
    pub fn toggle_grid(&self) -> GuideOptions {
        self.overlay.borrow_mut().toggle_grid();
        self.relayout();
        self.guides()
    }

    /// Toggles the horizon guide.
    pub fn toggle_horizon(&self) -> GuideOptions {
        self.overlay.borrow_mut().toggle_horizon();
        self.relayout();
        self.guides()
    }

    /// Recomputes the video render box and redraws guides when it changed.
    /// Returns `true` when guides were drawn.
    pub fn layout(&self, intrinsic: (u32, u32), container: (f64, f64)) -> bool {
        let render_box = RenderBox::contain(intrinsic, container);
        self.render_box.set(Some(render_box));
        self.relayout()
    }

    /// Current view, once a manifest is loaded.
    pub fn current_view(&self) -> Option<View> {
        self.flow.borrow().as_ref().map(|flow| flow.view().clone())
    }

    /// Navigation state snapshot.
    pub fn navigation(&self) -> Option<NavigationState> {
        self.flow.borrow().as_ref().map(|flow| flow.state().clone())
    }

    /// Active manifest.
    pub fn manifest(&self) -> Option<ReferenceManifest> {
        self.flow
            .borrow()
            .as_ref()
            .map(|flow| flow.manifest().clone())
    }

    /// Returns `true` once a manifest is active.
    pub fn has_manifest(&self) -> bool {
        self.flow.borrow().is_some()
    }

    /// Confirmed capture still held for `slot`.
    pub fn captured(&self, slot: &SlotKey) -> Option<CapturedPhoto> {
        self.captures.borrow().get(slot).cloned()
    }

    /// Last presented view model.
    pub fn presented(&self) -> Option<ViewModel> {
        self.presenter.current()
    }

    /// Camera negotiator.
    pub fn camera(&self) -> &CameraNegotiator {
        &self.camera
    }

    /// Pinned parent origin.
    pub fn pinned_origin(&self) -> Option<String> {
        self.bridge.pinned_origin()
    }

    /// Token holder snapshot.
    pub fn tokens(&self) -> TokenStore {
        self.tokens.borrow().clone()
    }

    /// Ghost opacity.
    pub fn opacity(&self) -> Opacity {
        self.overlay.borrow().opacity()
    }

    /// Guide options.
    pub fn guides(&self) -> GuideOptions {
        self.overlay.borrow().guides()
    }

    /// Reference shown as the ghost.
    pub fn ghost_reference(&self) -> Option<String> {
        self.overlay.borrow().reference_url().map(str::to_string)
    }

    async fn load_from_source(&self) {
        let result = self.load_initial().await;
        let _ = self.reported(result);
    }

    async fn load_initial(&self) -> Result<(), WidgetError> {
        let token = self.tokens.borrow().current().cloned();
        let outcome = match self.params.manifest_source() {
            ManifestSourceSpec::Url(url) => self
                .loader
                .load(&url, token.as_ref())
                .await
                .map_err(|source| manifest_failure(ErrorCode::RefLoadFailed, source))?,
            ManifestSourceSpec::File(file) => {
                let url = self.config.resolve_data_file(&file).map_err(|error| {
                    manifest_failure(
                        ErrorCode::RefLoadFailed,
                        ManifestError::InvalidEndpoint(error.to_string()),
                    )
                })?;
                self.loader
                    .load(&url, token.as_ref())
                    .await
                    .map_err(|source| manifest_failure(ErrorCode::RefLoadFailed, source))?
            }
            ManifestSourceSpec::Parent => {
                let Some(rapport_id) = self.params.rapport_id.as_deref().filter(|_| self.params.auto_load)
                else {
                    return Ok(());
                };
                let base = self.config.api.base_for(self.params.env).map_err(|error| {
                    manifest_failure(
                        ErrorCode::RapportLoadFailed,
                        ManifestError::InvalidEndpoint(error.to_string()),
                    )
                })?;
                self.loader
                    .load_rapport(
                        &base,
                        rapport_id,
                        self.params.logement_id.as_deref(),
                        token.as_ref(),
                    )
                    .await
                    .map_err(|source| manifest_failure(ErrorCode::RapportLoadFailed, source))?
            }
        };

        if let LoadOutcome::Loaded(manifest) = outcome {
            self.apply_manifest(manifest).await;
        }
        Ok(())
    }

    async fn request_data_after_grace(&self) {
        if self.has_manifest() {
            return;
        }
        self.timer.sleep(self.config.data_request_grace()).await;
        if self.has_manifest() {
            return;
        }

        tracing::info!(stage = "widget", action = "data_request");
        self.send(OutboundMessage::DataRequest(DataRequestPayload {
            rapport_id: self.params.rapport_id.clone(),
            logement_id: self.params.logement_id.clone(),
        }));
    }

    async fn apply_manifest(&self, manifest: ReferenceManifest) {
        tracing::info!(
            stage = "widget",
            action = "manifest_applied",
            rapport_id = manifest.rapport_id(),
            pieces = manifest.pieces().len()
        );
        self.discard_pending();
        {
            let mut flow = self.flow.borrow_mut();
            let machine = match flow.take() {
                Some(mut machine) => {
                    machine.replace_manifest(manifest);
                    machine
                }
                None => CaptureStateMachine::new(manifest),
            };
            self.captures
                .borrow_mut()
                .retain(|slot, _| machine.manifest().contains_slot(slot));
            *flow = Some(machine);
        }
        self.overlay.borrow_mut().invalidate();
        self.settle().await;
    }

    async fn navigate<F>(&self, step: F) -> Result<View, WidgetError>
    where
        F: FnOnce(&mut CaptureStateMachine) -> Result<View, FlowError>,
    {
        let (previous_piece, view) = self.transition(step)?;
        self.discard_pending();
        self.finish_transition(previous_piece, &view).await;
        Ok(view)
    }

    /// Runs one state machine step; returns the piece in focus before it.
    fn transition<F>(&self, step: F) -> Result<(Option<String>, View), WidgetError>
    where
        F: FnOnce(&mut CaptureStateMachine) -> Result<View, FlowError>,
    {
        let mut flow = self.flow.borrow_mut();
        let machine = flow.as_mut().ok_or(WidgetError::NoManifest)?;
        let previous_piece = machine.view().piece_id().map(str::to_string);
        let view = step(machine)?;
        tracing::debug!(stage = "widget", action = "navigate", view = ?view);
        Ok((previous_piece, view))
    }

    async fn finish_transition(&self, previous_piece: Option<String>, view: &View) {
        if let Some(piece_id) = view.piece_id()
            && previous_piece.as_deref() != Some(piece_id)
        {
            self.announce_piece(piece_id);
        }
        self.overlay.borrow_mut().invalidate();
        self.settle().await;
    }

    fn announce_piece(&self, piece_id: &str) {
        let nom = self
            .flow
            .borrow()
            .as_ref()
            .and_then(|flow| flow.manifest().piece(piece_id).map(|piece| piece.nom().to_string()));
        if let Some(nom) = nom {
            self.send(OutboundMessage::PieceSelected(PieceSelectedPayload {
                piece_id: piece_id.to_string(),
                nom,
            }));
        }
    }

    /// Aligns camera and ghost with the current view, then renders.
    async fn settle(&self) {
        let view = self.current_view();
        let reference = match &view {
            Some(View::Capture(slot)) => self.reference_url(slot),
            _ => None,
        };
        if self.overlay.borrow_mut().set_reference(reference.as_deref()) {
            self.overlay.borrow_mut().invalidate();
        }

        let framing = matches!(view, Some(View::Capture(_)));
        match view {
            Some(View::Capture(_)) if !self.camera.is_active() && !self.camera.is_busy() => {
                self.render();
                let facing = self.camera.facing_mode();
                if let Err(error) = self.camera.acquire(facing).await {
                    self.report(&error.into());
                }
                if !self.wants_camera() {
                    self.camera.release();
                }
                self.overlay.borrow_mut().invalidate();
            }
            Some(View::Capture(_) | View::Review(_)) => {}
            _ => self.camera.release(),
        }

        self.render();
        if framing {
            self.remeasure();
        }
        self.relayout();
    }

    /// Refreshes the render box from the page; the stage may have been
    /// hidden or rotated since the last layout event.
    fn remeasure(&self) {
        if let Some(stage) = self.view.measure_stage() {
            self.render_box
                .set(Some(RenderBox::contain(stage.intrinsic, stage.container)));
        }
    }

    fn wants_camera(&self) -> bool {
        matches!(
            self.current_view(),
            Some(View::Capture(_) | View::Review(_))
        )
    }

    fn reference_url(&self, slot: &SlotKey) -> Option<String> {
        self.flow.borrow().as_ref().and_then(|flow| {
            flow.manifest()
                .reference(slot)
                .map(|photo| photo.url().to_string())
        })
    }

    fn relayout(&self) -> bool {
        match self.render_box.get() {
            Some(render_box) if !render_box.is_empty() => self
                .overlay
                .borrow_mut()
                .layout(render_box, self.guides.as_ref()),
            _ => false,
        }
    }

    fn render(&self) -> bool {
        let model = {
            let flow = self.flow.borrow();
            match flow.as_ref() {
                None => ViewModel::Loading,
                Some(machine) => {
                    let captures = self.captures.borrow();
                    let pending = self.pending.borrow();
                    let context = ViewContext {
                        captures: &captures,
                        pending: pending
                            .as_ref()
                            .map(|pending| (&pending.slot, pending.photo.data_url.as_str())),
                        can_switch_camera: self.camera.status().has_multiple_cameras,
                    };
                    build_view_model(machine, &context)
                }
            }
        };
        self.presenter.present(model)
    }

    async fn capture_frame(&self) -> Result<CaptureOutcome, WidgetError> {
        let Some(View::Capture(slot)) = self.current_view() else {
            return Err(WidgetError::NoCaptureTarget);
        };
        self.gate.try_begin(&slot)?;

        let taken_at_ms = self.clock.now_ms();
        let photo = match self.encoder.capture(
            self.frames.as_ref(),
            self.orientation.as_ref(),
            taken_at_ms,
        ) {
            Ok(photo) => photo,
            Err(error) => {
                self.gate.finish(&slot);
                return Err(error.into());
            }
        };

        if self.config.auto_confirm {
            *self.pending.borrow_mut() = Some(PendingCapture { slot, photo });
            return self.confirm_pending().await;
        }

        self.send(OutboundMessage::CapturePreview(CapturePreviewPayload {
            piece_id: slot.piece_id.clone(),
            reference_index: slot.reference_index,
            data_url: photo.data_url.clone(),
            meta: photo.meta,
        }));
        *self.pending.borrow_mut() = Some(PendingCapture {
            slot: slot.clone(),
            photo,
        });
        self.render();
        Ok(CaptureOutcome::AwaitingConfirmation(slot))
    }

    async fn confirm_pending(&self) -> Result<CaptureOutcome, WidgetError> {
        let pending = self.pending.borrow_mut().take();
        let Some(PendingCapture { slot, photo }) = pending else {
            return Err(WidgetError::NoPendingCapture);
        };
        self.gate.finish(&slot);

        let taken_at = format_taken_at(photo.taken_at_ms)?;
        let capture_id = Uuid::new_v4().to_string();
        let (previous_piece, view) = self.transition(|flow| flow.record_capture(&slot))?;

        tracing::info!(stage = "widget", action = "capture_confirmed", slot = %slot, capture_id = %capture_id);
        self.send(OutboundMessage::CaptureConfirmed(CaptureConfirmedPayload {
            piece_id: slot.piece_id.clone(),
            reference_index: slot.reference_index,
            capture_id: capture_id.clone(),
            taken_at,
            data_url: photo.data_url.clone(),
            meta: photo.meta,
        }));
        self.captures.borrow_mut().insert(slot.clone(), photo);

        self.finish_transition(previous_piece, &view).await;
        Ok(CaptureOutcome::Confirmed {
            slot,
            capture_id,
            view,
        })
    }

    /// Drops the pending capture, if any. Returns `true` when one existed.
    fn discard_pending(&self) -> bool {
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some(pending) => {
                self.gate.finish(&pending.slot);
                tracing::debug!(stage = "widget", action = "capture_discarded", slot = %pending.slot);
                true
            }
            None => false,
        }
    }

    fn send(&self, message: OutboundMessage) {
        let kind = message.kind();
        if let Err(error) = self.bridge.send(message) {
            tracing::warn!(stage = "bridge", action = "post_failed", kind, error = %error);
        }
    }

    fn reported<T>(&self, result: Result<T, WidgetError>) -> Result<T, WidgetError> {
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    /// Sends `photo.error` and a toast for reportable failures; logs the rest.
    fn report(&self, error: &WidgetError) {
        let message = redact_sensitive(&error.to_string());
        let Some(code) = error.code() else {
            tracing::warn!(stage = "widget", action = "rejected", "{message}");
            return;
        };

        tracing::error!(stage = "widget", action = "report", code = %code, "{message}");
        self.send(OutboundMessage::error(code, message, self.error_context(error)));
        self.view
            .toast(&Toast::new(ToastLevel::Error, user_message(code)));
    }

    fn error_context(&self, error: &WidgetError) -> Value {
        let mut context = json!({});
        if let Some(View::Capture(slot) | View::Review(slot)) = self.current_view() {
            context["pieceId"] = json!(slot.piece_id);
            context["referenceIndex"] = json!(slot.reference_index);
        }
        if let WidgetError::Camera(CameraError::Denied { target, attempts }) = error {
            context["facingMode"] = json!(target.as_str());
            context["attempts"] = attempts
                .iter()
                .map(|failure| {
                    json!({
                        "strategy": failure.strategy.name(),
                        "error": failure.error.to_string(),
                    })
                })
                .collect();
        }
        if let Some(rapport_id) = &self.params.rapport_id {
            context["rapportId"] = json!(rapport_id);
        }
        context
    }
}

fn manifest_failure(code: ErrorCode, source: ManifestError) -> WidgetError {
    WidgetError::Manifest { code, source }
}

fn user_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::RefLoadFailed => "Reference photos could not be loaded.",
        ErrorCode::CameraDenied => "The camera could not be started. Check camera permissions.",
        ErrorCode::NoCamerasDetected => "No camera was found on this device.",
        ErrorCode::CameraSwitchFailed => "The camera could not be switched.",
        ErrorCode::CaptureFailed => "The photo could not be taken. Please try again.",
        ErrorCode::RapportLoadFailed => "The report could not be loaded.",
    }
}
