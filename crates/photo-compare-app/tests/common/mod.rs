//! Shared fixtures for app integration tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use photo_compare_app::view::{StageSize, Toast, ViewModel, WidgetView};
use photo_compare_app::{CaptureOutcome, Clock, PhotoWidget, WidgetDeps};
use photo_compare_bridge::{BridgeError, HostPort, OutboundMessage};
use photo_compare_camera::Platform;
use photo_compare_camera::synthetic::{RecordingSink, SyntheticMediaDevices, SyntheticTimer};
use photo_compare_config::{ApiEndpoints, BearerToken, LaunchParams, WidgetConfig};
use photo_compare_encoder::{FixedOrientation, SyntheticFrameSource};
use photo_compare_manifest::{FetchError, ManifestFetcher};
use photo_compare_overlay::{GuideLine, GuideSurface, Opacity, RenderBox};
use serde_json::{Value, json};
use url::Url;

/// Parent origin used by every fixture.
#[allow(dead_code)]
pub const HOST: &str = "https://host.example.com";

/// Capture timestamp returned by [`FixedClock`] fixtures.
#[allow(dead_code)]
pub const TAKEN_AT_MS: u64 = 1_700_000_000_123;

/// Config with a known parent origin, report API and asset base.
#[allow(dead_code)]
pub fn test_config() -> WidgetConfig {
    WidgetConfig {
        parent_origin: Some(HOST.to_string()),
        api: ApiEndpoints {
            test: Some("https://api.example.test/v1".to_string()),
            live: Some("https://api.example.com/v1".to_string()),
        },
        asset_base: Some("https://assets.example.test/data/".to_string()),
        ..WidgetConfig::default()
    }
}

/// Two pieces: `salon` with three references, `cuisine` with one.
#[allow(dead_code)]
pub fn manifest_json() -> Value {
    json!({
        "logement_id": "log-42",
        "rapport_id": "rap-7",
        "pieces": [
            {
                "piece_id": "salon",
                "nom": "Salon",
                "commentaire_ia": "Parquet en bon état",
                "checkin_pictures": [
                    { "piece_id": "salon", "url": "https://cdn.example.test/salon-0.jpg" },
                    { "piece_id": "salon", "url": "https://cdn.example.test/salon-1.jpg" },
                    { "piece_id": "salon", "url": "https://cdn.example.test/salon-2.jpg" }
                ],
                "etapes": [
                    { "etape_id": "e1", "task_name": "Murs", "consigne": "Photographier chaque mur" }
                ]
            },
            {
                "piece_id": "cuisine",
                "nom": "Cuisine",
                "checkin_pictures": [
                    { "piece_id": "cuisine", "url": "https://cdn.example.test/cuisine-0.jpg" }
                ]
            }
        ]
    })
}

/// Same report after an edit: `salon` lost a reference, `chambre` was added.
#[allow(dead_code)]
pub fn edited_manifest_json() -> Value {
    json!({
        "logement_id": "log-42",
        "rapport_id": "rap-7",
        "pieces": [
            {
                "piece_id": "salon",
                "nom": "Salon",
                "checkin_pictures": [
                    { "url": "https://cdn.example.test/salon-0.jpg" },
                    { "url": "https://cdn.example.test/salon-1.jpg" }
                ]
            },
            {
                "piece_id": "chambre",
                "nom": "Chambre",
                "checkin_pictures": [
                    { "url": "https://cdn.example.test/chambre-0.jpg" }
                ]
            }
        ]
    })
}

/// `photo.data.provide` envelope around `manifest`.
#[allow(dead_code)]
pub fn provide(manifest: Value) -> Value {
    json!({ "type": "photo.data.provide", "payload": manifest })
}

/// Future that is pending on its first poll.
#[allow(dead_code)]
pub struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Fetcher serving canned bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct SyntheticFetcher {
    responses: RefCell<HashMap<String, Result<String, FetchError>>>,
    calls: RefCell<Vec<(String, Option<String>)>>,
    slow: Cell<bool>,
}

#[allow(dead_code)]
impl SyntheticFetcher {
    /// Serves `body` at `url`.
    pub fn serve(&self, url: &str, body: impl Into<String>) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), Ok(body.into()));
    }

    /// Fails requests to `url` with `error`.
    pub fn fail(&self, url: &str, error: FetchError) {
        self.responses.borrow_mut().insert(url.to_string(), Err(error));
    }

    /// Makes every fetch yield once before answering.
    pub fn slow_down(&self) {
        self.slow.set(true);
    }

    /// `(url, bearer token)` of every fetch, in order.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ManifestFetcher for SyntheticFetcher {
    async fn fetch_text(
        &self,
        url: &Url,
        token: Option<&BearerToken>,
    ) -> Result<String, FetchError> {
        self.calls.borrow_mut().push((
            url.to_string(),
            token.map(|token| token.as_str().to_string()),
        ));
        if self.slow.get() {
            YieldOnce(false).await;
        }
        self.responses
            .borrow()
            .get(url.as_str())
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }
}

/// Host port recording `(target origin, message JSON)` pairs.
#[derive(Default)]
pub struct RecordingPort {
    posted: RefCell<Vec<(String, Value)>>,
}

#[allow(dead_code)]
impl RecordingPort {
    /// Every posted message, in order.
    pub fn posted(&self) -> Vec<(String, Value)> {
        self.posted.borrow().clone()
    }

    /// `type` of every posted message, in order.
    pub fn kinds(&self) -> Vec<String> {
        self.posted
            .borrow()
            .iter()
            .filter_map(|(_, message)| message["type"].as_str().map(str::to_string))
            .collect()
    }

    /// Payloads of messages of `kind`.
    pub fn payloads(&self, kind: &str) -> Vec<Value> {
        self.posted
            .borrow()
            .iter()
            .filter(|(_, message)| message["type"] == kind)
            .map(|(_, message)| message["payload"].clone())
            .collect()
    }

    /// Error codes posted through `photo.error`.
    pub fn error_codes(&self) -> Vec<String> {
        self.payloads("photo.error")
            .iter()
            .filter_map(|payload| payload["code"].as_str().map(str::to_string))
            .collect()
    }
}

impl HostPort for RecordingPort {
    fn post(&self, message: &OutboundMessage, target_origin: &str) -> Result<(), BridgeError> {
        let value =
            serde_json::to_value(message).map_err(|error| BridgeError::Post(error.to_string()))?;
        self.posted
            .borrow_mut()
            .push((target_origin.to_string(), value));
        Ok(())
    }
}

/// View recording renders, toasts and opacity updates.
#[derive(Default)]
pub struct RecordingView {
    renders: RefCell<Vec<ViewModel>>,
    toasts: RefCell<Vec<Toast>>,
    opacity: Cell<Option<Opacity>>,
    stage: Cell<Option<StageSize>>,
}

#[allow(dead_code)]
impl RecordingView {
    /// Every rendered model, in order.
    pub fn renders(&self) -> Vec<ViewModel> {
        self.renders.borrow().clone()
    }

    /// Last rendered model.
    pub fn last(&self) -> Option<ViewModel> {
        self.renders.borrow().last().cloned()
    }

    /// Every toast, in order.
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.borrow().clone()
    }

    /// Last opacity applied.
    pub fn opacity(&self) -> Option<Opacity> {
        self.opacity.get()
    }

    /// Geometry reported the next time the widget measures the stage.
    pub fn set_stage(&self, stage: StageSize) {
        self.stage.set(Some(stage));
    }
}

impl WidgetView for RecordingView {
    fn render(&self, model: &ViewModel) {
        self.renders.borrow_mut().push(model.clone());
    }

    fn toast(&self, toast: &Toast) {
        self.toasts.borrow_mut().push(toast.clone());
    }

    fn apply_opacity(&self, opacity: Opacity) {
        self.opacity.set(Some(opacity));
    }

    fn measure_stage(&self) -> Option<StageSize> {
        self.stage.get()
    }
}

/// Guide surface recording draw calls.
#[derive(Default)]
pub struct RecordingGuides {
    boxes: RefCell<Vec<RenderBox>>,
    lines: RefCell<Vec<GuideLine>>,
    clears: Cell<usize>,
}

#[allow(dead_code)]
impl RecordingGuides {
    /// Boxes passed to `resize`.
    pub fn boxes(&self) -> Vec<RenderBox> {
        self.boxes.borrow().clone()
    }

    /// Lines drawn since the last clear.
    pub fn lines(&self) -> Vec<GuideLine> {
        self.lines.borrow().clone()
    }

    /// Number of clears.
    pub fn clears(&self) -> usize {
        self.clears.get()
    }
}

impl GuideSurface for RecordingGuides {
    fn resize(&self, render_box: &RenderBox) {
        self.boxes.borrow_mut().push(*render_box);
    }

    fn clear(&self) {
        self.clears.set(self.clears.get() + 1);
        self.lines.borrow_mut().clear();
    }

    fn draw_line(&self, line: &GuideLine) {
        self.lines.borrow_mut().push(*line);
    }
}

/// Clock frozen at one instant.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

/// Widget wired to synthetic platform services.
#[allow(dead_code)]
pub struct Harness {
    pub widget: PhotoWidget,
    pub devices: Rc<SyntheticMediaDevices>,
    pub timer: Rc<SyntheticTimer>,
    pub fetcher: Rc<SyntheticFetcher>,
    pub port: Rc<RecordingPort>,
    pub view: Rc<RecordingView>,
    pub guides: Rc<RecordingGuides>,
    pub sink: Rc<RecordingSink>,
}

/// Knobs for [`Harness::build`].
pub struct HarnessOptions {
    pub config: WidgetConfig,
    pub query: String,
    pub devices: SyntheticMediaDevices,
    pub frames: SyntheticFrameSource,
    pub angle: i32,
    pub platform: Platform,
    pub fetcher: SyntheticFetcher,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config: test_config(),
            query: String::new(),
            devices: SyntheticMediaDevices::phone(),
            frames: SyntheticFrameSource::new(64, 48),
            angle: 0,
            platform: Platform::Android,
            fetcher: SyntheticFetcher::default(),
        }
    }
}

#[allow(dead_code)]
impl Harness {
    /// Default harness: phone cameras, 64x48 frames, portrait.
    pub fn new() -> Self {
        Self::build(HarnessOptions::default())
    }

    /// Harness from explicit options.
    pub fn build(options: HarnessOptions) -> Self {
        let devices = Rc::new(options.devices);
        let timer = Rc::new(SyntheticTimer::default());
        let fetcher = Rc::new(options.fetcher);
        let port = Rc::new(RecordingPort::default());
        let view = Rc::new(RecordingView::default());
        let guides = Rc::new(RecordingGuides::default());
        let sink = Rc::new(RecordingSink::watching(devices.streams()));

        let params = LaunchParams::from_query(&options.query).expect("fixture query parses");
        let deps = WidgetDeps {
            devices: devices.clone(),
            timer: timer.clone(),
            fetcher: fetcher.clone(),
            port: port.clone(),
            view: view.clone(),
            guides: guides.clone(),
            frames: Rc::new(options.frames),
            orientation: Rc::new(FixedOrientation(options.angle)),
            clock: Rc::new(FixedClock(TAKEN_AT_MS)),
            sink: Some(sink.clone()),
            platform: options.platform,
        };
        let widget = PhotoWidget::new(options.config, params, deps).expect("fixture widget builds");

        Self {
            widget,
            devices,
            timer,
            fetcher,
            port,
            view,
            guides,
            sink,
        }
    }

    /// Harness with [`manifest_json`] already provided by [`HOST`].
    pub fn loaded() -> Self {
        let harness = Self::new();
        harness.provide(manifest_json());
        harness
    }

    /// Delivers `manifest` through `photo.data.provide`.
    pub fn provide(&self, manifest: Value) {
        futures::executor::block_on(self.widget.handle_message(HOST, &provide(manifest)))
            .expect("fixture manifest is accepted");
    }
}

/// Captures the reference being framed and confirms it.
#[allow(dead_code)]
pub async fn shoot(widget: &PhotoWidget) -> CaptureOutcome {
    widget.capture().await.expect("capture succeeds");
    widget.confirm_capture().await.expect("confirm succeeds")
}
