//! Browser bindings: `navigator.mediaDevices`, `fetch`, `postMessage`, the
//! video/canvas frame source and a small DOM view.
//!
//! The host page provides these elements:
//!
//! ```text
//! #pc-root         screen content (rebuilt on every view change)
//! #pc-stage        video + ghost container, shown while framing or reviewing
//! #pc-video        <video playsinline muted>
//! #pc-ghost        <img> reference overlay
//! #pc-guides       <canvas> grid/horizon surface
//! #pc-slider       vertical opacity control
//! #pc-toast        toast line
//! #pc-diagnostics  optional <pre> diagnostic panel
//! ```

use std::any::Any;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use photo_compare_bridge::{BridgeError, HostPort, OutboundMessage};
use photo_compare_camera::{
    ConstraintShape, DeviceKind, FacingConstraint, FacingMode, MediaDeviceInfo, MediaDevices,
    MediaError, MediaStreamHandle, Platform, StreamDelivery, StreamResult, Timer, TrackSettings,
    TrackState, VideoConstraints, VideoSink,
};
use photo_compare_config::{BearerToken, LaunchParams, WidgetConfig};
use photo_compare_encoder::{
    EncodeError, FrameSource, LayeredOrientation, OrientationSignals, RgbaFrame,
};
use photo_compare_manifest::{FetchError, ManifestFetcher};
use photo_compare_overlay::{GuideLine, GuideSurface, Opacity, PointerPhase, RenderBox, SliderTrack};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    CanvasRenderingContext2d, Document, DomException, Element, HtmlCanvasElement, HtmlElement,
    HtmlImageElement, HtmlVideoElement, MediaDeviceKind, MediaStream, MediaStreamConstraints,
    MediaStreamTrack, MediaStreamTrackState, MessageEvent, PointerEvent, Request, RequestInit,
    RequestMode, Response, Window,
};

use crate::diagnostics::DiagnosticLog;
use crate::view::{StageSize, Toast, ViewModel, WidgetView};
use crate::{Clock, PhotoWidget, WidgetDeps, WidgetError};

const CONFIG_GLOBAL: &str = "PHOTO_COMPARE_CONFIG";

/// Widget entry point run when the module loads.
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    let config = web_sys::window().map(|window| read_config(&window));
    let capacity = match &config {
        Some(Ok(config)) => config.diagnostic_capacity,
        _ => WidgetConfig::default().diagnostic_capacity,
    };
    let diagnostics = DiagnosticLog::new(capacity);
    let subscriber = tracing_subscriber::registry()
        .with(tracing_wasm::WASMLayer::new(
            tracing_wasm::WASMLayerConfig::default(),
        ))
        .with(diagnostics.layer());
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        web_sys::console::warn_1(&"photo-compare: tracing already initialised".into());
    }

    let config = match config {
        Some(Ok(config)) => config,
        Some(Err(error)) => {
            tracing::warn!(stage = "web", action = "config_rejected", error = ?error);
            WidgetConfig::default()
        }
        None => WidgetConfig::default(),
    };
    wasm_bindgen_futures::spawn_local(async move {
        match mount(config, diagnostics) {
            Ok(widget) => widget.start().await,
            Err(error) => {
                tracing::error!(stage = "web", action = "mount_failed", error = ?error);
            }
        }
    });
}

fn mount(config: WidgetConfig, diagnostics: DiagnosticLog) -> Result<Rc<PhotoWidget>, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("no document"))?;

    let params = LaunchParams::from_page_url(&window.location().href()?).map_err(js_error)?;
    let platform = Platform::from_user_agent(&window.navigator().user_agent()?);

    let video: HtmlVideoElement = element(&document, "pc-video")?;
    let canvas: HtmlCanvasElement = element(&document, "pc-guides")?;
    let ghost: HtmlImageElement = element(&document, "pc-ghost")?;
    let slider: HtmlElement = element(&document, "pc-slider")?;

    let view = Rc::new(DomView {
        document: document.clone(),
        ghost,
        video: video.clone(),
        diagnostics,
    });
    let deps = WidgetDeps {
        devices: Rc::new(BrowserMediaDevices::new(&window)?),
        timer: Rc::new(BrowserTimer),
        fetcher: Rc::new(BrowserFetcher),
        port: Rc::new(ParentWindowPort::new(&window)?),
        view: view.clone(),
        guides: Rc::new(CanvasGuides::new(canvas)?),
        frames: Rc::new(VideoFrameSource::new(video.clone(), &document)?),
        orientation: Rc::new(LayeredOrientation::new(browser_orientation)),
        clock: Rc::new(BrowserClock),
        sink: Some(Rc::new(VideoElementSink {
            video: video.clone(),
        })),
        platform,
    };

    let widget = Rc::new(PhotoWidget::new(config, params, deps).map_err(js_error)?);
    widget.set_opacity(Opacity::default());
    widget.set_slider_track(slider_track(&slider));

    listen_messages(&window, &widget)?;
    listen_actions(&document, &widget)?;
    listen_slider(&slider, &widget)?;
    listen_layout(&window, &video, &slider, &widget)?;
    Ok(widget)
}

fn read_config(window: &Window) -> Result<WidgetConfig, JsValue> {
    let raw = js_sys::Reflect::get(window, &CONFIG_GLOBAL.into())?;
    if raw.is_undefined() || raw.is_null() {
        return Ok(WidgetConfig::default());
    }
    serde_wasm_bindgen::from_value(raw).map_err(js_error)
}

fn element<T: JsCast>(document: &Document, id: &str) -> Result<T, JsValue> {
    document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("missing #{id}")))?
        .dyn_into::<T>()
        .map_err(|_| JsValue::from_str(&format!("#{id} has the wrong element type")))
}

fn js_error(error: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn listen_messages(window: &Window, widget: &Rc<PhotoWidget>) -> Result<(), JsValue> {
    let widget = widget.clone();
    let callback = Closure::wrap(Box::new(move |event: MessageEvent| {
        let origin = event.origin();
        let Ok(data) = serde_wasm_bindgen::from_value::<serde_json::Value>(event.data()) else {
            return;
        };
        let widget = widget.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let _ = widget.handle_message(&origin, &data).await;
        });
    }) as Box<dyn FnMut(MessageEvent)>);
    window.add_event_listener_with_callback("message", callback.as_ref().unchecked_ref())?;
    callback.forget();
    Ok(())
}

fn listen_actions(document: &Document, widget: &Rc<PhotoWidget>) -> Result<(), JsValue> {
    let widget = widget.clone();
    let callback = Closure::wrap(Box::new(move |event: web_sys::Event| {
        let action = event
            .target()
            .and_then(|target| target.dyn_into::<Element>().ok())
            .and_then(|target| target.closest("[data-action]").ok().flatten())
            .and_then(|target| target.get_attribute("data-action"));
        if let Some(action) = action {
            let widget = widget.clone();
            wasm_bindgen_futures::spawn_local(async move {
                dispatch(&widget, &action).await;
            });
        }
    }) as Box<dyn FnMut(web_sys::Event)>);
    document.add_event_listener_with_callback("click", callback.as_ref().unchecked_ref())?;
    callback.forget();
    Ok(())
}

/// Runs a `data-action` value (`name` or `name:argument`).
async fn dispatch(widget: &PhotoWidget, action: &str) {
    let (name, argument) = action.split_once(':').unwrap_or((action, ""));
    let result: Result<(), WidgetError> = match name {
        "grid" => widget.open_grid().await.map(drop),
        "guided" => widget.start_guided().await.map(drop),
        "reset-guided" => widget.reset_guided().await.map(drop),
        "exit-guided" => widget.exit_guided().await.map(drop),
        "next" => widget.next_step().await.map(drop),
        "previous" => widget.previous_step().await.map(drop),
        "piece" => widget.select_piece(argument).await.map(drop),
        "reference" => match argument.parse::<usize>() {
            Ok(index) => widget.select_reference(index).await.map(drop),
            Err(_) => Ok(()),
        },
        "capture" => widget.capture().await.map(drop),
        "confirm" => widget.confirm_capture().await.map(drop),
        "discard" => widget.discard_capture(),
        "keep" => widget.keep().await.map(drop),
        "retake" => widget.retake().await.map(drop),
        "back" => widget.back().await.map(drop),
        "switch" => widget.switch_camera().await.map(drop),
        "toggle-grid" => {
            widget.toggle_grid();
            Ok(())
        }
        "toggle-horizon" => {
            widget.toggle_horizon();
            Ok(())
        }
        "reload" => widget.reload().await,
        _ => {
            tracing::debug!(stage = "web", action = "unknown_action", name);
            Ok(())
        }
    };
    if let Err(error) = result {
        tracing::debug!(stage = "web", action = "dispatch_failed", name, error = %error);
    }
}

fn listen_slider(slider: &HtmlElement, widget: &Rc<PhotoWidget>) -> Result<(), JsValue> {
    for (event_name, phase) in [
        ("pointerdown", PointerPhase::Down),
        ("pointermove", PointerPhase::Move),
        ("pointerup", PointerPhase::Up),
        ("pointercancel", PointerPhase::Cancel),
    ] {
        let widget = widget.clone();
        let callback = Closure::wrap(Box::new(move |event: PointerEvent| {
            if widget
                .pointer_opacity(phase, f64::from(event.client_y()))
                .is_some()
            {
                event.prevent_default();
            }
        }) as Box<dyn FnMut(PointerEvent)>);
        slider.add_event_listener_with_callback(event_name, callback.as_ref().unchecked_ref())?;
        callback.forget();
    }
    Ok(())
}

fn listen_layout(
    window: &Window,
    video: &HtmlVideoElement,
    slider: &HtmlElement,
    widget: &Rc<PhotoWidget>,
) -> Result<(), JsValue> {
    let relayout = {
        let widget = widget.clone();
        let video = video.clone();
        let slider = slider.clone();
        move || {
            widget.set_slider_track(slider_track(&slider));
            let container = (
                f64::from(video.client_width()),
                f64::from(video.client_height()),
            );
            let _ = widget.layout((video.video_width(), video.video_height()), container);
        }
    };

    for event_name in ["resize", "orientationchange"] {
        let relayout = relayout.clone();
        let callback = Closure::wrap(Box::new(move |_: web_sys::Event| relayout())
            as Box<dyn FnMut(web_sys::Event)>);
        window.add_event_listener_with_callback(event_name, callback.as_ref().unchecked_ref())?;
        callback.forget();
    }

    let callback = Closure::wrap(
        Box::new(move |_: web_sys::Event| relayout()) as Box<dyn FnMut(web_sys::Event)>
    );
    video.add_event_listener_with_callback("loadedmetadata", callback.as_ref().unchecked_ref())?;
    callback.forget();
    Ok(())
}

fn slider_track(slider: &HtmlElement) -> SliderTrack {
    let rect = slider.get_bounding_client_rect();
    SliderTrack {
        top: rect.top(),
        height: rect.height(),
    }
}

fn browser_orientation() -> OrientationSignals {
    let Some(window) = web_sys::window() else {
        return OrientationSignals::default();
    };
    let screen_angle = window
        .screen()
        .ok()
        .and_then(|screen| screen.orientation().angle().ok())
        .map(i32::from);
    let legacy_angle = js_sys::Reflect::get(&window, &"orientation".into())
        .ok()
        .and_then(|value| value.as_f64())
        .map(|angle| angle as i32);
    let viewport = match (window.inner_width(), window.inner_height()) {
        (Ok(width), Ok(height)) => width
            .as_f64()
            .zip(height.as_f64())
            .map(|(width, height)| (width as u32, height as u32)),
        _ => None,
    };
    OrientationSignals {
        screen_angle,
        legacy_angle,
        viewport,
    }
}

/// `navigator.mediaDevices`.
pub struct BrowserMediaDevices {
    media: web_sys::MediaDevices,
}

impl BrowserMediaDevices {
    /// Wraps the window's media devices.
    ///
    /// # Errors
    /// Fails on insecure origins, where `mediaDevices` is missing.
    pub fn new(window: &Window) -> Result<Self, JsValue> {
        Ok(Self {
            media: window.navigator().media_devices()?,
        })
    }
}

fn media_error(error: JsValue) -> MediaError {
    match error.dyn_ref::<DomException>() {
        Some(exception) => MediaError::from_dom_exception(&exception.name(), exception.message()),
        None => MediaError::Other(format!("{error:?}")),
    }
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

fn ideal(value: JsValue) -> JsValue {
    let wrapper = js_sys::Object::new();
    set(&wrapper, "ideal", &value);
    wrapper.into()
}

fn video_constraints(constraints: &VideoConstraints) -> JsValue {
    let video = js_sys::Object::new();
    match constraints.facing {
        Some(FacingConstraint::Ideal(mode)) => {
            set(&video, "facingMode", &ideal(mode.as_str().into()));
        }
        Some(FacingConstraint::Plain(mode)) => set(&video, "facingMode", &mode.as_str().into()),
        None => {}
    }
    if let Some(device_id) = &constraints.device_id {
        let exact = js_sys::Object::new();
        set(&exact, "exact", &device_id.as_str().into());
        set(&video, "deviceId", &exact.into());
    }
    if let Some(hint) = constraints.resolution {
        set(&video, "width", &ideal(hint.width.into()));
        set(&video, "height", &ideal(hint.height.into()));
    }
    if constraints.shape() == ConstraintShape::Unconstrained && constraints.resolution.is_none() {
        return JsValue::TRUE;
    }
    video.into()
}

#[async_trait(?Send)]
impl MediaDevices for BrowserMediaDevices {
    async fn get_user_media(&self, constraints: &VideoConstraints) -> StreamResult {
        let request = MediaStreamConstraints::new();
        request.set_video(&video_constraints(constraints));
        request.set_audio(&JsValue::FALSE);

        let promise = self
            .media
            .get_user_media_with_constraints(&request)
            .map_err(media_error)?;

        // The promise outlives a timed-out caller; the delivery stops what it
        // resolves to once nobody waits.
        let (delivery, pending) = StreamDelivery::channel();
        wasm_bindgen_futures::spawn_local(async move {
            let result = match JsFuture::from(promise).await {
                Ok(value) => match value.dyn_into::<MediaStream>() {
                    Ok(stream) => {
                        let stream: Box<dyn MediaStreamHandle> =
                            Box::new(BrowserStream::new(stream));
                        Ok(stream)
                    }
                    Err(_) => Err(MediaError::Other("getUserMedia returned no stream".to_string())),
                },
                Err(error) => Err(media_error(error)),
            };
            delivery.complete(result);
        });
        pending.await
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError> {
        let promise = self.media.enumerate_devices().map_err(media_error)?;
        let list: js_sys::Array = JsFuture::from(promise)
            .await
            .map_err(media_error)?
            .dyn_into()
            .map_err(|_| MediaError::Other("enumerateDevices returned no list".to_string()))?;

        Ok(list
            .iter()
            .filter_map(|entry| entry.dyn_into::<web_sys::MediaDeviceInfo>().ok())
            .map(|device| MediaDeviceInfo {
                device_id: device.device_id(),
                label: device.label(),
                kind: match device.kind() {
                    MediaDeviceKind::Videoinput => DeviceKind::VideoInput,
                    MediaDeviceKind::Audiooutput => DeviceKind::AudioOutput,
                    _ => DeviceKind::AudioInput,
                },
            })
            .collect())
    }
}

/// Acquired `MediaStream`.
pub struct BrowserStream {
    id: String,
    stream: MediaStream,
}

impl BrowserStream {
    fn new(stream: MediaStream) -> Self {
        Self {
            id: stream.id(),
            stream,
        }
    }

    fn tracks(&self) -> Vec<MediaStreamTrack> {
        self.stream
            .get_tracks()
            .iter()
            .filter_map(|track| track.dyn_into::<MediaStreamTrack>().ok())
            .collect()
    }
}

fn first_video_track(stream: &MediaStream) -> Option<MediaStreamTrack> {
    stream.get_video_tracks().get(0).dyn_into().ok()
}

fn track_settings(track: &MediaStreamTrack) -> TrackSettings {
    let settings = track.get_settings();
    let number = |key: &str| {
        js_sys::Reflect::get(&settings, &key.into())
            .ok()
            .and_then(|value| value.as_f64())
            .map(|value| value as u32)
    };
    let text = |key: &str| {
        js_sys::Reflect::get(&settings, &key.into())
            .ok()
            .and_then(|value| value.as_string())
    };
    TrackSettings {
        facing_mode: text("facingMode").and_then(|mode| FacingMode::parse(&mode)),
        width: number("width"),
        height: number("height"),
        device_id: text("deviceId"),
    }
}

impl MediaStreamHandle for BrowserStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> TrackSettings {
        first_video_track(&self.stream)
            .map(|track| track_settings(&track))
            .unwrap_or_default()
    }

    fn track_states(&self) -> Vec<TrackState> {
        self.tracks()
            .iter()
            .map(|track| match track.ready_state() {
                MediaStreamTrackState::Live => TrackState::Live,
                _ => TrackState::Ended,
            })
            .collect()
    }

    fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `<video>` element sink.
pub struct VideoElementSink {
    video: HtmlVideoElement,
}

impl VideoSink for VideoElementSink {
    fn bind(&self, stream: &dyn MediaStreamHandle) {
        let Some(stream) = stream.as_any().downcast_ref::<BrowserStream>() else {
            return;
        };
        self.video.set_src_object(Some(&stream.stream));
        if let Ok(playing) = self.video.play() {
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(error) = JsFuture::from(playing).await {
                    tracing::warn!(stage = "web", action = "play_failed", error = ?error);
                }
            });
        }
    }

    fn unbind(&self) {
        self.video.set_src_object(None);
    }
}

/// `setTimeout` delays.
pub struct BrowserTimer;

#[async_trait(?Send)]
impl Timer for BrowserTimer {
    async fn sleep(&self, duration: Duration) {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window().map(|window| {
                window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
            });
            if !matches!(scheduled, Some(Ok(_))) {
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        let _ = JsFuture::from(promise).await;
    }
}

/// `Date.now()`.
pub struct BrowserClock;

impl Clock for BrowserClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

/// `fetch` with an optional bearer token.
pub struct BrowserFetcher;

fn fetch_error(error: JsValue) -> FetchError {
    FetchError::Network(format!("{error:?}"))
}

#[async_trait(?Send)]
impl ManifestFetcher for BrowserFetcher {
    async fn fetch_text(
        &self,
        url: &Url,
        token: Option<&BearerToken>,
    ) -> Result<String, FetchError> {
        let window = web_sys::window().ok_or_else(|| FetchError::Network("no window".to_string()))?;

        let init = RequestInit::new();
        init.set_method("GET");
        init.set_mode(RequestMode::Cors);
        let headers = web_sys::Headers::new().map_err(fetch_error)?;
        headers.set("Accept", "application/json").map_err(fetch_error)?;
        if let Some(token) = token {
            headers
                .set("Authorization", &token.authorization_value())
                .map_err(fetch_error)?;
        }
        init.set_headers(&headers);

        let request = Request::new_with_str_and_init(url.as_str(), &init).map_err(fetch_error)?;
        let response: Response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(fetch_error)?
            .dyn_into()
            .map_err(|_| FetchError::Network("fetch returned no response".to_string()))?;
        if !response.ok() {
            return Err(FetchError::Status(response.status()));
        }

        JsFuture::from(response.text().map_err(fetch_error)?)
            .await
            .map_err(fetch_error)?
            .as_string()
            .ok_or_else(|| FetchError::Network("response body is not text".to_string()))
    }
}

/// `window.parent.postMessage`.
pub struct ParentWindowPort {
    parent: Window,
}

impl ParentWindowPort {
    /// Port to the embedding window.
    ///
    /// # Errors
    /// Fails when the parent window is not reachable.
    pub fn new(window: &Window) -> Result<Self, JsValue> {
        let parent = window
            .parent()?
            .ok_or_else(|| JsValue::from_str("no parent window"))?;
        Ok(Self { parent })
    }
}

impl HostPort for ParentWindowPort {
    fn post(&self, message: &OutboundMessage, target_origin: &str) -> Result<(), BridgeError> {
        let value = message
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|error| BridgeError::Post(error.to_string()))?;
        self.parent
            .post_message(&value, target_origin)
            .map_err(|error| BridgeError::Post(format!("{error:?}")))
    }
}

/// Reads frames from the `<video>` element through an offscreen canvas.
pub struct VideoFrameSource {
    video: HtmlVideoElement,
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
}

fn context_2d(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, JsValue> {
    canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("2d context unavailable"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("unexpected context type"))
}

impl VideoFrameSource {
    /// Source over `video`.
    ///
    /// # Errors
    /// Fails when a canvas cannot be created.
    pub fn new(video: HtmlVideoElement, document: &Document) -> Result<Self, JsValue> {
        let canvas: HtmlCanvasElement = document.create_element("canvas")?.dyn_into()?;
        let context = context_2d(&canvas)?;
        Ok(Self {
            video,
            canvas,
            context,
        })
    }
}

impl FrameSource for VideoFrameSource {
    fn track_dimensions(&self) -> Option<(u32, u32)> {
        let stream = self.video.src_object()?;
        let settings = track_settings(&first_video_track(&stream)?);
        settings.width.zip(settings.height)
    }

    fn element_dimensions(&self) -> (u32, u32) {
        (self.video.video_width(), self.video.video_height())
    }

    fn grab(&self, width: u32, height: u32) -> Result<RgbaFrame, EncodeError> {
        let grab_error = |error: JsValue| EncodeError::Grab(format!("{error:?}"));
        self.canvas.set_width(width);
        self.canvas.set_height(height);
        self.context
            .draw_image_with_html_video_element_and_dw_and_dh(
                &self.video,
                0.0,
                0.0,
                f64::from(width),
                f64::from(height),
            )
            .map_err(grab_error)?;
        let image = self
            .context
            .get_image_data(0.0, 0.0, f64::from(width), f64::from(height))
            .map_err(grab_error)?;
        RgbaFrame::new(width, height, image.data().0)
    }
}

/// Guide canvas laid over the video.
pub struct CanvasGuides {
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
}

impl CanvasGuides {
    /// Surface over `canvas`.
    ///
    /// # Errors
    /// Fails when the canvas has no 2d context.
    pub fn new(canvas: HtmlCanvasElement) -> Result<Self, JsValue> {
        let context = context_2d(&canvas)?;
        Ok(Self { canvas, context })
    }
}

impl GuideSurface for CanvasGuides {
    fn resize(&self, render_box: &RenderBox) {
        self.canvas.set_width(render_box.width.round() as u32);
        self.canvas.set_height(render_box.height.round() as u32);
        let style = self.canvas.style();
        let _ = style.set_property("left", &format!("{}px", render_box.x));
        let _ = style.set_property("top", &format!("{}px", render_box.y));
        let _ = style.set_property("width", &format!("{}px", render_box.width));
        let _ = style.set_property("height", &format!("{}px", render_box.height));
    }

    fn clear(&self) {
        self.context.clear_rect(
            0.0,
            0.0,
            f64::from(self.canvas.width()),
            f64::from(self.canvas.height()),
        );
    }

    fn draw_line(&self, line: &GuideLine) {
        self.context.set_stroke_style_str("rgba(255, 255, 255, 0.6)");
        self.context.set_line_width(1.0);
        self.context.begin_path();
        self.context.move_to(line.x1, line.y1);
        self.context.line_to(line.x2, line.y2);
        self.context.stroke();
    }
}

/// Minimal DOM renderer. Text goes through `textContent` only.
pub struct DomView {
    document: Document,
    ghost: HtmlImageElement,
    video: HtmlVideoElement,
    diagnostics: DiagnosticLog,
}

impl DomView {
    fn add(&self, parent: &Element, tag: &str, text: &str) -> Result<Element, JsValue> {
        let node = self.document.create_element(tag)?;
        node.set_text_content(Some(text));
        parent.append_child(&node)?;
        Ok(node)
    }

    fn button(&self, parent: &Element, label: &str, action: &str) -> Result<Element, JsValue> {
        let button = self.add(parent, "button", label)?;
        button.set_attribute("type", "button")?;
        button.set_attribute("data-action", action)?;
        Ok(button)
    }

    fn image(&self, parent: &Element, src: &str, alt: &str) -> Result<(), JsValue> {
        let image = self.document.create_element("img")?;
        image.set_attribute("src", src)?;
        image.set_attribute("alt", alt)?;
        parent.append_child(&image)?;
        Ok(())
    }

    fn draw(&self, model: &ViewModel) -> Result<(), JsValue> {
        let root: Element = element(&self.document, "pc-root")?;
        root.set_text_content(None);
        root.set_attribute("data-view", view_name(model))?;

        let framing = matches!(model, ViewModel::Capture { .. });
        if let Ok(stage) = element::<HtmlElement>(&self.document, "pc-stage") {
            stage
                .style()
                .set_property("display", if framing { "block" } else { "none" })?;
        }

        match model {
            ViewModel::Loading => {
                self.add(&root, "p", "Loading reference photos...")?;
            }
            ViewModel::Home {
                progress,
                interrupted_step,
            } => {
                self.add(&root, "h2", "Photo comparison")?;
                self.add(
                    &root,
                    "p",
                    &format!("{} / {} photos taken", progress.captured, progress.total),
                )?;
                self.button(&root, "Free mode", "grid")?;
                match interrupted_step {
                    Some(_) => self.button(&root, "Restart guided mode", "reset-guided")?,
                    None => self.button(&root, "Guided mode", "guided")?,
                };
            }
            ViewModel::FreeGrid { pieces } => {
                for piece in pieces {
                    self.button(
                        &root,
                        &format!(
                            "{} ({}/{})",
                            piece.nom, piece.progress.captured, piece.progress.total
                        ),
                        &format!("piece:{}", piece.piece_id),
                    )?;
                }
                self.button(&root, "Back", "back")?;
            }
            ViewModel::PhotoList {
                piece,
                references,
                guided,
            } => {
                self.add(&root, "h2", &piece.nom)?;
                if let Some(position) = guided {
                    self.add(
                        &root,
                        "p",
                        &format!("Step {} / {}", position.step + 1, position.total),
                    )?;
                }
                if let Some(comment) = &piece.commentaire_ia {
                    self.add(&root, "p", comment)?;
                }
                for instruction in &piece.instructions {
                    self.add(&root, "p", instruction)?;
                }
                for reference in references {
                    let mark = if reference.captured { " (done)" } else { "" };
                    self.button(
                        &root,
                        &format!("Photo {}{mark}", reference.index + 1),
                        &format!("reference:{}", reference.index),
                    )?;
                }
                if guided.is_some() {
                    self.button(&root, "Previous", "previous")?;
                    self.button(&root, "Next", "next")?;
                }
                self.button(&root, "Back", "back")?;
            }
            ViewModel::Capture {
                piece,
                reference,
                guided,
                can_switch_camera,
                preview,
            } => {
                self.add(
                    &root,
                    "h2",
                    &format!("{} - photo {}", piece.nom, reference.index + 1),
                )?;
                if let Some(position) = guided {
                    self.add(
                        &root,
                        "p",
                        &format!("Step {} / {}", position.step + 1, position.total),
                    )?;
                }
                match preview {
                    Some(data_url) => {
                        self.image(&root, data_url, "Preview")?;
                        self.button(&root, "Use photo", "confirm")?;
                        self.button(&root, "Discard", "discard")?;
                    }
                    None => {
                        self.button(&root, "Take photo", "capture")?;
                        if *can_switch_camera {
                            self.button(&root, "Switch camera", "switch")?;
                        }
                        self.button(&root, "Grid", "toggle-grid")?;
                        self.button(&root, "Horizon", "toggle-horizon")?;
                    }
                }
                self.button(&root, "Back", "back")?;
            }
            ViewModel::Review {
                piece,
                reference,
                captured,
            } => {
                self.add(
                    &root,
                    "h2",
                    &format!("{} - photo {}", piece.nom, reference.index + 1),
                )?;
                self.image(&root, &reference.url, "Reference")?;
                if let Some(data_url) = captured {
                    self.image(&root, data_url, "Capture")?;
                }
                self.button(&root, "Keep", "keep")?;
                self.button(&root, "Retake", "retake")?;
                self.button(&root, "Back", "back")?;
            }
            ViewModel::GuidedComplete { progress } => {
                self.add(&root, "h2", "All pieces captured")?;
                self.add(
                    &root,
                    "p",
                    &format!("{} / {} photos taken", progress.captured, progress.total),
                )?;
                self.button(&root, "Back", "back")?;
                self.button(&root, "Finish", "exit-guided")?;
            }
        }
        Ok(())
    }

    fn refresh_diagnostics(&self) {
        if let Ok(panel) = element::<Element>(&self.document, "pc-diagnostics") {
            panel.set_text_content(Some(&self.diagnostics.lines().join("\n")));
        }
    }
}

fn view_name(model: &ViewModel) -> &'static str {
    match model {
        ViewModel::Loading => "loading",
        ViewModel::Home { .. } => "home",
        ViewModel::FreeGrid { .. } => "free-grid",
        ViewModel::PhotoList { .. } => "photo-list",
        ViewModel::Capture { .. } => "capture",
        ViewModel::Review { .. } => "review",
        ViewModel::GuidedComplete { .. } => "guided-complete",
    }
}

impl WidgetView for DomView {
    fn render(&self, model: &ViewModel) {
        if let ViewModel::Capture { reference, .. } = model {
            self.ghost.set_src(&reference.url);
        }
        if let Err(error) = self.draw(model) {
            tracing::warn!(stage = "web", action = "render_failed", error = ?error);
        }
        self.refresh_diagnostics();
    }

    fn toast(&self, toast: &Toast) {
        if let Ok(line) = element::<Element>(&self.document, "pc-toast") {
            line.set_text_content(Some(&toast.message));
            let _ = line.set_attribute("data-level", &format!("{:?}", toast.level).to_lowercase());
        }
        self.refresh_diagnostics();
    }

    fn apply_opacity(&self, opacity: Opacity) {
        let _ = self
            .ghost
            .style()
            .set_property("opacity", &opacity.css_value().to_string());
    }

    fn measure_stage(&self) -> Option<StageSize> {
        let intrinsic = (self.video.video_width(), self.video.video_height());
        let container = (
            f64::from(self.video.client_width()),
            f64::from(self.video.client_height()),
        );
        // A hidden stage reports a zero box.
        (intrinsic.0 > 0 && intrinsic.1 > 0 && container.0 > 0.0 && container.1 > 0.0)
            .then_some(StageSize {
                intrinsic,
                container,
            })
    }
}
