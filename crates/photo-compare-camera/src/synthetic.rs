//! Deterministic in-memory media backend for tests and the native CLI.
//!
//! [`SyntheticMediaDevices`] behaves like a browser with a configurable set of
//! cameras: labels stay hidden until the first successful request, requests
//! resolve to a camera by device id or facing mode, and fault rules reject,
//! hang, answer late, or hand back the wrong camera for matching requests.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    ConstraintShape, DeviceKind, FacingMode, MediaDeviceInfo, MediaDevices, MediaError,
    MediaStreamHandle, StreamDelivery, StreamResult, Timer, TrackSettings, TrackState,
    VideoConstraints, VideoSink,
};

/// One simulated physical camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCamera {
    /// Device id.
    pub device_id: String,
    /// Label revealed after permission is granted.
    pub label: String,
    /// Facing mode reported by its tracks; `None` for desktop webcams.
    pub facing: Option<FacingMode>,
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
}

impl SyntheticCamera {
    /// Phone rear camera.
    pub fn rear() -> Self {
        Self {
            device_id: "cam-rear".to_string(),
            label: "Back Camera".to_string(),
            facing: Some(FacingMode::Environment),
            width: 1920,
            height: 1080,
        }
    }

    /// Phone front camera.
    pub fn front() -> Self {
        Self {
            device_id: "cam-front".to_string(),
            label: "Front Camera".to_string(),
            facing: Some(FacingMode::User),
            width: 1280,
            height: 720,
        }
    }

    /// Desktop webcam without a facing mode.
    pub fn webcam() -> Self {
        Self {
            device_id: "cam-usb".to_string(),
            label: "USB Video Device".to_string(),
            facing: None,
            width: 640,
            height: 480,
        }
    }
}

/// What a matching request experiences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fails with the given error.
    Reject(MediaError),
    /// Never settles.
    Hang,
    /// Stays pending until [`SyntheticMediaDevices::deliver_late`], then
    /// opens the requested camera, like a permission prompt answered after
    /// the caller gave up.
    Late,
    /// Succeeds with a camera facing the other way.
    WrongCamera,
}

#[derive(Debug, Clone)]
struct FaultRule {
    shape: Option<ConstraintShape>,
    facing: Option<FacingMode>,
    fault: Fault,
}

/// Shared counters of open synthetic streams.
#[derive(Debug, Clone, Default)]
pub struct LiveStreams {
    live: Rc<Cell<usize>>,
    peak: Rc<Cell<usize>>,
    opened: Rc<Cell<usize>>,
    tracks: Rc<RefCell<Vec<(String, Rc<Cell<bool>>)>>>,
}

impl LiveStreams {
    /// Streams opened and not yet stopped.
    pub fn live(&self) -> usize {
        self.live.get()
    }

    /// Highest simultaneous live count observed.
    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    /// Streams opened in total.
    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    /// Ids of the streams still live, in opening order.
    pub fn live_ids(&self) -> Vec<String> {
        self.tracks
            .borrow()
            .iter()
            .filter(|(_, live)| live.get())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn open(&self) -> (String, Rc<Cell<bool>>) {
        let live = self.live.get() + 1;
        self.live.set(live);
        self.peak.set(self.peak.get().max(live));
        self.opened.set(self.opened.get() + 1);

        let id = format!("stream-{}", self.opened.get());
        let state = Rc::new(Cell::new(true));
        self.tracks.borrow_mut().push((id.clone(), state.clone()));
        (id, state)
    }

    fn close(&self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// Simulated `navigator.mediaDevices`.
#[derive(Default)]
pub struct SyntheticMediaDevices {
    cameras: RefCell<Vec<SyntheticCamera>>,
    rules: RefCell<Vec<FaultRule>>,
    denied: Cell<bool>,
    granted: Cell<bool>,
    requests: RefCell<Vec<VideoConstraints>>,
    late: RefCell<Vec<(StreamDelivery, SyntheticCamera)>>,
    streams: LiveStreams,
}

impl SyntheticMediaDevices {
    /// Backend exposing `cameras` in order.
    pub fn new(cameras: Vec<SyntheticCamera>) -> Self {
        Self {
            cameras: RefCell::new(cameras),
            ..Self::default()
        }
    }

    /// Rear plus front phone cameras.
    pub fn phone() -> Self {
        Self::new(vec![SyntheticCamera::rear(), SyntheticCamera::front()])
    }

    /// Makes every request fail with `NotAllowed`.
    pub fn deny_permission(&self) {
        self.denied.set(true);
    }

    /// Adds a fault for requests matching `shape` and `facing` (`None` matches
    /// anything). The first matching rule wins.
    pub fn fail_when(
        &self,
        shape: Option<ConstraintShape>,
        facing: Option<FacingMode>,
        fault: Fault,
    ) {
        self.rules.borrow_mut().push(FaultRule {
            shape,
            facing,
            fault,
        });
    }

    /// Removes every fault rule.
    pub fn clear_faults(&self) {
        self.rules.borrow_mut().clear();
    }

    /// Every constraint set received, in order.
    pub fn requests(&self) -> Vec<VideoConstraints> {
        self.requests.borrow().clone()
    }

    /// Shapes of every request, in order.
    pub fn request_shapes(&self) -> Vec<ConstraintShape> {
        self.requests.borrow().iter().map(VideoConstraints::shape).collect()
    }

    /// Open-stream counters.
    pub fn streams(&self) -> LiveStreams {
        self.streams.clone()
    }

    /// Settles every request held by [`Fault::Late`], opening its camera.
    ///
    /// Returns how many of those streams were stopped on arrival because
    /// their caller had stopped waiting.
    pub fn deliver_late(&self) -> usize {
        let held = std::mem::take(&mut *self.late.borrow_mut());
        let mut stopped = 0;
        for (delivery, camera) in held {
            let stream = self.open(camera);
            if !delivery.complete(Ok(stream)) {
                stopped += 1;
            }
        }
        stopped
    }

    fn requested_facing(&self, constraints: &VideoConstraints) -> Option<FacingMode> {
        match &constraints.device_id {
            Some(device_id) => self
                .cameras
                .borrow()
                .iter()
                .find(|camera| &camera.device_id == device_id)
                .and_then(|camera| camera.facing),
            None => constraints.facing.map(|facing| facing.mode()),
        }
    }

    fn matching_fault(&self, constraints: &VideoConstraints) -> Option<Fault> {
        let shape = constraints.shape();
        let facing = self.requested_facing(constraints);
        self.rules
            .borrow()
            .iter()
            .find(|rule| {
                rule.shape.is_none_or(|wanted| wanted == shape)
                    && rule.facing.is_none_or(|wanted| Some(wanted) == facing)
            })
            .map(|rule| rule.fault.clone())
    }

    fn resolve(&self, constraints: &VideoConstraints) -> Result<SyntheticCamera, MediaError> {
        let cameras = self.cameras.borrow();
        if cameras.is_empty() {
            return Err(MediaError::NotFound("no video input".to_string()));
        }
        if let Some(device_id) = &constraints.device_id {
            return cameras
                .iter()
                .find(|camera| &camera.device_id == device_id)
                .cloned()
                .ok_or_else(|| MediaError::Overconstrained("deviceId".to_string()));
        }
        let wanted = constraints.facing.map(|facing| facing.mode());
        let chosen = wanted
            .and_then(|mode| cameras.iter().find(|camera| camera.facing == Some(mode)))
            .or_else(|| cameras.first());
        chosen
            .cloned()
            .ok_or_else(|| MediaError::NotFound("no video input".to_string()))
    }

    fn wrong_camera(&self, constraints: &VideoConstraints) -> Result<SyntheticCamera, MediaError> {
        let wanted = self.requested_facing(constraints);
        self.cameras
            .borrow()
            .iter()
            .find(|camera| camera.facing.is_some() && camera.facing != wanted)
            .cloned()
            .ok_or_else(|| MediaError::NotFound("no other camera".to_string()))
    }

    fn open(&self, camera: SyntheticCamera) -> Box<dyn MediaStreamHandle> {
        self.granted.set(true);
        let (id, live) = self.streams.open();
        Box::new(SyntheticStream {
            id,
            camera,
            live,
            streams: self.streams.clone(),
        })
    }
}

#[async_trait(?Send)]
impl MediaDevices for SyntheticMediaDevices {
    async fn get_user_media(&self, constraints: &VideoConstraints) -> StreamResult {
        self.requests.borrow_mut().push(constraints.clone());

        if self.denied.get() {
            return Err(MediaError::NotAllowed("permission denied".to_string()));
        }

        let camera = match self.matching_fault(constraints) {
            Some(Fault::Reject(error)) => return Err(error),
            Some(Fault::Hang) => return futures::future::pending::<StreamResult>().await,
            Some(Fault::Late) => {
                let camera = self.resolve(constraints)?;
                let (delivery, pending) = StreamDelivery::channel();
                self.late.borrow_mut().push((delivery, camera));
                return pending.await;
            }
            Some(Fault::WrongCamera) => self.wrong_camera(constraints)?,
            None => self.resolve(constraints)?,
        };
        Ok(self.open(camera))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError> {
        let reveal = self.granted.get();
        Ok(self
            .cameras
            .borrow()
            .iter()
            .map(|camera| MediaDeviceInfo {
                device_id: camera.device_id.clone(),
                label: if reveal {
                    camera.label.clone()
                } else {
                    String::new()
                },
                kind: DeviceKind::VideoInput,
            })
            .collect())
    }
}

/// Stream produced by [`SyntheticMediaDevices`].
///
/// Dropping does not stop it, matching browser streams.
#[derive(Debug)]
pub struct SyntheticStream {
    id: String,
    camera: SyntheticCamera,
    live: Rc<Cell<bool>>,
    streams: LiveStreams,
}

impl SyntheticStream {
    /// Camera backing this stream.
    pub fn camera(&self) -> &SyntheticCamera {
        &self.camera
    }
}

impl MediaStreamHandle for SyntheticStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> TrackSettings {
        TrackSettings {
            facing_mode: self.camera.facing,
            width: Some(self.camera.width),
            height: Some(self.camera.height),
            device_id: Some(self.camera.device_id.clone()),
        }
    }

    fn track_states(&self) -> Vec<TrackState> {
        if self.live.get() {
            vec![TrackState::Live]
        } else {
            vec![TrackState::Ended]
        }
    }

    fn stop(&self) {
        if self.live.replace(false) {
            self.streams.close();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Timer that records requested delays and completes on its second poll.
#[derive(Debug, Default)]
pub struct SyntheticTimer {
    slept: RefCell<Vec<Duration>>,
}

impl SyntheticTimer {
    /// Every requested delay, in order.
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Timer for SyntheticTimer {
    async fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
        YieldOnce(false).await;
    }
}

struct YieldOnce(bool);

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

/// Video sink that remembers what it was bound to.
#[derive(Debug, Default)]
pub struct RecordingSink {
    bound: RefCell<Option<String>>,
    history: RefCell<Vec<String>>,
    unbinds: Cell<usize>,
    watched: Option<LiveStreams>,
    overlaps: RefCell<Vec<(String, Vec<String>)>>,
}

impl RecordingSink {
    /// Sink that also notes which other streams were live at each bind.
    pub fn watching(streams: LiveStreams) -> Self {
        Self {
            watched: Some(streams),
            ..Self::default()
        }
    }

    /// For every bind, the bound stream id and the ids of other streams
    /// still live at that moment. Empty without [`RecordingSink::watching`].
    pub fn live_at_bind(&self) -> Vec<(String, Vec<String>)> {
        self.overlaps.borrow().clone()
    }

    /// Id of the stream currently bound.
    pub fn current(&self) -> Option<String> {
        self.bound.borrow().clone()
    }

    /// Ids of every stream ever bound.
    pub fn history(&self) -> Vec<String> {
        self.history.borrow().clone()
    }

    /// Number of unbind calls.
    pub fn unbinds(&self) -> usize {
        self.unbinds.get()
    }
}

impl VideoSink for RecordingSink {
    fn bind(&self, stream: &dyn MediaStreamHandle) {
        if let Some(streams) = &self.watched {
            let others = streams
                .live_ids()
                .into_iter()
                .filter(|id| id != stream.id())
                .collect();
            self.overlaps
                .borrow_mut()
                .push((stream.id().to_string(), others));
        }
        *self.bound.borrow_mut() = Some(stream.id().to_string());
        self.history.borrow_mut().push(stream.id().to_string());
    }

    fn unbind(&self) {
        self.bound.borrow_mut().take();
        self.unbinds.set(self.unbinds.get() + 1);
    }
}
