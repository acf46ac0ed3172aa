//! Camera negotiation: warm-up, strategy chain, switching.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::strategy::{
    AcquisitionStrategy, DEFAULT_STRATEGY_CHAIN, StrategyError, StrategyFailure, classify_label,
    first_success,
};
use crate::{
    CameraError, FacingConstraint, FacingMode, MediaDeviceInfo, MediaDevices, MediaError,
    MediaStreamHandle, Platform, ResolutionHint, Timer, TrackSettings, VideoConstraints,
    VideoSink, with_timeout,
};

/// Negotiation tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatorConfig {
    /// Upper bound for one media call.
    pub attempt_timeout: Duration,
    /// Pause after stopping a stream before the switch probe.
    pub switch_settle: Duration,
    /// Pause between the two warm-up requests, when the platform needs one.
    pub warmup_settle: Option<Duration>,
    /// Resolution hint for the first two strategies.
    pub resolution: ResolutionHint,
    /// Strategy order.
    pub strategies: Vec<AcquisitionStrategy>,
}

impl NegotiatorConfig {
    /// Defaults for a platform.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            warmup_settle: platform
                .needs_warmup_settle()
                .then_some(Duration::from_millis(500)),
            ..Self::default()
        }
    }
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(8),
            switch_settle: Duration::from_millis(300),
            warmup_settle: None,
            resolution: ResolutionHint {
                width: 1920,
                height: 1080,
            },
            strategies: DEFAULT_STRATEGY_CHAIN.to_vec(),
        }
    }
}

/// Result of a switch request that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Now streaming from the requested camera.
    Switched(FacingMode),
    /// Requested camera was already active.
    Unchanged(FacingMode),
    /// Requested camera failed; the previous one was restored.
    Reverted {
        /// Camera that failed.
        requested: FacingMode,
        /// Camera streaming again.
        active: FacingMode,
    },
    /// Another switch was in flight; this request will be applied after it
    /// unless a later request supersedes it.
    Deferred(FacingMode),
}

/// Snapshot of the camera session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraStatus {
    /// Selected facing mode.
    pub facing_mode: FacingMode,
    /// Settings of the active stream, if any.
    pub active_settings: Option<TrackSettings>,
    /// Cameras seen at the last enumeration.
    pub available_cameras: Vec<MediaDeviceInfo>,
    /// More than one camera is available.
    pub has_multiple_cameras: bool,
}

struct CameraSession {
    facing_mode: FacingMode,
    active_stream: Option<Box<dyn MediaStreamHandle>>,
    available_cameras: Vec<MediaDeviceInfo>,
    has_multiple_cameras: bool,
}

/// Owns the single active camera stream.
///
/// All methods take `&self`: the widget shares the negotiator between event
/// handlers on one thread, and no `RefCell` borrow is held across an await.
pub struct CameraNegotiator {
    devices: Rc<dyn MediaDevices>,
    timer: Rc<dyn Timer>,
    config: NegotiatorConfig,
    session: RefCell<CameraSession>,
    sink: RefCell<Option<Rc<dyn VideoSink>>>,
    warmed_up: Cell<bool>,
    in_flight: Cell<bool>,
    pending_switch: Cell<Option<FacingMode>>,
}

impl CameraNegotiator {
    /// Creates an idle negotiator targeting the rear camera.
    pub fn new(
        devices: Rc<dyn MediaDevices>,
        timer: Rc<dyn Timer>,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            devices,
            timer,
            config,
            session: RefCell::new(CameraSession {
                facing_mode: FacingMode::Environment,
                active_stream: None,
                available_cameras: Vec::new(),
                has_multiple_cameras: false,
            }),
            sink: RefCell::new(None),
            warmed_up: Cell::new(false),
            in_flight: Cell::new(false),
            pending_switch: Cell::new(None),
        }
    }

    /// Sets the video element new streams are bound to.
    pub fn attach_sink(&self, sink: Rc<dyn VideoSink>) {
        *self.sink.borrow_mut() = Some(sink);
    }

    /// Current session snapshot.
    pub fn status(&self) -> CameraStatus {
        let session = self.session.borrow();
        CameraStatus {
            facing_mode: session.facing_mode,
            active_settings: session.active_stream.as_ref().map(|stream| stream.settings()),
            available_cameras: session.available_cameras.clone(),
            has_multiple_cameras: session.has_multiple_cameras,
        }
    }

    /// Selected facing mode.
    pub fn facing_mode(&self) -> FacingMode {
        self.session.borrow().facing_mode
    }

    /// Settings of the active stream.
    pub fn active_settings(&self) -> Option<TrackSettings> {
        self.session
            .borrow()
            .active_stream
            .as_ref()
            .map(|stream| stream.settings())
    }

    /// Returns `true` while a stream is held.
    pub fn is_active(&self) -> bool {
        self.session.borrow().active_stream.is_some()
    }

    /// Returns `true` while an acquisition or switch runs.
    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    /// Stops the active stream and detaches the sink.
    pub fn release(&self) {
        let stream = self.session.borrow_mut().active_stream.take();
        if let Some(stream) = stream {
            stream.stop();
            tracing::info!(stage = "camera", action = "release", stream = stream.id());
        }
        if let Some(sink) = self.sink.borrow().clone() {
            sink.unbind();
        }
    }

    /// Acquires a stream for `target` through the strategy chain.
    ///
    /// # Errors
    /// Returns [`CameraError::Busy`] while another acquisition or switch runs,
    /// [`CameraError::NoCamerasDetected`] when no camera exists, and
    /// [`CameraError::Denied`] when every strategy failed.
    pub async fn acquire(&self, target: FacingMode) -> Result<CameraStatus, CameraError> {
        if self.in_flight.replace(true) {
            return Err(CameraError::Busy);
        }

        let result = match self.acquire_unguarded(target).await {
            Ok(()) => self.apply_pending().await.map(|_| ()),
            Err(error) => Err(error),
        };
        self.pending_switch.set(None);
        self.in_flight.set(false);
        result.map(|()| self.status())
    }

    /// Switches to `target`.
    ///
    /// Requests arriving while a switch runs are coalesced: the last one is
    /// applied once the running switch finishes.
    ///
    /// # Errors
    /// Returns [`CameraError::SwitchFailed`] when the target failed and the
    /// previous camera could not be restarted either.
    pub async fn switch_to(&self, target: FacingMode) -> Result<SwitchOutcome, CameraError> {
        if self.in_flight.replace(true) {
            self.pending_switch.set(Some(target));
            tracing::info!(stage = "camera", action = "switch_deferred", target = %target);
            return Ok(SwitchOutcome::Deferred(target));
        }

        let result = match self.switch_once(target).await {
            Ok(first) => self
                .apply_pending()
                .await
                .map(|later| later.unwrap_or(first)),
            Err(error) => Err(error),
        };
        self.pending_switch.set(None);
        self.in_flight.set(false);
        result
    }

    /// Switches to the other camera.
    ///
    /// # Errors
    /// Same as [`CameraNegotiator::switch_to`].
    pub async fn toggle(&self) -> Result<SwitchOutcome, CameraError> {
        let target = match self.pending_switch.get() {
            Some(pending) if self.in_flight.get() => pending.opposite(),
            _ => self.facing_mode().opposite(),
        };
        self.switch_to(target).await
    }

    /// Applies switch requests that arrived while this one ran, last wins.
    async fn apply_pending(&self) -> Result<Option<SwitchOutcome>, CameraError> {
        let mut last = None;
        while let Some(next) = self.pending_switch.take() {
            if next == self.facing_mode() && self.is_active() {
                continue;
            }
            last = Some(self.switch_once(next).await?);
        }
        Ok(last)
    }

    async fn acquire_unguarded(&self, target: FacingMode) -> Result<(), CameraError> {
        self.release();
        self.warm_up().await;
        self.session.borrow_mut().facing_mode = target;

        let stream = self.run_chain(target).await?;
        self.install(target, stream).await;
        Ok(())
    }

    async fn switch_once(&self, target: FacingMode) -> Result<SwitchOutcome, CameraError> {
        let previous = self.facing_mode();
        if previous == target && self.is_active() {
            return Ok(SwitchOutcome::Unchanged(target));
        }

        tracing::info!(stage = "camera", action = "switch_begin", from = %previous, to = %target);
        self.release();
        self.timer.sleep(self.config.switch_settle).await;
        self.probe(target).await;
        self.session.borrow_mut().facing_mode = target;

        match self.run_chain(target).await {
            Ok(stream) => {
                self.install(target, stream).await;
                tracing::info!(stage = "camera", action = "switch_done", facing = %target);
                Ok(SwitchOutcome::Switched(target))
            }
            Err(error) => {
                tracing::warn!(
                    stage = "camera",
                    action = "switch_failed",
                    target = %target,
                    error = %error,
                    "reverting to previous camera"
                );
                self.session.borrow_mut().facing_mode = previous;

                match self.run_chain(previous).await {
                    Ok(stream) => {
                        self.install(previous, stream).await;
                        Ok(SwitchOutcome::Reverted {
                            requested: target,
                            active: previous,
                        })
                    }
                    Err(revert) => {
                        tracing::error!(
                            stage = "camera",
                            action = "revert_failed",
                            previous = %previous,
                            error = %revert
                        );
                        Err(CameraError::SwitchFailed {
                            requested: target,
                            previous,
                            revert: Box::new(revert),
                        })
                    }
                }
            }
        }
    }

    /// One-time request of both cameras so enumeration returns real labels.
    async fn warm_up(&self) {
        if self.warmed_up.replace(true) {
            return;
        }

        for (index, facing) in [FacingMode::Environment, FacingMode::User]
            .into_iter()
            .enumerate()
        {
            if index > 0
                && let Some(settle) = self.config.warmup_settle
            {
                self.timer.sleep(settle).await;
            }
            let constraints = VideoConstraints::facing(FacingConstraint::Plain(facing));
            match with_timeout(
                self.timer.as_ref(),
                self.config.attempt_timeout,
                self.devices.get_user_media(&constraints),
            )
            .await
            {
                Ok(stream) => stream.stop(),
                Err(error) => tracing::debug!(
                    stage = "camera",
                    action = "warm_up_skipped",
                    facing = %facing,
                    error = %error
                ),
            }
        }
    }

    /// Requests `target` once and stops it, forcing fresh permission/labels.
    async fn probe(&self, target: FacingMode) {
        let constraints = VideoConstraints::facing(FacingConstraint::Plain(target));
        match with_timeout(
            self.timer.as_ref(),
            self.config.attempt_timeout,
            self.devices.get_user_media(&constraints),
        )
        .await
        {
            Ok(stream) => stream.stop(),
            Err(error) => tracing::debug!(
                stage = "camera",
                action = "probe_failed",
                target = %target,
                error = %error
            ),
        }
    }

    async fn run_chain(
        &self,
        target: FacingMode,
    ) -> Result<Box<dyn MediaStreamHandle>, CameraError> {
        let last = self.config.strategies.len().saturating_sub(1);
        let outcome = first_success(
            self.config.strategies.iter().copied().enumerate(),
            move |(index, strategy)| self.attempt(strategy, target, index == last),
        )
        .await;

        match outcome {
            Ok(stream) => Ok(stream),
            Err(failures) => {
                let attempts: Vec<StrategyFailure> = failures
                    .into_iter()
                    .map(|((_, strategy), error)| StrategyFailure { strategy, error })
                    .collect();
                Err(self.exhausted(target, attempts).await)
            }
        }
    }

    async fn attempt(
        &self,
        strategy: AcquisitionStrategy,
        target: FacingMode,
        last_resort: bool,
    ) -> Result<Box<dyn MediaStreamHandle>, StrategyError> {
        let constraints = match strategy {
            AcquisitionStrategy::IdealFacing => {
                VideoConstraints::facing(FacingConstraint::Ideal(target))
                    .with_resolution(self.config.resolution)
            }
            AcquisitionStrategy::PlainFacing => {
                VideoConstraints::facing(FacingConstraint::Plain(target))
                    .with_resolution(self.config.resolution)
            }
            AcquisitionStrategy::DeviceLabel => {
                let devices = self.enumerate().await?;
                let device = devices
                    .iter()
                    .filter(|device| device.is_video_input())
                    .find(|device| classify_label(&device.label) == Some(target))
                    .ok_or(StrategyError::NoMatchingDevice(target))?;
                VideoConstraints::device(device.device_id.clone())
            }
            AcquisitionStrategy::BareFacing => {
                VideoConstraints::facing(FacingConstraint::Plain(target))
            }
        };

        let result = with_timeout(
            self.timer.as_ref(),
            self.config.attempt_timeout,
            self.devices.get_user_media(&constraints),
        )
        .await;

        let stream = match result {
            Ok(stream) => stream,
            Err(error) => {
                tracing::debug!(
                    stage = "camera",
                    action = "strategy_failed",
                    strategy = %strategy,
                    target = %target,
                    error = %error
                );
                return Err(error.into());
            }
        };

        if !last_resort
            && let Some(actual) = stream.settings().facing_mode
            && actual != target
        {
            // Never hold two camera handles: drop the wrong one first.
            stream.stop();
            tracing::debug!(
                stage = "camera",
                action = "wrong_camera",
                strategy = %strategy,
                expected = %target,
                actual = %actual
            );
            return Err(StrategyError::WrongCamera {
                expected: target,
                actual,
            });
        }

        tracing::info!(
            stage = "camera",
            action = "strategy_succeeded",
            strategy = %strategy,
            target = %target,
            stream = stream.id()
        );
        Ok(stream)
    }

    async fn enumerate(&self) -> Result<Vec<MediaDeviceInfo>, MediaError> {
        with_timeout(
            self.timer.as_ref(),
            self.config.attempt_timeout,
            self.devices.enumerate_devices(),
        )
        .await
    }

    async fn exhausted(&self, target: FacingMode, attempts: Vec<StrategyFailure>) -> CameraError {
        let cameras = self
            .enumerate()
            .await
            .map(|devices| devices.iter().filter(|device| device.is_video_input()).count());

        tracing::warn!(
            stage = "camera",
            action = "chain_exhausted",
            target = %target,
            attempts = attempts.len()
        );

        if cameras == Ok(0) {
            CameraError::NoCamerasDetected
        } else {
            CameraError::Denied { target, attempts }
        }
    }

    async fn install(&self, facing: FacingMode, stream: Box<dyn MediaStreamHandle>) {
        let cameras = match self.enumerate().await {
            Ok(devices) => Some(
                devices
                    .into_iter()
                    .filter(MediaDeviceInfo::is_video_input)
                    .collect::<Vec<_>>(),
            ),
            Err(error) => {
                tracing::debug!(stage = "camera", action = "enumerate_failed", error = %error);
                None
            }
        };

        let previous = self.session.borrow_mut().active_stream.take();
        if let Some(previous) = previous {
            previous.stop();
        }

        if let Some(sink) = self.sink.borrow().clone() {
            sink.bind(stream.as_ref());
        }

        let mut session = self.session.borrow_mut();
        session.facing_mode = facing;
        if let Some(cameras) = cameras {
            session.has_multiple_cameras = cameras.len() > 1;
            session.available_cameras = cameras;
        }
        session.active_stream = Some(stream);
    }
}

impl Drop for CameraNegotiator {
    fn drop(&mut self) {
        if let Some(stream) = self.session.get_mut().active_stream.take() {
            stream.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for acquisition, strategy fallback and switching.

    use futures::executor::block_on;

    use super::*;
    use crate::synthetic::{
        Fault, RecordingSink, SyntheticCamera, SyntheticMediaDevices, SyntheticTimer,
    };
    use crate::{ConstraintShape, Platform};

    fn negotiator(
        devices: &Rc<SyntheticMediaDevices>,
        timer: &Rc<SyntheticTimer>,
        config: NegotiatorConfig,
    ) -> CameraNegotiator {
        CameraNegotiator::new(devices.clone(), timer.clone(), config)
    }

    #[test]
    fn acquires_rear_camera_after_warm_up() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let sink = Rc::new(RecordingSink::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        camera.attach_sink(sink.clone());

        let status = block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        assert_eq!(status.facing_mode, FacingMode::Environment);
        assert!(status.has_multiple_cameras);
        assert_eq!(status.available_cameras[0].label, "Back Camera");
        assert_eq!(
            devices.request_shapes(),
            vec![
                ConstraintShape::BareFacing,
                ConstraintShape::BareFacing,
                ConstraintShape::IdealFacing,
            ]
        );
        assert_eq!(devices.streams().live(), 1);
        assert_eq!(devices.streams().peak(), 1);
        assert!(sink.current().is_some());
    }

    #[test]
    fn falls_back_to_device_label_when_facing_constraints_misbehave() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        devices.fail_when(
            Some(ConstraintShape::IdealFacing),
            None,
            Fault::Reject(MediaError::Overconstrained("facingMode".to_string())),
        );
        devices.fail_when(Some(ConstraintShape::PlainFacing), None, Fault::WrongCamera);
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());

        let status = block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        let settings = status.active_settings.expect("active stream");
        assert_eq!(settings.facing_mode, Some(FacingMode::Environment));
        assert_eq!(settings.device_id.as_deref(), Some("cam-rear"));
        assert_eq!(
            devices.request_shapes()[2..],
            [
                ConstraintShape::IdealFacing,
                ConstraintShape::PlainFacing,
                ConstraintShape::DeviceId,
            ]
        );
        // The wrong-camera stream was stopped before the next attempt.
        assert_eq!(devices.streams().live(), 1);
        assert_eq!(devices.streams().peak(), 1);
    }

    #[test]
    fn hung_attempt_times_out_and_next_strategy_runs() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        devices.fail_when(Some(ConstraintShape::IdealFacing), None, Fault::Hang);
        let timer = Rc::new(SyntheticTimer::default());
        let config = NegotiatorConfig::default();
        let timeout = config.attempt_timeout;
        let camera = negotiator(&devices, &timer, config);

        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        assert!(timer.slept().contains(&timeout));
        assert_eq!(
            devices.request_shapes().last(),
            Some(&ConstraintShape::PlainFacing)
        );
    }

    #[test]
    fn stream_answering_after_timeout_is_stopped_on_arrival() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        devices.fail_when(Some(ConstraintShape::IdealFacing), None, Fault::Late);
        let timer = Rc::new(SyntheticTimer::default());
        let sink = Rc::new(RecordingSink::watching(devices.streams()));
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        camera.attach_sink(sink.clone());

        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");
        assert_eq!(
            devices.request_shapes().last(),
            Some(&ConstraintShape::PlainFacing)
        );

        assert_eq!(devices.deliver_late(), 1);
        let bound = sink.current().expect("plain facing stream bound");
        assert_eq!(devices.streams().live_ids(), vec![bound]);

        camera.release();
        assert_eq!(devices.streams().live(), 0);
    }

    #[test]
    fn last_strategy_accepts_whatever_camera_exists() {
        let devices = Rc::new(SyntheticMediaDevices::new(vec![SyntheticCamera::front()]));
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());

        let status = block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        assert_eq!(
            status.active_settings.and_then(|settings| settings.facing_mode),
            Some(FacingMode::User)
        );
        assert!(!status.has_multiple_cameras);
        assert_eq!(devices.streams().live(), 1);
    }

    #[test]
    fn reports_no_cameras_when_none_enumerated() {
        let devices = Rc::new(SyntheticMediaDevices::new(Vec::new()));
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());

        let error = block_on(camera.acquire(FacingMode::Environment)).expect_err("no camera");

        assert!(matches!(error, CameraError::NoCamerasDetected));
        assert_eq!(error.code(), Some(photo_compare_core::ErrorCode::NoCamerasDetected));
        assert!(!camera.is_busy());
    }

    #[test]
    fn permission_denial_exhausts_every_strategy() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        devices.deny_permission();
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());

        let error = block_on(camera.acquire(FacingMode::Environment)).expect_err("denied");

        match error {
            CameraError::Denied { target, attempts } => {
                assert_eq!(target, FacingMode::Environment);
                assert_eq!(attempts.len(), 4);
                assert_eq!(
                    attempts[2].error,
                    StrategyError::NoMatchingDevice(FacingMode::Environment)
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!camera.is_active());
    }

    #[test]
    fn switch_settles_and_binds_new_stream() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let sink = Rc::new(RecordingSink::watching(devices.streams()));
        let config = NegotiatorConfig::default();
        let settle = config.switch_settle;
        let camera = negotiator(&devices, &timer, config);
        camera.attach_sink(sink.clone());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");
        let first = sink.current();

        let outcome = block_on(camera.toggle()).expect("switch");

        assert_eq!(outcome, SwitchOutcome::Switched(FacingMode::User));
        assert_eq!(camera.facing_mode(), FacingMode::User);
        assert!(timer.slept().contains(&settle));
        assert_ne!(sink.current(), first);
        assert_eq!(devices.streams().live(), 1);
        assert_eq!(devices.streams().peak(), 1);
        assert!(sink.live_at_bind().iter().all(|(_, others)| others.is_empty()));
    }

    #[test]
    fn switching_to_active_camera_is_a_no_op() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");
        let opened = devices.streams().opened();

        let outcome = block_on(camera.switch_to(FacingMode::Environment)).expect("switch");

        assert_eq!(outcome, SwitchOutcome::Unchanged(FacingMode::Environment));
        assert_eq!(devices.streams().opened(), opened);
    }

    #[test]
    fn failed_switch_reverts_to_previous_camera() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");
        devices.fail_when(
            None,
            Some(FacingMode::User),
            Fault::Reject(MediaError::NotReadable("busy".to_string())),
        );

        let outcome = block_on(camera.switch_to(FacingMode::User)).expect("revert");

        assert_eq!(
            outcome,
            SwitchOutcome::Reverted {
                requested: FacingMode::User,
                active: FacingMode::Environment,
            }
        );
        assert_eq!(camera.facing_mode(), FacingMode::Environment);
        assert!(camera.is_active());
        assert_eq!(devices.streams().live(), 1);
    }

    #[test]
    fn failed_revert_surfaces_switch_failure() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");
        devices.fail_when(
            None,
            None,
            Fault::Reject(MediaError::NotReadable("device lost".to_string())),
        );

        let error = block_on(camera.switch_to(FacingMode::User)).expect_err("switch failed");

        assert_eq!(
            error.code(),
            Some(photo_compare_core::ErrorCode::CameraSwitchFailed)
        );
        assert!(!camera.is_active());
        assert!(!camera.is_busy());
        assert_eq!(devices.streams().live(), 0);
    }

    #[test]
    fn concurrent_switches_coalesce_and_never_hold_two_streams() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        let (first, second, third) = block_on(async {
            futures::join!(
                camera.switch_to(FacingMode::User),
                camera.switch_to(FacingMode::Environment),
                camera.switch_to(FacingMode::User),
            )
        });

        assert_eq!(second.expect("deferred"), SwitchOutcome::Deferred(FacingMode::Environment));
        assert_eq!(third.expect("deferred"), SwitchOutcome::Deferred(FacingMode::User));
        assert_eq!(first.expect("switch"), SwitchOutcome::Switched(FacingMode::User));
        assert_eq!(camera.facing_mode(), FacingMode::User);
        assert_eq!(devices.streams().live(), 1);
        assert_eq!(devices.streams().peak(), 1);
        assert!(!camera.is_busy());
    }

    #[test]
    fn second_acquire_while_in_flight_is_busy() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::for_platform(Platform::Ios));

        let (first, second) = block_on(async {
            futures::join!(
                camera.acquire(FacingMode::Environment),
                camera.acquire(FacingMode::User),
            )
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(CameraError::Busy)));
        assert!(timer.slept().contains(&Duration::from_millis(500)));
    }

    #[test]
    fn release_and_drop_stop_the_stream() {
        let devices = Rc::new(SyntheticMediaDevices::phone());
        let timer = Rc::new(SyntheticTimer::default());
        let sink = Rc::new(RecordingSink::default());
        let camera = negotiator(&devices, &timer, NegotiatorConfig::default());
        camera.attach_sink(sink.clone());
        block_on(camera.acquire(FacingMode::Environment)).expect("acquire");

        camera.release();
        assert_eq!(devices.streams().live(), 0);
        assert!(sink.current().is_none());

        block_on(camera.acquire(FacingMode::Environment)).expect("reacquire");
        assert_eq!(devices.streams().live(), 1);
        drop(camera);
        assert_eq!(devices.streams().live(), 0);
    }
}
