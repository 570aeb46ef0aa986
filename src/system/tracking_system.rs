//! Tracking system - main entry point and tick orchestration.
//!
//! The `TrackingSystem` is the top-level struct that users interact with. It
//! owns the inertial sampler, the selected pose backend(s), the fusion
//! engine, and the state machine, and drives them as three cooperative
//! periodic activities on a shared clock: inertial sampling (highest
//! frequency), visual frame submission, and fusion/state evaluation. No
//! activity blocks another; the only hard blocking wait in the whole system
//! is the backend initialization timeout inside the provider.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::bridge::TrackingStats;
use crate::config::TrackingConfig;
use crate::error::{ErrorKind, Result, TrackingError};
use crate::imu::{CalibrationProfile, ImuDriver, InertialSampler, SensorSample};
use crate::pose::fusion::FusionState;
use crate::pose::{FusionEngine, Pose, SourceState};
use crate::source::remote::RemoteOutcome;
use crate::source::{BackendKind, BackendProvider, FallbackController, FrameInput, FrameOutcome, PoseSource};
use crate::state::{StateAction, StateEvent, TrackingState, TrackingStateMachine, Transition};
use crate::system::clock::Clock;
use crate::system::events::{EventBus, TrackingEvent};
use crate::system::scheduler::{TaskId, TickScheduler};

/// Top-level visual-inertial tracking system.
pub struct TrackingSystem {
    config: TrackingConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    machine: TrackingStateMachine,
    sampler: InertialSampler,
    fusion: FusionEngine,
    scheduler: TickScheduler,
    sampler_task: TaskId,
    frame_task: TaskId,
    fusion_task: TaskId,

    /// Active backend; state input while it is the primary.
    primary: Option<PoseSource>,
    /// Second concurrent backend in hybrid mode.
    secondary: Option<PoseSource>,
    active: Option<BackendKind>,

    /// Latest externally submitted frame, consumed by the frame tick.
    pending_frame: Option<FrameInput>,
    /// Timestamp of the last inertial batch handed to a remote backend;
    /// samples up to and including this instant have been transmitted.
    last_imu_send: f64,
    running: bool,
}

impl TrackingSystem {
    pub fn new(config: TrackingConfig, driver: Box<dyn ImuDriver>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let mut scheduler = TickScheduler::new();
        let sampler_task = scheduler.add("inertial_sampling", config.sampler.rate_hz, now);
        let frame_task = scheduler.add("frame_submission", config.frame_rate_hz, now);
        let fusion_task = scheduler.add("fusion_evaluation", config.fusion.rate_hz, now);

        let sampler = InertialSampler::new(driver, config.sampler.clone());
        let fusion = FusionEngine::new(
            config.fusion.clone(),
            config.sampler.rate_hz,
            config.frame_rate_hz,
        );
        let machine = TrackingStateMachine::new(config.recovery.clone());

        Self {
            config,
            clock,
            events: EventBus::new(),
            machine,
            sampler,
            fusion,
            scheduler,
            sampler_task,
            frame_task,
            fusion_task,
            primary: None,
            secondary: None,
            active: None,
            pending_frame: None,
            last_imu_send: now,
            running: false,
        }
    }

    /// Subscribe to the external event surface. Subscribers receive events
    /// in subscription order.
    pub fn subscribe(&mut self) -> Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> TrackingState {
        self.machine.state()
    }

    /// Identity of the active backend, if initialized.
    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active
    }

    pub fn fusion_snapshot(&self) -> FusionState {
        self.fusion.snapshot()
    }

    pub fn tracking_quality(&self) -> f64 {
        self.fusion.tracking_quality(self.clock.now())
    }

    pub fn stats(&self) -> Option<TrackingStats> {
        self.primary.as_ref().map(|s| s.stats())
    }

    /// Latest pose straight from the active backend, bypassing fusion.
    pub fn current_pose(&self) -> Result<Option<Pose>> {
        match self.primary.as_ref() {
            Some(source) => source.current_pose(),
            None => Ok(None),
        }
    }

    /// Fused poses no older than `max_age_s`, oldest first.
    pub fn pose_history(&self, max_age_s: f64) -> Vec<Pose> {
        self.fusion.history_since(self.clock.now(), max_age_s)
    }

    /// Serialize the active backend's map to a byte buffer.
    pub fn save_map(&mut self) -> Result<Vec<u8>> {
        let source = self
            .primary
            .as_mut()
            .ok_or_else(|| TrackingError::MapIo("no active pose source".into()))?;
        source.save_map()
    }

    /// Restore a previously saved map on the active backend.
    pub fn load_map(&mut self, buffer: &[u8]) -> Result<()> {
        let source = self
            .primary
            .as_mut()
            .ok_or_else(|| TrackingError::MapIo("no active pose source".into()))?;
        source.load_map(buffer)
    }

    /// Persist the active backend's map to a filesystem path.
    pub fn save_map_to_file(&mut self, path: &str) -> Result<()> {
        let source = self
            .primary
            .as_mut()
            .ok_or_else(|| TrackingError::MapIo("no active pose source".into()))?;
        source.save_map_to_file(path)
    }

    /// Restore a map from a filesystem path on the active backend.
    pub fn load_map_from_file(&mut self, path: &str) -> Result<()> {
        let source = self
            .primary
            .as_mut()
            .ok_or_else(|| TrackingError::MapIo("no active pose source".into()))?;
        source.load_map_from_file(path)
    }

    /// Start the system: verify sensors, select a backend (with fallback),
    /// and begin ticking.
    ///
    /// Exhausted fallback and missing mandatory sensors are fatal: the state
    /// machine lands in `Failed` and the error is both published and
    /// returned.
    pub fn initialize(&mut self, provider: &mut dyn BackendProvider) -> Result<()> {
        let transition = self.machine.handle(StateEvent::InitializeRequested);
        self.apply_transition(transition);

        if let Err(err) = self.sampler.start() {
            self.fail(&err);
            return Err(err);
        }

        let controller = FallbackController::new(
            self.config.preference,
            self.config.platform,
            self.config.init_timeout_s,
        );
        let selection = match controller.initialize(provider) {
            Ok(selection) => selection,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        let active = selection.active();
        tracing::info!(backend = active.as_str(), "tracking system initialized");
        self.active = Some(active);
        self.primary = Some(selection.primary);
        self.secondary = selection.secondary;
        self.running = true;

        let transition = self.machine.handle(StateEvent::BackendReady);
        self.apply_transition(transition);
        Ok(())
    }

    /// Hand the system a camera frame. The latest frame wins; the frame tick
    /// consumes it at the configured (possibly adapted) rate.
    pub fn submit_frame(&mut self, image: Vec<u8>, width: i32, height: i32, timestamp: f64) {
        self.pending_frame = Some(FrameInput {
            image,
            width,
            height,
            timestamp,
        });
    }

    /// Begin a stationary calibration window.
    pub fn start_calibration(&mut self, duration_s: f64) {
        let now = self.clock.now();
        self.sampler.start_calibration(duration_s, now);
    }

    /// Replace the active calibration profile wholesale.
    pub fn set_calibration_profile(&mut self, profile: CalibrationProfile) {
        self.sampler.set_profile(profile);
    }

    /// Feed the externally reported network-quality signal; scales IMU and
    /// visual transmission rates (with floors) and the fusion weight.
    pub fn report_network_quality(&mut self, quality: f64) {
        let rates = self.fusion.adapt_to_network_quality(quality);
        self.scheduler.set_rate(self.frame_task, rates.visual_rate_hz);
    }

    /// Run all periodic activities that are due. Non-blocking; call this
    /// from the host loop at at least the sampling rate.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }
        let now = self.clock.now();
        for task in self.scheduler.due(now) {
            if task == self.sampler_task {
                self.sampler_tick(now);
            } else if task == self.frame_task {
                self.frame_tick(now);
            } else if task == self.fusion_task {
                self.fusion_tick(now);
            }
        }
    }

    /// Explicit reset: the only exit from `Failed`. Resets the backend, the
    /// fusion state, and the state machine.
    pub fn reset(&mut self) {
        if let Some(source) = self.primary.as_mut() {
            if let Err(err) = source.reset() {
                self.events.error(err.kind(), err.to_string());
            }
        }
        self.fusion.clear();
        self.pending_frame = None;
        let transition = self.machine.handle(StateEvent::ResetRequested);
        self.apply_transition(transition);
        self.running = self.primary.is_some();
    }

    /// Stop tracking: cancel in-flight remote requests (their responses are
    /// never surfaced), detach all event subscriptions, and release the
    /// native handle deterministically.
    pub fn shutdown(&mut self) {
        self.running = false;
        if let Some(mut source) = self.primary.take() {
            source.stop();
        }
        if let Some(mut source) = self.secondary.take() {
            source.stop();
        }
        self.active = None;
        self.events.clear();
        tracing::info!("tracking system shut down");
    }

    fn sampler_tick(&mut self, now: f64) {
        match self.sampler.sample(now) {
            Ok(tick) => {
                if let Some(profile) = tick.calibration_complete {
                    self.events
                        .publish(TrackingEvent::CalibrationComplete(profile));
                }
            }
            Err(err) => {
                // Sensor-layer problems are recovered locally and surfaced
                // as informational events only.
                self.events.error(err.kind(), err.to_string());
                return;
            }
        }

        // IMU-rate transmission path for remote backends, at the (possibly
        // network-adapted) inertial rate.
        let imu_interval = 1.0 / self.fusion.rates().imu_rate_hz;
        if self.has_remote_source() && now - self.last_imu_send >= imu_interval {
            // Strictly-newer bound: the sample stamped at the previous send
            // time already went out in that batch.
            let batch = self.sampler.after(self.last_imu_send);
            let mut failures: Vec<TrackingError> = Vec::new();
            for source in self
                .primary
                .iter_mut()
                .chain(self.secondary.iter_mut())
            {
                if let PoseSource::Remote(remote) = source {
                    if let Err(err) = remote.submit_imu_batch(now, &batch) {
                        failures.push(err);
                    }
                }
            }
            self.last_imu_send = now;
            for err in failures {
                self.events.error(err.kind(), err.to_string());
            }
        }
    }

    fn has_remote_source(&self) -> bool {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .any(|s| s.kind() == BackendKind::Remote)
    }

    fn frame_tick(&mut self, now: f64) {
        let Some(frame) = self.pending_frame.take() else {
            return;
        };
        let batch = if self.has_remote_source() {
            self.sampler.after(self.last_imu_send)
        } else {
            Vec::new()
        };

        let mut results = Vec::new();
        let mut sent_imu = false;
        if let Some(source) = self.primary.as_mut() {
            if source.kind() == BackendKind::Remote {
                sent_imu = true;
            }
            results.push((true, source.process_frame(&frame, &batch)));
        }
        if let Some(source) = self.secondary.as_mut() {
            if source.kind() == BackendKind::Remote {
                sent_imu = true;
            }
            results.push((false, source.process_frame(&frame, &batch)));
        }
        if sent_imu {
            self.last_imu_send = now;
        }

        for (is_primary, result) in results {
            self.handle_frame_result(is_primary, result);
        }
    }

    fn handle_frame_result(&mut self, is_primary: bool, result: Result<FrameOutcome>) {
        match result {
            Ok(FrameOutcome::Tracked(pose)) => {
                self.fusion.update_visual(pose);
                if is_primary {
                    let transition = self.machine.handle(StateEvent::PoseTracked);
                    self.apply_transition(transition);
                }
            }
            Ok(FrameOutcome::TrackingLost) => {
                if is_primary {
                    let event = if self.machine.state() == TrackingState::Relocalizing {
                        StateEvent::RelocalizationFailed
                    } else {
                        StateEvent::TrackingLostReported
                    };
                    let transition = self.machine.handle(event);
                    self.apply_transition(transition);
                }
            }
            Ok(FrameOutcome::NoPose) => {}
            Err(err) => self.handle_error(err),
        }
    }

    fn fusion_tick(&mut self, now: f64) {
        // Drain asynchronously arrived remote results first. Only the
        // primary backend drives the state machine; a secondary (hybrid)
        // source contributes to fusion silently.
        let mut outcomes = Vec::new();
        if let Some(source) = self.primary.as_mut() {
            let drives_state = source.kind() == BackendKind::Remote;
            for outcome in source.poll(now) {
                outcomes.push((drives_state, outcome));
            }
        }
        if let Some(source) = self.secondary.as_mut() {
            for outcome in source.poll(now) {
                outcomes.push((false, outcome));
            }
        }

        for (drives_state, outcome) in outcomes {
            match outcome {
                RemoteOutcome::Pose(pose, source_state) => {
                    self.fusion.update_inertial(pose, source_state, now);
                    if drives_state {
                        let event = if source_state.is_usable() {
                            Some(StateEvent::PoseTracked)
                        } else if source_state == SourceState::Lost {
                            Some(if self.machine.state() == TrackingState::Relocalizing {
                                StateEvent::RelocalizationFailed
                            } else {
                                StateEvent::TrackingLostReported
                            })
                        } else {
                            None
                        };
                        if let Some(event) = event {
                            let transition = self.machine.handle(event);
                            self.apply_transition(transition);
                        }
                    }
                }
                // Network faults are transmission errors, not tracking
                // errors: no pose update, state unchanged.
                RemoteOutcome::Failure(message) => {
                    self.events.error(ErrorKind::TransmissionError, message);
                }
            }
        }

        // While relocalizing on the native backend, poll the recovery result.
        if self.machine.state() == TrackingState::Relocalizing {
            if let Some(PoseSource::Native(tracker)) = self.primary.as_ref() {
                match tracker.relocalization_result() {
                    Ok(Some(pose)) => {
                        self.fusion.update_visual(pose);
                        let transition = self.machine.handle(StateEvent::RelocalizationSucceeded);
                        self.apply_transition(transition);
                    }
                    Ok(None) => {}
                    Err(err) => self.handle_error(err),
                }
            }
        }

        if let Some(fused) = self.fusion.evaluate(now) {
            self.events.publish(TrackingEvent::PoseUpdated(fused));
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        if let Some(next) = transition.changed {
            self.events.publish(TrackingEvent::StateChanged(next));
        }
        for action in transition.actions {
            match action {
                StateAction::IssueRelocalization => {
                    if let Some(source) = self.primary.as_mut() {
                        if let Err(err) = source.request_relocalization() {
                            self.events.error(err.kind(), err.to_string());
                        }
                    }
                }
                StateAction::EmitWarning(kind, message) => {
                    self.events.error(kind, message);
                }
            }
        }
    }

    fn handle_error(&mut self, err: TrackingError) {
        self.events.error(err.kind(), err.to_string());
        if err.is_fatal() {
            let transition = self.machine.handle(StateEvent::FatalError);
            self.apply_transition(transition);
            // Fatal conditions tear the sources down; a later reset builds
            // anew.
            if let Some(mut source) = self.primary.take() {
                source.stop();
            }
            if let Some(mut source) = self.secondary.take() {
                source.stop();
            }
            self.running = false;
        }
    }

    fn fail(&mut self, err: &TrackingError) {
        self.events.error(err.kind(), err.to_string());
        let transition = self.machine.handle(StateEvent::FatalError);
        self.apply_transition(transition);
    }
}

/// Convenience accessor mirroring the sampler's bounded-history queries.
impl TrackingSystem {
    pub fn recent_samples(&self, n: usize) -> Vec<SensorSample> {
        self.sampler.last_n(n)
    }

    pub fn samples_since(&self, timestamp: f64) -> Vec<SensorSample> {
        self.sampler.since(timestamp)
    }
}
