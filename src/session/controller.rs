//! Session controller: owns the pipeline lifecycle and routes commands.

use crate::audio::backend::{AudioBackend, StreamGuard};
use crate::error::{Result, VoxError};
use crate::model::VoiceModel;
use crate::pipeline::clock::{Clock, SystemClock};
use crate::pipeline::control::SessionEvent;
use crate::pipeline::latency::SessionSummary;
use crate::pipeline::metrics::MetricsSnapshot;
use crate::pipeline::orchestrator::{Pipeline, PipelineShared, join_with_deadline};
use crate::pipeline::params::{ParameterStore, TransformParameters};
use crate::session::command::{Command, Reply};
use crate::session::config::{self, SessionConfig};
use crate::session::state::{SessionState, Transition};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds the voice model for a session about to start.
pub type ModelFactory = Box<dyn FnMut(&SessionConfig) -> Result<Box<dyn VoiceModel>> + Send>;

/// Stages and streams of a live session.
struct LiveSession {
    shared: PipelineShared,
    playback: Option<Box<dyn StreamGuard>>,
    capture: Option<Box<dyn StreamGuard>>,
    transform: Option<JoinHandle<()>>,
}

/// Owns the session state machine.
///
/// Every state change goes through [`SessionState::transition`]; a rejected
/// command leaves state, stages and parameters untouched.
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    backend: Box<dyn AudioBackend>,
    model_factory: ModelFactory,
    params: Arc<ParameterStore>,
    clock: Arc<dyn Clock>,
    session: Option<LiveSession>,
    last_summary: Option<SessionSummary>,
    last_snapshot: Option<MetricsSnapshot>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        model_factory: ModelFactory,
    ) -> Self {
        let params = Arc::new(ParameterStore::new(config.initial_parameters()));
        Self {
            config,
            state: SessionState::Idle,
            backend,
            model_factory,
            params,
            clock: Arc::new(SystemClock),
            session: None,
            last_summary: None,
            last_snapshot: None,
        }
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn parameters(&self) -> Arc<TransformParameters> {
        self.params.snapshot()
    }

    /// Totals of the most recent stopped session.
    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    /// Runs one command and reports the outcome.
    pub fn execute(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Start => self.start().map(|()| Reply::State(self.state)),
            Command::Pause => self.pause().map(|()| Reply::State(self.state)),
            Command::Resume => self.resume().map(|()| Reply::State(self.state)),
            Command::Stop => self.stop().map(Reply::Stopped),
            Command::Reset => self.reset().map(|()| Reply::State(self.state)),
            Command::SetPitch(value) => self.set_pitch(value).map(|()| Reply::Parameter {
                name: "pitch_shift",
                value,
            }),
            Command::SetFormant(value) => self.set_formant(value).map(|()| Reply::Parameter {
                name: "formant_shift",
                value,
            }),
            Command::SetIntensity(value) => {
                self.set_intensity(value).map(|()| Reply::Parameter {
                    name: "intensity",
                    value,
                })
            }
            Command::QueryMetrics => Ok(Reply::Metrics(self.query_metrics())),
        }
    }

    /// Idle → Running. Validates the configuration, builds the pipeline and
    /// opens both device streams. On any failure the session stays Idle.
    pub fn start(&mut self) -> Result<()> {
        let next = self.state.transition(Transition::Start)?;
        self.config.validate()?;

        let model = (self.model_factory)(&self.config)?;
        // A new session starts on the full model path.
        self.params.set_fallback(false);
        let Pipeline {
            capture,
            transform,
            playback,
            shared,
        } = Pipeline::build(&self.config, model, self.params.clone(), self.clock.clone())?;

        let mut session = LiveSession {
            shared,
            playback: None,
            capture: None,
            transform: None,
        };
        let opened = transform.spawn().and_then(|handle| {
            session.transform = Some(handle);
            session.playback = Some(self.backend.open_playback(playback, &self.config)?);
            session.capture = Some(self.backend.open_capture(capture, &self.config)?);
            Ok(())
        });
        if let Err(e) = opened {
            error!(error = %e, "Failed to start session");
            self.teardown(session);
            return Err(e);
        }

        info!(
            backend = self.backend.name(),
            sample_rate = self.config.sample_rate,
            frame_size = self.config.frame_size,
            "Session started"
        );
        self.session = Some(session);
        self.last_snapshot = None;
        self.enter(next);
        Ok(())
    }

    /// Running → Paused. Stages stay instantiated; parameters are kept.
    pub fn pause(&mut self) -> Result<()> {
        let next = self.state.transition(Transition::Pause)?;
        if let Some(session) = &self.session {
            session.shared.control.pause();
        }
        self.enter(next);
        Ok(())
    }

    /// Paused → Running.
    pub fn resume(&mut self) -> Result<()> {
        let next = self.state.transition(Transition::Resume)?;
        if let Some(session) = &self.session {
            session.shared.control.resume();
        }
        self.enter(next);
        Ok(())
    }

    /// Idle, Running or Paused → Stopping → Stopped. Returns the session totals.
    pub fn stop(&mut self) -> Result<SessionSummary> {
        let stopping = self.state.transition(Transition::Stop)?;
        self.enter(stopping);

        let summary = match self.session.take() {
            Some(session) => self.teardown(session),
            None => SessionSummary::default(),
        };
        self.last_summary = Some(summary.clone());

        let stopped = self.state.transition(Transition::Finish)?;
        self.enter(stopped);
        Ok(summary)
    }

    /// Stopped → Idle, so a new session can start.
    pub fn reset(&mut self) -> Result<()> {
        let next = self.state.transition(Transition::Reset)?;
        self.enter(next);
        Ok(())
    }

    pub fn set_pitch(&mut self, semitones: f32) -> Result<()> {
        self.check_parameter_update("set-pitch")?;
        config::validate_pitch(semitones).map_err(into_parameter_error)?;
        self.params.set_pitch(semitones);
        info!(pitch_shift = semitones, "Pitch shift updated");
        Ok(())
    }

    pub fn set_formant(&mut self, factor: f32) -> Result<()> {
        self.check_parameter_update("set-formant")?;
        config::validate_formant(factor).map_err(into_parameter_error)?;
        self.params.set_formant(factor);
        info!(formant_shift = factor, "Formant shift updated");
        Ok(())
    }

    pub fn set_intensity(&mut self, intensity: f32) -> Result<()> {
        self.check_parameter_update("set-intensity")?;
        config::validate_intensity(intensity).map_err(into_parameter_error)?;
        self.params.set_intensity(intensity);
        info!(intensity, "Intensity updated");
        Ok(())
    }

    /// Current metrics. Without a live pipeline this is the last snapshot of
    /// the previous session, or an empty one.
    pub fn query_metrics(&self) -> MetricsSnapshot {
        let params = self.params.snapshot();
        match (&self.session, &self.last_snapshot) {
            (Some(session), _) => session.shared.snapshot(),
            (None, Some(last)) => MetricsSnapshot {
                pitch_shift: params.pitch_shift,
                formant_shift: params.formant_shift,
                intensity: params.intensity,
                ..last.clone()
            },
            (None, None) => MetricsSnapshot::idle(&params),
        }
    }

    /// Handles events raised by the stages. A device error stops the session
    /// and is returned so the caller can report it.
    pub fn poll_events(&mut self) -> Option<VoxError> {
        let event = self.session.as_ref()?.shared.events.try_recv().ok()?;
        match event {
            SessionEvent::DeviceError { side, message } => {
                warn!(%side, %message, "Device error, stopping session");
                if let Err(e) = self.stop() {
                    error!(error = %e, "Failed to stop session after device error");
                }
                Some(VoxError::AudioDevice {
                    message: format!("{side} device: {message}"),
                })
            }
        }
    }

    fn check_parameter_update(&self, command: &str) -> Result<()> {
        if self.state.allows_parameter_updates() {
            Ok(())
        } else {
            Err(VoxError::InvalidStateTransition {
                from: self.state.to_string(),
                command: command.to_string(),
            })
        }
    }

    fn enter(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
    }

    /// Tears stages down in reverse dependency order: playback, transform,
    /// capture. The transform thread gets the drain budget to finish its
    /// frame; whatever is still queued afterwards is discarded.
    fn teardown(&mut self, mut session: LiveSession) -> SessionSummary {
        session.shared.control.stop();

        if let Some(mut playback) = session.playback.take() {
            playback.close();
            debug!(device = playback.device(), "Playback closed");
        }
        if let Some(handle) = session.transform.take() {
            let detached = join_with_deadline(vec![handle], self.config.drain_timeout());
            if detached > 0 {
                warn!("Transform stage did not finish within the drain timeout");
            }
        }
        if let Some(mut capture) = session.capture.take() {
            capture.close();
            debug!(device = capture.device(), "Capture closed");
        }

        let discarded = session.shared.in_flight();
        if discarded > 0 {
            info!(count = discarded, "Discarded in-flight frames at shutdown");
        }

        self.last_snapshot = Some(session.shared.snapshot());
        session.shared.summary()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.teardown(session);
        }
    }
}

fn into_parameter_error(err: VoxError) -> VoxError {
    match err {
        VoxError::ConfigInvalidValue { key, message } => VoxError::InvalidParameter {
            name: key,
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{SimulatedBackend, SimulatedDriver};
    use crate::model::MockVoiceModel;
    use std::thread;
    use std::time::{Duration, Instant};

    fn mock_factory() -> ModelFactory {
        Box::new(|_config: &SessionConfig| -> Result<Box<dyn VoiceModel>> {
            Ok(Box::new(MockVoiceModel::new("mock")))
        })
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            // Wall-clock budget generous enough for a loaded test machine.
            model_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    fn controller(backend: SimulatedBackend) -> SessionController {
        SessionController::new(test_config(), Box::new(backend), mock_factory())
    }

    fn started() -> (SessionController, SimulatedDriver) {
        let backend = SimulatedBackend::new();
        let driver = backend.driver();
        let mut controller = controller(backend);
        controller.start().unwrap();
        (controller, driver)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_start_opens_streams() {
        let (controller, driver) = started();
        assert_eq!(controller.state(), SessionState::Running);
        assert!(driver.is_capture_open());
        assert!(driver.is_playback_open());
    }

    #[test]
    fn test_invalid_config_keeps_session_idle() {
        let backend = SimulatedBackend::new();
        let driver = backend.driver();
        let config = SessionConfig {
            sample_rate: 1000,
            ..Default::default()
        };
        let mut controller = SessionController::new(config, Box::new(backend), mock_factory());

        let err = controller.start().unwrap_err();
        assert!(err.is_configuration(), "got {err:?}");
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!driver.is_capture_open());
    }

    #[test]
    fn test_device_open_failure_keeps_session_idle() {
        let backend = SimulatedBackend::new().with_capture_failure("no microphone");
        let driver = backend.driver();
        let mut controller = controller(backend);

        let err = controller.start().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!driver.is_playback_open(), "playback must be closed again");
    }

    #[test]
    fn test_model_factory_failure_keeps_session_idle() {
        let factory: ModelFactory = Box::new(|_| {
            Err(VoxError::ModelTransform {
                message: "weights missing".to_string(),
            })
        });
        let mut controller =
            SessionController::new(test_config(), Box::new(SimulatedBackend::new()), factory);
        assert!(controller.start().is_err());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_frames_flow_through_live_session() {
        let (controller, driver) = started();
        assert!(driver.capture(&[5; 320]));
        assert!(wait_for(|| controller.query_metrics().output_occupancy == 1));

        let out = driver.playback(320).unwrap();
        assert!(out.iter().all(|&s| s == 1005));
        assert_eq!(controller.query_metrics().frames_played, 1);
    }

    #[test]
    fn test_pause_twice_is_rejected_without_side_effects() {
        let (mut controller, _driver) = started();
        let before = controller.parameters();

        controller.pause().unwrap();
        let err = controller.pause().unwrap_err();
        assert!(matches!(err, VoxError::InvalidStateTransition { .. }));
        assert_eq!(controller.state(), SessionState::Paused);

        controller.resume().unwrap();
        assert_eq!(controller.state(), SessionState::Running);
        assert_eq!(*controller.parameters(), *before);
    }

    #[test]
    fn test_resume_from_idle_is_rejected() {
        let mut controller = controller(SimulatedBackend::new());
        match controller.resume() {
            Err(VoxError::InvalidStateTransition { from, command }) => {
                assert_eq!(from, "Idle");
                assert_eq!(command, "resume");
            }
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_paused_session_plays_silence() {
        let (mut controller, driver) = started();
        controller.pause().unwrap();
        assert!(driver.capture(&[5; 640]));
        let out = driver.playback(320).unwrap();
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(controller.query_metrics().underruns, 0);
    }

    #[test]
    fn test_parameter_updates_in_running_and_paused_only() {
        let mut controller = controller(SimulatedBackend::new());
        assert!(matches!(
            controller.set_pitch(2.0),
            Err(VoxError::InvalidStateTransition { .. })
        ));

        controller.start().unwrap();
        controller.set_pitch(2.0).unwrap();
        controller.pause().unwrap();
        controller.set_formant(0.8).unwrap();
        controller.set_intensity(0.5).unwrap();

        let params = controller.parameters();
        assert_eq!(params.pitch_shift, 2.0);
        assert_eq!(params.formant_shift, 0.8);
        assert_eq!(params.intensity, 0.5);

        controller.stop().unwrap();
        assert!(controller.set_pitch(1.0).is_err());
        assert_eq!(controller.parameters().pitch_shift, 2.0);
    }

    #[test]
    fn test_out_of_range_parameter_is_rejected() {
        let (mut controller, _driver) = started();
        let version = controller.parameters().version;
        match controller.set_pitch(40.0) {
            Err(VoxError::InvalidParameter { name, .. }) => assert_eq!(name, "pitch_shift"),
            other => panic!("Expected InvalidParameter, got {other:?}"),
        }
        assert_eq!(controller.parameters().version, version);
    }

    #[test]
    fn test_stop_closes_streams_and_summarises() {
        let (mut controller, driver) = started();
        assert!(driver.capture(&[1; 640]));
        assert!(wait_for(|| controller.query_metrics().output_occupancy == 2));
        driver.playback(640).unwrap();

        let summary = controller.stop().unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(summary.frames_played, 2);
        assert!(!driver.is_capture_open());
        assert!(!driver.is_playback_open());
        assert_eq!(controller.last_summary(), Some(&summary));
        assert_eq!(controller.query_metrics().frames_played, 2);
    }

    #[test]
    fn test_stop_from_idle_and_restart_after_reset() {
        let backend = SimulatedBackend::new();
        let driver = backend.driver();
        let mut controller = controller(backend);

        controller.stop().unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(controller.start().is_err());

        controller.reset().unwrap();
        controller.start().unwrap();
        assert!(driver.is_capture_open());
    }

    #[test]
    fn test_device_error_stops_session() {
        let (mut controller, driver) = started();
        assert!(driver.playback_error("headphones unplugged"));

        let err = controller.poll_events().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("playback device: headphones unplugged"));
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(!driver.is_capture_open());
        assert!(controller.poll_events().is_none());
    }

    #[test]
    fn test_execute_routes_commands() {
        let mut controller = controller(SimulatedBackend::new());
        assert_eq!(
            controller.execute(Command::Start).unwrap(),
            Reply::State(SessionState::Running)
        );
        assert_eq!(
            controller.execute(Command::SetFormant(1.5)).unwrap(),
            Reply::Parameter {
                name: "formant_shift",
                value: 1.5
            }
        );
        match controller.execute(Command::QueryMetrics).unwrap() {
            Reply::Metrics(snapshot) => assert_eq!(snapshot.formant_shift, 1.5),
            other => panic!("Expected metrics, got {other:?}"),
        }
        assert!(matches!(
            controller.execute(Command::Stop).unwrap(),
            Reply::Stopped(_)
        ));
        assert!(controller.execute(Command::Resume).is_err());
    }
}
