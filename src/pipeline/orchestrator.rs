//! Wires the three stages and their shared state into one pipeline.

use crate::error::Result;
use crate::model::VoiceModel;
use crate::pipeline::capture::{CaptureParts, CaptureStage};
use crate::pipeline::clock::Clock;
use crate::pipeline::control::{ClockSync, SessionEvent, StageControl};
use crate::pipeline::frame_buffer::{FrameBufferHandle, frame_buffer};
use crate::pipeline::governor::LatencyGovernor;
use crate::pipeline::latency::SessionSummary;
use crate::pipeline::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::params::ParameterStore;
use crate::pipeline::playback::{PlaybackParts, PlaybackStage};
use crate::pipeline::transform::{
    ModelTransform, PassthroughTransform, TransformParts, TransformStage,
};
use crate::session::config::SessionConfig;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// State every stage and the session controller share.
pub struct PipelineShared {
    pub control: Arc<StageControl>,
    pub params: Arc<ParameterStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub sync: Arc<ClockSync>,
    pub input: FrameBufferHandle,
    pub output: FrameBufferHandle,
    pub events: Receiver<SessionEvent>,
    pub frame_duration: Duration,
}

impl PipelineShared {
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.frame_duration,
            &self.input,
            &self.output,
            &self.params.snapshot(),
        )
    }

    pub fn summary(&self) -> SessionSummary {
        self.metrics.summary(&self.input, &self.output)
    }

    /// Frames still queued in either buffer.
    pub fn in_flight(&self) -> usize {
        self.input.occupancy() + self.output.occupancy()
    }
}

/// Capture → input buffer → transform → output buffer → playback.
///
/// Capture and playback are handed to the audio backend, which calls them
/// from its device callbacks. The transform stage runs on its own thread.
pub struct Pipeline {
    pub capture: CaptureStage,
    pub transform: TransformStage,
    pub playback: PlaybackStage,
    pub shared: PipelineShared,
}

impl Pipeline {
    /// Builds all stages for `config`. The configuration must already be valid.
    ///
    /// Fails if a buffer cannot be created or the model worker cannot spawn.
    pub fn build<M: VoiceModel + 'static>(
        config: &SessionConfig,
        model: M,
        params: Arc<ParameterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (input_tx, input_rx, input) = frame_buffer("input", config.baseline_capacity)?;
        let (output_tx, output_rx, output) = frame_buffer("output", config.baseline_capacity)?;

        let control = Arc::new(StageControl::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let sync = Arc::new(ClockSync::new());
        let (events_tx, events) = crossbeam_channel::unbounded();

        let governor = LatencyGovernor::new(
            config.governor_config(),
            params.clone(),
            input.clone(),
            output.clone(),
            sync.clone(),
            metrics.clone(),
        );

        let model_name = model.name().to_string();
        let model = ModelTransform::new(model, config.model_timeout())?;
        let fallback = PassthroughTransform::new(config.sample_rate);

        let capture = CaptureStage::new(CaptureParts {
            frame_size: config.frame_size,
            sample_rate: config.sample_rate,
            producer: input_tx,
            control: control.clone(),
            sync: sync.clone(),
            clock: clock.clone(),
            metrics: metrics.clone(),
            events: events_tx.clone(),
        });

        let transform = TransformStage::new(
            TransformParts {
                input: input_rx,
                output: output_tx,
                params: params.clone(),
                control: control.clone(),
                governor,
                clock: clock.clone(),
                metrics: metrics.clone(),
                max_consecutive_failures: config.max_consecutive_failures,
                poll_interval: config.poll_interval(),
            },
            Box::new(model),
            Box::new(fallback),
        );

        let playback = PlaybackStage::new(PlaybackParts {
            frame_size: config.frame_size,
            consumer: output_rx,
            control: control.clone(),
            sync: sync.clone(),
            clock,
            metrics: metrics.clone(),
            events: events_tx,
        });

        debug!(
            model = %model_name,
            frame_size = config.frame_size,
            sample_rate = config.sample_rate,
            capacity = config.baseline_capacity,
            "Pipeline built"
        );

        Ok(Self {
            capture,
            transform,
            playback,
            shared: PipelineShared {
                control,
                params,
                metrics,
                sync,
                input,
                output,
                events,
                frame_duration: config.frame_duration(),
            },
        })
    }
}

/// Joins stage threads, giving up after `timeout`.
///
/// Finished threads are joined so panics are logged. Threads still running at
/// the deadline are detached and counted in the return value.
pub fn join_with_deadline(mut threads: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let poll_interval = (timeout / 10).max(Duration::from_millis(1));

    loop {
        let mut remaining = Vec::new();
        for handle in threads.drain(..) {
            if handle.is_finished() {
                if let Err(panic_info) = handle.join() {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    error!(panic = msg, "Pipeline thread panicked");
                }
            } else {
                remaining.push(handle);
            }
        }
        threads = remaining;

        if threads.is_empty() {
            return 0;
        }
        if Instant::now() >= deadline {
            warn!(
                threads = threads.len(),
                "Shutdown timeout, detaching pipeline threads"
            );
            // Dropping the handles detaches the threads.
            return threads.len();
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockVoiceModel;
    use crate::pipeline::clock::MockClock;

    fn config() -> SessionConfig {
        SessionConfig {
            frame_size: 160,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_wires_buffers_at_baseline() {
        let pipeline = Pipeline::build(
            &config(),
            MockVoiceModel::new("mock"),
            Arc::new(ParameterStore::default()),
            Arc::new(MockClock::new()),
        )
        .unwrap();

        assert_eq!(pipeline.shared.input.capacity(), 4);
        assert_eq!(pipeline.shared.output.capacity(), 4);
        assert_eq!(pipeline.shared.frame_duration, Duration::from_millis(10));
        assert_eq!(pipeline.shared.in_flight(), 0);
        assert_eq!(pipeline.capture.frame_size(), 160);
        assert_eq!(pipeline.playback.frame_size(), 160);
    }

    #[test]
    fn test_frames_flow_end_to_end() {
        let clock = MockClock::new();
        let mut pipeline = Pipeline::build(
            &config(),
            MockVoiceModel::new("mock"),
            Arc::new(ParameterStore::default()),
            Arc::new(clock.clone()),
        )
        .unwrap();

        pipeline.capture.on_chunk(&[10; 320]);
        assert_eq!(pipeline.transform.drain_ready(), 2);

        let mut out = vec![0i16; 320];
        pipeline.playback.fill(&mut out);
        assert!(out.iter().all(|&s| s == 1010));

        let summary = pipeline.shared.summary();
        assert_eq!(summary.frames_played, 2);
        assert_eq!(summary.underruns, 0);
    }

    #[test]
    fn test_snapshot_reflects_parameters() {
        let params = Arc::new(ParameterStore::default());
        let pipeline = Pipeline::build(
            &config(),
            MockVoiceModel::new("mock"),
            params.clone(),
            Arc::new(MockClock::new()),
        )
        .unwrap();

        params.set_pitch(-3.0);
        let snapshot = pipeline.shared.snapshot();
        assert_eq!(snapshot.pitch_shift, -3.0);
        assert_eq!(snapshot.capacity, 4);
    }

    #[test]
    fn test_join_with_deadline_joins_finished() {
        let handle = thread::spawn(|| {});
        assert_eq!(join_with_deadline(vec![handle], Duration::from_millis(200)), 0);
    }

    #[test]
    fn test_join_with_deadline_detaches_stuck_thread() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::spawn(move || {
            let _unblocked = rx.recv();
        });
        assert_eq!(join_with_deadline(vec![handle], Duration::from_millis(20)), 1);
        drop(tx);
    }

    #[test]
    fn test_join_with_deadline_survives_panicking_thread() {
        let handle = thread::spawn(|| panic!("stage blew up"));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(join_with_deadline(vec![handle], Duration::from_millis(200)), 0);
    }
}
