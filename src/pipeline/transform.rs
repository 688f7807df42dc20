//! Transform stage: input buffer → model or fallback shifter → output buffer.

use crate::audio::dsp::{self, FormantTilt, PitchShifter};
use crate::error::{Result, VoxError};
use crate::model::{ModelError, VoiceModel, VoiceShift};
use crate::pipeline::clock::Clock;
use crate::pipeline::control::StageControl;
use crate::pipeline::frame::AudioFrame;
use crate::pipeline::frame_buffer::{FrameConsumer, FrameProducer};
use crate::pipeline::governor::LatencyGovernor;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::params::{ParameterStore, TransformParameters};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One way of turning an input frame into an output frame.
pub trait FrameTransform: Send {
    /// Returns a frame with the same sequence number, timestamp and length.
    fn apply(
        &mut self,
        frame: &AudioFrame,
        params: &TransformParameters,
    ) -> std::result::Result<AudioFrame, ModelError>;

    fn name(&self) -> &str;
}

/// Lightweight pitch and formant shift used under fallback. Never fails.
pub struct PassthroughTransform {
    shifter: PitchShifter,
    tilt: FormantTilt,
}

impl PassthroughTransform {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shifter: PitchShifter::new(sample_rate),
            tilt: FormantTilt::new(sample_rate),
        }
    }
}

impl FrameTransform for PassthroughTransform {
    fn apply(
        &mut self,
        frame: &AudioFrame,
        params: &TransformParameters,
    ) -> std::result::Result<AudioFrame, ModelError> {
        let mut samples = dsp::i16_to_f32(frame.samples());
        self.tilt.process(&mut samples, params.formant_shift);
        self.shifter.process(&mut samples, params.pitch_shift);
        Ok(frame.with_samples(dsp::f32_to_i16(&samples)))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

struct ModelJob {
    frame: AudioFrame,
    shift: VoiceShift,
}

struct ModelReply {
    sequence: u64,
    result: std::result::Result<Vec<i16>, ModelError>,
}

/// Runs the voice model on a dedicated thread so a slow or hung call can be
/// abandoned after its time budget.
///
/// At most one job is in flight. While the worker is still busy with an
/// abandoned frame, later frames fail immediately instead of queueing.
struct ModelWorker {
    jobs: Option<Sender<ModelJob>>,
    replies: Receiver<ModelReply>,
    handle: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
}

impl ModelWorker {
    fn spawn<M: VoiceModel + 'static>(mut model: M) -> Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<ModelJob>(1);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<ModelReply>(1);

        let handle = thread::Builder::new()
            .name("voice-model".to_string())
            .spawn(move || {
                for job in job_rx {
                    let result = model.transform(&job.frame, job.shift);
                    let reply = ModelReply {
                        sequence: job.frame.sequence(),
                        result,
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            replies: reply_rx,
            handle: Some(handle),
            in_flight: None,
        })
    }

    fn run(
        &mut self,
        frame: &AudioFrame,
        shift: VoiceShift,
        budget: Duration,
    ) -> std::result::Result<Vec<i16>, ModelError> {
        self.collect_stale();
        if let Some(busy) = self.in_flight {
            debug!(busy, sequence = frame.sequence(), "model still busy with an abandoned frame");
            return Err(timeout_error(budget));
        }

        let jobs = self.jobs.as_ref().ok_or(ModelError::Unavailable)?;
        let job = ModelJob {
            frame: frame.clone(),
            shift,
        };
        jobs.send(job).map_err(|_| ModelError::Unavailable)?;
        self.in_flight = Some(frame.sequence());

        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.sequence == frame.sequence() => {
                    self.in_flight = None;
                    return reply.result;
                }
                Ok(_stale) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(timeout_error(budget)),
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = None;
                    return Err(ModelError::Unavailable);
                }
            }
        }
    }

    /// Drops replies to frames that were already given up on.
    fn collect_stale(&mut self) {
        loop {
            match self.replies.try_recv() {
                Ok(reply) => {
                    if self.in_flight == Some(reply.sequence) {
                        self.in_flight = None;
                    }
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = None;
                    return;
                }
            }
        }
    }
}

impl Drop for ModelWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        self.collect_stale();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.in_flight.is_some() && !handle.is_finished() {
            warn!("Voice model still busy at shutdown, detaching its thread");
            return;
        }
        if handle.join().is_err() {
            warn!("Voice model thread panicked");
        }
    }
}

fn timeout_error(budget: Duration) -> ModelError {
    ModelError::Timeout {
        budget_ms: budget.as_millis() as u64,
    }
}

/// The full conversion model behind a time budget.
pub struct ModelTransform {
    worker: ModelWorker,
    budget: Duration,
    name: String,
}

impl ModelTransform {
    pub fn new<M: VoiceModel + 'static>(model: M, budget: Duration) -> Result<Self> {
        let name = model.name().to_string();
        Ok(Self {
            worker: ModelWorker::spawn(model)?,
            budget,
            name,
        })
    }
}

impl FrameTransform for ModelTransform {
    fn apply(
        &mut self,
        frame: &AudioFrame,
        params: &TransformParameters,
    ) -> std::result::Result<AudioFrame, ModelError> {
        let samples = self
            .worker
            .run(frame, VoiceShift::from(params), self.budget)?;
        if samples.len() != frame.len() {
            return Err(ModelError::InvalidOutput {
                expected: frame.len(),
                actual: samples.len(),
            });
        }
        Ok(frame.with_samples(samples))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Everything the transform stage needs, gathered by the pipeline builder.
pub struct TransformParts {
    pub input: FrameConsumer,
    pub output: FrameProducer,
    pub params: Arc<ParameterStore>,
    pub control: Arc<StageControl>,
    pub governor: LatencyGovernor,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
    pub max_consecutive_failures: u32,
    /// Longest single wait on the input buffer.
    pub poll_interval: Duration,
}

pub struct TransformStage {
    input: FrameConsumer,
    output: FrameProducer,
    params: Arc<ParameterStore>,
    control: Arc<StageControl>,
    governor: LatencyGovernor,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    model: Box<dyn FrameTransform>,
    fallback: Box<dyn FrameTransform>,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    poll_interval: Duration,
    epoch: u64,
    /// Dequeued just as the stage paused; processed first after resume.
    held: Option<AudioFrame>,
}

impl TransformStage {
    pub fn new(
        parts: TransformParts,
        model: Box<dyn FrameTransform>,
        fallback: Box<dyn FrameTransform>,
    ) -> Self {
        let epoch = parts.control.epoch();
        Self {
            input: parts.input,
            output: parts.output,
            params: parts.params,
            control: parts.control,
            governor: parts.governor,
            clock: parts.clock,
            metrics: parts.metrics,
            model,
            fallback,
            consecutive_failures: 0,
            max_consecutive_failures: parts.max_consecutive_failures.max(1),
            poll_interval: parts.poll_interval,
            epoch,
            held: None,
        }
    }

    pub fn governor(&self) -> &LatencyGovernor {
        &self.governor
    }

    /// Processes at most one ready frame without waiting.
    ///
    /// Returns true if a frame was processed. Does nothing unless running.
    pub fn step(&mut self) -> bool {
        if !self.control.is_running() {
            return false;
        }
        self.check_resume();
        let Some(frame) = self.held.take().or_else(|| self.input.pop()) else {
            return false;
        };
        match self.admit(frame) {
            Some(frame) => {
                self.process(frame);
                true
            }
            None => false,
        }
    }

    /// Processes every frame currently queued. Returns how many.
    pub fn drain_ready(&mut self) -> usize {
        let mut processed = 0;
        while self.step() {
            processed += 1;
        }
        processed
    }

    /// Runs until the stage is stopped, waiting on the input buffer at most
    /// `poll_interval` at a time so pause and stop are seen promptly.
    pub fn run(mut self) {
        info!(model = self.model.name(), "Transform stage started");
        while !self.control.is_stopped() {
            if !self.control.is_running() {
                thread::sleep(self.poll_interval);
                continue;
            }
            self.check_resume();
            let frame = match self.held.take() {
                Some(frame) => Some(frame),
                None => self.input.pop_timeout(self.poll_interval),
            };
            if let Some(frame) = frame.and_then(|frame| self.admit(frame)) {
                self.process(frame);
            }
        }
        if let Some(frame) = self.held.take() {
            debug!(sequence = frame.sequence(), "discarding frame held across pause");
        }
        info!("Transform stage stopped");
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("transform".to_string())
            .spawn(move || self.run())
            .map_err(VoxError::from)
    }

    /// Re-checks the control after a dequeue, since pause or stop may have
    /// been raised while waiting. A paused frame is held, a stopped one dropped.
    fn admit(&mut self, frame: AudioFrame) -> Option<AudioFrame> {
        if self.control.is_running() {
            return Some(frame);
        }
        if self.control.is_stopped() {
            debug!(sequence = frame.sequence(), "stop raised during dequeue, discarding frame");
        } else {
            self.held = Some(frame);
        }
        None
    }

    fn check_resume(&mut self) {
        let epoch = self.control.epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            self.governor.on_resume();
        }
    }

    fn process(&mut self, frame: AudioFrame) {
        let params = self.params.snapshot();
        let started = self.clock.now();

        let fallback = params.fallback_active;
        let converted = if fallback {
            self.fallback.apply(&frame, &params)
        } else {
            self.model.apply(&frame, &params)
        };

        let out = match converted {
            Ok(out) => {
                if !fallback {
                    self.consecutive_failures = 0;
                }
                out
            }
            Err(e) => {
                self.on_failure(&frame, &e);
                frame
            }
        };

        self.output.push(out);
        let elapsed = self.clock.now().saturating_duration_since(started);
        self.metrics.record_transform(elapsed, fallback);
        self.governor.record_frame(elapsed);
    }

    fn on_failure(&mut self, frame: &AudioFrame, error: &ModelError) {
        self.metrics.record_model_failure();
        self.consecutive_failures += 1;
        warn!(
            sequence = frame.sequence(),
            consecutive = self.consecutive_failures,
            error = %error,
            "Model failed, passing frame through unmodified"
        );
        if self.consecutive_failures >= self.max_consecutive_failures {
            self.consecutive_failures = 0;
            self.governor.force_fallback();
        }
    }
}
