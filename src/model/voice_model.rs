use crate::pipeline::clock::MockClock;
use crate::pipeline::frame::AudioFrame;
use crate::pipeline::params::TransformParameters;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Per-frame conversion failure.
///
/// Never leaves the transform stage: the frame is replaced by its unmodified
/// input and the failure is counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model failed: {message}")]
    Failed { message: String },

    #[error("model returned {actual} samples, expected {expected}")]
    InvalidOutput { expected: usize, actual: usize },

    #[error("model exceeded its {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error("model worker is unavailable")]
    Unavailable,
}

/// Shift settings handed to the model for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceShift {
    pub pitch_shift: f32,
    pub formant_shift: f32,
    pub intensity: f32,
}

impl From<&TransformParameters> for VoiceShift {
    fn from(params: &TransformParameters) -> Self {
        Self {
            pitch_shift: params.pitch_shift,
            formant_shift: params.formant_shift,
            intensity: params.intensity,
        }
    }
}

/// Trait for voice conversion models.
///
/// Implementations may keep state between frames and are not required to be
/// thread-safe; the transform stage calls them from a single thread at a time.
pub trait VoiceModel: Send {
    /// Converts one frame. The result must have the same length as the input.
    fn transform(&mut self, frame: &AudioFrame, shift: VoiceShift) -> Result<Vec<i16>, ModelError>;

    /// Get the name of the loaded model
    fn name(&self) -> &str;
}

impl VoiceModel for Box<dyn VoiceModel> {
    fn transform(&mut self, frame: &AudioFrame, shift: VoiceShift) -> Result<Vec<i16>, ModelError> {
        (**self).transform(frame, shift)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adjustable per-call cost for [`MockVoiceModel`], shared with the test
/// that drives it.
#[derive(Debug, Clone, Default)]
pub struct MockCost {
    nanos: Arc<AtomicU64>,
}

impl MockCost {
    pub fn new(cost: Duration) -> Self {
        let handle = Self::default();
        handle.set(cost);
        handle
    }

    pub fn set(&self, cost: Duration) {
        let nanos = u64::try_from(cost.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.store(nanos, Ordering::Relaxed);
    }

    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Mock voice model for testing.
///
/// Adds a fixed offset to every sample so converted frames are easy to tell
/// apart from pass-through ones. Its cost is charged to a [`MockClock`], which
/// makes timing-driven behaviour deterministic.
#[derive(Debug, Clone)]
pub struct MockVoiceModel {
    name: String,
    offset: i16,
    clock: Option<MockClock>,
    cost: MockCost,
    hang: Option<Duration>,
    fail_on: HashSet<u64>,
    always_fail: bool,
    calls: Arc<AtomicU64>,
}

impl MockVoiceModel {
    /// Offset added to each sample by default.
    pub const DEFAULT_OFFSET: i16 = 1000;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            offset: Self::DEFAULT_OFFSET,
            clock: None,
            cost: MockCost::default(),
            hang: None,
            fail_on: HashSet::new(),
            always_fail: false,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configure the offset added to each sample
    pub fn with_offset(mut self, offset: i16) -> Self {
        self.offset = offset;
        self
    }

    /// Advance `clock` by the current cost on every call
    pub fn with_clock(mut self, clock: MockClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a cost handle so the test can change it while streaming
    pub fn with_cost(mut self, cost: MockCost) -> Self {
        self.cost = cost;
        self
    }

    /// Block the calling thread for real time before answering
    pub fn with_hang(mut self, duration: Duration) -> Self {
        self.hang = Some(duration);
        self
    }

    /// Fail on the frame with this sequence number
    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.fail_on.insert(sequence);
        self
    }

    /// Fail on every frame
    pub fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Counter of `transform` calls, readable after the model moved threads
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl VoiceModel for MockVoiceModel {
    fn transform(&mut self, frame: &AudioFrame, _shift: VoiceShift) -> Result<Vec<i16>, ModelError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(clock) = &self.clock {
            clock.advance(self.cost.get());
        }
        if let Some(hang) = self.hang {
            thread::sleep(hang);
        }
        if self.always_fail || self.fail_on.contains(&frame.sequence()) {
            return Err(ModelError::Failed {
                message: format!("mock failure on frame {}", frame.sequence()),
            });
        }
        Ok(frame
            .samples()
            .iter()
            .map(|s| s.saturating_add(self.offset))
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
