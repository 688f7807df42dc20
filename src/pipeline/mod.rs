//! Streaming voice-conversion pipeline.
//!
//! Capture and playback are driven by device callbacks; the transform stage
//! runs on its own thread. Stages hand frames over through lock-free bounded
//! buffers that never block the producer, and share parameters through
//! atomically swapped snapshots.

pub mod capture;
pub mod clock;
pub mod control;
pub mod frame;
pub mod frame_buffer;
pub mod governor;
pub mod latency;
pub mod metrics;
pub mod orchestrator;
pub mod params;
pub mod playback;
pub mod transform;

pub use capture::{CaptureParts, CaptureStage};
pub use clock::{Clock, MockClock, SystemClock};
pub use control::{ClockSync, Correction, DeviceSide, SessionEvent, StageControl, StageState};
pub use frame::AudioFrame;
pub use frame_buffer::{BufferStats, FrameBufferHandle, FrameConsumer, FrameProducer, frame_buffer};
pub use governor::{GovernorAction, GovernorConfig, LatencyGovernor};
pub use latency::{LatencyMeasurement, SessionSummary};
pub use metrics::{GovernorReport, MetricsSnapshot, PipelineMetrics};
pub use orchestrator::{Pipeline, PipelineShared, join_with_deadline};
pub use params::{ParameterStore, TransformParameters};
pub use playback::{PlaybackParts, PlaybackStage};
pub use transform::{FrameTransform, ModelTransform, PassthroughTransform, TransformStage};
