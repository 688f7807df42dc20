//! Run-state flags, session events and clock-sync bookkeeping shared by the
//! stages.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};

/// What the stages are currently allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    Paused,
    Stopped,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Running,
            1 => StageState::Paused,
            _ => StageState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StageState::Running => 0,
            StageState::Paused => 1,
            StageState::Stopped => 2,
        }
    }
}

/// Run flag read by all three stage contexts.
///
/// Only the session controller writes it. Capture and playback read it on
/// every callback; the transform loop reads it between frames.
#[derive(Debug)]
pub struct StageControl {
    state: AtomicU8,
    epoch: AtomicU64,
}

impl StageControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StageState::Running.as_u8()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == StageState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == StageState::Stopped
    }

    /// Returns false unless the stages were running.
    pub fn pause(&self) -> bool {
        self.state
            .compare_exchange(
                StageState::Running.as_u8(),
                StageState::Paused.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Resumes from pause and starts a new run epoch, so drift tracking
    /// re-baselines instead of counting the pause as drift.
    pub fn resume(&self) -> bool {
        let resumed = self
            .state
            .compare_exchange(
                StageState::Paused.as_u8(),
                StageState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if resumed {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        resumed
    }

    pub fn stop(&self) {
        self.state
            .store(StageState::Stopped.as_u8(), Ordering::Release);
    }

    /// Run epoch, incremented on every resume.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

impl Default for StageControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Which device reported a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSide {
    Capture,
    Playback,
}

impl fmt::Display for DeviceSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSide::Capture => write!(f, "capture"),
            DeviceSide::Playback => write!(f, "playback"),
        }
    }
}

/// Events raised by stages for the session controller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The device failed or disconnected. The session must stop.
    DeviceError { side: DeviceSide, message: String },
}

/// One-shot resynchronisation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Capture discards one assembled frame (capture clock running fast).
    DropFrame,
    /// Playback emits one filler frame without consuming (playback clock running fast).
    InsertFrame,
}

const NO_CORRECTION: u8 = 0;
const DROP_FRAME: u8 = 1;
const INSERT_FRAME: u8 = 2;

impl Correction {
    fn as_u8(self) -> u8 {
        match self {
            Correction::DropFrame => DROP_FRAME,
            Correction::InsertFrame => INSERT_FRAME,
        }
    }
}

/// Sample counters of both device clocks plus the pending correction slot.
///
/// Capture adds what it receives, playback adds what the device asks for.
/// Corrections are subtracted so that an applied correction moves the
/// measured offset by exactly one frame.
#[derive(Debug, Default)]
pub struct ClockSync {
    captured: AtomicU64,
    played: AtomicU64,
    dropped_for_sync: AtomicU64,
    inserted_for_sync: AtomicU64,
    pending: AtomicU8,
    drift: AtomicI64,
    drift_valid: AtomicBool,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_captured(&self, samples: usize) {
        self.captured.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn add_played(&self, samples: usize) {
        self.played.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    /// Capture minus playback sample count, net of applied corrections.
    pub fn offset(&self) -> i64 {
        let captured = self.captured() as i64 - self.dropped_for_sync.load(Ordering::Relaxed) as i64;
        let played = self.played() as i64 - self.inserted_for_sync.load(Ordering::Relaxed) as i64;
        captured - played
    }

    /// Queues a correction. Returns false if one is already pending.
    pub fn request(&self, correction: Correction) -> bool {
        self.pending
            .compare_exchange(
                NO_CORRECTION,
                correction.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn pending(&self) -> Option<Correction> {
        match self.pending.load(Ordering::Acquire) {
            DROP_FRAME => Some(Correction::DropFrame),
            INSERT_FRAME => Some(Correction::InsertFrame),
            _ => None,
        }
    }

    /// Claims a pending correction of the given kind. Returns true exactly
    /// once per request.
    pub fn take(&self, correction: Correction) -> bool {
        self.pending
            .compare_exchange(
                correction.as_u8(),
                NO_CORRECTION,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Records that a correction of `samples` was applied.
    pub fn applied(&self, correction: Correction, samples: usize) {
        let counter = match correction {
            Correction::DropFrame => &self.dropped_for_sync,
            Correction::InsertFrame => &self.inserted_for_sync,
        };
        counter.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Publishes the latest drift estimate in samples (positive: capture ahead).
    pub fn report_drift(&self, samples: i64) {
        self.drift.store(samples, Ordering::Relaxed);
        self.drift_valid.store(true, Ordering::Release);
    }

    /// Latest drift estimate, if playback has established a baseline.
    pub fn drift(&self) -> Option<i64> {
        self.drift_valid
            .load(Ordering::Acquire)
            .then(|| self.drift.load(Ordering::Relaxed))
    }

    /// Forgets the drift estimate until playback re-baselines.
    pub fn invalidate_drift(&self) {
        self.drift_valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_control_transitions() {
        let control = StageControl::new();
        assert!(control.is_running());

        assert!(control.pause());
        assert!(!control.pause(), "already paused");
        assert_eq!(control.state(), StageState::Paused);

        assert!(control.resume());
        assert!(control.is_running());
        assert_eq!(control.epoch(), 1);

        control.stop();
        assert!(control.is_stopped());
        assert!(!control.resume());
        assert!(control.is_stopped(), "stop is final");
        assert_eq!(control.epoch(), 1);
    }

    #[test]
    fn test_resume_without_pause_keeps_epoch() {
        let control = StageControl::new();
        assert!(!control.resume());
        assert_eq!(control.epoch(), 0);
    }

    #[test]
    fn test_correction_is_one_shot() {
        let sync = ClockSync::new();
        assert!(sync.request(Correction::DropFrame));
        assert!(!sync.request(Correction::InsertFrame), "only one pending");
        assert_eq!(sync.pending(), Some(Correction::DropFrame));

        assert!(!sync.take(Correction::InsertFrame));
        assert!(sync.take(Correction::DropFrame));
        assert!(!sync.take(Correction::DropFrame));
        assert_eq!(sync.pending(), None);
    }

    #[test]
    fn test_offset_accounts_for_corrections() {
        let sync = ClockSync::new();
        sync.add_captured(1000);
        sync.add_played(600);
        assert_eq!(sync.offset(), 400);

        sync.applied(Correction::DropFrame, 320);
        assert_eq!(sync.offset(), 80);

        sync.applied(Correction::InsertFrame, 320);
        assert_eq!(sync.offset(), 400);
    }

    #[test]
    fn test_drift_report_validity() {
        let sync = ClockSync::new();
        assert_eq!(sync.drift(), None);
        sync.report_drift(-12);
        assert_eq!(sync.drift(), Some(-12));
        sync.invalidate_drift();
        assert_eq!(sync.drift(), None);
    }

    #[test]
    fn test_device_side_display() {
        assert_eq!(DeviceSide::Capture.to_string(), "capture");
        assert_eq!(DeviceSide::Playback.to_string(), "playback");
    }
}
