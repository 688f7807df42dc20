//! Session lifecycle state machine.

use crate::error::{Result, VoxError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Running => "Running",
            SessionState::Paused => "Paused",
            SessionState::Stopping => "Stopping",
            SessionState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Lifecycle events that move the session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    /// User stop or fatal device error.
    Stop,
    /// Teardown finished.
    Finish,
    /// Return a stopped session to Idle so it can start again.
    Reset,
}

impl Transition {
    pub fn command(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::Finish => "finish",
            Transition::Reset => "reset",
        }
    }
}

impl SessionState {
    /// The only way a session changes state. Returns the next state or
    /// `InvalidStateTransition`, leaving `self` untouched either way.
    pub fn transition(self, event: Transition) -> Result<SessionState> {
        use SessionState::*;
        let next = match (self, event) {
            (Idle, Transition::Start) => Running,
            (Running, Transition::Pause) => Paused,
            (Paused, Transition::Resume) => Running,
            (Idle | Running | Paused, Transition::Stop) => Stopping,
            (Stopping, Transition::Finish) => Stopped,
            (Stopped, Transition::Reset) => Idle,
            (from, event) => {
                return Err(VoxError::InvalidStateTransition {
                    from: from.to_string(),
                    command: event.command().to_string(),
                });
            }
        };
        Ok(next)
    }

    /// Live parameter changes are accepted only while stages exist.
    pub fn allows_parameter_updates(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }

    /// True while a pipeline is instantiated.
    pub fn has_pipeline(self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::Paused | SessionState::Stopping
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path() {
        let state = Idle.transition(Transition::Start).unwrap();
        assert_eq!(state, Running);
        let state = state.transition(Transition::Pause).unwrap();
        assert_eq!(state, Paused);
        let state = state.transition(Transition::Resume).unwrap();
        assert_eq!(state, Running);
        let state = state.transition(Transition::Stop).unwrap();
        assert_eq!(state, Stopping);
        let state = state.transition(Transition::Finish).unwrap();
        assert_eq!(state, Stopped);
        assert_eq!(state.transition(Transition::Reset).unwrap(), Idle);
    }

    #[test]
    fn test_stop_from_any_live_state() {
        for from in [Idle, Running, Paused] {
            assert_eq!(from.transition(Transition::Stop).unwrap(), Stopping);
        }
        assert!(Stopping.transition(Transition::Stop).is_err());
        assert!(Stopped.transition(Transition::Stop).is_err());
    }

    #[test]
    fn test_invalid_transitions_report_state_and_command() {
        match Idle.transition(Transition::Resume) {
            Err(VoxError::InvalidStateTransition { from, command }) => {
                assert_eq!(from, "Idle");
                assert_eq!(command, "resume");
            }
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
        assert!(Paused.transition(Transition::Pause).is_err());
        assert!(Running.transition(Transition::Start).is_err());
        assert!(Stopped.transition(Transition::Start).is_err());
        assert!(Running.transition(Transition::Reset).is_err());
    }

    #[test]
    fn test_parameter_updates_only_with_live_stages() {
        assert!(Running.allows_parameter_updates());
        assert!(Paused.allows_parameter_updates());
        for state in [Idle, Stopping, Stopped] {
            assert!(!state.allows_parameter_updates(), "{state} accepted updates");
        }
    }
}
