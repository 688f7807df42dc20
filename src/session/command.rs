//! Command surface accepted by the session controller.

use crate::pipeline::latency::SessionSummary;
use crate::pipeline::metrics::MetricsSnapshot;
use crate::session::state::SessionState;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    SetPitch(f32),
    SetFormant(f32),
    SetIntensity(f32),
    QueryMetrics,
    Reset,
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The session moved to this state.
    State(SessionState),
    /// A parameter was accepted and applies from the next frame.
    Parameter { name: &'static str, value: f32 },
    Metrics(MetricsSnapshot),
    /// The session stopped; totals for the run.
    Stopped(SessionSummary),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::State(state) => write!(f, "Session {state}"),
            Reply::Parameter { name, value } => write!(f, "{name} set to {value}"),
            Reply::Metrics(snapshot) => write!(
                f,
                "latency {:.1}ms, transform {:.1}ms ({:.0}%), fallback {}",
                snapshot.latency_ms,
                snapshot.transform_ms,
                snapshot.transform_load * 100.0,
                if snapshot.fallback_active { "on" } else { "off" }
            ),
            Reply::Stopped(summary) => write!(f, "{summary}"),
        }
    }
}

/// Why a console line could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    Empty,
    Unknown(String),
    MissingValue(&'static str),
    BadValue { command: &'static str, value: String },
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCommandError::Empty => write!(f, "empty command"),
            ParseCommandError::Unknown(word) => write!(f, "unknown command '{word}'"),
            ParseCommandError::MissingValue(command) => {
                write!(f, "'{command}' needs a numeric value")
            }
            ParseCommandError::BadValue { command, value } => {
                write!(f, "'{value}' is not a number for '{command}'")
            }
        }
    }
}

impl std::error::Error for ParseCommandError {}

fn parse_value(command: &'static str, value: Option<&str>) -> Result<f32, ParseCommandError> {
    let value = value.ok_or(ParseCommandError::MissingValue(command))?;
    value.parse().map_err(|_| ParseCommandError::BadValue {
        command,
        value: value.to_string(),
    })
}

impl FromStr for Command {
    type Err = ParseCommandError;

    /// Parses one console line such as `pitch 4.5` or `pause`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let value = words.next();
        match word.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            "reset" => Ok(Command::Reset),
            "metrics" | "query-metrics" => Ok(Command::QueryMetrics),
            "pitch" | "set-pitch" => parse_value("pitch", value).map(Command::SetPitch),
            "formant" | "set-formant" => parse_value("formant", value).map(Command::SetFormant),
            "intensity" | "set-intensity" => {
                parse_value("intensity", value).map(Command::SetIntensity)
            }
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}
