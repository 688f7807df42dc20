//! Console rendering for the live metrics line and status output.

use crate::pipeline::latency::format_duration;
use crate::pipeline::metrics::MetricsSnapshot;
use crate::session::state::SessionState;
use owo_colors::OwoColorize;
use std::time::Duration;

/// Loads above this are shown as a warning.
const LOAD_WARN: f64 = 0.7;

pub const HELP: &str = "\
Commands:
  start              start converting
  stop               stop and print the session summary
  pause / resume     hold or continue the live session
  pitch <semitones>  set pitch shift (-24..24)
  formant <factor>   set formant shift (0.5..2.0)
  intensity <0..1>   set conversion intensity
  metrics            toggle the live metrics line
  status             show session state and parameters
  help               show this help
  quit               stop and exit";

fn millis(ms: f64) -> String {
    format_duration(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
}

/// One-line live view: latency, transform load, buffer fill, fallback flag
/// and counters.
pub fn metrics_line(snapshot: &MetricsSnapshot, color: bool) -> String {
    let load_pct = format!("{:>3.0}%", snapshot.transform_load * 100.0);
    let load = if !color {
        load_pct
    } else if snapshot.transform_load >= 1.0 {
        load_pct.red().to_string()
    } else if snapshot.transform_load >= LOAD_WARN {
        load_pct.yellow().to_string()
    } else {
        load_pct.green().to_string()
    };

    let mode = match (snapshot.fallback_active, color) {
        (true, true) => "FALLBACK".red().bold().to_string(),
        (true, false) => "FALLBACK".to_string(),
        (false, true) => "model".dimmed().to_string(),
        (false, false) => "model".to_string(),
    };

    let dropouts = match (snapshot.xrun_warning, color) {
        (true, true) => format!(" | {}", "DROPOUTS".yellow().bold()),
        (true, false) => " | DROPOUTS".to_string(),
        (false, _) => String::new(),
    };

    format!(
        "latency {} | transform {} ({}) | buffers {}/{} {}/{} | {} | underruns {} overruns {} dropped {} failures {}{}",
        millis(snapshot.latency_ms),
        millis(snapshot.transform_ms),
        load,
        snapshot.input_occupancy,
        snapshot.capacity,
        snapshot.output_occupancy,
        snapshot.capacity,
        mode,
        snapshot.underruns,
        snapshot.overruns,
        snapshot.dropped,
        snapshot.model_failures,
        dropouts,
    )
}

/// How a non-interactive run reports live metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsOutput {
    Off,
    Text { color: bool },
    /// One JSON object per line on stdout, for an external display.
    Json,
}

impl MetricsOutput {
    /// Renders one refresh, or `None` when metrics are off.
    pub fn render(self, snapshot: &MetricsSnapshot) -> Option<String> {
        match self {
            MetricsOutput::Off => None,
            MetricsOutput::Text { color } => Some(metrics_line(snapshot, color)),
            MetricsOutput::Json => match serde_json::to_string(snapshot) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize metrics");
                    None
                }
            },
        }
    }
}

/// Multi-line answer to the `status` command.
pub fn status(state: SessionState, snapshot: &MetricsSnapshot, color: bool) -> String {
    let state_text = if color {
        match state {
            SessionState::Running => state.to_string().green().to_string(),
            SessionState::Paused => state.to_string().yellow().to_string(),
            _ => state.to_string().dimmed().to_string(),
        }
    } else {
        state.to_string()
    };
    format!(
        "Session:   {state_text}\nPitch:     {:+.1} semitones\nFormant:   {:.2}x\nIntensity: {:.2}\nFallback:  {}",
        snapshot.pitch_shift,
        snapshot.formant_shift,
        snapshot.intensity,
        if snapshot.fallback_active { "on" } else { "off" },
    )
}
