//! Command-line interface for voxshift
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time microphone voice conversion
#[derive(Parser, Debug)]
#[command(
    name = "voxshift",
    version = crate::version_string(),
    about = "Real-time microphone voice conversion"
)]
pub struct Cli {
    /// Subcommand to execute (default: interactive console)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (e.g., hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device
    #[arg(long, global = true, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Sample rate in Hz for both devices
    #[arg(long, global = true, value_name = "HZ")]
    pub sample_rate: Option<u32>,

    /// Samples per frame (e.g. 320 = 20ms at 16kHz)
    #[arg(long, global = true, value_name = "SAMPLES")]
    pub frame_size: Option<usize>,

    /// Pitch shift in semitones (-24 to 24)
    #[arg(long, global = true, value_name = "SEMITONES", allow_hyphen_values = true)]
    pub pitch: Option<f32>,

    /// Formant shift factor (0.5 to 2.0)
    #[arg(long, global = true, value_name = "FACTOR")]
    pub formant: Option<f32>,

    /// Conversion intensity, 0 = dry voice, 1 = fully converted
    #[arg(long, global = true, value_name = "AMOUNT")]
    pub intensity: Option<f32>,

    /// Show the live metrics line
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert immediately without the console, until Ctrl-C or --duration
    Run {
        /// Stop after this long. Examples: 30s, 5m, 1h30m
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Print live metrics as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },

    /// List available audio input and output devices
    Devices,

    /// View and save configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,
    /// Write the resolved configuration to a file (default: the config path)
    Save {
        /// Destination file
        path: Option<PathBuf>,
    },
}
