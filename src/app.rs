//! Application entry points: interactive console and timed runs.

use crate::audio::backend::AudioBackend;
use crate::audio::cpal_backend::{CpalBackend, suppress_audio_warnings};
use crate::config::Config;
use crate::display::{self, MetricsOutput};
use crate::error::Result;
use crate::model::{DspVoiceModel, VoiceModel};
use crate::pipeline::latency::SessionSummary;
use crate::session::command::{Command, Reply};
use crate::session::config::SessionConfig;
use crate::session::controller::{ModelFactory, SessionController};
use crate::session::state::SessionState;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, MissedTickBehavior};

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub pitch: Option<f32>,
    pub formant: Option<f32>,
    pub intensity: Option<f32>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.input_device {
            config.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.audio.output_device = Some(device.clone());
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(size) = self.frame_size {
            config.audio.frame_size = size;
        }
        if let Some(pitch) = self.pitch {
            config.transform.pitch_shift = pitch;
        }
        if let Some(formant) = self.formant {
            config.transform.formant_shift = formant;
        }
        if let Some(intensity) = self.intensity {
            config.transform.intensity = intensity;
        }
    }
}

/// Loads the configuration file, then layers environment and command-line
/// values on top. A missing default file means defaults; a missing explicit
/// one is an error.
pub fn load_config(custom_path: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    let mut config = config.with_env_overrides();
    overrides.apply(&mut config);
    Ok(config)
}

/// Model factory for the built-in DSP voice model.
pub fn dsp_model_factory() -> ModelFactory {
    Box::new(|config: &SessionConfig| -> Result<Box<dyn VoiceModel>> {
        Ok(Box::new(DspVoiceModel::new(config.sample_rate)))
    })
}

/// Controller on real audio devices with the built-in model.
pub fn device_controller(config: SessionConfig) -> SessionController {
    suppress_audio_warnings();
    let backend: Box<dyn AudioBackend> = Box::new(CpalBackend::new(
        config.input_device.clone(),
        config.output_device.clone(),
    ));
    SessionController::new(config, backend, dsp_model_factory())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    Quit,
}

/// Line-oriented console around a [`SessionController`].
pub struct Console {
    controller: SessionController,
    show_metrics: bool,
    color: bool,
}

impl Console {
    pub fn new(controller: SessionController, show_metrics: bool, color: bool) -> Self {
        Self {
            controller,
            show_metrics,
            color,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn show_metrics(&self) -> bool {
        self.show_metrics
    }

    /// Handles one line typed by the user.
    pub fn handle_line(&mut self, line: &str, out: &mut impl Write) -> io::Result<ConsoleAction> {
        let word = line.split_whitespace().next().unwrap_or("");
        match word.to_ascii_lowercase().as_str() {
            "" => return Ok(ConsoleAction::Continue),
            "quit" | "exit" | "q" => {
                self.shutdown(out)?;
                return Ok(ConsoleAction::Quit);
            }
            "help" | "?" => {
                writeln!(out, "{}", display::HELP)?;
                return Ok(ConsoleAction::Continue);
            }
            "status" => {
                let snapshot = self.controller.query_metrics();
                writeln!(
                    out,
                    "{}",
                    display::status(self.controller.state(), &snapshot, self.color)
                )?;
                return Ok(ConsoleAction::Continue);
            }
            "metrics" => {
                self.show_metrics = !self.show_metrics;
                let state = if self.show_metrics { "on" } else { "off" };
                writeln!(out, "Live metrics {state}")?;
                return Ok(ConsoleAction::Continue);
            }
            _ => {}
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{e}")?;
                writeln!(out, "{}", display::HELP)?;
                return Ok(ConsoleAction::Continue);
            }
        };

        // `start` after a finished session begins a new one.
        if command == Command::Start && self.controller.state() == SessionState::Stopped {
            let reply = self.controller.execute(Command::Reset);
            self.report(reply, out)?;
        }
        let reply = self.controller.execute(command);
        self.report(reply, out)?;
        Ok(ConsoleAction::Continue)
    }

    /// Periodic work: handles stage events and refreshes the metrics line.
    pub fn tick(&mut self, out: &mut impl Write) -> io::Result<()> {
        if let Some(err) = self.controller.poll_events() {
            writeln!(out, "Session stopped: {err}")?;
            if let Some(summary) = self.controller.last_summary() {
                writeln!(out, "{summary}")?;
            }
        }
        if self.show_metrics && self.controller.state() == SessionState::Running {
            let snapshot = self.controller.query_metrics();
            writeln!(out, "{}", display::metrics_line(&snapshot, self.color))?;
        }
        Ok(())
    }

    /// Stops a live session and prints its summary.
    pub fn shutdown(&mut self, out: &mut impl Write) -> io::Result<()> {
        if matches!(
            self.controller.state(),
            SessionState::Running | SessionState::Paused
        ) {
            let reply = self.controller.execute(Command::Stop);
            self.report(reply, out)?;
        }
        Ok(())
    }

    fn report(&self, reply: Result<Reply>, out: &mut impl Write) -> io::Result<()> {
        match reply {
            Ok(Reply::Metrics(snapshot)) => {
                writeln!(out, "{}", display::metrics_line(&snapshot, self.color))
            }
            Ok(reply) => writeln!(out, "{reply}"),
            Err(e) => writeln!(out, "Error: {e}"),
        }
    }
}

/// Interactive console on stdin until `quit`, end of input or Ctrl-C.
pub async fn run_console(mut console: Console, refresh: Duration) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "voxshift {}. Type 'help' for commands.", crate::version_string())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    console.shutdown(&mut stdout)?;
                    break;
                };
                if console.handle_line(&line, &mut stdout)? == ConsoleAction::Quit {
                    break;
                }
            }
            _ = ticker.tick() => console.tick(&mut stdout)?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                writeln!(stdout)?;
                console.shutdown(&mut stdout)?;
                break;
            }
        }
    }
    Ok(())
}

/// Starts immediately and runs until `duration` elapses or Ctrl-C, then
/// stops and returns the summary. A device error ends the run early and is
/// returned after the session has been stopped.
pub async fn run_timed(
    controller: &mut SessionController,
    duration: Option<Duration>,
    refresh: Duration,
    metrics: MetricsOutput,
) -> Result<SessionSummary> {
    controller.start()?;
    tracing::info!(duration = ?duration, "Running; press Ctrl-C to stop");

    let deadline = duration.map(|d| Instant::now() + d);
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let until_deadline = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = until_deadline => break,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to wait for Ctrl-C");
                }
                break;
            }
            _ = ticker.tick() => {
                if let Some(err) = controller.poll_events() {
                    return Err(err);
                }
                if metrics != MetricsOutput::Off
                    && let Some(line) = metrics.render(&controller.query_metrics())
                {
                    // JSON lines go to stdout, text to stderr.
                    if metrics == MetricsOutput::Json {
                        println!("{line}");
                    } else {
                        eprintln!("{line}");
                    }
                }
            }
        }
    }

    controller.stop()
}
