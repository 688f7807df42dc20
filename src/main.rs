use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use voxshift::VoxError;
use voxshift::app::{Console, Overrides, device_controller, load_config, run_console, run_timed};
use voxshift::audio::cpal_backend::{list_input_devices, list_output_devices};
use voxshift::cli::{Cli, Commands, ConfigAction};
use voxshift::config::Config;
use voxshift::display::MetricsOutput;
use voxshift::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let overrides = Overrides {
        input_device: cli.input_device.clone(),
        output_device: cli.output_device.clone(),
        sample_rate: cli.sample_rate,
        frame_size: cli.frame_size,
        pitch: cli.pitch,
        formant: cli.formant,
        intensity: cli.intensity,
    };

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref(), &overrides)
                .unwrap_or_else(|e| exit_with(e));
            let color = use_color(&config, cli.no_color);
            let show_metrics = cli.metrics || config.display.show_metrics;
            let refresh = Duration::from_millis(config.display.refresh_ms.max(10));
            let console = Console::new(
                device_controller(config.to_session_config()),
                show_metrics,
                color,
            );
            run_console(console, refresh).await?;
        }
        Some(Commands::Run { duration, json }) => {
            let config = load_config(cli.config.as_deref(), &overrides)
                .unwrap_or_else(|e| exit_with(e));
            let metrics = if json {
                MetricsOutput::Json
            } else if cli.metrics || config.display.show_metrics {
                MetricsOutput::Text {
                    color: use_color(&config, cli.no_color),
                }
            } else {
                MetricsOutput::Off
            };
            let refresh = Duration::from_millis(config.display.refresh_ms.max(10));
            let mut controller = device_controller(config.to_session_config());

            match run_timed(&mut controller, duration, refresh, metrics).await {
                Ok(summary) => {
                    if !cli.quiet {
                        summary.print_summary();
                    }
                }
                Err(e) => {
                    if !cli.quiet
                        && let Some(summary) = controller.last_summary()
                    {
                        summary.print_summary();
                    }
                    exit_with(e);
                }
            }
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref(), &overrides)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "voxshift", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Reports the error and exits with its code: 2 for configuration, 3 for
/// devices, 1 otherwise.
fn exit_with(e: VoxError) -> ! {
    eprintln!("{} {e}", "Error:".red());
    std::process::exit(e.exit_code());
}

fn use_color(config: &Config, no_color: bool) -> bool {
    config.display.color && !no_color && std::io::stderr().is_terminal()
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("Input devices:");
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("Output devices:");
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    overrides: &Overrides,
) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&config_path)
        .unwrap_or_else(|e| exit_with(e))
        .with_env_overrides();
    overrides.apply(&mut config);

    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Save { path } => {
            let target: PathBuf = path.unwrap_or(config_path);
            if let Err(e) = config.to_session_config().validate() {
                exit_with(e);
            }
            config.save(&target)?;
            println!("{} {}", "Saved".green(), target.display());
        }
    }

    Ok(())
}
