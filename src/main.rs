// src/main.rs - Command-line front end for the printer client
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use shui_rs::config::{self, Config};
use shui_rs::{DeviceSnapshot, ExchangeReport, GCode, Logger, PrinterClient};

const DEFAULT_CONFIG: &str = "shui.toml";

/// Shui printer CLI
#[derive(Parser, Debug)]
#[command(name = "shui", about = "Query and control a Shui-firmware 3D printer over TCP.")]
struct Cli {
    /// Path to a TOML config file (defaults to ./shui.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Printer host or IP, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Printer control port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Log exchanges at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Refresh once and print the device state
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll the printer until interrupted
    Watch {
        /// Seconds between refreshes (defaults to client.poll_interval_secs)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
        /// Stop after this many refreshes
        #[arg(long)]
        count: Option<u64>,
    },
    /// Beep so the printer can be located
    Beep,
    /// Set the heated bed target temperature (°C)
    BedTemp { celsius: f64 },
    /// Set the extruder target temperature (°C)
    ExtruderTemp { celsius: f64 },
    /// Send a raw G-code line
    Send { gcode: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{what} target {value}°C is outside {min}..={max}°C")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{command} failed: {reason}")]
    Exchange { command: String, reason: String },
}

fn check_range(what: &'static str, value: f64, min: f64, max: f64) -> Result<(), CliError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(CliError::OutOfRange { what, value, min, max })
    }
}

fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(&path.to_string_lossy())?,
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(DEFAULT_CONFIG)?,
        None => Config::default(),
    };
    if let Some(host) = &cli.host {
        config.printer.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.printer.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn fmt_temp(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1} °C", v)).unwrap_or_else(|| "unknown".to_string())
}

fn print_snapshot(snapshot: &DeviceSnapshot) {
    println!("Connection:           {}", snapshot.connection);
    println!("Bed temp:             {}", fmt_temp(snapshot.bed_temp));
    println!("Target bed temp:      {}", fmt_temp(snapshot.target_bed_temp));
    println!("Extruder temp:        {}", fmt_temp(snapshot.extruder_temp));
    println!("Target extruder temp: {}", fmt_temp(snapshot.target_extruder_temp));
    println!(
        "Print status:         {}",
        snapshot.print_status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "Print progress:       {}",
        snapshot.print_progress.map(|p| format!("{:.1} %", p)).unwrap_or_else(|| "unknown".to_string())
    );
}

fn finish(command: &GCode, report: ExchangeReport) -> Result<(), CliError> {
    match report.outcome {
        Ok(()) => {
            tracing::info!("{} acknowledged", command);
            Ok(())
        }
        Err(e) => Err(CliError::Exchange {
            command: command.to_string(),
            reason: e.to_string(),
        }),
    }
}

async fn watch(printer: &PrinterClient, every: std::time::Duration, count: Option<u64>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut done = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Watch interrupted");
                break;
            }
            _ = interval.tick() => {
                let report = printer.refresh().await;
                if !report.succeeded() {
                    tracing::warn!("Refresh failed ({} in a row)", report.failure_streak);
                }
                print_snapshot(&printer.snapshot().await);
                println!();
                done += 1;
                if count.is_some_and(|limit| done >= limit) {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load(&cli).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Printer: {} at {}",
        config.printer.name.as_deref().unwrap_or("Unknown"),
        config.endpoint()
    );

    let printer = PrinterClient::from_config(&config, Logger::tracing());

    match cli.command {
        Commands::Status { json } => {
            printer.refresh().await;
            let snapshot = printer.snapshot().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Commands::Watch { interval, count } => {
            let every = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.poll_interval());
            watch(&printer, every, count).await;
        }
        Commands::Beep => {
            finish(&GCode::Beep, printer.beep().await)?;
        }
        Commands::BedTemp { celsius } => {
            let limits = &config.limits;
            check_range("bed", celsius, limits.bed_min_temp, limits.bed_max_temp)?;
            finish(&GCode::SetBedTarget(celsius), printer.set_target_bed_temp(celsius).await)?;
        }
        Commands::ExtruderTemp { celsius } => {
            let limits = &config.limits;
            check_range("extruder", celsius, limits.extruder_min_temp, limits.extruder_max_temp)?;
            let command = GCode::set_extruder0_target(celsius);
            finish(&command, printer.set_target_extruder_temp(celsius).await)?;
        }
        Commands::Send { gcode } => {
            let command = GCode::from(gcode.as_str());
            let report = printer.issue_command(command.clone()).await;
            finish(&command, report)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["shui", "--host", "10.0.0.9", "bed-temp", "65"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.9"));
        assert!(matches!(cli.command, Commands::BedTemp { celsius } if celsius == 65.0));

        let cli = Cli::try_parse_from(["shui", "watch", "--interval", "5", "--count", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { interval: Some(5), count: Some(2) }));
    }

    #[test]
    fn test_watch_rejects_zero_interval() {
        assert!(Cli::try_parse_from(["shui", "watch", "--interval", "0"]).is_err());
        assert!(Cli::try_parse_from(["shui", "watch", "--interval", "1"]).is_ok());
    }

    #[test]
    fn test_range_check_matches_ui_limits() {
        assert!(check_range("bed", 65.0, 0.0, 80.0).is_ok());
        assert!(check_range("bed", 81.0, 0.0, 80.0).is_err());
        assert!(check_range("extruder", f64::NAN, 0.0, 250.0).is_err());
    }

    #[test]
    fn test_unknown_values_render_as_unknown() {
        assert_eq!(fmt_temp(None), "unknown");
        assert_eq!(fmt_temp(Some(60.24)), "60.2 °C");
    }
}
