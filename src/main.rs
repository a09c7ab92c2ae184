//! CLI entry point for focuserlink
//!
//! Connects to a FocuserLink focuser, runs one poll tick to load the device
//! state, then executes a single command or keeps polling until Ctrl-C.
//! `move` and `step` wait until the focuser has settled, backlash correction
//! included, before disconnecting; Ctrl-C while waiting aborts the move.
//!
//! # Usage
//!
//! ```bash
//! focuserlink status
//! focuserlink move 12000
//! focuserlink backlash --steps 40 --enabled on
//! FOCUSERLINK_DEVICE__PORT=/dev/ttyACM0 focuserlink run
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use focuserlink::config::{AppConfig, DEFAULT_CONFIG_PATH};
use focuserlink::connection::SerialConnection;
use focuserlink::store::TomlConfigStore;
use focuserlink::tracing_init;
use focuserlink_core::capabilities::{CompensationMode, ConfigStore, FocusDirection, FocuserSettings};
use focuserlink_core::state::FocuserSnapshot;
use focuserlink_driver::FocuserLinkDriver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "focuserlink")]
#[command(about = "Control a FocuserLink focuser over its serial line", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Auto,
    Manual,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and log every snapshot until Ctrl-C
    Run,

    /// Print the current state as JSON
    Status,

    /// Move to an absolute position in steps
    Move {
        /// Target position
        ticks: i64,
    },

    /// Move relative to the current position
    Step {
        /// Direction of travel
        direction: Direction,
        /// Steps to move
        steps: i64,
    },

    /// Stop motion
    Abort,

    /// Redefine the current position without moving
    Sync {
        /// New current position
        ticks: i64,
    },

    /// Set the maximum position
    Max {
        /// Maximum position in steps
        ticks: i64,
    },

    /// Reverse the motor direction
    Reverse {
        /// on or off
        state: Toggle,
    },

    /// Write step size and temperature compensation settings
    Settings {
        /// Step size in µm
        #[arg(long)]
        step_size: Option<f64>,
        /// Compensation rate in steps per °C
        #[arg(long)]
        compensation: Option<f64>,
        /// Compensation trigger threshold in steps
        #[arg(long)]
        threshold: Option<i64>,
    },

    /// Select automatic or manual temperature compensation
    CompMode {
        /// auto or manual
        mode: Mode,
    },

    /// Enable or disable the hand controller
    Manual {
        /// on or off
        state: Toggle,
    },

    /// Apply temperature compensation now
    CompensateNow,

    /// Show or change backlash compensation
    Backlash {
        /// Signed overshoot in steps
        #[arg(long, allow_hyphen_values = true)]
        steps: Option<i64>,
        /// on or off
        #[arg(long)]
        enabled: Option<Toggle>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;
    tracing_init::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let provider = SerialConnection::new(config.device.port.clone(), config.device.baud_rate);
    let store: Arc<dyn ConfigStore> = Arc::new(TomlConfigStore::new(config.store.path.clone()));
    let driver =
        FocuserLinkDriver::connect(&provider, config.device.driver_options(), Some(store)).await?;

    let report = driver.poll_once().await?;
    if !report.status_ok {
        tracing::warn!("Initial status query failed, state may be incomplete");
    }

    let move_wait = Duration::from_secs(config.application.move_wait_secs);
    let result = dispatch(&driver, cli.command, move_wait).await;
    driver.disconnect().await;
    result
}

async fn dispatch(driver: &FocuserLinkDriver, command: Commands, move_wait: Duration) -> Result<()> {
    match command {
        Commands::Run => run(driver).await?,
        Commands::Status => print_json(&driver.snapshot().await)?,
        Commands::Move { ticks } => {
            driver.move_absolute(ticks).await?;
            settle(driver, move_wait).await?
        }
        Commands::Step { direction, steps } => {
            let direction = match direction {
                Direction::In => FocusDirection::Inward,
                Direction::Out => FocusDirection::Outward,
            };
            driver.move_relative(direction, steps).await?;
            settle(driver, move_wait).await?
        }
        Commands::Abort => driver.abort().await?,
        Commands::Sync { ticks } => driver.sync(ticks).await?,
        Commands::Max { ticks } => driver.set_max_position(ticks).await?,
        Commands::Reverse { state } => driver.set_reversed(state.enabled()).await?,
        Commands::Settings {
            step_size,
            compensation,
            threshold,
        } => {
            let current = driver.snapshot().await.state;
            driver
                .set_focuser_settings(FocuserSettings {
                    step_size_microns: step_size.unwrap_or(current.step_size_microns),
                    compensation_steps_per_degree: compensation
                        .unwrap_or(current.compensation_steps_per_degree),
                    compensation_threshold_steps: threshold
                        .unwrap_or(current.compensation_threshold_steps),
                })
                .await?
        }
        Commands::CompMode { mode } => {
            let mode = match mode {
                Mode::Auto => CompensationMode::Auto,
                Mode::Manual => CompensationMode::Manual,
            };
            driver.set_compensation_mode(mode).await?
        }
        Commands::Manual { state } => driver.set_manual_controller(state.enabled()).await?,
        Commands::CompensateNow => driver.compensate_now().await?,
        Commands::Backlash { steps, enabled } => {
            if let Some(steps) = steps {
                driver.set_backlash(steps).await?;
            }
            if let Some(enabled) = enabled {
                driver.set_backlash_enabled(enabled.enabled()).await?;
            }
            print_json(&driver.snapshot().await.backlash)?;
        }
    }
    Ok(())
}

/// Wait for the move and any backlash correction to finish before the
/// session is dropped. Ctrl-C aborts the move instead.
async fn settle(driver: &FocuserLinkDriver, limit: Duration) -> Result<()> {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::warn!("Interrupted, aborting move");
            driver.abort().await?;
        }
        settled = driver.wait_until_settled(limit) => {
            let snapshot = settled?;
            tracing::info!(
                position = snapshot.state.absolute_position_steps,
                position_mm = snapshot.position_mm,
                "Move complete"
            );
        }
    }
    Ok(())
}

async fn run(driver: &FocuserLinkDriver) -> Result<()> {
    let mut rx = driver.subscribe();
    driver.start_polling();
    tracing::info!("Polling, press Ctrl-C to stop");

    // a reading older than a few missed ticks is reported as stale
    let max_age = chrono::Duration::from_std(driver.options().poll_interval * 3)
        .context("Poll interval out of range")?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            snapshot = rx.recv() => match snapshot {
                Ok(snapshot) => log_snapshot(&snapshot, max_age),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Snapshot receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    driver.stop_polling();
    Ok(())
}

fn log_snapshot(snapshot: &FocuserSnapshot, max_age: chrono::Duration) {
    let fresh = snapshot.telemetry.is_fresh(chrono::Utc::now(), max_age);
    tracing::info!(
        fresh,
        position = snapshot.state.absolute_position_steps,
        position_mm = snapshot.position_mm,
        steps_remaining = snapshot.state.steps_remaining,
        motion = ?snapshot.motion,
        temperature_c = snapshot.environment.temperature_c,
        humidity_pct = snapshot.environment.humidity_pct,
        dew_point_c = snapshot.environment.dew_point_c,
        consecutive_failures = snapshot.telemetry.consecutive_failures,
        "Focuser"
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
