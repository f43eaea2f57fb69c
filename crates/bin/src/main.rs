//! CLI Entry Point for the Sepia2 chassis driver
//!
//! Provides command-line access to:
//! - Listing chassis attached to the host
//! - Printing the status of every module
//! - Starting and stopping lasers, engaging the softlock
//!
//! The CLI drives an in-memory chassis; the same commands work against any
//! [`Transport`] implementation.
//!
//! # Usage
//!
//! ```bash
//! sepia2 list
//! sepia2 --device 0 status --json
//! sepia2 start 0 --frequency 27 --intensity 50 --delay 12
//! RUST_LOG=debug sepia2 --config config/chassis.toml stop
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_sepia::sim::{SimDevice, SimulatedTransport};
use daq_driver_sepia::{list_devices, load_chassis_config, Chassis, ChassisStatus, Transport};
use tracing::info;

#[derive(Parser)]
#[command(name = "sepia2")]
#[command(about = "Control a Sepia2 laser driver chassis", long_about = None)]
struct Cli {
    /// Chassis configuration file (TOML format)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// USB device index, overrides the configuration
    #[arg(long, global = true)]
    device: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached chassis
    List,

    /// Print the status of every module
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Start one laser from the internal clock and release the softlock
    Start {
        /// Laser index, also used as the sequencer channel
        laser: usize,

        /// Repetition rate in MHz
        #[arg(long, default_value = "80")]
        frequency: f64,

        /// Intensity in percent
        #[arg(long)]
        intensity: f64,

        /// Coarse output delay in ns (SOMD only)
        #[arg(long)]
        delay: Option<f64>,
    },

    /// Disable all oscillator outputs and engage the softlock
    Stop,

    /// Engage the softlock
    Lock,

    /// Release the softlock
    Unlock,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = load_chassis_config(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.device_index = device;
        config.validate().context("Invalid --device argument")?;
    }

    let transport: Arc<dyn Transport> = Arc::new(SimulatedTransport::with_device(
        config.device_index,
        SimDevice::standard(),
    ));

    match cli.command {
        Commands::List => {
            let devices = list_devices(transport.as_ref());
            if devices.is_empty() {
                println!("No devices found");
            }
            for device in devices {
                println!(
                    "{}: {} (serial {})",
                    device.index, device.product_model, device.serial_number
                );
            }
            Ok(())
        }
        Commands::Status { json } => {
            let chassis = Chassis::open(transport, &config)?;
            let status = chassis.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            chassis.close()?;
            Ok(())
        }
        Commands::Start {
            laser,
            frequency,
            intensity,
            delay,
        } => {
            let chassis = Chassis::open(transport, &config)?;
            let report = chassis
                .start_laser_simple(laser, frequency, intensity, delay)
                .with_context(|| format!("Failed to start laser {laser}"))?;
            if let Some(clock) = report.actual_frequency {
                println!(
                    "Laser {laser} running at {:.3} MHz (divider {})",
                    clock.actual_mhz, clock.divider
                );
            }
            if let Some(applied) = report.applied_delay {
                println!(
                    "Delay {:.2} ns, {} fine steps",
                    applied.coarse_ns, applied.fine_steps
                );
            }
            // Explicit close keeps the lasers running.
            chassis.close()?;
            info!(laser, "Laser started");
            Ok(())
        }
        Commands::Stop => {
            let chassis = Chassis::open(transport, &config)?;
            chassis.stop_lasers()?;
            println!("Outputs disabled, softlock engaged");
            Ok(())
        }
        Commands::Lock => {
            let chassis = Chassis::open(transport, &config)?;
            chassis.lock()?;
            chassis.close()?;
            Ok(())
        }
        Commands::Unlock => {
            let chassis = Chassis::open(transport, &config)?;
            chassis.unlock()?;
            chassis.close()?;
            Ok(())
        }
    }
}

fn print_status(status: &ChassisStatus) {
    println!(
        "{} (serial {}) at index {}, firmware {}",
        status.product_model, status.serial_number, status.device_index, status.firmware_version
    );
    println!("Library {}", status.library_version);
    for module in &status.modules {
        println!(
            "  slot {:03}: {}{}",
            module.slot_id,
            module.module_type,
            if module.is_primary { "" } else { " (secondary)" }
        );
    }
    if let Some(safety) = &status.safety {
        println!(
            "Safety: soft lock {}, laser locked {}",
            safety.soft_locked, safety.laser_locked
        );
    }
    if let Some(osc) = &status.oscillator {
        println!("Oscillator: {}", osc.trigger_mode_name);
        if let Some(clock) = osc.clock_mhz {
            println!("  clock {clock:.3} MHz");
        }
        for channel in &osc.channels {
            println!("  channel {}: {}", channel.channel, channel.description);
        }
    }
    for laser in &status.lasers {
        match serde_json::to_string(laser) {
            Ok(line) => println!("Laser: {line}"),
            Err(err) => println!("Laser: <{err}>"),
        }
    }
}
