// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use usb_camera::Resolution;
use usb_camera::constants::app_info;

mod cli;

#[derive(Parser)]
#[command(name = "usb-camera")]
#[command(about = "Hot-pluggable USB camera session manager")]
#[command(version = app_info::version())]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/usb-camera/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the devices a session would see
    List {
        /// Number of simulated cameras on the bus
        #[arg(short, long, default_value = "2")]
        devices: u32,
    },

    /// Replay a hot-plug session against simulated cameras
    Simulate {
        /// Number of simulated cameras to plug in
        #[arg(short, long, default_value = "1")]
        devices: u32,

        /// Initial preview resolution, e.g. 1280x720
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Switch to this resolution once preview is running
        #[arg(long)]
        switch_to: Option<Resolution>,

        /// Record a clip while previewing
        #[arg(long)]
        record: bool,

        /// Recording duration in seconds (default: until the scenario stops it)
        #[arg(long, requires = "record")]
        duration: Option<u64>,

        /// Enable audio recording
        #[arg(short, long, requires = "record")]
        audio: bool,

        /// Leave the permission prompt unanswered
        #[arg(long)]
        deny: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=usb_camera=trace
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { devices } => cli::list_devices(config, devices),
        Commands::Simulate {
            devices,
            resolution,
            switch_to,
            record,
            duration,
            audio,
            deny,
        } => cli::simulate(
            config,
            cli::SimulateOptions {
                devices,
                resolution,
                switch_to,
                record,
                duration,
                audio,
                deny,
            },
        ),
    }
}
