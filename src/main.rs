//! CLI entry point for the fiber spectrograph controller.
//!
//! # Usage
//!
//! List attached devices:
//! ```bash
//! fiber-spectrograph list
//! ```
//!
//! Take a 2.5 s flat with the simulator and write it to `./data`:
//! ```bash
//! fiber-spectrograph --simulate expose --duration 2.5 --type flat --source lamp --output data
//! ```
//!
//! Ctrl-C during an exposure stops the measurement and exits without a file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fiber_spectrograph::config::{SpectrographConfig, DEFAULT_CONFIG_PATH};
use fiber_spectrograph::hardware::{AvsDriver, ConnectionManager, MockAvsDriver};
use fiber_spectrograph::tracing_setup::{self, OutputFormat, TracingConfig};
use fiber_spectrograph::{ExposureRequest, ExposureResult, FiberSpectrograph};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Serial number reported by the simulator when none is configured.
const SIMULATOR_SERIAL: &str = "SIM0000001";

#[derive(Parser)]
#[command(name = "fiber-spectrograph")]
#[command(about = "Control an Avantes fiber spectrograph and record exposures", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the in-process simulator instead of libavs
    #[arg(long, global = true)]
    simulate: bool,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached spectrographs
    List,

    /// Connect and print device information and temperatures
    Status {
        /// Serial number of the device (overrides the configured device)
        #[arg(long)]
        serial: Option<String>,
    },

    /// Take one exposure and write it as a FITS file
    Expose {
        /// Integration time in seconds
        #[arg(long)]
        duration: f64,

        /// Measurement type tag
        #[arg(long = "type", default_value = "test")]
        exposure_type: String,

        /// Light source tag
        #[arg(long, default_value = "unknown")]
        source: String,

        /// Serial number of the device (overrides the configured device)
        #[arg(long)]
        serial: Option<String>,

        /// Output directory (overrides storage.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SpectrographConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.simulation.enabled |= cli.simulate;
    match &cli.command {
        Commands::Status { serial } => apply_overrides(&mut config, serial.clone(), None),
        Commands::Expose { serial, output, .. } => {
            apply_overrides(&mut config, serial.clone(), output.clone());
        }
        Commands::List => {}
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    tracing_setup::init(tracing_config).map_err(anyhow::Error::msg)?;

    let driver = make_driver(&config)?;
    match cli.command {
        Commands::List => list_devices(driver),
        Commands::Status { .. } => print_status(driver, &config),
        Commands::Expose {
            duration,
            exposure_type,
            source,
            ..
        } => {
            let request = ExposureRequest::new(duration, exposure_type, source);
            expose(driver, &config, request).await
        }
    }
}

fn apply_overrides(config: &mut SpectrographConfig, serial: Option<String>, output: Option<PathBuf>) {
    if serial.is_some() {
        config.device.serial_number = serial;
    }
    if output.is_some() {
        config.storage.output_dir = output;
    }
}

fn make_driver(config: &SpectrographConfig) -> Result<Box<dyn AvsDriver>> {
    if config.simulation.enabled {
        let serial = config
            .serial_number()
            .unwrap_or_else(|| SIMULATOR_SERIAL.to_owned());
        tracing::info!(%serial, "Using simulated spectrograph");
        return Ok(Box::new(MockAvsDriver::simulator(&serial, "Simulated AvaSpec")));
    }
    hardware_driver()
}

#[cfg(feature = "avaspec_hardware")]
fn hardware_driver() -> Result<Box<dyn AvsDriver>> {
    Ok(Box::new(fiber_spectrograph::hardware::AvaspecDriver::new()))
}

#[cfg(not(feature = "avaspec_hardware"))]
fn hardware_driver() -> Result<Box<dyn AvsDriver>> {
    anyhow::bail!("built without the avaspec_hardware feature; rerun with --simulate")
}

fn list_devices(driver: Box<dyn AvsDriver>) -> Result<()> {
    let mut manager = ConnectionManager::new(driver);
    let devices = manager.enumerate().context("enumerating devices")?;
    for device in &devices {
        println!("{device}");
    }
    manager.disconnect();
    Ok(())
}

fn print_status(driver: Box<dyn AvsDriver>, config: &SpectrographConfig) -> Result<()> {
    let mut spectrograph = FiberSpectrograph::open(driver, config).context("connecting")?;
    let status = spectrograph.status(true).context("reading device status")?;
    let active = spectrograph.connection().active()?;

    println!("Device:        {}", active.identity);
    println!("Pixels:        {}", status.n_pixels);
    println!("FPGA:          {}", status.fpga_version);
    println!("Firmware:      {}", status.firmware_version);
    println!("Library:       {}", status.library_version);
    println!("Temperature:   {:.2} degC", status.temperature);
    println!("Setpoint:      {:.2} degC", status.temperature_setpoint);

    spectrograph.close();
    Ok(())
}

async fn expose(
    driver: Box<dyn AvsDriver>,
    config: &SpectrographConfig,
    request: ExposureRequest,
) -> Result<()> {
    let mut spectrograph = FiberSpectrograph::open(driver, config).context("connecting")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling exposure");
            on_ctrl_c.cancel();
        }
    });

    let result = spectrograph
        .expose_with_timeout(&request, &cancel)
        .await
        .context("taking exposure");
    spectrograph.close();

    match result? {
        ExposureResult::Saved {
            path: Some(path), ..
        } => println!("{}", path.display()),
        ExposureResult::Saved {
            file_name,
            path: None,
        } => println!("{file_name} (not written: no output directory configured)"),
        ExposureResult::Cancelled => println!("Exposure cancelled"),
    }
    Ok(())
}
