//! `wfs-daq`: hardware-timed acquisition with a Thorlabs wavefront sensor.
//!
//! ```bash
//! wfs-daq list
//! wfs-daq info --index 0
//! wfs-daq acquire --duration 10 --output shot.h5 --format hdf5
//! wfs-daq acquire --mock --duration 2 --records 20
//! ```
//!
//! Log verbosity follows `RUST_LOG`.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daq_bin::{OutputFormat, Settings};
use daq_core::capabilities::{BufferedDevice, RunOutcome};
use daq_driver_thorlabs_wfs::{CameraModel, WfsConfig, WfsDriver};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "wfs-daq")]
#[command(about = "Triggered wavefront acquisition with Thorlabs WFS sensors", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated sensor instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected sensors
    List,

    /// Show instrument, micro-lens array and resolution details
    Info {
        /// Position in the instrument list
        #[arg(long)]
        index: Option<i32>,
    },

    /// Record triggered frames for a fixed time
    Acquire {
        /// Run length in seconds
        #[arg(long)]
        duration: f64,

        /// Stop after this many records
        #[arg(long)]
        records: Option<usize>,

        /// Output file
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Group the run is stored under
        #[arg(long)]
        group: Option<String>,
    },
}

#[cfg(feature = "mock")]
fn mock_driver(config: WfsConfig) -> Result<WfsDriver> {
    use daq_driver_thorlabs_wfs::MockWfs;
    // About 50 idle polls between frames, like a slow external trigger.
    let mock = MockWfs::new().trigger_pattern(std::iter::repeat(50).take(100_000));
    Ok(WfsDriver::mock(mock, config)?)
}

#[cfg(not(feature = "mock"))]
fn mock_driver(_config: WfsConfig) -> Result<WfsDriver> {
    bail!("wfs-daq was built without the `mock` feature")
}

#[cfg(feature = "hardware")]
fn hardware_driver(config: WfsConfig) -> Result<WfsDriver> {
    Ok(WfsDriver::hardware(config)?)
}

#[cfg(not(feature = "hardware"))]
fn hardware_driver(_config: WfsConfig) -> Result<WfsDriver> {
    bail!("wfs-daq was built without the `hardware` feature; pass --mock")
}

fn driver(mock: bool, config: WfsConfig) -> Result<WfsDriver> {
    if mock {
        mock_driver(config)
    } else {
        hardware_driver(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::List => list(cli.mock, settings).await,
        Commands::Info { index } => show_info(cli.mock, settings, index).await,
        Commands::Acquire {
            duration,
            records,
            output,
            format,
            group,
        } => {
            let mut settings = settings;
            if let Some(path) = output {
                settings.output.path = path;
            }
            if let Some(format) = format {
                settings.output.format = format;
            }
            if let Some(group) = group {
                settings.output.group = group;
            }
            acquire(cli.mock, settings, duration, records).await
        }
    }
}

async fn list(mock: bool, settings: Settings) -> Result<()> {
    let driver = driver(mock, settings.sensor)?;
    let instruments = driver
        .list_instruments()
        .await
        .context("failed to enumerate sensors")?;
    if instruments.is_empty() {
        println!("No wavefront sensors found");
        return Ok(());
    }
    println!("{:<6} {:<10} {:<8} {:<14} {:<12} STATE", "INDEX", "DEVICE", "MODEL", "NAME", "SERIAL");
    for entry in instruments {
        println!(
            "{:<6} 0x{:<8X} {:<8} {:<14} {:<12} {}",
            entry.index,
            entry.device_id,
            CameraModel::from_device_id(entry.device_id),
            entry.name,
            entry.serial,
            if entry.in_use { "in use" } else { "free" }
        );
    }
    Ok(())
}

async fn show_info(mock: bool, settings: Settings, index: Option<i32>) -> Result<()> {
    let mut config = settings.sensor;
    if let Some(index) = index {
        config.instrument_index = index;
    }
    let driver = driver(mock, config)?;
    driver.init().await.context("failed to open sensor")?;

    let report = async {
        if let Some(info) = driver.instrument_info().await {
            println!("Manufacturer:  {}", info.manufacturer);
            println!("Instrument:    {}", info.name);
            println!("Serial (WFS):  {}", info.serial_wfs);
            println!("Serial (cam):  {}", info.serial_camera);
            println!("Driver:        {}", info.driver_revision);
            println!("Firmware:      {}", info.firmware_revision);
        }
        println!();
        println!("Micro-lens arrays:");
        for mla in driver.mla_list().await? {
            println!(
                "  [{}] {:<14} lenslet pitch {:>7.1} um, focal length {:>8.1} um",
                mla.index, mla.name, mla.lenslet_pitch_um, mla.lenslet_f_um
            );
        }
        if let Some(model) = driver.camera_model().await {
            println!();
            println!("Resolutions ({model}):");
            for (i, resolution) in model.resolutions().iter().enumerate() {
                println!("  [{i}] {resolution}");
            }
        }
        anyhow::Ok(())
    }
    .await;

    driver.shutdown().await.context("failed to close sensor")?;
    report
}

async fn acquire(mock: bool, settings: Settings, duration: f64, records: Option<usize>) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        bail!("--duration must be a positive number of seconds");
    }
    let sink = settings.output.open_sink()?;
    let driver = driver(mock, settings.sensor)?;
    driver.init().await.context("failed to open sensor")?;

    let group = settings.output.group.as_str();
    if let Err(err) = driver.start_run(sink, group, records).await {
        driver.shutdown().await.ok();
        return Err(err).context("failed to start acquisition");
    }
    info!(duration_s = duration, records, group, "Waiting for triggers");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(duration)) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping run"),
    }

    let outcome = driver.transition_to_manual(false).await;
    let closed = driver.shutdown().await;
    match outcome.context("acquisition failed")? {
        RunOutcome::Records(count) => println!(
            "Wrote {count} record(s) to {} under '{group}'",
            settings.output.path.display()
        ),
        RunOutcome::NoRecords => println!("No trigger received; nothing written"),
        RunOutcome::Aborted => println!("Run aborted"),
    }
    closed.context("failed to close sensor")
}
