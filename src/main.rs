//! CLI Entry Point for surface_daq
//!
//! Provides command-line interface for:
//! - Acquiring one surface scan from the device over serial
//! - Analyzing a recorded sample log (center of mass, volume)
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Acquire a scan:
//! ```bash
//! surface_daq acquire --port /dev/ttyACM0
//! ```
//!
//! Analyze a log:
//! ```bash
//! surface_daq analyze Data/Distances_03_09_24_14_05_07.csv --spline cubic --mass-kg 0.25
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use surface_daq::analysis::{self, energy, spline::SplineDegree};
use surface_daq::config::Settings;
use surface_daq::data::grid::GridReconstructor;
use surface_daq::data::sample::read_samples_csv;
use surface_daq::data::storage::CsvRecorder;
use surface_daq::logging;
use surface_daq::protocol::Session;
use surface_daq::transport::SerialTransport;
use tracing::info;

#[derive(Parser)]
#[command(name = "surface_daq")]
#[command(about = "Surface scan acquisition and analysis", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/scan.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition session and write the sample log
    Acquire {
        /// Serial device, overrides `serial.port`
        #[arg(long)]
        port: Option<String>,
    },

    /// Reconstruct and analyze a recorded sample log
    Analyze {
        /// Path to the sample log CSV
        log: PathBuf,

        /// Sensor mounting offset in mm, overrides `analysis.reference_height_mm`
        #[arg(long)]
        reference_height: Option<f64>,

        /// Interpolation for the volume integral
        #[arg(long, value_enum)]
        spline: Option<SplineDegree>,

        /// Mass of the dropped body in kg, enables the energy report
        #[arg(long)]
        mass_kg: Option<f64>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    logging::init_from_settings(&settings).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Acquire { port } => acquire(settings, port),
        Commands::Analyze {
            log,
            reference_height,
            spline,
            mass_kg,
        } => analyze(&settings, &log, reference_height, spline, mass_kg),
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Settings::load().context("Failed to load configuration")?,
    };
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn acquire(mut settings: Settings, port: Option<String>) -> Result<()> {
    if let Some(port) = port {
        settings.serial.port = port;
    }

    let recorder = CsvRecorder::create(&settings.storage.data_dir, Local::now())?
        .with_sidecar(settings.storage.write_sidecar);
    let log_path = recorder.log_path().to_path_buf();

    let transport = SerialTransport::open(&settings.serial.port, settings.serial.baud_rate)
        .with_context(|| format!("Failed to open serial port {}", settings.serial.port))?
        .with_read_timeout(settings.serial.read_timeout());

    let mut session = Session::from_settings(transport, recorder, &settings);
    let summary = session.run().context("Acquisition session failed")?;

    println!("Session complete");
    println!("  Handshake attempts: {}", summary.handshake_attempts);
    println!("  Records:            {}", summary.records);
    println!("  Streaming time:     {:.1} s", summary.streaming_time.as_secs_f64());
    println!("  Sample log:         {}", log_path.display());
    Ok(())
}

fn analyze(
    settings: &Settings,
    log: &Path,
    reference_height: Option<f64>,
    spline: Option<SplineDegree>,
    mass_kg: Option<f64>,
) -> Result<()> {
    let reference_height = reference_height.unwrap_or(settings.analysis.reference_height_mm);
    let degree = spline.unwrap_or(settings.analysis.spline_degree);

    let samples = read_samples_csv(log)
        .with_context(|| format!("Failed to read sample log {}", log.display()))?;
    info!(samples = samples.len(), "Loaded sample log");

    let grid = GridReconstructor::new(reference_height).reconstruct(&samples)?;
    let (_, rows, cols) = grid.shape();

    let com = analysis::center_of_mass(&grid)?;
    let volume = analysis::volume(&grid, degree)?;
    let bars = analysis::bar_volume(&grid);

    println!("Grid:            {} x {} mm ({} samples)", cols, rows, samples.len());
    println!("Center of mass:  x = {:.3} mm, y = {:.3} mm, z = {:.3} mm", com.x, com.y, com.z);
    println!("Volume ({}):  {:.3} mm^3", degree, volume);
    println!("Volume (bars):   {:.3} mm^3", bars);

    if let Some(mass_kg) = mass_kg {
        let height_m = com.z / 1000.0;
        let potential = energy::potential_energy(mass_kg, height_m)?;
        println!("Potential energy: {:.6} J", potential);
        match energy::impact_velocity(potential, mass_kg)? {
            Some(velocity) => println!("Impact velocity:  {:.4} m/s", velocity),
            None => println!("Impact velocity:  n/a (center of mass below the reference plane)"),
        }
    }
    Ok(())
}
