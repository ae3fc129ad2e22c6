//! `scope`: drive the microscope control core from the command line.
//!
//! Every command runs against the simulated microcontroller and cameras, set
//! up from the loaded configuration.
//!
//! ```bash
//! scope --config scope.toml acquire --grid 3x3x1 --channel "BF LED matrix full"
//! scope slide loading
//! RUST_LOG=scope_control=debug scope --log-format json autofocus
//! ```
//!
//! A stage that stalls past its timeout ends the process with status 2.

// Global allocator (M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod logging;
mod rig;

use anyhow::{bail, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use logging::{LoggingOptions, OutputFormat};
use scope_control::{Microscope, ScanPlan, WellId, WellplateFormat};
use scope_core::{ScopeConfig, ScopeError};
use scope_storage::ExperimentLayout;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status for a hardware timeout.
const EXIT_HARDWARE_TIMEOUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "scope")]
#[command(about = "Motorized microscope control on simulated hardware", long_about = None)]
struct Cli {
    /// Configuration file (TOML). `SCOPE_` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty, global = true)]
    log_format: OutputFormat,

    /// Log span open and close
    #[arg(long, global = true)]
    log_spans: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a multi-point acquisition
    Acquire(AcquireArgs),

    /// Run one contrast autofocus at the current position
    Autofocus,

    /// Move the slide holder
    #[command(subcommand)]
    Slide(SlideCommand),

    /// Reflection autofocus
    #[command(subcommand)]
    LaserAf(LaserAfCommand),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum SlideCommand {
    /// Move to the loading position
    Loading,
    /// Move to the scanning position
    Scanning,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum LaserAfCommand {
    /// Calibrate around the current plane and make it the reference
    Calibrate,
    /// Report the displacement from the reference plane
    Measure,
}

#[derive(clap::Args, Debug)]
struct AcquireArgs {
    /// Experiment name; a timestamp is appended
    #[arg(long, default_value = "acquisition")]
    name: String,

    /// NXxNYxNZ fields of view and planes
    #[arg(long, default_value = "1x1x1", value_parser = parse_grid)]
    grid: (u32, u32, u32),

    /// X, Y step in mm
    #[arg(long, default_value_t = 0.9)]
    dx: f64,
    #[arg(long, default_value_t = 0.9)]
    dy: f64,

    /// Z step in µm
    #[arg(long, default_value_t = 1.5)]
    dz: f64,

    /// Number of time points
    #[arg(long, default_value_t = 1)]
    nt: u32,

    /// Time-point interval in seconds
    #[arg(long, default_value_t = 0.0)]
    dt: f64,

    /// Channel configuration names, imaged in order
    #[arg(long = "channel", default_value = "BF LED matrix full")]
    channels: Vec<String>,

    /// Contrast autofocus during the scan
    #[arg(long)]
    af: bool,

    /// Reflection autofocus at every field of view
    #[arg(long)]
    laser_af: bool,

    /// Plate format for --wells (6, 12, 24, 96 or 384)
    #[arg(long, default_value_t = 96)]
    plate: u32,

    /// Wells to visit, e.g. A1,B3
    #[arg(long, value_delimiter = ',')]
    wells: Vec<WellId>,
}

fn parse_grid(s: &str) -> Result<(u32, u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    let [nx, ny, nz] = parts.as_slice() else {
        return Err(format!("expected NXxNYxNZ, got '{s}'"));
    };
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("'{v}': {e}"));
    Ok((parse(nx)?, parse(ny)?, parse(nz)?))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(LoggingOptions {
        format: cli.log_format,
        span_events: cli.log_spans,
        ..LoggingOptions::default()
    }) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let timeout = matches!(
                e.downcast_ref::<ScopeError>(),
                Some(ScopeError::HardwareTimeout { .. })
            );
            error!(error = %format!("{e:#}"), "Command failed");
            if timeout {
                ExitCode::from(EXIT_HARDWARE_TIMEOUT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ScopeConfig::load(cli.config.as_deref())?;
    if let Command::Config = cli.command {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let scope = rig::simulated_microscope(config).await?;
    match cli.command {
        Command::Acquire(args) => acquire(&scope, args).await,
        Command::Autofocus => autofocus(&scope).await,
        Command::Slide(target) => slide(&scope, target).await,
        Command::LaserAf(command) => laser_af(&scope, command).await,
        Command::Config => Ok(()),
    }
}

async fn acquire(scope: &Microscope, args: AcquireArgs) -> Result<()> {
    let names: Vec<&str> = args.channels.iter().map(String::as_str).collect();
    let channels = scope.configurations.select(&names)?;
    let experiment_id = ExperimentLayout::timestamped_id(&args.name, Local::now());
    let (nx, ny, nz) = args.grid;

    let mut plan = ScanPlan::new(
        experiment_id,
        scope.config.storage.base_path.clone(),
        channels,
    )
    .grid(nx, ny, nz)
    .steps(args.dx, args.dy, args.dz)
    .time_points(args.nt, args.dt);
    plan.contrast_af = args.af;
    plan.laser_af = args.laser_af;
    plan.z_stacking = scope.config.acquisition.z_stacking;
    if !args.wells.is_empty() {
        let Some(format) = WellplateFormat::standard(args.plate) else {
            bail!("unsupported plate format: {} wells", args.plate);
        };
        plan = plan.with_coordinates(format.well_coordinates(&args.wells)?);
    }

    let handle = scope.multipoint.start_acquisition(plan).await?;
    let abort = handle.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, aborting acquisition");
            abort.abort();
        }
    });
    let report = handle.join().await;
    ctrl_c.abort();
    let report = report?;

    info!(
        dir = %report.experiment_dir.display(),
        images = report.images_written,
        time_points = report.time_points_run,
        skipped = report.time_points_skipped,
        frame_failures = report.frame_failures,
        aborted = report.aborted,
        "Acquisition done"
    );
    println!("{}", report.experiment_dir.display());
    Ok(())
}

async fn autofocus(scope: &Microscope) -> Result<()> {
    let outcome = scope.autofocus.autofocus().await?;
    let z_um = scope.navigation.position().z_um();
    info!(
        best_index = outcome.best_index,
        planes = outcome.series.len(),
        at_range_edge = outcome.at_range_edge,
        z_um,
        "Autofocus done"
    );
    println!("{z_um:.3}");
    Ok(())
}

async fn slide(scope: &Microscope, target: SlideCommand) -> Result<()> {
    match target {
        SlideCommand::Loading => scope.slide.move_to_loading_position().await?,
        SlideCommand::Scanning => scope.slide.move_to_scanning_position().await?,
    }
    println!("{:?}", scope.slide.slide_position());
    Ok(())
}

async fn laser_af(scope: &Microscope, command: LaserAfCommand) -> Result<()> {
    let Some(laser) = scope.laser_af.as_ref() else {
        bail!("no focus camera configured");
    };
    let _guard = laser.claim()?;
    match command {
        LaserAfCommand::Calibrate => {
            let calibration = laser.initialize_auto().await?;
            laser.set_reference().await?;
            info!(
                pixel_to_um = calibration.pixel_to_um,
                x_offset = calibration.x_offset,
                y_offset = calibration.y_offset,
                "Laser AF calibrated"
            );
            println!("{:.4} um/px", calibration.pixel_to_um);
        }
        LaserAfCommand::Measure => {
            if !laser.is_initialized() {
                bail!("laser AF is not calibrated; run `scope laser-af calibrate` first");
            }
            let displacement = laser.measure_displacement().await?;
            println!("{displacement:.3}");
        }
    }
    Ok(())
}
