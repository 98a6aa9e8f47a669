//! CLI Entry Point for beamline-daq
//!
//! Provides command-line access to:
//! - The rotation-scan geometry computation (`geometry`)
//! - A full fly scan and camera exposure against the simulated backend (`simulate`)
//! - The default configuration (`config-template`)
//!
//! Documents are printed to stdout as one JSON object per line; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! beamline-daq geometry --steps-per-turn 8000 --theta0 10 --n-proj 161 --offset 1
//! beamline-daq simulate --n-series 1 --root-dir /tmp/proposal
//! beamline-daq config-template > config/beamline.toml
//! ```

use anyhow::{Context, Result};
use beamline_daq::config::BeamlineConfig;
use beamline_daq::flyer::{PandaFlyer, ScanGeometry, ScanParameters};
use beamline_daq::hardware::capabilities::{Stageable, Triggerable};
use beamline_daq::hardware::mock::{MockBus, MockCaptureTable};
use beamline_daq::hardware::panda::PandaBox;
use beamline_daq::logging::{self, OutputFormat, TracingConfig};
use beamline_daq::UvcCamera;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "beamline-daq")]
#[command(about = "PandABox fly-scan and USB camera device layer", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    /// Disable ANSI colors in log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the pulse-generator settings for a rotation scan
    Geometry {
        #[arg(long, default_value_t = 18000)]
        steps_per_turn: u32,
        /// Start angle in degrees
        #[arg(long, default_value_t = 30.0)]
        theta0: f64,
        #[arg(long, default_value_t = 181)]
        n_proj: u32,
        /// Start of the projection pulse train, subtracted from the start angle
        #[arg(long, default_value_t = 1000)]
        offset: i64,
    },

    /// Run one fly scan and one camera exposure against simulated hardware
    Simulate {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        n_proj: Option<u32>,
        #[arg(long)]
        n_series: Option<u32>,
        /// Asset root directory (overrides the configuration)
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// Simulated acquisition time in milliseconds
        #[arg(long, default_value_t = 200)]
        capture_ms: u64,
    },

    /// Print the default configuration as TOML
    ConfigTemplate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Geometry {
            steps_per_turn,
            theta0,
            n_proj,
            offset,
        } => {
            init_logging(&BeamlineConfig::default(), cli.log_format, cli.no_color)?;
            print_geometry(steps_per_turn, theta0, n_proj, offset)
        }
        Commands::Simulate {
            config,
            n_proj,
            n_series,
            root_dir,
            capture_ms,
        } => {
            let mut config = match config {
                Some(path) => BeamlineConfig::load_from(path)?,
                None => BeamlineConfig::load()?,
            };
            if let Some(n_proj) = n_proj {
                config.flyer.n_proj = n_proj;
            }
            if let Some(n_series) = n_series {
                config.flyer.n_series = n_series;
            }
            let root_dir = root_dir
                .or_else(|| config.flyer.root_dir.clone())
                .unwrap_or_else(std::env::temp_dir);
            config.flyer.root_dir.get_or_insert_with(|| root_dir.clone());
            config.camera.root_dir.get_or_insert(root_dir);
            config.validate()?;

            init_logging(&config, cli.log_format, cli.no_color)?;
            simulate(&config, Duration::from_millis(capture_ms)).await
        }
        Commands::ConfigTemplate => {
            print!("{}", BeamlineConfig::default_toml()?);
            Ok(())
        }
    }
}

fn init_logging(config: &BeamlineConfig, format: LogFormat, no_color: bool) -> Result<()> {
    let tracing_config = TracingConfig::from_config(config)
        .map_err(anyhow::Error::msg)?
        .with_format(format.into())
        .with_ansi(!no_color);
    logging::init(tracing_config).map_err(anyhow::Error::msg)
}

fn print_geometry(steps_per_turn: u32, theta0: f64, n_proj: u32, offset: i64) -> Result<()> {
    let geometry = ScanGeometry::compute(&ScanParameters {
        steps_per_turn,
        theta0,
        n_proj,
        n_series: 0,
        theta0_offset: offset,
        t_period: 0.00002,
    })?;
    println!("{}", serde_json::to_string_pretty(&geometry)?);
    Ok(())
}

fn emit(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn simulate(config: &BeamlineConfig, capture_time: Duration) -> Result<()> {
    let bus = MockBus::new();

    // Fly scan
    let panda = PandaBox::new(
        &config.panda.name,
        &config.panda.prefix,
        &bus,
        Arc::new(MockCaptureTable::rotation_scan()),
    );
    let active_pv = panda.pcap.active.name().to_string();
    let mut flyer = PandaFlyer::new(panda, &config.flyer).await?;
    emit(&json!({ "describe_collect": flyer.describe_collect() }))?;

    let mut session = flyer.kickoff().await?;
    let completion = session.complete()?;

    info!(capture_time = ?capture_time, "Simulating acquisition");
    bus.drive(&active_pv, 1);
    tokio::time::sleep(capture_time).await;
    bus.drive(&active_pv, 0);
    completion
        .wait_timeout(Duration::from_secs(5))
        .await
        .context("Simulated fly scan did not complete")?;

    for event in session.collect()? {
        emit(&json!({ "event": event }))?;
    }
    for doc in session.collect_asset_docs() {
        emit(&doc)?;
    }
    drop(session);

    // Camera exposure
    let camera = UvcCamera::new(&config.camera, &bus)?;
    bus.set_enum_labels(
        camera.cam.data_type.name(),
        &["Int8", "UInt8", "Int16", "UInt16", "Int32", "UInt32", "Float32", "Float64"],
    );
    bus.preset(camera.cam.data_type.name(), 1);
    bus.preset(camera.tiff.array_size_depth.name(), 640);
    bus.preset(camera.tiff.array_size_height.name(), 480);
    bus.preset(
        camera.tiff.full_file_name.name(),
        format!("{}/frame_000000.tiff", config.camera.write_path_template),
    );
    bus.reset_after_write(camera.cam.acquire.name(), 0, capture_time);

    emit(&json!({ "describe": camera.describe().await? }))?;
    camera.stage().await?;
    camera.trigger().await?;
    camera.unstage().await?;
    for doc in camera.collect_asset_docs().await {
        emit(&doc)?;
    }

    info!(writes = bus.journal().len(), "Simulation finished");
    Ok(())
}
