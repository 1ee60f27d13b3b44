//! WAP Pipeline - Waveform Acceleration Processing
//!
//! Batch processor for raw triaxial accelerometer recordings.
//!
//! # Usage
//!
//! ```bash
//! # Process every file in a job file with the built-in defaults
//! wap-pipeline --job-file jobs.csv --results ./results
//!
//! # Worker 2 of 4 over the same job file
//! wap-pipeline --job-file jobs.csv --job-num 2 --num-jobs 4
//!
//! # Explicit configuration
//! wap-pipeline --config wap_config.toml
//!
//! # Print the effective configuration and exit
//! wap-pipeline --print-config
//! ```
//!
//! # Environment Variables
//!
//! - `WAP_CONFIG`: Path to a TOML config file (when `--config` is not given)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use wap_pipeline::config::PipelineConfig;
use wap_pipeline::pipeline::{read_job_file, run_batch};
use wap_pipeline::types::DeviceType;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "wap-pipeline")]
#[command(about = "Accelerometer QC, calibration and epoch statistics")]
#[command(version)]
struct CliArgs {
    /// Job file with `pid,filename[,device]` rows (overrides `io.job_file`)
    #[arg(long, env = "WAP_JOB_FILE")]
    job_file: Option<PathBuf>,

    /// Results folder (overrides `io.results_folder`)
    #[arg(long)]
    results: Option<PathBuf>,

    /// This worker's 1-based index
    #[arg(long, default_value = "1")]
    job_num: usize,

    /// Total number of workers sharing the job file
    #[arg(long, default_value = "1")]
    num_jobs: usize,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device family for files whose job row names none (overrides `device.device_type`)
    #[arg(long)]
    device: Option<DeviceType>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Load the config and fold the command-line overrides into it.
fn build_config(args: &CliArgs) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::load(),
    };

    if let Some(job_file) = &args.job_file {
        cfg.io.job_file = Some(job_file.clone());
    }
    if let Some(results) = &args.results {
        cfg.io.results_folder = results.clone();
    }
    if let Some(device) = args.device {
        cfg.device.device_type = device;
    }

    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let cfg = build_config(&args)?;

    if args.print_config {
        println!("{}", cfg.to_toml()?);
        return Ok(());
    }

    let Some(job_file) = cfg.io.job_file.clone() else {
        bail!("No job file given: pass --job-file or set io.job_file");
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  WAP Pipeline - Waveform Acceleration Processing");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Device: {} | Resolutions: {:?} min | Results: {}",
        cfg.device.device_type,
        cfg.processing.epoch_minutes,
        cfg.io.results_folder.display()
    );

    let jobs = read_job_file(&job_file)
        .with_context(|| format!("Failed to read job file {}", job_file.display()))?;
    if jobs.is_empty() {
        warn!(job_file = %job_file.display(), "Job file lists no recordings");
    }

    let summary = run_batch(&jobs, &cfg, args.job_num, args.num_jobs)?;
    info!("✓ {summary}");
    Ok(())
}
