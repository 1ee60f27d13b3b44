//! Accelerometer Recording Simulation
//!
//! Generates a synthetic wrist recording in the decoded-sample CSV format
//! for exercising WAP Pipeline end to end. The recording contains:
//! - Wear time alternating between held postures and rhythmic movement
//! - A still, flat nonwear block
//! - A block of missing-value samples
//! - A known gain/offset error on every axis
//! - Page timestamp faults (a one-page spike and a forward clock jump)
//!
//! A job file and a JSON truth sidecar are written next to the CSV.
//!
//! # Usage
//! ```bash
//! ./simulation --hours 6 --seed 7 --output ./sim
//! ./wap-pipeline --job-file ./sim/jobs.csv --results ./sim/results
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDateTime};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use wap_pipeline::types::{AnomalyType, AxisCalibration, CalibrationParameters, DeviceType};

// ============================================================================
// Scenario Constants
// ============================================================================

/// Length of one posture or movement segment (seconds)
const SEGMENT_SECONDS: f64 = 60.0;
/// Share of wear segments spent holding a posture
const POSTURE_SHARE: f64 = 0.6;
/// Sensor noise while worn and still (g)
const POSTURE_NOISE_G: f64 = 0.003;
/// Sensor noise while moving (g)
const MOVEMENT_NOISE_G: f64 = 0.02;
/// Sensor noise while off the body (g)
const NONWEAR_NOISE_G: f64 = 0.001;
/// Nonwear block length (minutes)
const NONWEAR_MINUTES: i64 = 90;
/// Missing-value block length (minutes)
const MISSING_MINUTES: i64 = 20;
/// Sentinel written into missing samples
const MISSING_VALUE: f64 = -111.0;
/// Size of the one-page timestamp spike (seconds)
const SPIKE_SECONDS: f64 = 10.0;
/// Size of the forward clock jump (seconds)
const JUMP_SECONDS: f64 = 30.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "wap-simulation")]
#[command(about = "Synthetic accelerometer recordings for WAP Pipeline testing")]
#[command(version = "1.0")]
struct Args {
    /// Output directory for the recording, job file and truth sidecar
    #[arg(short, long, default_value = "sim")]
    output: PathBuf,

    /// Participant identifier
    #[arg(long, default_value = "SIM001")]
    pid: String,

    /// Recording length in hours (3-72)
    #[arg(short = 'H', long, default_value = "6", value_parser = clap::value_parser!(u32).range(3..=72))]
    hours: u32,

    /// Sampling frequency in Hz
    #[arg(short, long, default_value = "25", value_parser = clap::value_parser!(u32).range(1..=200))]
    frequency: u32,

    /// Samples per page (one timestamp per page)
    #[arg(long, default_value = "300")]
    page_samples: usize,

    /// Device family written into the header
    #[arg(long, default_value = "axivity")]
    device: DeviceType,

    /// Largest gain error applied to an axis (fraction)
    #[arg(long, default_value = "0.03")]
    gain_error: f64,

    /// Largest offset error applied to an axis (g)
    #[arg(long, default_value = "0.05")]
    offset_error: f64,

    /// Write clean page timestamps
    #[arg(long)]
    no_faults: bool,

    /// Recording start (YYYY-MM-DD HH:MM:SS)
    #[arg(long, default_value = "2021-03-01 09:00:00")]
    start: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Truth Sidecar
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct Interval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
struct InjectedFault {
    anomaly_type: AnomalyType,
    page: usize,
    shift_seconds: f64,
}

/// What the pipeline should find in the generated recording.
#[derive(Debug, Clone, Serialize)]
struct SimulationTruth {
    pid: String,
    device: DeviceType,
    frequency: u32,
    start: NaiveDateTime,
    samples: usize,
    page_samples: usize,
    /// Correction that maps the written values back to true acceleration
    calibration: CalibrationParameters,
    nonwear: Interval,
    missing: Interval,
    faults: Vec<InjectedFault>,
}

// ============================================================================
// Signal Model
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Segment {
    Posture { gravity: [f64; 3] },
    Movement { gravity: [f64; 3], amplitude: f64, rate_hz: f64 },
}

struct Simulator {
    rng: StdRng,
    unit: Normal<f64>,
    frequency: f64,
    segments: Vec<Segment>,
    nonwear: (f64, f64),
    missing: (f64, f64),
    /// Device error: written = (true - offset) / gain
    error: CalibrationParameters,
}

impl Simulator {
    fn new(args: &Args) -> Result<Self> {
        let mut rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let unit = Normal::new(0.0, 1.0).map_err(|e| anyhow!("Invalid distribution: {e}"))?;

        let total = f64::from(args.hours) * 3600.0;
        let n_segments = (total / SEGMENT_SECONDS).ceil() as usize;
        let mut segments = Vec::with_capacity(n_segments);
        for _ in 0..n_segments {
            let gravity = random_unit(&mut rng, &unit);
            if rng.gen_bool(POSTURE_SHARE) {
                segments.push(Segment::Posture { gravity });
            } else {
                segments.push(Segment::Movement {
                    gravity,
                    amplitude: rng.gen_range(0.1..0.6),
                    rate_hz: rng.gen_range(0.8..2.5),
                });
            }
        }

        let axis_error = |rng: &mut StdRng| AxisCalibration {
            gain: 1.0 + rng.gen_range(-args.gain_error..=args.gain_error),
            offset: rng.gen_range(-args.offset_error..=args.offset_error),
        };
        let error = CalibrationParameters::from_axes([
            axis_error(&mut rng),
            axis_error(&mut rng),
            axis_error(&mut rng),
        ]);

        let nonwear_start = (total * 0.35 / SEGMENT_SECONDS).floor() * SEGMENT_SECONDS;
        let missing_start = (total * 0.70 / SEGMENT_SECONDS).floor() * SEGMENT_SECONDS;
        Ok(Self {
            rng,
            unit,
            frequency: f64::from(args.frequency),
            segments,
            nonwear: (nonwear_start, nonwear_start + NONWEAR_MINUTES as f64 * 60.0),
            missing: (missing_start, missing_start + MISSING_MINUTES as f64 * 60.0),
            error,
        })
    }

    fn noise(&mut self, sd: f64) -> f64 {
        self.unit.sample(&mut self.rng) * sd
    }

    /// True acceleration (g) at `t` seconds from the start.
    fn true_sample(&mut self, t: f64) -> [f64; 3] {
        if t >= self.nonwear.0 && t < self.nonwear.1 {
            return [
                self.noise(NONWEAR_NOISE_G),
                self.noise(NONWEAR_NOISE_G),
                -1.0 + self.noise(NONWEAR_NOISE_G),
            ];
        }
        let k = ((t / SEGMENT_SECONDS) as usize).min(self.segments.len().saturating_sub(1));
        match self.segments.get(k).copied() {
            Some(Segment::Movement { gravity, amplitude, rate_hz }) => {
                let phase = 2.0 * std::f64::consts::PI * rate_hz * t;
                [
                    gravity[0] + amplitude * phase.sin() + self.noise(MOVEMENT_NOISE_G),
                    gravity[1] + 0.5 * amplitude * (phase + 1.0).sin() + self.noise(MOVEMENT_NOISE_G),
                    gravity[2] + 0.3 * amplitude * (phase + 2.0).sin() + self.noise(MOVEMENT_NOISE_G),
                ]
            }
            Some(Segment::Posture { gravity }) => [
                gravity[0] + self.noise(POSTURE_NOISE_G),
                gravity[1] + self.noise(POSTURE_NOISE_G),
                gravity[2] + self.noise(POSTURE_NOISE_G),
            ],
            None => [0.0, 0.0, 1.0],
        }
    }

    /// Sample as the miscalibrated device reports it.
    fn written_sample(&mut self, t: f64) -> [f64; 3] {
        if t >= self.missing.0 && t < self.missing.1 {
            return [MISSING_VALUE; 3];
        }
        let truth = self.true_sample(t);
        let axes = self.error.axes();
        [0, 1, 2].map(|i| (truth[i] - axes[i].offset) / axes[i].gain)
    }

    fn temperature(&self, t: f64) -> f64 {
        if t >= self.nonwear.0 && t < self.nonwear.1 {
            22.0
        } else {
            30.0 + 0.5 * (t / 3600.0).sin()
        }
    }
}

fn random_unit(rng: &mut StdRng, unit: &Normal<f64>) -> [f64; 3] {
    loop {
        let v = [unit.sample(rng), unit.sample(rng), unit.sample(rng)];
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if norm > 1e-6 {
            return v.map(|c| c / norm);
        }
    }
}

fn at(start: NaiveDateTime, seconds: f64) -> NaiveDateTime {
    start + Duration::microseconds((seconds * 1e6).round() as i64)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if args.page_samples == 0 {
        return Err(anyhow!("--page-samples must be positive"));
    }
    if !(args.gain_error >= 0.0 && args.offset_error >= 0.0) {
        return Err(anyhow!("--gain-error and --offset-error must be non-negative"));
    }
    let start = NaiveDateTime::parse_from_str(&args.start, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Invalid --start '{}'", args.start))?;

    let mut sim = Simulator::new(&args)?;
    let frequency = sim.frequency;
    let samples = args.hours as usize * 3600 * args.frequency as usize;
    let pages = samples.div_ceil(args.page_samples);

    let spike_page = (pages as f64 * 0.2) as usize;
    let jump_page = (pages as f64 * 0.85) as usize;
    let faults = if args.no_faults {
        Vec::new()
    } else {
        vec![
            InjectedFault {
                anomaly_type: AnomalyType::E,
                page: spike_page,
                shift_seconds: SPIKE_SECONDS,
            },
            InjectedFault {
                anomaly_type: AnomalyType::C,
                page: jump_page,
                shift_seconds: JUMP_SECONDS,
            },
        ]
    };
    // Written page time relative to the nominal one
    let clock_shift = |page: usize| -> f64 {
        if args.no_faults {
            0.0
        } else if page == spike_page {
            SPIKE_SECONDS
        } else if page >= jump_page {
            JUMP_SECONDS
        } else {
            0.0
        }
    };

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    let csv_name = format!("{}.csv", args.pid);
    let csv_path = args.output.join(&csv_name);
    let file = File::create(&csv_path)
        .with_context(|| format!("Cannot create {}", csv_path.display()))?;
    let mut out = BufWriter::new(file);

    tracing::info!(
        pid = %args.pid,
        hours = args.hours,
        frequency = args.frequency,
        samples,
        pages,
        "Generating recording"
    );

    writeln!(out, "# device: {}", args.device.name().to_ascii_lowercase())?;
    writeln!(out, "# frequency: {}", args.frequency)?;
    writeln!(out, "# subject_code: {}", args.pid)?;
    writeln!(out, "# x_gain: 1.0")?;
    writeln!(out, "# x_offset: 0.0")?;
    writeln!(out, "timestamp,x,y,z,temperature,battery,integrity")?;

    let battery_full = args.device.battery_max() * 0.95;
    let battery_drop = args.device.battery_max() * 0.35;
    for i in 0..samples {
        let t = i as f64 / frequency;
        let stamp = if i % args.page_samples == 0 {
            let page = i / args.page_samples;
            at(start, t + clock_shift(page))
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string()
        } else {
            String::new()
        };
        let [x, y, z] = sim.written_sample(t);
        let battery = battery_full - battery_drop * (i as f64 / samples as f64);
        writeln!(
            out,
            "{stamp},{x:.5},{y:.5},{z:.5},{:.2},{battery:.3},0",
            sim.temperature(t)
        )?;
    }
    out.flush()
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    let jobs_path = args.output.join("jobs.csv");
    std::fs::write(
        &jobs_path,
        format!("pid,filename,device\n{},{},{}\n", args.pid, csv_name, args.device.name().to_ascii_lowercase()),
    )
    .with_context(|| format!("Failed to write {}", jobs_path.display()))?;

    let truth = SimulationTruth {
        pid: args.pid.clone(),
        device: args.device,
        frequency: args.frequency,
        start,
        samples,
        page_samples: args.page_samples,
        calibration: sim.error,
        nonwear: Interval {
            start: at(start, sim.nonwear.0),
            end: at(start, sim.nonwear.1),
        },
        missing: Interval {
            start: at(start, sim.missing.0),
            end: at(start, sim.missing.1),
        },
        faults,
    };
    let truth_path = args.output.join(format!("{}_truth.json", args.pid));
    std::fs::write(&truth_path, serde_json::to_string_pretty(&truth)?)
        .with_context(|| format!("Failed to write {}", truth_path.display()))?;

    eprintln!("✓ Recording: {}", csv_path.display());
    eprintln!("✓ Job file:  {}", jobs_path.display());
    eprintln!("✓ Truth:     {}", truth_path.display());
    Ok(())
}
