//! Per-file processor
//!
//! Runs one recording through every stage and stages its result files.
//! Nothing is published unless the whole file succeeds.

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::acquisition::{loader_for, RecordingLoader};
use crate::config::{defaults::PROCESSING_SCRIPT, PipelineConfig};
use crate::output::{
    anomalies_csv, battery_percentages, epoch_csv, resolution_name, write_plots, MetadataRecord,
    StagedOutputs,
};
use crate::processing::{
    aggregate, autocalibrate, condition_axes, delete_missing, derive_features, detect_anomalies,
    detect_nonwear, extract_missing_bouts, processing_epoch_channel, repair_anomalies,
    EpochReducer, ProcessingError, TimePeriod,
};
use crate::types::{channel_names, Channel, ChannelId, DeviceType};

/// One row of the job file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileJob {
    /// Participant identifier written into every output row
    pub pid: String,
    pub path: PathBuf,
    /// Overrides the configured device for this file
    pub device: Option<DeviceType>,
}

/// Summary of a successfully processed file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub pid: String,
    pub file: String,
    pub samples: usize,
    pub anomalies: usize,
    pub missing_bouts: usize,
    pub nonwear_bouts: usize,
    pub calibration: &'static str,
    pub outputs: Vec<PathBuf>,
    pub elapsed_ms: u128,
}

impl std::fmt::Display for FileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): {} samples, {} anomalies, {} missing windows, {} nonwear bouts, calibration {}, {} files in {} ms",
            self.file,
            self.pid,
            self.samples,
            self.anomalies,
            self.missing_bouts,
            self.nonwear_bouts,
            self.calibration,
            self.outputs.len(),
            self.elapsed_ms
        )
    }
}

/// File name up to the first dot, used to name every output.
pub fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or("recording")
        .to_string()
}

fn take_channel(channels: &mut Vec<Channel>, name: &str) -> Result<Channel, ProcessingError> {
    let pos = channels
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| ProcessingError::MissingChannel(name.to_string()))?;
    Ok(channels.remove(pos))
}

/// Process one file with the loader its extension selects.
pub fn process_file(job: &FileJob, cfg: &PipelineConfig) -> Result<FileReport> {
    let loader = loader_for(&job.path)
        .with_context(|| format!("No loader for {}", job.path.display()))?;
    process_with_loader(job, cfg, loader.as_ref())
}

/// Process one file with an explicit loader.
pub fn process_with_loader(
    job: &FileJob,
    cfg: &PipelineConfig,
    loader: &dyn RecordingLoader,
) -> Result<FileReport> {
    let started = Instant::now();
    let device = job.device.unwrap_or(cfg.device.device_type);
    let stem = file_stem(&job.path);
    let file_name = job
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.clone());
    let qc = &cfg.qc;
    let noise_mg = cfg.processing.noise_cutoff_mg;

    info!(pid = %job.pid, file = %file_name, device = %device, loader = loader.name(), "Processing file");
    let mut staged = StagedOutputs::new(&cfg.io.results_folder)
        .with_context(|| format!("Cannot use results folder {}", cfg.io.results_folder.display()))?;

    // ------------------------------------------------------------------
    // QC on the untouched preview load
    // ------------------------------------------------------------------
    let qc_report = {
        let preview = loader
            .fast_load(&job.path, device)
            .with_context(|| format!("Failed to preview {}", job.path.display()))?;
        detect_anomalies(&preview.channels, qc)
    };

    let recording = loader
        .load(&job.path, device)
        .with_context(|| format!("Failed to load {}", job.path.display()))?;
    let header = recording.header;
    let repaired = repair_anomalies(&qc_report, recording.channels, qc);
    let anomalies = qc_report.records;
    let mut channels = repaired
        .into_channels()
        .ok_or(ProcessingError::EmptyRecording)?;

    let mut x = take_channel(&mut channels, channel_names::X)?;
    let mut y = take_channel(&mut channels, channel_names::Y)?;
    let mut z = take_channel(&mut channels, channel_names::Z)?;
    let mut temperature = take_channel(&mut channels, channel_names::TEMPERATURE)?;
    let mut battery = take_channel(&mut channels, channel_names::BATTERY)?;
    let mut integrity = take_channel(&mut channels, channel_names::INTEGRITY)?;
    drop(channels);

    let (first, last) = x.timeframe().ok_or(ProcessingError::EmptyRecording)?;
    let samples = x.len();
    let period = TimePeriod::covering(first, last);
    let (first_battery_pct, last_battery_pct) =
        battery_percentages(&battery.data, device, qc.missing_value);

    // ------------------------------------------------------------------
    // Missing windows, calibration, conditioning
    // ------------------------------------------------------------------
    let missing = extract_missing_bouts(&x, qc);
    delete_missing([&mut x, &mut y, &mut z], &missing);
    integrity.fill_windows(&missing, qc.integrity_flag_value);

    let calibration = autocalibrate(&mut x, &mut y, &mut z, noise_mg, &cfg.calibration)?;
    delete_missing(
        [&mut x, &mut y, &mut z, &mut temperature, &mut battery],
        &missing,
    );
    condition_axes([&mut x, &mut y, &mut z], &cfg.conditioning)?;

    // ------------------------------------------------------------------
    // Features and nonwear
    // ------------------------------------------------------------------
    let features = derive_features(&x, &y, &z, &cfg.statistics, &cfg.features)?;
    let nonwear = if cfg.nonwear.enabled {
        detect_nonwear(&x, &y, &z, noise_mg, &cfg.nonwear)
    } else {
        Vec::new()
    };
    drop((x, y, z));

    // ------------------------------------------------------------------
    // Processing epoch
    // ------------------------------------------------------------------
    let epoch = cfg.processing.processing_epoch();
    let spec = &cfg.statistics;
    let mut epoch_channels: Vec<Channel> = Vec::new();

    let averaged = features.channels().into_iter().chain([
        (ChannelId::Temperature, &temperature),
        (ChannelId::Battery, &battery),
    ]);
    for (id, channel) in averaged {
        if !spec.contains(id) {
            continue;
        }
        let mut collapsed = processing_epoch_channel(channel, id, EpochReducer::Mean, &period, epoch);
        if id.is_motion() {
            collapsed.delete_windows(&nonwear);
        }
        collapsed.delete_windows(&missing);
        epoch_channels.push(collapsed);
    }
    if spec.contains(ChannelId::Integrity) {
        let mut collapsed =
            processing_epoch_channel(&integrity, ChannelId::Integrity, EpochReducer::Flag, &period, epoch);
        collapsed.fill_windows(&missing, qc.integrity_flag_value);
        epoch_channels.push(collapsed);
    }
    drop((features, temperature, battery, integrity));
    debug!(channels = epoch_channels.len(), epoch_seconds = epoch.num_seconds(), "Processing-epoch channels ready");

    // ------------------------------------------------------------------
    // Output resolutions
    // ------------------------------------------------------------------
    let mut names = Vec::with_capacity(cfg.processing.epoch_minutes.len());
    for &minutes in &cfg.processing.epoch_minutes {
        let name = resolution_name(minutes);
        let table = aggregate(&epoch_channels, spec, &period, Duration::minutes(i64::from(minutes)));
        staged.write(&format!("{name}_{stem}.csv"), &epoch_csv(&job.pid, &table))?;
        if cfg.processing.plot_minutes.contains(&minutes) {
            write_plots(&mut staged, &stem, &name, &table, &cfg.plots.columns, &nonwear)?;
        }
        debug!(resolution = %name, rows = table.len(), "Epoch stream staged");
        names.push(name);
    }

    if !anomalies.is_empty() {
        staged.write(&format!("{stem}_anomalies.csv"), &anomalies_csv(&anomalies))?;
    }

    let mut metadata = MetadataRecord::from_header(&header);
    metadata.set("processed_file", &file_name);
    metadata.set("device", device);
    metadata.add_anomaly_counts(&anomalies);
    metadata.set("QC_missing_windows", missing.len());
    metadata.set("QC_nonwear_bouts", nonwear.len());
    metadata.add_calibration(&calibration);
    metadata.set_opt("QC_first_battery_pct", first_battery_pct);
    metadata.set_opt("QC_last_battery_pct", last_battery_pct);
    metadata.set("processing_script", PROCESSING_SCRIPT);
    metadata.set("analysis_resolutions", names.join(";"));
    metadata.set("noise_cutoff_mg", noise_mg);
    metadata.set("processing_epoch", cfg.processing.processing_epoch_seconds);
    staged.write(&format!("metadata_{stem}.csv"), &metadata.to_csv(&job.pid))?;

    let outputs = staged.commit().context("Failed to publish results")?;
    let report = FileReport {
        pid: job.pid.clone(),
        file: file_name,
        samples,
        anomalies: anomalies.len(),
        missing_bouts: missing.len(),
        nonwear_bouts: nonwear.len(),
        calibration: calibration.status(),
        outputs,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!("{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_stops_at_first_dot() {
        assert_eq!(file_stem(Path::new("/data/P001_left.wrist.csv")), "P001_left");
        assert_eq!(file_stem(Path::new("P002.csv")), "P002");
    }

    #[test]
    fn test_take_channel_missing() {
        let mut channels = Vec::new();
        assert_eq!(
            take_channel(&mut channels, "Battery"),
            Err(ProcessingError::MissingChannel("Battery".into()))
        );
    }
}
