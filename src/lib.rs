//! WAP Pipeline: Waveform Acceleration Processing
//!
//! Batch processing of raw triaxial accelerometer recordings into
//! per-epoch summary statistics.
//!
//! ## Architecture
//!
//! - **Acquisition**: Recording loaders (full load and a fast X/Y/Z preview)
//! - **Processing**: QC anomaly repair, missing windows, autocalibration,
//!   low-pass conditioning, feature derivation, nonwear and epoch aggregation
//! - **Output**: Epoch CSVs, plot series, anomaly lists and metadata, staged
//!   and published atomically per recording
//! - **Pipeline**: Per-file processor and job-file sharding across workers

pub mod acquisition;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod types;

// Re-export configuration
pub use config::PipelineConfig;

// Re-export commonly used types
pub use types::{
    AnomalyRecord, AnomalyType, Bout, CalibrationParameters, Channel, DeviceType, RawChannelSet,
    StatisticsSpec,
};

// Re-export the per-file and batch entry points
pub use pipeline::{process_file, read_job_file, run_batch, BatchSummary, FileJob, FileReport};
