//! Signal processing stages
//!
//! Each stage is a pure transformation over `Channel`s or the raw loader
//! buffers, in the order the per-file processor runs them:
//!
//! 1. `anomalies` - QC detection on the preview load and repair of the full load
//! 2. `missing` - sentinel runs to buffered exclusion windows
//! 3. `calibration` - gravity-based gain/offset fit
//! 4. `conditioning` - zero-phase low-pass for high-rate recordings
//! 5. `features` - VM, ENMO, HPFVM, pitch and roll
//! 6. `nonwear` - still-and-quiet bouts across all three axes
//! 7. `epochs` - processing-epoch and analysis-resolution aggregation

mod anomalies;
mod calibration;
mod conditioning;
pub mod epochs;
mod features;
mod filter;
mod missing;
mod nonwear;

pub use anomalies::{detect_anomalies, repair_anomalies, AnomalyReport, RepairPlan};
pub use calibration::{
    autocalibrate, calibrate_stepone, calibrate_steptwo, do_calibration, CalibrationError,
    CalibrationOutcome, StillPoints,
};
pub use conditioning::condition_axes;
pub use epochs::{aggregate, processing_epoch_channel, EpochReducer, EpochTable, TimePeriod};
pub use features::{derive_features, enmo, hpfvm, pitch_roll, vector_magnitude, Features};
pub use filter::{Biquad, Butterworth, FilterKind};
pub use missing::{delete_missing, extract_missing_bouts};
pub use nonwear::detect_nonwear;

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Invalid sampling rate: {0}")]
    InvalidSamplingRate(f64),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Channel mismatch: {0}")]
    ChannelMismatch(String),

    #[error("Missing channel: {0}")]
    MissingChannel(String),

    #[error("Recording has no samples")]
    EmptyRecording,
}
