//! System-wide default constants.
//!
//! Centralises magic numbers shared between configuration defaults and the
//! processing stages. Grouped by subsystem for easy discovery.

// ============================================================================
// Output
// ============================================================================

/// Results folder used when neither the config nor the CLI names one.
pub const RESULTS_FOLDER: &str = "results";

/// Epoch columns exported as plot series by default.
pub const PLOT_COLUMNS: &[&str] = &[
    "ENMO_sum",
    "HPFVM_sum",
    "PITCH_mean",
    "ROLL_mean",
    "Temperature_mean",
    "Battery_mean",
];

/// Timestamp format used in every output CSV.
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Value of the `processing_script` metadata field.
pub const PROCESSING_SCRIPT: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

/// Suffix of output files still being written.
pub const PARTIAL_SUFFIX: &str = "partial";

// ============================================================================
// QC
// ============================================================================

/// Largest gap filled sample by sample with the missing sentinel (seconds).
///
/// 604 800 = 7 days.
pub const MAX_GAP_FILL_SECONDS: f64 = 604_800.0;

// ============================================================================
// Metadata
// ============================================================================

/// Loader header fields holding the manufacturer's own calibration; renamed
/// with a `manufacturers_` prefix so they cannot be mistaken for ours.
pub const MANUFACTURER_CALIBRATION_FIELDS: &[&str] = &[
    "x_gain",
    "x_offset",
    "y_gain",
    "y_offset",
    "z_gain",
    "z_offset",
    "calibration_date",
];
