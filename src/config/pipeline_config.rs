//! Pipeline Configuration - every processing constant as a TOML value
//!
//! Each section implements `Default` with the values the processing script
//! has always used, so running without a config file reproduces the
//! reference behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::{DeviceType, StatisticsSpec};

/// Environment variable holding a config file path.
pub const CONFIG_ENV_VAR: &str = "WAP_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "wap_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a processing run.
///
/// Built once at startup and passed by reference into every stage.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$WAP_CONFIG` env var
/// 2. `./wap_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Recording device family
    #[serde(default)]
    pub device: DeviceConfig,

    /// Job file and results location
    #[serde(default)]
    pub io: IoConfig,

    /// Epoch resolutions and the noise threshold
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Anomaly repair and missing-data masking
    #[serde(default)]
    pub qc: QcConfig,

    /// Autocalibration
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Low-pass conditioning of high-rate recordings
    #[serde(default)]
    pub conditioning: ConditioningConfig,

    /// Derived feature parameters
    #[serde(default)]
    pub features: FeatureConfig,

    /// Nonwear detection
    #[serde(default)]
    pub nonwear: NonwearConfig,

    /// Plot series export
    #[serde(default)]
    pub plots: PlotConfig,

    /// Ordered channel statistics driving every epoch stream
    #[serde(default)]
    pub statistics: StatisticsSpec,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$WAP_CONFIG` environment variable
    /// 2. `./wap_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), device = %config.device.device_type, "Loaded pipeline config from WAP_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from WAP_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "WAP_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./wap_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(device = %config.device.device_type, "Loaded pipeline config from ./wap_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./wap_config.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No wap_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        let typo_warnings = super::validation::validate_unknown_keys(contents);
        for w in &typo_warnings {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section for internal consistency.
    ///
    /// Rules:
    /// - Durations, frequencies and counts must be positive and finite
    /// - Output epochs must be whole multiples of the processing epoch
    /// - Plot resolutions must be among the output resolutions
    /// - Filter orders must be even (second-order sections)
    /// - The statistics specification must be well formed
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Processing epochs
        let p = &self.processing;
        if p.processing_epoch_seconds == 0 {
            errors.push("processing.processing_epoch_seconds must be > 0".to_string());
        }
        if p.epoch_minutes.is_empty() {
            errors.push("processing.epoch_minutes must list at least one resolution".to_string());
        }
        for &m in &p.epoch_minutes {
            if m == 0 {
                errors.push("processing.epoch_minutes entries must be > 0".to_string());
            } else if p.processing_epoch_seconds > 0 && (m * 60) % p.processing_epoch_seconds != 0 {
                errors.push(format!(
                    "processing.epoch_minutes: {m} min is not a multiple of the {} s processing epoch",
                    p.processing_epoch_seconds
                ));
            }
        }
        for m in &p.plot_minutes {
            if !p.epoch_minutes.contains(m) {
                errors.push(format!(
                    "processing.plot_minutes: {m} min is not one of epoch_minutes {:?}",
                    p.epoch_minutes
                ));
            }
        }
        Self::check_positive(p.noise_cutoff_mg, "processing.noise_cutoff_mg", &mut errors);

        // QC
        let q = &self.qc;
        if !q.missing_value.is_finite() {
            errors.push("qc.missing_value must be finite".to_string());
        }
        if !q.integrity_flag_value.is_finite() {
            errors.push("qc.integrity_flag_value must be finite".to_string());
        }
        Self::check_non_negative(q.missing_buffer_seconds, "qc.missing_buffer_seconds", &mut errors);
        Self::check_non_negative(q.max_gap_fill_seconds, "qc.max_gap_fill_seconds", &mut errors);

        // Calibration
        let c = &self.calibration;
        Self::check_positive(c.window_seconds, "calibration.window_seconds", &mut errors);
        Self::check_positive(c.tolerance, "calibration.tolerance", &mut errors);
        Self::check_positive(c.sphere_criterion_g, "calibration.sphere_criterion_g", &mut errors);
        if c.max_iterations == 0 {
            errors.push("calibration.max_iterations must be > 0".to_string());
        }
        if c.min_still_windows < 2 {
            errors.push("calibration.min_still_windows must be >= 2".to_string());
        }

        // Filters
        let f = &self.conditioning;
        Self::check_positive(f.lowpass_threshold_hz, "conditioning.lowpass_threshold_hz", &mut errors);
        Self::check_positive(f.lowpass_cutoff_hz, "conditioning.lowpass_cutoff_hz", &mut errors);
        Self::check_filter_order(f.lowpass_order, "conditioning.lowpass_order", &mut errors);
        // Only recordings faster than the threshold are filtered
        if f.lowpass_cutoff_hz * 2.0 > f.lowpass_threshold_hz {
            errors.push(format!(
                "conditioning.lowpass_cutoff_hz ({:.1}) must not exceed the Nyquist rate of lowpass_threshold_hz ({:.1})",
                f.lowpass_cutoff_hz, f.lowpass_threshold_hz
            ));
        }
        Self::check_positive(self.features.hpfvm_cutoff_hz, "features.hpfvm_cutoff_hz", &mut errors);
        Self::check_filter_order(self.features.hpfvm_order, "features.hpfvm_order", &mut errors);

        // Nonwear
        let n = &self.nonwear;
        Self::check_positive(n.window_seconds, "nonwear.window_seconds", &mut errors);
        Self::check_positive(n.minimum_length_minutes, "nonwear.minimum_length_minutes", &mut errors);

        errors.extend(self.statistics.problems());

        // Plausible range validation
        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass; catch them explicitly
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} must be a finite value > 0 (got {value})"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{name} must be a finite value >= 0 (got {value})"));
        }
    }

    fn check_filter_order(order: usize, name: &str, errors: &mut Vec<String>) {
        if order == 0 || order % 2 != 0 {
            errors.push(format!("{name} must be a positive even number (got {order})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Device
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// "geneactiv" or "axivity"
    #[serde(default)]
    pub device_type: DeviceType,
}

// ============================================================================
// I/O
// ============================================================================

/// Input job list and results folder. Both can be overridden on the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// CSV listing `pid,filename` rows to process
    #[serde(default)]
    pub job_file: Option<PathBuf>,

    /// Folder receiving epoch streams, metadata and plot series
    #[serde(default = "default_results_folder")]
    pub results_folder: PathBuf,
}

fn default_results_folder() -> PathBuf {
    PathBuf::from(defaults::RESULTS_FOLDER)
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            job_file: None,
            results_folder: default_results_folder(),
        }
    }
}

// ============================================================================
// Processing
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Output epoch lengths (minutes); one stream per entry
    #[serde(default = "default_epoch_minutes")]
    pub epoch_minutes: Vec<u32>,

    /// Resolutions for which plot series are exported
    #[serde(default = "default_plot_minutes")]
    pub plot_minutes: Vec<u32>,

    /// Intermediate epoch between raw samples and output epochs (seconds)
    #[serde(default = "default_processing_epoch_seconds")]
    pub processing_epoch_seconds: u32,

    /// Still/nonwear standard deviation threshold (mg)
    #[serde(default = "default_noise_cutoff_mg")]
    pub noise_cutoff_mg: f64,
}

fn default_epoch_minutes() -> Vec<u32> {
    vec![1, 60]
}
fn default_plot_minutes() -> Vec<u32> {
    vec![1]
}
fn default_processing_epoch_seconds() -> u32 {
    5
}
fn default_noise_cutoff_mg() -> f64 {
    13.0
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            epoch_minutes: default_epoch_minutes(),
            plot_minutes: default_plot_minutes(),
            processing_epoch_seconds: default_processing_epoch_seconds(),
            noise_cutoff_mg: default_noise_cutoff_mg(),
        }
    }
}

impl ProcessingConfig {
    pub fn processing_epoch(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.processing_epoch_seconds))
    }
}

// ============================================================================
// QC
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcConfig {
    /// Timestamp/sample-count mismatch tolerated before a page is anomalous (samples)
    #[serde(default = "default_discrepancy_threshold")]
    pub discrepancy_threshold: u32,

    /// Sentinel marking "no data" samples
    #[serde(default = "default_missing_value")]
    pub missing_value: f64,

    /// Padding added to both sides of a missing run (seconds)
    #[serde(default = "default_missing_buffer_seconds")]
    pub missing_buffer_seconds: f64,

    /// Value written into the Integrity channel inside missing windows
    #[serde(default = "default_integrity_flag_value")]
    pub integrity_flag_value: f64,

    /// Gaps longer than this are marked, not filled sample by sample (seconds)
    #[serde(default = "default_max_gap_fill_seconds")]
    pub max_gap_fill_seconds: f64,
}

fn default_discrepancy_threshold() -> u32 {
    2
}
fn default_missing_value() -> f64 {
    -111.0
}
fn default_missing_buffer_seconds() -> f64 {
    120.0
}
fn default_integrity_flag_value() -> f64 {
    1.0
}
fn default_max_gap_fill_seconds() -> f64 {
    defaults::MAX_GAP_FILL_SECONDS
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            discrepancy_threshold: default_discrepancy_threshold(),
            missing_value: default_missing_value(),
            missing_buffer_seconds: default_missing_buffer_seconds(),
            integrity_flag_value: default_integrity_flag_value(),
            max_gap_fill_seconds: default_max_gap_fill_seconds(),
        }
    }
}

// ============================================================================
// Calibration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Skip autocalibration entirely (identity parameters)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Still-window length (seconds)
    #[serde(default = "default_calibration_window_seconds")]
    pub window_seconds: f64,

    /// Fewer still windows than this fails calibration
    #[serde(default = "default_min_still_windows")]
    pub min_still_windows: usize,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Stop when the error improves by less than this (g)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Still points must reach beyond ±criterion on every axis (g)
    #[serde(default = "default_sphere_criterion")]
    pub sphere_criterion_g: f64,
}

fn default_true() -> bool {
    true
}
fn default_calibration_window_seconds() -> f64 {
    10.0
}
fn default_min_still_windows() -> usize {
    4
}
fn default_max_iterations() -> usize {
    1000
}
fn default_tolerance() -> f64 {
    1e-10
}
fn default_sphere_criterion() -> f64 {
    0.3
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_seconds: default_calibration_window_seconds(),
            min_still_windows: default_min_still_windows(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            sphere_criterion_g: default_sphere_criterion(),
        }
    }
}

// ============================================================================
// Conditioning
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditioningConfig {
    /// Recordings sampled above this rate are low-pass filtered (Hz)
    #[serde(default = "default_lowpass_threshold_hz")]
    pub lowpass_threshold_hz: f64,

    #[serde(default = "default_lowpass_cutoff_hz")]
    pub lowpass_cutoff_hz: f64,

    #[serde(default = "default_filter_order")]
    pub lowpass_order: usize,
}

fn default_lowpass_threshold_hz() -> f64 {
    40.0
}
fn default_lowpass_cutoff_hz() -> f64 {
    20.0
}
fn default_filter_order() -> usize {
    4
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            lowpass_threshold_hz: default_lowpass_threshold_hz(),
            lowpass_cutoff_hz: default_lowpass_cutoff_hz(),
            lowpass_order: default_filter_order(),
        }
    }
}

// ============================================================================
// Features
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// High-pass cutoff applied to VM for HPFVM (Hz)
    #[serde(default = "default_hpfvm_cutoff_hz")]
    pub hpfvm_cutoff_hz: f64,

    #[serde(default = "default_filter_order")]
    pub hpfvm_order: usize,
}

fn default_hpfvm_cutoff_hz() -> f64 {
    0.2
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            hpfvm_cutoff_hz: default_hpfvm_cutoff_hz(),
            hpfvm_order: default_filter_order(),
        }
    }
}

// ============================================================================
// Nonwear
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonwearConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Standard deviation window (seconds)
    #[serde(default = "default_nonwear_window_seconds")]
    pub window_seconds: f64,

    /// Shorter still periods are treated as wear (minutes)
    #[serde(default = "default_nonwear_minimum_minutes")]
    pub minimum_length_minutes: f64,
}

fn default_nonwear_window_seconds() -> f64 {
    10.0
}
fn default_nonwear_minimum_minutes() -> f64 {
    60.0
}

impl Default for NonwearConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_seconds: default_nonwear_window_seconds(),
            minimum_length_minutes: default_nonwear_minimum_minutes(),
        }
    }
}

// ============================================================================
// Plots
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Epoch columns exported as plot series; absent columns are skipped
    #[serde(default = "default_plot_columns")]
    pub columns: Vec<String>,
}

fn default_plot_columns() -> Vec<String> {
    defaults::PLOT_COLUMNS.iter().map(|s| s.to_string()).collect()
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            columns: default_plot_columns(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: PipelineConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.device.device_type, DeviceType::Axivity);
        assert_eq!(config.processing.epoch_minutes, vec![1, 60]);
        assert_eq!(config.processing.processing_epoch_seconds, 5);
        assert_eq!(config.processing.noise_cutoff_mg, 13.0);
        assert_eq!(config.qc.missing_value, -111.0);
        assert_eq!(config.calibration.max_iterations, 1000);
        assert_eq!(config.statistics, StatisticsSpec::default());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[device]
device_type = "geneactiv"

[processing]
epoch_minutes = [1, 15]
plot_minutes = [15]
"#;
        let config: PipelineConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        // Overridden values
        assert_eq!(config.device.device_type, DeviceType::GeneActiv);
        assert_eq!(config.processing.epoch_minutes, vec![1, 15]);
        // Non-overridden values retain defaults
        assert_eq!(config.processing.processing_epoch_seconds, 5);
        assert_eq!(config.qc.discrepancy_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_misaligned_epochs() {
        let mut config = PipelineConfig::default();
        config.processing.processing_epoch_seconds = 7;
        let result = config.validate();
        assert!(result.is_err(), "1 min is not a multiple of 7 s");
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("epoch_minutes")));
        }
    }

    #[test]
    fn test_validation_catches_plot_outside_epochs() {
        let mut config = PipelineConfig::default();
        config.processing.plot_minutes = vec![30];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_odd_filter_order() {
        let mut config = PipelineConfig::default();
        config.features.hpfvm_order = 3;
        let result = config.validate();
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("hpfvm_order")));
        } else {
            panic!("odd filter order should fail validation");
        }
    }

    #[test]
    fn test_validation_rejects_nan() {
        let mut config = PipelineConfig::default();
        config.processing.noise_cutoff_mg = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_statistics_order() {
        let config = PipelineConfig::default();
        let text = config.to_toml().expect("default config serializes");
        let parsed = PipelineConfig::from_toml_str(&text).expect("serialized config parses");
        assert_eq!(
            parsed.statistics.column_names(),
            config.statistics.column_names()
        );
    }
}
