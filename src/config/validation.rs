//! Config validation: unknown-key detection with Levenshtein suggestions
//! and plausible-range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.
//!
//! The `statistics` array is free-form per channel and is not walked.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for PipelineConfig.
///
/// Maintained by hand to match the struct hierarchy in pipeline_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [device]
        "device",
        "device.device_type",
        // [io]
        "io",
        "io.job_file",
        "io.results_folder",
        // [processing]
        "processing",
        "processing.epoch_minutes",
        "processing.plot_minutes",
        "processing.processing_epoch_seconds",
        "processing.noise_cutoff_mg",
        // [qc]
        "qc",
        "qc.discrepancy_threshold",
        "qc.missing_value",
        "qc.missing_buffer_seconds",
        "qc.integrity_flag_value",
        "qc.max_gap_fill_seconds",
        // [calibration]
        "calibration",
        "calibration.enabled",
        "calibration.window_seconds",
        "calibration.min_still_windows",
        "calibration.max_iterations",
        "calibration.tolerance",
        "calibration.sphere_criterion_g",
        // [conditioning]
        "conditioning",
        "conditioning.lowpass_threshold_hz",
        "conditioning.lowpass_cutoff_hz",
        "conditioning.lowpass_order",
        // [features]
        "features",
        "features.hpfvm_cutoff_hz",
        "features.hpfvm_order",
        // [nonwear]
        "nonwear",
        "nonwear.enabled",
        "nonwear.window_seconds",
        "nonwear.minimum_length_minutes",
        // [plots]
        "plots",
        "plots.columns",
        // [[statistics]]
        "statistics",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if key.starts_with("statistics.") {
            continue;
        }
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(key, &known);
            let message = format!("Unknown config key '{key}'");
            warnings.push(ValidationWarning {
                field: key.clone(),
                message,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Plausible Range Validation
// ============================================================================

/// Validate value ranges on a parsed PipelineConfig.
///
/// Returns (errors, warnings): errors are values no recording can satisfy;
/// warnings are suspicious but not fatal.
pub fn validate_physical_ranges(
    config: &super::PipelineConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // A still vector has unit length, so no axis can exceed 1 g
    let criterion = config.calibration.sphere_criterion_g;
    if criterion >= 1.0 {
        errors.push(format!(
            "calibration.sphere_criterion_g = {criterion:.2} can never be met (must be < 1 g)"
        ));
    }

    let noise = config.processing.noise_cutoff_mg;
    if noise.is_finite() && (noise < 1.0 || noise > 100.0) {
        warnings.push(ValidationWarning {
            field: "processing.noise_cutoff_mg".to_string(),
            message: format!("noise_cutoff_mg = {noise:.1} is outside typical range (1-100 mg)"),
            suggestion: None,
        });
    }

    // Sentinel inside the measurable range would mask real samples
    let sentinel = config.qc.missing_value;
    if sentinel.is_finite() && sentinel.abs() <= 16.0 {
        warnings.push(ValidationWarning {
            field: "qc.missing_value".to_string(),
            message: format!(
                "missing_value = {sentinel} lies inside the accelerometer range (±16 g)"
            ),
            suggestion: None,
        });
    }

    let epoch = config.processing.processing_epoch_seconds;
    if epoch > 60 {
        warnings.push(ValidationWarning {
            field: "processing.processing_epoch_seconds".to_string(),
            message: format!(
                "processing_epoch_seconds = {epoch} is coarser than the finest usual output (60 s)"
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
