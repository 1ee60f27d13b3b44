//! Per-file metadata record
//!
//! One header row and one value row: the loader's header fields, then QC
//! counts, calibration diagnostics, battery levels and the settings the
//! file was processed with. Fields keep insertion order; setting an
//! existing key overwrites it in place.

use std::fmt::Write as _;

use super::csv_field;
use crate::config::defaults::MANUFACTURER_CALIBRATION_FIELDS;
use crate::processing::CalibrationOutcome;
use crate::types::{count_by_type, AnomalyRecord, DeviceType};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    fields: Vec<(String, String)>,
}

impl MetadataRecord {
    /// Start from loader header fields, prefixing the manufacturer's
    /// calibration fields with `manufacturers_`.
    pub fn from_header(header: &[(String, String)]) -> Self {
        let mut record = Self::default();
        for (key, value) in header {
            if MANUFACTURER_CALIBRATION_FIELDS.contains(&key.as_str()) {
                record.set(format!("manufacturers_{key}"), value.clone());
            } else {
                record.set(key.clone(), value.clone());
            }
        }
        record
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Set an optional value; `None` writes an empty cell.
    pub fn set_opt(&mut self, key: impl Into<String>, value: Option<f64>) {
        self.set(key, value.map(|v| v.to_string()).unwrap_or_default());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `QC_anomalies_total` and `QC_anomaly_A` .. `QC_anomaly_G`.
    pub fn add_anomaly_counts(&mut self, records: &[AnomalyRecord]) {
        self.set("QC_anomalies_total", records.len());
        for (anomaly_type, count) in count_by_type(records) {
            self.set(format!("QC_anomaly_{anomaly_type}"), count);
        }
    }

    /// Calibration status, parameters and fit diagnostics.
    ///
    /// Parameters are those applied to the signal, so a failed fit reports
    /// identity gains and zero offsets next to its failure status.
    pub fn add_calibration(&mut self, outcome: &CalibrationOutcome) {
        self.set("calibration_status", outcome.status());
        let params = outcome.parameters();
        for (axis, cal) in ["x", "y", "z"].iter().zip(params.axes()) {
            self.set(format!("calibration_{axis}_gain"), cal.gain);
            self.set(format!("calibration_{axis}_offset"), cal.offset);
        }

        match outcome {
            CalibrationOutcome::Calibrated(fit) => {
                self.set("calibration_init_error", fit.init_error);
                self.set("calibration_end_error", fit.end_error);
                self.set("calibration_iterations", fit.iterations);
                self.set("calibration_still_points", fit.still_points);
                self.set("calibration_error", "");
            }
            CalibrationOutcome::Failed {
                error,
                still_points,
            } => {
                self.set("calibration_init_error", "");
                self.set("calibration_end_error", "");
                self.set("calibration_iterations", 0);
                self.set("calibration_still_points", still_points);
                self.set("calibration_error", error);
            }
            CalibrationOutcome::Skipped => {
                for key in [
                    "calibration_init_error",
                    "calibration_end_error",
                    "calibration_iterations",
                    "calibration_still_points",
                    "calibration_error",
                ] {
                    self.set(key, "");
                }
            }
        }
    }

    /// Header line and value line, led by `id`.
    pub fn to_csv(&self, id: &str) -> String {
        let mut out = String::from("id");
        for (key, _) in &self.fields {
            let _ = write!(out, ",{}", csv_field(key));
        }
        let _ = write!(out, "\n{}", csv_field(id));
        for (_, value) in &self.fields {
            let _ = write!(out, ",{}", csv_field(value));
        }
        out.push('\n');
        out
    }
}

/// Battery charge at the first and last valid readings, in percent.
///
/// Readings that are non-finite or equal to `missing_value` are skipped.
pub fn battery_percentages(
    battery: &[f64],
    device: DeviceType,
    missing_value: f64,
) -> (Option<f64>, Option<f64>) {
    let valid = |v: &&f64| v.is_finite() && **v != missing_value;
    let first = battery.iter().find(valid).map(|&v| device.battery_percent(v));
    let last = battery.iter().rev().find(valid).map(|&v| device.battery_percent(v));
    (first, last)
}
