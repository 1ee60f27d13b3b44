//! Recording device families

use serde::{Deserialize, Serialize};

/// Supported wearable device families.
///
/// The family fixes the battery scale used for QC percentages; sample
/// decoding is the loader's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    GeneActiv,
    #[default]
    Axivity,
}

impl DeviceType {
    /// Battery reading at full charge, in the device's native unit
    /// (volts for GeneActiv, raw ADC counts for Axivity).
    pub fn battery_max(&self) -> f64 {
        match self {
            Self::GeneActiv => 4.3,
            Self::Axivity => 210.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneActiv => "GeneActiv",
            Self::Axivity => "Axivity",
        }
    }

    /// Battery reading as a percentage of full charge, rounded to 2 dp.
    pub fn battery_percent(&self, reading: f64) -> f64 {
        (reading / self.battery_max() * 100.0 * 100.0).round() / 100.0
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geneactiv" | "bin" => Ok(Self::GeneActiv),
            "axivity" | "cwa" => Ok(Self::Axivity),
            other => Err(format!(
                "unsupported device type '{other}' (expected GeneActiv or Axivity)"
            )),
        }
    }
}
