//! Calibration parameters and fit diagnostics

use serde::{Deserialize, Serialize};

/// Affine correction for one axis: `x' = x * gain + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    pub gain: f64,
    pub offset: f64,
}

impl AxisCalibration {
    pub const IDENTITY: AxisCalibration = AxisCalibration {
        gain: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.gain + self.offset
    }
}

/// Per-axis calibration for a triaxial signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub x: AxisCalibration,
    pub y: AxisCalibration,
    pub z: AxisCalibration,
}

impl CalibrationParameters {
    pub fn identity() -> Self {
        Self {
            x: AxisCalibration::IDENTITY,
            y: AxisCalibration::IDENTITY,
            z: AxisCalibration::IDENTITY,
        }
    }

    pub fn axes(&self) -> [AxisCalibration; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_axes(axes: [AxisCalibration; 3]) -> Self {
        Self {
            x: axes[0],
            y: axes[1],
            z: axes[2],
        }
    }

    /// Calibrate one triaxial sample.
    #[inline]
    pub fn apply(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        [self.x.apply(x), self.y.apply(y), self.z.apply(z)]
    }
}

/// Outcome of a successful gravity fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFit {
    pub parameters: CalibrationParameters,
    /// Mean absolute deviation of `|v| - 1` before fitting (g)
    pub init_error: f64,
    /// Mean absolute deviation of `|v| - 1` after fitting (g)
    pub end_error: f64,
    pub iterations: usize,
    /// Number of still windows used in the fit
    pub still_points: usize,
}
