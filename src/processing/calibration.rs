//! Autocalibration against local gravity
//!
//! While the device is still, the measured acceleration is gravity alone and
//! its magnitude should be exactly 1 g. Step one collects the mean vectors of
//! still windows; step two fits a per-axis affine correction that moves
//! those vectors onto the unit sphere.
//!
//! Step two iterates: calibrate the still means with the current
//! parameters, project them onto the sphere, then refit each axis by
//! ordinary least squares `closest = offset + gain * raw`. It stops when the
//! mean absolute deviation of `|v| - 1` improves by less than the tolerance.

use chrono::{Duration, NaiveDateTime};
use statrs::statistics::Statistics;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::epochs::{expected_samples, windows, TimePeriod};
use super::ProcessingError;
use crate::config::CalibrationConfig;
use crate::types::{
    seconds_to_duration, AxisCalibration, CalibrationFit, CalibrationParameters, Channel,
};

const AXES: [char; 3] = ['x', 'y', 'z'];

/// Reasons a gravity fit was not produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Insufficient still data: {found} still windows, need {required}")]
    InsufficientStillData { found: usize, required: usize },

    #[error("Still points do not cover both sides of the sphere on axis {axis}")]
    InsufficientSphereCoverage { axis: char },

    #[error("Degenerate least-squares fit on axis {axis}")]
    DegenerateFit { axis: char },
}

impl CalibrationError {
    /// Short machine-readable status for the metadata record.
    pub fn status(&self) -> &'static str {
        match self {
            Self::InsufficientStillData { .. } => "insufficient_still_data",
            Self::InsufficientSphereCoverage { .. } => "insufficient_sphere_coverage",
            Self::DegenerateFit { .. } => "degenerate_fit",
        }
    }
}

// ============================================================================
// Step one: still windows
// ============================================================================

/// Mean acceleration vectors of still windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StillPoints {
    pub timestamps: Vec<NaiveDateTime>,
    pub means: Vec<[f64; 3]>,
}

impl StillPoints {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Extract still windows from aligned X, Y and Z.
///
/// A window is still when every axis has a population standard deviation
/// below `noise_cutoff_mg / 1000` g and it holds at least half the samples
/// its length implies.
pub fn calibrate_stepone(
    x: &Channel,
    y: &Channel,
    z: &Channel,
    noise_cutoff_mg: f64,
    cfg: &CalibrationConfig,
) -> Result<StillPoints, ProcessingError> {
    if x.len() != y.len() || x.len() != z.len() {
        return Err(ProcessingError::ChannelMismatch(format!(
            "axis lengths differ: X={} Y={} Z={}",
            x.len(),
            y.len(),
            z.len()
        )));
    }
    let Some((first, last)) = x.timeframe() else {
        return Ok(StillPoints::default());
    };

    let threshold_g = noise_cutoff_mg / 1000.0;
    let length: Duration = seconds_to_duration(cfg.window_seconds);
    let period = TimePeriod {
        start: first,
        end: last + seconds_to_duration(x.period),
    };

    let mut points = StillPoints::default();
    let mut examined = 0usize;
    for w in windows(x, &period, length) {
        examined += 1;
        let expected = expected_samples(w.seconds(), x.period);
        if w.range.is_empty() || w.range.len() * 2 < expected {
            continue;
        }

        let axes = [
            &x.data[w.range.clone()],
            &y.data[w.range.clone()],
            &z.data[w.range.clone()],
        ];
        let still = axes
            .iter()
            .all(|a| a.iter().population_std_dev() < threshold_g);
        if still {
            points.timestamps.push(w.start);
            points.means.push([axes[0].iter().mean(), axes[1].iter().mean(), axes[2].iter().mean()]);
        }
    }

    info!(
        windows = examined,
        still = points.len(),
        threshold_mg = noise_cutoff_mg,
        "Calibration step one: still windows extracted"
    );
    Ok(points)
}

// ============================================================================
// Step two: gravity fit
// ============================================================================

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Mean absolute deviation of `|calibrated| - 1` over the still points.
fn sphere_error(points: &[[f64; 3]], params: &CalibrationParameters) -> f64 {
    let total: f64 = points
        .iter()
        .map(|p| (norm(&params.apply(p[0], p[1], p[2])) - 1.0).abs())
        .sum();
    total / points.len() as f64
}

/// Ordinary least squares `target = offset + gain * raw`.
fn fit_axis(raw: &[f64], target: &[f64], axis: char) -> Result<AxisCalibration, CalibrationError> {
    let raw_mean = raw.iter().mean();
    let target_mean = target.iter().mean();

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (r, t) in raw.iter().zip(target) {
        sxx += (r - raw_mean) * (r - raw_mean);
        sxy += (r - raw_mean) * (t - target_mean);
    }
    if !sxx.is_finite() || sxx <= f64::EPSILON {
        return Err(CalibrationError::DegenerateFit { axis });
    }

    let gain = sxy / sxx;
    let offset = target_mean - gain * raw_mean;
    if !gain.is_finite() || !offset.is_finite() || gain <= 0.0 {
        return Err(CalibrationError::DegenerateFit { axis });
    }
    Ok(AxisCalibration { gain, offset })
}

/// Fit per-axis gain and offset so the still points lie on the unit sphere.
pub fn calibrate_steptwo(
    points: &StillPoints,
    cfg: &CalibrationConfig,
) -> Result<CalibrationFit, CalibrationError> {
    let n = points.len();
    if n < cfg.min_still_windows {
        return Err(CalibrationError::InsufficientStillData {
            found: n,
            required: cfg.min_still_windows,
        });
    }

    let raw = &points.means;
    let mut params = CalibrationParameters::identity();
    let init_error = sphere_error(raw, &params);

    // Already on the sphere: nothing to fit
    if init_error <= cfg.tolerance {
        return Ok(CalibrationFit {
            parameters: params,
            init_error,
            end_error: init_error,
            iterations: 0,
            still_points: n,
        });
    }

    for (i, &axis) in AXES.iter().enumerate() {
        let covered_high = raw.iter().any(|p| p[i] > cfg.sphere_criterion_g);
        let covered_low = raw.iter().any(|p| p[i] < -cfg.sphere_criterion_g);
        if !(covered_high && covered_low) {
            return Err(CalibrationError::InsufficientSphereCoverage { axis });
        }
    }

    let columns: [Vec<f64>; 3] = [0, 1, 2].map(|i| raw.iter().map(|p| p[i]).collect());
    let mut error = init_error;
    let mut iterations = 0;

    while iterations < cfg.max_iterations {
        iterations += 1;

        // Closest points on the unit sphere to the current calibration
        let mut closest: [Vec<f64>; 3] = [
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
        ];
        for p in raw {
            let c = params.apply(p[0], p[1], p[2]);
            let len = norm(&c);
            for i in 0..3 {
                closest[i].push(if len > 0.0 { c[i] / len } else { c[i] });
            }
        }

        let mut axes = [AxisCalibration::IDENTITY; 3];
        for i in 0..3 {
            axes[i] = fit_axis(&columns[i], &closest[i], AXES[i])?;
        }
        params = CalibrationParameters::from_axes(axes);

        let new_error = sphere_error(raw, &params);
        let improvement = (error - new_error).abs();
        error = new_error;
        if improvement < cfg.tolerance {
            break;
        }
    }

    debug!(iterations, init_error, end_error = error, "Calibration step two converged");
    Ok(CalibrationFit {
        parameters: params,
        init_error,
        end_error: error,
        iterations,
        still_points: n,
    })
}

// ============================================================================
// Application
// ============================================================================

/// Apply calibration to every sample of X, Y and Z in place.
pub fn do_calibration(x: &mut Channel, y: &mut Channel, z: &mut Channel, params: &CalibrationParameters) {
    for (channel, axis) in [x, y, z].into_iter().zip(params.axes()) {
        for v in &mut channel.data {
            *v = axis.apply(*v);
        }
    }
}

/// What happened to calibration for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Calibrated(CalibrationFit),
    Failed {
        error: CalibrationError,
        still_points: usize,
    },
    /// Disabled in configuration
    Skipped,
}

impl CalibrationOutcome {
    /// Parameters applied to the signal (identity unless a fit succeeded).
    pub fn parameters(&self) -> CalibrationParameters {
        match self {
            Self::Calibrated(fit) => fit.parameters,
            _ => CalibrationParameters::identity(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Calibrated(_) => "calibrated",
            Self::Failed { error, .. } => error.status(),
            Self::Skipped => "skipped",
        }
    }
}

/// Run both calibration steps and apply the result to X, Y and Z.
///
/// A failed fit leaves the signal uncalibrated and is reported in the
/// outcome, never as an error.
pub fn autocalibrate(
    x: &mut Channel,
    y: &mut Channel,
    z: &mut Channel,
    noise_cutoff_mg: f64,
    cfg: &CalibrationConfig,
) -> Result<CalibrationOutcome, ProcessingError> {
    if !cfg.enabled {
        info!("Autocalibration disabled");
        return Ok(CalibrationOutcome::Skipped);
    }

    let points = calibrate_stepone(x, y, z, noise_cutoff_mg, cfg)?;
    let outcome = match calibrate_steptwo(&points, cfg) {
        Ok(fit) => {
            info!(
                init_error = fit.init_error,
                end_error = fit.end_error,
                iterations = fit.iterations,
                still_points = fit.still_points,
                "Calibration step two complete"
            );
            do_calibration(x, y, z, &fit.parameters);
            CalibrationOutcome::Calibrated(fit)
        }
        Err(error) => {
            warn!(error = %error, still_points = points.len(), "Calibration failed, keeping uncalibrated signal");
            CalibrationOutcome::Failed {
                error,
                still_points: points.len(),
            }
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 5, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// Unit vectors over the faces, edges and corners of a cube.
    fn orientations() -> Vec<[f64; 3]> {
        let mut out = Vec::new();
        for a in [-1.0, 0.0, 1.0] {
            for b in [-1.0, 0.0, 1.0] {
                for c in [-1.0, 0.0, 1.0] {
                    if a == 0.0 && b == 0.0 && c == 0.0 {
                        continue;
                    }
                    let v: [f64; 3] = [a, b, c];
                    let len = norm(&v);
                    out.push([a / len, b / len, c / len]);
                }
            }
        }
        out
    }

    #[test]
    fn test_round_trip_recovers_known_parameters() {
        let truth = CalibrationParameters {
            x: AxisCalibration { gain: 1.02, offset: 0.02 },
            y: AxisCalibration { gain: 0.98, offset: -0.03 },
            z: AxisCalibration { gain: 1.01, offset: 0.01 },
        };
        // Raw readings a device with these errors would report
        let means: Vec<[f64; 3]> = orientations()
            .iter()
            .map(|g| {
                [
                    (g[0] - truth.x.offset) / truth.x.gain,
                    (g[1] - truth.y.offset) / truth.y.gain,
                    (g[2] - truth.z.offset) / truth.z.gain,
                ]
            })
            .collect();
        let points = StillPoints {
            timestamps: vec![t0(); means.len()],
            means,
        };

        let fit = calibrate_steptwo(&points, &CalibrationConfig::default()).unwrap();
        assert!(fit.end_error < fit.init_error);
        assert!(fit.end_error < 1e-4, "end error {}", fit.end_error);
        for (got, want) in fit.parameters.axes().iter().zip(truth.axes()) {
            assert!((got.gain - want.gain).abs() < 1e-3, "gain {} vs {}", got.gain, want.gain);
            assert!((got.offset - want.offset).abs() < 1e-3, "offset {} vs {}", got.offset, want.offset);
        }
    }

    #[test]
    fn test_still_one_g_has_near_zero_error() {
        // 60 s perfectly still at exactly 1 g on Z, 10 Hz
        let n = 600;
        let x = Channel::from_frequency("X", t0(), vec![0.0; n], 10.0);
        let y = Channel::from_frequency("Y", t0(), vec![0.0; n], 10.0);
        let z = Channel::from_frequency("Z", t0(), vec![1.0; n], 10.0);

        let cfg = CalibrationConfig::default();
        let points = calibrate_stepone(&x, &y, &z, 13.0, &cfg).unwrap();
        assert_eq!(points.len(), 6);

        let fit = calibrate_steptwo(&points, &cfg).unwrap();
        assert!(fit.end_error < 1e-9);
        assert_eq!(fit.parameters, CalibrationParameters::identity());
    }

    #[test]
    fn test_too_few_still_windows() {
        let points = StillPoints {
            timestamps: vec![t0(); 2],
            means: vec![[0.0, 0.0, 1.1], [0.0, 1.1, 0.0]],
        };
        assert_eq!(
            calibrate_steptwo(&points, &CalibrationConfig::default()),
            Err(CalibrationError::InsufficientStillData { found: 2, required: 4 })
        );
    }

    #[test]
    fn test_poor_coverage_is_reported_per_axis() {
        // Device only ever lay flat, face up: x and y never leave zero
        let means = vec![[0.0, 0.0, 1.05]; 10];
        let points = StillPoints {
            timestamps: vec![t0(); 10],
            means,
        };
        let err = calibrate_steptwo(&points, &CalibrationConfig::default()).unwrap_err();
        assert_eq!(err, CalibrationError::InsufficientSphereCoverage { axis: 'x' });
        assert_eq!(err.status(), "insufficient_sphere_coverage");
    }

    #[test]
    fn test_moving_windows_are_not_still() {
        let n = 600;
        let wobble: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 0.05 } else { -0.05 }).collect();
        let x = Channel::from_frequency("X", t0(), wobble, 10.0);
        let y = Channel::from_frequency("Y", t0(), vec![0.0; n], 10.0);
        let z = Channel::from_frequency("Z", t0(), vec![1.0; n], 10.0);
        let points = calibrate_stepone(&x, &y, &z, 13.0, &CalibrationConfig::default()).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_failed_fit_keeps_identity() {
        let n = 100;
        let mut x = Channel::from_frequency("X", t0(), vec![0.5; n], 10.0);
        let mut y = Channel::from_frequency("Y", t0(), vec![0.0; n], 10.0);
        let mut z = Channel::from_frequency("Z", t0(), vec![1.0; n], 10.0);
        let outcome = autocalibrate(&mut x, &mut y, &mut z, 13.0, &CalibrationConfig::default()).unwrap();

        assert!(matches!(
            outcome,
            CalibrationOutcome::Failed {
                error: CalibrationError::InsufficientStillData { .. },
                ..
            }
        ));
        assert_eq!(outcome.parameters(), CalibrationParameters::identity());
        assert_eq!(x.data[0], 0.5);
    }

    #[test]
    fn test_do_calibration_applies_affine() {
        let mut x = Channel::from_frequency("X", t0(), vec![1.0], 1.0);
        let mut y = Channel::from_frequency("Y", t0(), vec![1.0], 1.0);
        let mut z = Channel::from_frequency("Z", t0(), vec![1.0], 1.0);
        let params = CalibrationParameters {
            x: AxisCalibration { gain: 2.0, offset: 0.5 },
            y: AxisCalibration::IDENTITY,
            z: AxisCalibration { gain: 1.0, offset: -1.0 },
        };
        do_calibration(&mut x, &mut y, &mut z, &params);
        assert_eq!((x.data[0], y.data[0], z.data[0]), (2.5, 1.0, 0.0));
    }
}
