//! Low-pass conditioning of high-rate recordings

use tracing::{debug, info};

use super::{Butterworth, ProcessingError};
use crate::config::ConditioningConfig;
use crate::types::Channel;

/// Low-pass X, Y and Z in place when the sampling rate exceeds the
/// configured threshold. Channel names are left untouched.
///
/// Returns whether the filter was applied.
pub fn condition_axes(
    axes: [&mut Channel; 3],
    cfg: &ConditioningConfig,
) -> Result<bool, ProcessingError> {
    let frequency = axes[0].frequency();
    if frequency <= cfg.lowpass_threshold_hz {
        debug!(frequency, threshold = cfg.lowpass_threshold_hz, "Sampling rate below low-pass threshold, passing through");
        return Ok(false);
    }

    let filter = Butterworth::lowpass(cfg.lowpass_order, cfg.lowpass_cutoff_hz, frequency)?;
    for axis in axes {
        axis.data = filter.filtfilt(&axis.data);
    }

    info!(
        frequency,
        cutoff_hz = cfg.lowpass_cutoff_hz,
        order = cfg.lowpass_order,
        "Applied low-pass conditioning"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn axis(name: &str, freq: f64) -> Channel {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let data = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        Channel::from_frequency(name, start, data, freq)
    }

    #[test]
    fn test_low_rate_passes_through() {
        let (mut x, mut y, mut z) = (axis("X", 30.0), axis("Y", 30.0), axis("Z", 30.0));
        let before = x.clone();
        let applied = condition_axes([&mut x, &mut y, &mut z], &ConditioningConfig::default()).unwrap();
        assert!(!applied);
        assert_eq!(x, before);
    }

    #[test]
    fn test_high_rate_is_filtered_and_keeps_names() {
        let (mut x, mut y, mut z) = (axis("X", 100.0), axis("Y", 100.0), axis("Z", 100.0));
        let applied = condition_axes([&mut x, &mut y, &mut z], &ConditioningConfig::default()).unwrap();
        assert!(applied);
        assert_eq!(x.name, "X");
        assert_eq!(z.name, "Z");
        // 50 Hz alternation sits far above the 20 Hz cutoff
        assert!(x.data[300..700].iter().all(|v| v.abs() < 0.01));
    }
}
