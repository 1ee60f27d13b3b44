//! Nonwear detection
//!
//! A device lying still off the body shows almost no variation on any
//! axis. Windows whose population standard deviation stays at or below the
//! noise threshold on all three axes, for long enough, are flagged as not
//! worn.

use chrono::Duration;
use statrs::statistics::Statistics;
use tracing::info;

use super::epochs::{windows, TimePeriod};
use crate::config::NonwearConfig;
use crate::types::{intersect_bouts, seconds_to_duration, Bout, Channel, DrawProperties};

/// Runs of consecutive quiet windows on one axis.
///
/// Each bout spans from the first quiet window's start to the last quiet
/// window's end. Windows without samples break a run.
fn quiet_bouts(axis: &Channel, window: Duration, threshold_g: f64) -> Vec<Bout> {
    let Some((first, last)) = axis.timeframe() else {
        return Vec::new();
    };
    let period = TimePeriod {
        start: first,
        end: last + seconds_to_duration(axis.period),
    };

    let mut out: Vec<Bout> = Vec::new();
    let mut open: Option<Bout> = None;

    for w in windows(axis, &period, window) {
        let values = &axis.data[w.range.clone()];
        let quiet = !values.is_empty() && values.iter().population_std_dev() <= threshold_g;
        if quiet {
            match open.as_mut() {
                Some(bout) => bout.end = w.end,
                None => open = Some(Bout::new(w.start, w.end)),
            }
        } else if let Some(bout) = open.take() {
            out.push(bout);
        }
    }
    out.extend(open);
    out
}

/// Nonwear bouts for calibrated X, Y and Z.
///
/// Quiet windows are intersected across the three axes and kept when at
/// least `minimum_length_minutes` long. Each bout carries shading hints for
/// plot rendering.
pub fn detect_nonwear(
    x: &Channel,
    y: &Channel,
    z: &Channel,
    noise_cutoff_mg: f64,
    cfg: &NonwearConfig,
) -> Vec<Bout> {
    let window = seconds_to_duration(cfg.window_seconds);
    let minimum = seconds_to_duration(cfg.minimum_length_minutes * 60.0);
    let threshold_g = noise_cutoff_mg / 1000.0;

    let xy = intersect_bouts(
        &quiet_bouts(x, window, threshold_g),
        &quiet_bouts(y, window, threshold_g),
    );
    let xyz = intersect_bouts(&xy, &quiet_bouts(z, window, threshold_g));

    let bouts: Vec<Bout> = xyz
        .into_iter()
        .filter(|b| b.length() >= minimum)
        .map(|b| b.with_draw(DrawProperties::nonwear()))
        .collect();

    let total_minutes: i64 = bouts.iter().map(|b| b.length().num_minutes()).sum();
    info!(
        bouts = bouts.len(),
        total_minutes,
        threshold_mg = noise_cutoff_mg,
        "Nonwear detection complete"
    );
    bouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// 1 Hz axis that is still from `quiet_from` to `quiet_to` seconds and
    /// oscillates at ±0.1 g elsewhere.
    fn axis(name: &str, n: usize, quiet_from: usize, quiet_to: usize, level: f64) -> Channel {
        let data = (0..n)
            .map(|i| {
                if (quiet_from..quiet_to).contains(&i) {
                    level
                } else if i % 2 == 0 {
                    level + 0.1
                } else {
                    level - 0.1
                }
            })
            .collect();
        Channel::from_frequency(name, t0(), data, 1.0)
    }

    #[test]
    fn test_long_still_period_is_nonwear() {
        let n = 4 * 3600;
        // Two hours still from t=1h, on all axes
        let x = axis("X", n, 3600, 3 * 3600, 0.0);
        let y = axis("Y", n, 3600, 3 * 3600, 0.0);
        let z = axis("Z", n, 3600, 3 * 3600, 1.0);

        let bouts = detect_nonwear(&x, &y, &z, 13.0, &NonwearConfig::default());
        assert_eq!(bouts.len(), 1);
        assert_eq!(bouts[0].start, t0() + Duration::hours(1));
        assert_eq!(bouts[0].end, t0() + Duration::hours(3));
        assert_eq!(bouts[0].draw, Some(DrawProperties::nonwear()));
    }

    #[test]
    fn test_requires_all_axes_quiet() {
        let n = 4 * 3600;
        let x = axis("X", n, 3600, 3 * 3600, 0.0);
        let y = axis("Y", n, 0, 0, 0.0);
        let z = axis("Z", n, 3600, 3 * 3600, 1.0);
        assert!(detect_nonwear(&x, &y, &z, 13.0, &NonwearConfig::default()).is_empty());
    }

    #[test]
    fn test_short_still_period_is_wear() {
        let n = 2 * 3600;
        // 30 min still: below the 60 min minimum
        let x = axis("X", n, 600, 2400, 0.0);
        let y = axis("Y", n, 600, 2400, 0.0);
        let z = axis("Z", n, 600, 2400, 1.0);
        assert!(detect_nonwear(&x, &y, &z, 13.0, &NonwearConfig::default()).is_empty());
    }

    #[test]
    fn test_intersection_trims_to_overlap() {
        let n = 5 * 3600;
        let x = axis("X", n, 3600, 4 * 3600, 0.0);
        let y = axis("Y", n, 2 * 3600, 5 * 3600, 0.0);
        let z = axis("Z", n, 0, 5 * 3600, 1.0);
        let bouts = detect_nonwear(&x, &y, &z, 13.0, &NonwearConfig::default());
        assert_eq!(bouts.len(), 1);
        assert_eq!(bouts[0].start, t0() + Duration::hours(2));
        assert_eq!(bouts[0].end, t0() + Duration::hours(4));
    }
}
