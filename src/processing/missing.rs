//! Missing-data windows
//!
//! Loaders and gap repair write a sentinel value wherever no data was
//! recorded. Every run of sentinel samples becomes an exclusion bout padded
//! on both sides and clamped to the recording's timeframe; padded bouts that
//! overlap are merged into one window. Bouts are half-open,
//! so the clamp at the far end is the instant one sample period after the
//! last sample; a run touching the end of the recording is removed whole.

use tracing::{debug, info};

use crate::config::QcConfig;
use crate::types::{merge_bouts, seconds_to_duration, Bout, Channel};

/// Buffered exclusion bouts around every run of `cfg.missing_value` in `reference`.
///
/// Empty when the sentinel never occurs.
pub fn extract_missing_bouts(reference: &Channel, cfg: &QcConfig) -> Vec<Bout> {
    let Some((first, last)) = reference.timeframe() else {
        return Vec::new();
    };
    let buffer = seconds_to_duration(cfg.missing_buffer_seconds);
    let end_bound = last + seconds_to_duration(reference.period);

    let padded: Vec<Bout> = reference
        .bouts(cfg.missing_value, cfg.missing_value)
        .into_iter()
        .map(|run| {
            let start = (run.start - buffer).max(first);
            let end = (run.end + buffer).min(end_bound);
            debug!(run_start = %run.start, run_end = %run.end, "Missing run");
            Bout::new(start, end)
        })
        .collect();
    let bouts = merge_bouts(padded);

    if !bouts.is_empty() {
        info!(
            channel = %reference.name,
            bouts = bouts.len(),
            buffer_seconds = cfg.missing_buffer_seconds,
            "Found missing-data windows"
        );
    }
    bouts
}

/// Delete samples inside `bouts` from every channel in `channels`.
pub fn delete_missing<'a>(channels: impl IntoIterator<Item = &'a mut Channel>, bouts: &[Bout]) {
    for channel in channels {
        channel.delete_windows(bouts);
    }
}
