//! Channel types: raw loader buffers and dense time series
//!
//! A recording arrives as a `RawChannelSet`: one sample buffer per channel
//! plus sparse page timestamps (`TimestampAnchor`) shared by every channel.
//! After QC repair the anchors are expanded to one offset per observation
//! and each buffer becomes a `Channel`, which is what every later stage
//! consumes.

use chrono::{Duration, NaiveDateTime};
use std::ops::Range;

use super::Bout;

/// Channel names as delivered by loaders.
pub mod channel_names {
    pub const X: &str = "X";
    pub const Y: &str = "Y";
    pub const Z: &str = "Z";
    pub const BATTERY: &str = "Battery";
    pub const TEMPERATURE: &str = "Temperature";
    pub const INTEGRITY: &str = "Integrity";
}

// ============================================================================
// Time helpers
// ============================================================================

/// Convert fractional seconds to a chrono duration (microsecond resolution).
pub fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1e6).round() as i64)
}

/// Signed seconds from `from` to `to`.
pub fn seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    match (to - from).num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => (to - from).num_milliseconds() as f64 / 1e3,
    }
}

/// Midnight at the start of the day containing `t`.
pub fn start_of_day(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(chrono::NaiveTime::MIN)
}

/// Midnight at the start of the day after the one containing `t`.
///
/// Used as the exclusive end of the aggregation period so the final
/// partial day is covered in full.
pub fn end_of_day(t: NaiveDateTime) -> NaiveDateTime {
    start_of_day(t) + Duration::days(1)
}

// ============================================================================
// Raw loader output
// ============================================================================

/// Sparse page timestamp: the sample at `index` was recorded at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampAnchor {
    pub index: usize,
    pub time: NaiveDateTime,
}

/// A single raw sample buffer, before timestamps are expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannel {
    pub name: String,
    pub data: Vec<f64>,
}

impl RawChannel {
    pub fn new(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Raw channels sharing one set of page timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannelSet {
    /// Page timestamps, ordered by sample index
    pub anchors: Vec<TimestampAnchor>,
    /// Nominal sampling frequency (Hz)
    pub frequency: f64,
    pub channels: Vec<RawChannel>,
}

impl RawChannelSet {
    pub fn get(&self, name: &str) -> Option<&RawChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Length of the shortest channel.
    pub fn sample_count(&self) -> usize {
        self.channels.iter().map(|c| c.data.len()).min().unwrap_or(0)
    }

    /// Expand the sparse anchors into one offset per observation.
    ///
    /// Returns the start timestamp and offsets in seconds from it. Offsets
    /// between anchors are linearly interpolated; before the first and after
    /// the last anchor they are extrapolated at the nominal rate.
    pub fn expand_offsets(&self) -> Option<(NaiveDateTime, Vec<f64>)> {
        expand_offsets(&self.anchors, self.sample_count(), self.frequency)
    }

    /// Consume the set, producing dense channels that share one time base.
    pub fn into_channels(self) -> Option<Vec<Channel>> {
        let (start, offsets) = self.expand_offsets()?;
        let n = offsets.len();
        let period = 1.0 / self.frequency;
        Some(
            self.channels
                .into_iter()
                .map(|mut raw| {
                    raw.data.truncate(n);
                    Channel::new(raw.name, start, offsets.clone(), raw.data, period)
                })
                .collect(),
        )
    }
}

/// Interpolate sparse anchors to `n` per-sample offsets.
///
/// The start timestamp is the time of sample 0 (extrapolated back from the
/// first anchor when that anchor is not at index 0).
pub fn expand_offsets(
    anchors: &[TimestampAnchor],
    n: usize,
    frequency: f64,
) -> Option<(NaiveDateTime, Vec<f64>)> {
    let first = anchors.first()?;
    if frequency <= 0.0 {
        return None;
    }
    let period = 1.0 / frequency;
    let start = first.time - seconds_to_duration(first.index as f64 * period);

    // Anchor positions in seconds from start
    let points: Vec<(usize, f64)> = anchors
        .iter()
        .map(|a| (a.index, seconds_between(start, a.time)))
        .collect();

    let mut offsets = Vec::with_capacity(n);
    let mut seg = 0;
    for i in 0..n {
        while seg + 1 < points.len() && points[seg + 1].0 <= i {
            seg += 1;
        }
        let (i0, t0) = points[seg];
        let offset = match points.get(seg + 1) {
            Some(&(i1, t1)) if i >= i0 && i1 > i0 => {
                t0 + (t1 - t0) * (i - i0) as f64 / (i1 - i0) as f64
            }
            _ => t0 + (i as f64 - i0 as f64) * period,
        };
        offsets.push(offset);
    }

    Some((start, offsets))
}

// ============================================================================
// Dense channel
// ============================================================================

/// A named time series with one offset per observation.
///
/// Plain value type: no cached indices. Window operations rebuild the
/// buffers in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    /// Time of offset 0
    pub start: NaiveDateTime,
    /// Seconds from `start`, non-decreasing
    pub offsets: Vec<f64>,
    pub data: Vec<f64>,
    /// Nominal seconds between samples (1 / frequency, or the epoch length
    /// for epoch-level channels)
    pub period: f64,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        start: NaiveDateTime,
        offsets: Vec<f64>,
        data: Vec<f64>,
        period: f64,
    ) -> Self {
        debug_assert_eq!(offsets.len(), data.len());
        Self {
            name: name.into(),
            start,
            offsets,
            data,
            period,
        }
    }

    /// Regularly sampled channel starting at `start`.
    pub fn from_frequency(
        name: impl Into<String>,
        start: NaiveDateTime,
        data: Vec<f64>,
        frequency: f64,
    ) -> Self {
        let period = 1.0 / frequency;
        let offsets = (0..data.len()).map(|i| i as f64 * period).collect();
        Self::new(name, start, offsets, data, period)
    }

    /// A new channel on the same time base with different values.
    pub fn derive(&self, name: impl Into<String>, data: Vec<f64>) -> Self {
        Self::new(name, self.start, self.offsets.clone(), data, self.period)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frequency(&self) -> f64 {
        1.0 / self.period
    }

    pub fn timestamp_at(&self, i: usize) -> NaiveDateTime {
        self.start + seconds_to_duration(self.offsets[i])
    }

    /// First and last sample timestamps.
    pub fn timeframe(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if self.is_empty() {
            return None;
        }
        Some((self.timestamp_at(0), self.timestamp_at(self.len() - 1)))
    }

    fn offset_of(&self, t: NaiveDateTime) -> f64 {
        seconds_between(self.start, t)
    }

    /// Indices of samples with timestamps in `[from, to)`.
    pub fn window_indices(&self, from: NaiveDateTime, to: NaiveDateTime) -> Range<usize> {
        let lo = self.offset_of(from);
        let hi = self.offset_of(to);
        let a = self.offsets.partition_point(|&o| o < lo);
        let b = self.offsets.partition_point(|&o| o < hi);
        a..b.max(a)
    }

    /// Values of samples with timestamps in `[from, to)`.
    pub fn window(&self, from: NaiveDateTime, to: NaiveDateTime) -> &[f64] {
        &self.data[self.window_indices(from, to)]
    }

    /// Remove every sample that falls inside any of the bouts.
    ///
    /// Idempotent: applying the same bouts twice leaves the channel unchanged.
    pub fn delete_windows(&mut self, bouts: &[Bout]) {
        if bouts.is_empty() || self.is_empty() {
            return;
        }
        let mut keep = vec![true; self.len()];
        for bout in bouts {
            for k in &mut keep[self.window_indices(bout.start, bout.end)] {
                *k = false;
            }
        }

        let mut flags = keep.iter();
        self.data.retain(|_| *flags.next().unwrap_or(&true));
        let mut flags = keep.iter();
        self.offsets.retain(|_| *flags.next().unwrap_or(&true));
    }

    /// Overwrite every sample inside any of the bouts with `value`.
    pub fn fill_windows(&mut self, bouts: &[Bout], value: f64) {
        for bout in bouts {
            let range = self.window_indices(bout.start, bout.end);
            for v in &mut self.data[range] {
                *v = value;
            }
        }
    }

    /// Maximal runs of samples with `low <= value <= high`.
    ///
    /// Each bout runs from the first sample of the run to the timestamp of
    /// its last sample.
    pub fn bouts(&self, low: f64, high: f64) -> Vec<Bout> {
        let mut out = Vec::new();
        let mut run_start: Option<usize> = None;

        for (i, &v) in self.data.iter().enumerate() {
            let inside = v >= low && v <= high;
            match (inside, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(s)) => {
                    out.push(Bout::new(self.timestamp_at(s), self.timestamp_at(i - 1)));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            out.push(Bout::new(self.timestamp_at(s), self.timestamp_at(self.len() - 1)));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 10, 4)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_expand_offsets_interpolates_between_pages() {
        // Two pages of 4 samples at 1 Hz, but the second page timestamp is
        // 8 s later instead of 4 s: the first page is stretched to fit.
        let anchors = vec![
            TimestampAnchor { index: 0, time: t0() },
            TimestampAnchor { index: 4, time: t0() + Duration::seconds(8) },
        ];
        let (start, offsets) = expand_offsets(&anchors, 8, 1.0).unwrap();
        assert_eq!(start, t0());
        assert_eq!(offsets, vec![0.0, 2.0, 4.0, 6.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_expand_offsets_extrapolates_before_first_anchor() {
        let anchors = vec![TimestampAnchor { index: 2, time: t0() }];
        let (start, offsets) = expand_offsets(&anchors, 4, 2.0).unwrap();
        assert_eq!(start, t0() - Duration::seconds(1));
        assert_eq!(offsets, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_expand_offsets_requires_anchor() {
        assert!(expand_offsets(&[], 10, 1.0).is_none());
    }

    #[test]
    fn test_window_is_half_open() {
        let ch = Channel::from_frequency("X", t0(), (0..10).map(f64::from).collect(), 1.0);
        let w = ch.window(t0() + Duration::seconds(2), t0() + Duration::seconds(5));
        assert_eq!(w, &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_delete_windows_is_idempotent() {
        let mut ch = Channel::from_frequency("X", t0(), (0..20).map(f64::from).collect(), 1.0);
        let bouts = vec![Bout::new(t0() + Duration::seconds(5), t0() + Duration::seconds(10))];

        ch.delete_windows(&bouts);
        let once = ch.clone();
        ch.delete_windows(&bouts);

        assert_eq!(once.len(), 15);
        assert_eq!(ch, once);
        assert!(!ch.data.contains(&7.0));
    }

    #[test]
    fn test_fill_windows_keeps_length() {
        let mut ch = Channel::from_frequency("Integrity", t0(), vec![0.0; 10], 1.0);
        ch.fill_windows(
            &[Bout::new(t0() + Duration::seconds(3), t0() + Duration::seconds(6))],
            1.0,
        );
        assert_eq!(ch.len(), 10);
        assert_eq!(ch.data.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_bouts_finds_maximal_runs() {
        let data = vec![0.0, -111.0, -111.0, 0.0, -111.0];
        let ch = Channel::from_frequency("X", t0(), data, 1.0);
        let bouts = ch.bouts(-111.0, -111.0);
        assert_eq!(bouts.len(), 2);
        assert_eq!(bouts[0].start, t0() + Duration::seconds(1));
        assert_eq!(bouts[0].end, t0() + Duration::seconds(2));
        assert_eq!(bouts[1].start, t0() + Duration::seconds(4));
    }

    #[test]
    fn test_into_channels_shares_time_base() {
        let set = RawChannelSet {
            anchors: vec![TimestampAnchor { index: 0, time: t0() }],
            frequency: 10.0,
            channels: vec![
                RawChannel::new(channel_names::X, vec![0.0; 5]),
                RawChannel::new(channel_names::Y, vec![0.0; 6]),
            ],
        };
        let channels = set.into_channels().unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].offsets, channels[1].offsets);
        assert_eq!(channels[1].len(), 5);
        assert!((channels[0].frequency() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_day_boundaries() {
        let t = t0() + Duration::hours(5);
        assert_eq!(start_of_day(t), t0() - Duration::hours(9));
        assert_eq!(end_of_day(t), t0() + Duration::hours(15));
    }
}
