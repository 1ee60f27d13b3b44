//! Epoch aggregation
//!
//! Collapses a channel into contiguous fixed-length windows over a time
//! period and reduces each window with the requested statistics. Used in
//! two tiers: raw samples to the processing epoch (one value per window,
//! kept as a `Channel`), then processing-epoch channels to each output
//! resolution (an `EpochTable` whose columns follow the statistics
//! specification).
//!
//! Only finite samples count as valid. A processing-epoch window with no
//! valid samples carries NaN so the next tier sees it as missing.

use chrono::{Duration, NaiveDateTime};
use statrs::statistics::Statistics;
use std::ops::Range;
use tracing::{debug, warn};

use crate::types::{
    end_of_day, seconds_between, start_of_day, Channel, ChannelId, GenericStat, StatRequest,
    StatisticsSpec,
};

// ============================================================================
// Windows
// ============================================================================

/// Aggregation period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimePeriod {
    /// Whole days covering `first..=last`: midnight before the first sample
    /// to midnight after the last.
    pub fn covering(first: NaiveDateTime, last: NaiveDateTime) -> Self {
        Self {
            start: start_of_day(first),
            end: end_of_day(last),
        }
    }

    /// Number of windows of `length`, the last one possibly clipped.
    pub fn window_count(&self, length: Duration) -> usize {
        let total = seconds_between(self.start, self.end);
        let step = seconds_between(self.start, self.start + length);
        if total <= 0.0 || step <= 0.0 {
            return 0;
        }
        (total / step).ceil() as usize
    }
}

/// One window with the indices of the samples that fall in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub range: Range<usize>,
}

impl Window {
    pub fn seconds(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}

/// Contiguous windows of `length` over `period`, aligned to its start.
///
/// Single sweep over the channel's offsets.
pub fn windows(channel: &Channel, period: &TimePeriod, length: Duration) -> Vec<Window> {
    let count = period.window_count(length);
    let mut out = Vec::with_capacity(count);
    let mut lo = channel
        .offsets
        .partition_point(|&o| o < seconds_between(channel.start, period.start));

    for k in 0..count {
        let start = period.start + length * k as i32;
        let end = (start + length).min(period.end);
        let hi_offset = seconds_between(channel.start, end);
        let hi = lo + channel.offsets[lo..].partition_point(|&o| o < hi_offset);
        out.push(Window {
            start,
            end,
            range: lo..hi,
        });
        lo = hi;
    }

    out
}

// ============================================================================
// Reducers
// ============================================================================

fn valid_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

fn generic(stat: GenericStat, valid: &[f64], expected: usize) -> Option<f64> {
    let n = valid.len();
    match stat {
        GenericStat::N => Some(n as f64),
        GenericStat::Missing => Some(expected as f64 - n as f64),
        GenericStat::Sum => Some(valid.iter().sum()),
        _ if n == 0 => None,
        GenericStat::Mean => Some(valid.iter().mean()),
        GenericStat::Std => Some(valid.iter().population_std_dev()),
        GenericStat::Min => Some(Statistics::min(valid.iter())),
        GenericStat::Max => Some(Statistics::max(valid.iter())),
    }
}

/// Reduce one window's samples with `request`, one value per output column.
///
/// `None` is a missing cell.
pub fn reduce(request: &StatRequest, values: &[f64], expected: usize) -> Vec<Option<f64>> {
    let valid = valid_values(values);
    match request {
        StatRequest::Generic { stats } => stats
            .iter()
            .map(|&s| generic(s, &valid, expected))
            .collect(),
        StatRequest::Cutpoints { bins } => bins
            .iter()
            .map(|b| Some(valid.iter().filter(|&&v| b.contains(v)).count() as f64))
            .collect(),
        StatRequest::Flag => {
            if valid.is_empty() {
                vec![None]
            } else {
                vec![Some(if valid.iter().any(|&v| v != 0.0) { 1.0 } else { 0.0 })]
            }
        }
    }
}

/// Samples a window of `seconds` should hold at `period` seconds per sample.
pub fn expected_samples(seconds: f64, period: f64) -> usize {
    if period <= 0.0 {
        return 0;
    }
    (seconds / period).round().max(0.0) as usize
}

// ============================================================================
// Tier one: raw samples to processing epochs
// ============================================================================

/// Single-value reducer used at the processing epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochReducer {
    Mean,
    Flag,
}

impl EpochReducer {
    fn request(&self) -> StatRequest {
        match self {
            Self::Mean => StatRequest::Generic {
                stats: vec![GenericStat::Mean],
            },
            Self::Flag => StatRequest::Flag,
        }
    }
}

/// Collapse `channel` to one value per `epoch` window over `period`.
///
/// The result has one sample per window (NaN where the window had no
/// valid samples), stamped at the window start, with `epoch` as its
/// nominal period.
pub fn processing_epoch_channel(
    channel: &Channel,
    id: ChannelId,
    reducer: EpochReducer,
    period: &TimePeriod,
    epoch: Duration,
) -> Channel {
    let request = reducer.request();
    let epoch_seconds = seconds_between(period.start, period.start + epoch);
    let wins = windows(channel, period, epoch);

    let mut offsets = Vec::with_capacity(wins.len());
    let mut data = Vec::with_capacity(wins.len());
    for (k, w) in wins.iter().enumerate() {
        let expected = expected_samples(w.seconds(), channel.period);
        let value = reduce(&request, &channel.data[w.range.clone()], expected)
            .first()
            .copied()
            .flatten()
            .unwrap_or(f64::NAN);
        offsets.push(k as f64 * epoch_seconds);
        data.push(value);
    }

    debug!(channel = id.name(), windows = data.len(), "Collapsed to processing epoch");
    Channel::new(id.name(), period.start, offsets, data, epoch_seconds)
}

// ============================================================================
// Tier two: processing epochs to output resolutions
// ============================================================================

/// One output column.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Epoch statistics at one resolution: one row per window.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochTable {
    pub epoch: Duration,
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<EpochColumn>,
}

impl EpochTable {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Values of the named column, if the specification produced it.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Cells of row `i` in column order.
    pub fn row(&self, i: usize) -> impl Iterator<Item = Option<f64>> + '_ {
        self.columns.iter().map(move |c| c.values[i])
    }
}

/// Aggregate processing-epoch channels into one table at `epoch`.
///
/// Columns follow `spec` order. A channel named in the specification but
/// absent from `channels` yields columns of missing cells.
pub fn aggregate(
    channels: &[Channel],
    spec: &StatisticsSpec,
    period: &TimePeriod,
    epoch: Duration,
) -> EpochTable {
    let count = period.window_count(epoch);
    let timestamps: Vec<NaiveDateTime> = (0..count)
        .map(|k| period.start + epoch * k as i32)
        .collect();
    let mut columns: Vec<EpochColumn> = Vec::new();

    for entry in spec.entries() {
        let channel = channels.iter().find(|c| c.name == entry.channel.name());
        if channel.is_none() {
            warn!(channel = entry.channel.name(), "Channel not available, writing empty columns");
        }

        for request in &entry.requests {
            let first_col = columns.len();
            columns.extend(request.column_names(entry.channel).into_iter().map(|name| EpochColumn {
                name,
                values: Vec::with_capacity(count),
            }));

            let Some(channel) = channel else {
                for col in &mut columns[first_col..] {
                    col.values = vec![None; count];
                }
                continue;
            };

            for w in windows(channel, period, epoch) {
                let expected = expected_samples(w.seconds(), channel.period);
                let cells = reduce(request, &channel.data[w.range], expected);
                for (col, cell) in columns[first_col..].iter_mut().zip(cells) {
                    col.values.push(cell);
                }
            }
        }
    }

    EpochTable {
        epoch,
        timestamps,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelStatistics, Cutpoint};
    use chrono::NaiveDate;

    fn day() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 10, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_period_covers_whole_days() {
        let p = TimePeriod::covering(day() + Duration::hours(9), day() + Duration::hours(33));
        assert_eq!(p.start, day());
        assert_eq!(p.end, day() + Duration::days(2));
        assert_eq!(p.window_count(Duration::minutes(60)), 48);
    }

    #[test]
    fn test_windows_partition_period_without_gaps() {
        let ch = Channel::from_frequency("X", day(), vec![1.0; 100], 1.0);
        let p = TimePeriod {
            start: day(),
            end: day() + Duration::seconds(95),
        };
        let ws = windows(&ch, &p, Duration::seconds(10));
        assert_eq!(ws.len(), 10);
        for pair in ws.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[0].range.end, pair[1].range.start);
        }
        assert_eq!(ws[0].start, p.start);
        // Last window clipped to the period end
        assert_eq!(ws[9].end, p.end);
        assert_eq!(ws[9].range.len(), 5);
    }

    #[test]
    fn test_empty_window_reducers() {
        let request = StatRequest::Generic {
            stats: vec![
                GenericStat::Mean,
                GenericStat::Sum,
                GenericStat::N,
                GenericStat::Missing,
                GenericStat::Std,
            ],
        };
        let cells = reduce(&request, &[], 12);
        assert_eq!(cells, vec![None, Some(0.0), Some(0.0), Some(12.0), None]);
        assert_eq!(reduce(&StatRequest::Flag, &[f64::NAN], 1), vec![None]);
    }

    #[test]
    fn test_generic_reducers() {
        let request = StatRequest::Generic {
            stats: vec![
                GenericStat::Mean,
                GenericStat::Std,
                GenericStat::Min,
                GenericStat::Max,
                GenericStat::N,
            ],
        };
        let cells = reduce(&request, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0, f64::NAN], 10);
        assert_eq!(cells[0], Some(5.0));
        assert!((cells[1].unwrap() - 2.0).abs() < 1e-12, "population std");
        assert_eq!(cells[2], Some(2.0));
        assert_eq!(cells[3], Some(9.0));
        assert_eq!(cells[4], Some(8.0));
    }

    #[test]
    fn test_cutpoints_with_missing_sum_to_expected() {
        let bins = StatRequest::Cutpoints {
            bins: vec![
                Cutpoint::new(f64::MIN, 0.0),
                Cutpoint::new(0.0, 10.0),
                Cutpoint::new(10.0, f64::MAX),
            ],
        };
        let values = [-1.0, 0.0, 9.99, 10.0, 500.0, f64::NAN];
        let counts: f64 = reduce(&bins, &values, 8).into_iter().flatten().sum();
        let missing = reduce(
            &StatRequest::Generic {
                stats: vec![GenericStat::Missing],
            },
            &values,
            8,
        )[0]
        .unwrap();
        assert_eq!(counts, 5.0);
        assert_eq!(counts + missing, 8.0);
    }

    #[test]
    fn test_flag_reducer() {
        assert_eq!(reduce(&StatRequest::Flag, &[0.0, 0.0], 2), vec![Some(0.0)]);
        assert_eq!(reduce(&StatRequest::Flag, &[0.0, 1.0], 2), vec![Some(1.0)]);
    }

    #[test]
    fn test_processing_epoch_channel_marks_empty_windows() {
        // 1 Hz for the first 20 s of the day only
        let ch = Channel::from_frequency("ENMO", day(), (0..20).map(f64::from).collect(), 1.0);
        let p = TimePeriod::covering(day(), day());
        let epoch = processing_epoch_channel(&ch, ChannelId::Enmo, EpochReducer::Mean, &p, Duration::seconds(5));

        assert_eq!(epoch.len(), 17_280);
        assert_eq!(epoch.data[0], 2.0);
        assert_eq!(epoch.data[3], 17.0);
        assert!(epoch.data[4].is_nan());
        assert_eq!(epoch.period, 5.0);
        assert_eq!(epoch.timestamp_at(2), day() + Duration::seconds(10));
    }

    #[test]
    fn test_resolutions_are_independent_and_row_counts_scale() {
        let p = TimePeriod::covering(day(), day());
        let ch = Channel::from_frequency("ENMO", day(), vec![3.0; 17_280], 0.2);
        let spec = StatisticsSpec(vec![ChannelStatistics {
            channel: ChannelId::Enmo,
            requests: vec![StatRequest::Generic {
                stats: vec![GenericStat::Mean, GenericStat::N, GenericStat::Missing],
            }],
        }]);

        let minute = aggregate(std::slice::from_ref(&ch), &spec, &p, Duration::minutes(1));
        let hour = aggregate(std::slice::from_ref(&ch), &spec, &p, Duration::minutes(60));

        assert_eq!(minute.len(), 1440);
        assert_eq!(hour.len(), 24);
        assert_eq!(minute.len(), hour.len() * 60);
        assert_eq!(minute.column("ENMO_n").unwrap()[0], Some(12.0));
        assert_eq!(hour.column("ENMO_n").unwrap()[0], Some(720.0));
        assert_eq!(hour.column("ENMO_missing").unwrap()[5], Some(0.0));
        assert_eq!(hour.column("ENMO_mean").unwrap()[23], Some(3.0));
    }

    #[test]
    fn test_absent_channel_gives_missing_cells() {
        let p = TimePeriod::covering(day(), day());
        let spec = StatisticsSpec(vec![ChannelStatistics {
            channel: ChannelId::Pitch,
            requests: vec![StatRequest::Generic {
                stats: vec![GenericStat::Mean],
            }],
        }]);
        let table = aggregate(&[], &spec, &p, Duration::minutes(60));
        assert_eq!(table.column_names(), vec!["PITCH_mean"]);
        assert!(table.column("PITCH_mean").unwrap().iter().all(Option::is_none));
        assert!(table.column("ROLL_mean").is_none());
    }
}
