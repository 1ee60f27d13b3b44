//! QC anomaly detection and repair on raw loader buffers
//!
//! Detection runs once, on the preview load, and decides every repair up
//! front. Page timestamps are walked in order and each page's elapsed time
//! is compared with its sample count:
//!
//! ```text
//! discrepancy = elapsed * frequency - samples      (in samples)
//! ```
//!
//! A spike check runs first. When a later anchor within a few pages agrees
//! with the last trusted one again, the anchors in between are reported as
//! `E` and interpolated rather than treated as a pair of opposite errors.
//! Pages whose clock ran backwards, stalled, or ran short (`A`, `B`, `D`)
//! are re-timed to the nominal rate, and the correction carries forward to
//! later pages. Gaps (`C`) are kept and padded with sentinel samples so the
//! missing-window stage excludes them.

use chrono::NaiveDateTime;
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::config::QcConfig;
use crate::types::{
    channel_names, count_by_type, seconds_between, seconds_to_duration, AnomalyRecord,
    AnomalyType, RawChannelSet, TimestampAnchor,
};

const AXES: [&str; 3] = [channel_names::X, channel_names::Y, channel_names::Z];

/// Pages searched for an anchor that agrees with the reference again
const MAX_SPIKE_PAGES: usize = 8;

/// Sentinel samples to insert before sample `at`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Gap {
    at: usize,
    samples: usize,
    /// Time the sentinel run starts when a new anchor is needed
    marker: Option<NaiveDateTime>,
}

/// Repairs decided on the preview, applied to the full load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairPlan {
    /// Common axis length when the axes disagree
    truncate_to: Option<usize>,
    /// Sample ranges of pages holding non-finite values
    non_finite: Vec<Range<usize>>,
    /// Corrected time of every anchor inside the common length
    corrected: Vec<NaiveDateTime>,
    gaps: Vec<Gap>,
}

/// Anomalies found on the preview and the repairs they call for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyReport {
    /// Ordered by start time
    pub records: Vec<AnomalyRecord>,
    pub plan: RepairPlan,
}

impl AnomalyReport {
    pub fn is_clean(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of walking the page timestamps.
#[derive(Debug, Clone, Default)]
struct AnchorScan {
    corrected: Vec<NaiveDateTime>,
    gaps: Vec<Gap>,
    records: Vec<AnomalyRecord>,
}

fn record(
    anomaly_type: AnomalyType,
    page: usize,
    start: NaiveDateTime,
    end: NaiveDateTime,
    detail: String,
) -> AnomalyRecord {
    AnomalyRecord {
        anomaly_type,
        page,
        start,
        end: end.max(start),
        detail,
    }
}

/// Sample count between `base` and `other` minus the samples their times imply.
fn discrepancy(base: &TimestampAnchor, other: &TimestampAnchor, frequency: f64) -> f64 {
    let samples = other.index.saturating_sub(base.index);
    seconds_between(base.time, other.time) * frequency - samples as f64
}

fn agrees(base: &TimestampAnchor, other: &TimestampAnchor, frequency: f64, threshold: f64) -> bool {
    other.index > base.index
        && other.time > base.time
        && discrepancy(base, other, frequency).abs() <= threshold
}

fn scan_anchors(anchors: &[TimestampAnchor], frequency: f64, cfg: &QcConfig) -> AnchorScan {
    let mut scan = AnchorScan::default();
    let Some(first) = anchors.first() else {
        return scan;
    };
    let threshold = f64::from(cfg.discrepancy_threshold);
    scan.corrected.push(first.time);

    // Last trusted anchor: position in `anchors`
    let mut reference = 0usize;
    // Correction carried forward from re-timed pages
    let mut shift = chrono::Duration::zero();

    let mut k = 1;
    while k < anchors.len() {
        let prev_corrected = scan.corrected[k - 1];
        let page_samples = anchors[k].index.saturating_sub(anchors[k - 1].index);
        let nominal = prev_corrected + seconds_to_duration(page_samples as f64 / frequency);

        let base = &anchors[reference];
        let samples = anchors[k].index.saturating_sub(base.index);
        let elapsed = seconds_between(base.time, anchors[k].time);
        let off = discrepancy(base, &anchors[k], frequency);

        if samples == 0 {
            scan.corrected.push(prev_corrected);
            k += 1;
            continue;
        }

        if off.abs() > threshold {
            // Spike: a later anchor agrees with the reference again
            let horizon = anchors.len().min(k + 1 + MAX_SPIKE_PAGES);
            if let Some(resume) =
                (k + 1..horizon).find(|&j| agrees(base, &anchors[j], frequency, threshold))
            {
                let span_samples = (anchors[resume].index - base.index) as f64;
                let span = seconds_between(base.time, anchors[resume].time);
                for bad in k..resume {
                    let fraction = anchors[bad].index.saturating_sub(base.index) as f64 / span_samples;
                    let fixed = scan.corrected[reference] + seconds_to_duration(span * fraction);
                    let bad_off = discrepancy(base, &anchors[bad], frequency);
                    scan.records.push(record(
                        AnomalyType::E,
                        bad,
                        scan.corrected[bad - 1],
                        fixed,
                        format!("anchor off by {bad_off:.1} samples, page {resume} agrees"),
                    ));
                    scan.corrected.push(fixed);
                }
                k = resume;
                continue;
            }
        }

        let retime = if elapsed < 0.0 {
            Some((AnomalyType::A, format!("clock ran back {:.3} s", -elapsed)))
        } else if elapsed == 0.0 {
            Some((AnomalyType::B, format!("repeated timestamp over {samples} samples")))
        } else if off < -threshold {
            Some((
                AnomalyType::D,
                format!("{samples} samples in {elapsed:.3} s ({off:.1} samples)"),
            ))
        } else {
            None
        };

        match retime {
            Some((anomaly_type, detail)) => {
                scan.records
                    .push(record(anomaly_type, k, prev_corrected, nominal, detail));
                shift = nominal - anchors[k].time;
                scan.corrected.push(nominal);
            }
            None => {
                let corrected = anchors[k].time + shift;
                if off > threshold {
                    let missing = off.round() as usize;
                    let gap_seconds = off / frequency;
                    let marker = (gap_seconds > cfg.max_gap_fill_seconds).then_some(nominal);
                    scan.records.push(record(
                        AnomalyType::C,
                        k,
                        nominal,
                        corrected,
                        format!("gap of {missing} samples ({gap_seconds:.1} s)"),
                    ));
                    scan.gaps.push(Gap {
                        at: anchors[k].index,
                        samples: if marker.is_some() { 1 } else { missing },
                        marker,
                    });
                }
                scan.corrected.push(corrected);
            }
        }
        reference = k;
        k += 1;
    }

    scan
}

/// Sample range and time span of `page`.
fn page_span(
    anchors: &[TimestampAnchor],
    page: usize,
    n: usize,
    frequency: f64,
) -> (Range<usize>, NaiveDateTime, NaiveDateTime) {
    let anchor = &anchors[page];
    match anchors.get(page + 1) {
        Some(next) => (anchor.index..next.index.min(n), anchor.time, next.time),
        None => {
            let remaining = n.saturating_sub(anchor.index);
            let end = anchor.time + seconds_to_duration(remaining as f64 / frequency);
            (anchor.index..n, anchor.time, end)
        }
    }
}

fn axis_lengths(set: &RawChannelSet) -> Vec<(&str, usize)> {
    AXES.iter()
        .filter_map(|&name| set.get(name).map(|c| (name, c.data.len())))
        .collect()
}

/// Classify every internally inconsistent block of `preview` and plan its repair.
///
/// Detection never fails; a clean report means the recording is left as loaded.
pub fn detect_anomalies(preview: &RawChannelSet, cfg: &QcConfig) -> AnomalyReport {
    let mut report = AnomalyReport::default();
    let Some(first) = preview.anchors.first() else {
        warn!("No page timestamps in preview, skipping anomaly detection");
        return report;
    };
    let last = preview.anchors.last().map_or(first.time, |a| a.time);

    // G: axis lengths disagree
    let lengths = axis_lengths(preview);
    let shortest = lengths.iter().map(|(_, n)| *n).min();
    if let Some(n) = shortest.filter(|&n| lengths.iter().any(|(_, len)| *len != n)) {
        let detail = lengths
            .iter()
            .map(|(name, len)| format!("{name}={len}"))
            .collect::<Vec<_>>()
            .join(" ");
        report
            .records
            .push(record(AnomalyType::G, 0, first.time, last, detail));
        report.plan.truncate_to = Some(n);
    }

    // Anchors past the common length are dropped by the repair
    let usable = shortest.map_or(preview.anchors.len(), |n| {
        preview.anchors.partition_point(|a| a.index < n)
    });
    let anchors = &preview.anchors[..usable];
    let n = shortest.unwrap_or(0);

    // F: non-finite samples, one record per affected page
    let mut bad_pages: std::collections::BTreeMap<usize, usize> = Default::default();
    for &name in &AXES {
        let Some(channel) = preview.get(name) else { continue };
        for (i, v) in channel.data.iter().take(n).enumerate() {
            if !v.is_finite() {
                let page = anchors.partition_point(|a| a.index <= i).saturating_sub(1);
                *bad_pages.entry(page).or_insert(0) += 1;
            }
        }
    }
    for (page, count) in bad_pages {
        let Some((range, start, end)) =
            (page < anchors.len()).then(|| page_span(anchors, page, n, preview.frequency))
        else {
            continue;
        };
        report.records.push(record(
            AnomalyType::F,
            page,
            start,
            end,
            format!("{count} non-finite samples"),
        ));
        report.plan.non_finite.push(range);
    }

    let scan = scan_anchors(anchors, preview.frequency, cfg);
    report.records.extend(scan.records);
    report.plan.corrected = scan.corrected;
    report.plan.gaps = scan.gaps;
    report.records.sort_by_key(|r| (r.start, r.anomaly_type));

    if report.is_clean() {
        debug!("No QC anomalies");
        return report;
    }
    for r in &report.records {
        debug!(
            kind = %r.anomaly_type,
            page = r.page,
            detail = %r.detail,
            "{}",
            r.anomaly_type.description()
        );
    }
    let counts = count_by_type(&report.records);
    info!(
        total = report.records.len(),
        counts = ?counts.iter().filter(|(_, n)| **n > 0).collect::<Vec<_>>(),
        "QC anomalies detected"
    );
    report
}

/// Replace non-finite values by linear interpolation between the nearest
/// finite neighbours, the single neighbour at either end, or `fallback`.
///
/// Only runs starting inside one of `scope` are touched.
fn interpolate_non_finite(data: &mut [f64], fallback: f64, scope: &[Range<usize>]) -> usize {
    let mut repaired = 0;
    let mut i = 0;
    while i < data.len() {
        if data[i].is_finite() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < data.len() && !data[i].is_finite() {
            i += 1;
        }
        if !scope.iter().any(|r| r.contains(&run_start)) {
            continue;
        }
        let before = run_start.checked_sub(1).map(|j| data[j]);
        let after = data.get(i).copied();
        let width = (i - run_start + 1) as f64;
        for (step, v) in data[run_start..i].iter_mut().enumerate() {
            *v = match (before, after) {
                (Some(a), Some(b)) => a + (b - a) * (step + 1) as f64 / width,
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => fallback,
            };
        }
        repaired += i - run_start;
    }
    repaired
}

/// Apply the repairs planned by [`detect_anomalies`] to the full load.
///
/// Repair order: truncate to the common axis length, interpolate non-finite
/// samples, re-time anchors, then insert sentinel samples for gaps. A clean
/// report returns the set unchanged.
pub fn repair_anomalies(
    report: &AnomalyReport,
    mut set: RawChannelSet,
    cfg: &QcConfig,
) -> RawChannelSet {
    if report.is_clean() {
        return set;
    }
    let plan = &report.plan;

    // G
    if let Some(n) = plan.truncate_to {
        for channel in &mut set.channels {
            channel.data.truncate(n);
        }
        set.anchors.retain(|a| a.index < n);
    }

    // F
    if !plan.non_finite.is_empty() {
        for channel in set.channels.iter_mut().filter(|c| AXES.contains(&c.name.as_str())) {
            let repaired =
                interpolate_non_finite(&mut channel.data, cfg.missing_value, &plan.non_finite);
            if repaired > 0 {
                debug!(channel = %channel.name, repaired, "Interpolated non-finite samples");
            }
        }
    }

    // A, B, D, E
    if set.anchors.len() != plan.corrected.len() {
        warn!(
            loaded = set.anchors.len(),
            planned = plan.corrected.len(),
            "Full load and preview disagree on page count, re-timing the common pages"
        );
    }
    for (anchor, time) in set.anchors.iter_mut().zip(&plan.corrected) {
        anchor.time = *time;
    }

    // C, back to front so earlier insert positions stay valid
    for gap in plan.gaps.iter().rev() {
        for channel in &mut set.channels {
            let fill = if channel.name == channel_names::INTEGRITY {
                cfg.integrity_flag_value
            } else {
                cfg.missing_value
            };
            let at = gap.at.min(channel.data.len());
            channel
                .data
                .splice(at..at, std::iter::repeat(fill).take(gap.samples));
        }
        for anchor in set.anchors.iter_mut().filter(|a| a.index >= gap.at) {
            anchor.index += gap.samples;
        }
        if let Some(time) = gap.marker {
            let pos = set.anchors.partition_point(|a| a.index < gap.at);
            set.anchors.insert(pos, TimestampAnchor { index: gap.at, time });
        }
    }

    info!(
        anomalies = report.records.len(),
        samples = set.sample_count(),
        gaps_filled = plan.gaps.len(),
        "QC repair applied"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawChannel;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 2, 12)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    /// 1 Hz set with pages of `page` samples anchored at the given seconds.
    fn set_with_anchors(n: usize, page: usize, seconds: &[i64]) -> RawChannelSet {
        let anchors = seconds
            .iter()
            .enumerate()
            .map(|(k, &s)| TimestampAnchor {
                index: k * page,
                time: t0() + Duration::seconds(s),
            })
            .collect();
        RawChannelSet {
            anchors,
            frequency: 1.0,
            channels: vec![
                RawChannel::new("X", vec![0.0; n]),
                RawChannel::new("Y", vec![0.0; n]),
                RawChannel::new("Z", vec![1.0; n]),
                RawChannel::new("Integrity", vec![0.0; n]),
            ],
        }
    }

    fn types(records: &[AnomalyRecord]) -> Vec<AnomalyType> {
        records.iter().map(|r| r.anomaly_type).collect()
    }

    #[test]
    fn test_clean_recording_passes_through() {
        let set = set_with_anchors(400, 100, &[0, 100, 200, 300]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert!(report.is_clean());
        assert_eq!(repair_anomalies(&report, set.clone(), &cfg), set);
    }

    #[test]
    fn test_within_threshold_is_clean() {
        let set = set_with_anchors(300, 100, &[0, 102, 200]);
        assert!(detect_anomalies(&set, &QcConfig::default()).is_clean());
    }

    #[test]
    fn test_single_spike_reported_once() {
        let set = set_with_anchors(400, 100, &[0, 100, 150, 300]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::E]);

        let repaired = repair_anomalies(&report, set, &cfg);
        assert_eq!(repaired.anchors[2].time, t0() + Duration::seconds(200));
        assert_eq!(repaired.anchors[3].time, t0() + Duration::seconds(300));
    }

    #[test]
    fn test_clock_step_back_retimes_rest() {
        // Clock stepped back 20 s at page 2 and stayed there
        let set = set_with_anchors(400, 100, &[0, 100, 180, 280]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::D]);

        let repaired = repair_anomalies(&report, set, &cfg);
        let times: Vec<_> = repaired.anchors.iter().map(|a| a.time).collect();
        assert_eq!(times[2], t0() + Duration::seconds(200));
        assert_eq!(times[3], t0() + Duration::seconds(300));
    }

    #[test]
    fn test_backwards_and_duplicate_timestamps() {
        let set = set_with_anchors(300, 100, &[0, -50, 50]);
        assert_eq!(
            types(&detect_anomalies(&set, &QcConfig::default()).records),
            vec![AnomalyType::A]
        );

        let set = set_with_anchors(300, 100, &[0, 0, 100]);
        assert_eq!(
            types(&detect_anomalies(&set, &QcConfig::default()).records),
            vec![AnomalyType::B]
        );
    }

    #[test]
    fn test_gap_is_filled_with_sentinel() {
        // 50 s missing between page 1 and page 2
        let set = set_with_anchors(300, 100, &[0, 100, 250]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::C]);

        let repaired = repair_anomalies(&report, set, &cfg);
        assert_eq!(repaired.sample_count(), 350);
        let x = &repaired.get("X").unwrap().data;
        assert!(x[200..250].iter().all(|&v| v == -111.0));
        assert_eq!(x[250], 0.0);
        let integrity = &repaired.get("Integrity").unwrap().data;
        assert_eq!(integrity[200..250].iter().sum::<f64>(), 50.0);
        assert_eq!(repaired.anchors[2].index, 250);

        let (_, offsets) = repaired.expand_offsets().unwrap();
        assert!((offsets[250] - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_gap_marked_not_filled() {
        let set = set_with_anchors(300, 100, &[0, 100, 100_200]);
        let cfg = QcConfig {
            max_gap_fill_seconds: 3600.0,
            ..QcConfig::default()
        };
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::C]);

        let repaired = repair_anomalies(&report, set, &cfg);
        assert_eq!(repaired.sample_count(), 301);
        assert_eq!(repaired.get("X").unwrap().data[200], -111.0);
        // Marker anchor sits at the end of the page before the gap
        assert_eq!(repaired.anchors.len(), 4);
        assert_eq!(repaired.anchors[2].index, 200);
        assert_eq!(repaired.anchors[2].time, t0() + Duration::seconds(200));
        assert_eq!(repaired.anchors[3].index, 201);
    }

    #[test]
    fn test_non_finite_samples_interpolated() {
        let mut set = set_with_anchors(200, 100, &[0, 100]);
        set.channels[0].data[10] = f64::NAN;
        set.channels[0].data[11] = f64::INFINITY;
        set.channels[0].data[12] = 0.3;
        set.channels[0].data[9] = 0.0;
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::F]);
        assert_eq!(report.records[0].page, 0);

        let repaired = repair_anomalies(&report, set, &cfg);
        let x = &repaired.get("X").unwrap().data;
        assert!((x[10] - 0.1).abs() < 1e-12);
        assert!((x[11] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_axis_length_mismatch_truncates() {
        let mut set = set_with_anchors(300, 100, &[0, 100, 200]);
        set.channels[1].data.truncate(250);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::G]);

        let repaired = repair_anomalies(&report, set, &cfg);
        assert!(repaired.channels.iter().all(|c| c.data.len() == 250));
        assert_eq!(repaired.anchors.len(), 3);
    }

    #[test]
    fn test_interpolate_edges_and_empty() {
        let mut data = vec![f64::NAN, 2.0, f64::NAN];
        assert_eq!(interpolate_non_finite(&mut data, -111.0, &[0..3]), 2);
        assert_eq!(data, vec![2.0, 2.0, 2.0]);

        let mut data = vec![f64::NAN; 3];
        interpolate_non_finite(&mut data, -111.0, &[0..3]);
        assert_eq!(data, vec![-111.0; 3]);
    }

    #[test]
    fn test_adjacent_bad_anchors_reported_as_spike() {
        // Pages 2 and 3 carry bad times, page 4 agrees with page 1 again
        let set = set_with_anchors(600, 100, &[0, 100, 150, 160, 400, 500]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&set, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::E, AnomalyType::E]);
        assert_eq!(report.records[0].page, 2);
        assert_eq!(report.records[1].page, 3);

        let repaired = repair_anomalies(&report, set, &cfg);
        assert_eq!(repaired.sample_count(), 600);
        assert!(!repaired.get("X").unwrap().data.contains(&-111.0));
        let anchors: Vec<_> = repaired.anchors.iter().map(|a| (a.index, a.time)).collect();
        for (k, (index, time)) in anchors.into_iter().enumerate() {
            assert_eq!(index, k * 100);
            assert_eq!(time, t0() + Duration::seconds(k as i64 * 100));
        }
    }

    #[test]
    fn test_repair_follows_preview_plan() {
        let preview = set_with_anchors(400, 100, &[0, 100, 150, 300]);
        let cfg = QcConfig::default();
        let report = detect_anomalies(&preview, &cfg);
        assert_eq!(types(&report.records), vec![AnomalyType::E]);

        // Full load carries a non-finite value the preview never saw
        let mut full = preview.clone();
        full.channels[0].data[350] = f64::NAN;
        full.channels.push(RawChannel::new("Temperature", vec![25.0; 400]));

        let repaired = repair_anomalies(&report, full, &cfg);
        let times: Vec<_> = repaired.anchors.iter().map(|a| a.time).collect();
        assert_eq!(times, report.plan.corrected);
        assert_eq!(times[2], t0() + Duration::seconds(200));
        assert!(repaired.get("X").unwrap().data[350].is_nan());
        assert_eq!(repaired.get("Temperature").unwrap().data.len(), 400);
    }

    #[test]
    fn test_interpolate_skips_runs_outside_scope() {
        let mut data = vec![1.0, f64::NAN, 3.0, f64::NAN, 5.0];
        assert_eq!(interpolate_non_finite(&mut data, -111.0, &[0..2]), 1);
        assert_eq!(data[1], 2.0);
        assert!(data[3].is_nan());
    }
}
