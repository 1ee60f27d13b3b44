//! QC anomaly records

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of an internally inconsistent block of raw data.
///
/// A page is the run of samples between two consecutive timestamp anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    /// Page timestamp earlier than the previous page (clock ran backwards)
    A,
    /// Page timestamp identical to the previous page
    B,
    /// Elapsed time exceeds the page's sample count (samples missing)
    C,
    /// Elapsed time shorter than the page's sample count
    D,
    /// Single page timestamp out of line with both neighbours
    E,
    /// Non-finite sample values inside a page
    F,
    /// Axis sample counts disagree
    G,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 7] = [
        AnomalyType::A,
        AnomalyType::B,
        AnomalyType::C,
        AnomalyType::D,
        AnomalyType::E,
        AnomalyType::F,
        AnomalyType::G,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Self::A => "timestamp ran backwards",
            Self::B => "duplicate page timestamp",
            Self::C => "gap between pages",
            Self::D => "page shorter than its sample count",
            Self::E => "isolated timestamp spike",
            Self::F => "non-finite samples",
            Self::G => "axis length mismatch",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
        };
        write!(f, "{code}")
    }
}

/// One classified inconsistency found during QC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_type: AnomalyType,
    /// Index of the page (anchor) where the anomaly starts
    pub page: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub detail: String,
}

/// Per-type counts, with every type present (zero when absent).
pub fn count_by_type(records: &[AnomalyRecord]) -> BTreeMap<AnomalyType, usize> {
    let mut counts: BTreeMap<AnomalyType, usize> =
        AnomalyType::ALL.iter().map(|&t| (t, 0)).collect();
    for record in records {
        *counts.entry(record.anomaly_type).or_insert(0) += 1;
    }
    counts
}
