//! Statistics specification: which reducers run on which channel
//!
//! The specification is an ordered list of `(channel, requests)` entries.
//! Entry order, and request order within an entry, fix the output column
//! order of every epoch stream.

use serde::{Deserialize, Serialize};

// ============================================================================
// Channel identifiers
// ============================================================================

/// Channels that can be aggregated into epoch statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    #[serde(rename = "VM")]
    Vm,
    #[serde(rename = "ENMO")]
    Enmo,
    #[serde(rename = "HPFVM")]
    Hpfvm,
    #[serde(rename = "PITCH")]
    Pitch,
    #[serde(rename = "ROLL")]
    Roll,
    Temperature,
    Battery,
    Integrity,
}

impl ChannelId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vm => "VM",
            Self::Enmo => "ENMO",
            Self::Hpfvm => "HPFVM",
            Self::Pitch => "PITCH",
            Self::Roll => "ROLL",
            Self::Temperature => "Temperature",
            Self::Battery => "Battery",
            Self::Integrity => "Integrity",
        }
    }

    /// Motion-derived channels are masked during nonwear; temperature,
    /// battery and integrity stay valid while the device is off the body.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Self::Vm | Self::Enmo | Self::Hpfvm | Self::Pitch | Self::Roll
        )
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Reducers computed over the valid samples of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenericStat {
    Mean,
    Sum,
    /// Number of valid samples
    N,
    /// Expected samples minus valid samples
    Missing,
    /// Population standard deviation
    Std,
    Min,
    Max,
}

impl GenericStat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::N => "n",
            Self::Missing => "missing",
            Self::Std => "std",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// Histogram bin counting values in `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Cutpoint {
    pub lower: f64,
    pub upper: f64,
}

impl Cutpoint {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v < self.upper
    }
}

impl From<[f64; 2]> for Cutpoint {
    fn from(b: [f64; 2]) -> Self {
        Self::new(b[0], b[1])
    }
}

impl From<Cutpoint> for [f64; 2] {
    fn from(c: Cutpoint) -> Self {
        [c.lower, c.upper]
    }
}

/// One statistic request for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatRequest {
    Generic { stats: Vec<GenericStat> },
    Cutpoints { bins: Vec<Cutpoint> },
    /// 1 when any sample in the window is non-zero
    Flag,
}

impl StatRequest {
    /// Output column names for this request on `channel`.
    pub fn column_names(&self, channel: ChannelId) -> Vec<String> {
        match self {
            Self::Generic { stats } => stats
                .iter()
                .map(|s| format!("{}_{}", channel.name(), s.name()))
                .collect(),
            Self::Cutpoints { bins } => bins
                .iter()
                .map(|b| {
                    format!(
                        "{}_{}_{}",
                        channel.name(),
                        format_bound(b.lower),
                        format_bound(b.upper)
                    )
                })
                .collect(),
            Self::Flag => vec![format!("{}_flag", channel.name())],
        }
    }
}

/// Integral bounds print without a decimal point (`ENMO_0_99999`).
fn format_bound(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

// ============================================================================
// Specification
// ============================================================================

/// All requests for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub channel: ChannelId,
    pub requests: Vec<StatRequest>,
}

/// Ordered channel → requests mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsSpec(pub Vec<ChannelStatistics>);

impl StatisticsSpec {
    pub fn entries(&self) -> &[ChannelStatistics] {
        &self.0
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.0.iter().any(|e| e.channel == channel)
    }

    pub fn requests(&self, channel: ChannelId) -> Option<&[StatRequest]> {
        self.0
            .iter()
            .find(|e| e.channel == channel)
            .map(|e| e.requests.as_slice())
    }

    /// Every output column, in specification order.
    pub fn column_names(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|e| e.requests.iter().flat_map(move |r| r.column_names(e.channel)))
            .collect()
    }

    /// Consistency problems (duplicate channels, empty or inverted bins).
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = Vec::new();

        for entry in &self.0 {
            if seen.contains(&entry.channel) {
                problems.push(format!("statistics: channel {} listed twice", entry.channel));
            }
            seen.push(entry.channel);

            if entry.requests.is_empty() {
                problems.push(format!("statistics: channel {} has no requests", entry.channel));
            }
            for request in &entry.requests {
                match request {
                    StatRequest::Generic { stats } if stats.is_empty() => problems.push(format!(
                        "statistics: channel {} has an empty generic request",
                        entry.channel
                    )),
                    StatRequest::Cutpoints { bins } => {
                        for bin in bins {
                            if !bin.lower.is_finite() || !bin.upper.is_finite() || bin.lower >= bin.upper {
                                problems.push(format!(
                                    "statistics: channel {} has invalid cutpoint [{}, {})",
                                    entry.channel, bin.lower, bin.upper
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        problems
    }
}

/// Lower bounds of the ENMO/HPFVM intensity categories (mg).
fn intensity_lower_bounds() -> Vec<f64> {
    let mut vals: Vec<i32> = Vec::new();
    vals.extend((0..5).step_by(1));
    vals.extend((5..150).step_by(5));
    vals.extend((150..300).step_by(10));
    vals.extend((300..1000).step_by(100));
    vals.extend((1000..5000).step_by(1000));
    vals.into_iter().map(f64::from).collect()
}

/// Five-degree tilt bins covering [-90, 90).
fn tilt_bins() -> Vec<Cutpoint> {
    (-90..90)
        .step_by(5)
        .map(|p| Cutpoint::new(f64::from(p), f64::from(p + 5)))
        .collect()
}

impl Default for StatisticsSpec {
    fn default() -> Self {
        use GenericStat::*;

        let intensity_bins: Vec<Cutpoint> = intensity_lower_bounds()
            .into_iter()
            .map(|l| Cutpoint::new(l, 99999.0))
            .collect();

        let intensity = vec![
            StatRequest::Generic {
                stats: vec![Mean, N, Missing, Sum],
            },
            StatRequest::Cutpoints {
                bins: intensity_bins,
            },
        ];
        let tilt = vec![
            StatRequest::Generic {
                stats: vec![Mean, Std, Min, Max],
            },
            StatRequest::Cutpoints { bins: tilt_bins() },
        ];
        let mean_only = vec![StatRequest::Generic { stats: vec![Mean] }];

        Self(vec![
            ChannelStatistics {
                channel: ChannelId::Enmo,
                requests: intensity.clone(),
            },
            ChannelStatistics {
                channel: ChannelId::Hpfvm,
                requests: intensity,
            },
            ChannelStatistics {
                channel: ChannelId::Pitch,
                requests: tilt.clone(),
            },
            ChannelStatistics {
                channel: ChannelId::Roll,
                requests: tilt,
            },
            ChannelStatistics {
                channel: ChannelId::Temperature,
                requests: mean_only.clone(),
            },
            ChannelStatistics {
                channel: ChannelId::Battery,
                requests: mean_only,
            },
            ChannelStatistics {
                channel: ChannelId::Integrity,
                requests: vec![StatRequest::Generic { stats: vec![Sum] }],
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_column_order() {
        let spec = StatisticsSpec::default();
        let cols = spec.column_names();
        assert_eq!(cols[0], "ENMO_mean");
        assert_eq!(cols[3], "ENMO_sum");
        assert_eq!(cols[4], "ENMO_0_99999");
        assert!(cols.contains(&"PITCH_-90_-85".to_string()));
        assert_eq!(cols.last().map(String::as_str), Some("Integrity_sum"));
    }

    #[test]
    fn test_default_intensity_bins() {
        let bounds = intensity_lower_bounds();
        assert_eq!(bounds.len(), 5 + 29 + 15 + 7 + 4);
        assert_eq!(bounds.first(), Some(&0.0));
        assert_eq!(bounds.last(), Some(&4000.0));
    }

    #[test]
    fn test_tilt_bins_partition_range() {
        let bins = tilt_bins();
        assert_eq!(bins.len(), 36);
        for pair in bins.windows(2) {
            assert_eq!(pair[0].upper, pair[1].lower);
        }
    }

    #[test]
    fn test_spec_parses_from_toml_array_of_tables() {
        #[derive(Deserialize)]
        struct Wrapper {
            statistics: StatisticsSpec,
        }
        let toml_str = r#"
[[statistics]]
channel = "ROLL"
requests = [
    { kind = "generic", stats = ["min", "max"] },
    { kind = "cutpoints", bins = [[-90.0, 0.0], [0.0, 90.0]] },
]

[[statistics]]
channel = "Integrity"
requests = [{ kind = "flag" }]
"#;
        let w: Wrapper = toml::from_str(toml_str).expect("spec should parse");
        assert_eq!(
            w.statistics.column_names(),
            vec!["ROLL_min", "ROLL_max", "ROLL_-90_0", "ROLL_0_90", "Integrity_flag"]
        );
        assert!(w.statistics.problems().is_empty());
    }

    #[test]
    fn test_problems_flag_duplicates_and_bad_bins() {
        let spec = StatisticsSpec(vec![
            ChannelStatistics {
                channel: ChannelId::Enmo,
                requests: vec![StatRequest::Cutpoints {
                    bins: vec![Cutpoint::new(5.0, 5.0)],
                }],
            },
            ChannelStatistics {
                channel: ChannelId::Enmo,
                requests: vec![StatRequest::Flag],
            },
        ]);
        let problems = spec.problems();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_motion_channels() {
        assert!(ChannelId::Enmo.is_motion());
        assert!(!ChannelId::Temperature.is_motion());
        assert!(!ChannelId::Integrity.is_motion());
    }
}
