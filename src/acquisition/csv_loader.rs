//! Decoded-sample CSV loader
//!
//! File layout:
//!
//! ```text
//! # device: axivity
//! # frequency: 100
//! # x_gain: 1.0021
//! timestamp,x,y,z,temperature,battery,integrity
//! 2021-03-01 09:00:00,0.012,-0.981,0.104,24.5,198,0
//! ,0.011,-0.979,0.101,24.5,198,0
//! ```
//!
//! `# key: value` lines form the header and must include `frequency`. A
//! non-empty timestamp cell starts a page. Empty X/Y/Z cells load as NaN
//! so QC reports them. `temperature`, `battery` and `integrity` columns are
//! optional; absent ones load as NaN, NaN and 0.

use chrono::{DateTime, NaiveDateTime};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use super::{LoadError, QcPreview, Recording, RecordingLoader};
use crate::types::{channel_names, DeviceType, RawChannel, RawChannelSet, TimestampAnchor};

/// Loader for CSV files of decoded samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRecordingLoader;

impl RecordingLoader for CsvRecordingLoader {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn load(&self, path: &Path, device: DeviceType) -> Result<Recording, LoadError> {
        let mut parsed = read_csv(path, device, true)?;
        let header = std::mem::take(&mut parsed.header);
        let set = parsed.into_set(true);
        info!(
            path = %path.display(),
            samples = set.sample_count(),
            pages = set.anchors.len(),
            frequency = set.frequency,
            "Loaded recording"
        );
        Ok(Recording {
            header,
            channels: set,
        })
    }

    fn fast_load(&self, path: &Path, device: DeviceType) -> Result<QcPreview, LoadError> {
        let parsed = read_csv(path, device, false)?;
        Ok(QcPreview {
            channels: parsed.into_set(false),
        })
    }
}

// ============================================================================
// Column Mapping
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    timestamp: usize,
    x: usize,
    y: usize,
    z: usize,
    temperature: Option<usize>,
    battery: Option<usize>,
    integrity: Option<usize>,
}

impl ColumnMap {
    fn from_header(line: &str) -> Result<Self, LoadError> {
        let names: Vec<String> = line
            .split(',')
            .map(|c| c.trim().to_ascii_lowercase())
            .collect();
        let find = |name: &str| names.iter().position(|c| c == name);
        let require = |name: &'static str| find(name).ok_or(LoadError::MissingColumn(name));

        Ok(Self {
            timestamp: require("timestamp")?,
            x: require("x")?,
            y: require("y")?,
            z: require("z")?,
            temperature: find("temperature"),
            battery: find("battery"),
            integrity: find("integrity"),
        })
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Default)]
struct Parsed {
    header: Vec<(String, String)>,
    frequency: f64,
    anchors: Vec<TimestampAnchor>,
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    temperature: Vec<f64>,
    battery: Vec<f64>,
    integrity: Vec<f64>,
}

impl Parsed {
    fn into_set(self, full: bool) -> RawChannelSet {
        let mut channels = vec![
            RawChannel::new(channel_names::X, self.x),
            RawChannel::new(channel_names::Y, self.y),
            RawChannel::new(channel_names::Z, self.z),
        ];
        if full {
            channels.push(RawChannel::new(channel_names::TEMPERATURE, self.temperature));
            channels.push(RawChannel::new(channel_names::BATTERY, self.battery));
            channels.push(RawChannel::new(channel_names::INTEGRITY, self.integrity));
        }
        RawChannelSet {
            anchors: self.anchors,
            frequency: self.frequency,
            channels,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, LoadError> {
    File::open(path).map(BufReader::new).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Parse a `# key: value` line.
fn header_line(line: &str) -> Option<(String, String)> {
    let body = line.strip_prefix('#')?;
    let (key, value) = body.split_once(':')?;
    Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
}

fn check_device(header: &[(String, String)], device: DeviceType) -> Result<(), LoadError> {
    let Some((_, value)) = header.iter().find(|(k, _)| k == "device") else {
        return Ok(());
    };
    match value.parse::<DeviceType>() {
        Ok(found) if found == device => Ok(()),
        _ => Err(LoadError::DeviceMismatch {
            expected: device,
            found: value.clone(),
        }),
    }
}

fn frequency(header: &[(String, String)]) -> Result<f64, LoadError> {
    let (key, value) = header
        .iter()
        .find(|(k, _)| k == "frequency")
        .ok_or(LoadError::MissingHeader("frequency"))?;
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => Ok(f),
        _ => Err(LoadError::InvalidHeader {
            key: key.clone(),
            value: value.clone(),
        }),
    }
}

/// Parse a timestamp cell (RFC 3339, naive ISO or epoch seconds).
fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t);
        }
    }
    if let Ok(seconds) = s.parse::<f64>() {
        let whole = seconds.floor();
        let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
        if let Some(dt) = DateTime::from_timestamp(whole as i64, nanos) {
            return Ok(dt.naive_utc());
        }
    }
    Err(format!("Cannot parse timestamp '{s}'"))
}

/// Parse a sample cell; empty cells read as `empty`.
fn parse_cell(fields: &[&str], index: usize, name: &str, empty: f64) -> Result<f64, String> {
    match fields.get(index).map(|s| s.trim()) {
        None | Some("") => Ok(empty),
        Some(s) => s
            .parse::<f64>()
            .map_err(|_| format!("Cannot parse {name} as f64: '{s}'")),
    }
}

fn read_csv(path: &Path, device: DeviceType, full: bool) -> Result<Parsed, LoadError> {
    let mut parsed = Parsed::default();
    let mut columns: Option<ColumnMap> = None;

    for (i, line) in open(path)?.lines().enumerate() {
        let line_num = i + 1;
        let line = line.map_err(|e| LoadError::Parse {
            line: line_num,
            message: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(map) = columns else {
            match header_line(&line) {
                Some(entry) => parsed.header.push(entry),
                None => {
                    check_device(&parsed.header, device)?;
                    parsed.frequency = frequency(&parsed.header)?;
                    columns = Some(ColumnMap::from_header(&line)?);
                }
            }
            continue;
        };

        let fields: Vec<&str> = line.split(',').collect();
        let parse_err = |message: String| LoadError::Parse {
            line: line_num,
            message,
        };

        let stamp = fields.get(map.timestamp).map(|s| s.trim()).unwrap_or("");
        if !stamp.is_empty() {
            let time = parse_timestamp(stamp).map_err(parse_err)?;
            parsed.anchors.push(TimestampAnchor {
                index: parsed.x.len(),
                time,
            });
        }

        parsed.x.push(parse_cell(&fields, map.x, "x", f64::NAN).map_err(parse_err)?);
        parsed.y.push(parse_cell(&fields, map.y, "y", f64::NAN).map_err(parse_err)?);
        parsed.z.push(parse_cell(&fields, map.z, "z", f64::NAN).map_err(parse_err)?);

        if full {
            let optional = |column: Option<usize>, name: &str, empty: f64| match column {
                Some(index) => parse_cell(&fields, index, name, empty),
                None => Ok(empty),
            };
            parsed
                .temperature
                .push(optional(map.temperature, "temperature", f64::NAN).map_err(parse_err)?);
            parsed
                .battery
                .push(optional(map.battery, "battery", f64::NAN).map_err(parse_err)?);
            parsed
                .integrity
                .push(optional(map.integrity, "integrity", 0.0).map_err(parse_err)?);
        }
    }

    if columns.is_none() {
        // Header-only file: still report the most useful problem first
        frequency(&parsed.header)?;
        return Err(LoadError::MissingColumn("timestamp"));
    }
    if parsed.x.is_empty() {
        return Err(LoadError::NoData);
    }
    if parsed.anchors.is_empty() {
        return Err(LoadError::NoTimestamps);
    }

    debug!(
        path = %path.display(),
        rows = parsed.x.len(),
        pages = parsed.anchors.len(),
        full,
        "Parsed CSV recording"
    );
    Ok(parsed)
}
