//! CSV rendering of epoch tables and anomaly lists

use chrono::NaiveDateTime;
use std::fmt::Write as _;

use crate::config::defaults::OUTPUT_TIMESTAMP_FORMAT;
use crate::processing::EpochTable;
use crate::types::AnomalyRecord;

/// Output name of a resolution: whole hours as `{h}h`, otherwise `{m}m`.
pub fn resolution_name(minutes: u32) -> String {
    if minutes > 0 && minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{minutes}m")
    }
}

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(OUTPUT_TIMESTAMP_FORMAT).to_string()
}

/// Quote a field when it contains a delimiter, quote or newline.
pub fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_cell(cell: Option<f64>) -> String {
    match cell {
        Some(v) if v.is_finite() => format!("{v}"),
        _ => String::new(),
    }
}

/// `id,timestamp,<columns>` with one row per epoch; missing cells are empty.
pub fn epoch_csv(id: &str, table: &EpochTable) -> String {
    let mut out = String::new();
    out.push_str("id,timestamp");
    for name in table.column_names() {
        out.push(',');
        out.push_str(&csv_field(name));
    }
    out.push('\n');

    let id = csv_field(id);
    for (i, t) in table.timestamps.iter().enumerate() {
        let _ = write!(out, "{id},{}", format_timestamp(*t));
        for cell in table.row(i) {
            out.push(',');
            out.push_str(&format_cell(cell));
        }
        out.push('\n');
    }
    out
}

/// `anomaly_type,page,start,end,detail`, one row per record.
pub fn anomalies_csv(records: &[AnomalyRecord]) -> String {
    let mut out = String::from("anomaly_type,page,start,end,detail\n");
    for r in records {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            r.anomaly_type,
            r.page,
            format_timestamp(r.start),
            format_timestamp(r.end),
            csv_field(&r.detail)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::epochs::EpochColumn;
    use crate::types::AnomalyType;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 7, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_resolution_names() {
        assert_eq!(resolution_name(1), "1m");
        assert_eq!(resolution_name(15), "15m");
        assert_eq!(resolution_name(60), "1h");
        assert_eq!(resolution_name(1440), "24h");
        assert_eq!(resolution_name(90), "90m");
    }

    #[test]
    fn test_epoch_csv_layout() {
        let table = EpochTable {
            epoch: Duration::minutes(1),
            timestamps: vec![t0(), t0() + Duration::minutes(1)],
            columns: vec![
                EpochColumn {
                    name: "ENMO_mean".into(),
                    values: vec![Some(12.5), None],
                },
                EpochColumn {
                    name: "ENMO_n".into(),
                    values: vec![Some(12.0), Some(0.0)],
                },
            ],
        };
        let csv = epoch_csv("P001", &table);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,timestamp,ENMO_mean,ENMO_n");
        assert_eq!(lines[1], "P001,01/07/2019 00:00:00,12.5,12");
        assert_eq!(lines[2], "P001,01/07/2019 00:01:00,,0");
    }

    #[test]
    fn test_anomaly_detail_is_quoted() {
        let csv = anomalies_csv(&[AnomalyRecord {
            anomaly_type: AnomalyType::E,
            page: 3,
            start: t0(),
            end: t0() + Duration::seconds(1),
            detail: "off, but \"fixed\"".into(),
        }]);
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "E,3,01/07/2019 00:00:00,01/07/2019 00:00:01,\"off, but \"\"fixed\"\"\""
        );
    }
}
