//! Plot series export
//!
//! Rendering is left to an external tool. For each configured column at a
//! plotted resolution the pipeline writes `timestamp,value,nonwear`, where
//! `nonwear` is 1 when the epoch overlaps a nonwear bout.

use std::fmt::Write as _;
use tracing::{debug, warn};

use super::{format_timestamp, OutputError, StagedOutputs};
use crate::processing::EpochTable;
use crate::types::Bout;

/// Series for `column`, or `None` when the table has no such column.
pub fn plot_series(table: &EpochTable, column: &str, nonwear: &[Bout]) -> Option<String> {
    let values = table.column(column)?;
    let mut out = String::from("timestamp,value,nonwear\n");
    for (t, cell) in table.timestamps.iter().zip(values) {
        let epoch = Bout::new(*t, *t + table.epoch);
        let flagged = nonwear.iter().any(|b| b.overlaps(&epoch));
        let value = match cell {
            Some(v) if v.is_finite() => v.to_string(),
            _ => String::new(),
        };
        let _ = writeln!(out, "{},{},{}", format_timestamp(*t), value, u8::from(flagged));
    }
    Some(out)
}

/// Stage `{stem}_{resolution}_{column}.csv` for every available column.
///
/// Returns the number of series written; absent columns are skipped.
pub fn write_plots(
    staged: &mut StagedOutputs,
    stem: &str,
    resolution: &str,
    table: &EpochTable,
    columns: &[String],
    nonwear: &[Bout],
) -> Result<usize, OutputError> {
    let mut written = 0;
    for column in columns {
        match plot_series(table, column, nonwear) {
            Some(series) => {
                staged.write(&format!("{stem}_{resolution}_{column}.csv"), &series)?;
                written += 1;
            }
            None => warn!(column = %column, resolution, "Plot column not produced, skipping"),
        }
    }
    debug!(resolution, written, "Plot series staged");
    Ok(written)
}
