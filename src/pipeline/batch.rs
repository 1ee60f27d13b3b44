//! Job files and worker sharding
//!
//! A job file is a CSV with a `pid,filename` header and an optional
//! `device` column. Relative filenames resolve against the job file's
//! directory. Worker `job_num` of `num_jobs` (1-based) takes one contiguous
//! chunk, split so the first `len % num_jobs` chunks get one extra row.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{process_file, FileJob};
use crate::config::PipelineConfig;
use crate::output::csv_field;
use crate::types::DeviceType;

#[derive(Error, Debug)]
pub enum JobFileError {
    #[error("Failed to read job file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job file is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("Job file line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid shard {job_num} of {num_jobs}: job numbers run from 1 to the job count")]
    InvalidShard { job_num: usize, num_jobs: usize },
}

/// Read every row of a job file.
pub fn read_job_file(path: &Path) -> Result<Vec<FileJob>, JobFileError> {
    let text = std::fs::read_to_string(path).map_err(|e| JobFileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let base = path.parent().unwrap_or(Path::new(""));
    parse_job_file(&text, base)
}

fn parse_job_file(text: &str, base: &Path) -> Result<Vec<FileJob>, JobFileError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let find = |name: &str| columns.iter().position(|c| c == name);
    let pid_col = find("pid").ok_or(JobFileError::MissingColumn("pid"))?;
    let file_col = find("filename").ok_or(JobFileError::MissingColumn("filename"))?;
    let device_col = find("device");

    let mut jobs = Vec::new();
    for (i, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |index: usize, name: &str| {
            fields
                .get(index)
                .copied()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| JobFileError::Parse {
                    line: i + 1,
                    message: format!("empty {name}"),
                })
        };

        let pid = field(pid_col, "pid")?.to_string();
        let filename = PathBuf::from(field(file_col, "filename")?);
        let path = if filename.is_absolute() {
            filename
        } else {
            base.join(filename)
        };
        let device = match device_col.and_then(|c| fields.get(c).copied()) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<DeviceType>().map_err(|message| JobFileError::Parse {
                line: i + 1,
                message,
            })?),
        };
        jobs.push(FileJob { pid, path, device });
    }
    Ok(jobs)
}

/// Rows assigned to worker `job_num` (1-based) of `num_jobs`.
pub fn shard(jobs: &[FileJob], job_num: usize, num_jobs: usize) -> Result<&[FileJob], JobFileError> {
    if num_jobs == 0 || job_num == 0 || job_num > num_jobs {
        return Err(JobFileError::InvalidShard { job_num, num_jobs });
    }
    let k = job_num - 1;
    let base = jobs.len() / num_jobs;
    let extra = jobs.len() % num_jobs;
    let start = k * base + k.min(extra);
    let len = base + usize::from(k < extra);
    Ok(&jobs[start..start + len])
}

/// Outcome counts for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub log: PathBuf,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch: {} succeeded, {} failed (log: {})",
            self.succeeded,
            self.failed,
            self.log.display()
        )
    }
}

/// Process this worker's shard sequentially, logging each outcome.
///
/// A failing file is logged and skipped; the batch carries on.
pub fn run_batch(
    jobs: &[FileJob],
    cfg: &PipelineConfig,
    job_num: usize,
    num_jobs: usize,
) -> Result<BatchSummary> {
    let mine = shard(jobs, job_num, num_jobs)?;
    info!(job_num, num_jobs, files = mine.len(), total = jobs.len(), "Starting batch");

    let mut log = String::from("pid,filename,status,message\n");
    let mut summary = BatchSummary {
        succeeded: 0,
        failed: 0,
        log: cfg
            .io
            .results_folder
            .join(format!("batch_log_{job_num}_of_{num_jobs}.csv")),
    };

    for job in mine {
        let file = job.path.display().to_string();
        match process_file(job, cfg) {
            Ok(report) => {
                summary.succeeded += 1;
                let _ = writeln!(
                    log,
                    "{},{},ok,{}",
                    csv_field(&job.pid),
                    csv_field(&file),
                    csv_field(&report.to_string())
                );
            }
            Err(e) => {
                summary.failed += 1;
                let message = format!("{e:#}");
                error!(pid = %job.pid, file = %file, error = %message, "File failed");
                let _ = writeln!(
                    log,
                    "{},{},failed,{}",
                    csv_field(&job.pid),
                    csv_field(&file),
                    csv_field(&message)
                );
            }
        }
    }

    std::fs::create_dir_all(&cfg.io.results_folder)
        .with_context(|| format!("Cannot create {}", cfg.io.results_folder.display()))?;
    std::fs::write(&summary.log, log)
        .with_context(|| format!("Failed to write batch log {}", summary.log.display()))?;

    if summary.failed > 0 {
        warn!("{summary}");
    } else {
        info!("{summary}");
    }
    Ok(summary)
}
