//! Result files
//!
//! Every file for one recording is first written as `<name>.partial` in
//! the results folder. `StagedOutputs::commit` renames them all once the
//! recording has been fully processed; dropping an uncommitted stage
//! removes the partial files, so a failed recording leaves nothing behind.

mod metadata;
mod plotting;
mod writers;

pub use metadata::{battery_percentages, MetadataRecord};
pub use plotting::{plot_series, write_plots};
pub use writers::{anomalies_csv, csv_field, epoch_csv, format_timestamp, resolution_name};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::defaults::PARTIAL_SUFFIX;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl OutputError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Output files written but not yet published.
#[derive(Debug)]
pub struct StagedOutputs {
    dir: PathBuf,
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    /// Stage into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| OutputError::io(&dir, e))?;
        Ok(Self {
            dir,
            staged: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Write `contents` to `<dir>/<name>.partial`.
    pub fn write(&mut self, name: &str, contents: &str) -> Result<(), OutputError> {
        let target = self.dir.join(name);
        let partial = self.dir.join(format!("{name}.{PARTIAL_SUFFIX}"));
        std::fs::write(&partial, contents).map_err(|e| OutputError::io(&partial, e))?;
        debug!(file = %partial.display(), bytes = contents.len(), "Staged output");
        self.staged.push((partial, target));
        Ok(())
    }

    /// Rename every staged file to its final name.
    pub fn commit(mut self) -> Result<Vec<PathBuf>, OutputError> {
        let staged = std::mem::take(&mut self.staged);
        let mut published = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some((partial, target)) = pending.next() {
            if let Err(e) = std::fs::rename(&partial, &target) {
                // Unpublished partials are removed on drop
                self.staged = pending.collect();
                self.staged.push((partial.clone(), target));
                return Err(OutputError::io(&partial, e));
            }
            published.push(target);
        }
        Ok(published)
    }
}

impl Drop for StagedOutputs {
    fn drop(&mut self) {
        for (partial, _) in self.staged.drain(..) {
            if let Err(e) = std::fs::remove_file(&partial) {
                warn!(file = %partial.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}
