//! Processing Pipeline Module
//!
//! ## Per-file stage sequence
//!
//! ```text
//! STAGE 1: Fast load X/Y/Z and classify QC anomalies (on untouched data)
//! STAGE 2: Full load, repair anomalies, expand page timestamps
//! STAGE 3: Extract missing windows; delete from X/Y/Z, flag Integrity
//! STAGE 4: Autocalibrate X/Y/Z, then delete missing windows from every channel
//! STAGE 5: Low-pass X/Y/Z when the sampling rate exceeds the threshold
//! STAGE 6: Derive VM/ENMO/HPFVM/pitch/roll and detect nonwear
//! STAGE 7: Collapse to the processing epoch, masking nonwear and missing windows
//! STAGE 8: Aggregate to every output resolution and publish result files
//! ```
//!
//! Files run strictly one after another; parallelism comes from running
//! several workers over disjoint shards of the job file.

mod batch;
mod processor;

pub use batch::{read_job_file, run_batch, shard, BatchSummary, JobFileError};
pub use processor::{file_stem, process_file, process_with_loader, FileJob, FileReport};
