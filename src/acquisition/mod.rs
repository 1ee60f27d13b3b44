//! Recording acquisition
//!
//! Device decoding is pluggable: anything implementing `RecordingLoader`
//! can feed the pipeline. The bundled `CsvRecordingLoader` reads already
//! decoded samples with sparse page timestamps.

mod csv_loader;
mod loader;

pub use csv_loader::CsvRecordingLoader;
pub use loader::{loader_for, LoadError, QcPreview, Recording, RecordingLoader};
