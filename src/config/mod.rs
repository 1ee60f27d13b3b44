//! Pipeline Configuration Module
//!
//! Provides the run configuration loaded from TOML files, replacing
//! hardcoded processing constants with tunable values.
//!
//! ## Loading Order
//!
//! 1. `--config` path on the command line
//! 2. `WAP_CONFIG` environment variable (path to TOML file)
//! 3. `wap_config.toml` in the current working directory
//! 4. Built-in defaults (matching the reference processing settings)
//!
//! ## Usage
//!
//! Build the config once at startup and pass it down by reference:
//!
//! ```ignore
//! let config = PipelineConfig::load();
//! let report = process_file(&job, &loader, &config)?;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
