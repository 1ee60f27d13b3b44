//! Shared data structures for the acceleration processing pipeline
//!
//! This module defines the core types passed between pipeline stages:
//! - Raw loader buffers with sparse page timestamps (`RawChannelSet`)
//! - Dense time series after timestamp expansion (`Channel`)
//! - Exclusion / annotation intervals (`Bout`)
//! - QC anomaly records (`AnomalyRecord`)
//! - Calibration parameters and fit diagnostics
//! - Device families (`DeviceType`)
//! - The statistics specification driving epoch aggregation

mod anomaly;
mod bout;
mod calibration;
mod channel;
mod device;
mod statistics;

pub use anomaly::*;
pub use bout::*;
pub use calibration::*;
pub use channel::*;
pub use device::*;
pub use statistics::*;
