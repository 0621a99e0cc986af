//! sarprep: Sentinel-1 analysis-ready-data preprocessing
//!
//! Scenes are turned into calibrated, terrain-corrected backscatter by
//! driving ESA SNAP's `gpt`, then stacked into time-series, reduced to
//! timescans and mosaicked across tracks with GDAL and Orfeo ToolBox.

pub mod types;
pub mod config;
pub mod logging;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, BoundingBox, Mission, Polarization, ProductType, SarError, SarResult,
};
pub use config::{ArdParameters, ArdType, ProcessingConfig};
pub use io::{Sentinel1Scene, SafeManifest, Downloader, Mirror, Credentials};
pub use core::{Gpt, DimapProduct, ArdOutputs, CreateArdOptions};
