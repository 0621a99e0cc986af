//! Processing chains driving SNAP, GDAL and OTB

pub mod gpt;
pub mod graphs;
pub mod dimap;
pub mod wrappers;
pub mod border_noise;
pub mod raster;
pub mod grd_to_ard;
pub mod timeseries;
pub mod timescan;
pub mod mosaic;
pub mod batch;

// Re-export main types
pub use gpt::{Gpt, GptCommand};
pub use dimap::DimapProduct;
pub use grd_to_ard::{ArdJob, ArdOutputs, CreateArdOptions};
pub use timescan::TimescanParams;
pub use mosaic::MosaicOptions;
pub use batch::{BatchStages, Inventory, ProcessedAcquisition};
