//! ceda-ard: catalog resolution and windowed extraction for Sentinel ARD
//!
//! This library finds the Sentinel-1 and Sentinel-2 analysis-ready images of the
//! CEDA archive that cover a set of areas of interest within a date window,
//! filters them for cloud and missing data without downloading whole scenes,
//! and reads only the pixel window each AOI needs from the cloud-optimized
//! GeoTIFFs.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AoiFeature, AoiLayer, ArdError, ArdResult, AssetLocator, AssetRecord, BoundingBox, Crs,
    DateRange, LinkRecord, Mission, OrbitInfo, PassDirection,
};

pub use config::{
    ArchiveConfig, OrbitPolicy, OutputConfig, OutputFormat, QualityConfig, QualityMode,
    SearchConfig, SpatialPredicate,
};

pub use crate::core::{
    extract_from_mapping, search_layer, ExtractionSummary, LinkTable, QualityFilter, Resolver,
    SearchOutcome, SearchSession, SearchTally, WindowedExtractor,
};

pub use io::{read_aoi_layer, CedaArchive, DirectoryListing, MetadataExtractor, StaticIndex};
