//! Core catalog resolution and extraction modules

pub mod crs;
pub mod extract;
pub mod link_table;
pub mod matcher;
pub mod orbit;
pub mod parallel;
pub mod quality;
pub mod resolver;
pub mod search;
pub mod window;

// Re-export main types
pub use crs::Reprojector;
pub use extract::{ExtractionSummary, WindowExtract, WindowOutcome, WindowedExtractor};
pub use link_table::{AoiLinks, LinkTable};
pub use matcher::{match_assets, FootprintIndex, MatchResult};
pub use orbit::{apply_policy, group_by_orbit, median_composite, select_orbits, OrbitGroup};
pub use quality::{QualityCounts, QualityFilter, QualityVerdict};
pub use resolver::{DayListing, LocatorFilter, Resolution, Resolver, ScanReport};
pub use search::{extract_from_mapping, search_layer, SearchOutcome, SearchSession, SearchTally};
pub use window::{window_for_bounds, PixelWindow};
