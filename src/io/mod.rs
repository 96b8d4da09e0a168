//! Archive, metadata, raster and vector I/O

pub mod archive;
pub mod http;
pub mod layer;
pub mod listing_cache;
pub mod metadata;
pub mod raster;

// Re-export main types
pub use archive::{CedaArchive, DirectoryListing, StaticIndex};
pub use http::HttpClient;
pub use layer::{read_aoi_layer, tiles_intersecting, write_augmented_layer};
pub use listing_cache::ListingCache;
pub use metadata::{MetadataExtractor, MetadataOutcome};
pub use raster::{write_geotiff, RasterHeader, RasterSource};
