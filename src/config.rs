//! Search, quality and output configuration
//!
//! All parameter structs carry `Default` values matching the archive's usual
//! usage and can be loaded from a JSON document.

use crate::types::{ArdError, ArdResult, DateRange, Mission};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Spatial predicate between an asset footprint and an AOI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialPredicate {
    /// Footprint and AOI share at least one point
    Intersects,
    /// Footprint fully contains the AOI
    Contains,
}

/// How per-image usability is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMode {
    /// Scene-level cloud fraction from the metadata sidecar
    Metadata,
    /// Cloud mask and data band sampled over the AOI window only
    MaskSampled,
    /// Metadata check first, then mask sampling for survivors
    Combined,
}

/// Which Sentinel-1 relative orbits survive aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitPolicy {
    /// Most prevalent orbit per pass direction (ties go to the lowest orbit number)
    Dominant,
    /// Exactly these orbits, regardless of prevalence
    Retain(Vec<u16>),
    /// No orbit aggregation
    KeepAll,
}

/// Raster output format for windowed extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// One cropped GeoTIFF per link
    GeoTiff,
    /// One compressed `.npz` per AOI keyed by asset stem
    Npz,
}

/// Remote archive access parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Mission root; defaults to the CEDA ARD location for the mission
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Attempts per unit before the unit is skipped
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause between consecutive day-directory listings
    pub request_delay_ms: u64,
    /// Early stop after this many day directories
    pub max_directories: Option<usize>,
    /// Early stop after this much wall-clock time spent scanning
    pub max_scan_seconds: Option<u64>,
    /// Listing cache directory; `None` uses the platform cache dir
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            request_delay_ms: 50,
            max_directories: None,
            max_scan_seconds: None,
            cache_dir: None,
            use_cache: true,
        }
    }
}

impl ArchiveConfig {
    pub fn base_url_for(&self, mission: Mission) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| mission.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ceda-ard")
        })
    }
}

/// Usability thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub mode: QualityMode,
    /// Maximum accepted cloud fraction in [0, 1]; equality is accepted
    pub cloud_threshold: f64,
    /// Maximum accepted nodata fraction inside the AOI window in [0, 1]
    pub nodata_threshold: f64,
    /// Maximum accepted cloud-mask fraction inside the AOI window; `None`
    /// reuses `cloud_threshold`
    pub mask_cloud_threshold: Option<f64>,
    /// Cloud mask values counted as cloudy
    pub cloud_mask_values: Vec<u8>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mode: QualityMode::Combined,
            cloud_threshold: 0.4,
            nodata_threshold: 0.1,
            mask_cloud_threshold: None,
            cloud_mask_values: vec![1, 2], // cloud, shadow
        }
    }
}

impl QualityConfig {
    /// Threshold applied to the sampled cloud-mask fraction
    pub fn mask_threshold(&self) -> f64 {
        self.mask_cloud_threshold.unwrap_or(self.cloud_threshold)
    }
}

/// Extraction output parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// 1-based band indices to read; `None` reads every band
    pub bands: Option<Vec<usize>>,
    /// Append band1 - band2 (S1 VV - VH in dB)
    pub ratio_band: bool,
    /// Set pixels not touching the AOI polygon to nodata
    pub mask_outside_aoi: bool,
    /// Build per-orbit median composites (S1)
    pub composites: bool,
    /// Write every individual window, not only composites
    pub write_individual: bool,
    pub nodata_value: f32,
    /// Extract only these AOI ids; `None` extracts every AOI in the table
    pub aoi_ids: Option<Vec<String>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            format: OutputFormat::GeoTiff,
            bands: None,
            ratio_band: false,
            mask_outside_aoi: false,
            composites: false,
            write_individual: true,
            nodata_value: -999.0,
            aoi_ids: None,
        }
    }
}

impl OutputConfig {
    /// Whether outputs for `aoi_id` are in scope of this run
    pub fn selects(&self, aoi_id: &str) -> bool {
        self.aoi_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == aoi_id))
    }
}

/// Complete configuration of one search and extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub mission: Mission,
    pub archive: ArchiveConfig,
    pub quality: QualityConfig,
    pub output: OutputConfig,
    pub predicate: SpatialPredicate,
    /// S1 relative orbits to keep while resolving; `None` keeps all
    pub orbit_numbers: Option<Vec<u16>>,
    pub orbit_policy: OrbitPolicy,
    /// S2 tiles to keep while resolving; `None` keeps all
    pub tiles: Option<Vec<String>>,
    /// Tile-grid layer used to derive `tiles` from the AOIs
    pub tile_grid: Option<PathBuf>,
    /// AOI attribute holding the stable feature id; `None` uses the feature id
    pub aoi_id_field: Option<String>,
    /// Bounded worker count for metadata fetches and window reads
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mission: Mission::Sentinel2,
            archive: ArchiveConfig::default(),
            quality: QualityConfig::default(),
            output: OutputConfig::default(),
            predicate: SpatialPredicate::Intersects,
            orbit_numbers: None,
            orbit_policy: OrbitPolicy::Dominant,
            tiles: None,
            tile_grid: None,
            aoi_id_field: Some("id".to_string()),
            workers: 4,
        }
    }
}

impl SearchConfig {
    /// Sentinel-1 defaults: the usual UK relative orbits, dominant-orbit aggregation
    pub fn sentinel1() -> Self {
        Self {
            mission: Mission::Sentinel1,
            orbit_numbers: Some(vec![30, 52, 103, 125, 132]),
            quality: QualityConfig {
                mode: QualityMode::MaskSampled,
                ..QualityConfig::default()
            },
            output: OutputConfig {
                format: OutputFormat::Npz,
                ..OutputConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn sentinel2() -> Self {
        Self {
            orbit_policy: OrbitPolicy::KeepAll,
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        log::info!("Loading search configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SearchConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ArdResult<()> {
        let unit = |name: &str, v: f64| {
            if !(0.0..=1.0).contains(&v) {
                Err(ArdError::Config(format!("{} must be within [0, 1], got {}", name, v)))
            } else {
                Ok(())
            }
        };
        unit("cloud_threshold", self.quality.cloud_threshold)?;
        unit("nodata_threshold", self.quality.nodata_threshold)?;
        if let Some(threshold) = self.quality.mask_cloud_threshold {
            unit("mask_cloud_threshold", threshold)?;
        }

        if self.workers == 0 {
            return Err(ArdError::Config("workers must be at least 1".to_string()));
        }
        if let OrbitPolicy::Retain(orbits) = &self.orbit_policy {
            if orbits.is_empty() {
                return Err(ArdError::Config("orbit retain list is empty".to_string()));
            }
        }
        if let Some(bands) = &self.output.bands {
            if bands.is_empty() || bands.contains(&0) {
                return Err(ArdError::Config(
                    "band indices are 1-based and must not be empty".to_string(),
                ));
            }
        }
        if self.output.ratio_band && self.mission != Mission::Sentinel1 {
            log::warn!("ratio_band is meant for Sentinel-1 VV/VH pairs");
        }
        Ok(())
    }

    /// Validate a date window against the mission archive
    pub fn validate_range(&self, range: &DateRange) -> ArdResult<()> {
        if let Some(earliest) = self.mission.earliest_date() {
            if range.start < earliest {
                return Err(ArdError::Config(format!(
                    "{} archive starts at {}; got {}",
                    self.mission, earliest, range.start
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SearchConfig::default().validate().is_ok());
        assert!(SearchConfig::sentinel1().validate().is_ok());
        assert!(SearchConfig::sentinel2().validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = SearchConfig::default();
        config.quality.cloud_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ArdError::Config(_))));
    }

    #[test]
    fn test_s1_range_before_archive() {
        let config = SearchConfig::sentinel1();
        let range = DateRange::parse("2017-12-30", "2018-01-02").unwrap();
        assert!(config.validate_range(&range).is_err());
        let range = DateRange::parse("2018-06-01", "2018-06-02").unwrap();
        assert!(config.validate_range(&range).is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"mission": "Sentinel1", "workers": 2}"#).unwrap();
        assert_eq!(config.mission, Mission::Sentinel1);
        assert_eq!(config.workers, 2);
        assert_eq!(config.quality.cloud_threshold, 0.4);
        assert_eq!(config.quality.mask_threshold(), 0.4);
        assert!(config.output.selects("any"));
    }

    #[test]
    fn test_mask_threshold_out_of_range() {
        let mut config = SearchConfig::default();
        config.quality.mask_cloud_threshold = Some(-0.1);
        assert!(matches!(config.validate(), Err(ArdError::Config(_))));
        config.quality.mask_cloud_threshold = Some(0.25);
        assert!(config.validate().is_ok());
        assert_eq!(config.quality.mask_threshold(), 0.25);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        let mut config = SearchConfig::sentinel1();
        config.workers = 3;
        config.quality.mask_cloud_threshold = Some(0.2);
        config.output.aoi_ids = Some(vec!["p1".to_string()]);
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SearchConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.mission, Mission::Sentinel1);
        assert_eq!(loaded.workers, 3);
        assert_eq!(loaded.quality.mask_cloud_threshold, Some(0.2));
        assert!(loaded.output.selects("p1"));
        assert!(!loaded.output.selects("p2"));
    }

    #[test]
    fn test_json_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(&path, r#"{"quality": {"cloud_threshold": 1.5}}"#).unwrap();
        assert!(matches!(SearchConfig::from_json_file(&path), Err(ArdError::Config(_))));

        std::fs::write(&path, r#"{"workers": 0}"#).unwrap();
        assert!(matches!(SearchConfig::from_json_file(&path), Err(ArdError::Config(_))));

        assert!(SearchConfig::from_json_file(dir.path().join("absent.json")).is_err());
    }
}
