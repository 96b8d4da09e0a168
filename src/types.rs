use chrono::{DateTime, NaiveDate, Utc};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel mission served by the ARD archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mission {
    /// Sentinel-1 SAR backscatter scenes
    Sentinel1,
    /// Sentinel-2 surface reflectance granules
    Sentinel2,
}

impl Mission {
    /// Archive root for this mission on CEDA
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Mission::Sentinel1 => "https://data.ceda.ac.uk/neodc/sentinel_ard/data/sentinel_1",
            Mission::Sentinel2 => "https://data.ceda.ac.uk/neodc/sentinel_ard/data/sentinel_2",
        }
    }

    /// Filename suffix identifying the primary band asset in a day listing
    pub fn asset_suffix(&self) -> &'static str {
        match self {
            Mission::Sentinel1 => "SpkRL.tif",
            Mission::Sentinel2 => "stdsref.tif",
        }
    }

    /// Short prefix used in persisted file names
    pub fn short_name(&self) -> &'static str {
        match self {
            Mission::Sentinel1 => "s1",
            Mission::Sentinel2 => "s2",
        }
    }

    /// First day the ARD archive holds data for, where known
    pub fn earliest_date(&self) -> Option<NaiveDate> {
        match self {
            Mission::Sentinel1 => NaiveDate::from_ymd_opt(2018, 1, 1),
            Mission::Sentinel2 => None,
        }
    }

    /// Metadata sidecar location for an asset link (S2 only)
    pub fn metadata_link(&self, asset_link: &str) -> Option<String> {
        match self {
            Mission::Sentinel1 => None,
            Mission::Sentinel2 => asset_link
                .strip_suffix(".tif")
                .map(|stem| format!("{}_meta.xml", stem)),
        }
    }

    /// Cloud mask band location for an asset link (S2 only)
    pub fn cloud_mask_link(&self, asset_link: &str) -> Option<String> {
        match self {
            Mission::Sentinel1 => None,
            Mission::Sentinel2 => {
                const PRODUCT: &str = "vmsk_sharp_rad_srefdem_stdsref.tif";
                if asset_link.ends_with(PRODUCT) {
                    Some(asset_link.replace(PRODUCT, "clouds.tif"))
                } else {
                    asset_link
                        .strip_suffix("stdsref.tif")
                        .map(|stem| format!("{}clouds.tif", stem))
                }
            }
        }
    }
}

impl fmt::Display for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mission::Sentinel1 => write!(f, "Sentinel-1"),
            Mission::Sentinel2 => write!(f, "Sentinel-2"),
        }
    }
}

/// Satellite pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PassDirection {
    Ascending,
    Descending,
}

impl PassDirection {
    /// Parse the archive's filename token (`asc` / `desc`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(PassDirection::Ascending),
            "desc" | "dsc" | "descending" => Some(PassDirection::Descending),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            PassDirection::Ascending => "asc",
            PassDirection::Descending => "desc",
        }
    }
}

impl fmt::Display for PassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Relative orbit and pass direction of a Sentinel-1 scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrbitInfo {
    pub relative_orbit: u16,
    pub direction: PassDirection,
}

/// Inclusive acquisition date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ArdResult<Self> {
        if end < start {
            return Err(ArdError::Config(format!(
                "end date {} is before start date {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(start: &str, end: &str) -> ArdResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                ArdError::Config(format!("Invalid date '{}'. Use 'YYYY-MM-DD'.", s))
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every calendar day in the window, in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// `{start}_{end}` key used in persisted file names
    pub fn key(&self) -> String {
        format!("{}_{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

/// Coordinate reference system definition understood by GDAL/OSR
/// (`EPSG:27700`, WKT, PROJ string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(pub String);

impl Crs {
    pub fn wgs84() -> Self {
        Crs("EPSG:4326".to_string())
    }

    pub fn from_epsg(code: u32) -> Self {
        Crs(format!("EPSG:{}", code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.chars().count() > 40 {
            let head: String = self.0.chars().take(40).collect();
            write!(f, "{}...", head)
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Axis-aligned bounding box in an unspecified CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let clipped = BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        (clipped.min_x <= clipped.max_x && clipped.min_y <= clipped.max_y).then_some(clipped)
    }

    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        geo::Rect::new(
            geo::coord! { x: self.min_x, y: self.min_y },
            geo::coord! { x: self.max_x, y: self.max_y },
        )
        .to_polygon()
    }
}

/// GDAL-ordered affine georeferencing transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Georeferenced position of a (fractional) pixel corner
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a georeferenced point
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((col, row))
    }
}

/// Locator for one candidate remote asset, produced by directory listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetLocator {
    pub mission: Mission,
    /// Day directory the asset was listed under
    pub date: NaiveDate,
    /// Direct link (URL or local path) to the band data
    pub link: String,
}

impl AssetLocator {
    /// File name without directories or extension
    pub fn stem(&self) -> &str {
        asset_stem(&self.link)
    }
}

/// File stem of a link, used as the asset identifier
pub fn asset_stem(link: &str) -> &str {
    let name = link.rsplit(['/', '\\']).next().unwrap_or(link);
    name.strip_suffix(".tif").unwrap_or(name)
}

/// Metadata-enriched candidate image (S2 granule or S1 scene)
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub asset_id: String,
    pub mission: Mission,
    pub link: String,
    pub acquired: DateTime<Utc>,
    /// Footprint in `footprint_crs`
    pub footprint: Geometry<f64>,
    pub footprint_crs: Crs,
    /// Cloud-cover fraction in [0, 1], when metadata supplies it
    pub cloud_cover: Option<f64>,
    pub orbit: Option<OrbitInfo>,
    /// MGRS tile for S2 granules
    pub tile: Option<String>,
    /// Fraction of nodata pixels inside an AOI window, filled by mask sampling
    pub nodata_fraction: Option<f64>,
}

impl AssetRecord {
    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }
}

/// Attribute value carried through from the input AOI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => f.write_str(v),
        }
    }
}

/// One search feature of the input vector layer
#[derive(Debug, Clone)]
pub struct AoiFeature {
    pub id: String,
    pub geometry: Geometry<f64>,
    /// User fields in layer order; `None` for null values
    pub attributes: Vec<(String, Option<AttributeValue>)>,
}

/// Input vector layer: features plus their shared reference system
#[derive(Debug, Clone)]
pub struct AoiLayer {
    /// Layer file stem, used to name outputs
    pub name: String,
    pub crs: Crs,
    pub features: Vec<AoiFeature>,
}

/// Join of one AOI feature with one qualifying asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub aoi_id: String,
    pub asset_id: String,
    pub mission: Mission,
    pub link: String,
    pub acquired: DateTime<Utc>,
    pub orbit: Option<OrbitInfo>,
    pub cloud_cover: Option<f64>,
    pub nodata_fraction: Option<f64>,
}

impl LinkRecord {
    pub fn from_asset(aoi_id: &str, asset: &AssetRecord) -> Self {
        Self {
            aoi_id: aoi_id.to_string(),
            asset_id: asset.asset_id.clone(),
            mission: asset.mission,
            link: asset.link.clone(),
            acquired: asset.acquired,
            orbit: asset.orbit,
            cloud_cover: asset.cloud_cover,
            nodata_fraction: asset.nodata_fraction,
        }
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }
}

/// Error types for archive search and extraction
#[derive(Debug, thiserror::Error)]
pub enum ArdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive unreachable: {0}")]
    Connectivity(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Shape mismatch for {asset}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        asset: String,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Output(String),
}

/// Result type for archive operations
pub type ArdResult<T> = Result<T, ArdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_display_shortens_long_definitions() {
        assert_eq!(Crs::from_epsg(27700).to_string(), "EPSG:27700");

        // Multi-byte characters straddling the cut must not split
        let wkt = format!("PROJCS[\"{}\"]", "Réseau géodésique français ".repeat(3));
        let shown = Crs(wkt).to_string();
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 43);
    }
}
