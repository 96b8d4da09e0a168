//! Per-asset metadata: file-name conventions, ISO 19115 sidecars and raster headers
//!
//! Nothing here reads pixel data. Sentinel-2 granules are described by their
//! `_meta.xml` sidecar, Sentinel-1 scenes by their GeoTIFF header.

use crate::io::http::HttpClient;
use crate::io::raster::RasterSource;
use crate::types::{
    asset_stem, ArdError, ArdResult, AssetLocator, AssetRecord, BoundingBox, Crs, Mission,
    OrbitInfo, PassDirection,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use geo::Geometry;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Fields encoded in an ARD asset file name
#[derive(Debug, Clone, PartialEq)]
pub struct NameInfo {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub orbit: Option<OrbitInfo>,
    pub tile: Option<String>,
}

impl NameInfo {
    pub fn timestamp(&self) -> DateTime<Utc> {
        let time = self.time.unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&self.date.and_time(time))
    }
}

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"_(\d{8})_").expect("valid date regex"))
}

fn tile_regex() -> &'static Regex {
    static TILE: OnceLock<Regex> = OnceLock::new();
    TILE.get_or_init(|| Regex::new(r"_(T\d{2}[A-Z]{3})_").expect("valid tile regex"))
}

/// Parse a Sentinel-1 ARD name: `S1A_YYYYMMDD_ORB_asc|desc_HHMMSS_..._SpkRL.tif`
pub fn parse_s1_name(link: &str) -> Option<NameInfo> {
    let stem = asset_stem(link);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 || !parts[0].starts_with("S1") {
        return None;
    }
    let date = NaiveDate::parse_from_str(parts[1], "%Y%m%d").ok()?;
    let relative_orbit: u16 = parts[2].parse().ok()?;
    let direction = PassDirection::from_token(parts[3])?;
    let time = parts
        .get(4)
        .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok());
    Some(NameInfo {
        date,
        time,
        orbit: Some(OrbitInfo {
            relative_orbit,
            direction,
        }),
        tile: None,
    })
}

/// Parse a Sentinel-2 ARD name: `S2A_YYYYMMDD_latNNlonNNN_TxxXXX_ORBnnn_..._stdsref.tif`
pub fn parse_s2_name(link: &str) -> Option<NameInfo> {
    let stem = asset_stem(link);
    let padded = format!("{}_", stem);
    let date_str = date_regex().captures(&padded)?.get(1)?.as_str().to_string();
    let date = NaiveDate::parse_from_str(&date_str, "%Y%m%d").ok()?;
    let tile = tile_regex()
        .captures(&padded)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    Some(NameInfo {
        date,
        time: None,
        orbit: None,
        tile,
    })
}

pub fn parse_name(mission: Mission, link: &str) -> Option<NameInfo> {
    match mission {
        Mission::Sentinel1 => parse_s1_name(link),
        Mission::Sentinel2 => parse_s2_name(link),
    }
}

/// Values pulled from an ISO 19115 metadata document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsoMetadata {
    pub west: Option<f64>,
    pub east: Option<f64>,
    pub south: Option<f64>,
    pub north: Option<f64>,
    pub begin: Option<DateTime<Utc>>,
    pub cloud_cover: Option<f64>,
}

impl IsoMetadata {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        Some(BoundingBox::new(self.west?, self.south?, self.east?, self.north?))
    }
}

/// Parse the bounding box, start time and ARCSI cloud cover of a sidecar
///
/// Element matching uses local names so the `gmd:`/`gco:`/`gml:` prefixes
/// do not matter.
pub fn parse_iso_metadata(xml: &str) -> ArdResult<IsoMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut meta = IsoMetadata::default();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ArdError::XmlParsing(format!("Bad text node: {}", e)))?;
                assign_text(&mut meta, &path, &text)?;
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                assign_text(&mut meta, &path, &text)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ArdError::XmlParsing(format!(
                    "Error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(meta)
}

fn assign_text(meta: &mut IsoMetadata, path: &[String], text: &str) -> ArdResult<()> {
    let has = |name: &str| path.iter().any(|p| p == name);
    let coordinate = || -> ArdResult<f64> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        cleaned
            .parse()
            .map_err(|_| ArdError::MalformedMetadata(format!("Bad coordinate '{}'", text.trim())))
    };

    if has("westBoundLongitude") {
        meta.west = Some(coordinate()?);
    } else if has("eastBoundLongitude") {
        meta.east = Some(coordinate()?);
    } else if has("southBoundLatitude") {
        meta.south = Some(coordinate()?);
    } else if has("northBoundLatitude") {
        meta.north = Some(coordinate()?);
    } else if has("beginPosition") && meta.begin.is_none() {
        meta.begin = parse_timestamp(text.trim());
    } else if has("supplementalInformation") {
        if let Some(cloud) = parse_arcsi_cloud(text)? {
            meta.cloud_cover = Some(cloud);
        }
    }
    Ok(())
}

/// Find `ARCSI_CLOUD_COVER: x` in the free-text supplemental information
pub fn parse_arcsi_cloud(text: &str) -> ArdResult<Option<f64>> {
    for line in text.lines() {
        let compact: String = line.split_whitespace().collect();
        if let Some(rest) = compact.strip_prefix("ARCSI_CLOUD_COVER") {
            let value = rest.trim_start_matches(':');
            return value.parse::<f64>().map(Some).map_err(|_| {
                ArdError::MalformedMetadata(format!("Bad ARCSI_CLOUD_COVER value '{}'", value))
            });
        }
    }
    Ok(None)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

/// Build an S2 record from its sidecar; `Err(MalformedMetadata)` for unusable documents
pub fn s2_record_from_xml(locator: &AssetLocator, xml: &str) -> ArdResult<AssetRecord> {
    let meta = parse_iso_metadata(xml)?;
    let name = parse_s2_name(&locator.link);

    let bbox = meta.bounding_box().ok_or_else(|| {
        ArdError::MalformedMetadata(format!("{}: missing bounding box", locator.stem()))
    })?;
    if bbox.min_x > bbox.max_x || bbox.min_y > bbox.max_y {
        return Err(ArdError::MalformedMetadata(format!(
            "{}: inverted bounding box {:?}",
            locator.stem(),
            bbox
        )));
    }

    let cloud_cover = meta.cloud_cover;
    if let Some(cloud) = cloud_cover {
        if !(0.0..=1.0).contains(&cloud) {
            return Err(ArdError::MalformedMetadata(format!(
                "{}: cloud cover {} outside [0, 1]",
                locator.stem(),
                cloud
            )));
        }
    }

    let acquired = meta
        .begin
        .or_else(|| name.as_ref().map(NameInfo::timestamp))
        .ok_or_else(|| {
            ArdError::MalformedMetadata(format!("{}: no acquisition time", locator.stem()))
        })?;

    Ok(AssetRecord {
        asset_id: locator.stem().to_string(),
        mission: Mission::Sentinel2,
        link: locator.link.clone(),
        acquired,
        footprint: Geometry::Polygon(bbox.to_polygon()),
        footprint_crs: Crs::wgs84(),
        cloud_cover,
        orbit: None,
        tile: name.and_then(|n| n.tile),
        nodata_fraction: None,
    })
}

/// Result of describing one asset
#[derive(Debug)]
pub enum MetadataOutcome {
    Record(AssetRecord),
    /// Document present but unusable; the asset is discarded
    Malformed(String),
    /// Fetch failed after retries; the asset is skipped
    Unreachable(String),
}

impl MetadataOutcome {
    pub fn into_record(self) -> Option<AssetRecord> {
        match self {
            MetadataOutcome::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Fetches sidecars or raster headers and turns locators into asset records
pub struct MetadataExtractor {
    client: HttpClient,
    open_attempts: u32,
    retry_delay: Duration,
}

impl MetadataExtractor {
    pub fn new(client: HttpClient, open_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            open_attempts,
            retry_delay,
        }
    }

    /// `extract(locator) -> record | None`
    pub fn extract(&self, locator: &AssetLocator) -> Option<AssetRecord> {
        self.describe(locator).into_record()
    }

    pub fn describe(&self, locator: &AssetLocator) -> MetadataOutcome {
        let outcome = match locator.mission {
            Mission::Sentinel2 => self.describe_s2(locator),
            Mission::Sentinel1 => self.describe_s1(locator),
        };
        match &outcome {
            MetadataOutcome::Malformed(reason) => {
                log::warn!("Discarding {}: {}", locator.stem(), reason)
            }
            MetadataOutcome::Unreachable(reason) => {
                log::warn!("Skipping {}: {}", locator.stem(), reason)
            }
            MetadataOutcome::Record(_) => {}
        }
        outcome
    }

    fn describe_s2(&self, locator: &AssetLocator) -> MetadataOutcome {
        let Some(xml_link) = Mission::Sentinel2.metadata_link(&locator.link) else {
            return MetadataOutcome::Malformed("link has no .tif suffix".to_string());
        };
        let xml = match self.client.get_text(&xml_link) {
            Ok(Some(xml)) => xml,
            Ok(None) => return MetadataOutcome::Malformed(format!("no metadata at {}", xml_link)),
            Err(e) => return MetadataOutcome::Unreachable(e.to_string()),
        };
        match s2_record_from_xml(locator, &xml) {
            Ok(record) => MetadataOutcome::Record(record),
            Err(e) => MetadataOutcome::Malformed(e.to_string()),
        }
    }

    fn describe_s1(&self, locator: &AssetLocator) -> MetadataOutcome {
        let Some(name) = parse_s1_name(&locator.link) else {
            return MetadataOutcome::Malformed("unrecognised Sentinel-1 file name".to_string());
        };
        let source = match RasterSource::open_with_retries(&locator.link, self.open_attempts, self.retry_delay) {
            Ok(source) => source,
            Err(ArdError::GeometryMismatch(reason)) => return MetadataOutcome::Malformed(reason),
            Err(e) => return MetadataOutcome::Unreachable(e.to_string()),
        };
        let header = source.header();

        MetadataOutcome::Record(AssetRecord {
            asset_id: locator.stem().to_string(),
            mission: Mission::Sentinel1,
            link: locator.link.clone(),
            acquired: name.timestamp(),
            footprint: Geometry::Polygon(header.bounds().to_polygon()),
            footprint_crs: header.crs.clone(),
            cloud_cover: None,
            orbit: name.orbit,
            tile: None,
            nodata_fraction: None,
        })
    }
}
