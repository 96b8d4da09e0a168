//! Fixtures shared by the integration tests: synthetic GeoTIFFs, sidecars and
//! a local mirror of the archive layout.

#![allow(dead_code)]

use ceda_ard::io::raster::write_geotiff;
use ceda_ard::types::GeoTransform;
use chrono::{Datelike, NaiveDate};
use gdal::spatial_ref::SpatialRef;
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn wkt(epsg: u32) -> String {
    SpatialRef::from_epsg(epsg).unwrap().to_wkt().unwrap()
}

/// Write a single- or multi-band Float32 GeoTIFF
pub fn write_raster(path: &Path, bands: &[Array2<f32>], transform: [f64; 6], epsg: u32, nodata: Option<f32>) {
    let (height, width) = bands[0].dim();
    let mut data = Array3::<f32>::zeros((bands.len(), height, width));
    for (i, band) in bands.iter().enumerate() {
        data.index_axis_mut(ndarray::Axis(0), i).assign(band);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    write_geotiff(path, &data, &GeoTransform::from_gdal(transform), &wkt(epsg), nodata).unwrap();
}

/// `{base}/YYYY/MM/DD`
pub fn day_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
}

/// ISO 19115 sidecar with a lat/lon box, start time and ARCSI cloud cover
pub fn sidecar(west: f64, east: f64, south: f64, north: f64, begin: &str, cloud: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco" xmlns:gml="http://www.opengis.net/gml/3.2">
  <gmd:identificationInfo>
    <gmd:MD_DataIdentification>
      <gmd:extent>
        <gmd:EX_Extent>
          <gmd:geographicElement>
            <gmd:EX_GeographicBoundingBox>
              <gmd:westBoundLongitude><gco:Decimal>{}</gco:Decimal></gmd:westBoundLongitude>
              <gmd:eastBoundLongitude><gco:Decimal>{}</gco:Decimal></gmd:eastBoundLongitude>
              <gmd:southBoundLatitude><gco:Decimal>{}</gco:Decimal></gmd:southBoundLatitude>
              <gmd:northBoundLatitude><gco:Decimal>{}</gco:Decimal></gmd:northBoundLatitude>
            </gmd:EX_GeographicBoundingBox>
          </gmd:geographicElement>
          <gmd:temporalElement>
            <gmd:EX_TemporalExtent><gmd:extent><gml:TimePeriod>
              <gml:beginPosition>{}</gml:beginPosition>
            </gml:TimePeriod></gmd:extent></gmd:EX_TemporalExtent>
          </gmd:temporalElement>
        </gmd:EX_Extent>
      </gmd:extent>
      <gmd:supplementalInformation>
        <gco:CharacterString>ARCSI_VERSION: 3.1.6
ARCSI_CLOUD_COVER: {}</gco:CharacterString>
      </gmd:supplementalInformation>
    </gmd:MD_DataIdentification>
  </gmd:identificationInfo>
</gmd:MD_Metadata>"#,
        west, east, south, north, begin, cloud
    )
}

/// GeoJSON layer of WGS84 boxes with an `id` and a `name` property
pub fn write_aoi_geojson(path: &Path, boxes: &[(&str, [f64; 4])]) {
    write_box_collection(path, boxes, |id| format!(r#"{{"id":"{id}","name":"field {id}"}}"#));
}

/// Tile-grid layer with the tile name in a `Name` field
pub fn write_tile_grid(path: &Path, tiles: &[(&str, [f64; 4])]) {
    write_box_collection(path, tiles, |name| format!(r#"{{"Name":"{name}"}}"#));
}

fn write_box_collection(path: &Path, boxes: &[(&str, [f64; 4])], properties: impl Fn(&str) -> String) {
    let features: Vec<String> = boxes
        .iter()
        .map(|(id, [w, s, e, n])| {
            format!(
                r#"{{"type":"Feature","properties":{},"geometry":{{"type":"Polygon","coordinates":[[[{w},{s}],[{e},{s}],[{e},{n}],[{w},{n}],[{w},{s}]]]}}}}"#,
                properties(id),
            )
        })
        .collect();
    let doc = format!(
        r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}}}},"features":[{}]}}"#,
        features.join(",")
    );
    std::fs::write(path, doc).unwrap();
}
