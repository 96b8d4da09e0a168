//! AOI vector layers through GDAL/OGR
//!
//! Reads any OGR-readable layer into [`AoiLayer`] and writes the augmented
//! copy: one row per link record, AOI attributes joined back at export time.

use crate::core::crs::{spatial_ref, Reprojector};
use crate::core::link_table::LinkTable;
use crate::types::{AoiFeature, AoiLayer, ArdResult, AttributeValue, Crs};
use gdal::vector::{FieldValue, LayerAccess, OGRFieldType, ToGdal};
use gdal::{Dataset, DriverManager, LayerOptions};
use geo::Intersects;
use std::path::Path;

/// Columns appended to every row of the augmented layer
pub const LINK_FIELDS: [&str; 5] = ["image_link", "image_date", "rel_orbit", "direction", "cloud_cover"];

/// Read the first layer of a vector dataset
///
/// The feature id comes from `id_field` when given (and present), otherwise
/// from the OGR feature id. Features without geometry are skipped.
pub fn read_aoi_layer<P: AsRef<Path>>(path: P, id_field: Option<&str>) -> ArdResult<AoiLayer> {
    let path = path.as_ref();
    log::info!("Reading AOI layer: {}", path.display());

    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;

    let crs = match layer.spatial_ref() {
        Some(srs) => Crs(srs.to_wkt()?),
        None => {
            log::warn!("{} has no reference system; assuming WGS84", path.display());
            Crs::wgs84()
        }
    };

    let mut features = Vec::new();
    for (index, feature) in layer.features().enumerate() {
        let geometry = match feature.geometry_by_index(0).and_then(|g| g.to_geo()) {
            Ok(geometry) => geometry,
            Err(e) => {
                log::warn!("Skipping feature {} without usable geometry: {}", index, e);
                continue;
            }
        };

        let mut attributes = Vec::new();
        let mut id = None;
        for (name, value) in feature.fields() {
            let value = value.and_then(attribute_from_field);
            if Some(name.as_str()) == id_field {
                id = value.as_ref().map(|v| v.to_string());
            }
            attributes.push((name, value));
        }

        let id = id
            .or_else(|| feature.fid().map(|fid| fid.to_string()))
            .unwrap_or_else(|| index.to_string());
        features.push(AoiFeature {
            id,
            geometry,
            attributes,
        });
    }

    if let Some(field) = id_field {
        let missing = features
            .iter()
            .filter(|f| !f.attributes.iter().any(|(name, v)| name == field && v.is_some()))
            .count();
        if missing > 0 {
            log::warn!("{} features lack '{}'; using feature ids", missing, field);
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "aoi".to_string());
    log::info!("Loaded {} AOI features from layer '{}'", features.len(), name);

    Ok(AoiLayer { name, crs, features })
}

fn attribute_from_field(value: FieldValue) -> Option<AttributeValue> {
    match value {
        FieldValue::IntegerValue(v) => Some(AttributeValue::Int(v as i64)),
        FieldValue::Integer64Value(v) => Some(AttributeValue::Int(v)),
        FieldValue::RealValue(v) => Some(AttributeValue::Float(v)),
        FieldValue::StringValue(v) => Some(AttributeValue::Text(v)),
        other => other.into_string().map(AttributeValue::Text),
    }
}

fn field_value(value: &AttributeValue) -> FieldValue {
    match value {
        AttributeValue::Int(v) => FieldValue::Integer64Value(*v),
        AttributeValue::Float(v) => FieldValue::RealValue(*v),
        AttributeValue::Text(v) => FieldValue::StringValue(v.clone()),
    }
}

fn field_type(value: &AttributeValue) -> OGRFieldType::Type {
    match value {
        AttributeValue::Int(_) => OGRFieldType::OFTInteger64,
        AttributeValue::Float(_) => OGRFieldType::OFTReal,
        AttributeValue::Text(_) => OGRFieldType::OFTString,
    }
}

/// Write the augmented layer as a GeoPackage
///
/// Each link record becomes one row carrying its AOI's geometry and attributes.
/// AOIs without links get a single row with empty link columns. Returns the
/// number of rows written.
pub fn write_augmented_layer<P: AsRef<Path>>(
    path: P,
    aois: &AoiLayer,
    table: &LinkTable,
) -> ArdResult<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    log::info!("Writing augmented layer: {}", path.display());

    // Schema follows the first non-null value of each attribute
    let mut schema: Vec<(String, OGRFieldType::Type)> = Vec::new();
    for feature in &aois.features {
        for (name, value) in &feature.attributes {
            if LINK_FIELDS.contains(&name.as_str()) || schema.iter().any(|(n, _)| n == name) {
                continue;
            }
            if let Some(value) = value {
                schema.push((name.clone(), field_type(value)));
            }
        }
    }

    let driver = DriverManager::get_driver_by_name("GPKG")?;
    let mut dataset = driver.create_vector_only(path)?;
    let srs = spatial_ref(&aois.crs)?;
    let mut layer = dataset.create_layer(LayerOptions {
        name: &format!("{}_links", aois.name),
        srs: Some(&srs),
        ty: gdal_sys::OGRwkbGeometryType::wkbUnknown,
        options: None,
    })?;

    let mut defn: Vec<(&str, OGRFieldType::Type)> =
        schema.iter().map(|(name, ty)| (name.as_str(), *ty)).collect();
    defn.extend([
        ("image_link", OGRFieldType::OFTString),
        ("image_date", OGRFieldType::OFTDate),
        ("rel_orbit", OGRFieldType::OFTInteger),
        ("direction", OGRFieldType::OFTString),
        ("cloud_cover", OGRFieldType::OFTReal),
    ]);
    layer.create_defn_fields(&defn)?;

    let mut rows = 0;
    for feature in &aois.features {
        let mut base_names: Vec<&str> = Vec::new();
        let mut base_values: Vec<FieldValue> = Vec::new();
        for (name, value) in &feature.attributes {
            let Some(value) = value else { continue };
            let Some((_, ty)) = schema.iter().find(|(n, _)| n == name) else { continue };
            if *ty != field_type(value) {
                base_names.push(name.as_str());
                base_values.push(FieldValue::StringValue(value.to_string()));
                continue;
            }
            base_names.push(name.as_str());
            base_values.push(field_value(value));
        }

        let links = table.links_for(&feature.id);
        if links.is_empty() {
            let geometry = feature.geometry.to_gdal()?;
            layer.create_feature_fields(geometry, &base_names, &base_values)?;
            rows += 1;
            continue;
        }

        for link in links {
            let mut names = base_names.clone();
            let mut values = base_values.clone();
            names.push("image_link");
            values.push(FieldValue::StringValue(link.link.clone()));
            names.push("image_date");
            values.push(FieldValue::DateValue(link.acquisition_date()));
            if let Some(orbit) = link.orbit {
                names.push("rel_orbit");
                values.push(FieldValue::IntegerValue(orbit.relative_orbit as i32));
                names.push("direction");
                values.push(FieldValue::StringValue(orbit.direction.token().to_string()));
            }
            if let Some(cloud) = link.cloud_cover {
                names.push("cloud_cover");
                values.push(FieldValue::RealValue(cloud));
            }
            let geometry = feature.geometry.to_gdal()?;
            layer.create_feature_fields(geometry, &names, &values)?;
            rows += 1;
        }
    }

    log::info!("Wrote {} rows to {}", rows, path.display());
    Ok(rows)
}

/// MGRS tiles of a tile-grid layer that intersect any AOI
///
/// Tile names come from the grid's `Name` field and are returned with the
/// archive's `T` prefix, sorted and deduplicated. AOIs that cannot be
/// reprojected onto the grid are logged and left out; when no tile
/// intersects, the list is empty.
pub fn tiles_intersecting<P: AsRef<Path>>(tile_grid: P, aois: &AoiLayer) -> ArdResult<Vec<String>> {
    let grid = read_aoi_layer(tile_grid, Some("Name"))?;
    let to_grid = Reprojector::new(&aois.crs, &grid.crs)?;

    let mut aoi_geometries = Vec::with_capacity(aois.features.len());
    for feature in &aois.features {
        match to_grid.geometry(&feature.geometry) {
            Ok(geometry) => aoi_geometries.push(geometry),
            Err(e) => log::warn!("AOI {} left out of the tile lookup: {}", feature.id, e),
        }
    }

    let mut tiles: Vec<String> = grid
        .features
        .iter()
        .filter(|tile| aoi_geometries.iter().any(|aoi| tile.geometry.intersects(aoi)))
        .map(|tile| {
            let name = tile.id.trim();
            if name.starts_with('T') {
                name.to_string()
            } else {
                format!("T{}", name)
            }
        })
        .collect();
    tiles.sort();
    tiles.dedup();

    if tiles.is_empty() {
        log::warn!("No tile of the grid intersects the AOI layer");
        return Ok(tiles);
    }
    log::info!("AOIs fall on {} tiles: {}", tiles.len(), tiles.join(", "));
    Ok(tiles)
}
