//! Spatial-temporal matching of AOIs against asset footprints
//!
//! Footprints are brought to WGS84 and bulk-loaded into an R-tree of their
//! bounding boxes. Each AOI queries the tree first; only the candidates it
//! returns get the exact geometric test.

use crate::config::SpatialPredicate;
use crate::core::crs::{geometry_bounds, Reprojector};
use crate::core::link_table::LinkTable;
use crate::types::{
    AoiLayer, ArdError, ArdResult, AssetRecord, BoundingBox, Crs, DateRange, LinkRecord, Mission,
};
use geo::{Geometry, Intersects, Relate};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashMap;

struct IndexedFootprint {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFootprint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn aabb(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y])
}

/// R-tree over asset footprints in WGS84
pub struct FootprintIndex<'a> {
    assets: &'a [AssetRecord],
    footprints: Vec<Option<Geometry<f64>>>,
    tree: RTree<IndexedFootprint>,
}

impl<'a> FootprintIndex<'a> {
    /// Index every asset whose footprint can be expressed in WGS84
    pub fn build(assets: &'a [AssetRecord]) -> Self {
        let wgs84 = Crs::wgs84();
        let mut reprojectors: HashMap<Crs, Option<Reprojector>> = HashMap::new();
        let mut footprints = Vec::with_capacity(assets.len());
        let mut entries = Vec::with_capacity(assets.len());

        for (index, asset) in assets.iter().enumerate() {
            let reprojector = reprojectors
                .entry(asset.footprint_crs.clone())
                .or_insert_with(|| match Reprojector::new(&asset.footprint_crs, &wgs84) {
                    Ok(r) => Some(r),
                    Err(e) => {
                        log::warn!("Footprint CRS {} unusable: {}", asset.footprint_crs, e);
                        None
                    }
                });
            let footprint = reprojector
                .as_ref()
                .and_then(|r| match footprint_in_wgs84(r, &asset.footprint) {
                    Ok(geometry) => Some(geometry),
                    Err(e) => {
                        log::warn!("Skipping footprint of {}: {}", asset.asset_id, e);
                        None
                    }
                });

            if let Some(bbox) = footprint.as_ref().and_then(geometry_bounds) {
                entries.push(IndexedFootprint {
                    index,
                    envelope: aabb(&bbox),
                });
            }
            footprints.push(footprint);
        }

        Self {
            assets,
            footprints,
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn indexed(&self) -> usize {
        self.tree.size()
    }

    /// Assets whose footprint passes `predicate` against a WGS84 AOI geometry
    pub fn query(&self, aoi: &Geometry<f64>, predicate: SpatialPredicate) -> Vec<&'a AssetRecord> {
        let Some(bbox) = geometry_bounds(aoi) else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&aabb(&bbox))
            .map(|entry| entry.index)
            .filter(|&i| {
                self.footprints[i]
                    .as_ref()
                    .map_or(false, |footprint| satisfies(footprint, aoi, predicate))
            })
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.assets[i]).collect()
    }
}

/// Footprints are boxes in their native CRS; reproject a densified ring
fn footprint_in_wgs84(reprojector: &Reprojector, footprint: &Geometry<f64>) -> ArdResult<Geometry<f64>> {
    if reprojector.is_identity() {
        return Ok(footprint.clone());
    }
    let bbox = geometry_bounds(footprint)
        .ok_or_else(|| ArdError::GeometryMismatch("empty footprint".to_string()))?;
    Ok(Geometry::Polygon(reprojector.bbox_polygon(&bbox, 16)?))
}

fn satisfies(footprint: &Geometry<f64>, aoi: &Geometry<f64>, predicate: SpatialPredicate) -> bool {
    match predicate {
        SpatialPredicate::Intersects => footprint.intersects(aoi),
        SpatialPredicate::Contains => footprint.relate(aoi).is_contains(),
    }
}

/// Matches per AOI plus the AOIs that could not be evaluated
#[derive(Debug)]
pub struct MatchResult {
    pub table: LinkTable,
    /// `(aoi_id, reason)` for AOIs whose geometry could not be reconciled
    pub failed: Vec<(String, String)>,
}

/// `match(aoi_features, asset_records) -> link records`
///
/// Keeps pairs whose footprint satisfies `predicate` and whose acquisition
/// date lies in `range` (inclusive). Every AOI appears in the table, in layer
/// order, with its links sorted by acquisition time.
pub fn match_assets(
    aois: &AoiLayer,
    assets: &[AssetRecord],
    range: &DateRange,
    predicate: SpatialPredicate,
    mission: Mission,
) -> ArdResult<MatchResult> {
    let in_range: Vec<AssetRecord> = assets
        .iter()
        .filter(|a| range.contains(a.acquisition_date()))
        .cloned()
        .collect();
    if in_range.len() < assets.len() {
        log::debug!("{} assets fall outside {}", assets.len() - in_range.len(), range.key());
    }

    let index = FootprintIndex::build(&in_range);
    log::info!("Indexed {} footprints for matching", index.indexed());

    let to_wgs84 = match Reprojector::new(&aois.crs, &Crs::wgs84()) {
        Ok(r) => Some(r),
        Err(e) => {
            log::error!("AOI layer CRS cannot be reconciled: {}", e);
            None
        }
    };

    let mut table = LinkTable::new(mission, aois.name.clone(), *range);
    let mut failed = Vec::new();

    for feature in &aois.features {
        table.add_aoi(&feature.id);

        let aoi = match &to_wgs84 {
            Some(r) => r.geometry(&feature.geometry),
            None => Err(ArdError::GeometryMismatch(format!("unusable CRS {}", aois.crs))),
        };
        let aoi = match aoi {
            Ok(aoi) => aoi,
            Err(e) => {
                log::warn!("AOI {} skipped: {}", feature.id, e);
                failed.push((feature.id.clone(), e.to_string()));
                continue;
            }
        };

        let links: Vec<LinkRecord> = index
            .query(&aoi, predicate)
            .into_iter()
            .map(|asset| LinkRecord::from_asset(&feature.id, asset))
            .collect();
        log::debug!("AOI {}: {} matching assets", feature.id, links.len());
        table.set_links(&feature.id, links);
    }

    table.sort();
    Ok(MatchResult { table, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AoiFeature;
    use chrono::{TimeZone, Utc};
    use geo::{point, Point};

    fn asset(id: &str, day: u32, bbox: BoundingBox) -> AssetRecord {
        AssetRecord {
            asset_id: id.to_string(),
            mission: Mission::Sentinel2,
            link: format!("/archive/{}.tif", id),
            acquired: Utc.with_ymd_and_hms(2023, 6, day, 11, 0, 0).unwrap(),
            footprint: Geometry::Polygon(bbox.to_polygon()),
            footprint_crs: Crs::wgs84(),
            cloud_cover: Some(0.0),
            orbit: None,
            tile: None,
            nodata_fraction: None,
        }
    }

    fn layer(geometries: Vec<Geometry<f64>>) -> AoiLayer {
        AoiLayer {
            name: "test".to_string(),
            crs: Crs::wgs84(),
            features: geometries
                .into_iter()
                .enumerate()
                .map(|(i, geometry)| AoiFeature {
                    id: format!("aoi{}", i),
                    geometry,
                    attributes: Vec::new(),
                })
                .collect(),
        }
    }

    fn range() -> DateRange {
        DateRange::parse("2023-06-01", "2023-06-10").unwrap()
    }

    #[test]
    fn test_intersects_date_and_order() {
        let assets = vec![
            asset("later", 9, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            asset("earlier", 3, BoundingBox::new(0.5, 0.5, 2.0, 2.0)),
            asset("out_of_range", 20, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            asset("elsewhere", 4, BoundingBox::new(10.0, 10.0, 11.0, 11.0)),
        ];
        let aois = layer(vec![Geometry::Polygon(BoundingBox::new(0.8, 0.8, 0.9, 0.9).to_polygon())]);
        let result = match_assets(&aois, &assets, &range(), SpatialPredicate::Intersects, Mission::Sentinel2).unwrap();
        let ids: Vec<&str> = result.table.links_for("aoi0").iter().map(|l| l.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
        for link in result.table.iter() {
            assert!(range().contains(link.acquisition_date()));
        }
    }

    #[test]
    fn test_contains_rejects_partial_overlap() {
        let assets = vec![
            asset("covers", 3, BoundingBox::new(0.0, 0.0, 2.0, 2.0)),
            asset("partial", 4, BoundingBox::new(1.5, 1.5, 3.0, 3.0)),
        ];
        let aois = layer(vec![Geometry::Polygon(BoundingBox::new(1.0, 1.0, 1.8, 1.8).to_polygon())]);
        let result = match_assets(&aois, &assets, &range(), SpatialPredicate::Contains, Mission::Sentinel2).unwrap();
        let ids: Vec<&str> = result.table.links_for("aoi0").iter().map(|l| l.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["covers"]);
    }

    #[test]
    fn test_point_aoi_and_unmatched() {
        let assets = vec![asset("a", 3, BoundingBox::new(0.0, 0.0, 1.0, 1.0))];
        let inside: Point<f64> = point!(x: 0.5, y: 0.5);
        let outside: Point<f64> = point!(x: 5.0, y: 5.0);
        let aois = layer(vec![Geometry::Point(inside), Geometry::Point(outside)]);
        let result = match_assets(&aois, &assets, &range(), SpatialPredicate::Intersects, Mission::Sentinel2).unwrap();
        assert_eq!(result.table.links_for("aoi0").len(), 1);
        assert!(result.table.links_for("aoi1").is_empty());
        assert_eq!(result.table.unmatched(), vec!["aoi1"]);
        assert!(result.failed.is_empty());
    }

    #[test]
    fn test_osgb_footprint_matches_wgs84_aoi() {
        // Box around (-1.5, 52.5) in British National Grid
        let mut osgb = asset("osgb", 3, BoundingBox::new(400_000.0, 250_000.0, 470_000.0, 330_000.0));
        osgb.footprint_crs = Crs::from_epsg(27700);
        let aois = layer(vec![Geometry::Point(point!(x: -1.5, y: 52.5))]);
        let result = match_assets(&aois, &[osgb], &range(), SpatialPredicate::Intersects, Mission::Sentinel2).unwrap();
        assert_eq!(result.table.links_for("aoi0").len(), 1);
    }
}
