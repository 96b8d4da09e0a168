//! Reference-system reconciliation between AOIs and asset footprints

use crate::types::{ArdError, ArdResult, BoundingBox, Crs};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use geo::{coord, Geometry, LineString, MapCoords, Polygon};

/// Build an OSR spatial reference with x/y (lon/lat) axis order
pub fn spatial_ref(crs: &Crs) -> ArdResult<SpatialRef> {
    let mut srs = SpatialRef::from_definition(crs.as_str())
        .map_err(|e| ArdError::GeometryMismatch(format!("Unrecognised CRS '{}': {}", crs, e)))?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Point and geometry transformation between two reference systems
///
/// Identical systems short-circuit to an identity transform.
pub struct Reprojector {
    transform: Option<CoordTransform>,
}

impl Reprojector {
    pub fn new(from: &Crs, to: &Crs) -> ArdResult<Self> {
        if from == to {
            return Ok(Self::identity());
        }
        let source = spatial_ref(from)?;
        let target = spatial_ref(to)?;
        if source == target {
            return Ok(Self::identity());
        }
        let transform = CoordTransform::new(&source, &target).map_err(|e| {
            ArdError::GeometryMismatch(format!("Cannot transform {} -> {}: {}", from, to, e))
        })?;
        Ok(Self {
            transform: Some(transform),
        })
    }

    pub fn identity() -> Self {
        Self { transform: None }
    }

    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }

    pub fn point(&self, x: f64, y: f64) -> ArdResult<(f64, f64)> {
        let Some(transform) = &self.transform else {
            return Ok((x, y));
        };
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0];
        transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| ArdError::GeometryMismatch(format!("Point ({}, {}) not transformable: {}", x, y, e)))?;
        if !xs[0].is_finite() || !ys[0].is_finite() {
            return Err(ArdError::GeometryMismatch(format!(
                "Point ({}, {}) falls outside the target CRS domain",
                x, y
            )));
        }
        Ok((xs[0], ys[0]))
    }

    pub fn geometry(&self, geometry: &Geometry<f64>) -> ArdResult<Geometry<f64>> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.point(c.x, c.y).map(|(x, y)| coord! { x: x, y: y }))
    }

    /// Transform a box as a densified ring so curved edges stay covered
    pub fn bbox_polygon(&self, bbox: &BoundingBox, points_per_edge: usize) -> ArdResult<Polygon<f64>> {
        let ring = densified_ring(bbox, points_per_edge.max(1));
        let mut out = Vec::with_capacity(ring.len());
        for (x, y) in ring {
            let (tx, ty) = self.point(x, y)?;
            out.push(coord! { x: tx, y: ty });
        }
        Ok(Polygon::new(LineString::new(out), vec![]))
    }

    /// Bounding box of a transformed box
    pub fn bounds(&self, bbox: &BoundingBox) -> ArdResult<BoundingBox> {
        if self.is_identity() {
            return Ok(*bbox);
        }
        let polygon = self.bbox_polygon(bbox, 8)?;
        geometry_bounds(&Geometry::Polygon(polygon)).ok_or_else(|| {
            ArdError::GeometryMismatch("Transformed box has no extent".to_string())
        })
    }
}

/// Closed ring around a box with `n` segments per edge
fn densified_ring(bbox: &BoundingBox, n: usize) -> Vec<(f64, f64)> {
    let corners = [
        (bbox.min_x, bbox.min_y),
        (bbox.max_x, bbox.min_y),
        (bbox.max_x, bbox.max_y),
        (bbox.min_x, bbox.max_y),
    ];
    let mut ring = Vec::with_capacity(4 * n + 1);
    for i in 0..4 {
        let (x0, y0) = corners[i];
        let (x1, y1) = corners[(i + 1) % 4];
        for step in 0..n {
            let t = step as f64 / n as f64;
            ring.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
        }
    }
    ring.push(corners[0]);
    ring
}

/// Axis-aligned bounds of a geometry
pub fn geometry_bounds(geometry: &Geometry<f64>) -> Option<BoundingBox> {
    use geo::BoundingRect;
    geometry
        .bounding_rect()
        .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_for_same_crs() {
        let r = Reprojector::new(&Crs::from_epsg(27700), &Crs::from_epsg(27700)).unwrap();
        assert!(r.is_identity());
        assert_eq!(r.point(1.0, 2.0).unwrap(), (1.0, 2.0));
    }

    #[test]
    fn test_wgs84_to_osgb_round_trip() {
        let to_osgb = Reprojector::new(&Crs::wgs84(), &Crs::from_epsg(27700)).unwrap();
        let to_wgs = Reprojector::new(&Crs::from_epsg(27700), &Crs::wgs84()).unwrap();
        let (e, n) = to_osgb.point(-1.5, 52.5).unwrap();
        // Central England lands well inside the national grid
        assert!(e > 400_000.0 && e < 500_000.0);
        assert!(n > 250_000.0 && n < 350_000.0);
        let (lon, lat) = to_wgs.point(e, n).unwrap();
        assert_relative_eq!(lon, -1.5, epsilon = 1e-6);
        assert_relative_eq!(lat, 52.5, epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_crs_is_geometry_mismatch() {
        let result = Reprojector::new(&Crs("NOT-A-CRS".to_string()), &Crs::wgs84());
        assert!(matches!(result, Err(ArdError::GeometryMismatch(_))));
    }

    #[test]
    fn test_densified_ring_closed() {
        let ring = densified_ring(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4);
        assert_eq!(ring.len(), 17);
        assert_eq!(ring.first(), ring.last());
    }
}
