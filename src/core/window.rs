//! Pixel windows over georeferenced rasters

use crate::types::{BoundingBox, GeoTransform};
use geo::{Geometry, Intersects};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Row/column window inside a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Georeferencing of the window's own grid
    pub fn transform(&self, parent: &GeoTransform) -> GeoTransform {
        let (x, y) = parent.apply(self.col_off as f64, self.row_off as f64);
        GeoTransform {
            top_left_x: x,
            top_left_y: y,
            ..*parent
        }
    }

    /// Georeferenced bounds covered by the window
    pub fn bounds(&self, parent: &GeoTransform) -> BoundingBox {
        let corners = [
            parent.apply(self.col_off as f64, self.row_off as f64),
            parent.apply((self.col_off + self.width) as f64, self.row_off as f64),
            parent.apply(self.col_off as f64, (self.row_off + self.height) as f64),
            parent.apply((self.col_off + self.width) as f64, (self.row_off + self.height) as f64),
        ];
        bounds_of(&corners)
    }
}

/// Window of a `raster_size = (width, height)` raster covering `bounds`
///
/// The window snaps outward to whole pixels and is clamped to the raster extent,
/// so partially outside boxes are clipped. Returns `None` when nothing of the box
/// falls on the raster.
pub fn window_for_bounds(
    bounds: &BoundingBox,
    transform: &GeoTransform,
    raster_size: (usize, usize),
) -> Option<PixelWindow> {
    let (raster_width, raster_height) = raster_size;
    if raster_width == 0 || raster_height == 0 {
        return None;
    }

    let corners = [
        (bounds.min_x, bounds.min_y),
        (bounds.max_x, bounds.min_y),
        (bounds.min_x, bounds.max_y),
        (bounds.max_x, bounds.max_y),
    ];
    let mut pixel_corners = Vec::with_capacity(4);
    for (x, y) in corners {
        pixel_corners.push(transform.invert(x, y)?);
    }
    let pixel_box = bounds_of(&pixel_corners);

    // Tolerate float noise on boxes that sit exactly on pixel edges
    const SNAP: f64 = 1e-6;
    let col_start = (pixel_box.min_x + SNAP).floor();
    let row_start = (pixel_box.min_y + SNAP).floor();
    let mut col_end = (pixel_box.max_x - SNAP).ceil();
    let mut row_end = (pixel_box.max_y - SNAP).ceil();

    // Points and slivers still cover the pixel they fall in
    if col_end <= col_start {
        col_end = col_start + 1.0;
    }
    if row_end <= row_start {
        row_end = row_start + 1.0;
    }

    let col_start = col_start.max(0.0);
    let row_start = row_start.max(0.0);
    let col_end = col_end.min(raster_width as f64);
    let row_end = row_end.min(raster_height as f64);

    if col_end <= col_start || row_end <= row_start {
        return None;
    }

    Some(PixelWindow {
        col_off: col_start as usize,
        row_off: row_start as usize,
        width: (col_end - col_start) as usize,
        height: (row_end - row_start) as usize,
    })
}

/// The same ground window expressed on another raster's grid
///
/// `Some` only when `target` has the pixel size and rotation of `source`, the
/// window's top-left corner falls on a pixel corner of `target` and the whole
/// window lies inside a `target_size = (width, height)` raster.
pub fn window_on_grid(
    window: &PixelWindow,
    source: &GeoTransform,
    target: &GeoTransform,
    target_size: (usize, usize),
) -> Option<PixelWindow> {
    let same = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0);
    if !same(source.pixel_width, target.pixel_width)
        || !same(source.pixel_height, target.pixel_height)
        || !same(source.rotation_x, target.rotation_x)
        || !same(source.rotation_y, target.rotation_y)
    {
        return None;
    }

    let (x, y) = source.apply(window.col_off as f64, window.row_off as f64);
    let (col, row) = target.invert(x, y)?;
    let (col_start, row_start) = (col.round(), row.round());
    // Offsets must be whole pixels, otherwise the grids sample different ground
    const ALIGN: f64 = 1e-3;
    if (col - col_start).abs() > ALIGN || (row - row_start).abs() > ALIGN {
        return None;
    }
    if col_start < 0.0 || row_start < 0.0 {
        return None;
    }

    let moved = PixelWindow {
        col_off: col_start as usize,
        row_off: row_start as usize,
        ..*window
    };
    let (width, height) = target_size;
    if moved.col_off + moved.width > width || moved.row_off + moved.height > height {
        return None;
    }
    Some(moved)
}

/// Pixels of `window` touched by `geometry` (all-touched rasterization)
///
/// `geometry` must be in the raster's CRS. Row-major, `(height, width)`.
pub fn touched_mask(geometry: &Geometry<f64>, window: &PixelWindow, parent: &GeoTransform) -> Array2<bool> {
    let local = window.transform(parent);
    Array2::from_shape_fn((window.height, window.width), |(row, col)| {
        let cell = PixelWindow {
            col_off: col,
            row_off: row,
            width: 1,
            height: 1,
        }
        .bounds(&local);
        geometry.intersects(&Geometry::Polygon(cell.to_polygon()))
    })
}

fn bounds_of(points: &[(f64, f64)]) -> BoundingBox {
    let mut bbox = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        bbox.min_x = bbox.min_x.min(x);
        bbox.min_y = bbox.min_y.min(y);
        bbox.max_x = bbox.max_x.max(x);
        bbox.max_y = bbox.max_y.max(y);
    }
    bbox
}
