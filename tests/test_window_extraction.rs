mod common;

use approx::assert_abs_diff_eq;
use ceda_ard::config::OutputConfig;
use ceda_ard::core::extract::{WindowOutcome, WindowedExtractor};
use ceda_ard::io::raster::{write_geotiff, RasterSource};
use ceda_ard::types::{BoundingBox, Crs};
use common::{init_logging, wkt, write_raster};
use geo::{polygon, Geometry};
use ndarray::Array2;

// 100 x 100 pixels of 10 m on the British National Grid
const GRID: [f64; 6] = [400_000.0, 10.0, 0.0, 300_000.0, 0.0, -10.0];

fn asset(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("S1A_20180601_30_asc_175025_175050_VVVH_G0_GB_OSGB_RTCK_SpkRL.tif");
    let vv = Array2::from_shape_fn((100, 100), |(r, c)| (r * 100 + c) as f32);
    let vh = Array2::from_elem((100, 100), -20.0f32);
    write_raster(&path, &[vv, vh], GRID, 27700, None);
    path
}

fn extractor(mask: bool) -> WindowedExtractor {
    WindowedExtractor::new(OutputConfig {
        mask_outside_aoi: mask,
        ..OutputConfig::default()
    })
}

fn extract(path: &std::path::Path, aoi: &Geometry<f64>, crs: &Crs, mask: bool) -> WindowOutcome {
    extractor(mask)
        .extract_window(path.to_str().unwrap(), aoi, crs)
        .unwrap()
}

#[test]
fn test_window_round_trip_within_one_pixel() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    let aoi = BoundingBox::new(400_155.0, 299_505.0, 400_555.0, 299_805.0);
    let WindowOutcome::Extracted(extract) =
        extract(&path, &Geometry::Polygon(aoi.to_polygon()), &Crs::from_epsg(27700), false)
    else {
        panic!("expected a window");
    };
    assert_eq!(extract.data.dim(), (2, 31, 41));
    // Pixel values carry their row/column of the full raster
    assert_eq!(extract.data[[0, 0, 0]], (19 * 100 + 15) as f32);

    let out = dir.path().join("crop.tif");
    write_geotiff(&out, &extract.data, &extract.transform, &extract.projection_wkt, Some(-999.0)).unwrap();
    let written = RasterSource::open(out.to_str().unwrap()).unwrap().header().bounds();

    assert_abs_diff_eq!(written.min_x, aoi.min_x, epsilon = 10.0);
    assert_abs_diff_eq!(written.max_x, aoi.max_x, epsilon = 10.0);
    assert_abs_diff_eq!(written.min_y, aoi.min_y, epsilon = 10.0);
    assert_abs_diff_eq!(written.max_y, aoi.max_y, epsilon = 10.0);
}

#[test]
fn test_partially_outside_aoi_is_clipped() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    let aoi = BoundingBox::new(399_000.0, 299_000.0, 400_100.0, 301_000.0);
    let WindowOutcome::Extracted(extract) =
        extract(&path, &Geometry::Polygon(aoi.to_polygon()), &Crs::from_epsg(27700), false)
    else {
        panic!("expected a clipped window");
    };
    let raster = BoundingBox::new(400_000.0, 299_000.0, 401_000.0, 300_000.0);
    let clamped = aoi.intersection(&raster).unwrap();
    let bounds = extract.window.bounds(&ceda_ard::types::GeoTransform::from_gdal(GRID));
    assert_abs_diff_eq!(bounds.min_x, clamped.min_x, epsilon = 10.0);
    assert_abs_diff_eq!(bounds.max_x, clamped.max_x, epsilon = 10.0);
    assert_abs_diff_eq!(bounds.min_y, clamped.min_y, epsilon = 10.0);
    assert_abs_diff_eq!(bounds.max_y, clamped.max_y, epsilon = 10.0);
}

#[test]
fn test_wgs84_aoi_is_reprojected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    let source = RasterSource::open(path.to_str().unwrap()).unwrap();
    let to_wgs = ceda_ard::core::crs::Reprojector::new(&Crs(wkt(27700)), &Crs::wgs84()).unwrap();
    let (lon, lat) = to_wgs.point(400_505.0, 299_495.0).unwrap();
    let point = Geometry::Point(geo::point!(x: lon, y: lat));

    let (_, window) = source.locate(&point, &Crs::wgs84()).unwrap();
    let window = window.unwrap();
    assert_eq!((window.width, window.height), (1, 1));
    assert_eq!((window.col_off, window.row_off), (50, 50));
}

#[test]
fn test_outside_aoi_is_discarded() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    let aoi = BoundingBox::new(500_000.0, 500_000.0, 500_100.0, 500_100.0);
    let outcome = extract(&path, &Geometry::Polygon(aoi.to_polygon()), &Crs::from_epsg(27700), false);
    assert!(matches!(outcome, WindowOutcome::Outside));
}

#[test]
fn test_nodata_window_is_discarded() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty_SpkRL.tif");
    write_raster(&path, &[Array2::from_elem((100, 100), -9999.0f32)], GRID, 27700, Some(-9999.0));

    let aoi = BoundingBox::new(400_100.0, 299_100.0, 400_300.0, 299_300.0);
    let outcome = extract(&path, &Geometry::Polygon(aoi.to_polygon()), &Crs::from_epsg(27700), false);
    assert!(matches!(outcome, WindowOutcome::AllNodata));
}

#[test]
fn test_outside_polygon_masked() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    // Triangle whose lower-right half misses the window corner
    let triangle = geo::polygon![
        (x: 400_100.0, y: 299_900.0),
        (x: 400_300.0, y: 299_900.0),
        (x: 400_100.0, y: 299_700.0),
    ];
    let WindowOutcome::Extracted(extract) =
        extract(&path, &Geometry::Polygon(triangle), &Crs::from_epsg(27700), true)
    else {
        panic!("expected a window");
    };
    assert_eq!(extract.data.dim(), (2, 20, 20));
    assert_ne!(extract.data[[0, 0, 0]], -999.0);
    assert_eq!(extract.data[[0, 19, 19]], -999.0);
    assert_eq!(extract.data[[1, 19, 19]], -999.0);
}

#[test]
fn test_ratio_band_appended() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = asset(dir.path());

    let extractor = WindowedExtractor::new(OutputConfig {
        ratio_band: true,
        ..OutputConfig::default()
    });
    let aoi = BoundingBox::new(400_000.0, 299_980.0, 400_020.0, 300_000.0);
    let WindowOutcome::Extracted(extract) = extractor
        .extract_window(path.to_str().unwrap(), &Geometry::Polygon(aoi.to_polygon()), &Crs::from_epsg(27700))
        .unwrap()
    else {
        panic!("expected a window");
    };
    assert_eq!(extract.data.dim(), (3, 2, 2));
    assert_eq!(extract.data[[2, 0, 1]], 1.0 + 20.0);
}
