mod common;

use ceda_ard::config::OutputConfig;
use ceda_ard::core::extract::WindowedExtractor;
use ceda_ard::core::link_table::LinkTable;
use ceda_ard::io::raster::RasterSource;
use ceda_ard::types::{
    AoiFeature, AoiLayer, ArdError, BoundingBox, Crs, DateRange, LinkRecord, Mission, OrbitInfo,
    PassDirection,
};
use chrono::{TimeZone, Utc};
use common::{init_logging, write_raster};
use geo::Geometry;
use ndarray::Array2;
use std::path::Path;
use std::time::Duration;

const GRID: [f64; 6] = [400_000.0, 10.0, 0.0, 300_000.0, 0.0, -10.0];

fn scene(dir: &Path, day: u32, value: f32, size: usize) -> LinkRecord {
    scene_on(dir, day, GRID, Array2::from_elem((size, size), value))
}

/// Two-band scene (`band1`, `band1 * 10`) written on `grid`
fn scene_on(dir: &Path, day: u32, grid: [f64; 6], band1: Array2<f32>) -> LinkRecord {
    let asset_id = format!("S1A_201806{:02}_30_asc_175025_175050_VVVH_G0_GB_OSGB_RTCK_SpkRL", day);
    let path = dir.join(format!("{}.tif", asset_id));
    let band2 = band1.mapv(|v| v * 10.0);
    write_raster(&path, &[band1, band2], grid, 27700, None);
    LinkRecord {
        aoi_id: "p1".to_string(),
        asset_id,
        mission: Mission::Sentinel1,
        link: path.to_str().unwrap().to_string(),
        acquired: Utc.with_ymd_and_hms(2018, 6, day, 17, 50, 25).unwrap(),
        orbit: Some(OrbitInfo {
            relative_orbit: 30,
            direction: PassDirection::Ascending,
        }),
        cloud_cover: None,
        nodata_fraction: None,
    }
}

fn layer() -> AoiLayer {
    layer_of(&["p1"])
}

/// Every AOI covers columns and rows 40..60 of `GRID`
fn layer_of(ids: &[&str]) -> AoiLayer {
    AoiLayer {
        name: "plots".to_string(),
        crs: Crs::from_epsg(27700),
        features: ids
            .iter()
            .map(|id| AoiFeature {
                id: id.to_string(),
                geometry: Geometry::Polygon(BoundingBox::new(400_400.0, 299_400.0, 400_600.0, 299_600.0).to_polygon()),
                attributes: Vec::new(),
            })
            .collect(),
    }
}

fn table(links: Vec<LinkRecord>) -> LinkTable {
    table_of(&["p1"], links)
}

fn table_of(ids: &[&str], links: Vec<LinkRecord>) -> LinkTable {
    let mut table = LinkTable::new(
        Mission::Sentinel1,
        "plots",
        DateRange::parse("2018-06-01", "2018-06-30").unwrap(),
    );
    for id in ids {
        table.add_aoi(id);
    }
    for link in links {
        table.push(link);
    }
    table
}

fn for_aoi(mut link: LinkRecord, aoi_id: &str) -> LinkRecord {
    link.aoi_id = aoi_id.to_string();
    link
}

fn composite_only(out: &Path) -> WindowedExtractor {
    WindowedExtractor::new(OutputConfig {
        output_dir: out.to_path_buf(),
        composites: true,
        write_individual: false,
        ..OutputConfig::default()
    })
    .with_retries(1, Duration::ZERO)
}

fn pixel(path: &Path, band: usize) -> f32 {
    let source = RasterSource::open(path.to_str().unwrap()).unwrap();
    let window = ceda_ard::core::window::PixelWindow {
        col_off: 3,
        row_off: 3,
        width: 1,
        height: 1,
    };
    source.read_band_window(band, &window).unwrap()[[0, 0]]
}

#[test]
fn test_median_of_three_aligned_scenes() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let links = vec![
        scene(archive.path(), 1, 1.0, 100),
        scene(archive.path(), 13, 3.0, 100),
        scene(archive.path(), 25, 2.0, 100),
    ];

    let extractor = composite_only(out.path());
    let summary = extractor.extract_table(&table(links), &layer()).unwrap();
    assert_eq!(summary.composites_written, 1);
    assert_eq!(summary.written, 0);

    let path = extractor.composite_path("plots", "p1", PassDirection::Ascending, 30);
    assert_eq!(pixel(&path, 1), 2.0);
    assert_eq!(pixel(&path, 2), 20.0);

    let header = RasterSource::open(path.to_str().unwrap()).unwrap().header().clone();
    assert_eq!(header.size, (20, 20));
    assert_eq!(header.band_count, 2);
}

#[test]
fn test_single_scene_composite_is_the_scene() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let links = vec![scene(archive.path(), 1, 7.5, 100)];

    let extractor = composite_only(out.path());
    extractor.extract_table(&table(links), &layer()).unwrap();
    let path = extractor.composite_path("plots", "p1", PassDirection::Ascending, 30);
    assert_eq!(pixel(&path, 1), 7.5);
    assert_eq!(pixel(&path, 2), 75.0);
}

#[test]
fn test_mismatched_member_aborts() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    // The third scene stops short of the AOI window
    let links = vec![
        scene(archive.path(), 1, 1.0, 100),
        scene(archive.path(), 13, 3.0, 100),
        scene(archive.path(), 25, 2.0, 50),
    ];

    let extractor = composite_only(out.path());
    let result = extractor.extract_table(&table(links), &layer());
    assert!(matches!(result, Err(ArdError::ShapeMismatch { .. })));
    assert!(!extractor
        .composite_path("plots", "p1", PassDirection::Ascending, 30)
        .exists());
}

#[test]
fn test_existing_composite_is_kept() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let links = vec![scene(archive.path(), 1, 1.0, 100), scene(archive.path(), 13, 3.0, 100)];

    let extractor = composite_only(out.path());
    let first = extractor.extract_table(&table(links.clone()), &layer()).unwrap();
    assert_eq!(first.composites_written, 1);
    let second = extractor.extract_table(&table(links), &layer()).unwrap();
    assert_eq!(second.composites_written, 0);
}

#[test]
fn test_member_on_shifted_grid_is_read_at_same_ground() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    // Pixel values carry the ground column on the reference grid
    let reference = Array2::from_shape_fn((100, 100), |(_, c)| c as f32);
    let shifted = Array2::from_shape_fn((100, 100), |(_, c)| (c + 10) as f32);
    let east = [400_100.0, 10.0, 0.0, 300_000.0, 0.0, -10.0];
    let links = vec![
        scene_on(archive.path(), 1, GRID, reference),
        scene_on(archive.path(), 13, east, shifted),
    ];

    let extractor = composite_only(out.path());
    let summary = extractor.extract_table(&table(links), &layer()).unwrap();
    assert_eq!(summary.composites_written, 1);

    let path = extractor.composite_path("plots", "p1", PassDirection::Ascending, 30);
    // Window column 3 is ground column 43 in both members
    assert_eq!(pixel(&path, 1), 43.0);
    assert_eq!(pixel(&path, 2), 430.0);
}

#[test]
fn test_member_off_pixel_grid_aborts() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let half_pixel = [400_005.0, 10.0, 0.0, 300_000.0, 0.0, -10.0];
    let links = vec![
        scene(archive.path(), 1, 1.0, 100),
        scene_on(archive.path(), 13, half_pixel, Array2::from_elem((100, 100), 3.0)),
    ];

    let extractor = composite_only(out.path());
    let result = extractor.extract_table(&table(links), &layer());
    assert!(matches!(result, Err(ArdError::ShapeMismatch { .. })));
}

#[test]
fn test_unreadable_group_does_not_stop_other_aois() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut missing = scene(archive.path(), 1, 1.0, 100);
    missing.link = archive.path().join("absent_SpkRL.tif").to_str().unwrap().to_string();
    let links = vec![
        for_aoi(missing, "a"),
        for_aoi(scene(archive.path(), 13, 3.0, 100), "b"),
        for_aoi(scene(archive.path(), 25, 2.0, 100), "b"),
    ];

    let extractor = composite_only(out.path());
    let summary = extractor
        .extract_table(&table_of(&["a", "b"], links), &layer_of(&["a", "b"]))
        .unwrap();
    assert_eq!(summary.composites_written, 1);
    assert_eq!(summary.failed, 1);
    assert!(!extractor.composite_path("plots", "a", PassDirection::Ascending, 30).exists());
    let path = extractor.composite_path("plots", "b", PassDirection::Ascending, 30);
    assert_eq!(pixel(&path, 1), 2.5);
}

#[test]
fn test_aoi_subset_limits_outputs() {
    init_logging();
    let archive = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let links = vec![
        for_aoi(scene(archive.path(), 1, 1.0, 100), "a"),
        for_aoi(scene(archive.path(), 13, 3.0, 100), "b"),
    ];

    let extractor = WindowedExtractor::new(OutputConfig {
        output_dir: out.path().to_path_buf(),
        composites: true,
        aoi_ids: Some(vec!["b".to_string()]),
        ..OutputConfig::default()
    })
    .with_retries(1, Duration::ZERO);
    let summary = extractor
        .extract_table(&table_of(&["a", "b"], links.clone()), &layer_of(&["a", "b"]))
        .unwrap();
    assert_eq!(summary.written, 1);
    assert_eq!(summary.composites_written, 1);

    assert!(extractor.geotiff_path("plots", "b", &links[1]).exists());
    assert!(!extractor.geotiff_path("plots", "a", &links[0]).exists());
    assert!(!extractor.composite_path("plots", "a", PassDirection::Ascending, 30).exists());
    assert!(extractor.composite_path("plots", "b", PassDirection::Ascending, 30).exists());
}
