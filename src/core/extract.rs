//! Windowed extraction from cloud-optimized rasters
//!
//! For each (AOI, asset) pair the AOI is reprojected into the asset's CRS, its
//! bounds are turned into a clamped pixel window and only that window is read.
//! Results are written as cropped GeoTIFFs or collected into one `.npz` per AOI.
//!
//! Orbit-group composites derive the window once from the first member and
//! carry its ground footprint onto every other member's grid, so all members
//! sample the same pixels on the ground.

use crate::config::OutputConfig;
use crate::config::OutputFormat;
use crate::core::link_table::LinkTable;
use crate::core::orbit::{group_by_orbit, median_composite, OrbitGroup};
use crate::core::parallel::map_bounded;
use crate::core::crs::Reprojector;
use crate::core::window::{touched_mask, window_on_grid, PixelWindow};
use crate::io::raster::{write_geotiff, RasterSource};
use crate::types::{
    AoiFeature, AoiLayer, ArdError, ArdResult, Crs, GeoTransform, LinkRecord, Mission, PassDirection,
};
use geo::Geometry;
use ndarray::{s, Array3, Axis};
use ndarray_npy::NpzWriter;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A cropped, georeferenced `(band, row, col)` array
#[derive(Debug, Clone)]
pub struct WindowExtract {
    pub data: Array3<f32>,
    pub window: PixelWindow,
    /// Georeferencing of the window itself
    pub transform: GeoTransform,
    pub projection_wkt: String,
}

#[derive(Debug, Clone)]
pub enum WindowOutcome {
    Extracted(WindowExtract),
    /// The AOI does not overlap the raster
    Outside,
    /// Every pixel of the window is nodata
    AllNodata,
}

/// Counters of one extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub written: usize,
    pub skipped_existing: usize,
    pub outside: usize,
    pub all_nodata: usize,
    pub failed: usize,
    pub composites_written: usize,
}

impl ExtractionSummary {
    fn record(&mut self, result: &JobResult) {
        match result {
            JobResult::Written | JobResult::Collected(..) => self.written += 1,
            JobResult::Existing => self.skipped_existing += 1,
            JobResult::Outside => self.outside += 1,
            JobResult::AllNodata => self.all_nodata += 1,
            JobResult::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for ExtractionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} windows written, {} already present, {} outside, {} empty, {} failed, {} composites",
            self.written,
            self.skipped_existing,
            self.outside,
            self.all_nodata,
            self.failed,
            self.composites_written
        )
    }
}

enum JobResult {
    Written,
    Collected(String, Array3<f32>),
    Existing,
    Outside,
    AllNodata,
    Failed,
}

struct WindowJob<'a> {
    aoi: &'a AoiFeature,
    link: &'a LinkRecord,
}

pub struct WindowedExtractor {
    config: OutputConfig,
    open_attempts: u32,
    retry_delay: Duration,
    workers: usize,
}

impl WindowedExtractor {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            open_attempts: 3,
            retry_delay: Duration::from_secs(2),
            workers: 1,
        }
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// `{out}/{layer}_{aoi}/{aoi}_{YYYYMMDDTHHMMSS}_{asset_stem}.tif`
    pub fn geotiff_path(&self, layer: &str, aoi_id: &str, link: &LinkRecord) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_{}", layer, aoi_id))
            .join(format!(
                "{}_{}_{}.tif",
                aoi_id,
                link.acquired.format("%Y%m%dT%H%M%S"),
                link.asset_id
            ))
    }

    /// `{out}/{layer}/{layer}_{aoi}.npz`
    pub fn npz_path(&self, layer: &str, aoi_id: &str) -> PathBuf {
        self.config
            .output_dir
            .join(layer)
            .join(format!("{}_{}.npz", layer, aoi_id))
    }

    /// `{out}/{layer}_{aoi}/{aoi}_{asc|desc}_orbit{N}_median.tif`
    pub fn composite_path(&self, layer: &str, aoi_id: &str, direction: PassDirection, orbit: u16) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_{}", layer, aoi_id))
            .join(format!("{}_{}_orbit{}_median.tif", aoi_id, direction.token(), orbit))
    }

    /// `extract_window(asset_link, aoi_geometry) -> cropped raster`
    ///
    /// Only the window covering the AOI's bounds (clamped to the raster) is
    /// read. A window entirely outside the raster, or one holding nothing but
    /// nodata, is a soft discard.
    pub fn extract_window(&self, link: &str, aoi: &Geometry<f64>, aoi_crs: &Crs) -> ArdResult<WindowOutcome> {
        let source = RasterSource::open_with_retries(link, self.open_attempts, self.retry_delay)?;
        let (native, window) = source.locate(aoi, aoi_crs)?;
        let Some(window) = window else {
            log::warn!("AOI falls outside {}", link);
            return Ok(WindowOutcome::Outside);
        };

        let extract = self.read_prepared(&source, &native, &window)?;
        if extract.data.iter().all(|&v| v == self.config.nodata_value) {
            log::debug!("Window of {} holds only nodata", link);
            return Ok(WindowOutcome::AllNodata);
        }
        Ok(WindowOutcome::Extracted(extract))
    }

    /// Read `window` and apply nodata normalisation, AOI masking and the ratio band
    fn read_prepared(
        &self,
        source: &RasterSource,
        native_aoi: &Geometry<f64>,
        window: &PixelWindow,
    ) -> ArdResult<WindowExtract> {
        let header = source.header();
        let bands = match &self.config.bands {
            Some(bands) => bands.clone(),
            None => source.all_bands(),
        };
        let mut data = source.read_window(&bands, window)?;

        let nodata = self.config.nodata_value;
        let source_nodata = header.nodata;
        data.mapv_inplace(|v| {
            let is_nodata = !v.is_finite() || source_nodata.map_or(false, |nd| v as f64 == nd);
            if is_nodata {
                nodata
            } else {
                v
            }
        });

        if self.config.mask_outside_aoi {
            let inside = touched_mask(native_aoi, window, &header.transform);
            for mut plane in data.outer_iter_mut() {
                plane.zip_mut_with(&inside, |v, &keep| {
                    if !keep {
                        *v = nodata;
                    }
                });
            }
        }

        if self.config.ratio_band {
            data = append_ratio_band(data, nodata)?;
        }

        Ok(WindowExtract {
            data,
            window: *window,
            transform: window.transform(&header.transform),
            projection_wkt: header.projection_wkt.clone(),
        })
    }

    /// Extract every link of `table`; returns the run counters
    ///
    /// Existing outputs are kept, so an interrupted run resumes where it
    /// stopped. Read failures skip the link and a composite that cannot be
    /// built counts as failed; only a member grid that does not line up with
    /// its group is returned as an error. With `aoi_ids` set, other AOIs are
    /// left untouched.
    pub fn extract_table(&self, table: &LinkTable, aois: &AoiLayer) -> ArdResult<ExtractionSummary> {
        let mut summary = ExtractionSummary::default();
        let layer = table.layer.as_str();

        if self.config.write_individual {
            let mut jobs = Vec::new();
            let mut existing_npz = Vec::new();
            for entry in table.entries().iter().filter(|e| self.config.selects(&e.aoi_id)) {
                let Some(aoi) = aois.features.iter().find(|f| f.id == entry.aoi_id) else {
                    log::warn!("AOI {} not in layer; skipping its links", entry.aoi_id);
                    continue;
                };
                if self.config.format == OutputFormat::Npz && self.npz_path(layer, &aoi.id).exists() {
                    summary.skipped_existing += entry.links.len();
                    existing_npz.push(aoi.id.as_str());
                    continue;
                }
                jobs.extend(entry.links.iter().map(|link| WindowJob { aoi, link }));
            }

            log::info!("Extracting {} windows with {} workers", jobs.len(), self.workers);
            let results = map_bounded(self.workers, &jobs, |job| self.run_job(layer, job, &aois.crs));

            let mut collected: Vec<(String, Vec<(String, Array3<f32>)>)> = Vec::new();
            for (job, result) in jobs.iter().zip(results) {
                summary.record(&result);
                if let JobResult::Collected(key, data) = result {
                    match collected.iter_mut().find(|(id, _)| *id == job.aoi.id) {
                        Some((_, arrays)) => arrays.push((key, data)),
                        None => collected.push((job.aoi.id.clone(), vec![(key, data)])),
                    }
                }
            }

            for (aoi_id, arrays) in collected {
                let path = self.npz_path(layer, &aoi_id);
                if let Err(e) = write_npz(&path, &arrays) {
                    log::warn!("Could not write {}: {}", path.display(), e);
                    summary.written -= arrays.len();
                    summary.failed += arrays.len();
                }
            }
        }

        if self.config.composites && table.mission == Mission::Sentinel1 {
            for entry in table.entries().iter().filter(|e| self.config.selects(&e.aoi_id)) {
                let Some(aoi) = aois.features.iter().find(|f| f.id == entry.aoi_id) else {
                    continue;
                };
                for group in group_by_orbit(&entry.links) {
                    let path = self.composite_path(layer, &aoi.id, group.direction, group.relative_orbit);
                    if path.exists() {
                        log::debug!("Composite exists: {}", path.display());
                        continue;
                    }
                    match self.composite_group(aoi, &aois.crs, &group) {
                        Ok(Some(composite)) => {
                            match write_atomic_geotiff(&path, &composite, self.config.nodata_value) {
                                Ok(()) => summary.composites_written += 1,
                                Err(e) => {
                                    log::warn!("Could not write {}: {}", path.display(), e);
                                    summary.failed += 1;
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e @ ArdError::ShapeMismatch { .. }) => return Err(e),
                        Err(e) => {
                            log::warn!(
                                "No composite for AOI {} ({} orbit {}): {}",
                                aoi.id,
                                group.direction,
                                group.relative_orbit,
                                e
                            );
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        log::info!("Extraction finished: {}", summary);
        Ok(summary)
    }

    fn run_job(&self, layer: &str, job: &WindowJob<'_>, aoi_crs: &Crs) -> JobResult {
        let geotiff = self.geotiff_path(layer, &job.aoi.id, job.link);
        if self.config.format == OutputFormat::GeoTiff && geotiff.exists() {
            log::debug!("Already extracted: {}", geotiff.display());
            return JobResult::Existing;
        }

        let outcome = match self.extract_window(&job.link.link, &job.aoi.geometry, aoi_crs) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Window read failed for {} / {}: {}", job.aoi.id, job.link.asset_id, e);
                return JobResult::Failed;
            }
        };
        let extract = match outcome {
            WindowOutcome::Extracted(extract) => extract,
            WindowOutcome::Outside => return JobResult::Outside,
            WindowOutcome::AllNodata => return JobResult::AllNodata,
        };

        match self.config.format {
            OutputFormat::Npz => JobResult::Collected(job.link.asset_id.clone(), extract.data),
            OutputFormat::GeoTiff => match write_atomic_geotiff(&geotiff, &extract, self.config.nodata_value) {
                Ok(()) => JobResult::Written,
                Err(e) => {
                    log::warn!("Could not write {}: {}", geotiff.display(), e);
                    JobResult::Failed
                }
            },
        }
    }

    /// `composite(link_records_for_one_orbit_group) -> array`
    ///
    /// The first member that opens fixes the window. Every other member is read
    /// over the same ground footprint on its own grid, which must share the
    /// reference's CRS and pixel size and be offset by whole pixels; anything
    /// else is a [`ArdError::ShapeMismatch`]. Members that cannot be opened or
    /// read are left out. Returns `None` when the AOI misses the reference raster.
    pub fn composite_group(
        &self,
        aoi: &AoiFeature,
        aoi_crs: &Crs,
        group: &OrbitGroup<'_>,
    ) -> ArdResult<Option<WindowExtract>> {
        let mut links = group.links.iter();
        let mut last_error = None;
        let (first, source) = loop {
            let Some(link) = links.next() else {
                return match last_error {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            };
            match RasterSource::open_with_retries(&link.link, self.open_attempts, self.retry_delay) {
                Ok(source) => break (link, source),
                Err(e) => {
                    log::warn!("Leaving {} out of composite: {}", link.asset_id, e);
                    last_error = Some(e);
                }
            }
        };

        let (native, window) = source.locate(&aoi.geometry, aoi_crs)?;
        let Some(window) = window else {
            log::warn!(
                "AOI {} falls outside {}; no composite for orbit {}",
                aoi.id,
                first.asset_id,
                group.relative_orbit
            );
            return Ok(None);
        };
        let reference = self.read_prepared(&source, &native, &window)?;
        let reference_header = source.header();

        let mut members = vec![reference.data.clone()];
        for link in links {
            let member = match RasterSource::open_with_retries(&link.link, self.open_attempts, self.retry_delay) {
                Ok(member) => member,
                Err(e) => {
                    log::warn!("Leaving {} out of composite: {}", link.asset_id, e);
                    continue;
                }
            };
            let header = member.header();
            let same_crs = Reprojector::new(&reference_header.crs, &header.crs)
                .map(|r| r.is_identity())
                .unwrap_or(false);
            let member_window = if same_crs {
                window_on_grid(&window, &reference_header.transform, &header.transform, header.size)
            } else {
                None
            };
            let Some(member_window) = member_window else {
                log::warn!("{} is not pixel-aligned with {}", link.asset_id, first.asset_id);
                return Err(ArdError::ShapeMismatch {
                    asset: link.asset_id.clone(),
                    expected: reference.data.dim(),
                    found: (header.band_count, header.size.1, header.size.0),
                });
            };
            if member_window != window {
                log::debug!(
                    "{} window shifted to col {} row {}",
                    link.asset_id,
                    member_window.col_off,
                    member_window.row_off
                );
            }

            let extract = match self.read_prepared(&member, &native, &member_window) {
                Ok(extract) => extract,
                Err(e) => {
                    log::warn!("Leaving {} out of composite: {}", link.asset_id, e);
                    continue;
                }
            };
            if extract.data.dim() != reference.data.dim() {
                return Err(ArdError::ShapeMismatch {
                    asset: link.asset_id.clone(),
                    expected: reference.data.dim(),
                    found: extract.data.dim(),
                });
            }
            members.push(extract.data);
        }

        log::info!(
            "Compositing {} scenes for AOI {} ({} orbit {})",
            members.len(),
            aoi.id,
            group.direction,
            group.relative_orbit
        );
        let data = median_composite(&members, self.config.nodata_value)?;
        Ok(Some(WindowExtract { data, ..reference }))
    }
}

/// Append `band1 - band2` as a new last band; nodata where either input is nodata
fn append_ratio_band(data: Array3<f32>, nodata: f32) -> ArdResult<Array3<f32>> {
    let (bands, height, width) = data.dim();
    if bands < 2 {
        return Err(ArdError::Config(format!(
            "ratio band needs two bands, window has {}",
            bands
        )));
    }
    let mut ratio = data.slice(s![0, .., ..]).to_owned();
    ratio.zip_mut_with(&data.slice(s![1, .., ..]), |a, &b| {
        *a = if *a == nodata || b == nodata { nodata } else { *a - b };
    });
    let ratio = ratio.into_shape((1, height, width)).map_err(|e| {
        ArdError::Output(format!("Cannot shape ratio band: {}", e))
    })?;
    ndarray::concatenate(Axis(0), &[data.view(), ratio.view()])
        .map_err(|e| ArdError::Output(format!("Cannot append ratio band: {}", e)))
}

/// Write through a `.part` file so a partial output never counts as done
fn write_atomic_geotiff(path: &Path, extract: &WindowExtract, nodata: f32) -> ArdResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("tif.part");
    write_geotiff(&partial, &extract.data, &extract.transform, &extract.projection_wkt, Some(nodata))?;
    std::fs::rename(&partial, path)?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

/// One compressed `.npz` with an array per asset stem
fn write_npz(path: &Path, arrays: &[(String, Array3<f32>)]) -> ArdResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ArdError::Output(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut npz = NpzWriter::new_compressed(tmp);
    for (key, data) in arrays {
        npz.add_array(key.as_str(), data)
            .map_err(|e| ArdError::Output(format!("Cannot add {} to npz: {}", key, e)))?;
    }
    let tmp = npz
        .finish()
        .map_err(|e| ArdError::Output(format!("Cannot finish npz: {}", e)))?;
    tmp.persist(path).map_err(|e| ArdError::Io(e.error))?;
    log::info!("Wrote {} arrays to {}", arrays.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn link() -> LinkRecord {
        LinkRecord {
            aoi_id: "7".to_string(),
            asset_id: "S1A_20180601_30_asc_175025_SpkRL".to_string(),
            mission: Mission::Sentinel1,
            link: "/archive/S1A_20180601_30_asc_175025_SpkRL.tif".to_string(),
            acquired: Utc.with_ymd_and_hms(2018, 6, 1, 17, 50, 25).unwrap(),
            orbit: None,
            cloud_cover: None,
            nodata_fraction: None,
        }
    }

    #[test]
    fn test_output_naming() {
        let extractor = WindowedExtractor::new(OutputConfig {
            output_dir: PathBuf::from("/out"),
            ..OutputConfig::default()
        });
        assert_eq!(
            extractor.geotiff_path("fields", "7", &link()),
            PathBuf::from("/out/fields_7/7_20180601T175025_S1A_20180601_30_asc_175025_SpkRL.tif")
        );
        assert_eq!(extractor.npz_path("fields", "7"), PathBuf::from("/out/fields/fields_7.npz"));
        assert_eq!(
            extractor.composite_path("fields", "7", PassDirection::Descending, 132),
            PathBuf::from("/out/fields_7/7_desc_orbit132_median.tif")
        );
    }

    #[test]
    fn test_ratio_band() {
        let data = array![[[-10.0f32, -999.0]], [[-16.0f32, -20.0]]];
        let out = append_ratio_band(data, -999.0).unwrap();
        assert_eq!(out.dim(), (3, 1, 2));
        assert_eq!(out[[2, 0, 0]], 6.0);
        assert_eq!(out[[2, 0, 1]], -999.0);
    }

    #[test]
    fn test_ratio_band_needs_two_bands() {
        let data = Array3::<f32>::zeros((1, 2, 2));
        assert!(append_ratio_band(data, -999.0).is_err());
    }

    #[test]
    fn test_write_npz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields").join("fields_7.npz");
        let arrays = vec![("a".to_string(), Array3::<f32>::ones((1, 2, 2)))];
        write_npz(&path, &arrays).unwrap();
        assert!(path.exists());
    }
}
