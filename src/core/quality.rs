//! Per-image usability checks
//!
//! Metadata mode compares the scene cloud fraction from the sidecar against
//! the threshold. Mask-sampled mode reads only the AOI window of the cloud
//! mask and of the first data band; nothing outside the window is fetched.
//! Combined mode applies `cloud_threshold` to the scene value and
//! `mask_cloud_threshold` (when set) to the sampled mask fraction.

use crate::config::{QualityConfig, QualityMode};
use crate::core::parallel::map_bounded;
use crate::core::link_table::LinkTable;
use crate::core::crs::Reprojector;
use crate::core::window::{touched_mask, window_for_bounds, PixelWindow};
use crate::io::raster::{RasterHeader, RasterSource};
use crate::types::{AoiLayer, ArdResult, AssetRecord, Crs, LinkRecord, Mission};
use geo::Geometry;
use ndarray::Array2;
use std::time::Duration;

/// Outcome of judging one (AOI, asset) pair
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accepted { nodata_fraction: Option<f64> },
    RejectedCloud(f64),
    RejectedNodata(f64),
    /// The windowed read failed after retries; the link is dropped
    Errored(String),
}

impl QualityVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityVerdict::Accepted { .. })
    }
}

/// Pixel counts inside an AOI window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskSample {
    pub pixels: usize,
    pub cloudy: usize,
    pub nodata: usize,
    /// Pixels that are cloudy or nodata
    pub unusable: usize,
}

impl MaskSample {
    fn fraction(&self, count: usize) -> f64 {
        if self.pixels == 0 {
            1.0
        } else {
            count as f64 / self.pixels as f64
        }
    }

    pub fn cloud_fraction(&self) -> f64 {
        self.fraction(self.unusable)
    }

    pub fn nodata_fraction(&self) -> f64 {
        self.fraction(self.nodata)
    }
}

/// Counts of quality outcomes over a link table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityCounts {
    pub accepted: usize,
    pub rejected_cloud: usize,
    pub rejected_nodata: usize,
    pub errored: usize,
}

pub struct QualityFilter {
    config: QualityConfig,
    open_attempts: u32,
    retry_delay: Duration,
}

impl QualityFilter {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            open_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// `accept(asset, aoi_geometry) -> bool` with the configured thresholds
    pub fn accept(&self, asset: &AssetRecord, aoi: &Geometry<f64>, aoi_crs: &Crs) -> bool {
        self.assess(&LinkRecord::from_asset("", asset), aoi, aoi_crs).is_accepted()
    }

    pub fn assess(&self, link: &LinkRecord, aoi: &Geometry<f64>, aoi_crs: &Crs) -> QualityVerdict {
        if matches!(self.config.mode, QualityMode::Metadata | QualityMode::Combined) {
            if let Some(verdict) = metadata_verdict(link.cloud_cover, self.config.cloud_threshold) {
                return verdict;
            }
            if self.config.mode == QualityMode::Metadata {
                return QualityVerdict::Accepted {
                    nodata_fraction: link.nodata_fraction,
                };
            }
        }

        match self.sample(link, aoi, aoi_crs) {
            Ok(sample) => self.sample_verdict(&sample),
            Err(e) => {
                log::warn!("Quality read failed for {}: {}", link.asset_id, e);
                QualityVerdict::Errored(e.to_string())
            }
        }
    }

    /// Thresholds are inclusive: a fraction equal to the threshold is accepted
    pub fn sample_verdict(&self, sample: &MaskSample) -> QualityVerdict {
        let nodata = sample.nodata_fraction();
        if nodata > self.config.nodata_threshold {
            return QualityVerdict::RejectedNodata(nodata);
        }
        let cloud = sample.cloud_fraction();
        if cloud > self.config.mask_threshold() {
            return QualityVerdict::RejectedCloud(cloud);
        }
        QualityVerdict::Accepted {
            nodata_fraction: Some(nodata),
        }
    }

    /// Read the AOI window of the cloud mask (S2) and of data band 1
    pub fn sample(&self, link: &LinkRecord, aoi: &Geometry<f64>, aoi_crs: &Crs) -> ArdResult<MaskSample> {
        let data = RasterSource::open_with_retries(&link.link, self.open_attempts, self.retry_delay)?;
        let (native, window) = data.locate(aoi, aoi_crs)?;
        let Some(window) = window else {
            log::debug!("AOI misses the raster of {}", link.asset_id);
            return Ok(MaskSample::default());
        };

        let mut inside = touched_mask(&native, &window, &data.header().transform);
        if !inside.iter().any(|&v| v) {
            inside.fill(true);
        }

        let band = data.read_band_window(1, &window)?;
        let nodata_value = data.header().nodata;
        let is_nodata = band.mapv(|v| v.is_nan() || nodata_value.map_or(false, |nd| v as f64 == nd));

        let cloudy = match link.mission.cloud_mask_link(&link.link) {
            Some(mask_link) if link.mission == Mission::Sentinel2 => {
                Some(self.cloud_pixels(&mask_link, &window, data.header())?)
            }
            _ => None,
        };

        let mut sample = MaskSample::default();
        for ((idx, &is_inside), &nodata) in inside.indexed_iter().zip(is_nodata.iter()) {
            if !is_inside {
                continue;
            }
            let cloud = cloudy.as_ref().map_or(false, |c| c[idx]);
            sample.pixels += 1;
            sample.nodata += nodata as usize;
            sample.cloudy += cloud as usize;
            sample.unusable += (nodata || cloud) as usize;
        }
        log::debug!(
            "{}: {} pixels, {} cloudy, {} nodata",
            link.asset_id,
            sample.pixels,
            sample.cloudy,
            sample.nodata
        );
        Ok(sample)
    }

    /// Cloud flags for each pixel of `data_window`
    ///
    /// The mask may sit on its own grid: every data pixel takes the mask value
    /// under its centre (nearest neighbour). Pixels the mask does not cover
    /// count as clear.
    fn cloud_pixels(
        &self,
        mask_link: &str,
        data_window: &PixelWindow,
        data_header: &RasterHeader,
    ) -> ArdResult<Array2<bool>> {
        let shape = (data_window.height, data_window.width);
        let mask = RasterSource::open_with_retries(mask_link, self.open_attempts, self.retry_delay)?;
        let header = mask.header();
        let to_mask = Reprojector::new(&data_header.crs, &header.crs)?;
        let footprint = to_mask.bounds(&data_window.bounds(&data_header.transform))?;
        let Some(mask_window) = window_for_bounds(&footprint, &header.transform, header.size) else {
            log::debug!("Cloud mask {} does not cover the data window", mask_link);
            return Ok(Array2::from_elem(shape, false));
        };
        let values = mask.read_band_window(1, &mask_window)?;
        let mask_transform = mask_window.transform(&header.transform);

        let mut cloudy = Array2::from_elem(shape, false);
        for ((row, col), flag) in cloudy.indexed_iter_mut() {
            let (x, y) = data_header.transform.apply(
                (data_window.col_off + col) as f64 + 0.5,
                (data_window.row_off + row) as f64 + 0.5,
            );
            let (x, y) = to_mask.point(x, y)?;
            let Some((mask_col, mask_row)) = mask_transform.invert(x, y) else {
                continue;
            };
            if mask_col < 0.0 || mask_row < 0.0 {
                continue;
            }
            if let Some(&v) = values.get((mask_row.floor() as usize, mask_col.floor() as usize)) {
                *flag = self.is_cloud_value(v);
            }
        }
        Ok(cloudy)
    }

    fn is_cloud_value(&self, v: f32) -> bool {
        v.is_finite() && self.config.cloud_mask_values.iter().any(|&c| v == c as f32)
    }

    /// Judge every link of `table`, dropping the rejected ones
    ///
    /// Reads run on at most `workers` threads. Accepted links get their
    /// sampled nodata fraction recorded.
    pub fn filter_table(&self, table: &mut LinkTable, aois: &AoiLayer, workers: usize) -> QualityCounts {
        let jobs: Vec<(usize, &LinkRecord)> = table
            .entries()
            .iter()
            .enumerate()
            .flat_map(|(i, entry)| entry.links.iter().map(move |l| (i, l)))
            .collect();

        let verdicts = map_bounded(workers, &jobs, |(_, link)| {
            match aois.features.iter().find(|f| f.id == link.aoi_id) {
                Some(feature) => self.assess(link, &feature.geometry, &aois.crs),
                None => QualityVerdict::Errored(format!("unknown AOI {}", link.aoi_id)),
            }
        });

        let mut counts = QualityCounts::default();
        let mut kept: Vec<Vec<LinkRecord>> = vec![Vec::new(); table.entries().len()];
        for ((entry_index, link), verdict) in jobs.iter().zip(verdicts) {
            match verdict {
                QualityVerdict::Accepted { nodata_fraction } => {
                    counts.accepted += 1;
                    let mut link = (*link).clone();
                    link.nodata_fraction = nodata_fraction.or(link.nodata_fraction);
                    kept[*entry_index].push(link);
                }
                QualityVerdict::RejectedCloud(f) => {
                    log::debug!("{} / {} rejected: cloud fraction {:.3}", link.aoi_id, link.asset_id, f);
                    counts.rejected_cloud += 1;
                }
                QualityVerdict::RejectedNodata(f) => {
                    log::debug!("{} / {} rejected: nodata fraction {:.3}", link.aoi_id, link.asset_id, f);
                    counts.rejected_nodata += 1;
                }
                QualityVerdict::Errored(_) => counts.errored += 1,
            }
        }

        let ids: Vec<String> = table.aoi_ids().map(str::to_string).collect();
        for (id, links) in ids.iter().zip(kept) {
            table.set_links(id, links);
        }

        log::info!(
            "Quality filter kept {} links ({} cloudy, {} incomplete, {} unreadable)",
            counts.accepted,
            counts.rejected_cloud,
            counts.rejected_nodata,
            counts.errored
        );
        counts
    }
}

/// Metadata-mode decision; `None` when the value does not decide
///
/// Missing cloud cover and values at or below the threshold both return
/// `None`, leaving later checks to run.
pub fn metadata_verdict(cloud_cover: Option<f64>, threshold: f64) -> Option<QualityVerdict> {
    match cloud_cover {
        Some(cloud) if cloud > threshold => Some(QualityVerdict::RejectedCloud(cloud)),
        _ => None,
    }
}
