//! Cloud-optimized raster access through GDAL
//!
//! Remote links are opened via `/vsicurl/`, so opening a dataset only fetches
//! the header and every read issues range requests for the touched tiles.

use crate::core::crs::{geometry_bounds, Reprojector};
use crate::core::window::{window_for_bounds, PixelWindow};
use crate::io::http::is_remote;
use crate::types::{ArdError, ArdResult, BoundingBox, Crs, GeoTransform};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use geo::Geometry;
use ndarray::{Array2, Array3};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

static GDAL_NETWORK_INIT: Once = Once::new();

/// Set GDAL options for efficient partial reads over HTTP
pub fn configure_gdal_network(max_retries: u32, retry_delay: Duration) {
    GDAL_NETWORK_INIT.call_once(|| {
        let options = [
            ("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR".to_string()),
            ("CPL_VSIL_CURL_ALLOWED_EXTENSIONS", ".tif,.xml".to_string()),
            ("GDAL_HTTP_MAX_RETRY", max_retries.to_string()),
            ("GDAL_HTTP_RETRY_DELAY", retry_delay.as_secs().max(1).to_string()),
        ];
        for (key, value) in options.iter() {
            if let Err(e) = gdal::config::set_config_option(key, value) {
                log::warn!("Could not set GDAL option {}={}: {}", key, value, e);
            }
        }
    });
}

/// GDAL path for a link: remote links go through the curl virtual filesystem
pub fn gdal_path(link: &str) -> String {
    if is_remote(link) {
        format!("/vsicurl/{}", link)
    } else {
        link.to_string()
    }
}

/// Header-level description of a raster asset
#[derive(Debug, Clone)]
pub struct RasterHeader {
    pub size: (usize, usize),
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub projection_wkt: String,
    pub nodata: Option<f64>,
}

impl RasterHeader {
    /// Full raster extent in its own CRS
    pub fn bounds(&self) -> BoundingBox {
        PixelWindow {
            col_off: 0,
            row_off: 0,
            width: self.size.0,
            height: self.size.1,
        }
        .bounds(&self.transform)
    }
}

/// Open handle on one raster asset
pub struct RasterSource {
    link: String,
    dataset: Dataset,
    header: RasterHeader,
}

impl RasterSource {
    pub fn open(link: &str) -> ArdResult<Self> {
        log::debug!("Opening raster: {}", link);
        let dataset = Dataset::open(Path::new(&gdal_path(link)))?;

        let projection_wkt = dataset.projection();
        if projection_wkt.is_empty() {
            return Err(ArdError::GeometryMismatch(format!("{} has no reference system", link)));
        }
        let nodata = dataset.rasterband(1)?.no_data_value();
        let header = RasterHeader {
            size: dataset.raster_size(),
            band_count: dataset.raster_count() as usize,
            transform: GeoTransform::from_gdal(dataset.geo_transform()?),
            crs: Crs(projection_wkt.clone()),
            projection_wkt,
            nodata,
        };

        Ok(Self {
            link: link.to_string(),
            dataset,
            header,
        })
    }

    /// Open with bounded retries for transient network failures
    pub fn open_with_retries(link: &str, attempts: u32, delay: Duration) -> ArdResult<Self> {
        let attempts = attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match Self::open(link) {
                Ok(source) => return Ok(source),
                Err(e @ ArdError::GeometryMismatch(_)) => return Err(e),
                Err(e) => {
                    log::debug!("Open attempt {} of {} for {} failed: {}", attempt, attempts, link, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ArdError::Http(format!("Could not open {}", link))))
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    /// Reproject an AOI into this raster's CRS and locate its pixel window
    ///
    /// Returns the reprojected geometry alongside the clamped window, or `None`
    /// for the window when the AOI misses the raster entirely.
    pub fn locate(
        &self,
        aoi: &Geometry<f64>,
        aoi_crs: &Crs,
    ) -> ArdResult<(Geometry<f64>, Option<PixelWindow>)> {
        let reprojector = Reprojector::new(aoi_crs, &self.header.crs)?;
        let native = reprojector.geometry(aoi)?;
        let bounds = geometry_bounds(&native)
            .ok_or_else(|| ArdError::GeometryMismatch("AOI geometry is empty".to_string()))?;
        let window = window_for_bounds(&bounds, &self.header.transform, self.header.size);
        Ok((native, window))
    }

    /// Partial read of one band (1-based) over a window
    pub fn read_band_window(&self, band: usize, window: &PixelWindow) -> ArdResult<Array2<f32>> {
        if band == 0 || band > self.header.band_count {
            return Err(ArdError::Config(format!(
                "band {} out of range for {} ({} bands)",
                band, self.link, self.header.band_count
            )));
        }
        let rasterband = self.dataset.rasterband(band as isize)?;
        let size = (window.width, window.height);
        let buffer = rasterband.read_as::<f32>(
            (window.col_off as isize, window.row_off as isize),
            size,
            size,
            None,
        )?;
        Array2::from_shape_vec((window.height, window.width), buffer.data)
            .map_err(|e| ArdError::Output(format!("Failed to reshape window of {}: {}", self.link, e)))
    }

    /// Partial read of several bands (1-based) into `(band, row, col)`
    pub fn read_window(&self, bands: &[usize], window: &PixelWindow) -> ArdResult<Array3<f32>> {
        let mut data = Array3::<f32>::zeros((bands.len(), window.height, window.width));
        for (i, &band) in bands.iter().enumerate() {
            let plane = self.read_band_window(band, window)?;
            data.index_axis_mut(ndarray::Axis(0), i).assign(&plane);
        }
        Ok(data)
    }

    /// All band indices of this raster
    pub fn all_bands(&self) -> Vec<usize> {
        (1..=self.header.band_count).collect()
    }
}

/// Write a `(band, row, col)` array as a DEFLATE-compressed GeoTIFF
pub fn write_geotiff<P: AsRef<Path>>(
    path: P,
    data: &Array3<f32>,
    transform: &GeoTransform,
    projection_wkt: &str,
    nodata: Option<f32>,
) -> ArdResult<()> {
    log::debug!("Writing GeoTIFF: {}", path.as_ref().display());

    let (bands, height, width) = data.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = [
        RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
        RasterCreationOption { key: "TILED", value: "YES" },
    ];
    let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        bands as isize,
        &options,
    )?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_projection(projection_wkt)?;

    for (i, plane) in data.outer_iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        let flat: Vec<f32> = plane.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat);
        rasterband.write((0, 0), (width, height), &buffer)?;
        if let Some(value) = nodata {
            rasterband.set_no_data_value(Some(value as f64))?;
        }
    }

    Ok(())
}
