//! Python bindings

use crate::config::SearchConfig;
use crate::core::orbit::median_composite;
use crate::core::search::{extract_from_mapping, search_layer, SearchOutcome};
use crate::types::{DateRange, Mission};
use numpy::{IntoPyArray, PyArray3, PyReadonlyArray3};
use pyo3::prelude::*;
use std::path::PathBuf;

fn runtime_error(e: impl std::fmt::Display) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}

fn load_config(mission: &str, config_path: Option<String>, output_dir: Option<String>) -> PyResult<SearchConfig> {
    let mut config = match config_path {
        Some(path) => SearchConfig::from_json_file(path).map_err(runtime_error)?,
        None => match mission.to_lowercase().as_str() {
            "s1" | "sentinel1" | "sentinel-1" => SearchConfig::sentinel1(),
            "s2" | "sentinel2" | "sentinel-2" => SearchConfig::sentinel2(),
            _ => {
                return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                    "Invalid mission: {}",
                    mission
                )))
            }
        },
    };
    if let Some(dir) = output_dir {
        config.output.output_dir = PathBuf::from(dir);
    }
    Ok(config)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PySearchResult>()?;
    m.add_function(wrap_pyfunction!(search, m)?)?;
    m.add_function(wrap_pyfunction!(extract, m)?)?;
    m.add_function(wrap_pyfunction!(composite, m)?)?;
    Ok(())
}

/// Result of a search: link rows plus the written files
#[pyclass(name = "SearchResult")]
struct PySearchResult {
    inner: SearchOutcome,
}

#[pymethods]
impl PySearchResult {
    #[getter]
    fn mapping_path(&self) -> String {
        self.inner.mapping_path.display().to_string()
    }

    #[getter]
    fn layer_path(&self) -> String {
        self.inner.layer_path.display().to_string()
    }

    #[getter]
    fn mission(&self) -> String {
        match self.inner.table.mission {
            Mission::Sentinel1 => "s1".to_string(),
            Mission::Sentinel2 => "s2".to_string(),
        }
    }

    /// `(aoi_id, asset_id, link, acquired)` per link record
    #[getter]
    fn links(&self) -> Vec<(String, String, String, String)> {
        self.inner
            .table
            .iter()
            .map(|l| (l.aoi_id.clone(), l.asset_id.clone(), l.link.clone(), l.acquired.to_rfc3339()))
            .collect()
    }

    #[getter]
    fn unmatched(&self) -> Vec<String> {
        self.inner.table.unmatched().into_iter().map(str::to_string).collect()
    }

    #[getter]
    fn failed(&self) -> Vec<(String, String)> {
        self.inner.failed_aois.clone()
    }

    fn __str__(&self) -> String {
        self.inner.tally.to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "SearchResult(mission='{}', links={}, mapping='{}')",
            self.mission(),
            self.inner.table.len(),
            self.mapping_path()
        )
    }
}

#[pyfunction]
#[pyo3(signature = (aoi_path, start, end, mission="s2", config_path=None, output_dir=None))]
fn search(
    aoi_path: String,
    start: &str,
    end: &str,
    mission: &str,
    config_path: Option<String>,
    output_dir: Option<String>,
) -> PyResult<PySearchResult> {
    let config = load_config(mission, config_path, output_dir)?;
    let range = DateRange::parse(start, end).map_err(runtime_error)?;
    let outcome = search_layer(config, aoi_path, &range).map_err(runtime_error)?;
    Ok(PySearchResult { inner: outcome })
}

#[pyfunction]
#[pyo3(signature = (mapping_path, aoi_path, mission="s2", config_path=None, output_dir=None, aoi_ids=None))]
fn extract(
    mapping_path: String,
    aoi_path: String,
    mission: &str,
    config_path: Option<String>,
    output_dir: Option<String>,
    aoi_ids: Option<Vec<String>>,
) -> PyResult<String> {
    let mut config = load_config(mission, config_path, output_dir)?;
    if aoi_ids.is_some() {
        config.output.aoi_ids = aoi_ids;
    }
    let summary = extract_from_mapping(&config, mapping_path, aoi_path).map_err(runtime_error)?;
    Ok(summary.to_string())
}

/// Element-wise median of equally shaped `(band, row, col)` arrays
#[pyfunction]
#[pyo3(signature = (members, nodata=-999.0))]
fn composite<'py>(
    py: Python<'py>,
    members: Vec<PyReadonlyArray3<'py, f32>>,
    nodata: f32,
) -> PyResult<&'py PyArray3<f32>> {
    let arrays: Vec<_> = members.iter().map(|m| m.as_array().to_owned()).collect();
    let out = median_composite(&arrays, nodata).map_err(runtime_error)?;
    Ok(out.into_pyarray(py))
}
