//! End-to-end search: resolve → describe → match → filter → aggregate → persist

use crate::config::{OrbitPolicy, SearchConfig};
use crate::core::extract::{ExtractionSummary, WindowedExtractor};
use crate::core::link_table::LinkTable;
use crate::core::matcher::match_assets;
use crate::core::orbit::apply_policy_to_table;
use crate::core::parallel::map_bounded;
use crate::core::quality::QualityFilter;
use crate::core::resolver::{LocatorFilter, Resolver};
use crate::io::archive::{CedaArchive, DirectoryListing};
use crate::io::http::HttpClient;
use crate::io::layer::{read_aoi_layer, tiles_intersecting, write_augmented_layer};
use crate::io::metadata::{MetadataExtractor, MetadataOutcome};
use crate::io::raster::configure_gdal_network;
use crate::types::{AoiLayer, ArdResult, AssetRecord, DateRange, Mission};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Diagnostic counts of one search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTally {
    pub days_listed: usize,
    pub days_missing: usize,
    pub days_failed: usize,
    pub listing_from_cache: bool,
    pub scan_truncated: bool,
    pub assets_considered: usize,
    pub metadata_malformed: usize,
    pub metadata_unreachable: usize,
    pub links_matched: usize,
    pub rejected_cloud: usize,
    pub rejected_nodata: usize,
    pub quality_errors: usize,
    pub orbit_dropped: usize,
    pub links_kept: usize,
    pub aois_total: usize,
    pub aois_unmatched: usize,
    pub aois_failed: usize,
}

impl fmt::Display for SearchTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Search summary")?;
        if self.listing_from_cache {
            writeln!(f, "  listing:             from cache")?;
        } else {
            writeln!(
                f,
                "  directories:         {} listed, {} missing, {} failed{}",
                self.days_listed,
                self.days_missing,
                self.days_failed,
                if self.scan_truncated { " (stopped early)" } else { "" }
            )?;
        }
        writeln!(
            f,
            "  assets:              {} considered, {} malformed, {} unreachable",
            self.assets_considered, self.metadata_malformed, self.metadata_unreachable
        )?;
        writeln!(
            f,
            "  links:               {} matched, {} cloudy, {} incomplete, {} unreadable, {} other orbits",
            self.links_matched,
            self.rejected_cloud,
            self.rejected_nodata,
            self.quality_errors,
            self.orbit_dropped
        )?;
        write!(
            f,
            "  result:              {} links for {} AOIs ({} without matches, {} failed)",
            self.links_kept, self.aois_total, self.aois_unmatched, self.aois_failed
        )
    }
}

/// Link table of a search together with its diagnostics and written files
#[derive(Debug)]
pub struct SearchOutcome {
    pub table: LinkTable,
    pub tally: SearchTally,
    /// `(aoi_id, reason)` for AOIs whose geometry could not be reconciled
    pub failed_aois: Vec<(String, String)>,
    pub mapping_path: PathBuf,
    pub layer_path: PathBuf,
}

pub struct SearchSession<L: DirectoryListing> {
    config: SearchConfig,
    resolver: Resolver<L>,
    metadata: MetadataExtractor,
    quality: QualityFilter,
}

impl SearchSession<CedaArchive> {
    /// Session against the configured CEDA archive root (URL or local mirror)
    pub fn connect(config: SearchConfig) -> ArdResult<Self> {
        let client = HttpClient::new(&config.archive)?;
        let archive = CedaArchive::new(
            config.mission,
            config.archive.base_url_for(config.mission),
            client,
        );
        Self::with_listing(config, archive)
    }
}

impl<L: DirectoryListing> SearchSession<L> {
    pub fn with_listing(config: SearchConfig, listing: L) -> ArdResult<Self> {
        config.validate()?;
        let retry_delay = Duration::from_millis(config.archive.retry_delay_ms);
        configure_gdal_network(config.archive.max_retries, retry_delay);

        let client = HttpClient::new(&config.archive)?;
        Ok(Self {
            resolver: Resolver::new(listing, &config.archive),
            metadata: MetadataExtractor::new(client, config.archive.max_retries, retry_delay),
            quality: QualityFilter::new(config.quality.clone())
                .with_retries(config.archive.max_retries, retry_delay),
            config,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn mission(&self) -> Mission {
        self.config.mission
    }

    fn locator_filter(&self, aois: &AoiLayer) -> ArdResult<LocatorFilter> {
        let mut filter = LocatorFilter::default();
        match self.config.mission {
            Mission::Sentinel2 => {
                filter.tiles = match (&self.config.tiles, &self.config.tile_grid) {
                    (Some(tiles), _) => Some(tiles.clone()),
                    (None, Some(grid)) => Some(tiles_intersecting(grid, aois)?),
                    (None, None) => None,
                };
            }
            Mission::Sentinel1 => filter.orbits = self.config.orbit_numbers.clone(),
        }
        Ok(filter)
    }

    /// Run discovery for every AOI of the layer and persist the results
    ///
    /// AOIs that cannot be reconciled are reported and skipped; the mapping
    /// and the augmented layer are always written with whatever survived.
    pub fn search(&self, aois: &AoiLayer, range: &DateRange) -> ArdResult<SearchOutcome> {
        self.config.validate_range(range)?;
        let mut tally = SearchTally {
            aois_total: aois.features.len(),
            ..SearchTally::default()
        };
        log::info!(
            "Searching {} for {} AOIs of '{}' between {} and {}",
            self.config.mission,
            aois.features.len(),
            aois.name,
            range.start,
            range.end
        );

        let filter = self.locator_filter(aois)?;
        let resolution = self.resolver.resolve(range, &filter)?;
        tally.days_listed = resolution.report.days_listed;
        tally.days_missing = resolution.report.days_missing;
        tally.days_failed = resolution.report.days_failed;
        tally.listing_from_cache = resolution.report.from_cache;
        tally.scan_truncated = resolution.report.truncated;
        tally.assets_considered = resolution.locators.len();

        let metadata = &self.metadata;
        let outcomes = map_bounded(self.config.workers, &resolution.locators, |locator| {
            metadata.describe(locator)
        });
        let mut assets: Vec<AssetRecord> = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                MetadataOutcome::Record(record) => assets.push(record),
                MetadataOutcome::Malformed(_) => tally.metadata_malformed += 1,
                MetadataOutcome::Unreachable(_) => tally.metadata_unreachable += 1,
            }
        }
        log::info!("Described {} of {} assets", assets.len(), tally.assets_considered);

        let matched = match_assets(aois, &assets, range, self.config.predicate, self.config.mission)?;
        let mut table = matched.table;
        tally.links_matched = table.len();
        tally.aois_failed = matched.failed.len();

        let quality = self.quality.filter_table(&mut table, aois, self.config.workers);
        tally.rejected_cloud = quality.rejected_cloud;
        tally.rejected_nodata = quality.rejected_nodata;
        tally.quality_errors = quality.errored;

        if self.config.mission == Mission::Sentinel1 && self.config.orbit_policy != OrbitPolicy::KeepAll {
            tally.orbit_dropped = apply_policy_to_table(&mut table, &self.config.orbit_policy);
        }

        tally.links_kept = table.len();
        tally.aois_unmatched = table.unmatched().len();

        let (mapping_path, layer_path) = persist(&table, aois, &self.config.output.output_dir)?;
        log::info!("{}", tally);

        Ok(SearchOutcome {
            table,
            tally,
            failed_aois: matched.failed,
            mapping_path,
            layer_path,
        })
    }

    /// Windowed extraction of a finished search
    pub fn extract(&self, table: &LinkTable, aois: &AoiLayer) -> ArdResult<ExtractionSummary> {
        self.extractor().extract_table(table, aois)
    }

    pub fn extractor(&self) -> WindowedExtractor {
        WindowedExtractor::new(self.config.output.clone())
            .with_retries(
                self.config.archive.max_retries,
                Duration::from_millis(self.config.archive.retry_delay_ms),
            )
            .with_workers(self.config.workers)
    }
}

/// Write the AOI→links mapping and the augmented layer under `output_dir`
pub fn persist(table: &LinkTable, aois: &AoiLayer, output_dir: &Path) -> ArdResult<(PathBuf, PathBuf)> {
    let mapping_path = table.save_json(output_dir)?;
    let layer_path = output_dir.join(format!("{}_links.gpkg", aois.name));
    write_augmented_layer(&layer_path, aois, table)?;
    Ok((mapping_path, layer_path))
}

/// Search the CEDA archive for every feature of a vector file
pub fn search_layer<P: AsRef<Path>>(
    config: SearchConfig,
    aoi_path: P,
    range: &DateRange,
) -> ArdResult<SearchOutcome> {
    let aois = read_aoi_layer(aoi_path, config.aoi_id_field.as_deref())?;
    SearchSession::connect(config)?.search(&aois, range)
}

/// Extract windows from a saved mapping without repeating discovery
pub fn extract_from_mapping<P: AsRef<Path>, Q: AsRef<Path>>(
    config: &SearchConfig,
    mapping_path: P,
    aoi_path: Q,
) -> ArdResult<ExtractionSummary> {
    let table = LinkTable::load_json(mapping_path)?;
    let aois = read_aoi_layer(aoi_path, config.aoi_id_field.as_deref())?;
    configure_gdal_network(
        config.archive.max_retries,
        Duration::from_millis(config.archive.retry_delay_ms),
    );
    WindowedExtractor::new(config.output.clone())
        .with_retries(
            config.archive.max_retries,
            Duration::from_millis(config.archive.retry_delay_ms),
        )
        .with_workers(config.workers)
        .extract_table(&table, &aois)
}
