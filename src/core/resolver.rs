//! Remote directory resolution
//!
//! Walks the day directories of a date window and turns their listings into
//! [`AssetLocator`]s. The walk is lazy and can be capped by directory count or
//! wall-clock time; complete walks are cached per `(start, end)`.

use crate::config::ArchiveConfig;
use crate::io::archive::DirectoryListing;
use crate::io::listing_cache::ListingCache;
use crate::io::metadata::parse_name;
use crate::types::{ArdResult, AssetLocator, DateRange};
use chrono::NaiveDate;
use std::time::{Duration, Instant};

/// Tile (S2) and relative-orbit (S1) restrictions applied to locators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatorFilter {
    pub tiles: Option<Vec<String>>,
    pub orbits: Option<Vec<u16>>,
}

impl LocatorFilter {
    pub fn accepts(&self, locator: &AssetLocator) -> bool {
        if self.tiles.is_none() && self.orbits.is_none() {
            return true;
        }
        let Some(name) = parse_name(locator.mission, &locator.link) else {
            // Unparseable names are left for the metadata stage to discard
            return true;
        };
        if let (Some(tiles), Some(tile)) = (&self.tiles, &name.tile) {
            if !tiles.iter().any(|t| t.eq_ignore_ascii_case(tile)) {
                return false;
            }
        }
        if let (Some(orbits), Some(orbit)) = (&self.orbits, &name.orbit) {
            if !orbits.contains(&orbit.relative_orbit) {
                return false;
            }
        }
        true
    }
}

/// Result of listing a single day directory
#[derive(Debug, Clone, PartialEq)]
pub enum DayListing {
    Listed(NaiveDate, Vec<AssetLocator>),
    Missing(NaiveDate),
    Failed(NaiveDate, String),
}

/// Lazy walk over the day directories of a window
pub struct DayScan<'a, L: DirectoryListing> {
    listing: &'a L,
    days: Box<dyn Iterator<Item = NaiveDate> + 'a>,
    request_delay: Duration,
    max_directories: Option<usize>,
    deadline: Option<Instant>,
    visited: usize,
    truncated: bool,
}

impl<'a, L: DirectoryListing> DayScan<'a, L> {
    /// Whether an early-stop cap cut the walk short
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn visited(&self) -> usize {
        self.visited
    }
}

impl<'a, L: DirectoryListing> Iterator for DayScan<'a, L> {
    type Item = DayListing;

    fn next(&mut self) -> Option<DayListing> {
        if self.truncated {
            return None;
        }
        let date = self.days.next()?;

        let over_count = self.max_directories.map_or(false, |max| self.visited >= max);
        let over_time = self.deadline.map_or(false, |d| Instant::now() >= d);
        if over_count || over_time {
            log::warn!(
                "Stopping directory scan early at {} after {} directories",
                date,
                self.visited
            );
            self.truncated = true;
            return None;
        }

        if self.visited > 0 && !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }
        self.visited += 1;

        let mission = self.listing.mission();
        Some(match self.listing.list_day(date) {
            Ok(Some(links)) => {
                log::debug!("{}: {} assets", date, links.len());
                DayListing::Listed(
                    date,
                    links
                        .into_iter()
                        .map(|link| AssetLocator { mission, date, link })
                        .collect(),
                )
            }
            Ok(None) => {
                log::debug!("No directory for {}", date);
                DayListing::Missing(date)
            }
            Err(e) => {
                log::warn!("Skipping directory for {}: {}", date, e);
                DayListing::Failed(date, e.to_string())
            }
        })
    }
}

/// Counters of one resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub days_listed: usize,
    pub days_missing: usize,
    pub days_failed: usize,
    pub truncated: bool,
    pub from_cache: bool,
}

/// Locators of a window after filtering, with the scan counters
#[derive(Debug, Clone)]
pub struct Resolution {
    pub locators: Vec<AssetLocator>,
    pub report: ScanReport,
}

pub struct Resolver<L: DirectoryListing> {
    listing: L,
    cache: Option<ListingCache>,
    request_delay: Duration,
    max_directories: Option<usize>,
    max_scan: Option<Duration>,
}

impl<L: DirectoryListing> Resolver<L> {
    pub fn new(listing: L, config: &ArchiveConfig) -> Self {
        let cache = config
            .use_cache
            .then(|| ListingCache::new(config.resolved_cache_dir()));
        Self {
            listing,
            cache,
            request_delay: Duration::from_millis(config.request_delay_ms),
            max_directories: config.max_directories,
            max_scan: config.max_scan_seconds.map(Duration::from_secs),
        }
    }

    pub fn with_cache(mut self, cache: Option<ListingCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn listing(&self) -> &L {
        &self.listing
    }

    /// Start a fresh walk over the window's day directories
    pub fn scan(&self, range: &DateRange) -> DayScan<'_, L> {
        DayScan {
            listing: &self.listing,
            days: Box::new(range.days()),
            request_delay: self.request_delay,
            max_directories: self.max_directories,
            deadline: self.max_scan.map(|d| Instant::now() + d),
            visited: 0,
            truncated: false,
        }
    }

    /// `resolve(date_start, date_end, filter) -> locators`
    ///
    /// A failed connectivity probe is fatal. Missing or failing days are
    /// skipped and counted. The unfiltered listing is cached only when every
    /// day of the window was visited without error.
    pub fn resolve(&self, range: &DateRange, filter: &LocatorFilter) -> ArdResult<Resolution> {
        let mission = self.listing.mission();

        if let Some(cache) = &self.cache {
            match cache.load(mission, range) {
                Ok(Some(all)) => {
                    let locators = apply_filter(all, filter);
                    return Ok(Resolution {
                        locators,
                        report: ScanReport {
                            from_cache: true,
                            ..ScanReport::default()
                        },
                    });
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring unreadable listing cache: {}", e),
            }
        }

        self.listing.probe()?;
        log::info!("Scanning {} day directories for {}", range.num_days(), mission);

        let mut report = ScanReport::default();
        let mut all = Vec::new();
        let mut scan = self.scan(range);
        for day in &mut scan {
            match day {
                DayListing::Listed(_, locators) => {
                    report.days_listed += 1;
                    all.extend(locators);
                }
                DayListing::Missing(_) => report.days_missing += 1,
                DayListing::Failed(..) => report.days_failed += 1,
            }
        }
        report.truncated = scan.truncated();

        log::info!(
            "Found {} {} assets in {} directories ({} missing, {} failed)",
            all.len(),
            mission,
            report.days_listed,
            report.days_missing,
            report.days_failed
        );

        if let Some(cache) = &self.cache {
            if report.truncated || report.days_failed > 0 {
                log::info!("Listing incomplete; not caching");
            } else if let Err(e) = cache.store(mission, range, &all) {
                log::warn!("Could not write listing cache: {}", e);
            }
        }

        Ok(Resolution {
            locators: apply_filter(all, filter),
            report,
        })
    }
}

fn apply_filter(locators: Vec<AssetLocator>, filter: &LocatorFilter) -> Vec<AssetLocator> {
    let before = locators.len();
    let kept: Vec<AssetLocator> = locators.into_iter().filter(|l| filter.accepts(l)).collect();
    if kept.len() < before {
        log::info!("Tile/orbit filter kept {} of {} assets", kept.len(), before);
    }
    kept
}
