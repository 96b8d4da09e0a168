use crate::types::{ArdError, ArdResult, AssetLocator, DateRange, Mission};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk listing of every asset discovered for one date window
///
/// Entries are keyed by mission and `(start, end)`. They are never invalidated
/// automatically; delete the file to force a fresh scan.
pub struct ListingCache {
    cache_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedListing {
    mission: Mission,
    range: DateRange,
    locators: Vec<AssetLocator>,
}

impl ListingCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache}/{s1|s2}_links_all_{start}_{end}.json`
    pub fn path_for(&self, mission: Mission, range: &DateRange) -> PathBuf {
        self.cache_dir
            .join(format!("{}_links_all_{}.json", mission.short_name(), range.key()))
    }

    pub fn load(&self, mission: Mission, range: &DateRange) -> ArdResult<Option<Vec<AssetLocator>>> {
        let path = self.path_for(mission, range);
        if !path.exists() {
            return Ok(None);
        }
        log::info!("Using cached listing: {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        let cached: CachedListing = serde_json::from_str(&content)?;
        if cached.mission != mission || cached.range != *range {
            return Err(ArdError::Config(format!(
                "Listing cache {} does not match {} {}",
                path.display(),
                mission,
                range.key()
            )));
        }
        Ok(Some(cached.locators))
    }

    /// Write the listing atomically so an interrupted run never leaves a partial cache
    pub fn store(&self, mission: Mission, range: &DateRange, locators: &[AssetLocator]) -> ArdResult<PathBuf> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.path_for(mission, range);

        let listing = CachedListing {
            mission,
            range: *range,
            locators: locators.to_vec(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        serde_json::to_writer_pretty(&mut tmp, &listing)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| ArdError::Io(e.error))?;

        log::info!("Cached {} asset links to {}", locators.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ListingCache::new(dir.path().to_path_buf());
        let range = DateRange::parse("2018-06-01", "2018-06-02").unwrap();

        assert!(cache.load(Mission::Sentinel1, &range).unwrap().is_none());

        let locators = vec![AssetLocator {
            mission: Mission::Sentinel1,
            date: NaiveDate::from_ymd_opt(2018, 6, 1).unwrap(),
            link: "https://host/S1A_20180601_30_asc_175025_SpkRL.tif".to_string(),
        }];
        let path = cache.store(Mission::Sentinel1, &range, &locators).unwrap();
        assert!(path.ends_with("s1_links_all_2018-06-01_2018-06-02.json"));

        let loaded = cache.load(Mission::Sentinel1, &range).unwrap().unwrap();
        assert_eq!(loaded, locators);

        // Other missions never share an entry
        assert!(cache.load(Mission::Sentinel2, &range).unwrap().is_none());
    }
}
