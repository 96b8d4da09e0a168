//! Day-directory listings of the ARD archive
//!
//! The archive is laid out as `{base}/{YYYY}/{MM}/{DD}/` with one HTML index per
//! day. [`DirectoryListing`] hides how a day is listed so the resolver works the
//! same against CEDA, a local mirror or a pre-built index.

use crate::io::http::{is_remote, HttpClient};
use crate::types::{ArdResult, Mission};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Enumerates asset links for one archive day
pub trait DirectoryListing {
    fn mission(&self) -> Mission;

    /// Fatal check run once before a scan that needs the archive
    fn probe(&self) -> ArdResult<()>;

    /// Asset links under the day directory. `Ok(None)` when the day has no directory.
    fn list_day(&self, date: NaiveDate) -> ArdResult<Option<Vec<String>>>;
}

/// CEDA ARD archive over HTTP, or a local mirror of it
pub struct CedaArchive {
    mission: Mission,
    base: String,
    client: HttpClient,
}

impl CedaArchive {
    pub fn new(mission: Mission, base: impl Into<String>, client: HttpClient) -> Self {
        Self {
            mission,
            base: base.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `{base}/{YYYY}/{MM}/{DD}`
    pub fn day_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}",
            self.base,
            date.year(),
            date.month(),
            date.day()
        )
    }

    fn list_local_day(&self, dir: &Path) -> ArdResult<Option<Vec<String>>> {
        if !dir.is_dir() {
            return Ok(None);
        }
        let suffix = self.mission.asset_suffix();
        let mut links = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_asset = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(suffix))
                .unwrap_or(false);
            if is_asset {
                links.push(path.to_string_lossy().into_owned());
            }
        }
        links.sort();
        Ok(Some(links))
    }
}

impl DirectoryListing for CedaArchive {
    fn mission(&self) -> Mission {
        self.mission
    }

    fn probe(&self) -> ArdResult<()> {
        log::info!("Checking archive connectivity: {}", self.base);
        self.client.probe(&self.base)
    }

    fn list_day(&self, date: NaiveDate) -> ArdResult<Option<Vec<String>>> {
        let dir_url = self.day_url(date);
        if !is_remote(&dir_url) {
            return self.list_local_day(Path::new(&dir_url));
        }

        log::debug!("Listing directory: {}", dir_url);
        match self.client.get_text(&dir_url)? {
            Some(html) => Ok(Some(extract_asset_links(&html, &dir_url, self.mission))),
            None => Ok(None),
        }
    }
}

/// Pre-built index of asset links per day
#[derive(Debug, Clone)]
pub struct StaticIndex {
    mission: Mission,
    days: BTreeMap<NaiveDate, Vec<String>>,
}

impl StaticIndex {
    pub fn new(mission: Mission) -> Self {
        Self {
            mission,
            days: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, date: NaiveDate, link: impl Into<String>) {
        self.days.entry(date).or_default().push(link.into());
    }

    pub fn len(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl DirectoryListing for StaticIndex {
    fn mission(&self) -> Mission {
        self.mission
    }

    fn probe(&self) -> ArdResult<()> {
        Ok(())
    }

    fn list_day(&self, date: NaiveDate) -> ArdResult<Option<Vec<String>>> {
        Ok(self.days.get(&date).cloned())
    }
}

fn href_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid href regex"))
}

/// Pull the mission's asset links out of a directory listing page
///
/// Download suffixes (`?download=1`) are stripped, relative links are joined to
/// the directory URL, and duplicates are dropped while keeping page order.
pub fn extract_asset_links(html: &str, dir_url: &str, mission: Mission) -> Vec<String> {
    let suffix = mission.asset_suffix();
    let mut links: Vec<String> = Vec::new();

    for capture in href_regex().captures_iter(html) {
        let raw = capture[1].replace("&amp;", "&");
        let href = raw.split('?').next().unwrap_or(&raw);
        if !href.ends_with(suffix) {
            continue;
        }
        let link = if is_remote(href) {
            href.to_string()
        } else if let Some(path) = href.strip_prefix('/') {
            match host_of(dir_url) {
                Some(host) => format!("{}/{}", host, path),
                None => href.to_string(),
            }
        } else {
            format!("{}/{}", dir_url.trim_end_matches('/'), href)
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

/// `scheme://host` of a URL
fn host_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let host_end = url[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(url.len());
    Some(&url[..host_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
<table>
<tr><td><a href="https://dap.ceda.ac.uk/neodc/sentinel_ard/data/sentinel_2/2023/06/01/S2A_20230601_lat52lon038_T30UXD_ORB037_utm30n_osgb_vmsk_sharp_rad_srefdem_stdsref.tif?download=1">tif</a></td>
<td><a href="https://dap.ceda.ac.uk/neodc/sentinel_ard/data/sentinel_2/2023/06/01/S2A_20230601_lat52lon038_T30UXD_ORB037_utm30n_osgb_vmsk_sharp_rad_srefdem_stdsref_meta.xml?download=1">xml</a></td></tr>
<tr><td><a href="S2A_20230601_lat53lon012_T30UWE_ORB037_utm30n_osgb_vmsk_sharp_rad_srefdem_stdsref.tif?download=1">tif</a>
<a href="/neodc/other/S2A_x_clouds.tif">mask</a></td></tr>
</table>"#;

    #[test]
    fn test_extract_asset_links() {
        let dir = "https://data.ceda.ac.uk/neodc/sentinel_ard/data/sentinel_2/2023/06/01";
        let links = extract_asset_links(LISTING, dir, Mission::Sentinel2);
        assert_eq!(links.len(), 2);
        assert!(links[0].starts_with("https://dap.ceda.ac.uk/"));
        assert!(links[0].ends_with("stdsref.tif"));
        assert_eq!(
            links[1],
            format!(
                "{}/S2A_20230601_lat53lon012_T30UWE_ORB037_utm30n_osgb_vmsk_sharp_rad_srefdem_stdsref.tif",
                dir
            )
        );
    }

    #[test]
    fn test_extract_ignores_other_mission() {
        let links = extract_asset_links(LISTING, "https://x/y", Mission::Sentinel1);
        assert!(links.is_empty());
    }

    #[test]
    fn test_day_url() {
        let client = HttpClient::new(&crate::config::ArchiveConfig::default()).unwrap();
        let archive = CedaArchive::new(Mission::Sentinel1, "https://host/base/", client);
        let date = NaiveDate::from_ymd_opt(2018, 6, 1).unwrap();
        assert_eq!(archive.day_url(date), "https://host/base/2018/06/01");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://data.ceda.ac.uk/neodc/x"), Some("https://data.ceda.ac.uk"));
        assert_eq!(host_of("no-scheme"), None);
    }
}
