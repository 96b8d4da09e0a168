//! AOI → asset link table
//!
//! Links are kept as a table separate from the AOI layer, grouped by AOI in
//! layer order. AOI attributes are joined back only when the augmented layer
//! is exported.

use crate::types::{ArdError, ArdResult, DateRange, LinkRecord, Mission};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiLinks {
    pub aoi_id: String,
    pub links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTable {
    pub mission: Mission,
    pub layer: String,
    pub range: DateRange,
    entries: Vec<AoiLinks>,
}

impl LinkTable {
    pub fn new(mission: Mission, layer: impl Into<String>, range: DateRange) -> Self {
        Self {
            mission,
            layer: layer.into(),
            range,
            entries: Vec::new(),
        }
    }

    /// Register an AOI; repeated ids keep their first position
    pub fn add_aoi(&mut self, aoi_id: &str) {
        if !self.entries.iter().any(|e| e.aoi_id == aoi_id) {
            self.entries.push(AoiLinks {
                aoi_id: aoi_id.to_string(),
                links: Vec::new(),
            });
        }
    }

    pub fn push(&mut self, link: LinkRecord) {
        self.add_aoi(&link.aoi_id);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.aoi_id == link.aoi_id) {
            entry.links.push(link);
        }
    }

    pub fn links_for(&self, aoi_id: &str) -> &[LinkRecord] {
        self.entries
            .iter()
            .find(|e| e.aoi_id == aoi_id)
            .map(|e| e.links.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_links(&mut self, aoi_id: &str, links: Vec<LinkRecord>) {
        self.add_aoi(aoi_id);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.aoi_id == aoi_id) {
            entry.links = links;
        }
    }

    pub fn entries(&self) -> &[AoiLinks] {
        &self.entries
    }

    pub fn aoi_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.aoi_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkRecord> {
        self.entries.iter().flat_map(|e| e.links.iter())
    }

    /// Total number of link records
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.links.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// AOIs that ended up without any link
    pub fn unmatched(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.links.is_empty())
            .map(|e| e.aoi_id.as_str())
            .collect()
    }

    /// Keep links passing `keep`; returns how many were dropped
    pub fn retain<F: FnMut(&LinkRecord) -> bool>(&mut self, mut keep: F) -> usize {
        let mut dropped = 0;
        for entry in &mut self.entries {
            let before = entry.links.len();
            entry.links.retain(|l| keep(l));
            dropped += before - entry.links.len();
        }
        dropped
    }

    /// Order every AOI's links by acquisition time, then asset id
    pub fn sort(&mut self) {
        for entry in &mut self.entries {
            entry
                .links
                .sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.asset_id.cmp(&b.asset_id)));
        }
    }

    /// `{s1|s2}_links_{layer}_{start}_{end}.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}_links_{}_{}.json",
            self.mission.short_name(),
            self.layer,
            self.range.key()
        )
    }

    /// Persist the mapping so extraction can resume without discovery
    pub fn save_json<P: AsRef<Path>>(&self, dir: P) -> ArdResult<PathBuf> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(self.file_name());
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        log::info!("Saved {} links for {} AOIs to {}", self.len(), self.entries.len(), path.display());
        Ok(path)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let table: LinkTable = serde_json::from_str(&content)?;
        if table.iter().any(|l| l.mission != table.mission) {
            return Err(ArdError::Config(format!(
                "{} mixes missions",
                path.display()
            )));
        }
        log::info!("Loaded {} links from {}", table.len(), path.display());
        Ok(table)
    }
}
