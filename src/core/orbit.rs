//! Sentinel-1 orbit aggregation and median compositing
//!
//! Links of one AOI are grouped by `(pass direction, relative orbit)`. The
//! default policy keeps, per direction, the orbit with the most acquisitions;
//! ties resolve to the lowest orbit number.

use crate::config::OrbitPolicy;
use crate::core::link_table::LinkTable;
use crate::types::{ArdError, ArdResult, LinkRecord, PassDirection};
use ndarray::{Array3, Zip};
use num_traits::Float;
use std::collections::BTreeMap;

/// Links of one AOI sharing pass direction and relative orbit
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitGroup<'a> {
    pub direction: PassDirection,
    pub relative_orbit: u16,
    pub links: Vec<&'a LinkRecord>,
}

/// Group links by `(direction, orbit)` in ascending key order
///
/// Links without orbit information are left out.
pub fn group_by_orbit(links: &[LinkRecord]) -> Vec<OrbitGroup<'_>> {
    let mut groups: BTreeMap<(PassDirection, u16), Vec<&LinkRecord>> = BTreeMap::new();
    for link in links {
        if let Some(orbit) = link.orbit {
            groups
                .entry((orbit.direction, orbit.relative_orbit))
                .or_default()
                .push(link);
        }
    }
    groups
        .into_iter()
        .map(|((direction, relative_orbit), links)| OrbitGroup {
            direction,
            relative_orbit,
            links,
        })
        .collect()
}

/// Orbits to keep for each direction present in `links`
pub fn select_orbits(links: &[LinkRecord], policy: &OrbitPolicy) -> BTreeMap<PassDirection, Vec<u16>> {
    let mut selected: BTreeMap<PassDirection, Vec<u16>> = BTreeMap::new();
    for group in group_by_orbit(links) {
        let keep = match policy {
            OrbitPolicy::KeepAll => true,
            OrbitPolicy::Retain(orbits) => orbits.contains(&group.relative_orbit),
            OrbitPolicy::Dominant => true,
        };
        if keep {
            selected
                .entry(group.direction)
                .or_default()
                .push(group.relative_orbit);
        }
    }

    if *policy == OrbitPolicy::Dominant {
        let counts = orbit_counts(links);
        for (direction, orbits) in selected.iter_mut() {
            // Groups arrive in ascending orbit order, so the first maximum is the lowest orbit
            let mut best: Option<(u16, usize)> = None;
            for &orbit in orbits.iter() {
                let count = counts.get(&(*direction, orbit)).copied().unwrap_or(0);
                if best.map_or(true, |(_, c)| count > c) {
                    best = Some((orbit, count));
                }
            }
            *orbits = best.map(|(orbit, _)| vec![orbit]).unwrap_or_default();
        }
    }
    selected
}

fn orbit_counts(links: &[LinkRecord]) -> BTreeMap<(PassDirection, u16), usize> {
    let mut counts = BTreeMap::new();
    for orbit in links.iter().filter_map(|l| l.orbit) {
        *counts.entry((orbit.direction, orbit.relative_orbit)).or_insert(0) += 1;
    }
    counts
}

/// Apply the orbit policy to one AOI's links; returns the survivors
pub fn apply_policy(links: &[LinkRecord], policy: &OrbitPolicy) -> Vec<LinkRecord> {
    if *policy == OrbitPolicy::KeepAll {
        return links.to_vec();
    }
    let selected = select_orbits(links, policy);
    links
        .iter()
        .filter(|link| match link.orbit {
            Some(orbit) => selected
                .get(&orbit.direction)
                .map_or(false, |orbits| orbits.contains(&orbit.relative_orbit)),
            None => false,
        })
        .cloned()
        .collect()
}

/// Apply the policy AOI by AOI; returns the number of links dropped
pub fn apply_policy_to_table(table: &mut LinkTable, policy: &OrbitPolicy) -> usize {
    if *policy == OrbitPolicy::KeepAll {
        return 0;
    }
    let ids: Vec<String> = table.aoi_ids().map(str::to_string).collect();
    let mut dropped = 0;
    for id in ids {
        let links = table.links_for(&id);
        let kept = apply_policy(links, policy);
        dropped += links.len() - kept.len();
        table.set_links(&id, kept);
    }
    if dropped > 0 {
        log::info!("Orbit policy {:?} dropped {} links", policy, dropped);
    }
    dropped
}

/// Element-wise median of pixel-aligned `(band, row, col)` stacks
///
/// Pixels equal to `nodata` (or NaN) are left out of each median; a pixel
/// with no valid member becomes `nodata`. Every member must share the first
/// member's shape. A single member is returned unchanged.
pub fn median_composite<T: Float>(members: &[Array3<T>], nodata: T) -> ArdResult<Array3<T>> {
    let first = members
        .first()
        .ok_or_else(|| ArdError::Output("Cannot composite an empty orbit group".to_string()))?;
    let expected = first.dim();
    for (i, member) in members.iter().enumerate() {
        if member.dim() != expected {
            return Err(ArdError::ShapeMismatch {
                asset: format!("member {}", i),
                expected,
                found: member.dim(),
            });
        }
    }
    if members.len() == 1 {
        return Ok(first.clone());
    }

    let mut out = Array3::from_elem(expected, nodata);
    let mut values: Vec<T> = Vec::with_capacity(members.len());
    Zip::indexed(&mut out).for_each(|idx, px| {
        values.clear();
        values.extend(
            members
                .iter()
                .map(|m| m[idx])
                .filter(|v| !v.is_nan() && *v != nodata),
        );
        if let Some(median) = median(&mut values) {
            *px = median;
        }
    });
    Ok(out)
}

fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    let two = T::one() + T::one();
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / two
    } else {
        values[mid]
    })
}
