#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Anchor POI deduplication.
//!
//! Overlapping POI records frequently describe a single physical
//! commercial complex (a mall listed again as its flagship retail tenant,
//! a station duplicated by the kiosk inside it). Left alone they would
//! double-count anchors for every nearby candidate. This module merges
//! such pairs under per-category-pair radii, keeping the higher-priority
//! member and recording every merge for audit.
//!
//! Merge passes run in a fixed category order and process POIs in a
//! canonical sort (priority descending, then id), so the merged set is
//! reproducible for any input ordering. Re-running the deduplicator on
//! its own output produces no further merges.

use site_scout_config::MergeRadii;
use site_scout_models::{AnchorPoi, MergeRecord, PoiCategory};
use site_scout_spatial::PointIndex;

/// Result of deduplicating a region's POI list.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Surviving POIs in canonical order (priority descending, id
    /// ascending).
    pub pois: Vec<AnchorPoi>,
    /// One record per merged pair, in pass order.
    pub merges: Vec<MergeRecord>,
}

/// One merge pass: POIs of `survivor` absorb POIs of `merged` within the
/// pass radius. The survivor category always has priority ≥ the merged
/// category; for same-category passes the earlier POI in canonical order
/// survives.
struct MergePass {
    survivor: PoiCategory,
    merged: PoiCategory,
    radius_m: f64,
}

/// The fixed, deterministic pass order.
fn merge_passes(radii: &MergeRadii) -> [MergePass; 5] {
    [
        MergePass {
            survivor: PoiCategory::Mall,
            merged: PoiCategory::Retail,
            radius_m: radii.mall_m,
        },
        MergePass {
            survivor: PoiCategory::Mall,
            merged: PoiCategory::Grocer,
            radius_m: radii.mall_m,
        },
        MergePass {
            survivor: PoiCategory::Station,
            merged: PoiCategory::Retail,
            radius_m: radii.station_retail_m,
        },
        MergePass {
            survivor: PoiCategory::Grocer,
            merged: PoiCategory::Grocer,
            radius_m: radii.grocer_grocer_m,
        },
        MergePass {
            survivor: PoiCategory::Retail,
            merged: PoiCategory::Retail,
            radius_m: radii.retail_retail_m,
        },
    ]
}

/// Deduplicates a region's anchor POI list.
///
/// POIs with invalid coordinates are excluded up front (they cannot be
/// distance-checked and would never count as anchors anyway). `OTHER`
/// POIs have no merge radius and pass through untouched.
#[must_use]
pub fn deduplicate(pois: &[AnchorPoi], radii: &MergeRadii) -> DedupOutcome {
    // Canonical ordering makes the greedy merge reproducible for any
    // input order.
    let mut sorted: Vec<AnchorPoi> = pois
        .iter()
        .filter(|poi| {
            if poi.coordinates.is_valid() {
                true
            } else {
                log::warn!("Excluding POI '{}' with invalid coordinates", poi.id);
                false
            }
        })
        .cloned()
        .collect();
    sorted.sort_by(|a, b| {
        b.category
            .merge_priority()
            .cmp(&a.category.merge_priority())
            .then_with(|| a.id.cmp(&b.id))
    });

    let index = PointIndex::build(
        sorted
            .iter()
            .enumerate()
            .map(|(i, poi)| (poi.coordinates, i)),
    );

    let mut removed = vec![false; sorted.len()];
    let mut merges = Vec::new();

    for pass in merge_passes(radii) {
        run_pass(&sorted, &index, &pass, &mut removed, &mut merges);
    }

    let pois: Vec<AnchorPoi> = sorted
        .into_iter()
        .zip(&removed)
        .filter_map(|(poi, &gone)| (!gone).then_some(poi))
        .collect();

    if !merges.is_empty() {
        log::info!(
            "Anchor dedup merged {} of {} POIs",
            merges.len(),
            pois.len() + merges.len()
        );
    }

    DedupOutcome { pois, merges }
}

/// Runs one merge pass over the canonical POI ordering.
///
/// A POI removed in an earlier pass can neither absorb nor be absorbed;
/// within a pass each POI is merged into at most one survivor.
fn run_pass(
    pois: &[AnchorPoi],
    index: &PointIndex<usize>,
    pass: &MergePass,
    removed: &mut [bool],
    merges: &mut Vec<MergeRecord>,
) {
    let radius_km = pass.radius_m / 1000.0;

    for (i, survivor) in pois.iter().enumerate() {
        if removed[i] || survivor.category != pass.survivor {
            continue;
        }

        for (distance_km, &j) in index.within_km(survivor.coordinates, radius_km) {
            if j == i || removed[j] {
                continue;
            }
            let other = &pois[j];
            if other.category != pass.merged {
                continue;
            }
            // Same-category passes: canonical order decides survivorship,
            // and earlier POIs were already given their chance to absorb.
            if pass.survivor == pass.merged && j < i {
                continue;
            }

            removed[j] = true;
            merges.push(MergeRecord {
                survivor_id: survivor.id.clone(),
                merged_id: other.id.clone(),
                survivor_category: survivor.category,
                merged_category: other.category,
                radius_m: pass.radius_m,
                distance_m: distance_km * 1000.0,
            });
        }
    }
}
