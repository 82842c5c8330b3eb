#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-candidate feature extraction.
//!
//! For each settlement this computes the five raw features (population
//! proxy, nearest-outlet gap, deduplicated anchor count, nearby
//! performance proxy, saturation counts) against shared read-only
//! reference data, and assembles the candidate's POI merge report.
//!
//! Extraction is a pure function of its inputs and the only naturally
//! parallel stage of the pipeline: candidates are fanned out across a
//! rayon pool and collected in input order before scoring begins. A
//! settlement with malformed coordinates is dropped with a logged
//! reason, never silently scored.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use site_scout_config::EngineConfig;
use site_scout_models::{
    AnchorPoi, Candidate, Coordinates, ExistingOutlet, FeatureVector, MergeRecord, MergeReport,
    PerformanceRecord, Recommendation, SaturationCounts, Settlement,
};
use site_scout_spatial::{PointIndex, haversine_km};
use thiserror::Error;

/// Errors that drop a single settlement from the run.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The settlement's coordinates are NaN or out of WGS84 range.
    #[error("settlement '{settlement_id}' has malformed coordinates ({lat}, {lng})")]
    InvalidCoordinates {
        /// Offending settlement.
        settlement_id: String,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
    },
}

/// Result of extracting features for a settlement batch.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// One candidate per valid settlement, in input order.
    pub candidates: Vec<Candidate>,
    /// Settlements dropped for input defects.
    pub dropped: u32,
}

/// Shared read-only reference data plus the extraction logic.
///
/// Built once per run; safe to query from the rayon pool because every
/// index is immutable for the duration of the batch.
pub struct FeatureExtractor<'a> {
    config: &'a EngineConfig,
    outlet_index: PointIndex<&'a ExistingOutlet>,
    poi_index: PointIndex<&'a AnchorPoi>,
    merges: &'a [MergeRecord],
    /// Survivor POI id -> location, for attributing merges to candidates.
    survivor_coords: BTreeMap<&'a str, Coordinates>,
    /// Outlet id -> that outlet's turnover observations.
    records_by_outlet: BTreeMap<&'a str, Vec<&'a PerformanceRecord>>,
    run_date: NaiveDate,
}

impl<'a> FeatureExtractor<'a> {
    /// Builds the extractor's spatial indexes and lookup tables.
    #[must_use]
    pub fn new(
        config: &'a EngineConfig,
        outlets: &'a [ExistingOutlet],
        deduped_pois: &'a [AnchorPoi],
        merges: &'a [MergeRecord],
        performance: &'a [PerformanceRecord],
        run_date: NaiveDate,
    ) -> Self {
        let outlet_index =
            PointIndex::build(outlets.iter().map(|outlet| (outlet.coordinates, outlet)));
        let poi_index = PointIndex::build(deduped_pois.iter().map(|poi| (poi.coordinates, poi)));

        let survivor_coords = deduped_pois
            .iter()
            .map(|poi| (poi.id.as_str(), poi.coordinates))
            .collect();

        let mut records_by_outlet: BTreeMap<&str, Vec<&PerformanceRecord>> = BTreeMap::new();
        for record in performance {
            records_by_outlet
                .entry(record.outlet_id.as_str())
                .or_default()
                .push(record);
        }

        Self {
            config,
            outlet_index,
            poi_index,
            merges,
            survivor_coords,
            records_by_outlet,
            run_date,
        }
    }

    /// Extracts features for a settlement batch in parallel.
    ///
    /// Candidates come back in input order; settlements with malformed
    /// coordinates are dropped with a logged reason and tallied.
    #[must_use]
    pub fn extract_all(&self, settlements: &[Settlement]) -> ExtractionOutcome {
        let results: Vec<Result<Candidate, FeatureError>> = settlements
            .par_iter()
            .map(|settlement| self.extract(settlement))
            .collect();

        let mut candidates = Vec::with_capacity(results.len());
        let mut dropped: u32 = 0;
        for result in results {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    log::warn!("Dropping candidate: {e}");
                    dropped += 1;
                }
            }
        }

        log::info!(
            "Extracted features for {} candidates ({dropped} dropped)",
            candidates.len()
        );

        ExtractionOutcome { candidates, dropped }
    }

    /// Extracts the feature vector for a single settlement.
    ///
    /// # Errors
    ///
    /// Returns an error only for malformed coordinates; every other gap
    /// in the evidence is flagged in the vector instead of failing.
    pub fn extract(&self, settlement: &Settlement) -> Result<Candidate, FeatureError> {
        let site = settlement.coordinates;
        if !site.is_valid() {
            return Err(FeatureError::InvalidCoordinates {
                settlement_id: settlement.id.clone(),
                lat: site.lat,
                lng: site.lng,
            });
        }

        let anchors = self
            .poi_index
            .within_km(site, self.config.anchor_radius_km);
        let anchor_total = anchors.len();
        let cap = self.config.anchor_cap as usize;
        let anchors_capped = anchor_total > cap;
        let capped_poi_ids: Vec<String> = anchors
            .iter()
            .skip(cap)
            .map(|(_, poi)| poi.id.clone())
            .collect();

        let (population, population_estimated) = settlement.population.map_or_else(
            || (self.estimate_population(settlement, anchor_total), true),
            |p| {
                #[allow(clippy::cast_precision_loss)]
                (p as f64, false)
            },
        );

        let gap_distance_km = self.gap_distance(site);
        let (performance_proxy, performance_sample, performance_recent) = self.performance(site);
        let saturation = self.saturation(site);
        let merge_report = self.merge_report(site, capped_poi_ids);

        #[allow(clippy::cast_possible_truncation)]
        let anchor_count = anchor_total.min(cap) as u32;

        Ok(Candidate {
            settlement_id: settlement.id.clone(),
            name: settlement.name.clone(),
            sub_region: settlement.sub_region.clone(),
            coordinates: site,
            features: FeatureVector {
                population,
                population_estimated,
                gap_distance_km,
                anchor_count,
                anchors_capped,
                performance_proxy,
                performance_sample,
                performance_recent,
                saturation,
                has_income_proxy: settlement.median_income.is_some(),
            },
            merge_report,
            completeness: 0.0,
            composite_score: 0.0,
            uncertainty_weight: 0.0,
            recommendation: Recommendation::Recommend,
            survived_nms: false,
        })
    }

    /// Density-derived population estimate for settlements the gazetteer
    /// has no figure for: a kind baseline scaled by local anchor density,
    /// capped at 3x.
    fn estimate_population(&self, settlement: &Settlement, anchor_total: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let density_multiplier = (1.0 + anchor_total as f64 / 10.0).min(3.0);
        #[allow(clippy::cast_precision_loss)]
        let baseline = settlement.kind.baseline_population() as f64;
        baseline * density_multiplier
    }

    /// Mean distance to the (up to) 3 nearest outlets of any status.
    ///
    /// With no outlets in the region the gap saturates at the configured
    /// cap: every site is maximally underserved.
    fn gap_distance(&self, site: Coordinates) -> f64 {
        let nearest = self.outlet_index.nearest_km(site, 3);
        if nearest.is_empty() {
            return self.config.gap_cap_km;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = nearest.iter().map(|(d, _)| d).sum::<f64>() / nearest.len() as f64;
        mean.min(self.config.gap_cap_km)
    }

    /// Average turnover of outlets within the performance radius.
    ///
    /// Returns `(proxy, sample size, recency)`. The proxy is undefined
    /// when no in-range outlet reports turnover; recency is whether any
    /// in-range outlet has an observation within the last 12 months.
    fn performance(&self, site: Coordinates) -> (Option<f64>, u32, bool) {
        let in_range = self
            .outlet_index
            .within_km(site, self.config.performance_radius_km);

        let turnovers: Vec<f64> = in_range
            .iter()
            .filter_map(|(_, outlet)| outlet.turnover)
            .collect();

        let recent_cutoff = self.run_date - chrono::Days::new(365);
        let performance_recent = in_range.iter().any(|(_, outlet)| {
            self.records_by_outlet
                .get(outlet.id.as_str())
                .is_some_and(|records| records.iter().any(|r| r.period >= recent_cutoff))
        });

        #[allow(clippy::cast_possible_truncation)]
        let sample = turnovers.len() as u32;
        if turnovers.is_empty() {
            (None, 0, performance_recent)
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = turnovers.iter().sum::<f64>() / turnovers.len() as f64;
            (Some(mean), sample, performance_recent)
        }
    }

    /// Outlet counts in the 0-5 / 5-10 / 10-15 km bands.
    fn saturation(&self, site: Coordinates) -> SaturationCounts {
        let mut counts = SaturationCounts::default();
        for (distance_km, _) in self.outlet_index.within_km(site, 15.0) {
            if distance_km <= 5.0 {
                counts.within_5_km += 1;
            } else if distance_km <= 10.0 {
                counts.within_10_km += 1;
            } else {
                counts.within_15_km += 1;
            }
        }
        counts
    }

    /// Collects the merge records whose survivor lies within the
    /// candidate's anchor radius, plus the cap exclusions.
    fn merge_report(&self, site: Coordinates, capped_poi_ids: Vec<String>) -> MergeReport {
        let merges: Vec<MergeRecord> = self
            .merges
            .iter()
            .filter(|record| {
                self.survivor_coords
                    .get(record.survivor_id.as_str())
                    .is_some_and(|&coords| {
                        haversine_km(site, coords) <= self.config.anchor_radius_km
                    })
            })
            .cloned()
            .collect();

        MergeReport {
            merges,
            capped_poi_ids,
        }
    }
}
