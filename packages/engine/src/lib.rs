#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Expansion run orchestration.
//!
//! Wires the pipeline stages together behind narrow data-source traits:
//! fetch, anchor deduplication, feature extraction, scoring, drive-time
//! suppression, fairness allocation, and guardrails, in that order.
//! The orchestrator owns no algorithm of its own — each stage lives in
//! its own crate and is composed here as a pure function of the
//! previous stage's output.
//!
//! A blocked run is still a complete run: guardrail failures change the
//! verdict, never the candidate set, so operators can inspect what
//! would have been published.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use site_scout_config::{ConfigError, EngineConfig};
use site_scout_features::FeatureExtractor;
use site_scout_models::{
    AnchorPoi, ExistingOutlet, ExpansionRun, PerformanceRecord, RunSummary, Settlement,
};
use thiserror::Error;

/// Errors raised by a data source while fetching region inputs.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested region is not covered by this source.
    #[error("unknown region '{requested}' (source covers '{available}')")]
    UnknownRegion {
        /// Region the orchestrator asked for.
        requested: String,
        /// Region the source actually holds.
        available: String,
    },

    /// A fixture file could not be read.
    #[error("failed to read fixture: {0}")]
    Io(#[from] std::io::Error),

    /// A fixture file could not be parsed.
    #[error("failed to parse fixture: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that abort an expansion run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation. Nothing is processed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A data source failed to produce region inputs.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Supplies the settlements (candidate sites) of a region.
pub trait PlaceDataSource {
    /// Fetches every settlement in the region.
    ///
    /// # Errors
    ///
    /// Returns an error when the region is unknown or the backing store
    /// fails.
    fn settlements(&self, region: &str) -> Result<Vec<Settlement>, SourceError>;
}

/// Supplies the raw (pre-deduplication) anchor POIs of a region.
pub trait PoiDataSource {
    /// Fetches every anchor POI in the region.
    ///
    /// # Errors
    ///
    /// Returns an error when the region is unknown or the backing store
    /// fails.
    fn anchor_pois(&self, region: &str) -> Result<Vec<AnchorPoi>, SourceError>;
}

/// Supplies the existing outlet network and its performance history.
pub trait OutletStore {
    /// Fetches every open or planned outlet in the region.
    ///
    /// # Errors
    ///
    /// Returns an error when the region is unknown or the backing store
    /// fails.
    fn outlets(&self, region: &str) -> Result<Vec<ExistingOutlet>, SourceError>;

    /// Fetches the turnover history for the region's outlets.
    ///
    /// # Errors
    ///
    /// Returns an error when the region is unknown or the backing store
    /// fails.
    fn performance(&self, region: &str) -> Result<Vec<PerformanceRecord>, SourceError>;
}

/// A complete region snapshot loaded into memory, deserializable from a
/// JSON fixture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionFixture {
    /// Region this fixture covers.
    pub region: String,
    /// Candidate settlements.
    #[serde(default)]
    pub settlements: Vec<Settlement>,
    /// Raw anchor POIs, pre-deduplication.
    #[serde(default)]
    pub anchor_pois: Vec<AnchorPoi>,
    /// Existing outlet network.
    #[serde(default)]
    pub outlets: Vec<ExistingOutlet>,
    /// Outlet turnover history.
    #[serde(default)]
    pub performance: Vec<PerformanceRecord>,
}

/// In-memory data source backed by a [`RegionFixture`].
///
/// Implements all three source traits over a single snapshot, for tests
/// and for file-driven runs.
#[derive(Debug, Clone)]
pub struct FixtureDataSource {
    fixture: RegionFixture,
}

impl FixtureDataSource {
    /// Wraps an already-loaded fixture.
    #[must_use]
    pub const fn new(fixture: RegionFixture) -> Self {
        Self { fixture }
    }

    /// Loads a fixture from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let contents = std::fs::read_to_string(path)?;
        let fixture: RegionFixture = serde_json::from_str(&contents)?;
        Ok(Self::new(fixture))
    }

    /// Region this source covers.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.fixture.region
    }

    fn check_region(&self, requested: &str) -> Result<(), SourceError> {
        if requested == self.fixture.region {
            Ok(())
        } else {
            Err(SourceError::UnknownRegion {
                requested: requested.to_string(),
                available: self.fixture.region.clone(),
            })
        }
    }
}

impl PlaceDataSource for FixtureDataSource {
    fn settlements(&self, region: &str) -> Result<Vec<Settlement>, SourceError> {
        self.check_region(region)?;
        Ok(self.fixture.settlements.clone())
    }
}

impl PoiDataSource for FixtureDataSource {
    fn anchor_pois(&self, region: &str) -> Result<Vec<AnchorPoi>, SourceError> {
        self.check_region(region)?;
        Ok(self.fixture.anchor_pois.clone())
    }
}

impl OutletStore for FixtureDataSource {
    fn outlets(&self, region: &str) -> Result<Vec<ExistingOutlet>, SourceError> {
        self.check_region(region)?;
        Ok(self.fixture.outlets.clone())
    }

    fn performance(&self, region: &str) -> Result<Vec<PerformanceRecord>, SourceError> {
        self.check_region(region)?;
        Ok(self.fixture.performance.clone())
    }
}

/// Composes the pipeline stages over a set of data sources.
pub struct ExpansionOrchestrator<'a> {
    config: &'a EngineConfig,
    places: &'a dyn PlaceDataSource,
    pois: &'a dyn PoiDataSource,
    outlets: &'a dyn OutletStore,
}

impl<'a> ExpansionOrchestrator<'a> {
    /// Builds an orchestrator over the given config and sources.
    #[must_use]
    pub const fn new(
        config: &'a EngineConfig,
        places: &'a dyn PlaceDataSource,
        pois: &'a dyn PoiDataSource,
        outlets: &'a dyn OutletStore,
    ) -> Self {
        Self {
            config,
            places,
            pois,
            outlets,
        }
    }

    /// Runs the full pipeline for a region.
    ///
    /// `run_date` anchors the performance-recency window, so identical
    /// inputs with the same date always produce the same run.
    ///
    /// # Errors
    ///
    /// Returns an error when the config fails validation or a data
    /// source fails; nothing downstream of the failing stage executes.
    pub fn run(&self, region: &str, run_date: NaiveDate) -> Result<ExpansionRun, EngineError> {
        self.config.validate()?;

        log::info!("Starting expansion run for region '{region}'");
        let settlements = self.places.settlements(region)?;
        let raw_pois = self.pois.anchor_pois(region)?;
        let outlets = self.outlets.outlets(region)?;
        let performance = self.outlets.performance(region)?;
        log::info!(
            "Fetched {} settlements, {} POIs, {} outlets, {} performance records",
            settlements.len(),
            raw_pois.len(),
            outlets.len(),
            performance.len()
        );

        let dedup = site_scout_dedup::deduplicate(&raw_pois, &self.config.merge_radii);

        let extractor = FeatureExtractor::new(
            self.config,
            &outlets,
            &dedup.pois,
            &dedup.merges,
            &performance,
            run_date,
        );
        let extraction = extractor.extract_all(&settlements);
        #[allow(clippy::cast_possible_truncation)]
        let evaluated = extraction.candidates.len() as u32;

        let mut candidates = extraction.candidates;
        site_scout_scoring::score_batch(&mut candidates, self.config);

        let nms = site_scout_nms::suppress(candidates, self.config);

        let sub_region_population = sub_region_populations(&settlements);
        let allocation =
            site_scout_allocate::allocate(nms.survivors, &sub_region_population, self.config);

        let guardrails = site_scout_guardrails::evaluate(
            &allocation.allocated,
            evaluated,
            &self.config.guardrails,
        );

        let sensitivity = self
            .config
            .sensitivity_analysis
            .then(|| site_scout_scoring::sensitivity_report(&allocation.allocated, self.config));

        #[allow(clippy::cast_possible_truncation)]
        let summary = RunSummary {
            settlements_fetched: settlements.len() as u32,
            dropped_input_defects: extraction.dropped,
            evaluated,
            suppressed_by_nms: nms.suppressed,
            allocated: allocation.allocated.len() as u32,
            pois_merged: dedup.merges.len() as u32,
        };

        log::info!(
            "Run for '{region}' complete: {} allocated, verdict {}",
            summary.allocated,
            guardrails.verdict
        );

        Ok(ExpansionRun {
            region: region.to_string(),
            candidates: allocation.allocated,
            ledger: allocation.ledger,
            guardrails: guardrails.results,
            verdict: guardrails.verdict,
            summary,
            sensitivity,
        })
    }
}

/// Sums reported settlement populations per sub-region for the base
/// quota shares. Settlements without a figure contribute nothing.
fn sub_region_populations(settlements: &[Settlement]) -> BTreeMap<String, u64> {
    let mut populations: BTreeMap<String, u64> = BTreeMap::new();
    for settlement in settlements {
        *populations
            .entry(settlement.sub_region.clone())
            .or_default() += settlement.population.unwrap_or(0);
    }
    populations
}
