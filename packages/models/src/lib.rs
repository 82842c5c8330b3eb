#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core domain types for the site-scout expansion engine.
//!
//! Defines the immutable input records (settlements, anchor POIs, existing
//! outlets, performance history), the derived [`Candidate`] entity that
//! flows through the pipeline, and the audit/output types (merge reports,
//! fairness ledger, guardrail results). All externally visible types
//! serialize as camelCase JSON.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Returns `true` if both components are finite and within valid
    /// WGS84 ranges.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Settlement classification from the place gazetteer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementKind {
    /// Major settlement.
    City,
    /// Mid-sized settlement.
    Town,
    /// Small settlement.
    Village,
}

impl SettlementKind {
    /// Baseline population estimate used when the gazetteer reports no
    /// population figure for a settlement of this kind.
    #[must_use]
    pub const fn baseline_population(self) -> u64 {
        match self {
            Self::City => 50_000,
            Self::Town => 5_000,
            Self::Village => 500,
        }
    }
}

/// A raw settlement record from the place gazetteer.
///
/// Immutable input; sourced once per generation run. Absent population
/// means "unknown", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    /// Stable gazetteer identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Settlement classification.
    pub kind: SettlementKind,
    /// Reported population, if the gazetteer has one.
    pub population: Option<u64>,
    /// Median household income, if known. Used only as completeness
    /// evidence, never as a scoring input.
    pub median_income: Option<f64>,
    /// Sub-region (state/province) the settlement belongs to.
    pub sub_region: String,
    /// Settlement centroid.
    pub coordinates: Coordinates,
}

/// Category of an anchor point of interest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PoiCategory {
    /// Shopping mall or commercial complex.
    Mall,
    /// Rail or bus station.
    Station,
    /// Grocery store or supermarket.
    Grocer,
    /// Standalone retail outlet.
    Retail,
    /// Anything else. Does not participate in merge radii.
    Other,
}

impl PoiCategory {
    /// Maps a free-form source category label onto the known set.
    ///
    /// Labels outside the known set become [`Self::Other`] rather than
    /// failing the record.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        label
            .trim()
            .to_ascii_uppercase()
            .parse()
            .unwrap_or(Self::Other)
    }

    /// Merge survivorship priority: higher wins when two overlapping POIs
    /// are collapsed into one.
    #[must_use]
    pub const fn merge_priority(self) -> u8 {
        match self {
            Self::Mall => 4,
            Self::Station => 3,
            Self::Grocer => 2,
            Self::Retail => 1,
            Self::Other => 0,
        }
    }
}

/// A raw anchor point-of-interest record. Immutable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPoi {
    /// Stable catalogue identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Category (unknown source labels map to `OTHER`).
    pub category: PoiCategory,
    /// POI location.
    pub coordinates: Coordinates,
}

/// Lifecycle status of an existing outlet.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutletStatus {
    /// Trading today.
    Open,
    /// Committed but not yet open. Treated identically to open outlets
    /// for distance and gap computation.
    Planned,
}

/// An existing (or committed) outlet. Immutable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingOutlet {
    /// Stable store identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Open or planned.
    pub status: OutletStatus,
    /// Outlet location.
    pub coordinates: Coordinates,
    /// Annual turnover, if reported.
    pub turnover: Option<f64>,
}

/// A dated turnover observation for an existing outlet.
///
/// Used for the nearby-performance proxy, the allocator's sub-region
/// performance ranking, and data-recency completeness evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    /// Outlet the observation belongs to.
    pub outlet_id: String,
    /// Reporting period end date.
    pub period: NaiveDate,
    /// Observed turnover for the period.
    pub turnover: f64,
}

/// Counts of existing outlets within three concentric radii of a
/// candidate (5 / 10 / 15 km). The outer two are annulus counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationCounts {
    /// Outlets within 5 km.
    pub within_5_km: u32,
    /// Outlets between 5 and 10 km.
    pub within_10_km: u32,
    /// Outlets between 10 and 15 km.
    pub within_15_km: u32,
}

impl SaturationCounts {
    /// Distance-weighted saturation: closer outlets count more
    /// (3x / 2x / 1x for the inner / middle / outer band).
    #[must_use]
    pub const fn weighted(self) -> u32 {
        3 * self.within_5_km + 2 * self.within_10_km + self.within_15_km
    }
}

/// Raw feature vector computed per candidate before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Reported or estimated population.
    pub population: f64,
    /// Whether the population was estimated rather than reported.
    pub population_estimated: bool,
    /// Mean distance to the (up to) 3 nearest existing outlets, km.
    /// Saturates at the configured gap cap when no outlets exist.
    pub gap_distance_km: f64,
    /// Deduplicated anchor POIs within the anchor radius, after the
    /// per-locality cap.
    pub anchor_count: u32,
    /// Whether the anchor count hit the per-locality cap.
    pub anchors_capped: bool,
    /// Average turnover of outlets within the performance radius, or
    /// `None` when no outlet with turnover data is in range.
    pub performance_proxy: Option<f64>,
    /// Number of turnover observations behind `performance_proxy`.
    pub performance_sample: u32,
    /// Whether any performance observation is recent enough to count as
    /// fresh evidence.
    pub performance_recent: bool,
    /// Concentric outlet counts used as the negative saturation term.
    pub saturation: SaturationCounts,
    /// Whether the settlement carries a median-income figure.
    pub has_income_proxy: bool,
}

/// One merged POI pair, recorded for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRecord {
    /// POI that survived the merge.
    pub survivor_id: String,
    /// POI that was removed.
    pub merged_id: String,
    /// Category of the survivor.
    pub survivor_category: PoiCategory,
    /// Category of the removed POI.
    pub merged_category: PoiCategory,
    /// Merge radius applied to this category pairing, meters.
    pub radius_m: f64,
    /// Actual distance between the pair, meters.
    pub distance_m: f64,
}

/// Audit record of POI merges and cap exclusions relevant to a candidate.
///
/// Attached to the candidate for transparency; never affects
/// re-computation once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Merges whose survivor lies within the candidate's anchor radius.
    pub merges: Vec<MergeRecord>,
    /// POIs excluded from anchor scoring by the per-locality cap. Not
    /// merged — retained here so dense cores stay auditable.
    pub capped_poi_ids: Vec<String>,
}

impl MergeReport {
    /// Number of POIs merged away near this candidate.
    #[must_use]
    pub fn merged_count(&self) -> usize {
        self.merges.len()
    }
}

/// Recommendation state of a candidate after scoring.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    /// Eligible for allocation.
    Recommend,
    /// Force-downgraded: completeness fell below the minimum-evidence
    /// threshold. Never allocated regardless of composite score.
    Downgraded,
}

/// A proposed new-outlet site derived from a settlement.
///
/// Created by the feature extractor, scored by the scoring engine,
/// flagged by NMS, selected by the allocator. Never mutated after
/// allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Source settlement identifier (exactly one per candidate).
    pub settlement_id: String,
    /// Settlement display name.
    pub name: String,
    /// Sub-region used for fairness allocation.
    pub sub_region: String,
    /// Candidate site location (settlement centroid).
    pub coordinates: Coordinates,
    /// Raw feature vector.
    pub features: FeatureVector,
    /// POI merge audit trail near this candidate.
    pub merge_report: MergeReport,
    /// Evidence completeness in `[0, 1]`.
    pub completeness: f64,
    /// Composite business-value score in `[0, 1]`.
    pub composite_score: f64,
    /// Weight mass removed for uncertain features and not redistributed.
    /// Recorded for transparency, not used in the score.
    pub uncertainty_weight: f64,
    /// Recommendation state after the minimum-evidence rule.
    pub recommendation: Recommendation,
    /// Whether the candidate survived drive-time suppression.
    pub survived_nms: bool,
}

/// Per-sub-region audit record of quota allocation. Write-once, one per
/// sub-region per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessLedgerEntry {
    /// Sub-region this entry describes.
    pub sub_region: String,
    /// Population-share (or equal-split) base quota.
    pub base_quota: u32,
    /// Extra slots from the performance bonus.
    pub performance_bonus: u32,
    /// Manual override quota, if configured. Wins unconditionally.
    pub manual_override: Option<u32>,
    /// Final quota after override and trimming.
    pub allocated_quota: u32,
    /// Surviving candidates available in the sub-region.
    pub available: u32,
    /// Candidates actually selected (min of quota and availability).
    pub allocated: u32,
    /// Mean composite score of available candidates.
    pub avg_score: f64,
    /// Mean performance proxy across available candidates, where defined.
    pub avg_performance: f64,
}

/// Identifier for a guardrail rule.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardrailRule {
    /// Allocated / evaluated ratio must meet a minimum.
    AcceptanceRate,
    /// Mean completeness of allocated candidates must meet a minimum.
    AvgCompleteness,
    /// No sub-region may exceed a maximum share of the allocation.
    SubRegionShare,
    /// Known-major settlements must appear unless explicitly suppressed.
    SanitySet,
}

/// Outcome of a single guardrail check. Attached to the run, not to
/// individual candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailResult {
    /// Which rule this result is for.
    pub rule: GuardrailRule,
    /// Whether the rule passed.
    pub passed: bool,
    /// Observed value.
    pub observed: f64,
    /// Configured threshold the observation was compared against.
    pub threshold: f64,
    /// Extra diagnostics (e.g. which sanity settlement is missing).
    pub detail: Option<String>,
}

/// Publication verdict for a run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunVerdict {
    /// All guardrails passed.
    Publishable,
    /// At least one guardrail failed. The result is still returned for
    /// diagnostics but must not be published.
    Blocked,
}

/// Per-stage record counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Settlements fetched from the gazetteer.
    pub settlements_fetched: u32,
    /// Candidates dropped for input defects (malformed coordinates).
    pub dropped_input_defects: u32,
    /// Candidates evaluated (scored).
    pub evaluated: u32,
    /// Candidates removed by drive-time suppression.
    pub suppressed_by_nms: u32,
    /// Candidates in the final allocation.
    pub allocated: u32,
    /// POIs merged away during anchor deduplication.
    pub pois_merged: u32,
}

/// Sensitivity of a candidate's composite score to a ±10% perturbation
/// of one feature weight. Optional diagnostic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityEntry {
    /// Candidate's source settlement.
    pub settlement_id: String,
    /// Which weight was perturbed (population/gap/anchor/performance/
    /// saturation).
    pub weight: String,
    /// Score delta when the weight is increased by 10%.
    pub delta_up: f64,
    /// Score delta when the weight is decreased by 10%.
    pub delta_down: f64,
}

/// Complete output of one expansion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionRun {
    /// Region the run was generated for.
    pub region: String,
    /// Final allocated candidates, ranked by composite score within each
    /// sub-region.
    pub candidates: Vec<Candidate>,
    /// One ledger entry per sub-region.
    pub ledger: Vec<FairnessLedgerEntry>,
    /// Guardrail outcomes.
    pub guardrails: Vec<GuardrailResult>,
    /// Publishable or blocked.
    pub verdict: RunVerdict,
    /// Per-stage record counts.
    pub summary: RunSummary,
    /// Optional ±10% weight sensitivity report for allocated candidates.
    pub sensitivity: Option<Vec<SensitivityEntry>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_coordinates() {
        assert!(Coordinates { lat: 52.52, lng: 13.405 }.is_valid());
        assert!(!Coordinates { lat: f64::NAN, lng: 13.405 }.is_valid());
        assert!(!Coordinates { lat: 91.0, lng: 0.0 }.is_valid());
        assert!(!Coordinates { lat: 0.0, lng: 181.0 }.is_valid());
    }

    #[test]
    fn unknown_category_labels_become_other() {
        assert_eq!(PoiCategory::from_label("mall"), PoiCategory::Mall);
        assert_eq!(PoiCategory::from_label(" STATION "), PoiCategory::Station);
        assert_eq!(PoiCategory::from_label("pharmacy"), PoiCategory::Other);
        assert_eq!(PoiCategory::from_label(""), PoiCategory::Other);
    }

    #[test]
    fn merge_priority_orders_mall_above_retail() {
        assert!(PoiCategory::Mall.merge_priority() > PoiCategory::Station.merge_priority());
        assert!(PoiCategory::Station.merge_priority() > PoiCategory::Grocer.merge_priority());
        assert!(PoiCategory::Grocer.merge_priority() > PoiCategory::Retail.merge_priority());
        assert!(PoiCategory::Retail.merge_priority() > PoiCategory::Other.merge_priority());
    }

    #[test]
    fn saturation_weights_inner_band_highest() {
        let s = SaturationCounts {
            within_5_km: 2,
            within_10_km: 1,
            within_15_km: 3,
        };
        assert_eq!(s.weighted(), 3 * 2 + 2 + 3);
    }
}
