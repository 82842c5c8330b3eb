#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Composite scoring and completeness evaluation.
//!
//! Combines each candidate's raw feature vector into a single business
//! value score in `[0, 1]`: features are min-max normalized over the
//! candidate batch, the anchor term gets 1/√rank diminishing returns so
//! POI-dense cores cannot dominate, and per-candidate weights are
//! redistributed away from estimated or capped features (80% of removed
//! weight flows to the gap term, 20% is recorded as the candidate's
//! uncertainty weight).
//!
//! Scoring never fails: any missing feature degrades the candidate's
//! completeness score instead of aborting it, and a candidate whose
//! completeness falls below the minimum-evidence threshold is
//! force-downgraded regardless of its composite score.

use site_scout_config::{EngineConfig, FeatureWeights};
use site_scout_models::{Candidate, Recommendation, SensitivityEntry};

/// Completeness sub-score for directly measured evidence.
const SUB_SCORE_MEASURED: f64 = 1.0;

/// Completeness sub-score for estimated or thin evidence.
const SUB_SCORE_ESTIMATED: f64 = 0.25;

/// Raw (pre-normalization) scoring terms for one candidate.
struct RawTerms {
    population: f64,
    gap: f64,
    anchor: f64,
    performance: Option<f64>,
    saturation: f64,
}

/// Min-max range over one feature across the batch.
#[derive(Debug, Clone, Copy)]
struct MinMax {
    min: f64,
    max: f64,
}

impl MinMax {
    fn over(values: impl Iterator<Item = f64>) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            min = min.min(v);
            max = max.max(v);
        }
        Self { min, max }
    }

    /// Normalizes into `[0, 1]`. A degenerate batch (all values equal)
    /// maps to 1.0 when the shared value is positive and 0.0 otherwise,
    /// so e.g. a uniformly maximal gap still scores as maximal and a
    /// uniformly zero saturation carries no penalty.
    fn norm(self, value: f64) -> f64 {
        if !self.min.is_finite() || !self.max.is_finite() {
            return 0.0;
        }
        let range = self.max - self.min;
        if range <= f64::EPSILON {
            return if self.max > 0.0 { 1.0 } else { 0.0 };
        }
        (value - self.min) / range
    }
}

/// Scores a candidate batch in place.
///
/// Sets `composite_score`, `completeness`, `uncertainty_weight`, and
/// `recommendation` on every candidate. Normalization is relative to
/// this batch, so scores are comparable within a run, not across runs.
pub fn score_batch(candidates: &mut [Candidate], config: &EngineConfig) {
    if candidates.is_empty() {
        return;
    }

    let terms: Vec<RawTerms> = candidates
        .iter()
        .map(|c| raw_terms(c, config))
        .collect();
    let ranges = batch_ranges(&terms);

    let mut downgraded = 0_u32;
    for (candidate, raw) in candidates.iter_mut().zip(&terms) {
        let (weights, uncertainty) = effective_weights(candidate, config);
        candidate.composite_score = composite(raw, &ranges, &weights);
        candidate.uncertainty_weight = uncertainty;
        candidate.completeness = completeness(candidate, config);

        if candidate.completeness < config.min_evidence_completeness {
            candidate.recommendation = Recommendation::Downgraded;
            downgraded += 1;
            log::debug!(
                "Candidate '{}' downgraded: completeness {:.2} below {:.2}",
                candidate.settlement_id,
                candidate.completeness,
                config.min_evidence_completeness
            );
        } else {
            candidate.recommendation = Recommendation::Recommend;
        }
    }

    if downgraded > 0 {
        log::info!("{downgraded} candidates downgraded for insufficient evidence");
    }
}

/// Per-feature min-max ranges over the batch. Undefined performance
/// values are excluded from the performance range.
struct BatchRanges {
    population: MinMax,
    gap: MinMax,
    anchor: MinMax,
    performance: MinMax,
    saturation: MinMax,
}

fn batch_ranges(terms: &[RawTerms]) -> BatchRanges {
    BatchRanges {
        population: MinMax::over(terms.iter().map(|t| t.population)),
        gap: MinMax::over(terms.iter().map(|t| t.gap)),
        anchor: MinMax::over(terms.iter().map(|t| t.anchor)),
        performance: MinMax::over(terms.iter().filter_map(|t| t.performance)),
        saturation: MinMax::over(terms.iter().map(|t| t.saturation)),
    }
}

fn raw_terms(candidate: &Candidate, config: &EngineConfig) -> RawTerms {
    let f = &candidate.features;
    RawTerms {
        population: f.population,
        gap: f.gap_distance_km,
        anchor: anchor_term(f.anchor_count, config.diminishing_returns),
        performance: f.performance_proxy,
        saturation: f64::from(f.saturation.weighted()),
    }
}

/// Anchor contribution with diminishing returns: the Nth-closest anchor
/// contributes 1/√N, bounding the influence of POI-dense locations.
/// Falls back to the raw count when the toggle is off.
fn anchor_term(count: u32, diminishing: bool) -> f64 {
    if diminishing {
        (1..=count).map(|rank| 1.0 / f64::from(rank).sqrt()).sum()
    } else {
        f64::from(count)
    }
}

/// Per-candidate scoring weights after uncertainty redistribution.
///
/// Estimated population halves the population weight; a thin performance
/// sample halves the performance weight; a capped anchor count sheds 20%
/// of the anchor weight. 80% of the removed mass moves to the gap term
/// (the most reliable feature); the remaining 20% is returned as the
/// candidate's recorded uncertainty weight.
fn effective_weights(candidate: &Candidate, config: &EngineConfig) -> (FeatureWeights, f64) {
    let mut weights = config.weights;
    let f = &candidate.features;
    let mut removed = 0.0;

    if f.population_estimated {
        let cut = weights.population * 0.5;
        weights.population -= cut;
        removed += cut;
    }
    if f.performance_sample < config.min_performance_sample {
        let cut = weights.performance * 0.5;
        weights.performance -= cut;
        removed += cut;
    }
    if f.anchors_capped {
        let cut = weights.anchor * 0.2;
        weights.anchor -= cut;
        removed += cut;
    }

    weights.gap += removed * 0.8;
    (weights, removed * 0.2)
}

fn composite(raw: &RawTerms, ranges: &BatchRanges, weights: &FeatureWeights) -> f64 {
    let performance_norm = raw
        .performance
        .map_or(0.0, |p| ranges.performance.norm(p));

    let score = weights.population * ranges.population.norm(raw.population)
        + weights.gap * ranges.gap.norm(raw.gap)
        + weights.anchor * ranges.anchor.norm(raw.anchor)
        + weights.performance * performance_norm
        - weights.saturation * ranges.saturation.norm(raw.saturation);

    score.clamp(0.0, 1.0)
}

/// Weighted completeness over the five evidence sub-scores.
fn completeness(candidate: &Candidate, config: &EngineConfig) -> f64 {
    let f = &candidate.features;
    let w = &config.completeness_weights;

    let sub = |measured: bool| {
        if measured {
            SUB_SCORE_MEASURED
        } else {
            SUB_SCORE_ESTIMATED
        }
    };

    let score = w.population * sub(!f.population_estimated)
        + w.performance * sub(f.performance_sample >= config.min_performance_sample)
        + w.anchor * sub(!f.anchors_capped)
        + w.recency * sub(f.performance_recent)
        + w.income * sub(f.has_income_proxy);

    score.clamp(0.0, 1.0)
}

/// Builds the optional ±10% per-weight sensitivity report.
///
/// For each candidate and each of the five weights, reports the
/// composite-score delta when that weight alone is scaled by 1.1 / 0.9.
/// Purely diagnostic; no pipeline stage consumes it.
#[must_use]
pub fn sensitivity_report(
    candidates: &[Candidate],
    config: &EngineConfig,
) -> Vec<SensitivityEntry> {
    let terms: Vec<RawTerms> = candidates
        .iter()
        .map(|c| raw_terms(c, config))
        .collect();
    let ranges = batch_ranges(&terms);

    let base: Vec<f64> = candidates
        .iter()
        .zip(&terms)
        .map(|(candidate, raw)| {
            let (weights, _) = effective_weights(candidate, config);
            composite(raw, &ranges, &weights)
        })
        .collect();

    let mut entries = Vec::new();
    for (name, scale_weight) in weight_perturbations() {
        for (factor, up) in [(1.1, true), (0.9, false)] {
            for ((candidate, raw), &base_score) in candidates.iter().zip(&terms).zip(&base) {
                let mut perturbed = config.clone();
                scale_weight(&mut perturbed.weights, factor);
                let (weights, _) = effective_weights(candidate, &perturbed);
                let delta = composite(raw, &ranges, &weights) - base_score;

                let entry = entries
                    .iter_mut()
                    .find(|e: &&mut SensitivityEntry| {
                        e.settlement_id == candidate.settlement_id && e.weight == name
                    });
                match entry {
                    Some(e) if up => e.delta_up = delta,
                    Some(e) => e.delta_down = delta,
                    None => entries.push(SensitivityEntry {
                        settlement_id: candidate.settlement_id.clone(),
                        weight: name.to_string(),
                        delta_up: if up { delta } else { 0.0 },
                        delta_down: if up { 0.0 } else { delta },
                    }),
                }
            }
        }
    }

    entries
}

type WeightScaler = fn(&mut FeatureWeights, f64);

fn weight_perturbations() -> [(&'static str, WeightScaler); 5] {
    [
        ("population", |w, f| w.population *= f),
        ("gap", |w, f| w.gap *= f),
        ("anchor", |w, f| w.anchor *= f),
        ("performance", |w, f| w.performance *= f),
        ("saturation", |w, f| w.saturation *= f),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_scout_models::{
        Coordinates, FeatureVector, MergeReport, SaturationCounts,
    };

    fn candidate(id: &str, features: FeatureVector) -> Candidate {
        Candidate {
            settlement_id: id.to_string(),
            name: id.to_string(),
            sub_region: "north".to_string(),
            coordinates: Coordinates { lat: 52.52, lng: 13.405 },
            features,
            merge_report: MergeReport::default(),
            completeness: 0.0,
            composite_score: 0.0,
            uncertainty_weight: 0.0,
            recommendation: Recommendation::Recommend,
            survived_nms: false,
        }
    }

    fn measured_features(population: f64, gap: f64) -> FeatureVector {
        FeatureVector {
            population,
            population_estimated: false,
            gap_distance_km: gap,
            anchor_count: 5,
            anchors_capped: false,
            performance_proxy: Some(500_000.0),
            performance_sample: 4,
            performance_recent: true,
            saturation: SaturationCounts::default(),
            has_income_proxy: true,
        }
    }

    #[test]
    fn scores_stay_in_unit_range() {
        let config = EngineConfig::default();
        let mut candidates = vec![
            candidate("a", measured_features(1_000_000.0, 40.0)),
            candidate("b", measured_features(50_000.0, 10.0)),
            candidate("c", measured_features(500.0, 2.0)),
        ];

        score_batch(&mut candidates, &config);

        for c in &candidates {
            assert!((0.0..=1.0).contains(&c.composite_score), "{}", c.composite_score);
            assert!((0.0..=1.0).contains(&c.completeness), "{}", c.completeness);
        }
    }

    #[test]
    fn higher_population_scores_higher_all_else_equal() {
        let config = EngineConfig::default();
        let mut candidates = vec![
            candidate("big", measured_features(1_000_000.0, 20.0)),
            candidate("small", measured_features(500.0, 20.0)),
        ];

        score_batch(&mut candidates, &config);
        assert!(candidates[0].composite_score > candidates[1].composite_score);
    }

    #[test]
    fn fully_measured_candidate_has_full_completeness() {
        let config = EngineConfig::default();
        let mut candidates = vec![candidate("a", measured_features(10_000.0, 15.0))];
        score_batch(&mut candidates, &config);

        assert!((candidates[0].completeness - 1.0).abs() < 1e-9);
        assert_eq!(candidates[0].recommendation, Recommendation::Recommend);
        assert!(candidates[0].uncertainty_weight.abs() < f64::EPSILON);
    }

    #[test]
    fn low_completeness_downgrades_regardless_of_score() {
        let config = EngineConfig::default();
        let mut features = measured_features(1_000_000.0, 45.0);
        features.population_estimated = true;
        features.performance_proxy = None;
        features.performance_sample = 0;
        features.performance_recent = false;
        features.has_income_proxy = false;
        features.anchors_capped = true;

        let mut candidates = vec![
            candidate("weak-evidence", features),
            candidate("filler", measured_features(500.0, 1.0)),
        ];
        score_batch(&mut candidates, &config);

        // All five sub-scores estimated -> completeness 0.25 < 0.4.
        assert!(candidates[0].completeness < config.min_evidence_completeness);
        assert_eq!(candidates[0].recommendation, Recommendation::Downgraded);
        // Its composite score is still the batch maximum.
        assert!(candidates[0].composite_score > candidates[1].composite_score);
    }

    #[test]
    fn estimated_features_shift_weight_to_gap_and_record_uncertainty() {
        let config = EngineConfig::default();
        let mut features = measured_features(10_000.0, 15.0);
        features.population_estimated = true;

        let (weights, uncertainty) = effective_weights(&candidate("a", features), &config);

        let cut = config.weights.population * 0.5;
        assert!((weights.population - (config.weights.population - cut)).abs() < 1e-12);
        assert!((weights.gap - (config.weights.gap + cut * 0.8)).abs() < 1e-12);
        assert!((uncertainty - cut * 0.2).abs() < 1e-12);
    }

    #[test]
    fn diminishing_returns_bound_anchor_term() {
        // 1 + 1/sqrt(2) + 1/sqrt(3)
        let diminished = anchor_term(3, true);
        assert!((diminished - 2.284_457).abs() < 1e-5);
        assert!(diminished < anchor_term(3, false));
        // Each additional anchor contributes less than the previous.
        let marginal_4 = anchor_term(4, true) - anchor_term(3, true);
        let marginal_2 = anchor_term(2, true) - anchor_term(1, true);
        assert!(marginal_4 < marginal_2);
    }

    #[test]
    fn uniform_gap_normalizes_to_maximal() {
        // Mirrors the no-outlet scenario: every candidate at the gap cap.
        let range = MinMax::over([50.0, 50.0, 50.0].into_iter());
        assert!((range.norm(50.0) - 1.0).abs() < f64::EPSILON);

        let zero_range = MinMax::over([0.0, 0.0].into_iter());
        assert!(zero_range.norm(0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn scoring_tolerates_missing_performance_everywhere() {
        let config = EngineConfig::default();
        let mut features = measured_features(10_000.0, 15.0);
        features.performance_proxy = None;
        features.performance_sample = 0;

        let mut candidates = vec![candidate("a", features)];
        score_batch(&mut candidates, &config);
        assert!(candidates[0].composite_score.is_finite());
    }

    #[test]
    fn sensitivity_report_covers_all_weights() {
        let config = EngineConfig::default();
        let mut candidates = vec![
            candidate("a", measured_features(1_000_000.0, 40.0)),
            candidate("b", measured_features(500.0, 2.0)),
        ];
        score_batch(&mut candidates, &config);

        let report = sensitivity_report(&candidates, &config);
        assert_eq!(report.len(), 2 * 5);
        assert!(report.iter().all(|e| e.delta_up.is_finite() && e.delta_down.is_finite()));
    }
}
