#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Drive-time non-maximum suppression.
//!
//! Two recommendations ten minutes apart by car cannibalize each other,
//! so candidates too close to a higher-scoring one are suppressed. The
//! distance threshold is the drive-time budget converted to kilometers
//! with an assumed urban speed — a documented straight-line
//! simplification, not a routing computation.
//!
//! Suppression is greedy over candidates in descending score order with
//! an explicit tie-break on settlement id, so the surviving set is
//! deterministic for identical input regardless of its ordering. A
//! configurable top fraction of scorers is always preserved, and a
//! per-region soft cap trims the lowest-scoring survivors afterwards.

use site_scout_config::EngineConfig;
use site_scout_models::Candidate;
use site_scout_spatial::haversine_km;

/// Result of the suppression stage.
#[derive(Debug, Clone)]
pub struct NmsOutcome {
    /// Surviving candidates in descending score order, `survived_nms`
    /// set.
    pub survivors: Vec<Candidate>,
    /// Candidates removed by spacing suppression or the soft cap.
    pub suppressed: u32,
}

/// Runs greedy drive-time suppression over a scored candidate batch.
#[must_use]
pub fn suppress(mut candidates: Vec<Candidate>, config: &EngineConfig) -> NmsOutcome {
    let total = candidates.len();
    if total == 0 {
        return NmsOutcome {
            survivors: Vec::new(),
            suppressed: 0,
        };
    }

    // Descending score, ties broken by settlement id so the result does
    // not depend on incidental input ordering.
    candidates.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.settlement_id.cmp(&b.settlement_id))
    });

    let threshold_km = config.drive_time_distance_km();
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let preserved = (config.preserve_top_fraction * total as f64).ceil() as usize;

    let mut suppressed = vec![false; total];
    for i in 0..total {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..total {
            if suppressed[j] || j < preserved {
                continue;
            }
            let distance = haversine_km(candidates[i].coordinates, candidates[j].coordinates);
            if distance <= threshold_km {
                suppressed[j] = true;
                log::debug!(
                    "Suppressing '{}' ({distance:.1} km from higher-scoring '{}')",
                    candidates[j].settlement_id,
                    candidates[i].settlement_id
                );
            }
        }
    }

    let mut survivors: Vec<Candidate> = candidates
        .into_iter()
        .zip(&suppressed)
        .filter_map(|(mut candidate, &gone)| {
            (!gone).then(|| {
                candidate.survived_nms = true;
                candidate
            })
        })
        .collect();

    let spacing_suppressed = total - survivors.len();

    // Soft cap: drop the lowest-scoring survivors beyond the cap.
    let cap = config.region_soft_cap as usize;
    let capped = survivors.len().saturating_sub(cap);
    if capped > 0 {
        survivors.truncate(cap);
        log::info!("Region soft cap dropped {capped} survivors beyond {cap}");
    }

    log::info!(
        "Drive-time NMS kept {} of {total} candidates ({spacing_suppressed} too close, {capped} over cap)",
        survivors.len()
    );

    #[allow(clippy::cast_possible_truncation)]
    NmsOutcome {
        survivors,
        suppressed: (spacing_suppressed + capped) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_scout_models::{
        Coordinates, FeatureVector, MergeReport, Recommendation, SaturationCounts,
    };

    fn candidate(id: &str, score: f64, lat: f64, lng: f64) -> Candidate {
        Candidate {
            settlement_id: id.to_string(),
            name: id.to_string(),
            sub_region: "north".to_string(),
            coordinates: Coordinates { lat, lng },
            features: FeatureVector {
                population: 1000.0,
                population_estimated: false,
                gap_distance_km: 10.0,
                anchor_count: 0,
                anchors_capped: false,
                performance_proxy: None,
                performance_sample: 0,
                performance_recent: false,
                saturation: SaturationCounts::default(),
                has_income_proxy: false,
            },
            merge_report: MergeReport::default(),
            completeness: 1.0,
            composite_score: score,
            uncertainty_weight: 0.0,
            recommendation: Recommendation::Recommend,
            survived_nms: false,
        }
    }

    fn config_no_preserve() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.preserve_top_fraction = 0.0;
        config
    }

    #[test]
    fn suppresses_close_lower_scorer() {
        // ~2 km apart, threshold ~8.3 km.
        let candidates = vec![
            candidate("low", 0.4, 52.538, 13.405),
            candidate("high", 0.9, 52.520, 13.405),
        ];

        let outcome = suppress(candidates, &config_no_preserve());
        let ids: Vec<&str> = outcome
            .survivors
            .iter()
            .map(|c| c.settlement_id.as_str())
            .collect();
        assert_eq!(ids, vec!["high"]);
        assert_eq!(outcome.suppressed, 1);
        assert!(outcome.survivors[0].survived_nms);
    }

    #[test]
    fn keeps_candidates_beyond_threshold() {
        // ~22 km apart.
        let candidates = vec![
            candidate("a", 0.9, 52.52, 13.405),
            candidate("b", 0.4, 52.72, 13.405),
        ];

        let outcome = suppress(candidates, &config_no_preserve());
        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.suppressed, 0);
    }

    #[test]
    fn no_two_survivors_within_threshold_unless_preserved() {
        let mut candidates = Vec::new();
        for i in 0..20 {
            // A tight cluster: everything within ~4 km.
            #[allow(clippy::cast_lossless)]
            let lat = 52.52 + f64::from(i) * 0.002;
            candidates.push(candidate(&format!("c-{i:02}"), 1.0 - f64::from(i) * 0.01, lat, 13.405));
        }

        let config = EngineConfig::default(); // preserve top 20%
        let threshold = config.drive_time_distance_km();
        let preserved = 4; // ceil(0.2 * 20)

        let outcome = suppress(candidates, &config);
        for (i, a) in outcome.survivors.iter().enumerate() {
            for b in outcome.survivors.iter().skip(i + 1) {
                let d = haversine_km(a.coordinates, b.coordinates);
                if d <= threshold {
                    // Only possible when the later candidate was in the
                    // preserved prefix.
                    assert!(outcome.survivors.len() <= preserved + 1, "{d:.2} km apart");
                }
            }
        }
        // The preserved top four always survive.
        assert!(outcome.survivors.len() >= preserved);
    }

    #[test]
    fn preserved_top_fraction_survives_spacing() {
        let mut config = config_no_preserve();
        config.preserve_top_fraction = 0.5;

        // Two candidates ~1 km apart; the lower scorer is within the
        // preserved half and must survive.
        let candidates = vec![
            candidate("a", 0.9, 52.520, 13.405),
            candidate("b", 0.5, 52.529, 13.405),
        ];

        let outcome = suppress(candidates, &config);
        assert_eq!(outcome.survivors.len(), 2);
    }

    #[test]
    fn soft_cap_drops_lowest_scorers() {
        let mut config = config_no_preserve();
        config.region_soft_cap = 2;

        // Far apart, no spacing suppression.
        let candidates = vec![
            candidate("a", 0.9, 52.0, 13.0),
            candidate("b", 0.8, 54.0, 13.0),
            candidate("c", 0.7, 56.0, 13.0),
        ];

        let outcome = suppress(candidates, &config);
        let ids: Vec<&str> = outcome
            .survivors
            .iter()
            .map(|c| c.settlement_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(outcome.suppressed, 1);
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        // Same score, ~1 km apart: "a" sorts first and suppresses "b".
        let forward = suppress(
            vec![
                candidate("a", 0.5, 52.520, 13.405),
                candidate("b", 0.5, 52.529, 13.405),
            ],
            &config_no_preserve(),
        );
        let reversed = suppress(
            vec![
                candidate("b", 0.5, 52.529, 13.405),
                candidate("a", 0.5, 52.520, 13.405),
            ],
            &config_no_preserve(),
        );

        assert_eq!(forward.survivors[0].settlement_id, "a");
        assert_eq!(reversed.survivors[0].settlement_id, "a");
        assert_eq!(forward.survivors.len(), 1);
        assert_eq!(reversed.survivors.len(), 1);
    }
}
