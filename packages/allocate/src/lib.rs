#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Regional fairness allocation.
//!
//! Distributes the global output quota across sub-regions proportionally
//! to population (or as an equal split), grants bonus slots to the
//! top-performing sub-regions, honors manual per-sub-region overrides
//! unconditionally, and selects the top-scoring surviving candidates per
//! sub-region up to its final quota. Every decision is captured in a
//! write-once [`FairnessLedgerEntry`] per sub-region.
//!
//! Invariant: the quota sum never exceeds the global target unless
//! manual overrides alone force it to; when enough eligible candidates
//! exist, the allocation fills the target exactly.

use std::collections::BTreeMap;

use site_scout_config::EngineConfig;
use site_scout_models::{Candidate, FairnessLedgerEntry, Recommendation};

/// Result of the allocation stage.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// Selected candidates, grouped by sub-region in ledger order and
    /// ranked by score within each group.
    pub allocated: Vec<Candidate>,
    /// One entry per sub-region, in sub-region name order.
    pub ledger: Vec<FairnessLedgerEntry>,
}

/// Per-sub-region working state while quotas are computed.
struct RegionState {
    name: String,
    /// Eligible (non-downgraded) candidates, sorted by descending score.
    eligible: Vec<Candidate>,
    population: u64,
    avg_score: f64,
    avg_performance: f64,
    base_quota: u32,
    bonus: u32,
    manual_override: Option<u32>,
    quota: u32,
}

/// Allocates surviving candidates across sub-regions.
///
/// `sub_region_population` supplies the population figures the base
/// quotas are computed from; sub-regions appearing only there (no
/// surviving candidates) still receive a ledger entry with zero
/// availability.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn allocate(
    survivors: Vec<Candidate>,
    sub_region_population: &BTreeMap<String, u64>,
    config: &EngineConfig,
) -> AllocationOutcome {
    let mut regions = group_regions(survivors, sub_region_population);
    if regions.is_empty() {
        return AllocationOutcome {
            allocated: Vec::new(),
            ledger: Vec::new(),
        };
    }

    compute_base_quotas(&mut regions, config);
    grant_performance_bonuses(&mut regions, config);

    for region in &mut regions {
        region.manual_override = config.sub_region_overrides.get(&region.name).copied();
        region.quota = region
            .manual_override
            .unwrap_or(region.base_quota + region.bonus);
    }

    trim_to_target(&mut regions, config.global_target);
    fill_shortfall(&mut regions, config.global_target);

    // Select per sub-region and build the ledger.
    let mut allocated = Vec::new();
    let mut ledger = Vec::new();
    for region in regions {
        #[allow(clippy::cast_possible_truncation)]
        let available = region.eligible.len() as u32;
        let take = region.quota.min(available) as usize;
        if available < region.quota {
            log::info!(
                "Sub-region '{}' short: quota {}, only {available} available",
                region.name,
                region.quota
            );
        }

        ledger.push(FairnessLedgerEntry {
            sub_region: region.name,
            base_quota: region.base_quota,
            performance_bonus: region.bonus,
            manual_override: region.manual_override,
            allocated_quota: region.quota,
            available,
            #[allow(clippy::cast_possible_truncation)]
            allocated: take as u32,
            avg_score: region.avg_score,
            avg_performance: region.avg_performance,
        });

        allocated.extend(region.eligible.into_iter().take(take));
    }

    log::info!(
        "Allocated {} candidates across {} sub-regions (target {})",
        allocated.len(),
        ledger.len(),
        config.global_target
    );

    AllocationOutcome { allocated, ledger }
}

/// Groups survivors by sub-region and computes availability statistics.
///
/// Downgraded candidates are excluded from eligibility here: a candidate
/// below the minimum-evidence threshold can never receive a "go"
/// recommendation regardless of score.
fn group_regions(
    survivors: Vec<Candidate>,
    sub_region_population: &BTreeMap<String, u64>,
) -> Vec<RegionState> {
    let mut by_region: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for candidate in survivors {
        if candidate.recommendation == Recommendation::Downgraded {
            log::debug!(
                "Excluding downgraded candidate '{}' from allocation",
                candidate.settlement_id
            );
            continue;
        }
        by_region
            .entry(candidate.sub_region.clone())
            .or_default()
            .push(candidate);
    }
    for name in sub_region_population.keys() {
        by_region.entry(name.clone()).or_default();
    }

    by_region
        .into_iter()
        .map(|(name, mut eligible)| {
            eligible.sort_by(|a, b| {
                b.composite_score
                    .total_cmp(&a.composite_score)
                    .then_with(|| a.settlement_id.cmp(&b.settlement_id))
            });

            let avg_score = mean(eligible.iter().map(|c| c.composite_score));
            let avg_performance = mean(
                eligible
                    .iter()
                    .filter_map(|c| c.features.performance_proxy),
            );
            let population = sub_region_population.get(&name).copied().unwrap_or(0);

            RegionState {
                name,
                eligible,
                population,
                avg_score,
                avg_performance,
                base_quota: 0,
                bonus: 0,
                manual_override: None,
                quota: 0,
            }
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0_u32;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 { 0.0 } else { sum / f64::from(count) }
}

/// Base quotas: population share of the target, or an equal split with
/// the remainder going to the best-performing sub-regions.
fn compute_base_quotas(regions: &mut [RegionState], config: &EngineConfig) {
    let target = config.global_target;

    if config.population_weighted_allocation {
        #[allow(clippy::cast_precision_loss)]
        let total_population: f64 = regions.iter().map(|r| r.population as f64).sum();
        for region in regions.iter_mut() {
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            let base = if total_population > 0.0 {
                (region.population as f64 / total_population * f64::from(target)).round() as u32
            } else {
                0
            };
            region.base_quota = base;
        }
        return;
    }

    #[allow(clippy::cast_possible_truncation)]
    let count = regions.len() as u32;
    let each = target / count;
    let mut remainder = target % count;

    for region in regions.iter_mut() {
        region.base_quota = each;
    }
    // Remainder slots go one each to the best performers.
    for index in rank_by_performance(regions) {
        if remainder == 0 {
            break;
        }
        regions[index].base_quota += 1;
        remainder -= 1;
    }
}

/// Indices of regions ranked best-performing first, ties by name.
fn rank_by_performance(regions: &[RegionState]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..regions.len()).collect();
    order.sort_by(|&a, &b| {
        regions[b]
            .avg_performance
            .total_cmp(&regions[a].avg_performance)
            .then_with(|| regions[a].name.cmp(&regions[b].name))
    });
    order
}

/// +1 slot for each of the top-K sub-regions by average candidate
/// performance proxy. Regions with no eligible candidates get no bonus.
fn grant_performance_bonuses(regions: &mut [RegionState], config: &EngineConfig) {
    let ranked = rank_by_performance(regions);
    let mut granted = 0_u32;
    for index in ranked {
        if granted >= config.performance_bonus_count {
            break;
        }
        if regions[index].eligible.is_empty() {
            continue;
        }
        regions[index].bonus = 1;
        granted += 1;
    }
}

/// Decrements non-overridden quotas, worst-performing regions first,
/// until the quota sum fits the target. Overrides are never trimmed, so
/// an override set alone can exceed the target — the override wins
/// unconditionally and the share guardrail still applies downstream.
fn trim_to_target(regions: &mut [RegionState], target: u32) {
    let mut sum: u32 = regions.iter().map(|r| r.quota).sum();
    if sum <= target {
        return;
    }

    let mut order = rank_by_performance(regions);
    order.reverse();

    while sum > target {
        let Some(&index) = order.iter().find(|&&i| {
            regions[i].manual_override.is_none() && regions[i].quota > 0
        }) else {
            log::warn!(
                "Quota sum {sum} exceeds target {target} via manual overrides alone"
            );
            break;
        };
        regions[index].quota -= 1;
        sum -= 1;
    }
}

/// When rounding or regional shortfalls leave the target unfilled while
/// other sub-regions still have eligible candidates beyond their quota,
/// moves the unusable slots to the best-performing of those regions.
/// Slots move one at a time so the quota sum never rises above the
/// target; overridden regions neither donate nor receive.
fn fill_shortfall(regions: &mut [RegionState], target: u32) {
    #[allow(clippy::cast_possible_truncation)]
    let available = |r: &RegionState| r.eligible.len() as u32;

    loop {
        let quota_sum: u32 = regions.iter().map(|r| r.quota).sum();
        let filled: u32 = regions.iter().map(|r| r.quota.min(available(r))).sum();
        if filled >= target {
            return;
        }

        let ranked = rank_by_performance(regions);
        let Some(&receiver) = ranked.iter().find(|&&i| {
            regions[i].manual_override.is_none() && regions[i].quota < available(&regions[i])
        }) else {
            return; // total availability is insufficient
        };

        if quota_sum < target {
            regions[receiver].quota += 1;
            continue;
        }

        // Quota sum is at the target: a slot must come from a region
        // that cannot fill it anyway.
        let Some(&donor) = ranked.iter().rev().find(|&&i| {
            regions[i].manual_override.is_none() && regions[i].quota > available(&regions[i])
        }) else {
            return;
        };
        regions[donor].quota -= 1;
        regions[receiver].quota += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_scout_models::{
        Coordinates, FeatureVector, MergeReport, SaturationCounts,
    };

    fn candidate(id: &str, sub_region: &str, score: f64, performance: Option<f64>) -> Candidate {
        Candidate {
            settlement_id: id.to_string(),
            name: id.to_string(),
            sub_region: sub_region.to_string(),
            coordinates: Coordinates { lat: 52.52, lng: 13.405 },
            features: FeatureVector {
                population: 1000.0,
                population_estimated: false,
                gap_distance_km: 10.0,
                anchor_count: 0,
                anchors_capped: false,
                performance_proxy: performance,
                performance_sample: u32::from(performance.is_some()),
                performance_recent: false,
                saturation: SaturationCounts::default(),
                has_income_proxy: false,
            },
            merge_report: MergeReport::default(),
            completeness: 1.0,
            composite_score: score,
            uncertainty_weight: 0.0,
            recommendation: Recommendation::Recommend,
            survived_nms: true,
        }
    }

    fn populations(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs
            .iter()
            .map(|(name, pop)| ((*name).to_string(), *pop))
            .collect()
    }

    fn config(target: u32) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.global_target = target;
        config.performance_bonus_count = 0;
        config
    }

    fn many(prefix: &str, sub_region: &str, count: usize) -> Vec<Candidate> {
        #[allow(clippy::cast_precision_loss)]
        (0..count)
            .map(|i| {
                candidate(
                    &format!("{prefix}-{i:02}"),
                    sub_region,
                    0.9 - i as f64 * 0.01,
                    None,
                )
            })
            .collect()
    }

    #[test]
    fn population_share_sets_base_quotas() {
        let mut survivors = many("n", "north", 10);
        survivors.extend(many("s", "south", 10));

        let outcome = allocate(
            survivors,
            &populations(&[("north", 700_000), ("south", 300_000)]),
            &config(10),
        );

        let north = outcome.ledger.iter().find(|e| e.sub_region == "north").unwrap();
        let south = outcome.ledger.iter().find(|e| e.sub_region == "south").unwrap();
        assert_eq!(north.base_quota, 7);
        assert_eq!(south.base_quota, 3);
        assert_eq!(north.allocated, 7);
        assert_eq!(south.allocated, 3);
    }

    #[test]
    fn manual_override_wins_unconditionally() {
        let mut survivors = many("n", "north", 10);
        survivors.extend(many("s", "south", 10));

        let mut cfg = config(10);
        cfg.sub_region_overrides.insert("south".to_string(), 5);

        let outcome = allocate(
            survivors,
            &populations(&[("north", 700_000), ("south", 300_000)]),
            &cfg,
        );

        let south = outcome.ledger.iter().find(|e| e.sub_region == "south").unwrap();
        assert_eq!(south.manual_override, Some(5));
        assert_eq!(south.allocated_quota, 5);
        assert_eq!(south.allocated, 5);

        // Quota sum is trimmed back to the target.
        let total: u32 = outcome.ledger.iter().map(|e| e.allocated_quota).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn allocation_fills_target_when_availability_allows() {
        let mut survivors = many("n", "north", 3);
        survivors.extend(many("s", "south", 12));

        let outcome = allocate(
            survivors,
            &populations(&[("north", 700_000), ("south", 300_000)]),
            &config(10),
        );

        // North's population share exceeds its availability; the unused
        // slots flow to south.
        let total: u32 = outcome.ledger.iter().map(|e| e.allocated).sum();
        assert_eq!(total, 10);
        #[allow(clippy::cast_possible_truncation)]
        let allocated = outcome.allocated.len() as u32;
        assert_eq!(allocated, 10);
    }

    #[test]
    fn allocation_never_exceeds_target() {
        let mut survivors = many("a", "alpha", 20);
        survivors.extend(many("b", "beta", 20));
        survivors.extend(many("c", "gamma", 20));

        let mut cfg = config(7);
        cfg.performance_bonus_count = 2;

        let outcome = allocate(
            survivors,
            &populations(&[("alpha", 500_000), ("beta", 300_000), ("gamma", 200_000)]),
            &cfg,
        );

        let total: u32 = outcome.ledger.iter().map(|e| e.allocated).sum();
        assert!(total <= 7);
        assert_eq!(total, 7); // availability is ample
    }

    #[test]
    fn shortfall_is_recorded_when_availability_is_low() {
        let survivors = many("n", "north", 2);

        let outcome = allocate(survivors, &populations(&[("north", 100_000)]), &config(5));

        let north = &outcome.ledger[0];
        assert_eq!(north.available, 2);
        assert_eq!(north.allocated, 2);
        assert!(north.allocated < north.allocated_quota);
    }

    #[test]
    fn performance_bonus_goes_to_top_regions() {
        let mut survivors = vec![
            candidate("n-1", "north", 0.9, Some(900_000.0)),
            candidate("s-1", "south", 0.8, Some(100_000.0)),
        ];
        survivors.push(candidate("n-2", "north", 0.7, Some(800_000.0)));

        let mut cfg = config(4);
        cfg.performance_bonus_count = 1;

        let outcome = allocate(
            survivors,
            &populations(&[("north", 500_000), ("south", 500_000)]),
            &cfg,
        );

        let north = outcome.ledger.iter().find(|e| e.sub_region == "north").unwrap();
        let south = outcome.ledger.iter().find(|e| e.sub_region == "south").unwrap();
        assert_eq!(north.performance_bonus, 1);
        assert_eq!(south.performance_bonus, 0);
    }

    #[test]
    fn downgraded_candidates_are_never_allocated() {
        let mut weak = candidate("weak", "north", 0.95, None);
        weak.recommendation = Recommendation::Downgraded;
        let survivors = vec![weak, candidate("solid", "north", 0.5, None)];

        let outcome = allocate(survivors, &populations(&[("north", 100_000)]), &config(2));

        let ids: Vec<&str> = outcome
            .allocated
            .iter()
            .map(|c| c.settlement_id.as_str())
            .collect();
        assert_eq!(ids, vec!["solid"]);
        assert_eq!(outcome.ledger[0].available, 1);
    }

    #[test]
    fn equal_split_mode_divides_evenly() {
        let mut survivors = many("a", "alpha", 5);
        survivors.extend(many("b", "beta", 5));

        let mut cfg = config(6);
        cfg.population_weighted_allocation = false;

        let outcome = allocate(
            survivors,
            &populations(&[("alpha", 900_000), ("beta", 100_000)]),
            &cfg,
        );

        for entry in &outcome.ledger {
            assert_eq!(entry.base_quota, 3);
        }
    }

    #[test]
    fn selects_top_scorers_within_region() {
        let survivors = vec![
            candidate("low", "north", 0.2, None),
            candidate("high", "north", 0.9, None),
            candidate("mid", "north", 0.5, None),
        ];

        let outcome = allocate(survivors, &populations(&[("north", 100_000)]), &config(2));

        let ids: Vec<&str> = outcome
            .allocated
            .iter()
            .map(|c| c.settlement_id.as_str())
            .collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }
}
