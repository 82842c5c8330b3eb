#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Post-hoc publication guardrails.
//!
//! Runs independent sanity checks over the final allocated candidate set
//! and blocks publication when any threshold is violated. Guardrails
//! never mutate candidates — the orchestrator still returns the full
//! result, tagged blocked, with every failing rule's observed value
//! attached for diagnostics.

use std::collections::BTreeMap;

use site_scout_config::GuardrailConfig;
use site_scout_models::{Candidate, GuardrailResult, GuardrailRule, RunVerdict};

/// Outcome of evaluating all guardrails against a run.
#[derive(Debug, Clone)]
pub struct GuardrailOutcome {
    /// One result per rule, pass or fail.
    pub results: Vec<GuardrailResult>,
    /// Blocked if any rule failed.
    pub verdict: RunVerdict,
}

/// Evaluates every guardrail over the allocated candidate set.
///
/// `evaluated` is the number of candidates that were scored this run
/// (the acceptance-rate denominator).
#[must_use]
pub fn evaluate(
    allocated: &[Candidate],
    evaluated: u32,
    config: &GuardrailConfig,
) -> GuardrailOutcome {
    let results = vec![
        acceptance_rate(allocated, evaluated, config),
        avg_completeness(allocated, config),
        sub_region_share(allocated, config),
        sanity_set(allocated, config),
    ];

    let verdict = if results.iter().all(|r| r.passed) {
        RunVerdict::Publishable
    } else {
        for failure in results.iter().filter(|r| !r.passed) {
            log::warn!(
                "Guardrail {} failed: observed {:.3}, threshold {:.3}{}",
                failure.rule,
                failure.observed,
                failure.threshold,
                failure
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            );
        }
        RunVerdict::Blocked
    };

    GuardrailOutcome { results, verdict }
}

/// Allocated / evaluated must meet the minimum acceptance rate.
fn acceptance_rate(
    allocated: &[Candidate],
    evaluated: u32,
    config: &GuardrailConfig,
) -> GuardrailResult {
    #[allow(clippy::cast_precision_loss)]
    let observed = if evaluated == 0 {
        0.0
    } else {
        allocated.len() as f64 / f64::from(evaluated)
    };

    GuardrailResult {
        rule: GuardrailRule::AcceptanceRate,
        passed: observed >= config.min_acceptance_rate,
        observed,
        threshold: config.min_acceptance_rate,
        detail: None,
    }
}

/// Mean completeness across allocated candidates must meet the minimum.
fn avg_completeness(allocated: &[Candidate], config: &GuardrailConfig) -> GuardrailResult {
    #[allow(clippy::cast_precision_loss)]
    let observed = if allocated.is_empty() {
        0.0
    } else {
        allocated.iter().map(|c| c.completeness).sum::<f64>() / allocated.len() as f64
    };

    GuardrailResult {
        rule: GuardrailRule::AvgCompleteness,
        passed: observed >= config.min_avg_completeness,
        observed,
        threshold: config.min_avg_completeness,
        detail: None,
    }
}

/// No single sub-region may hold more than the configured share of the
/// allocation.
fn sub_region_share(allocated: &[Candidate], config: &GuardrailConfig) -> GuardrailResult {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for candidate in allocated {
        *counts.entry(candidate.sub_region.as_str()).or_default() += 1;
    }

    let (observed, detail) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map_or((0.0, None), |(&name, &count)| {
            #[allow(clippy::cast_precision_loss)]
            let share = count as f64 / allocated.len() as f64;
            (share, Some(name.to_string()))
        });

    GuardrailResult {
        rule: GuardrailRule::SubRegionShare,
        passed: observed <= config.max_sub_region_share,
        observed,
        threshold: config.max_sub_region_share,
        detail,
    }
}

/// Every sanity-set settlement must appear among the allocated
/// candidates unless individually suppressed with a logged reason.
fn sanity_set(allocated: &[Candidate], config: &GuardrailConfig) -> GuardrailResult {
    let mut missing = Vec::new();
    for name in &config.sanity_set {
        if allocated.iter().any(|c| &c.name == name) {
            continue;
        }
        if let Some(reason) = config.sanity_suppressions.get(name) {
            log::info!("Sanity settlement '{name}' suppressed: {reason}");
            continue;
        }
        missing.push(name.as_str());
    }

    #[allow(clippy::cast_precision_loss)]
    GuardrailResult {
        rule: GuardrailRule::SanitySet,
        passed: missing.is_empty(),
        observed: missing.len() as f64,
        threshold: 0.0,
        detail: (!missing.is_empty()).then(|| format!("missing: {}", missing.join(", "))),
    }
}
