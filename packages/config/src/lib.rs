#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Immutable run configuration for the expansion engine.
//!
//! A single [`EngineConfig`] is built (from defaults, or deserialized from
//! TOML) and passed explicitly into the orchestrator — no process-wide
//! mutable configuration. Validation happens once at load time and is
//! fatal: a config that fails [`EngineConfig::validate`] never reaches
//! candidate processing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Feature weights must sum to approximately 1.0.
    #[error("feature weights sum to {sum:.3}, expected within {tolerance} of 1.0")]
    WeightSum {
        /// Actual weight sum.
        sum: f64,
        /// Allowed deviation from 1.0.
        tolerance: f64,
    },

    /// A radius, speed, or cap that must be positive was not.
    #[error("{name} must be positive, got {value}")]
    NonPositive {
        /// Config field name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A fraction or threshold that must lie in `[0, 1]` does not.
    #[error("{name} must be in [0, 1], got {value}")]
    OutOfUnitRange {
        /// Config field name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Completeness sub-weights must sum to approximately 1.0.
    #[error("completeness sub-weights sum to {sum:.3}, expected within 0.01 of 1.0")]
    CompletenessWeightSum {
        /// Actual sub-weight sum.
        sum: f64,
    },
}

/// Scoring weights for the five candidate features.
///
/// Expected to sum to ≈1.0; validated with a small tolerance rather than
/// enforced exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureWeights {
    /// Weight of the population feature.
    pub population: f64,
    /// Weight of the nearest-outlet gap feature.
    pub gap: f64,
    /// Weight of the deduplicated anchor feature.
    pub anchor: f64,
    /// Weight of the nearby-performance feature.
    pub performance: f64,
    /// Weight of the saturation penalty (subtracted).
    pub saturation: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            population: 0.30,
            gap: 0.25,
            anchor: 0.20,
            performance: 0.15,
            saturation: 0.10,
        }
    }
}

impl FeatureWeights {
    /// Sum of all five weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.population + self.gap + self.anchor + self.performance + self.saturation
    }
}

/// Merge radii (meters) for the category pairings that deduplicate.
///
/// Radii are symmetric: merging A↔B is equivalent regardless of order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeRadii {
    /// Mall ↔ retail/grocer.
    pub mall_m: f64,
    /// Station ↔ retail.
    pub station_retail_m: f64,
    /// Grocer ↔ grocer.
    pub grocer_grocer_m: f64,
    /// Retail ↔ retail.
    pub retail_retail_m: f64,
}

impl Default for MergeRadii {
    fn default() -> Self {
        Self {
            mall_m: 120.0,
            station_retail_m: 100.0,
            grocer_grocer_m: 60.0,
            retail_retail_m: 60.0,
        }
    }
}

/// Completeness sub-score weights. Must sum to ≈1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletenessWeights {
    /// Population-source quality.
    pub population: f64,
    /// Performance-sample-size quality.
    pub performance: f64,
    /// Anchor-coverage quality.
    pub anchor: f64,
    /// Data-recency quality.
    pub recency: f64,
    /// Income-proxy quality.
    pub income: f64,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            population: 0.3,
            performance: 0.3,
            anchor: 0.2,
            recency: 0.1,
            income: 0.1,
        }
    }
}

impl CompletenessWeights {
    /// Sum of all five sub-weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.population + self.performance + self.anchor + self.recency + self.income
    }
}

/// Guardrail thresholds and the sanity-set membership list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardrailConfig {
    /// Minimum allocated / evaluated ratio.
    pub min_acceptance_rate: f64,
    /// Minimum mean completeness across allocated candidates.
    pub min_avg_completeness: f64,
    /// Maximum share of the allocation any single sub-region may hold.
    pub max_sub_region_share: f64,
    /// Settlement names that must appear among allocated candidates.
    pub sanity_set: Vec<String>,
    /// Sanity-set members explicitly suppressed, with the reason logged
    /// and recorded instead of failing the rule.
    pub sanity_suppressions: BTreeMap<String, String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_acceptance_rate: 0.15,
            min_avg_completeness: 0.5,
            max_sub_region_share: 0.4,
            sanity_set: Vec::new(),
            sanity_suppressions: BTreeMap::new(),
        }
    }
}

/// The complete, immutable configuration surface of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Scoring weights for the five features.
    pub weights: FeatureWeights,
    /// Category-pair merge radii for anchor deduplication.
    pub merge_radii: MergeRadii,
    /// Maximum deduplicated anchors counted per candidate locality.
    pub anchor_cap: u32,
    /// Apply 1/√rank diminishing returns to the anchor contribution.
    pub diminishing_returns: bool,
    /// Completeness sub-score weights.
    pub completeness_weights: CompletenessWeights,
    /// Below this completeness a candidate is force-downgraded.
    pub min_evidence_completeness: f64,
    /// Radius for the anchor-count feature, km.
    pub anchor_radius_km: f64,
    /// Radius for the nearby-performance proxy, km.
    pub performance_radius_km: f64,
    /// Gap distance saturates here when outlets are absent, km.
    pub gap_cap_km: f64,
    /// Minimum turnover observations before the performance sample is
    /// considered full-quality.
    pub min_performance_sample: u32,
    /// Drive-time suppression threshold, minutes.
    pub drive_time_minutes: f64,
    /// Assumed urban speed used to convert drive time to a straight-line
    /// distance threshold, km/h.
    pub assumed_speed_kmh: f64,
    /// Fraction of top scorers always preserved from suppression.
    pub preserve_top_fraction: f64,
    /// Soft cap on survivors per region after suppression.
    pub region_soft_cap: u32,
    /// Allocate base quotas by population share (`true`) or equal split.
    pub population_weighted_allocation: bool,
    /// Number of top-performing sub-regions receiving a +1 bonus slot.
    pub performance_bonus_count: u32,
    /// Global output-size target across all sub-regions.
    pub global_target: u32,
    /// Manual per-sub-region quota overrides. An override wins
    /// unconditionally over base + bonus.
    pub sub_region_overrides: BTreeMap<String, u32>,
    /// Guardrail thresholds and sanity-set membership.
    pub guardrails: GuardrailConfig,
    /// Emit the ±10% per-weight sensitivity report.
    pub sensitivity_analysis: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: FeatureWeights::default(),
            merge_radii: MergeRadii::default(),
            anchor_cap: 25,
            diminishing_returns: true,
            completeness_weights: CompletenessWeights::default(),
            min_evidence_completeness: 0.4,
            anchor_radius_km: 2.0,
            performance_radius_km: 10.0,
            gap_cap_km: 50.0,
            min_performance_sample: 3,
            drive_time_minutes: 10.0,
            assumed_speed_kmh: 50.0,
            preserve_top_fraction: 0.2,
            region_soft_cap: 50,
            population_weighted_allocation: true,
            performance_bonus_count: 2,
            global_target: 10,
            sub_region_overrides: BTreeMap::new(),
            guardrails: GuardrailConfig::default(),
            sensitivity_analysis: false,
        }
    }
}

/// Tolerance for the feature-weight sum check.
const WEIGHT_SUM_TOLERANCE: f64 = 0.05;

impl EngineConfig {
    /// Parses and validates a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or validation rejects the
    /// resulting config.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsing fails, or
    /// validation rejects the resulting config.
    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Validates the configuration. Fatal to the run on failure — no
    /// candidate processing may begin with an invalid config.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint: weights not summing near
    /// 1.0, non-positive radii/speeds/caps, or fractions outside `[0, 1]`.
    #[allow(clippy::too_many_lines)]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum {
                sum,
                tolerance: WEIGHT_SUM_TOLERANCE,
            });
        }

        let completeness_sum = self.completeness_weights.sum();
        if (completeness_sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::CompletenessWeightSum {
                sum: completeness_sum,
            });
        }

        for (name, value) in [
            ("mergeRadii.mallM", self.merge_radii.mall_m),
            ("mergeRadii.stationRetailM", self.merge_radii.station_retail_m),
            ("mergeRadii.grocerGrocerM", self.merge_radii.grocer_grocer_m),
            ("mergeRadii.retailRetailM", self.merge_radii.retail_retail_m),
            ("anchorRadiusKm", self.anchor_radius_km),
            ("performanceRadiusKm", self.performance_radius_km),
            ("gapCapKm", self.gap_cap_km),
            ("driveTimeMinutes", self.drive_time_minutes),
            ("assumedSpeedKmh", self.assumed_speed_kmh),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if self.anchor_cap == 0 {
            return Err(ConfigError::NonPositive {
                name: "anchorCap",
                value: 0.0,
            });
        }

        if self.global_target == 0 {
            return Err(ConfigError::NonPositive {
                name: "globalTarget",
                value: 0.0,
            });
        }

        for (name, value) in [
            ("preserveTopFraction", self.preserve_top_fraction),
            ("minEvidenceCompleteness", self.min_evidence_completeness),
            (
                "guardrails.minAcceptanceRate",
                self.guardrails.min_acceptance_rate,
            ),
            (
                "guardrails.minAvgCompleteness",
                self.guardrails.min_avg_completeness,
            ),
            (
                "guardrails.maxSubRegionShare",
                self.guardrails.max_sub_region_share,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }

        Ok(())
    }

    /// Straight-line distance threshold equivalent to the configured
    /// drive time, km.
    ///
    /// This is the documented linear approximation
    /// `distance = time × speed`, not a routing computation.
    #[must_use]
    pub fn drive_time_distance_km(&self) -> f64 {
        self.drive_time_minutes / 60.0 * self.assumed_speed_kmh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = EngineConfig::default();
        config.weights.population = 0.9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_radius() {
        let mut config = EngineConfig::default();
        config.merge_radii.mall_m = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name, .. }) if name == "mergeRadii.mallM"
        ));
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let mut config = EngineConfig::default();
        config.preserve_top_fraction = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange { .. })
        ));
    }

    #[test]
    fn converts_drive_time_to_distance() {
        let config = EngineConfig::default();
        // 10 minutes at 50 km/h
        assert!((config.drive_time_distance_km() - 8.333_333).abs() < 1e-5);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = EngineConfig::from_toml(
            "globalTarget = 5\n\n[weights]\npopulation = 0.4\ngap = 0.2\nanchor = 0.2\nperformance = 0.1\nsaturation = 0.1\n",
        )
        .unwrap();
        assert_eq!(config.global_target, 5);
        assert!((config.weights.population - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.anchor_cap, 25);
    }

    #[test]
    fn rejects_bad_toml_weights_at_parse_time() {
        let err = EngineConfig::from_toml(
            "[weights]\npopulation = 0.9\ngap = 0.9\nanchor = 0.2\nperformance = 0.1\nsaturation = 0.1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { .. }));
    }
}
