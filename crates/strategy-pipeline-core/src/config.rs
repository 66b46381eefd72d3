use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::RiskLevel;
use crate::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationThresholds {
    pub minimum_memory_improvement_mb: f64,
    pub minimum_speed_improvement: f64,
    pub maximum_performance_regression: f64,
    pub validation_confidence: f64,
    pub minimum_user_experience_score: f64,
    pub system_test_timeout_ms: u64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            minimum_memory_improvement_mb: 100.0,
            minimum_speed_improvement: 5.0,
            maximum_performance_regression: 2.0,
            validation_confidence: 0.8,
            minimum_user_experience_score: 60.0,
            system_test_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatingPolicy {
    pub min_confidence: f64,
    pub min_sample_size: u32,
    pub low_risk_min_safety: f64,
    pub medium_risk_min_safety: f64,
    pub high_risk_min_safety: f64,
}

impl GatingPolicy {
    #[must_use]
    pub fn min_safety_for(&self, risk_level: RiskLevel) -> f64 {
        match risk_level {
            RiskLevel::Low => self.low_risk_min_safety,
            RiskLevel::Medium => self.medium_risk_min_safety,
            RiskLevel::High => self.high_risk_min_safety,
        }
    }
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.85,
            min_sample_size: 100,
            low_risk_min_safety: 0.70,
            medium_risk_min_safety: 0.85,
            high_risk_min_safety: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationConfig {
    pub window_days: u32,
    pub max_samples: u32,
    pub chunk_size: u32,
    pub budget_ms: u64,
    pub full_confidence_samples: u32,
    pub profile_memory_bucket_gb: u32,
    pub min_validation_confidence: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            max_samples: 1000,
            chunk_size: 250,
            budget_ms: 30_000,
            full_confidence_samples: 100,
            profile_memory_bucket_gb: 8,
            min_validation_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessThresholds {
    pub effectiveness: f64,
    pub user_satisfaction: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackTriggers {
    pub max_crash_rate: f64,
    pub min_user_satisfaction: f64,
    pub min_effectiveness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryPolicy {
    pub rollout_phases: Vec<f64>,
    pub phase_duration_hours: u32,
    pub success_thresholds: SuccessThresholds,
    pub rollback_triggers: RollbackTriggers,
}

impl Default for CanaryPolicy {
    fn default() -> Self {
        Self {
            rollout_phases: vec![0.001, 0.01, 0.1, 0.5, 1.0],
            phase_duration_hours: 48,
            success_thresholds: SuccessThresholds {
                effectiveness: 0.8,
                user_satisfaction: 0.75,
                stability: 0.95,
            },
            rollback_triggers: RollbackTriggers {
                max_crash_rate: 0.01,
                min_user_satisfaction: 0.6,
                min_effectiveness: 0.5,
            },
        }
    }
}

/// Pruning is opt-in. `None` keeps every row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub telemetry_days: Option<u32>,
    pub intelligence_versions_to_keep: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub config_version: u32,
    #[serde(default)]
    pub validation: ValidationThresholds,
    #[serde(default)]
    pub gating: GatingPolicy,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub canary: CanaryPolicy,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl PipelineConfig {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            config_version: 1,
            validation: ValidationThresholds::default(),
            gating: GatingPolicy::default(),
            aggregation: AggregationConfig::default(),
            canary: CanaryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Validates numeric bounds and ordering constraints across all sections.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when a field is out of bounds.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.config_version == 0 {
            return Err(PipelineError::Configuration(
                "config_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            (
                "validation.validation_confidence",
                self.validation.validation_confidence,
            ),
            ("gating.min_confidence", self.gating.min_confidence),
            ("gating.low_risk_min_safety", self.gating.low_risk_min_safety),
            (
                "gating.medium_risk_min_safety",
                self.gating.medium_risk_min_safety,
            ),
            ("gating.high_risk_min_safety", self.gating.high_risk_min_safety),
            (
                "aggregation.min_validation_confidence",
                self.aggregation.min_validation_confidence,
            ),
            (
                "canary.success_thresholds.effectiveness",
                self.canary.success_thresholds.effectiveness,
            ),
            (
                "canary.success_thresholds.user_satisfaction",
                self.canary.success_thresholds.user_satisfaction,
            ),
            (
                "canary.success_thresholds.stability",
                self.canary.success_thresholds.stability,
            ),
            (
                "canary.rollback_triggers.max_crash_rate",
                self.canary.rollback_triggers.max_crash_rate,
            ),
            (
                "canary.rollback_triggers.min_user_satisfaction",
                self.canary.rollback_triggers.min_user_satisfaction,
            ),
            (
                "canary.rollback_triggers.min_effectiveness",
                self.canary.rollback_triggers.min_effectiveness,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        for (name, value) in [
            (
                "validation.minimum_memory_improvement_mb",
                self.validation.minimum_memory_improvement_mb,
            ),
            (
                "validation.minimum_speed_improvement",
                self.validation.minimum_speed_improvement,
            ),
            (
                "validation.maximum_performance_regression",
                self.validation.maximum_performance_regression,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::Configuration(format!(
                    "{name} MUST be a finite value >= 0"
                )));
            }
        }

        if !(0.0..=100.0).contains(&self.validation.minimum_user_experience_score) {
            return Err(PipelineError::Configuration(
                "validation.minimum_user_experience_score MUST be in [0, 100]".to_string(),
            ));
        }

        if self.validation.system_test_timeout_ms == 0 {
            return Err(PipelineError::Configuration(
                "validation.system_test_timeout_ms MUST be >= 1".to_string(),
            ));
        }

        if self.gating.low_risk_min_safety > self.gating.medium_risk_min_safety
            || self.gating.medium_risk_min_safety > self.gating.high_risk_min_safety
        {
            return Err(PipelineError::Configuration(
                "gating safety thresholds MUST be non-decreasing from low to high risk"
                    .to_string(),
            ));
        }

        for (name, value) in [
            ("aggregation.window_days", self.aggregation.window_days),
            ("aggregation.max_samples", self.aggregation.max_samples),
            ("aggregation.chunk_size", self.aggregation.chunk_size),
            (
                "aggregation.full_confidence_samples",
                self.aggregation.full_confidence_samples,
            ),
            (
                "aggregation.profile_memory_bucket_gb",
                self.aggregation.profile_memory_bucket_gb,
            ),
        ] {
            if value == 0 {
                return Err(PipelineError::Configuration(format!("{name} MUST be >= 1")));
            }
        }

        let phases = &self.canary.rollout_phases;
        if phases.is_empty() {
            return Err(PipelineError::Configuration(
                "canary.rollout_phases MUST contain at least one phase".to_string(),
            ));
        }
        if phases
            .iter()
            .any(|phase| !(*phase > 0.0 && *phase <= 1.0))
        {
            return Err(PipelineError::Configuration(
                "canary.rollout_phases entries MUST be in (0.0, 1.0]".to_string(),
            ));
        }
        if phases.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(PipelineError::Configuration(
                "canary.rollout_phases MUST be strictly increasing".to_string(),
            ));
        }

        if self.retention.intelligence_versions_to_keep == Some(0) {
            return Err(PipelineError::Configuration(
                "retention.intelligence_versions_to_keep MUST be >= 1 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a config from JSON. Omitted sections take defaults.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when JSON decoding fails
    /// or decoded values violate config constraints.
    pub fn from_json(value: &Value) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            PipelineError::Configuration(format!("invalid config JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}
