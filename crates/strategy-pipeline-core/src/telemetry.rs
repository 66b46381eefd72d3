use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::scoring::PerformanceSnapshot;
use crate::validation::{OptimizationBenchmark, OptimizationResult};
use crate::{require_non_empty, require_unit_interval, PipelineError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureClass {
    AppleSilicon,
    Intel,
}

impl ArchitectureClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppleSilicon => "apple_silicon",
            Self::Intel => "intel",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apple_silicon" => Some(Self::AppleSilicon),
            "intel" => Some(Self::Intel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceProfile {
    pub architecture: ArchitectureClass,
    pub memory_gb: f64,
    pub core_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemLoad {
    pub memory_pressure: f64,
    pub cpu_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationContext {
    pub time_of_day: u8,
    pub day_of_week: u8,
    pub system_load: SystemLoad,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppOptimization {
    pub app_category: String,
    pub memory_freed_mb: f64,
    pub action_count: u32,
    pub success: bool,
}

/// Validator verdict carried with each record. Low-trust records are stored, not dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryTrust {
    pub validation_confidence: f64,
    pub validated: bool,
    pub score_estimated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryObservation {
    pub session_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub device_profile: DeviceProfile,
    pub strategy: String,
    pub target_app: Option<String>,
    pub memory_freed_mb: f64,
    pub speed_gain_percent: f64,
    pub effectiveness_score: f64,
    pub context: OptimizationContext,
    #[serde(default)]
    pub app_optimizations: Vec<AppOptimization>,
    #[serde(default)]
    pub state_before: Value,
    #[serde(default)]
    pub state_after: Value,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Set only by [`TelemetryObservation::from_benchmark`]. Inbound JSON
    /// cannot carry it, so raw ingest always lands unvalidated.
    #[serde(default, skip_deserializing)]
    pub trust: TelemetryTrust,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl TelemetryObservation {
    /// Validates an inbound observation before it reaches the store.
    ///
    /// # Errors
    /// Returns [`PipelineError::ValidationFailed`] naming the first malformed field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_non_empty("session_id", &self.session_id)?;
        require_non_empty("device_id", &self.device_id)?;
        require_non_empty("strategy", &self.strategy)?;
        if let Some(user_id) = &self.user_id {
            require_non_empty("user_id", user_id)?;
        }

        if !self.device_profile.memory_gb.is_finite() || self.device_profile.memory_gb <= 0.0 {
            return Err(PipelineError::ValidationFailed(
                "device_profile.memory_gb MUST be > 0".to_string(),
            ));
        }
        if self.device_profile.core_count == 0 {
            return Err(PipelineError::ValidationFailed(
                "device_profile.core_count MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("memory_freed_mb", self.memory_freed_mb),
            ("speed_gain_percent", self.speed_gain_percent),
            (
                "context.system_load.memory_pressure",
                self.context.system_load.memory_pressure,
            ),
            (
                "context.system_load.cpu_usage_percent",
                self.context.system_load.cpu_usage_percent,
            ),
        ] {
            if !value.is_finite() {
                return Err(PipelineError::ValidationFailed(format!(
                    "{name} MUST be finite"
                )));
            }
        }

        require_unit_interval("effectiveness_score", self.effectiveness_score)?;
        require_unit_interval(
            "trust.validation_confidence",
            self.trust.validation_confidence,
        )?;

        if self.context.time_of_day > 23 {
            return Err(PipelineError::ValidationFailed(
                "context.time_of_day MUST be in [0, 23]".to_string(),
            ));
        }
        if self.context.day_of_week > 6 {
            return Err(PipelineError::ValidationFailed(
                "context.day_of_week MUST be in [0, 6]".to_string(),
            ));
        }

        for app in &self.app_optimizations {
            require_non_empty("app_optimizations.app_category", &app.app_category)?;
            if !app.memory_freed_mb.is_finite() {
                return Err(PipelineError::ValidationFailed(
                    "app_optimizations.memory_freed_mb MUST be finite".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Shapes a validated optimization run into a telemetry observation.
    #[must_use]
    pub fn from_benchmark(
        meta: SessionMeta,
        before: &PerformanceSnapshot,
        after: &PerformanceSnapshot,
        result: &OptimizationResult,
        benchmark: &OptimizationBenchmark,
    ) -> Self {
        let effectiveness = &benchmark.effectiveness;
        Self {
            session_id: meta.session_id,
            device_id: meta.device_id,
            user_id: meta.user_id,
            device_profile: meta.device_profile,
            strategy: meta.strategy,
            target_app: meta.target_app,
            memory_freed_mb: effectiveness.memory_improvement_mb,
            speed_gain_percent: effectiveness.speed_improvement,
            effectiveness_score: crate::clamp(effectiveness.user_experience_score / 100.0, 0.0, 1.0),
            context: meta.context,
            app_optimizations: meta.app_optimizations,
            state_before: serde_json::to_value(before).unwrap_or(Value::Null),
            state_after: serde_json::to_value(after).unwrap_or(Value::Null),
            errors: result.errors.clone(),
            trust: TelemetryTrust {
                validation_confidence: benchmark.confidence,
                validated: benchmark.passed,
                score_estimated: before.estimated || after.estimated,
            },
            occurred_at: meta.occurred_at,
        }
    }
}

/// Session identity and context supplied by the client alongside raw metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMeta {
    pub session_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub device_profile: DeviceProfile,
    pub strategy: String,
    pub target_app: Option<String>,
    pub context: OptimizationContext,
    #[serde(default)]
    pub app_optimizations: Vec<AppOptimization>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    pub telemetry_seq: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(flatten)]
    pub observation: TelemetryObservation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted { record: TelemetryRecord },
    Duplicate { session_id: String, telemetry_seq: i64 },
}

impl IngestOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn must_utc(value: &str) -> OffsetDateTime {
        match crate::parse_rfc3339_utc(value) {
            Ok(parsed) => parsed,
            Err(err) => panic!("invalid fixture timestamp: {err}"),
        }
    }

    pub(crate) fn observation(
        session_id: &str,
        strategy: &str,
        effectiveness: f64,
        memory_freed_mb: f64,
    ) -> TelemetryObservation {
        TelemetryObservation {
            session_id: session_id.to_string(),
            device_id: "device-1".to_string(),
            user_id: None,
            device_profile: DeviceProfile {
                architecture: ArchitectureClass::AppleSilicon,
                memory_gb: 16.0,
                core_count: 8,
            },
            strategy: strategy.to_string(),
            target_app: None,
            memory_freed_mb,
            speed_gain_percent: 10.0,
            effectiveness_score: effectiveness,
            context: OptimizationContext {
                time_of_day: 14,
                day_of_week: 2,
                system_load: SystemLoad {
                    memory_pressure: 2.0,
                    cpu_usage_percent: 35.0,
                },
            },
            app_optimizations: Vec::new(),
            state_before: Value::Null,
            state_after: Value::Null,
            errors: Vec::new(),
            trust: TelemetryTrust {
                validation_confidence: 1.0,
                validated: true,
                score_estimated: false,
            },
            occurred_at: must_utc("2026-02-07T12:00:00Z"),
        }
    }
}
