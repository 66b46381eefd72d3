//! Domain core for the optimization strategy pipeline.
//!
//! Everything here is deterministic and storage-agnostic: scoring raw device
//! metrics, validating optimization benchmarks, shaping telemetry, folding
//! telemetry into intelligence, and the strategy/canary state machines that
//! the durable store drives with compare-and-swap writes.

pub mod config;
pub mod intelligence;
pub mod lifecycle;
pub mod scoring;
pub mod telemetry;
pub mod validation;

use time::{Duration, OffsetDateTime, UtcOffset};

pub use config::{
    AggregationConfig, CanaryPolicy, GatingPolicy, PipelineConfig, RetentionPolicy,
    RollbackTriggers, SuccessThresholds, ValidationThresholds,
};
pub use intelligence::{
    day_bucket_version, profile_key, AggregatedIntelligence, IntelligenceAccumulator,
    IntelligenceType, SupportedApp, SupportedAppInput, GLOBAL_INTELLIGENCE_KEY,
};
pub use lifecycle::{
    assess_risk_level, deployment_phase_for, evaluate_canary_results, evaluate_gating,
    CanaryAction, CanaryResults, CanaryRun, CanaryStatus, CanaryVerdict, DeploymentLog,
    GatingReport, LifecycleAction, LogLevel, ReviewDecision, RiskLevel, StrategyEvidence,
    StrategyStatus, StrategyUpdate, StrategyUpdateInput, DEFAULT_BASE_STRATEGY_VERSION,
};
pub use scoring::{
    Bottleneck, ComponentScores, EffectivenessScorer, PerformanceSnapshot, RawMetrics, Trend,
};
pub use telemetry::{
    AppOptimization, ArchitectureClass, DeviceProfile, IngestOutcome, OptimizationContext,
    SessionMeta, SystemLoad, TelemetryObservation, TelemetryRecord, TelemetryTrust,
};
pub use validation::{
    run_system_benchmark, summarize_benchmarks, validate_optimization, BenchmarkAnalytics,
    BenchmarkProbe, OptimizationBenchmark, OptimizationEffectiveness, OptimizationResult,
    SubTestResult, SystemBenchmark, ValidationCheck,
};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid transition: status {current} does not allow {requested}")]
    InvalidTransition { current: String, requested: String },
    #[error("gating failed with status {current}: {}", failed_checks.join(", "))]
    GatingFailed {
        current: String,
        failed_checks: Vec<String>,
    },
    #[error(
        "conflicting canary: strategy update {strategy_update_id} already has active canary {canary_id}"
    )]
    ConflictingCanary {
        strategy_update_id: String,
        canary_id: String,
    },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::GatingFailed { .. } => "gating_failed",
            Self::ConflictingCanary { .. } => "conflicting_canary",
            Self::Timeout(_) => "timeout",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Status the entity still holds after a rejected transition, when known.
    #[must_use]
    pub fn current_status(&self) -> Option<&str> {
        match self {
            Self::InvalidTransition { current, .. } | Self::GatingFailed { current, .. } => {
                Some(current)
            }
            _ => None,
        }
    }
}

/// Parses an RFC3339 timestamp and requires UTC offset.
///
/// # Errors
/// Returns [`PipelineError::ValidationFailed`] when parsing fails or the
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, PipelineError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| PipelineError::ValidationFailed(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(PipelineError::ValidationFailed(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`PipelineError::ValidationFailed`] if formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, PipelineError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            PipelineError::ValidationFailed(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn days_before(instant: OffsetDateTime, days: u32) -> OffsetDateTime {
    instant - Duration::days(i64::from(days))
}

/// `min(samples / full_confidence_samples, 1)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sample_confidence(samples: usize, full_confidence_samples: u32) -> f64 {
    if full_confidence_samples == 0 {
        return 1.0;
    }
    (samples as f64 / f64::from(full_confidence_samples)).min(1.0)
}

#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

pub(crate) fn require_non_empty(name: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::ValidationFailed(format!("{name} MUST be non-empty")));
    }
    Ok(())
}

pub(crate) fn require_unit_interval(name: &str, value: f64) -> Result<(), PipelineError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::ValidationFailed(format!(
            "{name} MUST be in [0.0, 1.0]"
        )));
    }
    Ok(())
}
