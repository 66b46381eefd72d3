//! Strategy update and canary state machines.
//!
//! The functions here decide whether a transition is legal. Persisting it is
//! the store's job, which must re-check the expected status in the same
//! conditional write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use ulid::Ulid;

use crate::config::{CanaryPolicy, GatingPolicy};
use crate::{require_non_empty, require_unit_interval, PipelineError};

pub const DEFAULT_BASE_STRATEGY_VERSION: &str = "1.0.0";
pub const DEFAULT_SAFETY_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Pending,
    Approved,
    Testing,
    Deployed,
    Rejected,
    RolledBack,
}

impl StrategyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Testing => "testing",
            Self::Deployed => "deployed",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "testing" => Some(Self::Testing),
            "deployed" => Some(Self::Deployed),
            "rejected" => Some(Self::Rejected),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::RolledBack)
    }

    /// Resolves the status reached by applying `action`.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidTransition`] carrying the unchanged
    /// current status when `action` is not allowed from `self`.
    pub fn next(self, action: LifecycleAction) -> Result<Self, PipelineError> {
        match (self, action) {
            (Self::Pending, LifecycleAction::Approve) => Ok(Self::Approved),
            (Self::Pending, LifecycleAction::Reject) => Ok(Self::Rejected),
            (Self::Approved, LifecycleAction::OpenCanary) => Ok(Self::Testing),
            (Self::Testing, LifecycleAction::CompleteCanary) => Ok(Self::Deployed),
            (Self::Testing, LifecycleAction::AbortCanary)
            | (Self::Testing | Self::Deployed, LifecycleAction::Rollback) => Ok(Self::RolledBack),
            _ => Err(PipelineError::InvalidTransition {
                current: self.as_str().to_string(),
                requested: action.as_str().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Approve,
    Reject,
    OpenCanary,
    CompleteCanary,
    AbortCanary,
    Rollback,
}

impl LifecycleAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::OpenCanary => "open_canary",
            Self::CompleteCanary => "complete_canary",
            Self::AbortCanary => "abort_canary",
            Self::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    #[must_use]
    pub fn action(self) -> LifecycleAction {
        match self {
            Self::Approve => LifecycleAction::Approve,
            Self::Reject => LifecycleAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Risk implied by the kind of change when the proposer does not declare one.
#[must_use]
pub fn assess_risk_level(
    update_type: &str,
    strategy_type: &str,
    estimated_memory_savings_mb: Option<f64>,
) -> RiskLevel {
    let new_action = update_type == "new_action";
    let aggressive = strategy_type == "aggressive";
    let savings = estimated_memory_savings_mb
        .filter(|value| value.is_finite())
        .unwrap_or(0.0);

    if (new_action && aggressive) || savings > 2000.0 {
        RiskLevel::High
    } else if new_action || aggressive || savings > 500.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyEvidence {
    pub sample_size: u32,
    pub confidence_score: f64,
    pub statistical_significance: bool,
    pub consistency_period_days: u32,
    pub risk_level: RiskLevel,
    pub safety_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatingReport {
    pub passed: bool,
    pub failed_checks: Vec<String>,
    pub min_safety_required: f64,
}

/// Evaluates every evidence threshold and reports each one that fails.
#[must_use]
pub fn evaluate_gating(evidence: &StrategyEvidence, policy: &GatingPolicy) -> GatingReport {
    let min_safety_required = policy.min_safety_for(evidence.risk_level);
    let mut failed_checks = Vec::new();

    if evidence.confidence_score < policy.min_confidence {
        failed_checks.push("gating.confidence_below_threshold".to_string());
    }
    if !evidence.statistical_significance {
        failed_checks.push("gating.not_statistically_significant".to_string());
    }
    if evidence.sample_size < policy.min_sample_size {
        failed_checks.push("gating.sample_size_below_minimum".to_string());
    }
    if evidence.safety_score < min_safety_required {
        failed_checks.push("gating.safety_below_risk_threshold".to_string());
    }

    GatingReport {
        passed: failed_checks.is_empty(),
        failed_checks,
        min_safety_required,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyUpdateInput {
    pub app_id: String,
    pub strategy_type: String,
    pub update_type: String,
    pub version: String,
    #[serde(default)]
    pub base_strategy_version: Option<String>,
    pub update_data: Value,
    #[serde(default)]
    pub estimated_impact: Value,
    pub sample_size: u32,
    pub confidence_score: f64,
    #[serde(default)]
    pub statistical_significance: Option<bool>,
    #[serde(default)]
    pub consistency_period_days: u32,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub safety_score: Option<f64>,
}

impl StrategyUpdateInput {
    /// # Errors
    /// Returns [`PipelineError::ValidationFailed`] when identity fields are
    /// blank, evidence is out of range, or the payload is not a JSON object.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_non_empty("app_id", &self.app_id)?;
        require_non_empty("strategy_type", &self.strategy_type)?;
        require_non_empty("update_type", &self.update_type)?;
        require_non_empty("version", &self.version)?;
        if let Some(base) = &self.base_strategy_version {
            require_non_empty("base_strategy_version", base)?;
        }
        require_unit_interval("confidence_score", self.confidence_score)?;
        if let Some(safety) = self.safety_score {
            require_unit_interval("safety_score", safety)?;
        }
        if !self.update_data.is_object() {
            return Err(PipelineError::ValidationFailed(
                "update_data MUST be a JSON object".to_string(),
            ));
        }
        if !(self.estimated_impact.is_object() || self.estimated_impact.is_null()) {
            return Err(PipelineError::ValidationFailed(
                "estimated_impact MUST be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Fills evidence defaults: significance from confidence and sample size,
    /// risk from the kind of change, and a neutral safety score.
    #[must_use]
    pub fn resolve_evidence(&self) -> StrategyEvidence {
        let statistical_significance = self
            .statistical_significance
            .unwrap_or(self.confidence_score >= 0.95 && self.sample_size >= 100);
        let risk_level = self.risk_level.unwrap_or_else(|| {
            assess_risk_level(
                &self.update_type,
                &self.strategy_type,
                self.estimated_impact
                    .get("memory_savings_mb")
                    .and_then(Value::as_f64),
            )
        });

        StrategyEvidence {
            sample_size: self.sample_size,
            confidence_score: self.confidence_score,
            statistical_significance,
            consistency_period_days: self.consistency_period_days,
            risk_level,
            safety_score: self.safety_score.unwrap_or(DEFAULT_SAFETY_SCORE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyUpdate {
    pub id: Ulid,
    pub app_id: String,
    pub strategy_type: String,
    pub update_type: String,
    pub version: String,
    pub base_strategy_version: String,
    pub update_data: Value,
    pub estimated_impact: Value,
    pub evidence: StrategyEvidence,
    pub status: StrategyStatus,
    pub reviewed_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
    pub approval_notes: Option<String>,
    pub deployment_phase: Option<String>,
    pub gating_config_version: Option<u32>,
    pub rollback_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rolled_back_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CanaryStatus {
    Ready,
    Running,
    Completed,
    Aborted,
}

impl CanaryStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// # Errors
    /// Returns [`PipelineError::InvalidTransition`] when `action` is not
    /// allowed from `self`.
    pub fn next(self, action: CanaryAction) -> Result<Self, PipelineError> {
        match (self, action) {
            (Self::Ready, CanaryAction::Start) | (Self::Running, CanaryAction::Advance) => {
                Ok(Self::Running)
            }
            (Self::Ready | Self::Running, CanaryAction::Stop)
            | (Self::Running, CanaryAction::Fail) => Ok(Self::Aborted),
            (Self::Running, CanaryAction::Complete) => Ok(Self::Completed),
            _ => Err(PipelineError::InvalidTransition {
                current: self.as_str().to_string(),
                requested: action.as_str().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CanaryAction {
    Start,
    Advance,
    Stop,
    Complete,
    Fail,
}

impl CanaryAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Advance => "advance",
            Self::Stop => "stop",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }
}

/// Rollout label for the share of users a canary currently reaches.
#[must_use]
pub fn deployment_phase_for(user_percentage: f64) -> &'static str {
    if user_percentage <= 0.001 {
        "canary"
    } else if user_percentage <= 0.01 {
        "limited"
    } else if user_percentage <= 0.5 {
        "gradual"
    } else {
        "full"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryResults {
    pub effectiveness: f64,
    pub user_satisfaction: f64,
    pub stability: f64,
    pub crash_rate: f64,
    #[serde(default)]
    pub sample_size: u32,
}

impl CanaryResults {
    /// # Errors
    /// Returns [`PipelineError::ValidationFailed`] when a rate is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_unit_interval("effectiveness", self.effectiveness)?;
        require_unit_interval("user_satisfaction", self.user_satisfaction)?;
        require_unit_interval("stability", self.stability)?;
        require_unit_interval("crash_rate", self.crash_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanaryVerdict {
    pub clean: bool,
    pub failed_checks: Vec<String>,
}

/// Results are clean when every success target is met and no rollback trigger fires.
#[must_use]
pub fn evaluate_canary_results(results: &CanaryResults, policy: &CanaryPolicy) -> CanaryVerdict {
    let success = &policy.success_thresholds;
    let triggers = &policy.rollback_triggers;
    let mut failed_checks = Vec::new();

    if results.effectiveness < success.effectiveness {
        failed_checks.push("canary.effectiveness_below_target".to_string());
    }
    if results.user_satisfaction < success.user_satisfaction {
        failed_checks.push("canary.user_satisfaction_below_target".to_string());
    }
    if results.stability < success.stability {
        failed_checks.push("canary.stability_below_target".to_string());
    }
    if results.crash_rate > triggers.max_crash_rate {
        failed_checks.push("rollback.crash_rate_exceeded".to_string());
    }
    if results.user_satisfaction < triggers.min_user_satisfaction {
        failed_checks.push("rollback.user_satisfaction_floor".to_string());
    }
    if results.effectiveness < triggers.min_effectiveness {
        failed_checks.push("rollback.effectiveness_floor".to_string());
    }

    CanaryVerdict {
        clean: failed_checks.is_empty(),
        failed_checks,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryRun {
    pub id: Ulid,
    pub strategy_update_id: Ulid,
    pub test_name: String,
    pub status: CanaryStatus,
    pub current_phase: u32,
    pub user_percentage: f64,
    /// Policy snapshot taken when the canary was opened.
    pub policy: CanaryPolicy,
    pub results: Option<CanaryResults>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CanaryRun {
    #[must_use]
    pub fn deployment_phase(&self) -> &'static str {
        deployment_phase_for(self.user_percentage)
    }

    /// Index and share of the next rollout phase, if any remains.
    #[must_use]
    pub fn next_phase(&self) -> Option<(u32, f64)> {
        let next = self.current_phase.checked_add(1)?;
        let index = usize::try_from(next).ok()?;
        self.policy.rollout_phases.get(index).map(|share| (next, *share))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Critical,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Append-only audit entry for a strategy update or its canary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentLog {
    pub id: Ulid,
    pub strategy_update_id: Ulid,
    pub canary_id: Option<Ulid>,
    pub event: String,
    pub level: LogLevel,
    pub message: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub actor: Option<String>,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
