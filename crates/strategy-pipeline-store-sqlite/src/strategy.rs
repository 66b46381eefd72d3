use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{json, Value};
use strategy_pipeline_core::{
    evaluate_gating, format_rfc3339, now_utc, CanaryAction, DeploymentLog, LifecycleAction,
    LogLevel, PipelineError, ReviewDecision, RiskLevel, StrategyStatus, StrategyUpdate,
    StrategyUpdateInput, DEFAULT_BASE_STRATEGY_VERSION,
};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::canary::{active_canary, cas_canary, CanaryWrite};
use crate::rows::{
    parse_deployment_log_row, parse_strategy_update_row, DEPLOYMENT_LOG_COLUMNS,
    STRATEGY_UPDATE_COLUMNS,
};
use crate::{bool_to_sql, collect_rows, limit_to_sql, sql_timestamp, SqliteStrategyStore};

pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub reviewer: String,
    pub notes: Option<String>,
    pub deployment_phase: Option<String>,
}

impl ReviewRequest {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.reviewer.trim().is_empty() {
            return Err(PipelineError::ValidationFailed(
                "reviewer MUST be non-empty".to_string(),
            ));
        }
        let has_notes = self.notes.as_deref().is_some_and(|notes| !notes.trim().is_empty());
        if self.decision == ReviewDecision::Reject && !has_notes {
            return Err(PipelineError::ValidationFailed(
                "a rejection MUST record a reason in notes".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRequest {
    pub reason: String,
    pub emergency: bool,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingFilter {
    pub risk_level: Option<RiskLevel>,
    pub app_id: Option<String>,
    pub limit: Option<usize>,
}

/// Audit columns written alongside a status change. `None` keeps the stored value.
#[derive(Debug, Default)]
pub(crate) struct StatusAudit<'a> {
    pub(crate) reviewed_by: Option<&'a str>,
    pub(crate) reviewed_at: Option<&'a str>,
    pub(crate) approval_notes: Option<String>,
    pub(crate) deployment_phase: Option<&'a str>,
    pub(crate) gating_config_version: Option<u32>,
    pub(crate) rollback_reason: Option<&'a str>,
    pub(crate) rolled_back_at: Option<&'a str>,
}

pub(crate) struct LogEntry<'a> {
    pub(crate) strategy_update_id: Ulid,
    pub(crate) canary_id: Option<Ulid>,
    pub(crate) event: &'a str,
    pub(crate) level: LogLevel,
    pub(crate) message: String,
    pub(crate) from_status: Option<&'a str>,
    pub(crate) to_status: Option<&'a str>,
    pub(crate) actor: Option<&'a str>,
    pub(crate) data: Value,
}

impl SqliteStrategyStore {
    pub fn propose_strategy_update(&mut self, input: &StrategyUpdateInput) -> Result<StrategyUpdate> {
        input.validate()?;

        let evidence = input.resolve_evidence();
        let base_strategy_version = input
            .base_strategy_version
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_STRATEGY_VERSION.to_string());
        let estimated_impact = if input.estimated_impact.is_null() {
            json!({})
        } else {
            input.estimated_impact.clone()
        };
        let id = Ulid::new();
        let now = sql_timestamp(now_utc())?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start proposal transaction")?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT strategy_update_id FROM strategy_updates
                 WHERE app_id = ?1 AND strategy_type = ?2 AND version = ?3",
                params![input.app_id, input.strategy_type, input.version],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check for an existing strategy update version")?;
        if let Some(existing_id) = existing {
            return Err(PipelineError::ValidationFailed(format!(
                "strategy update {}/{}/{} already exists as {existing_id}; resubmit under a new version",
                input.app_id, input.strategy_type, input.version
            ))
            .into());
        }

        tx.execute(
            "INSERT INTO strategy_updates(
                strategy_update_id, app_id, strategy_type, update_type, version,
                base_strategy_version, update_data_json, estimated_impact_json,
                sample_size, confidence_score, statistical_significance,
                consistency_period_days, risk_level, safety_score, status,
                created_at, updated_at
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8,
                ?9, ?10, ?11,
                ?12, ?13, ?14, ?15,
                ?16, ?16
             )",
            params![
                id.to_string(),
                input.app_id,
                input.strategy_type,
                input.update_type,
                input.version,
                base_strategy_version,
                serde_json::to_string(&input.update_data)
                    .context("failed to serialize update_data")?,
                serde_json::to_string(&estimated_impact)
                    .context("failed to serialize estimated_impact")?,
                i64::from(evidence.sample_size),
                evidence.confidence_score,
                bool_to_sql(evidence.statistical_significance),
                i64::from(evidence.consistency_period_days),
                evidence.risk_level.as_str(),
                evidence.safety_score,
                StrategyStatus::Pending.as_str(),
                now,
            ],
        )
        .context("failed to insert strategy update")?;

        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id: id,
                canary_id: None,
                event: "proposed",
                level: LogLevel::Info,
                message: format!("strategy update {} proposed", input.version),
                from_status: None,
                to_status: Some(StrategyStatus::Pending.as_str()),
                actor: None,
                data: json!({ "evidence": evidence }),
            },
            &now,
        )?;

        let created = load_strategy_update(&tx, id)?;
        tx.commit().context("failed to commit proposal transaction")?;

        tracing::info!(
            strategy_update_id = %id,
            app_id = %created.app_id,
            version = %created.version,
            risk_level = created.evidence.risk_level.as_str(),
            "strategy update proposed"
        );
        Ok(created)
    }

    pub fn get_strategy_update(&self, id: Ulid) -> Result<StrategyUpdate> {
        load_strategy_update(&self.conn, id)
    }

    /// Pending review queue, newest proposals first.
    pub fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<StrategyUpdate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STRATEGY_UPDATE_COLUMNS}
             FROM strategy_updates
             WHERE status = 'pending'
               AND (?1 IS NULL OR risk_level = ?1)
               AND (?2 IS NULL OR app_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![
                filter.risk_level.map(RiskLevel::as_str),
                filter.app_id,
                limit_to_sql(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
            ],
            parse_strategy_update_row,
        )?;
        collect_rows(rows)
    }

    /// Review history, most recently reviewed first.
    pub fn list_reviewed(&self, limit: Option<usize>) -> Result<Vec<StrategyUpdate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STRATEGY_UPDATE_COLUMNS}
             FROM strategy_updates
             WHERE reviewed_at IS NOT NULL
             ORDER BY reviewed_at DESC, rowid DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(
            params![limit_to_sql(limit.unwrap_or(DEFAULT_LIST_LIMIT))],
            parse_strategy_update_row,
        )?;
        collect_rows(rows)
    }

    /// Approves or rejects a pending update.
    ///
    /// Approval runs the evidence gate under the active config. A gate failure
    /// is logged and surfaced with every failed check; the status stays
    /// `pending`.
    pub fn review_strategy_update(
        &mut self,
        id: Ulid,
        request: &ReviewRequest,
    ) -> Result<StrategyUpdate> {
        request.validate()?;
        let gating = self.config.gating.clone();
        let config_version = self.config.config_version;
        let action = request.decision.action();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start review transaction")?;

        let current = load_strategy_update(&tx, id)?;
        current.status.next(action)?;
        let now = sql_timestamp(now_utc())?;

        if request.decision == ReviewDecision::Approve {
            let report = evaluate_gating(&current.evidence, &gating);
            if !report.passed {
                append_deployment_log(
                    &tx,
                    &LogEntry {
                        strategy_update_id: id,
                        canary_id: None,
                        event: "gating_failed",
                        level: LogLevel::Warning,
                        message: format!("approval blocked: {}", report.failed_checks.join(", ")),
                        from_status: Some(current.status.as_str()),
                        to_status: Some(current.status.as_str()),
                        actor: Some(&request.reviewer),
                        data: json!({
                            "failed_checks": report.failed_checks,
                            "min_safety_required": report.min_safety_required,
                            "config_version": config_version,
                        }),
                    },
                    &now,
                )?;
                tx.commit().context("failed to commit gating failure log")?;

                tracing::warn!(
                    strategy_update_id = %id,
                    failed_checks = ?report.failed_checks,
                    "approval blocked by gating"
                );
                return Err(PipelineError::GatingFailed {
                    current: current.status.as_str().to_string(),
                    failed_checks: report.failed_checks,
                }
                .into());
            }
        }

        let next = cas_strategy_status(
            &tx,
            &current,
            action,
            &StatusAudit {
                reviewed_by: Some(&request.reviewer),
                reviewed_at: Some(&now),
                approval_notes: request.notes.clone(),
                deployment_phase: request.deployment_phase.as_deref(),
                gating_config_version: (request.decision == ReviewDecision::Approve)
                    .then_some(config_version),
                ..StatusAudit::default()
            },
            &now,
        )?;

        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id: id,
                canary_id: None,
                event: next.as_str(),
                level: LogLevel::Info,
                message: format!("strategy update {} by {}", next.as_str(), request.reviewer),
                from_status: Some(current.status.as_str()),
                to_status: Some(next.as_str()),
                actor: Some(&request.reviewer),
                data: json!({
                    "notes": request.notes,
                    "deployment_phase": request.deployment_phase,
                }),
            },
            &now,
        )?;

        let reviewed = load_strategy_update(&tx, id)?;
        tx.commit().context("failed to commit review transaction")?;

        tracing::info!(
            strategy_update_id = %id,
            from = current.status.as_str(),
            to = next.as_str(),
            reviewer = %request.reviewer,
            "strategy update reviewed"
        );
        Ok(reviewed)
    }

    /// Rolls back a testing or deployed update and aborts its live canary.
    pub fn rollback_strategy_update(
        &mut self,
        id: Ulid,
        request: &RollbackRequest,
    ) -> Result<StrategyUpdate> {
        if request.reason.trim().is_empty() {
            return Err(PipelineError::ValidationFailed(
                "rollback reason MUST be non-empty".to_string(),
            )
            .into());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start rollback transaction")?;

        let current = load_strategy_update(&tx, id)?;
        let next = current.status.next(LifecycleAction::Rollback)?;
        let now_instant = now_utc();
        let now = sql_timestamp(now_instant)?;
        let actor = request.actor.as_deref();

        if let Some(canary) = active_canary(&tx, id)? {
            cas_canary(
                &tx,
                &canary,
                CanaryAction::Stop,
                &CanaryWrite {
                    current_phase: canary.current_phase,
                    user_percentage: canary.user_percentage,
                    results_json: None,
                    started_at: None,
                    ended_at: Some(&now),
                },
                &now,
            )?;
            append_deployment_log(
                &tx,
                &LogEntry {
                    strategy_update_id: id,
                    canary_id: Some(canary.id),
                    event: "canary_aborted",
                    level: LogLevel::Warning,
                    message: format!("canary {} aborted by rollback", canary.test_name),
                    from_status: Some(canary.status.as_str()),
                    to_status: Some("aborted"),
                    actor,
                    data: json!({ "reason": request.reason }),
                },
                &now,
            )?;
        }

        cas_strategy_status(
            &tx,
            &current,
            LifecycleAction::Rollback,
            &StatusAudit {
                approval_notes: Some(append_rollback_note(
                    current.approval_notes.as_deref(),
                    now_instant,
                    &request.reason,
                )?),
                rollback_reason: Some(&request.reason),
                rolled_back_at: Some(&now),
                ..StatusAudit::default()
            },
            &now,
        )?;

        let (event, level) = if request.emergency {
            ("emergency_rollback", LogLevel::Critical)
        } else {
            ("planned_rollback", LogLevel::Warning)
        };
        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id: id,
                canary_id: None,
                event,
                level,
                message: format!("strategy update rolled back: {}", request.reason),
                from_status: Some(current.status.as_str()),
                to_status: Some(next.as_str()),
                actor,
                data: json!({ "reason": request.reason, "emergency": request.emergency }),
            },
            &now,
        )?;

        let rolled_back = load_strategy_update(&tx, id)?;
        tx.commit().context("failed to commit rollback transaction")?;

        tracing::warn!(
            strategy_update_id = %id,
            from = current.status.as_str(),
            emergency = request.emergency,
            reason = %request.reason,
            "strategy update rolled back"
        );
        Ok(rolled_back)
    }

    /// Audit trail of one update in append order.
    pub fn list_deployment_logs(&self, strategy_update_id: Ulid) -> Result<Vec<DeploymentLog>> {
        load_strategy_update(&self.conn, strategy_update_id)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DEPLOYMENT_LOG_COLUMNS}
             FROM deployment_logs
             WHERE strategy_update_id = ?1
             ORDER BY log_seq ASC"
        ))?;
        let rows = stmt.query_map(
            params![strategy_update_id.to_string()],
            parse_deployment_log_row,
        )?;
        collect_rows(rows)
    }
}

pub(crate) fn load_strategy_update(conn: &Connection, id: Ulid) -> Result<StrategyUpdate> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {STRATEGY_UPDATE_COLUMNS} FROM strategy_updates WHERE strategy_update_id = ?1"
            ),
            params![id.to_string()],
            parse_strategy_update_row,
        )
        .optional()
        .context("failed to read strategy update")?;

    found.ok_or_else(|| PipelineError::NotFound(format!("strategy update {id}")).into())
}

/// Moves `current` along `action` only if the stored status still equals
/// `current.status`. A lost race surfaces the status the winner left behind.
pub(crate) fn cas_strategy_status(
    conn: &Connection,
    current: &StrategyUpdate,
    action: LifecycleAction,
    audit: &StatusAudit<'_>,
    now: &str,
) -> Result<StrategyStatus> {
    let next = current.status.next(action)?;
    let changed = conn
        .execute(
            "UPDATE strategy_updates SET
               status = ?1,
               reviewed_by = COALESCE(?2, reviewed_by),
               reviewed_at = COALESCE(?3, reviewed_at),
               approval_notes = COALESCE(?4, approval_notes),
               deployment_phase = COALESCE(?5, deployment_phase),
               gating_config_version = COALESCE(?6, gating_config_version),
               rollback_reason = COALESCE(?7, rollback_reason),
               rolled_back_at = COALESCE(?8, rolled_back_at),
               updated_at = ?9
             WHERE strategy_update_id = ?10 AND status = ?11",
            params![
                next.as_str(),
                audit.reviewed_by,
                audit.reviewed_at,
                audit.approval_notes,
                audit.deployment_phase,
                audit.gating_config_version.map(i64::from),
                audit.rollback_reason,
                audit.rolled_back_at,
                now,
                current.id.to_string(),
                current.status.as_str(),
            ],
        )
        .context("failed to update strategy update status")?;

    if changed == 0 {
        let latest = load_strategy_update(conn, current.id)?;
        return Err(PipelineError::InvalidTransition {
            current: latest.status.as_str().to_string(),
            requested: action.as_str().to_string(),
        }
        .into());
    }

    Ok(next)
}

/// Updates the rollout label of an update that is still in `testing`.
pub(crate) fn set_deployment_phase(
    conn: &Connection,
    strategy_update_id: Ulid,
    deployment_phase: &str,
    now: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE strategy_updates SET deployment_phase = ?1, updated_at = ?2
         WHERE strategy_update_id = ?3 AND status = 'testing'",
        params![deployment_phase, now, strategy_update_id.to_string()],
    )
    .context("failed to update deployment phase")?;
    Ok(())
}

pub(crate) fn append_deployment_log(conn: &Connection, entry: &LogEntry<'_>, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO deployment_logs(
            log_id, strategy_update_id, ab_test_id, event, log_level, message,
            from_status, to_status, actor, data_json, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            Ulid::new().to_string(),
            entry.strategy_update_id.to_string(),
            entry.canary_id.map(|id| id.to_string()),
            entry.event,
            entry.level.as_str(),
            entry.message,
            entry.from_status,
            entry.to_status,
            entry.actor,
            serde_json::to_string(&entry.data).context("failed to serialize log data")?,
            now,
        ],
    )
    .context("failed to append deployment log")?;
    Ok(())
}

pub(crate) fn append_rollback_note(
    existing: Option<&str>,
    at: OffsetDateTime,
    reason: &str,
) -> Result<String> {
    let note = format!("ROLLBACK {}: {reason}", format_rfc3339(at)?);
    Ok(match existing {
        Some(notes) if !notes.trim().is_empty() => format!("{notes}\n{note}"),
        _ => note,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Barrier};

    use rusqlite::params;
    use strategy_pipeline_core::{
        CanaryResults, CanaryStatus, LogLevel, PipelineError, ReviewDecision, RiskLevel,
        StrategyStatus, StrategyUpdate,
    };
    use ulid::Ulid;

    use super::{PendingFilter, ReviewRequest, RollbackRequest};
    use crate::test_support::{fixture_store, must, proposal};
    use crate::{pipeline_error, SqliteStrategyStore};

    fn approve(reviewer: &str) -> ReviewRequest {
        ReviewRequest {
            decision: ReviewDecision::Approve,
            reviewer: reviewer.to_string(),
            notes: Some("evidence reviewed".to_string()),
            deployment_phase: None,
        }
    }

    fn rollback(reason: &str, emergency: bool) -> RollbackRequest {
        RollbackRequest {
            reason: reason.to_string(),
            emergency,
            actor: Some("oncall".to_string()),
        }
    }

    fn typed_error<T: std::fmt::Debug>(result: anyhow::Result<T>) -> PipelineError {
        match result {
            Ok(value) => panic!("expected error, got {value:?}"),
            Err(err) => match pipeline_error(&err) {
                Some(typed) => typed,
                None => panic!("untyped error: {err:#}"),
            },
        }
    }

    fn clean_results() -> CanaryResults {
        CanaryResults {
            effectiveness: 0.9,
            user_satisfaction: 0.85,
            stability: 0.99,
            crash_rate: 0.001,
            sample_size: 400,
        }
    }

    fn approved_update(store: &mut SqliteStrategyStore, version: &str) -> StrategyUpdate {
        let proposed = must(store.propose_strategy_update(&proposal(version)));
        must(store.review_strategy_update(proposed.id, &approve("alice")))
    }

    fn testing_update(store: &mut SqliteStrategyStore, version: &str) -> StrategyUpdate {
        let approved = approved_update(store, version);
        let opened = must(store.open_canary(approved.id, None));
        opened.strategy_update
    }

    fn deployed_update(store: &mut SqliteStrategyStore, version: &str) -> StrategyUpdate {
        let approved = approved_update(store, version);
        let opened = must(store.open_canary(approved.id, None));
        let _ = must(store.start_canary(opened.canary.id));
        let completed = must(store.complete_canary(opened.canary.id, &clean_results()));
        completed.strategy_update
    }

    fn rejected_update(store: &mut SqliteStrategyStore, version: &str) -> StrategyUpdate {
        let proposed = must(store.propose_strategy_update(&proposal(version)));
        must(store.review_strategy_update(
            proposed.id,
            &ReviewRequest {
                decision: ReviewDecision::Reject,
                reviewer: "bob".to_string(),
                notes: Some("insufficient evidence".to_string()),
                deployment_phase: None,
            },
        ))
    }

    #[test]
    fn proposal_fills_defaults_and_logs_creation() {
        let mut store = fixture_store();
        let mut input = proposal("v2");
        input.risk_level = None;
        input.safety_score = None;
        input.strategy_type = "aggressive".to_string();

        let created = must(store.propose_strategy_update(&input));
        assert_eq!(created.status, StrategyStatus::Pending);
        assert_eq!(created.base_strategy_version, "1.0.0");
        assert_eq!(created.evidence.risk_level, RiskLevel::Medium);
        assert!((created.evidence.safety_score - 0.5).abs() < f64::EPSILON);
        assert_eq!(must(store.get_strategy_update(created.id)), created);

        let logs = must(store.list_deployment_logs(created.id));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event, "proposed");
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let mut store = fixture_store();
        let _ = must(store.propose_strategy_update(&proposal("v2")));
        let err = typed_error(store.propose_strategy_update(&proposal("v2")));
        assert!(matches!(err, PipelineError::ValidationFailed(message) if message.contains("new version")));
        let _ = must(store.propose_strategy_update(&proposal("v3")));
    }

    #[test]
    fn unknown_update_is_not_found() {
        let mut store = fixture_store();
        let id = Ulid::new();
        assert_eq!(typed_error(store.get_strategy_update(id)).code(), "not_found");
        assert_eq!(
            typed_error(store.review_strategy_update(id, &approve("alice"))).code(),
            "not_found"
        );
    }

    #[test]
    fn qualifying_proposal_is_approved_with_audit_fields() {
        let mut store = fixture_store();
        let approved = approved_update(&mut store, "v2");

        assert_eq!(approved.status, StrategyStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("alice"));
        assert!(approved.reviewed_at.is_some());
        assert_eq!(approved.approval_notes.as_deref(), Some("evidence reviewed"));
        assert_eq!(approved.gating_config_version, Some(1));

        let events: Vec<String> = must(store.list_deployment_logs(approved.id))
            .into_iter()
            .map(|log| log.event)
            .collect();
        assert_eq!(events, vec!["proposed".to_string(), "approved".to_string()]);
    }

    #[test]
    fn missing_significance_blocks_approval_and_keeps_pending() {
        let mut store = fixture_store();
        let mut input = proposal("v2");
        input.statistical_significance = Some(false);
        input.confidence_score = 1.0;
        let proposed = must(store.propose_strategy_update(&input));

        let err = typed_error(store.review_strategy_update(proposed.id, &approve("alice")));
        assert_eq!(
            err,
            PipelineError::GatingFailed {
                current: "pending".to_string(),
                failed_checks: vec!["gating.not_statistically_significant".to_string()],
            }
        );

        let after = must(store.get_strategy_update(proposed.id));
        assert_eq!(after.status, StrategyStatus::Pending);
        assert!(after.reviewed_at.is_none());

        let logs = must(store.list_deployment_logs(proposed.id));
        let last = match logs.last() {
            Some(log) => log,
            None => panic!("missing gating log"),
        };
        assert_eq!(last.event, "gating_failed");
        assert_eq!(last.level, LogLevel::Warning);
    }

    #[test]
    fn rejection_needs_a_reason_and_is_terminal() {
        let mut store = fixture_store();
        let proposed = must(store.propose_strategy_update(&proposal("v2")));
        let missing_reason = ReviewRequest {
            decision: ReviewDecision::Reject,
            reviewer: "bob".to_string(),
            notes: None,
            deployment_phase: None,
        };
        assert_eq!(
            typed_error(store.review_strategy_update(proposed.id, &missing_reason)).code(),
            "validation_failed"
        );

        let rejected = rejected_update(&mut store, "v3");
        assert_eq!(rejected.status, StrategyStatus::Rejected);

        let err = typed_error(store.review_strategy_update(rejected.id, &approve("alice")));
        assert_eq!(err.current_status(), Some("rejected"));
        assert_eq!(err.code(), "invalid_transition");

        let direct = store.connection().execute(
            "UPDATE strategy_updates SET status = 'pending' WHERE strategy_update_id = ?1",
            params![rejected.id.to_string()],
        );
        assert!(direct.is_err());
    }

    #[test]
    fn evidence_columns_are_immutable() {
        let mut store = fixture_store();
        let proposed = must(store.propose_strategy_update(&proposal("v2")));
        let direct = store.connection().execute(
            "UPDATE strategy_updates SET confidence_score = 1.0 WHERE strategy_update_id = ?1",
            params![proposed.id.to_string()],
        );
        assert!(direct.is_err());
    }

    #[test]
    fn pending_queue_filters_and_orders_newest_first() {
        let mut store = fixture_store();
        let first = must(store.propose_strategy_update(&proposal("v2")));
        let mut risky = proposal("v3");
        risky.risk_level = Some(RiskLevel::High);
        let second = must(store.propose_strategy_update(&risky));
        let mut other_app = proposal("v4");
        other_app.app_id = "com.example.mail".to_string();
        let third = must(store.propose_strategy_update(&other_app));

        let all = must(store.list_pending(&PendingFilter::default()));
        let ids: Vec<Ulid> = all.iter().map(|update| update.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);

        let high = must(store.list_pending(&PendingFilter {
            risk_level: Some(RiskLevel::High),
            ..PendingFilter::default()
        }));
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, second.id);

        let mail = must(store.list_pending(&PendingFilter {
            app_id: Some("com.example.mail".to_string()),
            limit: Some(5),
            ..PendingFilter::default()
        }));
        assert_eq!(mail.len(), 1);

        let _ = must(store.review_strategy_update(first.id, &approve("alice")));
        assert_eq!(must(store.list_pending(&PendingFilter::default())).len(), 2);
        let reviewed = must(store.list_reviewed(None));
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].id, first.id);
    }

    #[test]
    fn rollback_succeeds_only_from_testing_and_deployed() {
        let mut store = fixture_store();

        let pending = must(store.propose_strategy_update(&proposal("v-pending")));
        let err = typed_error(store.rollback_strategy_update(pending.id, &rollback("regression", false)));
        assert_eq!(err.current_status(), Some("pending"));
        assert_eq!(err.code(), "invalid_transition");

        let approved = approved_update(&mut store, "v-approved");
        assert_eq!(
            typed_error(store.rollback_strategy_update(approved.id, &rollback("regression", false)))
                .code(),
            "invalid_transition"
        );

        let rejected = rejected_update(&mut store, "v-rejected");
        assert_eq!(
            typed_error(store.rollback_strategy_update(rejected.id, &rollback("regression", false)))
                .current_status(),
            Some("rejected")
        );

        let testing = testing_update(&mut store, "v-testing");
        let rolled = must(store.rollback_strategy_update(testing.id, &rollback("crash spike", true)));
        assert_eq!(rolled.status, StrategyStatus::RolledBack);

        let deployed = deployed_update(&mut store, "v-deployed");
        assert_eq!(deployed.status, StrategyStatus::Deployed);
        let rolled = must(store.rollback_strategy_update(deployed.id, &rollback("memory regression", false)));
        assert_eq!(rolled.status, StrategyStatus::RolledBack);

        let err = typed_error(store.rollback_strategy_update(rolled.id, &rollback("again", false)));
        assert_eq!(err.current_status(), Some("rolled_back"));
    }

    #[test]
    fn rollback_records_notes_and_aborts_live_canary() {
        let mut store = fixture_store();
        let testing = testing_update(&mut store, "v2");
        let canary = match must(store.list_canaries(Some(CanaryStatus::Ready))).pop() {
            Some(canary) => canary,
            None => panic!("expected a ready canary"),
        };

        let rolled = must(store.rollback_strategy_update(testing.id, &rollback("crash spike", true)));
        assert_eq!(rolled.rollback_reason.as_deref(), Some("crash spike"));
        assert!(rolled.rolled_back_at.is_some());
        let notes = rolled.approval_notes.unwrap_or_default();
        assert!(notes.starts_with("evidence reviewed\nROLLBACK "));
        assert!(notes.ends_with(": crash spike"));

        assert_eq!(must(store.get_canary(canary.id)).status, CanaryStatus::Aborted);

        let logs = must(store.list_deployment_logs(testing.id));
        let last = match logs.last() {
            Some(log) => log,
            None => panic!("missing rollback log"),
        };
        assert_eq!(last.event, "emergency_rollback");
        assert_eq!(last.level, LogLevel::Critical);
        assert!(logs.iter().any(|log| log.event == "canary_aborted"));

        assert_eq!(
            typed_error(store.rollback_strategy_update(testing.id, &rollback(" ", false))).code(),
            "validation_failed"
        );
    }

    #[test]
    fn deployment_logs_are_append_only() {
        let mut store = fixture_store();
        let proposed = must(store.propose_strategy_update(&proposal("v2")));
        let update = store.connection().execute(
            "UPDATE deployment_logs SET message = 'mutated' WHERE strategy_update_id = ?1",
            params![proposed.id.to_string()],
        );
        assert!(update.is_err());
        let delete = store.connection().execute(
            "DELETE FROM deployment_logs WHERE strategy_update_id = ?1",
            params![proposed.id.to_string()],
        );
        assert!(delete.is_err());
    }

    #[test]
    fn concurrent_approvals_yield_exactly_one_winner() {
        let db_path =
            std::env::temp_dir().join(format!("strategy-approve-race-{}.sqlite3", Ulid::new()));

        let mut setup = must(SqliteStrategyStore::open(&db_path));
        must(setup.migrate());
        let id = must(setup.propose_strategy_update(&proposal("v2"))).id;
        drop(setup);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|index| {
                let path = db_path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut store = match SqliteStrategyStore::open(&path) {
                        Ok(store) => store,
                        Err(err) => panic!("failed to open racing store: {err:#}"),
                    };
                    barrier.wait();
                    store
                        .review_strategy_update(id, &approve(&format!("reviewer-{index}")))
                        .map_err(|err| pipeline_error(&err))
                })
            })
            .collect();

        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(err) => panic!("review thread panicked: {err:?}"),
            })
            .collect();

        let approvals = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(update) if update.status == StrategyStatus::Approved))
            .count();
        let stale = outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome,
                    Err(Some(PipelineError::InvalidTransition { current, .. })) if current == "approved"
                )
            })
            .count();
        assert_eq!((approvals, stale), (1, 1), "{outcomes:?}");

        let check = must(SqliteStrategyStore::open(Path::new(&db_path)));
        let logs = must(check.list_deployment_logs(id));
        assert_eq!(logs.iter().filter(|log| log.event == "approved").count(), 1);
        drop(check);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }
}
