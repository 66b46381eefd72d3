use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strategy_pipeline_core::{
    deployment_phase_for, evaluate_canary_results, now_utc, CanaryAction, CanaryResults,
    CanaryRun, CanaryStatus, CanaryVerdict, LifecycleAction, LogLevel, PipelineError,
    StrategyStatus, StrategyUpdate,
};
use ulid::Ulid;

use crate::rows::{parse_canary_row, CANARY_COLUMNS};
use crate::strategy::{
    append_deployment_log, append_rollback_note, cas_strategy_status, load_strategy_update,
    set_deployment_phase, LogEntry, StatusAudit,
};
use crate::{collect_rows, sql_timestamp, SqliteStrategyStore};

const STOPPED_WITHOUT_REASON: &str = "canary stopped";

/// Canary state after a transition, with the owning update as it now stands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryTransition {
    pub canary: CanaryRun,
    pub strategy_update: StrategyUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<CanaryVerdict>,
}

/// Row values written with a canary status change.
pub(crate) struct CanaryWrite<'a> {
    pub(crate) current_phase: u32,
    pub(crate) user_percentage: f64,
    pub(crate) results_json: Option<String>,
    pub(crate) started_at: Option<&'a str>,
    pub(crate) ended_at: Option<&'a str>,
}

impl SqliteStrategyStore {
    /// Opens a `ready` canary for an approved update and moves the update to `testing`.
    pub fn open_canary(
        &mut self,
        strategy_update_id: Ulid,
        test_name: Option<&str>,
    ) -> Result<CanaryTransition> {
        if test_name.is_some_and(|name| name.trim().is_empty()) {
            return Err(PipelineError::ValidationFailed(
                "test_name MUST be non-empty when provided".to_string(),
            )
            .into());
        }
        let policy = self.config.canary.clone();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start canary open transaction")?;

        let update = load_strategy_update(&tx, strategy_update_id)?;
        if let Some(active) = active_canary(&tx, strategy_update_id)? {
            return Err(PipelineError::ConflictingCanary {
                strategy_update_id: strategy_update_id.to_string(),
                canary_id: active.id.to_string(),
            }
            .into());
        }

        let now = sql_timestamp(now_utc())?;
        let next = cas_strategy_status(
            &tx,
            &update,
            LifecycleAction::OpenCanary,
            &StatusAudit::default(),
            &now,
        )?;

        let canary_id = Ulid::new();
        let name = test_name.map_or_else(
            || format!("{}_{}_{}", update.app_id, update.strategy_type, update.version),
            str::to_string,
        );
        tx.execute(
            "INSERT INTO ab_tests(
                ab_test_id, strategy_update_id, test_name, status, current_phase,
                user_percentage, policy_json, results_json, started_at, ended_at,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, 0, 0.0, ?5, NULL, NULL, NULL, ?6, ?6)",
            params![
                canary_id.to_string(),
                strategy_update_id.to_string(),
                name,
                CanaryStatus::Ready.as_str(),
                serde_json::to_string(&policy).context("failed to serialize canary policy")?,
                now,
            ],
        )
        .context("failed to insert canary")?;

        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id,
                canary_id: Some(canary_id),
                event: "canary_opened",
                level: LogLevel::Info,
                message: format!("canary {name} opened"),
                from_status: Some(update.status.as_str()),
                to_status: Some(next.as_str()),
                actor: None,
                data: json!({ "rollout_phases": policy.rollout_phases }),
            },
            &now,
        )?;

        let transition = load_transition(&tx, canary_id, None)?;
        tx.commit().context("failed to commit canary open transaction")?;

        tracing::info!(
            strategy_update_id = %strategy_update_id,
            canary_id = %canary_id,
            test_name = %transition.canary.test_name,
            "canary opened"
        );
        Ok(transition)
    }

    /// Starts rollout at the first configured phase.
    pub fn start_canary(&mut self, canary_id: Ulid) -> Result<CanaryTransition> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start canary start transaction")?;

        let canary = load_canary(&tx, canary_id)?;
        canary.status.next(CanaryAction::Start)?;
        let Some(first_share) = canary.policy.rollout_phases.first().copied() else {
            return Err(PipelineError::Configuration(format!(
                "canary {canary_id} has no rollout phases"
            ))
            .into());
        };

        let now = sql_timestamp(now_utc())?;
        let next = cas_canary(
            &tx,
            &canary,
            CanaryAction::Start,
            &CanaryWrite {
                current_phase: 0,
                user_percentage: first_share,
                results_json: None,
                started_at: Some(&now),
                ended_at: None,
            },
            &now,
        )?;
        let label = deployment_phase_for(first_share);
        set_deployment_phase(&tx, canary.strategy_update_id, label, &now)?;

        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id: canary.strategy_update_id,
                canary_id: Some(canary_id),
                event: "canary_started",
                level: LogLevel::Info,
                message: format!("canary {} started at {label}", canary.test_name),
                from_status: Some(canary.status.as_str()),
                to_status: Some(next.as_str()),
                actor: None,
                data: json!({ "phase": 0, "user_percentage": first_share }),
            },
            &now,
        )?;

        let transition = load_transition(&tx, canary_id, None)?;
        tx.commit().context("failed to commit canary start transaction")?;

        tracing::info!(canary_id = %canary_id, user_percentage = first_share, "canary started");
        Ok(transition)
    }

    /// Widens a running canary to its next rollout phase.
    pub fn advance_canary(&mut self, canary_id: Ulid) -> Result<CanaryTransition> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start canary advance transaction")?;

        let canary = load_canary(&tx, canary_id)?;
        canary.status.next(CanaryAction::Advance)?;
        let Some((phase, share)) = canary.next_phase() else {
            return Err(PipelineError::ValidationFailed(format!(
                "canary {canary_id} is already at its final rollout phase"
            ))
            .into());
        };

        let now = sql_timestamp(now_utc())?;
        cas_canary(
            &tx,
            &canary,
            CanaryAction::Advance,
            &CanaryWrite {
                current_phase: phase,
                user_percentage: share,
                results_json: None,
                started_at: None,
                ended_at: None,
            },
            &now,
        )?;
        let label = deployment_phase_for(share);
        set_deployment_phase(&tx, canary.strategy_update_id, label, &now)?;

        append_deployment_log(
            &tx,
            &LogEntry {
                strategy_update_id: canary.strategy_update_id,
                canary_id: Some(canary_id),
                event: "canary_advanced",
                level: LogLevel::Info,
                message: format!("canary {} advanced to {label}", canary.test_name),
                from_status: Some(canary.status.as_str()),
                to_status: Some(canary.status.as_str()),
                actor: None,
                data: json!({
                    "from_phase": canary.current_phase,
                    "phase": phase,
                    "user_percentage": share,
                }),
            },
            &now,
        )?;

        let transition = load_transition(&tx, canary_id, None)?;
        tx.commit().context("failed to commit canary advance transaction")?;

        tracing::info!(canary_id = %canary_id, phase, user_percentage = share, "canary advanced");
        Ok(transition)
    }

    /// Aborts a canary and rolls its update back out of `testing`.
    pub fn stop_canary(&mut self, canary_id: Ulid, reason: Option<&str>) -> Result<CanaryTransition> {
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(STOPPED_WITHOUT_REASON);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start canary stop transaction")?;

        let canary = load_canary(&tx, canary_id)?;
        let now_instant = now_utc();
        let now = sql_timestamp(now_instant)?;
        let next = cas_canary(
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
                strategy_update_id: canary.strategy_update_id,
                canary_id: Some(canary_id),
                event: "canary_stopped",
                level: LogLevel::Warning,
                message: format!("canary {} stopped: {reason}", canary.test_name),
                from_status: Some(canary.status.as_str()),
                to_status: Some(next.as_str()),
                actor: None,
                data: json!({ "reason": reason }),
            },
            &now,
        )?;
        roll_back_testing_update(
            &tx,
            canary.strategy_update_id,
            canary_id,
            reason,
            LogLevel::Warning,
            now_instant,
            &now,
        )?;

        let transition = load_transition(&tx, canary_id, None)?;
        tx.commit().context("failed to commit canary stop transaction")?;

        tracing::warn!(canary_id = %canary_id, reason = %reason, "canary stopped");
        Ok(transition)
    }

    /// Records results for a running canary.
    ///
    /// Clean results complete the canary and deploy the update. Anything else
    /// aborts the canary and rolls the update back with the failed checks as
    /// the reason.
    pub fn complete_canary(
        &mut self,
        canary_id: Ulid,
        results: &CanaryResults,
    ) -> Result<CanaryTransition> {
        results.validate()?;
        let results_json =
            serde_json::to_string(results).context("failed to serialize canary results")?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start canary completion transaction")?;

        let canary = load_canary(&tx, canary_id)?;
        canary.status.next(CanaryAction::Complete)?;
        let verdict = evaluate_canary_results(results, &canary.policy);
        let now_instant = now_utc();
        let now = sql_timestamp(now_instant)?;
        let action = if verdict.clean {
            CanaryAction::Complete
        } else {
            CanaryAction::Fail
        };

        let next = cas_canary(
            &tx,
            &canary,
            action,
            &CanaryWrite {
                current_phase: canary.current_phase,
                user_percentage: canary.user_percentage,
                results_json: Some(results_json),
                started_at: None,
                ended_at: Some(&now),
            },
            &now,
        )?;

        if verdict.clean {
            append_deployment_log(
                &tx,
                &LogEntry {
                    strategy_update_id: canary.strategy_update_id,
                    canary_id: Some(canary_id),
                    event: "canary_completed",
                    level: LogLevel::Info,
                    message: format!("canary {} completed with clean results", canary.test_name),
                    from_status: Some(canary.status.as_str()),
                    to_status: Some(next.as_str()),
                    actor: None,
                    data: json!({ "results": results }),
                },
                &now,
            )?;

            let update = load_strategy_update(&tx, canary.strategy_update_id)?;
            let deployed = cas_strategy_status(
                &tx,
                &update,
                LifecycleAction::CompleteCanary,
                &StatusAudit {
                    deployment_phase: Some(deployment_phase_for(1.0)),
                    ..StatusAudit::default()
                },
                &now,
            )?;
            append_deployment_log(
                &tx,
                &LogEntry {
                    strategy_update_id: canary.strategy_update_id,
                    canary_id: Some(canary_id),
                    event: deployed.as_str(),
                    level: LogLevel::Info,
                    message: format!("strategy update {} deployed", update.version),
                    from_status: Some(update.status.as_str()),
                    to_status: Some(deployed.as_str()),
                    actor: None,
                    data: json!({}),
                },
                &now,
            )?;
        } else {
            let reason = format!("canary failed: {}", verdict.failed_checks.join(", "));
            append_deployment_log(
                &tx,
                &LogEntry {
                    strategy_update_id: canary.strategy_update_id,
                    canary_id: Some(canary_id),
                    event: "canary_failed",
                    level: LogLevel::Critical,
                    message: format!("canary {} failed", canary.test_name),
                    from_status: Some(canary.status.as_str()),
                    to_status: Some(next.as_str()),
                    actor: None,
                    data: json!({ "results": results, "failed_checks": verdict.failed_checks }),
                },
                &now,
            )?;
            roll_back_testing_update(
                &tx,
                canary.strategy_update_id,
                canary_id,
                &reason,
                LogLevel::Critical,
                now_instant,
                &now,
            )?;
        }

        let transition = load_transition(&tx, canary_id, Some(verdict))?;
        tx.commit().context("failed to commit canary completion transaction")?;

        if transition.canary.status == CanaryStatus::Completed {
            tracing::info!(canary_id = %canary_id, "canary completed; strategy update deployed");
        } else {
            tracing::warn!(
                canary_id = %canary_id,
                failed_checks = ?transition.verdict.as_ref().map(|verdict| &verdict.failed_checks),
                "canary failed; strategy update rolled back"
            );
        }
        Ok(transition)
    }

    pub fn get_canary(&self, canary_id: Ulid) -> Result<CanaryRun> {
        load_canary(&self.conn, canary_id)
    }

    pub fn list_canaries(&self, status: Option<CanaryStatus>) -> Result<Vec<CanaryRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CANARY_COLUMNS}
             FROM ab_tests
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(CanaryStatus::as_str)], parse_canary_row)?;
        collect_rows(rows)
    }
}

pub(crate) fn load_canary(conn: &Connection, canary_id: Ulid) -> Result<CanaryRun> {
    let found = conn
        .query_row(
            &format!("SELECT {CANARY_COLUMNS} FROM ab_tests WHERE ab_test_id = ?1"),
            params![canary_id.to_string()],
            parse_canary_row,
        )
        .optional()
        .context("failed to read canary")?;

    found.ok_or_else(|| PipelineError::NotFound(format!("canary {canary_id}")).into())
}

/// The `ready` or `running` canary of an update, if one exists.
pub(crate) fn active_canary(conn: &Connection, strategy_update_id: Ulid) -> Result<Option<CanaryRun>> {
    conn.query_row(
        &format!(
            "SELECT {CANARY_COLUMNS}
             FROM ab_tests
             WHERE strategy_update_id = ?1 AND status IN ('ready', 'running')
             LIMIT 1"
        ),
        params![strategy_update_id.to_string()],
        parse_canary_row,
    )
    .optional()
    .context("failed to read active canary")
}

/// Applies `action` only if the stored status and phase still match `canary`.
pub(crate) fn cas_canary(
    conn: &Connection,
    canary: &CanaryRun,
    action: CanaryAction,
    write: &CanaryWrite<'_>,
    now: &str,
) -> Result<CanaryStatus> {
    let next = canary.status.next(action)?;
    let changed = conn
        .execute(
            "UPDATE ab_tests SET
               status = ?1,
               current_phase = ?2,
               user_percentage = ?3,
               results_json = COALESCE(?4, results_json),
               started_at = COALESCE(?5, started_at),
               ended_at = COALESCE(?6, ended_at),
               updated_at = ?7
             WHERE ab_test_id = ?8 AND status = ?9 AND current_phase = ?10",
            params![
                next.as_str(),
                i64::from(write.current_phase),
                write.user_percentage,
                write.results_json,
                write.started_at,
                write.ended_at,
                now,
                canary.id.to_string(),
                canary.status.as_str(),
                i64::from(canary.current_phase),
            ],
        )
        .context("failed to update canary status")?;

    if changed == 0 {
        let latest = load_canary(conn, canary.id)?;
        return Err(PipelineError::InvalidTransition {
            current: latest.status.as_str().to_string(),
            requested: action.as_str().to_string(),
        }
        .into());
    }

    Ok(next)
}

fn roll_back_testing_update(
    conn: &Connection,
    strategy_update_id: Ulid,
    canary_id: Ulid,
    reason: &str,
    level: LogLevel,
    now_instant: time::OffsetDateTime,
    now: &str,
) -> Result<()> {
    let update = load_strategy_update(conn, strategy_update_id)?;
    if update.status != StrategyStatus::Testing {
        return Ok(());
    }

    let next = cas_strategy_status(
        conn,
        &update,
        LifecycleAction::AbortCanary,
        &StatusAudit {
            approval_notes: Some(append_rollback_note(
                update.approval_notes.as_deref(),
                now_instant,
                reason,
            )?),
            rollback_reason: Some(reason),
            rolled_back_at: Some(now),
            ..StatusAudit::default()
        },
        now,
    )?;

    append_deployment_log(
        conn,
        &LogEntry {
            strategy_update_id,
            canary_id: Some(canary_id),
            event: "canary_rollback",
            level,
            message: format!("strategy update rolled back: {reason}"),
            from_status: Some(update.status.as_str()),
            to_status: Some(next.as_str()),
            actor: None,
            data: json!({ "reason": reason }),
        },
        now,
    )
}

fn load_transition(
    conn: &Connection,
    canary_id: Ulid,
    verdict: Option<CanaryVerdict>,
) -> Result<CanaryTransition> {
    let canary = load_canary(conn, canary_id)?;
    let strategy_update = load_strategy_update(conn, canary.strategy_update_id)?;
    Ok(CanaryTransition {
        canary,
        strategy_update,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use strategy_pipeline_core::{
        CanaryResults, CanaryStatus, PipelineError, ReviewDecision, StrategyStatus, StrategyUpdate,
    };
    use ulid::Ulid;

    use crate::test_support::{fixture_store, must, proposal};
    use crate::{pipeline_error, ReviewRequest, SqliteStrategyStore};

    fn typed_error<T: std::fmt::Debug>(result: anyhow::Result<T>) -> PipelineError {
        match result {
            Ok(value) => panic!("expected error, got {value:?}"),
            Err(err) => match pipeline_error(&err) {
                Some(typed) => typed,
                None => panic!("untyped error: {err:#}"),
            },
        }
    }

    fn approved(store: &mut SqliteStrategyStore, version: &str) -> StrategyUpdate {
        let proposed = must(store.propose_strategy_update(&proposal(version)));
        must(store.review_strategy_update(
            proposed.id,
            &ReviewRequest {
                decision: ReviewDecision::Approve,
                reviewer: "alice".to_string(),
                notes: None,
                deployment_phase: None,
            },
        ))
    }

    fn results(effectiveness: f64, crash_rate: f64) -> CanaryResults {
        CanaryResults {
            effectiveness,
            user_satisfaction: 0.82,
            stability: 0.98,
            crash_rate,
            sample_size: 250,
        }
    }

    #[test]
    fn full_rollout_reaches_deployed_through_every_phase() {
        let mut store = fixture_store();
        let update = approved(&mut store, "v2");

        let opened = must(store.open_canary(update.id, None));
        assert_eq!(opened.canary.status, CanaryStatus::Ready);
        assert_eq!(opened.canary.test_name, "com.example.browser_balanced_v2");
        assert_eq!(opened.strategy_update.status, StrategyStatus::Testing);
        let canary_id = opened.canary.id;

        let started = must(store.start_canary(canary_id));
        assert_eq!(started.canary.status, CanaryStatus::Running);
        assert!((started.canary.user_percentage - 0.001).abs() < f64::EPSILON);
        assert_eq!(started.strategy_update.deployment_phase.as_deref(), Some("canary"));

        let mut labels = Vec::new();
        for _ in 0..4 {
            let advanced = must(store.advance_canary(canary_id));
            labels.push(advanced.strategy_update.deployment_phase.unwrap_or_default());
        }
        assert_eq!(labels, vec!["limited", "gradual", "gradual", "full"]);
        assert_eq!(
            typed_error(store.advance_canary(canary_id)).code(),
            "validation_failed"
        );

        let completed = must(store.complete_canary(canary_id, &results(0.9, 0.001)));
        assert_eq!(completed.canary.status, CanaryStatus::Completed);
        assert!(completed.canary.ended_at.is_some());
        assert_eq!(completed.strategy_update.status, StrategyStatus::Deployed);
        assert_eq!(completed.strategy_update.deployment_phase.as_deref(), Some("full"));
        assert!(completed.verdict.is_some_and(|verdict| verdict.clean));

        let events: Vec<String> = must(store.list_deployment_logs(update.id))
            .into_iter()
            .map(|log| log.event)
            .collect();
        assert!(events.contains(&"approved".to_string()));
        assert!(events.contains(&"canary_completed".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("deployed"));
    }

    #[test]
    fn pending_update_cannot_open_a_canary() {
        let mut store = fixture_store();
        let proposed = must(store.propose_strategy_update(&proposal("v2")));
        let err = typed_error(store.open_canary(proposed.id, None));
        assert_eq!(err.current_status(), Some("pending"));
        assert_eq!(
            must(store.get_strategy_update(proposed.id)).status,
            StrategyStatus::Pending
        );
        assert!(must(store.list_canaries(None)).is_empty());
    }

    #[test]
    fn second_open_reports_conflicting_canary() {
        let mut store = fixture_store();
        let update = approved(&mut store, "v2");
        let opened = must(store.open_canary(update.id, Some("browser-threshold-test")));
        assert_eq!(opened.canary.test_name, "browser-threshold-test");

        let err = typed_error(store.open_canary(update.id, None));
        assert_eq!(
            err,
            PipelineError::ConflictingCanary {
                strategy_update_id: update.id.to_string(),
                canary_id: opened.canary.id.to_string(),
            }
        );

        let duplicate = store.connection().execute(
            "INSERT INTO ab_tests(
                ab_test_id, strategy_update_id, test_name, status, current_phase,
                user_percentage, policy_json, created_at, updated_at
             ) VALUES (?1, ?2, 'dup', 'running', 0, 0.0, '{}', 'x', 'x')",
            params![Ulid::new().to_string(), update.id.to_string()],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn stopping_a_canary_rolls_the_update_back() {
        let mut store = fixture_store();
        let update = approved(&mut store, "v2");
        let opened = must(store.open_canary(update.id, None));
        let _ = must(store.start_canary(opened.canary.id));

        let stopped = must(store.stop_canary(opened.canary.id, Some("operator abort")));
        assert_eq!(stopped.canary.status, CanaryStatus::Aborted);
        assert_eq!(stopped.strategy_update.status, StrategyStatus::RolledBack);
        assert_eq!(
            stopped.strategy_update.rollback_reason.as_deref(),
            Some("operator abort")
        );

        let err = typed_error(store.start_canary(opened.canary.id));
        assert_eq!(err.current_status(), Some("aborted"));
        assert_eq!(
            typed_error(store.open_canary(update.id, None)).current_status(),
            Some("rolled_back")
        );
    }

    #[test]
    fn failing_results_abort_and_roll_back_with_reasons() {
        let mut store = fixture_store();
        let update = approved(&mut store, "v2");
        let opened = must(store.open_canary(update.id, None));
        let _ = must(store.start_canary(opened.canary.id));

        let failed = must(store.complete_canary(opened.canary.id, &results(0.9, 0.05)));
        assert_eq!(failed.canary.status, CanaryStatus::Aborted);
        assert!(failed.canary.results.is_some());
        assert_eq!(failed.strategy_update.status, StrategyStatus::RolledBack);
        assert_eq!(
            failed.strategy_update.rollback_reason.as_deref(),
            Some("canary failed: rollback.crash_rate_exceeded")
        );
        let verdict = match failed.verdict {
            Some(verdict) => verdict,
            None => panic!("missing verdict"),
        };
        assert!(!verdict.clean);

        let logs = must(store.list_deployment_logs(update.id));
        assert!(logs.iter().any(|log| log.event == "canary_failed"));
    }

    #[test]
    fn ready_canary_cannot_complete_or_advance() {
        let mut store = fixture_store();
        let update = approved(&mut store, "v2");
        let opened = must(store.open_canary(update.id, None));

        let err = typed_error(store.complete_canary(opened.canary.id, &results(0.9, 0.0)));
        assert_eq!(err.current_status(), Some("ready"));
        assert_eq!(
            typed_error(store.advance_canary(opened.canary.id)).code(),
            "invalid_transition"
        );
        assert_eq!(
            typed_error(store.complete_canary(opened.canary.id, &results(1.5, 0.0))).code(),
            "validation_failed"
        );
        assert_eq!(
            typed_error(store.get_canary(Ulid::new())).code(),
            "not_found"
        );
    }

    #[test]
    fn canaries_filter_by_status() {
        let mut store = fixture_store();
        let first = approved(&mut store, "v2");
        let second = approved(&mut store, "v3");
        let one = must(store.open_canary(first.id, None));
        let _ = must(store.open_canary(second.id, None));
        let _ = must(store.start_canary(one.canary.id));

        assert_eq!(must(store.list_canaries(None)).len(), 2);
        let running = must(store.list_canaries(Some(CanaryStatus::Running)));
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, one.canary.id);
        assert_eq!(must(store.list_canaries(Some(CanaryStatus::Ready))).len(), 1);
    }
}
