use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use strategy_pipeline_core::{
    days_before, now_utc, round_to, IngestOutcome, TelemetryObservation, TelemetryRecord,
};
use time::{Duration, OffsetDateTime};

use crate::rows::{parse_telemetry_row, TELEMETRY_COLUMNS};
use crate::{bool_to_sql, collect_rows, limit_to_sql, sql_timestamp, SqliteStrategyStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryAnalytics {
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub total_telemetry: u64,
    pub last_24h: u64,
    /// Mean effectiveness per strategy over the last 24 hours, two decimals.
    pub strategy_effectiveness: BTreeMap<String, f64>,
}

impl SqliteStrategyStore {
    /// Appends one observation. Re-ingesting a session id is a no-op that
    /// reports the sequence of the original row.
    pub fn ingest_telemetry(&mut self, observation: &TelemetryObservation) -> Result<IngestOutcome> {
        observation.validate()?;

        let recorded_at = now_utc();
        let tx = self
            .conn
            .transaction()
            .context("failed to start telemetry transaction")?;

        let inserted = tx
            .execute(
                "INSERT INTO telemetry(
                    session_id, device_id, user_id, architecture, memory_gb, core_count,
                    strategy, target_app, memory_freed_mb, speed_gain_percent,
                    effectiveness_score, time_of_day, day_of_week, memory_pressure,
                    cpu_usage_percent, app_optimizations_json, state_before_json,
                    state_after_json, errors_json, validation_confidence, validated,
                    score_estimated, occurred_at, recorded_at
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6,
                    ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21,
                    ?22, ?23, ?24
                 )
                 ON CONFLICT(session_id) DO NOTHING",
                params![
                    observation.session_id,
                    observation.device_id,
                    observation.user_id,
                    observation.device_profile.architecture.as_str(),
                    observation.device_profile.memory_gb,
                    i64::from(observation.device_profile.core_count),
                    observation.strategy,
                    observation.target_app,
                    observation.memory_freed_mb,
                    observation.speed_gain_percent,
                    observation.effectiveness_score,
                    i64::from(observation.context.time_of_day),
                    i64::from(observation.context.day_of_week),
                    observation.context.system_load.memory_pressure,
                    observation.context.system_load.cpu_usage_percent,
                    serde_json::to_string(&observation.app_optimizations)
                        .context("failed to serialize app_optimizations")?,
                    serde_json::to_string(&observation.state_before)
                        .context("failed to serialize state_before")?,
                    serde_json::to_string(&observation.state_after)
                        .context("failed to serialize state_after")?,
                    serde_json::to_string(&observation.errors)
                        .context("failed to serialize errors")?,
                    observation.trust.validation_confidence,
                    bool_to_sql(observation.trust.validated),
                    bool_to_sql(observation.trust.score_estimated),
                    sql_timestamp(observation.occurred_at)?,
                    sql_timestamp(recorded_at)?,
                ],
            )
            .context("failed to append telemetry")?;

        if inserted == 0 {
            let telemetry_seq: i64 = tx
                .query_row(
                    "SELECT telemetry_seq FROM telemetry WHERE session_id = ?1",
                    params![observation.session_id],
                    |row| row.get(0),
                )
                .context("failed to look up duplicate telemetry session")?;
            tx.commit().context("failed to commit telemetry transaction")?;

            tracing::debug!(
                session_id = %observation.session_id,
                telemetry_seq,
                "duplicate telemetry session ignored"
            );
            return Ok(IngestOutcome::Duplicate {
                session_id: observation.session_id.clone(),
                telemetry_seq,
            });
        }

        let telemetry_seq = tx.last_insert_rowid();
        let record = tx
            .query_row(
                &format!("SELECT {TELEMETRY_COLUMNS} FROM telemetry WHERE telemetry_seq = ?1"),
                params![telemetry_seq],
                parse_telemetry_row,
            )
            .context("failed to read back telemetry")?;
        tx.commit().context("failed to commit telemetry transaction")?;

        tracing::info!(
            session_id = %record.observation.session_id,
            telemetry_seq,
            strategy = %record.observation.strategy,
            validated = record.observation.trust.validated,
            "telemetry ingested"
        );
        Ok(IngestOutcome::Accepted { record })
    }

    pub fn get_telemetry(&self, session_id: &str) -> Result<Option<TelemetryRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {TELEMETRY_COLUMNS} FROM telemetry WHERE session_id = ?1"),
                params![session_id],
                parse_telemetry_row,
            )
            .optional()
            .context("failed to read telemetry")
    }

    /// One keyset page of the window `(after, until]`, newest first.
    /// `before_seq` is the smallest sequence of the previous page.
    pub(crate) fn telemetry_window_page(
        &self,
        after: OffsetDateTime,
        until: OffsetDateTime,
        before_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TelemetryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TELEMETRY_COLUMNS}
             FROM telemetry
             WHERE recorded_at > ?1 AND recorded_at <= ?2 AND telemetry_seq < ?3
             ORDER BY telemetry_seq DESC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                sql_timestamp(after)?,
                sql_timestamp(until)?,
                before_seq.unwrap_or(i64::MAX),
                limit_to_sql(limit),
            ],
            parse_telemetry_row,
        )?;
        collect_rows(rows)
    }

    pub fn telemetry_analytics(&self, as_of: OffsetDateTime) -> Result<TelemetryAnalytics> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .context("failed to count telemetry")?;

        let day_start = sql_timestamp(as_of - Duration::hours(24))?;
        let until = sql_timestamp(as_of)?;
        let last_24h: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM telemetry WHERE recorded_at > ?1 AND recorded_at <= ?2",
                params![day_start, until],
                |row| row.get(0),
            )
            .context("failed to count recent telemetry")?;

        let mut stmt = self.conn.prepare(
            "SELECT strategy, AVG(effectiveness_score)
             FROM telemetry
             WHERE recorded_at > ?1 AND recorded_at <= ?2
             GROUP BY strategy
             ORDER BY strategy ASC",
        )?;
        let rows = stmt.query_map(params![day_start, until], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let strategy_effectiveness = collect_rows(rows)?
            .into_iter()
            .map(|(strategy, mean)| (strategy, round_to(mean, 2)))
            .collect();

        Ok(TelemetryAnalytics {
            as_of,
            total_telemetry: u64::try_from(total).unwrap_or(0),
            last_24h: u64::try_from(last_24h).unwrap_or(0),
            strategy_effectiveness,
        })
    }

    /// Deletes telemetry recorded more than `older_than_days` before `as_of`.
    /// This is the only path allowed past the append-only trigger.
    pub fn prune_telemetry(&mut self, as_of: OffsetDateTime, older_than_days: u32) -> Result<usize> {
        let cutoff = sql_timestamp(days_before(as_of, older_than_days))?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start telemetry prune transaction")?;

        tx.execute(
            "INSERT INTO telemetry_prune_guard(cutoff) VALUES (?1)",
            params![cutoff],
        )
        .context("failed to arm telemetry prune guard")?;
        let deleted = tx
            .execute("DELETE FROM telemetry WHERE recorded_at < ?1", params![cutoff])
            .context("failed to prune telemetry")?;
        tx.execute("DELETE FROM telemetry_prune_guard", [])
            .context("failed to clear telemetry prune guard")?;
        tx.commit().context("failed to commit telemetry prune")?;

        tracing::info!(deleted, cutoff = %cutoff, "telemetry pruned");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use proptest::prelude::*;
    use rusqlite::params;
    use strategy_pipeline_core::{IngestOutcome, PipelineError};
    use time::Duration;

    use crate::pipeline_error;
    use crate::test_support::{fixture_store, must, observation};

    #[test]
    fn ingest_accepts_then_reports_duplicate() {
        let mut store = fixture_store();
        let input = observation("s-1", "balanced", 0.8, 500.0);

        let first = must(store.ingest_telemetry(&input));
        let seq = match first {
            IngestOutcome::Accepted { record } => {
                assert_eq!(record.observation.session_id, "s-1");
                assert_eq!(record.observation.occurred_at, input.occurred_at);
                record.telemetry_seq
            }
            IngestOutcome::Duplicate { .. } => panic!("first ingest must be accepted"),
        };

        let mut changed = input.clone();
        changed.effectiveness_score = 0.1;
        let second = must(store.ingest_telemetry(&changed));
        assert_eq!(
            second,
            IngestOutcome::Duplicate {
                session_id: "s-1".to_string(),
                telemetry_seq: seq,
            }
        );

        let stored = match must(store.get_telemetry("s-1")) {
            Some(record) => record,
            None => panic!("missing stored telemetry"),
        };
        assert_eq!(stored.observation.effectiveness_score, 0.8);
    }

    #[test]
    fn ingest_rejects_malformed_payload_before_storage() {
        let mut store = fixture_store();
        let err = match store.ingest_telemetry(&observation("s-1", "balanced", 1.5, 10.0)) {
            Ok(_) => panic!("expected validation failure"),
            Err(err) => err,
        };
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::ValidationFailed(_))
        ));
        assert!(must(store.get_telemetry("s-1")).is_none());
    }

    #[test]
    fn telemetry_rows_cannot_be_updated_or_deleted_directly() {
        let mut store = fixture_store();
        let _ = must(store.ingest_telemetry(&observation("s-1", "balanced", 0.8, 500.0)));

        let update = store.connection().execute(
            "UPDATE telemetry SET strategy = 'mutated' WHERE session_id = ?1",
            params!["s-1"],
        );
        assert!(update.is_err());

        let delete = store
            .connection()
            .execute("DELETE FROM telemetry WHERE session_id = ?1", params!["s-1"]);
        assert!(delete.is_err());
    }

    #[test]
    fn prune_removes_only_rows_before_cutoff() {
        let mut store = fixture_store();
        let _ = must(store.ingest_telemetry(&observation("s-1", "balanced", 0.8, 500.0)));
        let now = strategy_pipeline_core::now_utc();

        assert_eq!(must(store.prune_telemetry(now, 1)), 0);
        assert!(must(store.get_telemetry("s-1")).is_some());

        let later = now + Duration::days(3);
        assert_eq!(must(store.prune_telemetry(later, 1)), 1);
        assert!(must(store.get_telemetry("s-1")).is_none());

        let guard_rows = match store.connection().query_row(
            "SELECT COUNT(*) FROM telemetry_prune_guard",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count guard rows: {err}"),
        };
        assert_eq!(guard_rows, 0);
    }

    #[test]
    fn analytics_on_empty_store_is_zeroed() {
        let store = fixture_store();
        let analytics = must(store.telemetry_analytics(strategy_pipeline_core::now_utc()));
        assert_eq!(analytics.total_telemetry, 0);
        assert_eq!(analytics.last_24h, 0);
        assert!(analytics.strategy_effectiveness.is_empty());
    }

    #[test]
    fn analytics_summarize_last_day_per_strategy() {
        let mut store = fixture_store();
        for (session, strategy, effectiveness) in [
            ("s-1", "balanced", 0.8),
            ("s-2", "balanced", 0.7),
            ("s-3", "aggressive", 0.555),
        ] {
            let _ = must(store.ingest_telemetry(&observation(session, strategy, effectiveness, 100.0)));
        }

        let now = strategy_pipeline_core::now_utc();
        let analytics = must(store.telemetry_analytics(now));
        assert_eq!(analytics.total_telemetry, 3);
        assert_eq!(analytics.last_24h, 3);
        assert_eq!(analytics.strategy_effectiveness.get("balanced"), Some(&0.75));
        assert_eq!(analytics.strategy_effectiveness.get("aggressive"), Some(&0.56));

        let next_week = must(store.telemetry_analytics(now + Duration::days(7)));
        assert_eq!(next_week.total_telemetry, 3);
        assert_eq!(next_week.last_24h, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_reingest_never_double_counts(replays in prop::collection::vec(0usize..6, 1..30)) {
            let mut store = fixture_store();
            let mut distinct = std::collections::BTreeSet::new();
            for session in replays {
                let outcome = must(store.ingest_telemetry(&observation(
                    &format!("s-{session}"),
                    "balanced",
                    0.5,
                    100.0,
                )));
                prop_assert_eq!(outcome.is_accepted(), distinct.insert(session));
            }

            let analytics = must(store.telemetry_analytics(strategy_pipeline_core::now_utc()));
            prop_assert_eq!(analytics.total_telemetry, distinct.len() as u64);
        }
    }
}
