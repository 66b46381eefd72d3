use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use strategy_pipeline_core::{
    day_bucket_version, days_before, AggregatedIntelligence, IntelligenceAccumulator,
    IntelligenceType, PipelineError,
};
use time::OffsetDateTime;

use crate::rows::{parse_intelligence_row, INTELLIGENCE_COLUMNS};
use crate::{collect_rows, limit_to_sql, sql_timestamp, SqliteStrategyStore};

pub const DEFAULT_LATEST_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassReport {
    pub intelligence_type: IntelligenceType,
    pub rows_written: usize,
    pub keys_removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedPass {
    pub intelligence_type: IntelligenceType,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregationReport {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    pub records_read: usize,
    pub records_excluded: usize,
    pub no_data: bool,
    pub passes: Vec<PassReport>,
    pub skipped: Vec<SkippedPass>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntelligenceQuery {
    pub intelligence_type: Option<IntelligenceType>,
    pub key: Option<String>,
    pub limit: Option<usize>,
}

impl SqliteStrategyStore {
    /// Aggregates the telemetry window ending at `as_of` into the day-bucketed
    /// version for that instant.
    ///
    /// Each pass commits on its own. The wall-clock budget is checked before
    /// every window page and before each pass starts. A read that overruns
    /// skips all three passes, and an exhausted budget never leaves a pass
    /// half-applied.
    pub fn aggregate(
        &mut self,
        as_of: OffsetDateTime,
        budget_ms: Option<u64>,
    ) -> Result<AggregationReport> {
        let started = Instant::now();
        let config = self.config.aggregation.clone();
        let budget = Duration::from_millis(budget_ms.unwrap_or(config.budget_ms));
        let window_start = days_before(as_of, config.window_days);
        let version = day_bucket_version(as_of);

        let max_samples = usize::try_from(config.max_samples).unwrap_or(usize::MAX);
        let chunk_size = usize::try_from(config.chunk_size).unwrap_or(usize::MAX);
        let mut accumulator = IntelligenceAccumulator::new(&config);
        let mut records_read = 0_usize;
        let mut cursor = None;
        let mut read_overrun = false;

        while records_read < max_samples {
            if started.elapsed() >= budget {
                read_overrun = true;
                break;
            }
            let requested = chunk_size.min(max_samples - records_read);
            let page = self.telemetry_window_page(window_start, as_of, cursor, requested)?;
            records_read += page.len();
            for record in &page {
                accumulator.observe(&record.observation);
            }
            cursor = page.last().map(|record| record.telemetry_seq);
            if page.len() < requested {
                break;
            }
        }

        let mut report = AggregationReport {
            version,
            as_of,
            window_start,
            records_read,
            records_excluded: accumulator.excluded(),
            no_data: !read_overrun && accumulator.observed() == 0,
            passes: Vec::new(),
            skipped: Vec::new(),
        };

        if read_overrun {
            let err = PipelineError::Timeout(format!(
                "aggregation budget of {} ms exhausted after reading {records_read} records",
                budget.as_millis()
            ));
            tracing::warn!(version = %report.version, records_read, "{err}");
            report.skipped = IntelligenceType::ALL
                .into_iter()
                .map(|kind| SkippedPass {
                    intelligence_type: kind,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                })
                .collect();
            return Ok(report);
        }

        if report.no_data {
            tracing::info!(version = %report.version, records_read, "aggregation window has no usable telemetry");
            return Ok(report);
        }

        for kind in IntelligenceType::ALL {
            if started.elapsed() >= budget {
                let err = PipelineError::Timeout(format!(
                    "aggregation budget of {} ms exhausted before {} pass",
                    budget.as_millis(),
                    kind.as_str()
                ));
                tracing::warn!(pass = kind.as_str(), "{err}");
                report.skipped.push(SkippedPass {
                    intelligence_type: kind,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                });
                continue;
            }

            let rows = accumulator.finish(kind, as_of);
            let pass = self.write_intelligence_pass(kind, &report.version, &rows)?;
            tracing::info!(
                pass = kind.as_str(),
                version = %report.version,
                rows_written = pass.rows_written,
                keys_removed = pass.keys_removed,
                "aggregation pass committed"
            );
            report.passes.push(pass);
        }

        Ok(report)
    }

    fn write_intelligence_pass(
        &mut self,
        kind: IntelligenceType,
        version: &str,
        rows: &[AggregatedIntelligence],
    ) -> Result<PassReport> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start aggregation pass transaction")?;

        for row in rows {
            tx.execute(
                "INSERT INTO aggregated_intelligence(
                    intelligence_type, intelligence_key, version, payload_json,
                    confidence_score, sample_size, last_calculated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(intelligence_type, intelligence_key, version) DO UPDATE SET
                   payload_json = excluded.payload_json,
                   confidence_score = excluded.confidence_score,
                   sample_size = excluded.sample_size,
                   last_calculated_at = excluded.last_calculated_at",
                params![
                    kind.as_str(),
                    row.key,
                    version,
                    serde_json::to_string(&row.payload)
                        .context("failed to serialize intelligence payload")?,
                    row.confidence_score,
                    i64::from(row.sample_size),
                    sql_timestamp(row.last_calculated_at)?,
                ],
            )
            .context("failed to upsert aggregated intelligence")?;
        }

        let existing_keys = {
            let mut stmt = tx.prepare(
                "SELECT intelligence_key FROM aggregated_intelligence
                 WHERE intelligence_type = ?1 AND version = ?2",
            )?;
            let keys = stmt.query_map(params![kind.as_str(), version], |row| row.get::<_, String>(0))?;
            collect_rows(keys)?
        };

        let fresh: BTreeSet<&str> = rows.iter().map(|row| row.key.as_str()).collect();
        let mut keys_removed = 0_usize;
        for key in existing_keys
            .iter()
            .filter(|key| !fresh.contains(key.as_str()))
        {
            keys_removed += tx
                .execute(
                    "DELETE FROM aggregated_intelligence
                     WHERE intelligence_type = ?1 AND intelligence_key = ?2 AND version = ?3",
                    params![kind.as_str(), key, version],
                )
                .context("failed to remove stale intelligence key")?;
        }

        tx.commit()
            .context("failed to commit aggregation pass transaction")?;

        Ok(PassReport {
            intelligence_type: kind,
            rows_written: rows.len(),
            keys_removed,
        })
    }

    /// Most recently calculated rows first, optionally narrowed by type and key.
    pub fn get_latest_intelligence(
        &self,
        query: &IntelligenceQuery,
    ) -> Result<Vec<AggregatedIntelligence>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INTELLIGENCE_COLUMNS}
             FROM aggregated_intelligence
             WHERE (?1 IS NULL OR intelligence_type = ?1)
               AND (?2 IS NULL OR intelligence_key = ?2)
             ORDER BY last_calculated_at DESC, intelligence_type ASC, intelligence_key ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![
                query.intelligence_type.map(IntelligenceType::as_str),
                query.key,
                limit_to_sql(query.limit.unwrap_or(DEFAULT_LATEST_LIMIT)),
            ],
            parse_intelligence_row,
        )?;
        collect_rows(rows)
    }

    /// Every retained version of one key, newest first.
    pub fn intelligence_history(
        &self,
        intelligence_type: IntelligenceType,
        key: &str,
    ) -> Result<Vec<AggregatedIntelligence>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INTELLIGENCE_COLUMNS}
             FROM aggregated_intelligence
             WHERE intelligence_type = ?1 AND intelligence_key = ?2
             ORDER BY last_calculated_at DESC, version DESC"
        ))?;
        let rows = stmt.query_map(
            params![intelligence_type.as_str(), key],
            parse_intelligence_row,
        )?;
        collect_rows(rows)
    }

    /// Keeps the newest `keep_versions` versions of every (type, key).
    pub fn prune_intelligence(&mut self, keep_versions: u32) -> Result<usize> {
        if keep_versions == 0 {
            return Err(PipelineError::ValidationFailed(
                "keep_versions MUST be >= 1".to_string(),
            )
            .into());
        }

        let deleted = self
            .conn
            .execute(
                "DELETE FROM aggregated_intelligence
                 WHERE intelligence_id IN (
                   SELECT intelligence_id FROM (
                     SELECT intelligence_id,
                            ROW_NUMBER() OVER (
                              PARTITION BY intelligence_type, intelligence_key
                              ORDER BY last_calculated_at DESC, version DESC
                            ) AS version_rank
                     FROM aggregated_intelligence
                   )
                   WHERE version_rank > ?1
                 )",
                params![i64::from(keep_versions)],
            )
            .context("failed to prune aggregated intelligence")?;

        tracing::info!(deleted, keep_versions, "intelligence versions pruned");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use proptest::prelude::*;
    use rusqlite::params;
    use serde_json::json;
    use strategy_pipeline_core::{
        now_utc, AppOptimization, IntelligenceType, PipelineConfig, GLOBAL_INTELLIGENCE_KEY,
    };
    use time::Duration;

    use super::IntelligenceQuery;
    use crate::test_support::{fixture_store, must, observation};
    use crate::SqliteStrategyStore;

    fn approx(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() < 1e-9
    }

    fn global_rows(store: &SqliteStrategyStore) -> Vec<strategy_pipeline_core::AggregatedIntelligence> {
        must(store.get_latest_intelligence(&IntelligenceQuery {
            intelligence_type: Some(IntelligenceType::Global),
            ..IntelligenceQuery::default()
        }))
    }

    #[test]
    fn three_balanced_sessions_aggregate_to_expected_means() {
        let mut store = fixture_store();
        for (session, effectiveness, memory) in
            [("s-1", 0.8, 500.0), ("s-2", 0.9, 600.0), ("s-3", 0.7, 400.0)]
        {
            let _ = must(store.ingest_telemetry(&observation(session, "balanced", effectiveness, memory)));
        }

        let report = must(store.aggregate(now_utc(), None));
        assert!(!report.no_data);
        assert_eq!(report.records_read, 3);
        assert_eq!(report.passes.len(), 3);
        assert!(report.skipped.is_empty());

        let rows = global_rows(&store);
        assert_eq!(rows.len(), 1);
        let global = &rows[0];
        assert_eq!(global.key, GLOBAL_INTELLIGENCE_KEY);
        assert_eq!(global.sample_size, 3);
        assert!(approx(global.confidence_score, 0.03));

        let balanced = &global.payload["balanced"];
        assert!(approx(balanced["effectiveness"].as_f64().unwrap_or(-1.0), 0.8));
        assert!(approx(balanced["avg_memory_recovery_mb"].as_f64().unwrap_or(-1.0), 500.0));
        assert_eq!(balanced["sample_size"], json!(3));
    }

    #[test]
    fn rerunning_same_day_is_idempotent() {
        let mut store = fixture_store();
        let mut input = observation("s-1", "balanced", 0.6, 300.0);
        input.app_optimizations.push(AppOptimization {
            app_category: "browser".to_string(),
            memory_freed_mb: 120.0,
            action_count: 2,
            success: true,
        });
        let _ = must(store.ingest_telemetry(&input));
        let _ = must(store.ingest_telemetry(&observation("s-2", "aggressive", 0.9, 700.0)));

        let as_of = now_utc();
        let _ = must(store.aggregate(as_of, None));
        let first = must(store.get_latest_intelligence(&IntelligenceQuery::default()));
        let _ = must(store.aggregate(as_of, None));
        let second = must(store.get_latest_intelligence(&IntelligenceQuery::default()));

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_window_writes_nothing() {
        let mut store = fixture_store();
        let report = must(store.aggregate(now_utc(), None));
        assert!(report.no_data);
        assert!(report.passes.is_empty());
        assert!(must(store.get_latest_intelligence(&IntelligenceQuery::default())).is_empty());
    }

    #[test]
    fn budget_exhausted_during_window_read_skips_every_pass() {
        let mut store = fixture_store();
        let _ = must(store.ingest_telemetry(&observation("s-1", "balanced", 0.8, 500.0)));

        let report = must(store.aggregate(now_utc(), Some(0)));
        assert_eq!(report.records_read, 0);
        assert!(!report.no_data);
        assert!(report.passes.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped.iter().all(|skipped| skipped.code == "timeout"));
        assert!(report
            .skipped
            .iter()
            .all(|skipped| skipped.reason.contains("after reading 0 records")));
        assert!(must(store.get_latest_intelligence(&IntelligenceQuery::default())).is_empty());
    }

    #[test]
    fn window_is_capped_and_read_in_chunks() {
        let mut config = PipelineConfig::v1();
        config.aggregation.max_samples = 3;
        config.aggregation.chunk_size = 2;
        let mut store = must(must(SqliteStrategyStore::open(Path::new(":memory:"))).with_config(config));
        must(store.migrate());

        for index in 0..5 {
            let _ = must(store.ingest_telemetry(&observation(&format!("s-{index}"), "balanced", 0.5, 100.0)));
        }

        let report = must(store.aggregate(now_utc(), None));
        assert_eq!(report.records_read, 3);
        assert_eq!(global_rows(&store)[0].sample_size, 3);
    }

    #[test]
    fn vanished_keys_are_removed_from_the_same_version() {
        let mut store = fixture_store();
        let _ = must(store.ingest_telemetry(&observation("s-1", "balanced", 0.8, 500.0)));
        let as_of = now_utc();
        let report = must(store.aggregate(as_of, None));

        let inserted = store.connection().execute(
            "INSERT INTO aggregated_intelligence(
                intelligence_type, intelligence_key, version, payload_json,
                confidence_score, sample_size, last_calculated_at
             ) VALUES ('system_profile', 'intel_64gb', ?1, '{}', 0.5, 1, '2026-01-01T00:00:00.000000Z')",
            params![report.version],
        );
        assert!(inserted.is_ok());

        let rerun = must(store.aggregate(as_of, None));
        let profile_pass = rerun
            .passes
            .iter()
            .find(|pass| pass.intelligence_type == IntelligenceType::SystemProfile);
        assert_eq!(profile_pass.map(|pass| pass.keys_removed), Some(1));
        assert!(must(store.intelligence_history(IntelligenceType::SystemProfile, "intel_64gb")).is_empty());
    }

    #[test]
    fn older_versions_are_retained_until_pruned() {
        let mut store = fixture_store();
        let _ = must(store.ingest_telemetry(&observation("s-1", "balanced", 0.8, 500.0)));
        let today = now_utc();
        let tomorrow = today + Duration::days(1);
        let _ = must(store.aggregate(today, None));
        let newest = must(store.aggregate(tomorrow, None));

        let history = must(store.intelligence_history(IntelligenceType::Global, GLOBAL_INTELLIGENCE_KEY));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, newest.version);

        let latest = must(store.get_latest_intelligence(&IntelligenceQuery {
            key: Some(GLOBAL_INTELLIGENCE_KEY.to_string()),
            limit: Some(1),
            ..IntelligenceQuery::default()
        }));
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, newest.version);

        assert!(store.prune_intelligence(0).is_err());
        assert_eq!(must(store.prune_intelligence(1)), 2);
        let history = must(store.intelligence_history(IntelligenceType::Global, GLOBAL_INTELLIGENCE_KEY));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, newest.version);
    }

    #[test]
    fn low_trust_records_can_be_excluded_by_config() {
        let mut config = PipelineConfig::v1();
        config.aggregation.min_validation_confidence = 0.8;
        let mut store = must(must(SqliteStrategyStore::open(Path::new(":memory:"))).with_config(config));
        must(store.migrate());

        let mut low = observation("s-low", "balanced", 0.1, 10.0);
        low.trust.validation_confidence = 0.3;
        low.trust.validated = false;
        let _ = must(store.ingest_telemetry(&low));

        let report = must(store.aggregate(now_utc(), None));
        assert!(report.no_data);
        assert_eq!(report.records_excluded, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_aggregation_is_deterministic(samples in prop::collection::vec((0u8..3, 0.0f64..=1.0, 0.0f64..2000.0), 1..25)) {
            let mut store = fixture_store();
            for (index, (strategy, effectiveness, memory)) in samples.iter().enumerate() {
                let name = ["balanced", "aggressive", "gentle"][usize::from(*strategy)];
                let _ = must(store.ingest_telemetry(&observation(&format!("s-{index}"), name, *effectiveness, *memory)));
            }

            let as_of = now_utc();
            let _ = must(store.aggregate(as_of, None));
            let first = must(store.get_latest_intelligence(&IntelligenceQuery { limit: Some(100), ..IntelligenceQuery::default() }));
            let _ = must(store.aggregate(as_of, None));
            let second = must(store.get_latest_intelligence(&IntelligenceQuery { limit: Some(100), ..IntelligenceQuery::default() }));
            prop_assert_eq!(first, second);
        }
    }
}
