//! Durable SQLite store for the strategy pipeline.
//!
//! Every status change is a conditional write that names the expected prior
//! status. Transitions run inside `BEGIN IMMEDIATE` so a second writer waits
//! on the busy timeout, then observes the committed status.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

mod apps;
mod canary;
mod intelligence;
mod rows;
mod schema;
mod strategy;
mod telemetry;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use strategy_pipeline_core::{now_utc, PipelineConfig, PipelineError};
use time::{OffsetDateTime, UtcOffset};

pub use canary::CanaryTransition;
pub use intelligence::{
    AggregationReport, IntelligenceQuery, PassReport, SkippedPass, DEFAULT_LATEST_LIMIT,
};
pub use strategy::{PendingFilter, ReviewRequest, RollbackRequest, DEFAULT_LIST_LIMIT};
pub use telemetry::TelemetryAnalytics;

const STORE_MIGRATION_VERSION: i64 = 1;
const SQL_TIMESTAMP_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z";

pub struct SqliteStrategyStore {
    conn: Connection,
    config: PipelineConfig,
}

impl SqliteStrategyStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self {
            conn,
            config: PipelineConfig::v1(),
        })
    }

    /// Replaces the default v1 config. Takes effect for subsequent operations
    /// and is persisted on the next [`Self::migrate`].
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(schema::SCHEMA_V1)
            .context("failed to apply strategy pipeline schema")?;

        let now = sql_timestamp(now_utc())?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![STORE_MIGRATION_VERSION, now],
            )
            .context("failed to register strategy pipeline schema migration")?;

        self.upsert_config()?;
        tracing::debug!(
            migration = STORE_MIGRATION_VERSION,
            config_version = self.config.config_version,
            "schema migrated"
        );
        Ok(())
    }

    fn upsert_config(&self) -> Result<()> {
        let payload =
            serde_json::to_string(&self.config).context("failed to serialize pipeline config")?;
        let now = sql_timestamp(now_utc())?;

        self.conn
            .execute(
                "INSERT INTO pipeline_configs(config_version, config_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(config_version) DO UPDATE SET
                   config_json = excluded.config_json,
                   created_at = excluded.created_at",
                params![i64::from(self.config.config_version), payload, now],
            )
            .context("failed to upsert pipeline config")?;

        Ok(())
    }

    pub fn stored_config(&self, config_version: u32) -> Result<Option<PipelineConfig>> {
        let raw = self
            .conn
            .query_row(
                "SELECT config_json FROM pipeline_configs WHERE config_version = ?1",
                params![i64::from(config_version)],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to read pipeline config")?;

        raw.map(|json| {
            let value = serde_json::from_str(&json).context("invalid stored config JSON")?;
            PipelineConfig::from_json(&value)
                .map_err(|err| anyhow!("failed to parse stored config {config_version}: {err}"))
        })
        .transpose()
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Recovers the typed error carried by `err`.
///
/// SQLite failures meaning the store cannot be reached (busy, locked,
/// unopenable, or not a database) surface as
/// [`PipelineError::StorageUnavailable`].
#[must_use]
pub fn pipeline_error(err: &anyhow::Error) -> Option<PipelineError> {
    for cause in err.chain() {
        if let Some(typed) = cause.downcast_ref::<PipelineError>() {
            return Some(typed.clone());
        }
        if let Some(sqlite) = cause.downcast_ref::<rusqlite::Error>() {
            if is_storage_unavailable(sqlite) {
                return Some(PipelineError::StorageUnavailable(format!("{err:#}")));
            }
        }
    }
    None
}

fn is_storage_unavailable(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
        )
    )
}

/// Fixed-width UTC timestamp so stored values order lexicographically.
pub(crate) fn sql_timestamp(value: OffsetDateTime) -> Result<String> {
    let format = time::format_description::parse(SQL_TIMESTAMP_FORMAT)
        .context("invalid sql timestamp format description")?;
    value
        .to_offset(UtcOffset::UTC)
        .format(&format)
        .context("failed to format sql timestamp")
}

pub(crate) fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}


#[cfg(test)]
mod tests {
    use super::test_support::{fixture_store, must};
    use super::*;

    #[test]
    fn schema_contains_every_logical_table() {
        let store = fixture_store();
        for table in [
            "schema_migrations",
            "pipeline_configs",
            "telemetry",
            "aggregated_intelligence",
            "strategy_updates",
            "ab_tests",
            "deployment_logs",
            "supported_apps",
        ] {
            assert!(must(table_exists(store.connection(), table)), "missing {table}");
        }
    }

    #[test]
    fn migration_is_idempotent_and_persists_config() {
        let store = fixture_store();
        must(store.migrate());

        let migrations = match store.connection().query_row(
            "SELECT COUNT(*) FROM schema_migrations",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count migrations: {err}"),
        };
        assert_eq!(migrations, 1);
        assert_eq!(must(store.stored_config(1)), Some(PipelineConfig::v1()));
        assert_eq!(must(store.stored_config(7)), None);
    }

    #[test]
    fn custom_config_is_validated_and_persisted() {
        let mut config = PipelineConfig::v1();
        config.config_version = 2;
        config.gating.min_sample_size = 10;

        let store = must(
            must(SqliteStrategyStore::open(Path::new(":memory:"))).with_config(config.clone()),
        );
        must(store.migrate());
        assert_eq!(must(store.stored_config(2)), Some(config));

        let mut invalid = PipelineConfig::v1();
        invalid.canary.rollout_phases = Vec::new();
        let err = match must(SqliteStrategyStore::open(Path::new(":memory:"))).with_config(invalid) {
            Ok(_) => panic!("expected config rejection"),
            Err(err) => err,
        };
        assert_eq!(
            pipeline_error(&err).map(|typed| typed.code()),
            Some("configuration_error")
        );
    }

    #[test]
    fn unopenable_database_is_storage_unavailable() {
        let path = std::env::temp_dir()
            .join(format!("strategy-missing-{}", ulid::Ulid::new()))
            .join("nested")
            .join("store.sqlite3");
        let err = match SqliteStrategyStore::open(&path) {
            Ok(_) => panic!("expected open failure"),
            Err(err) => err,
        };
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn sql_timestamps_are_fixed_width() {
        let whole = must(sql_timestamp(test_support::must_utc("2026-02-07T12:00:00Z")));
        let fractional = must(sql_timestamp(test_support::must_utc(
            "2026-02-07T12:00:00.5Z",
        )));
        assert_eq!(whole, "2026-02-07T12:00:00.000000Z");
        assert_eq!(fractional, "2026-02-07T12:00:00.500000Z");
        assert!(whole < fractional);
    }
}
