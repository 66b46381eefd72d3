use anyhow::{Context, Result};
use rusqlite::params;
use strategy_pipeline_core::{now_utc, PipelineError, SupportedApp, SupportedAppInput};

use crate::rows::{parse_supported_app_row, SUPPORTED_APP_COLUMNS};
use crate::{collect_rows, sql_timestamp, SqliteStrategyStore};

impl SqliteStrategyStore {
    /// Registers an app as aggregation context, or refreshes its figures.
    /// `created_at` survives re-registration.
    pub fn build_app_support(&mut self, input: &SupportedAppInput) -> Result<SupportedApp> {
        input.validate()?;
        let user_count = i64::try_from(input.user_count).map_err(|_| {
            PipelineError::ValidationFailed(format!(
                "user_count {} exceeds the storable range",
                input.user_count
            ))
        })?;
        let now = sql_timestamp(now_utc())?;

        self.conn
            .execute(
                "INSERT INTO supported_apps(
                    app_id, app_name, user_count, avg_memory_usage_mb, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(app_id) DO UPDATE SET
                   app_name = excluded.app_name,
                   user_count = excluded.user_count,
                   avg_memory_usage_mb = excluded.avg_memory_usage_mb,
                   updated_at = excluded.updated_at",
                params![
                    input.app_id,
                    input.app_name,
                    user_count,
                    input.avg_memory_usage_mb,
                    now
                ],
            )
            .context("failed to upsert supported app")?;

        let app = self
            .conn
            .query_row(
                &format!("SELECT {SUPPORTED_APP_COLUMNS} FROM supported_apps WHERE app_id = ?1"),
                params![input.app_id],
                parse_supported_app_row,
            )
            .context("failed to read supported app")?;

        tracing::info!(app_id = %app.app_id, user_count = app.user_count, "supported app registered");
        Ok(app)
    }

    pub fn list_supported_apps(&self) -> Result<Vec<SupportedApp>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUPPORTED_APP_COLUMNS} FROM supported_apps ORDER BY app_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_supported_app_row)?;
        collect_rows(rows)
    }
}
