use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use strategy_pipeline_core::{
    parse_rfc3339_utc, AggregatedIntelligence, AppOptimization, ArchitectureClass, CanaryPolicy,
    CanaryResults, CanaryRun, CanaryStatus, DeploymentLog, DeviceProfile, IntelligenceType,
    LogLevel, OptimizationContext, PipelineError, RiskLevel, StrategyEvidence, StrategyStatus,
    StrategyUpdate, SupportedApp, SystemLoad, TelemetryObservation, TelemetryRecord,
    TelemetryTrust,
};
use time::OffsetDateTime;
use ulid::Ulid;

pub(crate) const TELEMETRY_COLUMNS: &str = "telemetry_seq, session_id, device_id, user_id,
    architecture, memory_gb, core_count, strategy, target_app, memory_freed_mb,
    speed_gain_percent, effectiveness_score, time_of_day, day_of_week, memory_pressure,
    cpu_usage_percent, app_optimizations_json, state_before_json, state_after_json,
    errors_json, validation_confidence, validated, score_estimated, occurred_at, recorded_at";

pub(crate) const INTELLIGENCE_COLUMNS: &str = "intelligence_type, intelligence_key, version,
    payload_json, confidence_score, sample_size, last_calculated_at";

pub(crate) const STRATEGY_UPDATE_COLUMNS: &str = "strategy_update_id, app_id, strategy_type,
    update_type, version, base_strategy_version, update_data_json, estimated_impact_json,
    sample_size, confidence_score, statistical_significance, consistency_period_days,
    risk_level, safety_score, status, reviewed_by, reviewed_at, approval_notes,
    deployment_phase, gating_config_version, rollback_reason, rolled_back_at,
    created_at, updated_at";

pub(crate) const CANARY_COLUMNS: &str = "ab_test_id, strategy_update_id, test_name, status,
    current_phase, user_percentage, policy_json, results_json, started_at, ended_at,
    created_at, updated_at";

pub(crate) const DEPLOYMENT_LOG_COLUMNS: &str = "log_id, strategy_update_id, ab_test_id, event,
    log_level, message, from_status, to_status, actor, data_json, created_at";

pub(crate) const SUPPORTED_APP_COLUMNS: &str =
    "app_id, app_name, user_count, avg_memory_usage_mb, created_at, updated_at";

pub(crate) fn invalid_column(index: usize, kind: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(index)?;
    parse_rfc3339_utc(&raw).map_err(|err| to_sql_error(index, &err))
}

fn optional_timestamp_column(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<OffsetDateTime>> {
    row.get::<_, Option<String>>(index)?
        .as_deref()
        .map(|raw| parse_rfc3339_utc(raw).map_err(|err| to_sql_error(index, &err)))
        .transpose()
}

fn ulid_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Ulid> {
    let raw: String = row.get(index)?;
    Ulid::from_string(&raw)
        .map_err(|_| invalid_column(index, Type::Text, format!("invalid ULID: {raw}")))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|err| invalid_column(index, Type::Text, format!("invalid JSON column: {err}")))
}

fn u32_column(row: &Row<'_>, index: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(index)?;
    u32::try_from(raw)
        .map_err(|_| invalid_column(index, Type::Integer, format!("out of range integer: {raw}")))
}

fn u8_column(row: &Row<'_>, index: usize) -> rusqlite::Result<u8> {
    let raw: i64 = row.get(index)?;
    u8::try_from(raw)
        .map_err(|_| invalid_column(index, Type::Integer, format!("out of range integer: {raw}")))
}

fn enum_column<T>(
    row: &Row<'_>,
    index: usize,
    parse: impl FnOnce(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).ok_or_else(|| invalid_column(index, Type::Text, format!("unknown value: {raw}")))
}

fn to_sql_error(index: usize, err: &PipelineError) -> rusqlite::Error {
    invalid_column(index, Type::Text, err.to_string())
}

pub(crate) fn parse_telemetry_row(row: &Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    let app_optimizations: Vec<AppOptimization> = json_column(row, 16)?;

    Ok(TelemetryRecord {
        telemetry_seq: row.get(0)?,
        recorded_at: timestamp_column(row, 24)?,
        observation: TelemetryObservation {
            session_id: row.get(1)?,
            device_id: row.get(2)?,
            user_id: row.get(3)?,
            device_profile: DeviceProfile {
                architecture: enum_column(row, 4, ArchitectureClass::parse)?,
                memory_gb: row.get(5)?,
                core_count: u32_column(row, 6)?,
            },
            strategy: row.get(7)?,
            target_app: row.get(8)?,
            memory_freed_mb: row.get(9)?,
            speed_gain_percent: row.get(10)?,
            effectiveness_score: row.get(11)?,
            context: OptimizationContext {
                time_of_day: u8_column(row, 12)?,
                day_of_week: u8_column(row, 13)?,
                system_load: SystemLoad {
                    memory_pressure: row.get(14)?,
                    cpu_usage_percent: row.get(15)?,
                },
            },
            app_optimizations,
            state_before: json_column(row, 17)?,
            state_after: json_column(row, 18)?,
            errors: json_column(row, 19)?,
            trust: TelemetryTrust {
                validation_confidence: row.get(20)?,
                validated: row.get::<_, i64>(21)? == 1,
                score_estimated: row.get::<_, i64>(22)? == 1,
            },
            occurred_at: timestamp_column(row, 23)?,
        },
    })
}

pub(crate) fn parse_intelligence_row(row: &Row<'_>) -> rusqlite::Result<AggregatedIntelligence> {
    Ok(AggregatedIntelligence {
        intelligence_type: enum_column(row, 0, IntelligenceType::parse)?,
        key: row.get(1)?,
        version: row.get(2)?,
        payload: json_column(row, 3)?,
        confidence_score: row.get(4)?,
        sample_size: u32_column(row, 5)?,
        last_calculated_at: timestamp_column(row, 6)?,
    })
}

pub(crate) fn parse_strategy_update_row(row: &Row<'_>) -> rusqlite::Result<StrategyUpdate> {
    let gating_config_version = row
        .get::<_, Option<i64>>(19)?
        .map(|raw| {
            u32::try_from(raw).map_err(|_| {
                invalid_column(19, Type::Integer, format!("invalid config version: {raw}"))
            })
        })
        .transpose()?;

    Ok(StrategyUpdate {
        id: ulid_column(row, 0)?,
        app_id: row.get(1)?,
        strategy_type: row.get(2)?,
        update_type: row.get(3)?,
        version: row.get(4)?,
        base_strategy_version: row.get(5)?,
        update_data: json_column(row, 6)?,
        estimated_impact: json_column(row, 7)?,
        evidence: StrategyEvidence {
            sample_size: u32_column(row, 8)?,
            confidence_score: row.get(9)?,
            statistical_significance: row.get::<_, i64>(10)? == 1,
            consistency_period_days: u32_column(row, 11)?,
            risk_level: enum_column(row, 12, RiskLevel::parse)?,
            safety_score: row.get(13)?,
        },
        status: enum_column(row, 14, StrategyStatus::parse)?,
        reviewed_by: row.get(15)?,
        reviewed_at: optional_timestamp_column(row, 16)?,
        approval_notes: row.get(17)?,
        deployment_phase: row.get(18)?,
        gating_config_version,
        rollback_reason: row.get(20)?,
        rolled_back_at: optional_timestamp_column(row, 21)?,
        created_at: timestamp_column(row, 22)?,
        updated_at: timestamp_column(row, 23)?,
    })
}

pub(crate) fn parse_canary_row(row: &Row<'_>) -> rusqlite::Result<CanaryRun> {
    let policy: CanaryPolicy = json_column(row, 6)?;
    let results = row
        .get::<_, Option<String>>(7)?
        .map(|raw| {
            serde_json::from_str::<CanaryResults>(&raw).map_err(|err| {
                invalid_column(7, Type::Text, format!("invalid results_json: {err}"))
            })
        })
        .transpose()?;

    Ok(CanaryRun {
        id: ulid_column(row, 0)?,
        strategy_update_id: ulid_column(row, 1)?,
        test_name: row.get(2)?,
        status: enum_column(row, 3, CanaryStatus::parse)?,
        current_phase: u32_column(row, 4)?,
        user_percentage: row.get(5)?,
        policy,
        results,
        started_at: optional_timestamp_column(row, 8)?,
        ended_at: optional_timestamp_column(row, 9)?,
        created_at: timestamp_column(row, 10)?,
        updated_at: timestamp_column(row, 11)?,
    })
}

pub(crate) fn parse_deployment_log_row(row: &Row<'_>) -> rusqlite::Result<DeploymentLog> {
    let canary_id = row
        .get::<_, Option<String>>(2)?
        .map(|raw| {
            Ulid::from_string(&raw)
                .map_err(|_| invalid_column(2, Type::Text, format!("invalid ULID: {raw}")))
        })
        .transpose()?;

    Ok(DeploymentLog {
        id: ulid_column(row, 0)?,
        strategy_update_id: ulid_column(row, 1)?,
        canary_id,
        event: row.get(3)?,
        level: enum_column(row, 4, LogLevel::parse)?,
        message: row.get(5)?,
        from_status: row.get(6)?,
        to_status: row.get(7)?,
        actor: row.get(8)?,
        data: json_column(row, 9)?,
        created_at: timestamp_column(row, 10)?,
    })
}

pub(crate) fn parse_supported_app_row(row: &Row<'_>) -> rusqlite::Result<SupportedApp> {
    let user_count_raw: i64 = row.get(2)?;
    let user_count = u64::try_from(user_count_raw).map_err(|_| {
        invalid_column(2, Type::Integer, format!("invalid user_count: {user_count_raw}"))
    })?;

    Ok(SupportedApp {
        app_id: row.get(0)?,
        app_name: row.get(1)?,
        user_count,
        avg_memory_usage_mb: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
    })
}
