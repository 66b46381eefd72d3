//! Command surface of the strategy pipeline (`sp`).
//!
//! Hosts embed the pipeline through [`run_cli`]. Every command prints pretty
//! JSON on stdout. A failed command is rendered with [`render_error`] as a
//! `{"error": {"code", "message", "details"}}` envelope, which the binary
//! writes to stderr before exiting non-zero.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strategy_pipeline_core::{
    now_utc, parse_rfc3339_utc, run_system_benchmark, summarize_benchmarks,
    validate_optimization, BenchmarkProbe, CanaryResults, CanaryStatus, EffectivenessScorer,
    IntelligenceType, OptimizationBenchmark, OptimizationResult, PipelineConfig, PipelineError,
    RawMetrics, ReviewDecision, RiskLevel, SessionMeta, StrategyUpdateInput, SubTestResult,
    SupportedAppInput, SystemBenchmark, TelemetryObservation,
};
use strategy_pipeline_store_sqlite::{
    pipeline_error, IntelligenceQuery, PendingFilter, ReviewRequest, RollbackRequest,
    SqliteStrategyStore,
};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

const LOG_TARGETS: [&str; 3] = [
    "strategy_pipeline_core",
    "strategy_pipeline_store_sqlite",
    "strategy_pipeline_cli",
];

#[derive(Debug, Parser)]
#[command(name = "sp")]
#[command(about = "Optimization strategy pipeline CLI")]
pub struct Cli {
    #[arg(long, default_value = "./strategy_pipeline.sqlite3")]
    db: PathBuf,

    /// JSON pipeline config replacing the built-in v1 defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevelArg::Warn)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_level(&self) -> LogLevelArg {
        self.log_level
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Telemetry {
        #[command(subcommand)]
        command: Box<TelemetryCommand>,
    },
    Intelligence {
        #[command(subcommand)]
        command: Box<IntelligenceCommand>,
    },
    Strategy {
        #[command(subcommand)]
        command: Box<StrategyCommand>,
    },
    Canary {
        #[command(subcommand)]
        command: Box<CanaryCommand>,
    },
    Apps {
        #[command(subcommand)]
        command: Box<AppsCommand>,
    },
    Benchmark {
        #[command(subcommand)]
        command: Box<BenchmarkCommand>,
    },
    Config {
        #[command(subcommand)]
        command: Box<ConfigCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommand {
    /// Ingest one observation from a JSON file.
    Ingest(FileArgs),
    /// Score, validate and ingest one optimization run.
    Observe(ObserveArgs),
    Analytics(AsOfArgs),
    Prune(TelemetryPruneArgs),
}

#[derive(Debug, Args)]
pub struct FileArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ObserveArgs {
    #[arg(long)]
    before: PathBuf,
    #[arg(long)]
    after: PathBuf,
    #[arg(long)]
    result: PathBuf,
    #[arg(long)]
    session: PathBuf,
}

#[derive(Debug, Args)]
pub struct AsOfArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct TelemetryPruneArgs {
    /// Defaults to `retention.telemetry_days` from the config.
    #[arg(long)]
    older_than_days: Option<u32>,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum IntelligenceCommand {
    Aggregate(AggregateArgs),
    Latest(LatestArgs),
    History(HistoryArgs),
    Prune(IntelligencePruneArgs),
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    #[arg(long)]
    as_of: Option<String>,
    #[arg(long)]
    budget_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct LatestArgs {
    #[arg(long = "type", value_enum)]
    intelligence_type: Option<IntelligenceTypeArg>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long = "type", value_enum)]
    intelligence_type: IntelligenceTypeArg,
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
pub struct IntelligencePruneArgs {
    /// Defaults to `retention.intelligence_versions_to_keep` from the config.
    #[arg(long)]
    keep_versions: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum StrategyCommand {
    Propose(FileArgs),
    Pending(PendingArgs),
    Show(IdArgs),
    Reviewed(LimitArgs),
    Review(ReviewArgs),
    Rollback(RollbackArgs),
    Logs(IdArgs),
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
pub struct LimitArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PendingArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, value_enum)]
    risk_level: Option<RiskLevelArg>,
    #[arg(long)]
    app_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReviewArgs {
    #[arg(long)]
    id: String,
    #[arg(long, value_enum)]
    decision: DecisionArg,
    #[arg(long)]
    reviewer: String,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    deployment_phase: Option<String>,
}

#[derive(Debug, Args)]
pub struct RollbackArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    emergency: bool,
    #[arg(long)]
    actor: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum CanaryCommand {
    Open(CanaryOpenArgs),
    Start(IdArgs),
    Advance(IdArgs),
    Stop(CanaryStopArgs),
    Complete(CanaryCompleteArgs),
    Show(IdArgs),
    List(CanaryListArgs),
}

#[derive(Debug, Args)]
pub struct CanaryOpenArgs {
    #[arg(long)]
    strategy_id: String,
    #[arg(long)]
    test_name: Option<String>,
}

#[derive(Debug, Args)]
pub struct CanaryStopArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Debug, Args)]
pub struct CanaryCompleteArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    results: PathBuf,
}

#[derive(Debug, Args)]
pub struct CanaryListArgs {
    #[arg(long, value_enum)]
    status: Option<CanaryStatusArg>,
}

#[derive(Debug, Subcommand)]
pub enum AppsCommand {
    Register(RegisterAppArgs),
    List,
}

#[derive(Debug, Args)]
pub struct RegisterAppArgs {
    #[arg(long)]
    app_id: String,
    #[arg(long)]
    app_name: String,
    #[arg(long)]
    user_count: u64,
    #[arg(long)]
    avg_memory_mb: f64,
}

#[derive(Debug, Subcommand)]
pub enum BenchmarkCommand {
    /// Score one raw metrics sample.
    Score(ScoreArgs),
    /// Run the optimization battery over a before/after pair.
    Validate(ValidateArgs),
    /// Run the full-system battery against a recorded probe capture.
    System(FileArgs),
    Analytics(FileArgs),
}

#[derive(Debug, Args)]
pub struct ScoreArgs {
    #[arg(long)]
    metrics: PathBuf,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    before: PathBuf,
    #[arg(long)]
    after: PathBuf,
    #[arg(long)]
    result: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the active pipeline config.
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IntelligenceTypeArg {
    Global,
    AppSpecific,
    SystemProfile,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RiskLevelArg {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DecisionArg {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CanaryStatusArg {
    Ready,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Installs a stderr `tracing` subscriber so stdout stays machine-readable.
/// A second call is a no-op.
pub fn init_logging(level: LogLevelArg) {
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={}", level.as_str()))
        .collect::<Vec<_>>()
        .join(",");

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the parsed top-level command graph.
///
/// # Errors
/// Returns an error when config loading, store open/migrate, or the command
/// itself fails. Typed failures carry a [`PipelineError`].
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Benchmark { command } => run_benchmark(*command, &config),
        Command::Config { command } => match *command {
            ConfigCommand::Show => print_json(&config),
        },
        command => {
            let mut store = SqliteStrategyStore::open(&cli.db)?.with_config(config)?;
            store.migrate()?;
            run_with_store(command, &mut store)
        }
    }
}

/// Executes a store-backed command against an existing store handle.
///
/// # Errors
/// Returns an error when argument parsing, validation, or persistence fails.
pub fn run_with_store(command: Command, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        Command::Telemetry { command } => run_telemetry(*command, store),
        Command::Intelligence { command } => run_intelligence(*command, store),
        Command::Strategy { command } => run_strategy(*command, store),
        Command::Canary { command } => run_canary(*command, store),
        Command::Apps { command } => run_apps(*command, store),
        Command::Benchmark { command } => run_benchmark(*command, store.config()),
        Command::Config { command } => match *command {
            ConfigCommand::Show => print_json(store.config()),
        },
    }
}

fn run_telemetry(command: TelemetryCommand, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        TelemetryCommand::Ingest(args) => {
            let observation: TelemetryObservation = read_json_file(&args.file)?;
            let outcome = store.ingest_telemetry(&observation)?;
            print_json(&outcome)
        }
        TelemetryCommand::Observe(args) => {
            let before_metrics: RawMetrics = read_json_file(&args.before)?;
            let after_metrics: RawMetrics = read_json_file(&args.after)?;
            let result: OptimizationResult = read_json_file(&args.result)?;
            let meta: SessionMeta = read_json_file(&args.session)?;

            let mut scorer = EffectivenessScorer::new();
            let before = scorer.score(&before_metrics);
            let after = scorer.score(&after_metrics);
            let benchmark =
                validate_optimization(&before, &after, &result, &store.config().validation);
            let observation =
                TelemetryObservation::from_benchmark(meta, &before, &after, &result, &benchmark);
            let outcome = store.ingest_telemetry(&observation)?;
            print_json(&json!({ "benchmark": benchmark, "ingest": outcome }))
        }
        TelemetryCommand::Analytics(args) => {
            let analytics = store.telemetry_analytics(parse_as_of(args.as_of.as_deref())?)?;
            print_json(&analytics)
        }
        TelemetryCommand::Prune(args) => {
            let Some(days) = args
                .older_than_days
                .or(store.config().retention.telemetry_days)
            else {
                return Err(PipelineError::ValidationFailed(
                    "--older-than-days is required when retention.telemetry_days is unset"
                        .to_string(),
                )
                .into());
            };
            let as_of = parse_as_of(args.as_of.as_deref())?;
            let deleted = store.prune_telemetry(as_of, days)?;
            print_json(&json!({ "deleted": deleted, "older_than_days": days }))
        }
    }
}

fn run_intelligence(command: IntelligenceCommand, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        IntelligenceCommand::Aggregate(args) => {
            let report = store.aggregate(parse_as_of(args.as_of.as_deref())?, args.budget_ms)?;
            print_json(&report)
        }
        IntelligenceCommand::Latest(args) => {
            let rows = store.get_latest_intelligence(&IntelligenceQuery {
                intelligence_type: args.intelligence_type.map(map_intelligence_type),
                key: args.key,
                limit: args.limit,
            })?;
            print_json(&rows)
        }
        IntelligenceCommand::History(args) => {
            let rows = store
                .intelligence_history(map_intelligence_type(args.intelligence_type), &args.key)?;
            print_json(&rows)
        }
        IntelligenceCommand::Prune(args) => {
            let Some(keep_versions) = args
                .keep_versions
                .or(store.config().retention.intelligence_versions_to_keep)
            else {
                return Err(PipelineError::ValidationFailed(
                    "--keep-versions is required when retention.intelligence_versions_to_keep is unset"
                        .to_string(),
                )
                .into());
            };
            let deleted = store.prune_intelligence(keep_versions)?;
            print_json(&json!({ "deleted": deleted, "keep_versions": keep_versions }))
        }
    }
}

fn run_strategy(command: StrategyCommand, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        StrategyCommand::Propose(args) => {
            let input: StrategyUpdateInput = read_json_file(&args.file)?;
            print_json(&store.propose_strategy_update(&input)?)
        }
        StrategyCommand::Pending(args) => {
            let pending = store.list_pending(&PendingFilter {
                risk_level: args.risk_level.map(map_risk_level),
                app_id: args.app_id,
                limit: args.limit,
            })?;
            print_json(&pending)
        }
        StrategyCommand::Show(args) => print_json(&store.get_strategy_update(parse_id(&args.id)?)?),
        StrategyCommand::Reviewed(args) => print_json(&store.list_reviewed(args.limit)?),
        StrategyCommand::Review(args) => {
            let id = parse_id(&args.id)?;
            let request = ReviewRequest {
                decision: match args.decision {
                    DecisionArg::Approve => ReviewDecision::Approve,
                    DecisionArg::Reject => ReviewDecision::Reject,
                },
                reviewer: args.reviewer,
                notes: args.notes,
                deployment_phase: args.deployment_phase,
            };
            print_json(&store.review_strategy_update(id, &request)?)
        }
        StrategyCommand::Rollback(args) => {
            let id = parse_id(&args.id)?;
            let request = RollbackRequest {
                reason: args.reason,
                emergency: args.emergency,
                actor: args.actor,
            };
            print_json(&store.rollback_strategy_update(id, &request)?)
        }
        StrategyCommand::Logs(args) => {
            print_json(&store.list_deployment_logs(parse_id(&args.id)?)?)
        }
    }
}

fn run_canary(command: CanaryCommand, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        CanaryCommand::Open(args) => {
            let id = parse_id(&args.strategy_id)?;
            print_json(&store.open_canary(id, args.test_name.as_deref())?)
        }
        CanaryCommand::Start(args) => print_json(&store.start_canary(parse_id(&args.id)?)?),
        CanaryCommand::Advance(args) => print_json(&store.advance_canary(parse_id(&args.id)?)?),
        CanaryCommand::Stop(args) => {
            let id = parse_id(&args.id)?;
            print_json(&store.stop_canary(id, args.reason.as_deref())?)
        }
        CanaryCommand::Complete(args) => {
            let id = parse_id(&args.id)?;
            let results: CanaryResults = read_json_file(&args.results)?;
            print_json(&store.complete_canary(id, &results)?)
        }
        CanaryCommand::Show(args) => print_json(&store.get_canary(parse_id(&args.id)?)?),
        CanaryCommand::List(args) => {
            print_json(&store.list_canaries(args.status.map(map_canary_status))?)
        }
    }
}

fn run_apps(command: AppsCommand, store: &mut SqliteStrategyStore) -> Result<()> {
    match command {
        AppsCommand::Register(args) => {
            let app = store.build_app_support(&SupportedAppInput {
                app_id: args.app_id,
                app_name: args.app_name,
                user_count: args.user_count,
                avg_memory_usage_mb: args.avg_memory_mb,
            })?;
            print_json(&app)
        }
        AppsCommand::List => print_json(&store.list_supported_apps()?),
    }
}

/// Runs benchmark commands. These never touch the store.
///
/// # Errors
/// Returns an error when an input file is missing or malformed.
pub fn run_benchmark(command: BenchmarkCommand, config: &PipelineConfig) -> Result<()> {
    match command {
        BenchmarkCommand::Score(args) => {
            let metrics: RawMetrics = read_json_file(&args.metrics)?;
            print_json(&EffectivenessScorer::new().score(&metrics))
        }
        BenchmarkCommand::Validate(args) => {
            let before_metrics: RawMetrics = read_json_file(&args.before)?;
            let after_metrics: RawMetrics = read_json_file(&args.after)?;
            let result: OptimizationResult = read_json_file(&args.result)?;

            let mut scorer = EffectivenessScorer::new();
            let before = scorer.score(&before_metrics);
            let after = scorer.score(&after_metrics);
            print_json(&validate_optimization(
                &before,
                &after,
                &result,
                &config.validation,
            ))
        }
        BenchmarkCommand::System(args) => {
            let capture: ProbeCapture = read_json_file(&args.file)?;
            let label = capture.label.clone();
            let benchmark =
                run_system_benchmark(&label, RecordedProbe::from(capture), &config.validation);
            print_json(&benchmark)
        }
        BenchmarkCommand::Analytics(args) => {
            let batch: BenchmarkBatch = read_json_file(&args.file)?;
            print_json(&summarize_benchmarks(&batch.optimizations, &batch.systems))
        }
    }
}

/// Probe measurements recorded on a client device and replayed through the
/// full-system battery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeCapture {
    #[serde(default = "default_capture_label")]
    pub label: String,
    #[serde(default)]
    pub metrics: Option<RawMetrics>,
    #[serde(default)]
    pub memory_pressure_improvement_percent: Option<f64>,
    #[serde(default)]
    pub average_response_ms: Option<f64>,
    #[serde(default)]
    pub cache_impact_percent: Option<f64>,
    #[serde(default)]
    pub process_count: Option<u32>,
    #[serde(default)]
    pub heavy_processes: Option<u32>,
}

fn default_capture_label() -> String {
    "recorded".to_string()
}

struct RecordedProbe {
    capture: ProbeCapture,
}

impl From<ProbeCapture> for RecordedProbe {
    fn from(capture: ProbeCapture) -> Self {
        Self { capture }
    }
}

impl BenchmarkProbe for RecordedProbe {
    fn collect_metrics(&mut self) -> Result<RawMetrics, String> {
        self.capture
            .metrics
            .clone()
            .ok_or_else(|| "capture has no metrics sample".to_string())
    }

    fn run_sub_tests(&mut self) -> Vec<SubTestResult> {
        let capture = &self.capture;
        let mut sub_tests = Vec::new();
        if let Some(improvement) = capture.memory_pressure_improvement_percent {
            sub_tests.push(SubTestResult::memory_pressure(improvement));
        }
        if let Some(average) = capture.average_response_ms {
            sub_tests.push(SubTestResult::responsiveness(average));
        }
        if let Some(impact) = capture.cache_impact_percent {
            sub_tests.push(SubTestResult::cache_efficiency(impact));
        }
        if let Some(count) = capture.process_count {
            sub_tests.push(SubTestResult::process_health(
                count,
                capture.heavy_processes.unwrap_or(0),
            ));
        }
        sub_tests
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BenchmarkBatch {
    optimizations: Vec<OptimizationBenchmark>,
    systems: Vec<SystemBenchmark>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Maps a failure onto the stable error envelope. Untyped failures use code
/// `internal_error`.
#[must_use]
pub fn error_envelope(err: &anyhow::Error) -> ErrorEnvelope {
    let payload = match pipeline_error(err) {
        Some(typed) => ErrorPayload {
            code: typed.code().to_string(),
            message: typed.to_string(),
            details: error_details(&typed),
        },
        None => ErrorPayload {
            code: "internal_error".to_string(),
            message: format!("{err:#}"),
            details: None,
        },
    };
    ErrorEnvelope { error: payload }
}

#[must_use]
pub fn render_error(err: &anyhow::Error) -> String {
    let envelope = error_envelope(err);
    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        format!(
            r#"{{"error":{{"code":"{}","message":"unrenderable error"}}}}"#,
            envelope.error.code
        )
    })
}

fn error_details(err: &PipelineError) -> Option<Value> {
    match err {
        PipelineError::InvalidTransition { current, requested } => Some(json!({
            "current_status": current,
            "requested": requested,
        })),
        PipelineError::GatingFailed {
            current,
            failed_checks,
        } => Some(json!({
            "current_status": current,
            "failed_checks": failed_checks,
        })),
        PipelineError::ConflictingCanary {
            strategy_update_id,
            canary_id,
        } => Some(json!({
            "strategy_update_id": strategy_update_id,
            "canary_id": canary_id,
        })),
        _ => None,
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::v1());
    };
    let body = std::fs::read_to_string(path).map_err(|err| {
        PipelineError::Configuration(format!("failed to read {}: {err}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&body).map_err(|err| {
        PipelineError::Configuration(format!("invalid JSON in {}: {err}", path.display()))
    })?;
    let config = PipelineConfig::from_json(&value)?;
    tracing::debug!(config_version = config.config_version, path = %path.display(), "config loaded");
    Ok(config)
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = std::fs::read_to_string(path).map_err(|err| {
        PipelineError::ValidationFailed(format!("failed to read {}: {err}", path.display()))
    })?;
    let parsed = serde_json::from_str(&body).map_err(|err| {
        PipelineError::ValidationFailed(format!("invalid JSON in {}: {err}", path.display()))
    })?;
    Ok(parsed)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{body}");
    Ok(())
}

fn parse_as_of(raw: Option<&str>) -> Result<OffsetDateTime> {
    match raw {
        Some(value) => Ok(parse_rfc3339_utc(value)?),
        None => Ok(now_utc()),
    }
}

fn parse_id(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw)
        .map_err(|_| PipelineError::ValidationFailed(format!("invalid ULID: {raw}")).into())
}

fn map_intelligence_type(value: IntelligenceTypeArg) -> IntelligenceType {
    match value {
        IntelligenceTypeArg::Global => IntelligenceType::Global,
        IntelligenceTypeArg::AppSpecific => IntelligenceType::AppSpecific,
        IntelligenceTypeArg::SystemProfile => IntelligenceType::SystemProfile,
    }
}

fn map_risk_level(value: RiskLevelArg) -> RiskLevel {
    match value {
        RiskLevelArg::Low => RiskLevel::Low,
        RiskLevelArg::Medium => RiskLevel::Medium,
        RiskLevelArg::High => RiskLevel::High,
    }
}

fn map_canary_status(value: CanaryStatusArg) -> CanaryStatus {
    match value {
        CanaryStatusArg::Ready => CanaryStatus::Ready,
        CanaryStatusArg::Running => CanaryStatus::Running,
        CanaryStatusArg::Completed => CanaryStatus::Completed,
        CanaryStatusArg::Aborted => CanaryStatus::Aborted,
    }
}
