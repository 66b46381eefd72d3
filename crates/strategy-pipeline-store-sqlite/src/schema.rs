pub(crate) const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS pipeline_configs (
  config_version INTEGER PRIMARY KEY,
  config_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS telemetry (
  telemetry_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id TEXT NOT NULL UNIQUE,
  device_id TEXT NOT NULL,
  user_id TEXT,
  architecture TEXT NOT NULL CHECK (architecture IN ('apple_silicon', 'intel')),
  memory_gb REAL NOT NULL CHECK (memory_gb > 0.0),
  core_count INTEGER NOT NULL CHECK (core_count >= 1),
  strategy TEXT NOT NULL,
  target_app TEXT,
  memory_freed_mb REAL NOT NULL,
  speed_gain_percent REAL NOT NULL,
  effectiveness_score REAL NOT NULL CHECK (effectiveness_score BETWEEN 0.0 AND 1.0),
  time_of_day INTEGER NOT NULL CHECK (time_of_day BETWEEN 0 AND 23),
  day_of_week INTEGER NOT NULL CHECK (day_of_week BETWEEN 0 AND 6),
  memory_pressure REAL NOT NULL,
  cpu_usage_percent REAL NOT NULL,
  app_optimizations_json TEXT NOT NULL DEFAULT '[]',
  state_before_json TEXT NOT NULL DEFAULT 'null',
  state_after_json TEXT NOT NULL DEFAULT 'null',
  errors_json TEXT NOT NULL DEFAULT '[]',
  validation_confidence REAL NOT NULL CHECK (validation_confidence BETWEEN 0.0 AND 1.0),
  validated INTEGER NOT NULL CHECK (validated IN (0, 1)),
  score_estimated INTEGER NOT NULL CHECK (score_estimated IN (0, 1)),
  occurred_at TEXT NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_telemetry_recorded_at
  ON telemetry(recorded_at, telemetry_seq);

CREATE TABLE IF NOT EXISTS telemetry_prune_guard (
  cutoff TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_telemetry_no_update
BEFORE UPDATE ON telemetry
BEGIN
  SELECT RAISE(FAIL, 'telemetry is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_telemetry_delete_only_by_retention
BEFORE DELETE ON telemetry
WHEN NOT EXISTS (
  SELECT 1 FROM telemetry_prune_guard WHERE OLD.recorded_at < telemetry_prune_guard.cutoff
)
BEGIN
  SELECT RAISE(FAIL, 'telemetry is append-only outside retention pruning');
END;

CREATE TABLE IF NOT EXISTS aggregated_intelligence (
  intelligence_id INTEGER PRIMARY KEY AUTOINCREMENT,
  intelligence_type TEXT NOT NULL CHECK (
    intelligence_type IN ('global', 'app_specific', 'system_profile')
  ),
  intelligence_key TEXT NOT NULL,
  version TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0.0 AND 1.0),
  sample_size INTEGER NOT NULL CHECK (sample_size >= 0),
  last_calculated_at TEXT NOT NULL,
  UNIQUE(intelligence_type, intelligence_key, version)
);

CREATE INDEX IF NOT EXISTS idx_aggregated_intelligence_latest
  ON aggregated_intelligence(last_calculated_at DESC, intelligence_type, intelligence_key);

CREATE TABLE IF NOT EXISTS strategy_updates (
  strategy_update_id TEXT PRIMARY KEY,
  app_id TEXT NOT NULL,
  strategy_type TEXT NOT NULL,
  update_type TEXT NOT NULL,
  version TEXT NOT NULL,
  base_strategy_version TEXT NOT NULL,
  update_data_json TEXT NOT NULL,
  estimated_impact_json TEXT NOT NULL,
  sample_size INTEGER NOT NULL CHECK (sample_size >= 0),
  confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0.0 AND 1.0),
  statistical_significance INTEGER NOT NULL CHECK (statistical_significance IN (0, 1)),
  consistency_period_days INTEGER NOT NULL CHECK (consistency_period_days >= 0),
  risk_level TEXT NOT NULL CHECK (risk_level IN ('low', 'medium', 'high')),
  safety_score REAL NOT NULL CHECK (safety_score BETWEEN 0.0 AND 1.0),
  status TEXT NOT NULL CHECK (
    status IN ('pending', 'approved', 'testing', 'deployed', 'rejected', 'rolled_back')
  ),
  reviewed_by TEXT,
  reviewed_at TEXT,
  approval_notes TEXT,
  deployment_phase TEXT,
  gating_config_version INTEGER,
  rollback_reason TEXT,
  rolled_back_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(app_id, strategy_type, version)
);

CREATE INDEX IF NOT EXISTS idx_strategy_updates_status_created
  ON strategy_updates(status, created_at DESC);

CREATE TRIGGER IF NOT EXISTS trg_strategy_updates_evidence_immutable
BEFORE UPDATE OF
  app_id, strategy_type, update_type, version, base_strategy_version,
  update_data_json, estimated_impact_json, sample_size, confidence_score,
  statistical_significance, consistency_period_days, risk_level, safety_score, created_at
ON strategy_updates
BEGIN
  SELECT RAISE(FAIL, 'strategy_updates evidence is immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_strategy_updates_terminal
BEFORE UPDATE ON strategy_updates
WHEN OLD.status IN ('rejected', 'rolled_back')
BEGIN
  SELECT RAISE(FAIL, 'terminal strategy_updates are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_strategy_updates_no_delete
BEFORE DELETE ON strategy_updates
BEGIN
  SELECT RAISE(FAIL, 'strategy_updates cannot be deleted');
END;

CREATE TABLE IF NOT EXISTS ab_tests (
  ab_test_id TEXT PRIMARY KEY,
  strategy_update_id TEXT NOT NULL,
  test_name TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('ready', 'running', 'completed', 'aborted')),
  current_phase INTEGER NOT NULL DEFAULT 0 CHECK (current_phase >= 0),
  user_percentage REAL NOT NULL DEFAULT 0.0 CHECK (user_percentage BETWEEN 0.0 AND 1.0),
  policy_json TEXT NOT NULL,
  results_json TEXT,
  started_at TEXT,
  ended_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (strategy_update_id) REFERENCES strategy_updates(strategy_update_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_ab_tests_one_active_per_update
  ON ab_tests(strategy_update_id) WHERE status IN ('ready', 'running');

CREATE TABLE IF NOT EXISTS deployment_logs (
  log_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  log_id TEXT NOT NULL UNIQUE,
  strategy_update_id TEXT NOT NULL,
  ab_test_id TEXT,
  event TEXT NOT NULL,
  log_level TEXT NOT NULL CHECK (log_level IN ('info', 'warning', 'critical')),
  message TEXT NOT NULL,
  from_status TEXT,
  to_status TEXT,
  actor TEXT,
  data_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL,
  FOREIGN KEY (strategy_update_id) REFERENCES strategy_updates(strategy_update_id),
  FOREIGN KEY (ab_test_id) REFERENCES ab_tests(ab_test_id)
);

CREATE INDEX IF NOT EXISTS idx_deployment_logs_update_seq
  ON deployment_logs(strategy_update_id, log_seq);

CREATE TRIGGER IF NOT EXISTS trg_deployment_logs_no_update
BEFORE UPDATE ON deployment_logs
BEGIN
  SELECT RAISE(FAIL, 'deployment_logs is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_deployment_logs_no_delete
BEFORE DELETE ON deployment_logs
BEGIN
  SELECT RAISE(FAIL, 'deployment_logs is append-only');
END;

CREATE TABLE IF NOT EXISTS supported_apps (
  app_id TEXT PRIMARY KEY,
  app_name TEXT NOT NULL,
  user_count INTEGER NOT NULL CHECK (user_count >= 0),
  avg_memory_usage_mb REAL NOT NULL CHECK (avg_memory_usage_mb >= 0.0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";
