//! Folding telemetry into versioned, confidence-scored intelligence.
//!
//! [`IntelligenceAccumulator`] is fed records one at a time so a window can
//! be streamed in chunks; memory grows with the number of groups, not rows.
//! Group maps are ordered, which keeps payloads byte-identical across reruns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use time::OffsetDateTime;

use crate::config::AggregationConfig;
use crate::telemetry::{DeviceProfile, TelemetryObservation};
use crate::{require_non_empty, sample_confidence, PipelineError};

pub const GLOBAL_INTELLIGENCE_KEY: &str = "strategy_effectiveness";

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntelligenceType {
    Global,
    AppSpecific,
    SystemProfile,
}

impl IntelligenceType {
    pub const ALL: [Self; 3] = [Self::Global, Self::AppSpecific, Self::SystemProfile];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::AppSpecific => "app_specific",
            Self::SystemProfile => "system_profile",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "global" => Some(Self::Global),
            "app_specific" => Some(Self::AppSpecific),
            "system_profile" => Some(Self::SystemProfile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedIntelligence {
    pub intelligence_type: IntelligenceType,
    pub key: String,
    pub version: String,
    pub payload: Value,
    pub confidence_score: f64,
    pub sample_size: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_calculated_at: OffsetDateTime,
}

/// One version per UTC day: `v{days since the Unix epoch}`.
#[must_use]
pub fn day_bucket_version(as_of: OffsetDateTime) -> String {
    format!("v{}", as_of.unix_timestamp().div_euclid(SECONDS_PER_DAY))
}

/// Coarse profile bucket: architecture class by memory capacity band.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn profile_key(profile: &DeviceProfile, bucket_gb: u32) -> String {
    let bucket = f64::from(bucket_gb.max(1));
    let floored = ((profile.memory_gb.max(0.0) / bucket).floor() * bucket) as u64;
    format!("{}_{floored}gb", profile.architecture.as_str())
}

#[derive(Debug, Clone, Default)]
struct Tally {
    count: usize,
    effectiveness_sum: f64,
    memory_sum: f64,
}

impl Tally {
    fn add(&mut self, effectiveness: f64, memory_freed_mb: f64) {
        self.count += 1;
        self.effectiveness_sum += effectiveness;
        self.memory_sum += memory_freed_mb;
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_effectiveness(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.effectiveness_sum / self.count as f64
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_memory(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.memory_sum / self.count as f64
    }
}

#[derive(Debug, Clone, Default)]
struct AppTally {
    entries: usize,
    successes: usize,
    memory_sum: f64,
    total_actions: u64,
}

#[derive(Debug, Clone, Default)]
struct ProfileTally {
    overall: Tally,
    by_strategy: BTreeMap<String, Tally>,
}

#[derive(Debug, Clone)]
pub struct IntelligenceAccumulator {
    config: AggregationConfig,
    observed: usize,
    excluded: usize,
    global: BTreeMap<String, Tally>,
    apps: BTreeMap<String, AppTally>,
    profiles: BTreeMap<String, ProfileTally>,
}

impl IntelligenceAccumulator {
    #[must_use]
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            config: config.clone(),
            observed: 0,
            excluded: 0,
            global: BTreeMap::new(),
            apps: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }

    /// Folds one record into all three passes. Returns `false` when the record
    /// falls below the configured validation confidence and is skipped.
    pub fn observe(&mut self, record: &TelemetryObservation) -> bool {
        if record.trust.validation_confidence < self.config.min_validation_confidence {
            self.excluded += 1;
            return false;
        }
        self.observed += 1;

        self.global
            .entry(record.strategy.clone())
            .or_default()
            .add(record.effectiveness_score, record.memory_freed_mb);

        for app in &record.app_optimizations {
            let tally = self.apps.entry(app.app_category.clone()).or_default();
            tally.entries += 1;
            if app.success {
                tally.successes += 1;
            }
            tally.memory_sum += app.memory_freed_mb;
            tally.total_actions += u64::from(app.action_count);
        }

        let profile = self
            .profiles
            .entry(profile_key(
                &record.device_profile,
                self.config.profile_memory_bucket_gb,
            ))
            .or_default();
        profile
            .overall
            .add(record.effectiveness_score, record.memory_freed_mb);
        profile
            .by_strategy
            .entry(record.strategy.clone())
            .or_default()
            .add(record.effectiveness_score, record.memory_freed_mb);

        true
    }

    #[must_use]
    pub fn observed(&self) -> usize {
        self.observed
    }

    #[must_use]
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// Builds the rows of one pass. An empty window yields no rows.
    #[must_use]
    pub fn finish(&self, kind: IntelligenceType, as_of: OffsetDateTime) -> Vec<AggregatedIntelligence> {
        let version = day_bucket_version(as_of);
        match kind {
            IntelligenceType::Global => self.finish_global(&version, as_of),
            IntelligenceType::AppSpecific => self.finish_apps(&version, as_of),
            IntelligenceType::SystemProfile => self.finish_profiles(&version, as_of),
        }
    }

    fn finish_global(&self, version: &str, as_of: OffsetDateTime) -> Vec<AggregatedIntelligence> {
        if self.global.is_empty() {
            return Vec::new();
        }

        let mut strategies = Map::new();
        for (strategy, tally) in &self.global {
            strategies.insert(
                strategy.clone(),
                json!({
                    "effectiveness": tally.mean_effectiveness(),
                    "avg_memory_recovery_mb": tally.mean_memory(),
                    "sample_size": tally.count,
                }),
            );
        }

        vec![AggregatedIntelligence {
            intelligence_type: IntelligenceType::Global,
            key: GLOBAL_INTELLIGENCE_KEY.to_string(),
            version: version.to_string(),
            payload: Value::Object(strategies),
            confidence_score: sample_confidence(self.observed, self.config.full_confidence_samples),
            sample_size: saturating_u32(self.observed),
            last_calculated_at: as_of,
        }]
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish_apps(&self, version: &str, as_of: OffsetDateTime) -> Vec<AggregatedIntelligence> {
        self.apps
            .iter()
            .map(|(category, tally)| {
                let entries = tally.entries.max(1) as f64;
                AggregatedIntelligence {
                    intelligence_type: IntelligenceType::AppSpecific,
                    key: category.clone(),
                    version: version.to_string(),
                    payload: json!({
                        "avg_memory_recovery_mb": tally.memory_sum / entries,
                        "success_rate": tally.successes as f64 / entries,
                        "sample_size": tally.entries,
                        "total_actions": tally.total_actions,
                    }),
                    confidence_score: sample_confidence(
                        tally.entries,
                        self.config.full_confidence_samples,
                    ),
                    sample_size: saturating_u32(tally.entries),
                    last_calculated_at: as_of,
                }
            })
            .collect()
    }

    fn finish_profiles(&self, version: &str, as_of: OffsetDateTime) -> Vec<AggregatedIntelligence> {
        self.profiles
            .iter()
            .map(|(key, tally)| {
                let mut best: Option<(&String, f64)> = None;
                for (strategy, strategy_tally) in &tally.by_strategy {
                    let mean = strategy_tally.mean_effectiveness();
                    let better = match best {
                        Some((_, current)) => mean > current,
                        None => true,
                    };
                    if better {
                        best = Some((strategy, mean));
                    }
                }
                let (recommended, best_effectiveness) = match best {
                    Some((strategy, mean)) => (Value::String(strategy.clone()), mean),
                    None => (Value::Null, 0.0),
                };

                AggregatedIntelligence {
                    intelligence_type: IntelligenceType::SystemProfile,
                    key: key.clone(),
                    version: version.to_string(),
                    payload: json!({
                        "recommended_strategy": recommended,
                        "avg_effectiveness": tally.overall.mean_effectiveness(),
                        "avg_memory_recovery_mb": tally.overall.mean_memory(),
                        "best_strategy_effectiveness": best_effectiveness,
                        "strategies_compared": tally.by_strategy.len(),
                    }),
                    confidence_score: sample_confidence(
                        tally.overall.count,
                        self.config.full_confidence_samples,
                    ),
                    sample_size: saturating_u32(tally.overall.count),
                    last_calculated_at: as_of,
                }
            })
            .collect()
    }
}

/// A client app tracked as aggregation context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupportedAppInput {
    pub app_id: String,
    pub app_name: String,
    pub user_count: u64,
    pub avg_memory_usage_mb: f64,
}

impl SupportedAppInput {
    /// # Errors
    /// Returns [`PipelineError::ValidationFailed`] for blank identifiers or a
    /// negative or non-finite memory figure.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_non_empty("app_id", &self.app_id)?;
        require_non_empty("app_name", &self.app_name)?;
        if !self.avg_memory_usage_mb.is_finite() || self.avg_memory_usage_mb < 0.0 {
            return Err(PipelineError::ValidationFailed(
                "avg_memory_usage_mb MUST be a finite value >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupportedApp {
    pub app_id: String,
    pub app_name: String,
    pub user_count: u64,
    pub avg_memory_usage_mb: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::telemetry::fixtures::{must_utc, observation};
    use crate::telemetry::{AppOptimization, ArchitectureClass};

    fn approx(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() < 1e-9
    }

    #[test]
    fn version_is_stable_within_a_utc_day() {
        let morning = day_bucket_version(must_utc("2026-02-07T00:00:01Z"));
        let night = day_bucket_version(must_utc("2026-02-07T23:59:59Z"));
        let next = day_bucket_version(must_utc("2026-02-08T00:00:00Z"));
        assert_eq!(morning, night);
        assert_ne!(morning, next);
        assert_eq!(morning, "v20491");
    }

    #[test]
    fn profile_key_buckets_memory_capacity() {
        let mut profile = DeviceProfile {
            architecture: ArchitectureClass::AppleSilicon,
            memory_gb: 16.0,
            core_count: 8,
        };
        assert_eq!(profile_key(&profile, 8), "apple_silicon_16gb");
        profile.memory_gb = 12.0;
        assert_eq!(profile_key(&profile, 8), "apple_silicon_8gb");
        profile.architecture = ArchitectureClass::Intel;
        profile.memory_gb = 36.0;
        assert_eq!(profile_key(&profile, 8), "intel_32gb");
    }

    #[test]
    fn global_pass_matches_three_record_scenario() {
        let mut accumulator = IntelligenceAccumulator::new(&AggregationConfig::default());
        for (index, (effectiveness, memory)) in [(0.8, 500.0), (0.9, 600.0), (0.7, 400.0)]
            .into_iter()
            .enumerate()
        {
            assert!(accumulator.observe(&observation(
                &format!("s-{index}"),
                "balanced",
                effectiveness,
                memory
            )));
        }

        let rows = accumulator.finish(IntelligenceType::Global, must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.key, GLOBAL_INTELLIGENCE_KEY);
        assert_eq!(row.sample_size, 3);
        assert!(approx(row.confidence_score, 0.03));
        let balanced = &row.payload["balanced"];
        assert!(approx(balanced["effectiveness"].as_f64().unwrap_or_default(), 0.8));
        assert!(approx(balanced["avg_memory_recovery_mb"].as_f64().unwrap_or_default(), 500.0));
        assert_eq!(balanced["sample_size"], json!(3));
    }

    #[test]
    fn app_pass_counts_entries_for_success_rate() {
        let mut accumulator = IntelligenceAccumulator::new(&AggregationConfig::default());
        let mut record = observation("s-1", "balanced", 0.5, 300.0);
        record.app_optimizations = vec![
            AppOptimization {
                app_category: "browser".to_string(),
                memory_freed_mb: 200.0,
                action_count: 3,
                success: true,
            },
            AppOptimization {
                app_category: "browser".to_string(),
                memory_freed_mb: 100.0,
                action_count: 1,
                success: false,
            },
            AppOptimization {
                app_category: "ide".to_string(),
                memory_freed_mb: 50.0,
                action_count: 2,
                success: true,
            },
        ];
        accumulator.observe(&record);

        let rows = accumulator.finish(IntelligenceType::AppSpecific, must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "browser");
        assert_eq!(rows[0].payload["success_rate"], json!(0.5));
        assert_eq!(rows[0].payload["avg_memory_recovery_mb"], json!(150.0));
        assert_eq!(rows[0].payload["total_actions"], json!(4));
        assert_eq!(rows[0].sample_size, 2);
        assert_eq!(rows[1].key, "ide");
        assert_eq!(rows[1].payload["success_rate"], json!(1.0));
    }

    #[test]
    fn profile_pass_recommends_highest_mean_and_breaks_ties_by_name() {
        let mut accumulator = IntelligenceAccumulator::new(&AggregationConfig::default());
        accumulator.observe(&observation("s-1", "conservative", 0.6, 100.0));
        accumulator.observe(&observation("s-2", "aggressive", 0.9, 900.0));
        accumulator.observe(&observation("s-3", "balanced", 0.9, 500.0));

        let rows = accumulator.finish(IntelligenceType::SystemProfile, must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "apple_silicon_16gb");
        assert_eq!(rows[0].payload["recommended_strategy"], json!("aggressive"));
        assert_eq!(rows[0].payload["best_strategy_effectiveness"], json!(0.9));
        assert_eq!(rows[0].payload["strategies_compared"], json!(3));
        assert!(approx(rows[0].payload["avg_memory_recovery_mb"].as_f64().unwrap_or_default(), 500.0));
    }

    #[test]
    fn single_sample_bucket_yields_low_confidence_row() {
        let mut accumulator = IntelligenceAccumulator::new(&AggregationConfig::default());
        accumulator.observe(&observation("s-1", "balanced", 0.4, 80.0));
        let rows = accumulator.finish(IntelligenceType::SystemProfile, must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(rows.len(), 1);
        assert!(approx(rows[0].confidence_score, 0.01));
    }

    #[test]
    fn low_trust_records_are_skipped_when_configured() {
        let config = AggregationConfig {
            min_validation_confidence: 0.8,
            ..AggregationConfig::default()
        };
        let mut accumulator = IntelligenceAccumulator::new(&config);
        let mut low = observation("s-1", "balanced", 0.9, 500.0);
        low.trust.validation_confidence = 0.3;
        assert!(!accumulator.observe(&low));
        assert!(accumulator.observe(&observation("s-2", "balanced", 0.5, 100.0)));
        assert_eq!(accumulator.observed(), 1);
        assert_eq!(accumulator.excluded(), 1);
    }

    #[test]
    fn empty_window_produces_no_rows() {
        let accumulator = IntelligenceAccumulator::new(&AggregationConfig::default());
        for kind in IntelligenceType::ALL {
            assert!(accumulator.finish(kind, must_utc("2026-02-07T12:00:00Z")).is_empty());
        }
    }

    #[test]
    fn supported_app_requires_identity() {
        let input = SupportedAppInput {
            app_id: "com.example.browser".to_string(),
            app_name: String::new(),
            user_count: 10,
            avg_memory_usage_mb: 512.0,
        };
        assert!(input.validate().is_err());
    }
}
