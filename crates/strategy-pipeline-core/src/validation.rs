//! Benchmark validation batteries.
//!
//! Both batteries sum the weights of passed checks into a confidence in
//! `[0, 1]`. Weights are held in hundredths so the sum stays exact.
//! Neither battery returns an error: failures are recorded on the result.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::ValidationThresholds;
use crate::scoring::{EffectivenessScorer, PerformanceSnapshot, RawMetrics};
use crate::{clamp, now_utc, PipelineError};

const SUB_TEST_PASS_NUMERATOR: usize = 3;
const SUB_TEST_PASS_DENOMINATOR: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizationResult {
    pub memory_freed_mb: f64,
    pub speed_gain: f64,
    pub actions_completed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationEffectiveness {
    pub memory_improvement_mb: f64,
    pub speed_improvement: f64,
    pub actions_completed: u32,
    pub errors_encountered: u32,
    pub user_experience_score: f64,
}

impl OptimizationEffectiveness {
    /// Combines the measured before/after delta with what the optimizer reported.
    #[must_use]
    pub fn measure(
        before: &PerformanceSnapshot,
        after: &PerformanceSnapshot,
        result: &OptimizationResult,
    ) -> Self {
        let measured_memory = match (before.memory_used_mb, after.memory_used_mb) {
            (Some(used_before), Some(used_after)) => used_before - used_after,
            _ => 0.0,
        };
        let memory_improvement_mb = measured_memory + finite_or_zero(result.memory_freed_mb);
        let speed_improvement =
            f64::from(after.score) - f64::from(before.score) + finite_or_zero(result.speed_gain);
        let errors_encountered = u32::try_from(result.errors.len()).unwrap_or(u32::MAX);

        Self {
            memory_improvement_mb,
            speed_improvement,
            actions_completed: result.actions_completed,
            errors_encountered,
            user_experience_score: user_experience_score(
                memory_improvement_mb,
                speed_improvement,
                errors_encountered,
                result.actions_completed,
            ),
        }
    }
}

/// UX score in `[0, 100]`: memory and speed are worth 40 each, actions up to
/// 20, and each error costs 20.
#[must_use]
pub fn user_experience_score(
    memory_improvement_mb: f64,
    speed_improvement: f64,
    errors: u32,
    actions: u32,
) -> f64 {
    let memory_points = clamp(memory_improvement_mb / 1000.0 * 40.0, 0.0, 40.0);
    let speed_points = clamp(speed_improvement / 50.0 * 40.0, 0.0, 40.0);
    let action_points = (f64::from(actions) * 5.0).min(20.0);
    let error_penalty = f64::from(errors) * 20.0;
    clamp(
        memory_points + speed_points + action_points - error_penalty,
        0.0,
        100.0,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    /// Weight in hundredths of confidence.
    pub weight: u8,
    pub detail: String,
}

impl ValidationCheck {
    fn new(name: &str, passed: bool, weight: u8, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            weight,
            detail,
        }
    }
}

fn confidence_of(checks: &[ValidationCheck]) -> f64 {
    let earned: u32 = checks
        .iter()
        .filter(|check| check.passed)
        .map(|check| u32::from(check.weight))
        .sum();
    f64::from(earned) / 100.0
}

fn issues_of(checks: &[ValidationCheck]) -> Vec<String> {
    checks
        .iter()
        .filter(|check| !check.passed)
        .map(|check| format!("{}: {}", check.name, check.detail))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationBenchmark {
    pub effectiveness: OptimizationEffectiveness,
    pub checks: Vec<ValidationCheck>,
    pub confidence: f64,
    pub passed: bool,
    pub estimated_inputs: bool,
    pub issues: Vec<String>,
}

/// Runs the single-optimization battery over a before/after pair.
#[must_use]
pub fn validate_optimization(
    before: &PerformanceSnapshot,
    after: &PerformanceSnapshot,
    result: &OptimizationResult,
    thresholds: &ValidationThresholds,
) -> OptimizationBenchmark {
    let effectiveness = OptimizationEffectiveness::measure(before, after, result);
    let memory = effectiveness.memory_improvement_mb;
    let speed = effectiveness.speed_improvement;
    let ux = effectiveness.user_experience_score;

    let checks = vec![
        ValidationCheck::new(
            "memory_improvement",
            memory >= thresholds.minimum_memory_improvement_mb,
            40,
            format!(
                "{memory:.1} MB against minimum {:.1} MB",
                thresholds.minimum_memory_improvement_mb
            ),
        ),
        ValidationCheck::new(
            "speed_improvement",
            speed >= thresholds.minimum_speed_improvement,
            30,
            format!(
                "{speed:.1} against minimum {:.1}",
                thresholds.minimum_speed_improvement
            ),
        ),
        ValidationCheck::new(
            "no_regression",
            speed >= -thresholds.maximum_performance_regression,
            20,
            format!(
                "{speed:.1} against regression ceiling {:.1}",
                thresholds.maximum_performance_regression
            ),
        ),
        ValidationCheck::new(
            "user_experience",
            ux >= thresholds.minimum_user_experience_score,
            10,
            format!(
                "{ux:.1} against minimum {:.1}",
                thresholds.minimum_user_experience_score
            ),
        ),
    ];

    let confidence = confidence_of(&checks);
    OptimizationBenchmark {
        passed: confidence >= thresholds.validation_confidence,
        issues: issues_of(&checks),
        estimated_inputs: before.estimated || after.estimated,
        effectiveness,
        checks,
        confidence,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTestResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl SubTestResult {
    #[must_use]
    pub fn memory_pressure(improvement_percent: f64) -> Self {
        Self {
            name: "memory_pressure".to_string(),
            passed: improvement_percent >= -5.0,
            detail: format!("pressure improvement {improvement_percent:.1}%"),
        }
    }

    #[must_use]
    pub fn responsiveness(average_response_ms: f64) -> Self {
        Self {
            name: "responsiveness".to_string(),
            passed: average_response_ms < 2000.0,
            detail: format!("average response {average_response_ms:.0} ms"),
        }
    }

    #[must_use]
    pub fn cache_efficiency(impact_percent: f64) -> Self {
        Self {
            name: "cache_efficiency".to_string(),
            passed: impact_percent.abs() < 10.0,
            detail: format!("cache impact {impact_percent:.1}%"),
        }
    }

    #[must_use]
    pub fn process_health(process_count: u32, heavy_processes: u32) -> Self {
        Self {
            name: "process_health".to_string(),
            passed: process_count < 200 && heavy_processes < 10,
            detail: format!("{process_count} processes, {heavy_processes} above 500 MB"),
        }
    }
}

/// Source of measurements for the full-system battery.
///
/// Implementations run on a worker thread. A probe that blocks past the
/// configured timeout is abandoned, not joined.
pub trait BenchmarkProbe: Send + 'static {
    /// # Errors
    /// Returns a description of why metrics could not be collected.
    fn collect_metrics(&mut self) -> Result<RawMetrics, String>;

    fn run_sub_tests(&mut self) -> Vec<SubTestResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemBenchmark {
    pub label: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub duration_ms: u64,
    pub snapshot: Option<PerformanceSnapshot>,
    pub sub_tests: Vec<SubTestResult>,
    pub checks: Vec<ValidationCheck>,
    pub confidence: f64,
    pub passed: bool,
    pub timed_out: bool,
    pub error: Option<String>,
}

struct ProbeOutput {
    metrics: Result<RawMetrics, String>,
    sub_tests: Vec<SubTestResult>,
}

/// Runs the full-system battery with a hard timeout.
#[must_use]
pub fn run_system_benchmark<P: BenchmarkProbe>(
    label: &str,
    probe: P,
    thresholds: &ValidationThresholds,
) -> SystemBenchmark {
    let timeout = Duration::from_millis(thresholds.system_test_timeout_ms);
    let started_at = now_utc();
    let started = Instant::now();
    let (sender, receiver) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("system-benchmark".to_string())
        .spawn(move || {
            let mut probe = probe;
            let metrics = probe.collect_metrics();
            let sub_tests = probe.run_sub_tests();
            let _ = sender.send(ProbeOutput { metrics, sub_tests });
        });

    if let Err(err) = spawned {
        return failed_benchmark(
            label,
            started_at,
            started.elapsed(),
            false,
            format!("failed to spawn benchmark worker: {err}"),
        );
    }

    match receiver.recv_timeout(timeout) {
        Ok(output) => {
            evaluate_system_benchmark(label, started_at, started.elapsed(), output, thresholds)
        }
        Err(RecvTimeoutError::Timeout) => {
            let err = PipelineError::Timeout(format!(
                "system benchmark {label} exceeded {} ms",
                thresholds.system_test_timeout_ms
            ));
            tracing::warn!(
                label,
                timeout_ms = thresholds.system_test_timeout_ms,
                "system benchmark timed out"
            );
            failed_benchmark(label, started_at, started.elapsed(), true, err.to_string())
        }
        Err(RecvTimeoutError::Disconnected) => failed_benchmark(
            label,
            started_at,
            started.elapsed(),
            false,
            "benchmark probe terminated before reporting".to_string(),
        ),
    }
}

fn evaluate_system_benchmark(
    label: &str,
    started_at: OffsetDateTime,
    elapsed: Duration,
    output: ProbeOutput,
    thresholds: &ValidationThresholds,
) -> SystemBenchmark {
    let timeout = Duration::from_millis(thresholds.system_test_timeout_ms);
    let (snapshot, error) = match output.metrics {
        Ok(metrics) => (Some(EffectivenessScorer::new().score(&metrics)), None),
        Err(err) => (None, Some(format!("metrics collection failed: {err}"))),
    };

    let total = output.sub_tests.len();
    let passed_sub_tests = output.sub_tests.iter().filter(|item| item.passed).count();
    let sub_tests_ok = total > 0
        && passed_sub_tests * SUB_TEST_PASS_DENOMINATOR >= total * SUB_TEST_PASS_NUMERATOR;

    let checks = vec![
        ValidationCheck::new(
            "metrics_collected",
            snapshot.is_some(),
            30,
            if snapshot.is_some() {
                "system metrics collected".to_string()
            } else {
                "system metrics unavailable".to_string()
            },
        ),
        ValidationCheck::new(
            "sub_tests_passed",
            sub_tests_ok,
            40,
            format!("{passed_sub_tests}/{total} sub-tests passed"),
        ),
        ValidationCheck::new(
            "within_timeout",
            elapsed < timeout,
            20,
            format!("{} ms against {} ms", elapsed.as_millis(), timeout.as_millis()),
        ),
        ValidationCheck::new(
            "no_fatal_error",
            error.is_none(),
            10,
            error.clone().unwrap_or_else(|| "no fatal error".to_string()),
        ),
    ];

    let confidence = confidence_of(&checks);
    SystemBenchmark {
        label: label.to_string(),
        started_at,
        duration_ms: duration_ms(elapsed),
        snapshot,
        sub_tests: output.sub_tests,
        passed: confidence >= thresholds.validation_confidence,
        checks,
        confidence,
        timed_out: false,
        error,
    }
}

fn failed_benchmark(
    label: &str,
    started_at: OffsetDateTime,
    elapsed: Duration,
    timed_out: bool,
    error: String,
) -> SystemBenchmark {
    SystemBenchmark {
        label: label.to_string(),
        started_at,
        duration_ms: duration_ms(elapsed),
        snapshot: None,
        sub_tests: Vec::new(),
        checks: Vec::new(),
        confidence: 0.0,
        passed: false,
        timed_out,
        error: Some(error),
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkAnalytics {
    pub optimization_benchmarks: usize,
    pub system_benchmarks: usize,
    pub pass_rate: f64,
    pub average_confidence: f64,
    pub average_memory_improvement_mb: f64,
    pub recommendations: Vec<String>,
}

/// Aggregates a batch of benchmark results into pass-rate style analytics.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_benchmarks(
    optimizations: &[OptimizationBenchmark],
    systems: &[SystemBenchmark],
) -> BenchmarkAnalytics {
    let total = optimizations.len() + systems.len();
    let passed = optimizations.iter().filter(|item| item.passed).count()
        + systems.iter().filter(|item| item.passed).count();
    let confidence_sum: f64 = optimizations.iter().map(|item| item.confidence).sum::<f64>()
        + systems.iter().map(|item| item.confidence).sum::<f64>();

    let (pass_rate, average_confidence) = if total == 0 {
        (0.0, 0.0)
    } else {
        (passed as f64 / total as f64, confidence_sum / total as f64)
    };

    let average_memory_improvement_mb = if optimizations.is_empty() {
        0.0
    } else {
        optimizations
            .iter()
            .map(|item| item.effectiveness.memory_improvement_mb)
            .sum::<f64>()
            / optimizations.len() as f64
    };

    let mut recommendations = Vec::new();
    if pass_rate < 0.8 {
        recommendations
            .push("pass rate below 80%: review optimization strategies before promotion".to_string());
    }
    if average_confidence < 0.7 {
        recommendations.push(
            "average validation confidence below 0.7: collect more reliable measurements".to_string(),
        );
    }
    if systems.len() < 5 {
        recommendations.push(format!(
            "only {} system benchmarks recorded: run at least 5 for a baseline",
            systems.len()
        ));
    }

    BenchmarkAnalytics {
        optimization_benchmarks: optimizations.len(),
        system_benchmarks: systems.len(),
        pass_rate,
        average_confidence,
        average_memory_improvement_mb,
        recommendations,
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
