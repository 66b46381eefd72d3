//! Composite device performance scoring.
//!
//! Each subsystem is scored by a monotonic step function, the weighted sum is
//! clamped to `[MIN_SCORE, MAX_SCORE]`, and a short rolling history of scores
//! yields an improving/declining/stable trend.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u8 = 5;
pub const MAX_SCORE: u8 = 95;
pub const HISTORY_CAPACITY: usize = 10;
pub const BOTTLENECK_THRESHOLD: u8 = 40;
pub const ESTIMATED_SCORE: u8 = 30;

const MEMORY_WEIGHT: f64 = 0.35;
const CPU_WEIGHT: f64 = 0.25;
const DISK_WEIGHT: f64 = 0.20;
const SWAP_WEIGHT: f64 = 0.15;
const THERMAL_WEIGHT: f64 = 0.05;
const TREND_DELTA: f64 = 5.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawMetrics {
    pub memory_used_mb: Option<f64>,
    pub memory_total_mb: Option<f64>,
    /// 1 normal, 2 warning, 4 critical.
    pub memory_pressure: Option<u8>,
    pub cpu_usage_percent: Option<f64>,
    pub disk_read_ops: Option<f64>,
    pub disk_write_ops: Option<f64>,
    pub disk_avg_time_ms: Option<f64>,
    pub swap_used_mb: Option<f64>,
    pub swap_total_mb: Option<f64>,
    /// 0 nominal .. 3 critical.
    pub thermal_state: Option<u8>,
}

impl RawMetrics {
    /// Names of required inputs that are absent or non-finite.
    #[must_use]
    pub fn missing_metrics(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.memory_pressure.is_none() && self.memory_usage_ratio().is_none() {
            missing.push("memory".to_string());
        }
        for (name, value) in [
            ("cpu_usage_percent", self.cpu_usage_percent),
            ("disk_read_ops", self.disk_read_ops),
            ("disk_write_ops", self.disk_write_ops),
            ("disk_avg_time_ms", self.disk_avg_time_ms),
        ] {
            if finite(value).is_none() {
                missing.push(name.to_string());
            }
        }
        missing
    }

    fn memory_usage_ratio(&self) -> Option<f64> {
        let used = finite(self.memory_used_mb)?;
        let total = finite(self.memory_total_mb)?;
        if total <= 0.0 {
            return None;
        }
        Some(used / total)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Bottleneck {
    MemoryPressure,
    CpuOverload,
    DiskIo,
    SwapUsage,
    ThermalThrottling,
    SystemUnavailable,
}

impl Bottleneck {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemoryPressure => "memory_pressure",
            Self::CpuOverload => "cpu_overload",
            Self::DiskIo => "disk_io",
            Self::SwapUsage => "swap_usage",
            Self::ThermalThrottling => "thermal_throttling",
            Self::SystemUnavailable => "system_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ComponentScores {
    pub memory: u8,
    pub cpu: u8,
    pub disk: u8,
    pub swap: u8,
    pub thermal: u8,
}

impl ComponentScores {
    fn weighted(self) -> f64 {
        f64::from(self.memory) * MEMORY_WEIGHT
            + f64::from(self.cpu) * CPU_WEIGHT
            + f64::from(self.disk) * DISK_WEIGHT
            + f64::from(self.swap) * SWAP_WEIGHT
            + f64::from(self.thermal) * THERMAL_WEIGHT
    }

    fn labelled(self) -> [(Bottleneck, u8); 5] {
        [
            (Bottleneck::MemoryPressure, self.memory),
            (Bottleneck::CpuOverload, self.cpu),
            (Bottleneck::DiskIo, self.disk),
            (Bottleneck::SwapUsage, self.swap),
            (Bottleneck::ThermalThrottling, self.thermal),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub score: u8,
    pub components: ComponentScores,
    pub trend: Trend,
    pub bottlenecks: Vec<Bottleneck>,
    pub primary_bottleneck: Option<Bottleneck>,
    pub optimization_priority: Vec<String>,
    pub potential_improvement: u8,
    pub memory_used_mb: Option<f64>,
    pub estimated: bool,
    pub missing_metrics: Vec<String>,
}

impl PerformanceSnapshot {
    /// Fixed conservative estimate used when required metrics are unavailable.
    #[must_use]
    pub fn conservative_estimate(missing_metrics: Vec<String>) -> Self {
        Self {
            score: ESTIMATED_SCORE,
            components: ComponentScores {
                memory: 30,
                cpu: 50,
                disk: 50,
                swap: 30,
                thermal: 80,
            },
            trend: Trend::Unknown,
            bottlenecks: vec![Bottleneck::SystemUnavailable],
            primary_bottleneck: Some(Bottleneck::SystemUnavailable),
            optimization_priority: vec!["general_cleanup".to_string()],
            potential_improvement: 40,
            memory_used_mb: None,
            estimated: true,
            missing_metrics,
        }
    }
}

/// Stateful scorer carrying the rolling score history used for trends.
#[derive(Debug, Clone, Default)]
pub struct EffectivenessScorer {
    history: VecDeque<f64>,
}

impl EffectivenessScorer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scores one metrics sample. Never fails: missing required metrics yield
    /// [`PerformanceSnapshot::conservative_estimate`], which is kept out of the history.
    pub fn score(&mut self, metrics: &RawMetrics) -> PerformanceSnapshot {
        let missing = metrics.missing_metrics();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "metrics unavailable; using conservative estimate");
            return PerformanceSnapshot::conservative_estimate(missing);
        }

        let components = ComponentScores {
            memory: memory_score(metrics),
            cpu: cpu_score(metrics),
            disk: disk_score(metrics),
            swap: swap_score(metrics),
            thermal: thermal_score(metrics),
        };

        let composite = components.weighted().round();
        self.record(composite);

        let bottlenecks: Vec<Bottleneck> = components
            .labelled()
            .iter()
            .filter(|(_, value)| *value < BOTTLENECK_THRESHOLD)
            .map(|(name, _)| *name)
            .collect();

        PerformanceSnapshot {
            score: clamp_score(composite),
            components,
            trend: self.trend(),
            primary_bottleneck: primary_bottleneck(components),
            optimization_priority: optimization_priority(&bottlenecks),
            bottlenecks,
            potential_improvement: potential_improvement(metrics),
            memory_used_mb: finite(metrics.memory_used_mb),
            estimated: false,
            missing_metrics: Vec::new(),
        }
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<f64> {
        &self.history
    }

    fn record(&mut self, composite: f64) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(composite);
    }

    /// Mean of the last three samples against the three before them.
    #[must_use]
    pub fn trend(&self) -> Trend {
        if self.history.len() < 2 {
            return Trend::Stable;
        }

        let values: Vec<f64> = self.history.iter().copied().collect();
        let len = values.len();
        let recent = &values[len.saturating_sub(3)..];
        let older = &values[len.saturating_sub(6)..len.saturating_sub(3)];
        if recent.len() < 2 || older.len() < 2 {
            return Trend::Stable;
        }

        let delta = mean(recent) - mean(older);
        if delta > TREND_DELTA {
            Trend::Improving
        } else if delta < -TREND_DELTA {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

fn memory_score(metrics: &RawMetrics) -> u8 {
    if let Some(pressure) = metrics.memory_pressure {
        return match pressure {
            1 => 85,
            2 => 45,
            _ => 15,
        };
    }

    let percent = metrics.memory_usage_ratio().unwrap_or(1.0) * 100.0;
    if percent < 60.0 {
        85
    } else if percent < 75.0 {
        65
    } else if percent < 85.0 {
        40
    } else {
        20
    }
}

fn cpu_score(metrics: &RawMetrics) -> u8 {
    let usage = finite(metrics.cpu_usage_percent).unwrap_or(100.0);
    if usage < 20.0 {
        90
    } else if usage < 40.0 {
        75
    } else if usage < 60.0 {
        55
    } else if usage < 80.0 {
        35
    } else {
        15
    }
}

fn disk_score(metrics: &RawMetrics) -> u8 {
    let ops = finite(metrics.disk_read_ops).unwrap_or(0.0)
        + finite(metrics.disk_write_ops).unwrap_or(0.0);
    let latency = finite(metrics.disk_avg_time_ms).unwrap_or(f64::MAX);
    if ops < 100.0 && latency < 10.0 {
        85
    } else if ops < 500.0 && latency < 25.0 {
        65
    } else if ops < 1000.0 && latency < 50.0 {
        45
    } else {
        25
    }
}

fn swap_score(metrics: &RawMetrics) -> u8 {
    let used = finite(metrics.swap_used_mb).unwrap_or(0.0);
    if used <= 0.0 {
        return 90;
    }

    let total = finite(metrics.swap_total_mb).unwrap_or(0.0);
    if total <= 0.0 {
        return 10;
    }

    let percent = used / total * 100.0;
    if percent < 10.0 {
        75
    } else if percent < 25.0 {
        50
    } else if percent < 50.0 {
        25
    } else {
        10
    }
}

fn thermal_score(metrics: &RawMetrics) -> u8 {
    match metrics.thermal_state {
        Some(0) => 90,
        Some(1) => 70,
        Some(2) => 40,
        Some(3) => 15,
        _ => 80,
    }
}

fn potential_improvement(metrics: &RawMetrics) -> u8 {
    let ratio = metrics.memory_usage_ratio().unwrap_or(0.0);
    let pressure = metrics.memory_pressure.unwrap_or(1);
    let memory_part: u8 = if pressure >= 2 || ratio > 0.8 {
        35
    } else if ratio > 0.6 {
        20
    } else {
        10
    };

    let cpu = finite(metrics.cpu_usage_percent).unwrap_or(0.0);
    let cpu_part: u8 = if cpu > 60.0 {
        15
    } else if cpu > 40.0 {
        10
    } else {
        5
    };

    (memory_part + cpu_part).min(70)
}

fn primary_bottleneck(components: ComponentScores) -> Option<Bottleneck> {
    components
        .labelled()
        .iter()
        .filter(|(_, value)| *value < BOTTLENECK_THRESHOLD)
        .min_by_key(|(_, value)| *value)
        .map(|(name, _)| *name)
}

fn optimization_priority(bottlenecks: &[Bottleneck]) -> Vec<String> {
    let order = [
        Bottleneck::MemoryPressure,
        Bottleneck::SwapUsage,
        Bottleneck::DiskIo,
        Bottleneck::CpuOverload,
        Bottleneck::ThermalThrottling,
    ];
    let priority: Vec<String> = order
        .iter()
        .filter(|item| bottlenecks.contains(item))
        .map(|item| item.as_str().to_string())
        .collect();

    if priority.is_empty() {
        vec!["general_cleanup".to_string()]
    } else {
        priority
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_score(composite: f64) -> u8 {
    crate::clamp(composite, f64::from(MIN_SCORE), f64::from(MAX_SCORE)) as u8
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|inner| inner.is_finite())
}
