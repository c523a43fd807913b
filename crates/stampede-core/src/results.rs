//! Completed-run results and performance scoring.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TestId;
use crate::metrics::{Metrics, TestError};
use crate::scenario::TestConfig;

/// Outcome of a single completed (or policy-stopped) run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub test_id: TestId,
    /// Snapshot of the configuration that produced these results.
    pub config: TestConfig,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Wall-clock run time in seconds.
    pub duration: f64,
    pub metrics: Metrics,
    #[serde(default)]
    pub errors: Vec<TestError>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub termination: Termination,
    pub summary: Summary,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    #[default]
    Completed,
    StoppedByPolicy,
    DurationElapsed,
    PauseTimeout,
}

impl Termination {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub overall: Overall,
    /// Performance score, 0-100.
    pub score: f64,
    pub grade: Grade,
    #[serde(default)]
    pub bottlenecks: Vec<Bottleneck>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Overall {
    Fail,
    Warning,
    Pass,
}

impl Overall {
    /// `PASS` at 80 and above, `WARNING` at 60 and above, `FAIL` otherwise.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Pass
        } else if score >= 60.0 {
            Self::Warning
        } else {
            Self::Fail
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warning => "WARNING",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => Self::A,
            s if s >= 80.0 => Self::B,
            s if s >= 70.0 => Self::C,
            s if s >= 60.0 => Self::D,
            _ => Self::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckType {
    Cpu,
    Memory,
    Network,
    Database,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource or subsystem identified as limiting the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    #[serde(rename = "type")]
    pub kind: BottleneckType,
    pub severity: Severity,
    pub description: String,
    pub impact: String,
    pub recommendation: String,
}

/// Performance score for a metrics snapshot, clamped to 0-100.
///
/// Starts at 100 and subtracts proportional penalties for the error rate, P95 above 1s,
/// P99 above 2s, and a success rate under 95%.
#[must_use]
pub fn performance_score(metrics: &Metrics) -> f64 {
    let mut score = 100.0;

    score -= metrics.error_rate() * 2.0;

    if metrics.latency.p95 > 1000.0 {
        score -= ((metrics.latency.p95 - 1000.0) / 50.0).min(25.0);
    }
    if metrics.latency.p99 > 2000.0 {
        score -= ((metrics.latency.p99 - 2000.0) / 100.0).min(20.0);
    }
    if metrics.requests.total > 0 && metrics.requests.success_rate < 95.0 {
        score -= 95.0 - metrics.requests.success_rate;
    }

    score.clamp(0.0, 100.0)
}

impl Summary {
    /// Scores `metrics` and derives grade and overall verdict.
    #[must_use]
    pub fn scored(metrics: &Metrics) -> Self {
        let score = performance_score(metrics);
        Self {
            overall: Overall::from_score(score),
            score,
            grade: Grade::from_score(score),
            bottlenecks: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Caps the verdict at `WARNING` for runs that did not complete.
    #[must_use]
    pub fn capped_for(mut self, termination: Termination) -> Self {
        if !termination.is_complete() && self.overall == Overall::Pass {
            self.overall = Overall::Warning;
        }
        self
    }
}

impl TestResults {
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        self.metrics.error_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestMetrics;

    fn metrics(successful: u64, failed: u64, p95: f64, p99: f64) -> Metrics {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(successful, failed);
        metrics.errors.total = failed;
        metrics.latency.p95 = p95;
        metrics.latency.p99 = p99;
        metrics
    }

    #[test]
    fn test_clean_run_scores_full_marks() {
        let summary = Summary::scored(&metrics(1000, 0, 200.0, 400.0));
        assert_eq!(summary.score, 100.0);
        assert_eq!(summary.grade, Grade::A);
        assert_eq!(summary.overall, Overall::Pass);
    }

    #[test]
    fn test_penalties_accumulate_and_clamp() {
        // 50% errors, very slow tail
        let summary = Summary::scored(&metrics(500, 500, 5000.0, 9000.0));
        assert_eq!(summary.score, 0.0);
        assert_eq!(summary.grade, Grade::F);
        assert_eq!(summary.overall, Overall::Fail);
    }

    #[test]
    fn test_latency_penalty_only() {
        // P95 1500ms → -10, P99 2500ms → -5
        let summary = Summary::scored(&metrics(100, 0, 1500.0, 2500.0));
        assert_eq!(summary.score, 85.0);
        assert_eq!(summary.grade, Grade::B);
        assert_eq!(summary.overall, Overall::Pass);
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(89.9), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.9), Grade::F);
        assert_eq!(Overall::from_score(60.0), Overall::Warning);
    }

    #[test]
    fn test_incomplete_run_is_at_best_warning() {
        let summary = Summary::scored(&metrics(10, 0, 10.0, 10.0))
            .capped_for(Termination::StoppedByPolicy);
        assert_eq!(summary.overall, Overall::Warning);

        let failing = Summary::scored(&metrics(0, 10, 10.0, 10.0))
            .capped_for(Termination::StoppedByPolicy);
        assert_eq!(failing.overall, Overall::Fail);
    }
}
