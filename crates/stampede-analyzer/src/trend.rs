//! Trend detection across historical runs.

use serde::{Deserialize, Serialize};
use stampede_core::TestResults;

/// Runs required before trends are reported.
pub const MIN_RUNS_FOR_TRENDS: usize = 3;

/// Most recent runs included in the regression.
pub const TREND_WINDOW: usize = 5;

/// Slope magnitudes under these are treated as noise (units per run).
const LATENCY_NOISE_FLOOR_MS: f64 = 10.0;
const ERROR_RATE_NOISE_FLOOR: f64 = 2.0;
const THROUGHPUT_NOISE_FLOOR_RPS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    AverageLatency,
    ErrorRate,
    Throughput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub metric: TrendMetric,
    pub direction: TrendDirection,
    /// Change per run.
    pub slope: f64,
    /// Runs the slope was fitted over.
    pub runs: usize,
    /// True when the direction is bad news (slower, more errors, less throughput).
    pub degrading: bool,
    pub description: String,
}

/// Least-squares slope of `values` against their index. Zero for fewer than two points.
#[must_use]
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (mut numerator, mut denominator) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }

    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Trends over the last [`TREND_WINDOW`] runs of `history` (oldest first).
///
/// Returns nothing until [`MIN_RUNS_FOR_TRENDS`] runs are available.
#[must_use]
pub fn analyze_trends<'a, I>(history: I) -> Vec<Trend>
where
    I: IntoIterator<Item = &'a TestResults>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut window: Vec<&TestResults> = history.into_iter().rev().take(TREND_WINDOW).collect();
    if window.len() < MIN_RUNS_FOR_TRENDS {
        return Vec::new();
    }
    window.reverse();

    let series = |f: fn(&TestResults) -> f64| window.iter().map(|r| f(r)).collect::<Vec<_>>();

    let candidates = [
        (
            TrendMetric::AverageLatency,
            series(|r| r.metrics.latency.average),
            LATENCY_NOISE_FLOOR_MS,
            "ms",
        ),
        (
            TrendMetric::ErrorRate,
            series(|r| r.metrics.error_rate()),
            ERROR_RATE_NOISE_FLOOR,
            "%",
        ),
        (
            TrendMetric::Throughput,
            series(|r| r.metrics.throughput.requests_per_second),
            THROUGHPUT_NOISE_FLOOR_RPS,
            " req/s",
        ),
    ];

    let runs = window.len();
    candidates
        .into_iter()
        .filter_map(|(metric, values, floor, unit)| {
            let slope = least_squares_slope(&values);
            if slope.abs() <= floor {
                return None;
            }

            let direction = if slope > 0.0 {
                TrendDirection::Increasing
            } else {
                TrendDirection::Decreasing
            };
            let degrading = match metric {
                TrendMetric::Throughput => direction == TrendDirection::Decreasing,
                _ => direction == TrendDirection::Increasing,
            };
            let label = match metric {
                TrendMetric::AverageLatency => "Average latency",
                TrendMetric::ErrorRate => "Error rate",
                TrendMetric::Throughput => "Throughput",
            };

            Some(Trend {
                metric,
                direction,
                slope,
                runs,
                degrading,
                description: format!(
                    "{label} is {} by {:.2}{unit} per run over the last {runs} runs",
                    if slope > 0.0 { "increasing" } else { "decreasing" },
                    slope.abs()
                ),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slope_of_line() {
        assert_eq!(least_squares_slope(&[1.0, 3.0, 5.0, 7.0]), 2.0);
        assert_eq!(least_squares_slope(&[4.0, 4.0, 4.0]), 0.0);
        assert_eq!(least_squares_slope(&[4.0]), 0.0);
    }

    #[test]
    fn test_slope_is_negative_for_decline() {
        let slope = least_squares_slope(&[100.0, 80.0, 60.0]);
        assert!((slope + 20.0).abs() < 1e-9);
    }
}
