//! Load prediction and pluggable regression models.
//!
//! A [`PredictionModel`] fits a curve to `(load, value)` observations taken from past runs and
//! yields a [`FittedModel`]. Two baselines ship: [`LinearModel`] and [`PowerLawModel`]. When no
//! model has been fitted, [`predict`] falls back to a super-linear scaling heuristic.

use std::fmt;

use serde::{Deserialize, Serialize};
use stampede_core::Metrics;

/// Latency considered the edge of acceptable service when estimating capacity.
pub const CAPACITY_LATENCY_MS: f64 = 2_000.0;

/// Predicted error rate (percent) that flags a likely failure point.
const CRITICAL_ERROR_RATE: f64 = 10.0;

const LATENCY_EXPONENT: f64 = 1.5;
const BASE_CONFIDENCE: f64 = 0.9;

/// One `(load, value)` pair taken from a past run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub load: f64,
    pub value: f64,
}

impl Observation {
    #[must_use]
    pub const fn new(load: f64, value: f64) -> Self {
        Self { load, value }
    }
}

/// A strategy that fits a curve to observations.
pub trait PredictionModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fits the model. `None` when the observations cannot support a fit.
    fn fit(&self, observations: &[Observation]) -> Option<Box<dyn FittedModel>>;
}

/// A fitted curve.
pub trait FittedModel: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn predict(&self, load: f64) -> f64;

    /// Coefficient of determination over the observations the model was fitted on.
    fn r_squared(&self) -> f64;
}

/// `value = slope * load + intercept`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    r_squared: f64,
}

impl PredictionModel for LinearModel {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn fit(&self, observations: &[Observation]) -> Option<Box<dyn FittedModel>> {
        let xs: Vec<f64> = observations.iter().map(|o| o.load).collect();
        let ys: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let (slope, intercept) = regression(&xs, &ys)?;

        let mut fit = LinearFit {
            slope,
            intercept,
            r_squared: 0.0,
        };
        fit.r_squared = r_squared(observations, |x| fit.predict(x));
        Some(Box::new(fit))
    }
}

impl FittedModel for LinearFit {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn predict(&self, load: f64) -> f64 {
        self.slope * load + self.intercept
    }

    fn r_squared(&self) -> f64 {
        self.r_squared
    }
}

/// `value = coefficient * load^exponent`, fitted by least squares in log-log space.
///
/// Observations with a non-positive load or value are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerLawModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawFit {
    pub coefficient: f64,
    pub exponent: f64,
    r_squared: f64,
}

impl PredictionModel for PowerLawModel {
    fn name(&self) -> &'static str {
        "power_law"
    }

    fn fit(&self, observations: &[Observation]) -> Option<Box<dyn FittedModel>> {
        let usable: Vec<Observation> = observations
            .iter()
            .copied()
            .filter(|o| o.load > 0.0 && o.value > 0.0)
            .collect();
        let xs: Vec<f64> = usable.iter().map(|o| o.load.ln()).collect();
        let ys: Vec<f64> = usable.iter().map(|o| o.value.ln()).collect();
        let (exponent, log_coefficient) = regression(&xs, &ys)?;

        let mut fit = PowerLawFit {
            coefficient: log_coefficient.exp(),
            exponent,
            r_squared: 0.0,
        };
        fit.r_squared = r_squared(&usable, |x| fit.predict(x));
        Some(Box::new(fit))
    }
}

impl FittedModel for PowerLawFit {
    fn name(&self) -> &'static str {
        "power_law"
    }

    fn predict(&self, load: f64) -> f64 {
        if load <= 0.0 {
            return 0.0;
        }
        self.coefficient * load.powf(self.exponent)
    }

    fn r_squared(&self) -> f64 {
        self.r_squared
    }
}

/// Ordinary least squares. Needs at least two points with distinct `x`.
fn regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }
    if sxx.abs() < f64::EPSILON {
        return None;
    }

    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

fn r_squared(observations: &[Observation], predict: impl Fn(f64) -> f64) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    let mean = observations.iter().map(|o| o.value).sum::<f64>() / observations.len() as f64;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for o in observations {
        ss_res += (o.value - predict(o.load)).powi(2);
        ss_tot += (o.value - mean).powi(2);
    }

    if ss_tot < f64::EPSILON {
        return if ss_res < f64::EPSILON { 1.0 } else { 0.0 };
    }
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

/// Fits every candidate and keeps the one with the best R².
#[must_use]
pub fn best_fit(
    candidates: &[&dyn PredictionModel],
    observations: &[Observation],
) -> Option<Box<dyn FittedModel>> {
    candidates
        .iter()
        .filter_map(|model| model.fit(observations))
        .max_by(|a, b| a.r_squared().total_cmp(&b.r_squared()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    /// Super-linear scaling of the current run.
    Heuristic,
    /// Regression fitted on run history.
    FittedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPrediction {
    /// Requested load in requests per second.
    pub target_load: f64,
    pub current_load: f64,
    /// `target_load / current_load`
    pub scaling_ratio: f64,
    pub predicted_latency: f64,
    /// Percent, capped at 100.
    pub predicted_error_rate: f64,
    pub predicted_throughput: f64,
    /// 0.1-1.0
    pub confidence: f64,
    /// Requests per second at which average latency reaches [`CAPACITY_LATENCY_MS`].
    pub capacity_estimate: f64,
    pub method: PredictionMethod,
    pub bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Exponent applied to the scaling ratio when extrapolating the error rate.
fn error_rate_exponent(ratio: f64) -> f64 {
    if ratio < 2.0 {
        1.2
    } else if ratio < 5.0 {
        1.5
    } else {
        1.8
    }
}

fn confidence(ratio: f64, history_len: usize) -> f64 {
    let mut confidence = BASE_CONFIDENCE;

    if ratio > 10.0 {
        confidence -= 0.3;
    } else if ratio > 5.0 {
        confidence -= 0.15;
    }

    if history_len < 5 {
        confidence -= 0.2;
    } else if history_len < 10 {
        confidence -= 0.1;
    }

    confidence.clamp(0.1, 1.0)
}

/// Load at which `model` first predicts `limit`, searched over `[0, ceiling]`.
fn load_at(model: &dyn FittedModel, limit: f64, ceiling: f64) -> f64 {
    if model.predict(ceiling) < limit {
        return ceiling;
    }
    let (mut lo, mut hi) = (0.0, ceiling);
    for _ in 0..64 {
        let mid = (lo + hi) / 2.0;
        if model.predict(mid) < limit {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Extrapolates `metrics` to `target_load` requests per second.
///
/// `latency_model` and `error_model`, when present, replace the heuristic for their metric.
#[must_use]
pub fn predict(
    metrics: &Metrics,
    target_load: f64,
    history_len: usize,
    latency_model: Option<&dyn FittedModel>,
    error_model: Option<&dyn FittedModel>,
) -> LoadPrediction {
    let current_load = metrics.throughput.requests_per_second;
    let current_latency = metrics.latency.average;
    let current_error_rate = metrics.error_rate();

    let ratio = if current_load > 0.0 {
        target_load / current_load
    } else {
        1.0
    };

    let heuristic_latency = current_latency * ratio.max(0.0).powf(LATENCY_EXPONENT);
    let heuristic_error = current_error_rate * ratio.max(0.0).powf(error_rate_exponent(ratio));

    let predicted_latency = latency_model
        .map(|m| m.predict(target_load).max(0.0))
        .unwrap_or(heuristic_latency);
    let predicted_error_rate = error_model
        .map(|m| m.predict(target_load))
        .unwrap_or(heuristic_error)
        .clamp(0.0, 100.0);

    let method = if latency_model.is_some() || error_model.is_some() {
        PredictionMethod::FittedModel
    } else {
        PredictionMethod::Heuristic
    };

    let capacity_estimate = match latency_model {
        Some(model) => load_at(model, CAPACITY_LATENCY_MS, current_load.max(target_load) * 100.0),
        None if current_latency > 0.0 && current_load > 0.0 => {
            current_load * (CAPACITY_LATENCY_MS / current_latency).powf(1.0 / LATENCY_EXPONENT)
        }
        None => current_load,
    };

    let mut bottlenecks = vec![
        "Database connection pool saturation".to_string(),
        "CPU saturation on application servers".to_string(),
        "Network bandwidth between tiers".to_string(),
    ];
    let mut recommendations = vec![
        "Ramp load gradually and watch latency percentiles".to_string(),
        "Enable autoscaling before the predicted capacity is reached".to_string(),
        "Re-run the test at the target load to confirm the prediction".to_string(),
    ];

    if predicted_latency > CAPACITY_LATENCY_MS {
        bottlenecks.push(format!(
            "Predicted latency {predicted_latency:.0}ms exceeds {CAPACITY_LATENCY_MS:.0}ms"
        ));
        recommendations
            .push("Add capacity or optimize slow paths before targeting this load".to_string());
    }
    if predicted_error_rate > CRITICAL_ERROR_RATE {
        bottlenecks.push(format!(
            "Predicted error rate {predicted_error_rate:.1}% exceeds {CRITICAL_ERROR_RATE:.0}%"
        ));
        recommendations.push(
            "Expect failures at this load; add rate limiting and graceful degradation".to_string(),
        );
    }
    if current_load <= 0.0 {
        recommendations
            .push("Current run has no measurable throughput; prediction is unreliable".to_string());
    }

    let confidence = if current_load > 0.0 {
        confidence(ratio, history_len)
    } else {
        0.1
    };

    LoadPrediction {
        target_load,
        current_load,
        scaling_ratio: ratio,
        predicted_latency,
        predicted_error_rate,
        predicted_throughput: target_load.min(capacity_estimate.max(current_load)),
        confidence,
        capacity_estimate,
        method,
        bottlenecks,
        recommendations,
    }
}
