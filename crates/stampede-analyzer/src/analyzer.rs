//! Metrics analyzer with a bounded run history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use stampede_core::config::AnalyzerConfig;
use stampede_core::{performance_score, Bottleneck, Metrics, TestId, TestResults};
use tracing::{debug, info};

use crate::anomaly::{self, Anomaly};
use crate::bottleneck::{self, BottleneckAnalysis};
use crate::prediction::{
    self, best_fit, FittedModel, LinearModel, LoadPrediction, Observation, PowerLawModel,
    PredictionModel,
};
use crate::recommendations::generate_recommendations;
use crate::trend::{self, Trend};

/// Runs required before models are fitted.
pub const MIN_RUNS_FOR_TRAINING: usize = 5;

/// Result of analyzing one run in the context of the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub test_id: TestId,
    pub anomalies: Vec<Anomaly>,
    pub trends: Vec<Trend>,
    pub recommendations: Vec<String>,
    pub performance_score: f64,
    pub bottlenecks: Vec<Bottleneck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTarget {
    /// Average latency against requests per second.
    Latency,
    /// Error rate against requests per second.
    ErrorRate,
    /// Requests per second against simulated users.
    Throughput,
}

/// Outcome of fitting one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub target: ModelTarget,
    pub trained: bool,
    /// Winning model family, when trained.
    pub model: Option<String>,
    /// R² of the fit on the history.
    pub accuracy: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Default)]
struct TrainedModels {
    latency: Option<Box<dyn FittedModel>>,
    error_rate: Option<Box<dyn FittedModel>>,
    throughput: Option<Box<dyn FittedModel>>,
}

/// Post-run analysis over a rolling window of results.
///
/// Like the policy manager, this is an explicit instance owned by its caller and holds no
/// internal locks.
pub struct MetricsAnalyzer {
    config: AnalyzerConfig,
    history: VecDeque<TestResults>,
    candidates: Vec<Box<dyn PredictionModel>>,
    models: TrainedModels,
}

impl std::fmt::Debug for MetricsAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAnalyzer")
            .field("config", &self.config)
            .field("history", &self.history.len())
            .field("models", &self.models)
            .finish()
    }
}

impl Default for MetricsAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl MetricsAnalyzer {
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            candidates: vec![Box::new(PowerLawModel), Box::new(LinearModel)],
            models: TrainedModels::default(),
        }
    }

    /// Replaces the candidate model families considered by [`Self::train_models`].
    #[must_use]
    pub fn with_models(mut self, candidates: Vec<Box<dyn PredictionModel>>) -> Self {
        self.candidates = candidates;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Past runs, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TestResults> {
        self.history.iter()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Adds a run to the history without analyzing it.
    pub fn record(&mut self, results: TestResults) {
        self.history.push_back(results);
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.models = TrainedModels::default();
    }

    /// Analyzes `results` and appends it to the history.
    pub fn analyze_results(&mut self, results: &TestResults) -> Analysis {
        let metrics = &results.metrics;

        let mut anomalies = Vec::new();
        anomalies.extend(anomaly::detect_error_rate(metrics, &self.config));
        anomalies.extend(anomaly::detect_latency(metrics, &self.config));
        if let Some(previous) = self.history.back() {
            anomalies.extend(anomaly::detect_throughput_drop(
                metrics,
                &previous.metrics,
                &self.config,
            ));
        }
        anomalies.extend(anomaly::detect_endpoint_anomalies(metrics, &self.config));

        self.record(results.clone());

        let trends = trend::analyze_trends(&self.history);
        let recommendations = generate_recommendations(metrics, &anomalies, &self.config);
        let bottlenecks = bottleneck::identify_bottlenecks(metrics);

        info!(
            "Analyzed run {}: {} anomalies, {} trends, {} bottlenecks",
            results.test_id,
            anomalies.len(),
            trends.len(),
            bottlenecks.len()
        );

        Analysis {
            test_id: results.test_id,
            anomalies,
            trends,
            recommendations,
            performance_score: performance_score(metrics),
            bottlenecks,
        }
    }

    /// Extrapolates `current` to `target_load` requests per second.
    #[must_use]
    pub fn predict_load(&self, current: &Metrics, target_load: f64) -> LoadPrediction {
        prediction::predict(
            current,
            target_load,
            self.history.len(),
            self.models.latency.as_deref(),
            self.models.error_rate.as_deref(),
        )
    }

    #[must_use]
    pub fn analyze_bottlenecks(&self, results: &TestResults) -> BottleneckAnalysis {
        bottleneck::analyze_bottlenecks(results)
    }

    /// Fits latency, error-rate and throughput models on the history.
    ///
    /// Nothing is trained until [`MIN_RUNS_FOR_TRAINING`] runs exist. Accuracy is the R² of the
    /// winning fit.
    pub fn train_models(&mut self) -> Vec<ModelReport> {
        let samples = self.history.len();
        if samples < MIN_RUNS_FOR_TRAINING {
            debug!(
                "Skipping model training: {} of {} runs available",
                samples, MIN_RUNS_FOR_TRAINING
            );
            return [ModelTarget::Latency, ModelTarget::ErrorRate, ModelTarget::Throughput]
                .into_iter()
                .map(|target| ModelReport {
                    target,
                    trained: false,
                    model: None,
                    accuracy: None,
                    samples,
                })
                .collect();
        }

        let rps = |r: &TestResults| r.metrics.throughput.requests_per_second;
        let latency: Vec<Observation> = self
            .history
            .iter()
            .map(|r| Observation::new(rps(r), r.metrics.latency.average))
            .collect();
        let error_rate: Vec<Observation> = self
            .history
            .iter()
            .map(|r| Observation::new(rps(r), r.metrics.error_rate()))
            .collect();
        let throughput: Vec<Observation> = self
            .history
            .iter()
            .map(|r| Observation::new(f64::from(r.config.max_users), rps(r)))
            .collect();

        let candidates: Vec<&dyn PredictionModel> =
            self.candidates.iter().map(|m| &**m).collect();

        self.models.latency = best_fit(&candidates, &latency);
        self.models.error_rate = best_fit(&candidates, &error_rate);
        self.models.throughput = best_fit(&candidates, &throughput);

        let reports = vec![
            report(ModelTarget::Latency, self.models.latency.as_deref(), samples),
            report(ModelTarget::ErrorRate, self.models.error_rate.as_deref(), samples),
            report(ModelTarget::Throughput, self.models.throughput.as_deref(), samples),
        ];
        info!(
            "Trained {} of 3 models on {} runs",
            reports.iter().filter(|r| r.trained).count(),
            samples
        );
        reports
    }

    /// Throughput predicted for `users` simulated users, once a throughput model is trained.
    #[must_use]
    pub fn predict_throughput(&self, users: u32) -> Option<f64> {
        self.models
            .throughput
            .as_ref()
            .map(|m| m.predict(f64::from(users)).max(0.0))
    }
}

fn report(target: ModelTarget, model: Option<&dyn FittedModel>, samples: usize) -> ModelReport {
    ModelReport {
        target,
        trained: model.is_some(),
        model: model.map(|m| m.name().to_string()),
        accuracy: model.map(|m| m.r_squared()),
        samples,
    }
}
