//! Post-run analysis for stampede: anomalies, trends, bottlenecks, recommendations and load
//! prediction.

pub mod analyzer;
pub mod anomaly;
pub mod bottleneck;
pub mod prediction;
pub mod recommendations;
pub mod trend;

pub use analyzer::{Analysis, MetricsAnalyzer, ModelReport, ModelTarget, MIN_RUNS_FOR_TRAINING};
pub use anomaly::{Anomaly, AnomalyType};
pub use bottleneck::{analyze_bottlenecks, identify_bottlenecks, BottleneckAnalysis, CapacityLimits};
pub use prediction::{
    FittedModel, LinearModel, LoadPrediction, Observation, PowerLawModel, PredictionMethod,
    PredictionModel,
};
pub use recommendations::generate_recommendations;
pub use trend::{Trend, TrendDirection, TrendMetric};
